// ABOUTME: Correlation tags written on every mirrored row: change ids and sync ids
// ABOUTME: SyncContext carries the run tag through a call chain instead of shared mutable state

use std::fmt;

use uuid::Uuid;

fn generate() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{}", chrono::Utc::now().timestamp(), &random[..10])
}

/// Identifies one logical mirroring operation (one top-level API call or
/// notification). Rows of a parent not carrying it are tombstone candidates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeId(String);

impl ChangeId {
    pub fn generate() -> Self {
        Self(generate())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChangeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one full-sync run. Rows of a type not carrying the latest run's
/// id are stale once that run completes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncId(String);

impl SyncId {
    pub fn generate() -> Self {
        Self(generate())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SyncId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tags stamped on every row written by one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationTags {
    pub change_id: ChangeId,
    pub sync_id: SyncId,
}

impl OperationTags {
    pub fn new(change_id: ChangeId, sync_id: SyncId) -> Self {
        Self { change_id, sync_id }
    }

    /// Tags for a one-off write outside any full sync.
    pub fn incremental() -> Self {
        Self::new(ChangeId::generate(), SyncId::generate())
    }
}

/// Call-local run context.
///
/// A full-sync invocation creates one and passes it to every type it syncs;
/// nothing about the current run lives in shared state, so concurrent runs
/// cannot see each other's sync id.
#[derive(Debug, Clone)]
pub struct SyncContext {
    sync_id: SyncId,
}

impl SyncContext {
    /// Context for a new full-sync run with a freshly generated sync id.
    pub fn full_run() -> Self {
        Self::with_sync_id(SyncId::generate())
    }

    pub fn with_sync_id(sync_id: SyncId) -> Self {
        Self { sync_id }
    }

    pub fn sync_id(&self) -> &SyncId {
        &self.sync_id
    }

    /// Fresh change id for one item, sharing this context's sync id.
    pub fn operation(&self) -> OperationTags {
        OperationTags::new(ChangeId::generate(), self.sync_id.clone())
    }
}
