// ABOUTME: Full sync engine - lists an entire remote collection and purges what it did not see
// ABOUTME: List fully, then delete; a failed listing never reaches the staleness pass

use std::sync::Arc;
use std::time::{Duration, Instant};

use mirror_store::MirrorStore;
use uuid::Uuid;

use crate::entity::{EntityKind, SyncTarget};
use crate::error::{MirrorError, Result};
use crate::mirror::Mirror;
use crate::reconcile;
use crate::remote::{PageRequest, PAGE_SIZE};
use crate::schema;
use crate::tags::SyncContext;

/// A run renews its lease after every page; a lease left by a crashed run
/// expires after this long.
const LEASE_TTL: Duration = Duration::from_secs(300);

const LEASE_POLL: Duration = Duration::from_millis(50);

/// Outcome of one completed target sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetStats {
    pub target: SyncTarget,
    pub pages: u64,
    pub records_mirrored: u64,
    pub records_deleted: u64,
    pub metadata_deleted: u64,
    pub duration_ms: u64,
}

impl TargetStats {
    fn new(target: SyncTarget) -> Self {
        Self {
            target,
            pages: 0,
            records_mirrored: 0,
            records_deleted: 0,
            metadata_deleted: 0,
            duration_ms: 0,
        }
    }
}

/// Statistics from one sync invocation across several targets.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub completed: Vec<TargetStats>,
    pub errors: Vec<(SyncTarget, String)>,
    pub duration_ms: u64,
}

impl SyncReport {
    /// Check if every requested target completed.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn records_mirrored(&self) -> u64 {
        self.completed.iter().map(|s| s.records_mirrored).sum()
    }

    pub fn records_deleted(&self) -> u64 {
        self.completed.iter().map(|s| s.records_deleted).sum()
    }
}

/// Progress of a multi-target sync, reported as it happens.
#[derive(Debug)]
pub enum SyncProgress<'a> {
    Started(SyncTarget),
    /// Running count of records mirrored for the target.
    Mirrored(SyncTarget, u64),
    Completed(&'a TargetStats),
    Failed(SyncTarget, &'a MirrorError),
}

/// Exclusive right to full-sync one kind, held in the mirror store so it also
/// excludes engines in other processes sharing the database.
struct SyncLease {
    store: Arc<dyn MirrorStore>,
    name: String,
    holder: String,
}

impl SyncLease {
    async fn acquire(store: &Arc<dyn MirrorStore>, kind: EntityKind) -> Result<Self> {
        let name = format!("full-sync:{}", kind.table().name);
        let holder = Uuid::new_v4().to_string();
        let mut waiting = false;
        while !store.acquire_lease(&name, &holder, LEASE_TTL)? {
            if !waiting {
                tracing::info!("Waiting for another full sync of {} to finish", kind);
                waiting = true;
            }
            tokio::time::sleep(LEASE_POLL).await;
        }
        Ok(Self {
            store: Arc::clone(store),
            name,
            holder,
        })
    }

    /// Extend the lease. Fails when another run took it over after it expired.
    fn renew(&self, kind: EntityKind) -> Result<()> {
        if self.store.acquire_lease(&self.name, &self.holder, LEASE_TTL)? {
            Ok(())
        } else {
            Err(MirrorError::LeaseLost { kind })
        }
    }
}

impl Drop for SyncLease {
    fn drop(&mut self) {
        if let Err(e) = self.store.release_lease(&self.name, &self.holder) {
            tracing::warn!("Failed to release lease {}: {}", self.name, e);
        }
    }
}

/// Drives full syncs. Runs of the same kind are serialized through a lease in
/// the mirror store; runs of different kinds proceed in parallel.
pub struct SyncEngine {
    mirror: Arc<Mirror>,
}

impl SyncEngine {
    pub fn new(mirror: Arc<Mirror>) -> Self {
        Self { mirror }
    }

    pub fn mirror(&self) -> &Arc<Mirror> {
        &self.mirror
    }

    /// Sync one target completely under `ctx`'s run id.
    pub async fn sync_all(&self, target: SyncTarget, ctx: &SyncContext) -> Result<TargetStats> {
        self.sync_all_with_progress(target, ctx, |_| {}).await
    }

    /// Like [`sync_all`](Self::sync_all), reporting the running record count
    /// after every mirrored item.
    pub async fn sync_all_with_progress<F>(
        &self,
        target: SyncTarget,
        ctx: &SyncContext,
        progress: F,
    ) -> Result<TargetStats>
    where
        F: Fn(u64) + Send + Sync,
    {
        let kind = target.kind();
        let lease = SyncLease::acquire(self.mirror.store(), kind).await?;

        let start = Instant::now();
        let mut stats = TargetStats::new(target);
        tracing::info!("Starting full sync of {} (run {})", target, ctx.sync_id());

        let path = schema::collection_path(kind, None)?;
        let mut request = PageRequest::first(PAGE_SIZE);
        for (key, value) in target.list_filters() {
            request = request.with_filter(*key, *value);
        }

        // Listing pass. Any error returns before the staleness pass below.
        loop {
            let page = self.mirror.api().list(&path, &request).await?;
            stats.pages += 1;
            for object in &page.data {
                let tags = ctx.operation();
                self.mirror.mirror(kind, object, &tags).await?;
                stats.records_mirrored += 1;
                progress(stats.records_mirrored);
            }
            lease.renew(kind)?;
            match (page.has_more, page.last_id()) {
                (true, Some(cursor)) => request = request.after(cursor),
                _ => break,
            }
        }

        lease.renew(kind)?;
        let outcome = self
            .mirror
            .store()
            .apply(&reconcile::staleness(kind, ctx.sync_id()))?;
        drop(lease);
        stats.records_deleted = outcome.records_deleted;
        stats.metadata_deleted = outcome.metadata_deleted;
        stats.duration_ms = start.elapsed().as_millis() as u64;

        tracing::info!(
            "Synced {}: {} records over {} pages, {} stale records and {} stale metadata removed ({}ms)",
            target,
            stats.records_mirrored,
            stats.pages,
            stats.records_deleted,
            stats.metadata_deleted,
            stats.duration_ms
        );
        Ok(stats)
    }

    /// Sync several targets under one shared run id. A failing target is
    /// recorded and the remaining targets still run.
    pub async fn sync_targets(&self, targets: &[SyncTarget], ctx: &SyncContext) -> SyncReport {
        self.sync_targets_with_progress(targets, ctx, |_| {}).await
    }

    pub async fn sync_targets_with_progress<F>(
        &self,
        targets: &[SyncTarget],
        ctx: &SyncContext,
        progress: F,
    ) -> SyncReport
    where
        F: Fn(SyncProgress<'_>) + Send + Sync,
    {
        let start = Instant::now();
        let mut report = SyncReport::default();

        for target in targets {
            progress(SyncProgress::Started(*target));
            let result = self
                .sync_all_with_progress(*target, ctx, |mirrored| {
                    progress(SyncProgress::Mirrored(*target, mirrored))
                })
                .await;
            match result {
                Ok(stats) => {
                    progress(SyncProgress::Completed(&stats));
                    report.completed.push(stats);
                }
                Err(e) => {
                    tracing::error!("Full sync of {} aborted, nothing deleted: {}", target, e);
                    progress(SyncProgress::Failed(*target, &e));
                    report.errors.push((*target, e.to_string()));
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        report
    }
}
