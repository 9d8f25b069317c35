use std::time::Duration;

use crate::error::Result;
use crate::record::{ApplyOutcome, MetadataRow, Record, Selector, TableSpec, WriteOp};

/// Storage contract for the local mirror.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn MirrorStore>`.
pub trait MirrorStore: Send + Sync {
    /// Apply every op in one transaction; either all of them land or none do.
    fn apply(&self, ops: &[WriteOp]) -> Result<ApplyOutcome>;

    fn get(&self, table: &str, id: &str) -> Result<Option<Record>>;

    /// Rows matching `selector`, ordered by id.
    fn find(&self, table: &str, selector: &Selector) -> Result<Vec<Record>>;

    fn count(&self, table: &str) -> Result<u64>;

    /// Metadata rows of one owner, ordered by key.
    fn metadata(&self, owner_type: &str, owner_id: &str) -> Result<Vec<MetadataRow>>;

    /// Remove every row from every table. Returns the number of rows removed.
    fn clear(&self) -> Result<u64>;

    fn tables(&self) -> Vec<TableSpec>;

    /// Take or extend the lease `name` for `holder` until `ttl` from now.
    ///
    /// Returns `false` while a different holder's lease is unexpired. Leases
    /// live in the database, so they also exclude other processes sharing it.
    fn acquire_lease(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Drop the lease `name` if `holder` still owns it.
    fn release_lease(&self, name: &str, holder: &str) -> Result<()>;

    fn upsert(&self, table: &'static str, record: Record) -> Result<ApplyOutcome> {
        self.apply(&[WriteOp::Upsert { table, record }])
    }
}
