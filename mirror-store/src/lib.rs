//! Local mirror storage.
//!
//! One table per mirrored entity kind plus a shared `metadata` table keyed by
//! (owner type, owner id, key). Writes are expressed as [`WriteOp`]s and a
//! batch of them is applied in a single transaction. Named leases in the same
//! database let separate processes take turns at exclusive work.

pub mod error;
pub mod record;
pub mod sqlite;
pub mod store;

pub use error::{Result, StoreError};
pub use record::{
    ApplyOutcome, Condition, MetadataRow, MetadataSelector, Record, Selector, TableSpec, WriteOp,
    LEASE_TABLE, METADATA_TABLE,
};
pub use sqlite::SqliteMirrorStore;
pub use store::MirrorStore;
