use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the shared metadata side table.
pub const METADATA_TABLE: &str = "metadata";

/// Name of the table holding named leases between writers.
pub const LEASE_TABLE: &str = "sync_leases";

/// Shape of one mirrored table: the key column, a JSON attribute blob, the
/// indexed relation columns, and the `change_id`/`sync_id` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub relations: &'static [&'static str],
}

impl TableSpec {
    pub const fn new(name: &'static str, relations: &'static [&'static str]) -> Self {
        Self { name, relations }
    }

    /// Columns a [`Selector`] may filter on.
    pub fn has_column(&self, column: &str) -> bool {
        matches!(column, "id" | "change_id" | "sync_id") || self.relations.contains(&column)
    }
}

/// One stored entity. Relation columns are denormalized from the attribute of
/// the same name at write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub attributes: Map<String, Value>,
    pub change_id: String,
    pub sync_id: String,
}

impl Record {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Value stored in a relation column, if any.
    pub fn relation(&self, column: &str) -> Option<String> {
        match self.attributes.get(column) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRow {
    pub owner_type: String,
    pub owner_id: String,
    pub key: String,
    pub value: String,
    pub change_id: String,
    pub sync_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Eq(String, String),
    /// Null-safe inequality: rows with a NULL column match.
    NotEq(String, String),
}

impl Condition {
    pub fn column(&self) -> &str {
        match self {
            Condition::Eq(column, _) | Condition::NotEq(column, _) => column,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Condition::Eq(_, value) | Condition::NotEq(_, value) => value,
        }
    }
}

/// Conjunction of column conditions. An empty selector matches every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    conditions: Vec<Condition>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(id: impl Into<String>) -> Self {
        Self::new().eq("id", id)
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions
            .push(Condition::Eq(column.into(), value.into()));
        self
    }

    pub fn not_eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions
            .push(Condition::NotEq(column.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
}

/// Selects metadata rows of one owner type, optionally narrowed to one owner
/// and to rows whose tags differ from the given ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataSelector {
    pub owner_type: String,
    pub owner_id: Option<String>,
    pub except_change_id: Option<String>,
    pub except_sync_id: Option<String>,
}

impl MetadataSelector {
    pub fn owner(owner_type: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            owner_type: owner_type.into(),
            owner_id: Some(owner_id.into()),
            except_change_id: None,
            except_sync_id: None,
        }
    }

    pub fn owner_type(owner_type: impl Into<String>) -> Self {
        Self {
            owner_type: owner_type.into(),
            owner_id: None,
            except_change_id: None,
            except_sync_id: None,
        }
    }

    pub fn except_change(mut self, change_id: impl Into<String>) -> Self {
        self.except_change_id = Some(change_id.into());
        self
    }

    pub fn except_sync(mut self, sync_id: impl Into<String>) -> Self {
        self.except_sync_id = Some(sync_id.into());
        self
    }
}

/// A single write against the store. A slice of these is applied atomically.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Upsert {
        table: &'static str,
        record: Record,
    },
    UpsertMetadata(MetadataRow),
    /// Deletes matching rows. When `metadata_owner` is set, metadata rows
    /// addressed to each deleted id under that owner type go with them.
    DeleteRecords {
        table: &'static str,
        selector: Selector,
        metadata_owner: Option<&'static str>,
    },
    DeleteMetadata(MetadataSelector),
}

/// Row counts produced by one [`apply`](crate::MirrorStore::apply) call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub records_upserted: u64,
    pub records_deleted: u64,
    pub metadata_upserted: u64,
    pub metadata_deleted: u64,
}

impl ApplyOutcome {
    pub fn merge(&mut self, other: ApplyOutcome) {
        self.records_upserted += other.records_upserted;
        self.records_deleted += other.records_deleted;
        self.metadata_upserted += other.metadata_upserted;
        self.metadata_deleted += other.metadata_deleted;
    }
}
