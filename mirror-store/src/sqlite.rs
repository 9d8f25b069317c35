//! `SQLite`-backed implementation of [`MirrorStore`].
//!
//! Uses a single `Mutex<Connection>`; every [`MirrorStore::apply`] call runs
//! inside one transaction.

use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};
use crate::record::{
    ApplyOutcome, Condition, MetadataRow, MetadataSelector, Record, Selector, TableSpec, WriteOp,
    LEASE_TABLE, METADATA_TABLE,
};
use crate::store::MirrorStore;

const METADATA_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_type  TEXT NOT NULL,
    owner_id    TEXT NOT NULL,
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    change_id   TEXT NOT NULL,
    sync_id     TEXT NOT NULL,
    UNIQUE (owner_type, owner_id, key)
);

CREATE INDEX IF NOT EXISTS idx_metadata_owner ON metadata (owner_type, owner_id);
CREATE INDEX IF NOT EXISTS idx_metadata_key ON metadata (key);
CREATE INDEX IF NOT EXISTS idx_metadata_change_id ON metadata (change_id);
CREATE INDEX IF NOT EXISTS idx_metadata_sync_id ON metadata (sync_id);

CREATE TABLE IF NOT EXISTS sync_leases (
    name        TEXT PRIMARY KEY,
    holder      TEXT NOT NULL,
    expires_at  INTEGER NOT NULL
);
"#;

/// How long a writer waits on another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// `SQLite` mirror storage.
///
/// Create with [`SqliteMirrorStore::open`] for a file-backed mirror or
/// [`SqliteMirrorStore::in_memory`] for tests.
pub struct SqliteMirrorStore {
    conn: Mutex<Connection>,
    tables: Vec<TableSpec>,
}

impl SqliteMirrorStore {
    /// Open or create a mirror database at `path` with one table per spec.
    pub fn open(path: impl AsRef<Path>, tables: &[TableSpec]) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "wal", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "normal")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::init(conn, tables)
    }

    pub fn in_memory(tables: &[TableSpec]) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, tables)
    }

    fn init(conn: Connection, tables: &[TableSpec]) -> Result<Self> {
        let mut ddl = String::from(METADATA_SCHEMA);
        for spec in tables {
            if spec.name == METADATA_TABLE || spec.name == LEASE_TABLE {
                return Err(StoreError::InvalidIdentifier(spec.name.to_string()));
            }
            ddl.push_str(&table_ddl(spec)?);
        }
        conn.execute_batch(&ddl)?;
        Ok(Self {
            conn: Mutex::new(conn),
            tables: tables.to_vec(),
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn spec(&self, table: &str) -> Result<&TableSpec> {
        self.tables
            .iter()
            .find(|spec| spec.name == table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }

    fn apply_op(&self, conn: &Connection, op: &WriteOp, outcome: &mut ApplyOutcome) -> Result<()> {
        match op {
            WriteOp::Upsert { table, record } => {
                upsert_record(conn, self.spec(table)?, record)?;
                outcome.records_upserted += 1;
            }
            WriteOp::UpsertMetadata(row) => {
                upsert_metadata(conn, row)?;
                outcome.metadata_upserted += 1;
            }
            WriteOp::DeleteRecords {
                table,
                selector,
                metadata_owner,
            } => {
                let (records, metadata) =
                    delete_records(conn, self.spec(table)?, selector, *metadata_owner)?;
                outcome.records_deleted += records;
                outcome.metadata_deleted += metadata;
            }
            WriteOp::DeleteMetadata(selector) => {
                outcome.metadata_deleted += delete_metadata(conn, selector)?;
            }
        }
        Ok(())
    }
}

impl MirrorStore for SqliteMirrorStore {
    fn apply(&self, ops: &[WriteOp]) -> Result<ApplyOutcome> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let mut outcome = ApplyOutcome::default();
        for op in ops {
            self.apply_op(&tx, op, &mut outcome)?;
        }
        tx.commit()?;
        Ok(outcome)
    }

    fn get(&self, table: &str, id: &str) -> Result<Option<Record>> {
        let spec = self.spec(table)?;
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT id, attributes, change_id, sync_id FROM \"{}\" WHERE id = ?1",
                    spec.name
                ),
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        row.map(decode_record).transpose()
    }

    fn find(&self, table: &str, selector: &Selector) -> Result<Vec<Record>> {
        let spec = self.spec(table)?;
        let (clause, values) = where_clause(spec, selector)?;
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, attributes, change_id, sync_id FROM \"{}\" WHERE {} ORDER BY id",
            spec.name, clause
        ))?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(decode_record(row?)?);
        }
        Ok(out)
    }

    fn count(&self, table: &str) -> Result<u64> {
        let spec = self.spec(table)?;
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", spec.name),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn metadata(&self, owner_type: &str, owner_id: &str) -> Result<Vec<MetadataRow>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT owner_type, owner_id, key, value, change_id, sync_id
             FROM metadata
             WHERE owner_type = ?1 AND owner_id = ?2
             ORDER BY key",
        )?;
        let rows = stmt.query_map(params![owner_type, owner_id], |row| {
            Ok(MetadataRow {
                owner_type: row.get(0)?,
                owner_id: row.get(1)?,
                key: row.get(2)?,
                value: row.get(3)?,
                change_id: row.get(4)?,
                sync_id: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn clear(&self) -> Result<u64> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let mut removed = tx.execute("DELETE FROM metadata", [])? as u64;
        for spec in &self.tables {
            removed += tx.execute(&format!("DELETE FROM \"{}\"", spec.name), [])? as u64;
        }
        tx.commit()?;
        Ok(removed)
    }

    fn tables(&self) -> Vec<TableSpec> {
        self.tables.clone()
    }

    fn acquire_lease(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let now = unix_millis();
        let expires_at = now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let taken = tx.execute(
            "INSERT INTO sync_leases(name, holder, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET
                 holder = excluded.holder,
                 expires_at = excluded.expires_at
             WHERE sync_leases.holder = excluded.holder OR sync_leases.expires_at <= ?4",
            params![name, holder, expires_at, now],
        )?;
        tx.commit()?;
        Ok(taken > 0)
    }

    fn release_lease(&self, name: &str, holder: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "DELETE FROM sync_leases WHERE name = ?1 AND holder = ?2",
            params![name, holder],
        )?;
        Ok(())
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn table_ddl(spec: &TableSpec) -> Result<String> {
    validate_identifier(spec.name)?;
    let mut columns = vec![
        "id TEXT PRIMARY KEY".to_string(),
        "attributes TEXT NOT NULL".to_string(),
    ];
    for relation in spec.relations {
        validate_identifier(relation)?;
        columns.push(format!("\"{relation}\" TEXT"));
    }
    columns.push("change_id TEXT NOT NULL".to_string());
    columns.push("sync_id TEXT NOT NULL".to_string());

    let mut ddl = format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" (\n    {}\n);\n",
        spec.name,
        columns.join(",\n    ")
    );
    for column in spec.relations.iter().copied().chain(["change_id", "sync_id"]) {
        ddl.push_str(&format!(
            "CREATE INDEX IF NOT EXISTS \"idx_{table}_{column}\" ON \"{table}\" (\"{column}\");\n",
            table = spec.name,
        ));
    }
    Ok(ddl)
}

fn validate_identifier(name: &str) -> Result<()> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

fn where_clause(spec: &TableSpec, selector: &Selector) -> Result<(String, Vec<String>)> {
    if selector.conditions().is_empty() {
        return Ok(("1 = 1".to_string(), Vec::new()));
    }
    let mut parts = Vec::new();
    let mut values = Vec::new();
    for condition in selector.conditions() {
        let column = condition.column();
        if !spec.has_column(column) {
            return Err(StoreError::UnknownColumn {
                table: spec.name.to_string(),
                column: column.to_string(),
            });
        }
        match condition {
            Condition::Eq(..) => parts.push(format!("\"{column}\" = ?")),
            Condition::NotEq(..) => parts.push(format!("\"{column}\" IS NOT ?")),
        }
        values.push(condition.value().to_string());
    }
    Ok((parts.join(" AND "), values))
}

fn upsert_record(conn: &Connection, spec: &TableSpec, record: &Record) -> Result<()> {
    let mut columns = vec!["id", "attributes"];
    columns.extend(spec.relations.iter().copied());
    columns.push("change_id");
    columns.push("sync_id");

    let mut values: Vec<Option<String>> = vec![
        Some(record.id.clone()),
        Some(serde_json::to_string(&record.attributes)?),
    ];
    values.extend(spec.relations.iter().map(|relation| record.relation(relation)));
    values.push(Some(record.change_id.clone()));
    values.push(Some(record.sync_id.clone()));

    let quoted: Vec<String> = columns.iter().map(|c| format!("\"{c}\"")).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    let updates: Vec<String> = columns[1..]
        .iter()
        .map(|c| format!("\"{c}\" = excluded.\"{c}\""))
        .collect();
    let sql = format!(
        "INSERT INTO \"{}\" ({}) VALUES ({}) ON CONFLICT(id) DO UPDATE SET {}",
        spec.name,
        quoted.join(", "),
        placeholders,
        updates.join(", ")
    );
    conn.execute(&sql, params_from_iter(values.iter()))?;
    Ok(())
}

fn delete_records(
    conn: &Connection,
    spec: &TableSpec,
    selector: &Selector,
    metadata_owner: Option<&str>,
) -> Result<(u64, u64)> {
    let (clause, values) = where_clause(spec, selector)?;

    let mut metadata_deleted = 0;
    if let Some(owner_type) = metadata_owner {
        let mut select = conn.prepare(&format!(
            "SELECT id FROM \"{}\" WHERE {}",
            spec.name, clause
        ))?;
        let ids = select
            .query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut delete_meta =
            conn.prepare_cached("DELETE FROM metadata WHERE owner_type = ?1 AND owner_id = ?2")?;
        for id in &ids {
            metadata_deleted += delete_meta.execute(params![owner_type, id])? as u64;
        }
    }

    let deleted = conn.execute(
        &format!("DELETE FROM \"{}\" WHERE {}", spec.name, clause),
        params_from_iter(values.iter()),
    )?;
    Ok((deleted as u64, metadata_deleted))
}

fn upsert_metadata(conn: &Connection, row: &MetadataRow) -> Result<()> {
    conn.execute(
        "INSERT INTO metadata(owner_type, owner_id, key, value, change_id, sync_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(owner_type, owner_id, key) DO UPDATE SET
             value = excluded.value,
             change_id = excluded.change_id,
             sync_id = excluded.sync_id",
        params![
            row.owner_type,
            row.owner_id,
            row.key,
            row.value,
            row.change_id,
            row.sync_id,
        ],
    )?;
    Ok(())
}

fn delete_metadata(conn: &Connection, selector: &MetadataSelector) -> Result<u64> {
    let mut sql = String::from("DELETE FROM metadata WHERE owner_type = ?");
    let mut values = vec![selector.owner_type.clone()];
    if let Some(owner_id) = &selector.owner_id {
        sql.push_str(" AND owner_id = ?");
        values.push(owner_id.clone());
    }
    if let Some(change_id) = &selector.except_change_id {
        sql.push_str(" AND change_id != ?");
        values.push(change_id.clone());
    }
    if let Some(sync_id) = &selector.except_sync_id {
        sql.push_str(" AND sync_id != ?");
        values.push(sync_id.clone());
    }
    Ok(conn.execute(&sql, params_from_iter(values.iter()))? as u64)
}

fn decode_record(row: (String, String, String, String)) -> Result<Record> {
    let (id, attributes, change_id, sync_id) = row;
    let attributes: Map<String, Value> = serde_json::from_str(&attributes)?;
    Ok(Record {
        id,
        attributes,
        change_id,
        sync_id,
    })
}
