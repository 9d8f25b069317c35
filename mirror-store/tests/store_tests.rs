use std::time::Duration;

use mirror_store::{
    MetadataRow, MetadataSelector, MirrorStore, Record, Selector, SqliteMirrorStore, StoreError,
    TableSpec, WriteOp,
};
use serde_json::{json, Map, Value};
use tempfile::tempdir;

const CUSTOMERS: TableSpec = TableSpec::new("customers", &[]);
const CARDS: TableSpec = TableSpec::new("cards", &["customer"]);
const TABLES: &[TableSpec] = &[CUSTOMERS, CARDS];

fn record(id: &str, attributes: Value, change_id: &str, sync_id: &str) -> Record {
    let attributes: Map<String, Value> = match attributes {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Record {
        id: id.to_string(),
        attributes,
        change_id: change_id.to_string(),
        sync_id: sync_id.to_string(),
    }
}

fn meta(owner_type: &str, owner_id: &str, key: &str, value: &str, change_id: &str) -> MetadataRow {
    MetadataRow {
        owner_type: owner_type.to_string(),
        owner_id: owner_id.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        change_id: change_id.to_string(),
        sync_id: "run1".to_string(),
    }
}

fn card(id: &str, customer: &str, change_id: &str) -> WriteOp {
    WriteOp::Upsert {
        table: "cards",
        record: record(
            id,
            json!({"customer": customer, "brand": "Visa"}),
            change_id,
            "run1",
        ),
    }
}

#[test]
fn upsert_is_keyed_by_id_and_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mirror").join("mirror.db");
    let store = SqliteMirrorStore::open(&path, TABLES).unwrap();

    store
        .upsert(
            "customers",
            record("cus_1", json!({"email": "a@example.com"}), "c1", "s1"),
        )
        .unwrap();
    store
        .upsert(
            "customers",
            record("cus_1", json!({"email": "b@example.com"}), "c2", "s1"),
        )
        .unwrap();
    assert_eq!(store.count("customers").unwrap(), 1);
    drop(store);

    let store = SqliteMirrorStore::open(&path, TABLES).unwrap();
    let stored = store.get("customers", "cus_1").unwrap().unwrap();
    assert_eq!(stored.get_str("email"), Some("b@example.com"));
    assert_eq!(stored.change_id, "c2");
}

#[test]
fn delete_records_cascades_metadata_of_deleted_rows_only() {
    let store = SqliteMirrorStore::in_memory(TABLES).unwrap();
    store
        .apply(&[
            card("card_a", "cus_1", "c1"),
            card("card_b", "cus_1", "c0"),
            card("card_z", "cus_2", "c0"),
            WriteOp::UpsertMetadata(meta("card", "card_a", "nickname", "main", "c1")),
            WriteOp::UpsertMetadata(meta("card", "card_b", "nickname", "old", "c0")),
            WriteOp::UpsertMetadata(meta("card", "card_z", "nickname", "other", "c0")),
        ])
        .unwrap();

    let outcome = store
        .apply(&[WriteOp::DeleteRecords {
            table: "cards",
            selector: Selector::new()
                .eq("customer", "cus_1")
                .not_eq("change_id", "c1"),
            metadata_owner: Some("card"),
        }])
        .unwrap();

    assert_eq!(outcome.records_deleted, 1);
    assert_eq!(outcome.metadata_deleted, 1);
    let remaining: Vec<String> = store
        .find("cards", &Selector::new())
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(remaining, vec!["card_a", "card_z"]);
    assert!(store.metadata("card", "card_b").unwrap().is_empty());
    assert_eq!(store.metadata("card", "card_z").unwrap().len(), 1);
}

#[test]
fn metadata_upsert_is_keyed_by_owner_and_key() {
    let store = SqliteMirrorStore::in_memory(TABLES).unwrap();
    store
        .apply(&[
            WriteOp::UpsertMetadata(meta("customer", "cus_1", "plan", "gold", "c1")),
            WriteOp::UpsertMetadata(meta("customer", "cus_2", "plan", "silver", "c1")),
            WriteOp::UpsertMetadata(meta("customer", "cus_1", "plan", "platinum", "c2")),
        ])
        .unwrap();

    let rows = store.metadata("customer", "cus_1").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value, "platinum");
    assert_eq!(rows[0].change_id, "c2");
    assert_eq!(store.metadata("customer", "cus_2").unwrap()[0].value, "silver");
}

#[test]
fn delete_metadata_honours_tag_exclusions() {
    let store = SqliteMirrorStore::in_memory(TABLES).unwrap();
    store
        .apply(&[
            WriteOp::UpsertMetadata(meta("customer", "cus_1", "a", "1", "c1")),
            WriteOp::UpsertMetadata(meta("customer", "cus_1", "b", "2", "c2")),
        ])
        .unwrap();

    let outcome = store
        .apply(&[WriteOp::DeleteMetadata(
            MetadataSelector::owner("customer", "cus_1").except_change("c2"),
        )])
        .unwrap();
    assert_eq!(outcome.metadata_deleted, 1);
    let keys: Vec<String> = store
        .metadata("customer", "cus_1")
        .unwrap()
        .into_iter()
        .map(|m| m.key)
        .collect();
    assert_eq!(keys, vec!["b"]);
}

#[test]
fn failed_batch_rolls_back_earlier_ops() {
    let store = SqliteMirrorStore::in_memory(TABLES).unwrap();
    let result = store.apply(&[
        card("card_a", "cus_1", "c1"),
        WriteOp::Upsert {
            table: "subscriptions",
            record: record("sub_1", json!({}), "c1", "s1"),
        },
    ]);

    assert!(matches!(result, Err(StoreError::UnknownTable(_))));
    assert_eq!(store.count("cards").unwrap(), 0);
}

#[test]
fn not_eq_matches_rows_with_null_relation() {
    let store = SqliteMirrorStore::in_memory(TABLES).unwrap();
    store
        .apply(&[WriteOp::Upsert {
            table: "cards",
            record: record("card_orphan", json!({"customer": null}), "c1", "s1"),
        }])
        .unwrap();

    let found = store
        .find("cards", &Selector::new().not_eq("customer", "cus_1"))
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, "card_orphan");
}

#[test]
fn clear_empties_every_table() {
    let store = SqliteMirrorStore::in_memory(TABLES).unwrap();
    store
        .apply(&[
            card("card_a", "cus_1", "c1"),
            WriteOp::Upsert {
                table: "customers",
                record: record("cus_1", json!({}), "c1", "s1"),
            },
            WriteOp::UpsertMetadata(meta("customer", "cus_1", "a", "1", "c1")),
        ])
        .unwrap();

    assert_eq!(store.clear().unwrap(), 3);
    assert_eq!(store.count("cards").unwrap(), 0);
    assert_eq!(store.count("customers").unwrap(), 0);
    assert!(store.metadata("customer", "cus_1").unwrap().is_empty());
}

#[test]
fn leases_exclude_other_connections_to_the_same_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mirror.db");
    let first = SqliteMirrorStore::open(&path, TABLES).unwrap();
    let second = SqliteMirrorStore::open(&path, TABLES).unwrap();
    let ttl = Duration::from_secs(60);

    assert!(first.acquire_lease("full-sync:cards", "run-1", ttl).unwrap());
    assert!(!second.acquire_lease("full-sync:cards", "run-2", ttl).unwrap());

    first.release_lease("full-sync:cards", "run-1").unwrap();
    assert!(second.acquire_lease("full-sync:cards", "run-2", ttl).unwrap());
}

#[test]
fn clear_keeps_leases() {
    let store = SqliteMirrorStore::in_memory(TABLES).unwrap();
    let ttl = Duration::from_secs(60);
    assert!(store.acquire_lease("full-sync:cards", "run-1", ttl).unwrap());

    store.clear().unwrap();

    assert!(!store.acquire_lease("full-sync:cards", "run-2", ttl).unwrap());
}
