// ABOUTME: Tree-shaped reconciliation plans compiled into store writes
// ABOUTME: One plan per mirrored parent: upserts, metadata replacement and child tombstones

use std::collections::BTreeMap;

use mirror_store::{MetadataRow, MetadataSelector, Record, Selector, WriteOp};
use serde_json::{Map, Value};

use crate::entity::EntityKind;
use crate::schema;
use crate::tags::{OperationTags, SyncId};

/// One entity in a reconciliation plan, with the child collections it owns.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileNode {
    pub kind: EntityKind,
    pub id: String,
    pub attributes: Map<String, Value>,
    /// The complete remote metadata map. Ignored for kinds without metadata.
    pub metadata: BTreeMap<String, String>,
    pub children: Vec<ChildSet>,
}

/// The complete current remote view of one child collection of a parent.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildSet {
    pub kind: EntityKind,
    /// Rows of `kind` owned by the parent.
    pub scope: Selector,
    pub nodes: Vec<ReconcileNode>,
}

impl ReconcileNode {
    pub fn new(kind: EntityKind, id: String, attributes: Map<String, Value>) -> Self {
        Self {
            kind,
            id,
            attributes,
            metadata: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Number of entities in this subtree, including this one.
    pub fn entity_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .flat_map(|set| set.nodes.iter())
            .map(ReconcileNode::entity_count)
            .sum::<usize>()
    }

    pub fn record(&self, tags: &OperationTags) -> Record {
        Record {
            id: self.id.clone(),
            attributes: self.attributes.clone(),
            change_id: tags.change_id.to_string(),
            sync_id: tags.sync_id.to_string(),
        }
    }

    /// Compile the plan into writes: each node is upserted, its metadata is
    /// replaced, and each child set is mirrored and then tombstoned.
    pub fn compile(&self, tags: &OperationTags) -> Vec<WriteOp> {
        let mut ops = Vec::with_capacity(self.entity_count() * 2);
        self.compile_into(tags, &mut ops);
        ops
    }

    fn compile_into(&self, tags: &OperationTags, ops: &mut Vec<WriteOp>) {
        let change_id = tags.change_id.as_str();

        ops.push(WriteOp::Upsert {
            table: self.kind.table().name,
            record: self.record(tags),
        });

        if let Some(owner_type) = self.kind.metadata_owner() {
            for (key, value) in &self.metadata {
                ops.push(WriteOp::UpsertMetadata(MetadataRow {
                    owner_type: owner_type.to_string(),
                    owner_id: self.id.clone(),
                    key: key.clone(),
                    value: value.clone(),
                    change_id: change_id.to_string(),
                    sync_id: tags.sync_id.to_string(),
                }));
            }
            // An empty map still clears: it means every key was removed.
            ops.push(WriteOp::DeleteMetadata(
                MetadataSelector::owner(owner_type, self.id.clone()).except_change(change_id),
            ));
        }

        for set in &self.children {
            for node in &set.nodes {
                node.compile_into(tags, ops);
            }
            ops.push(WriteOp::DeleteRecords {
                table: set.kind.table().name,
                selector: set.scope.clone().not_eq("change_id", change_id),
                metadata_owner: set.kind.metadata_owner(),
            });
        }
    }
}

/// Writes removing one entity, its metadata, and every child it owns.
pub fn removal(kind: EntityKind, id: &str) -> Vec<WriteOp> {
    let mut ops = vec![WriteOp::DeleteRecords {
        table: kind.table().name,
        selector: Selector::id(id),
        metadata_owner: kind.metadata_owner(),
    }];
    for child in schema::spec(kind).children {
        ops.push(WriteOp::DeleteRecords {
            table: child.kind.table().name,
            selector: child.scope_selector(id),
            metadata_owner: child.kind.metadata_owner(),
        });
    }
    ops
}

/// Writes purging rows of `kind`, and of the collections it owns, that the
/// run `sync_id` did not touch. Only valid after a complete listing.
pub fn staleness(kind: EntityKind, sync_id: &SyncId) -> Vec<WriteOp> {
    let sync_id = sync_id.as_str();
    let mut ops = vec![WriteOp::DeleteRecords {
        table: kind.table().name,
        selector: Selector::new().not_eq("sync_id", sync_id),
        metadata_owner: kind.metadata_owner(),
    }];
    if let Some(owner_type) = kind.metadata_owner() {
        ops.push(WriteOp::DeleteMetadata(
            MetadataSelector::owner_type(owner_type).except_sync(sync_id),
        ));
    }

    for child in schema::spec(kind).children {
        ops.push(WriteOp::DeleteRecords {
            table: child.kind.table().name,
            selector: child.collection_selector().not_eq("sync_id", sync_id),
            metadata_owner: child.kind.metadata_owner(),
        });
        if let Some(owner_type) = child.kind.metadata_owner() {
            ops.push(WriteOp::DeleteMetadata(
                MetadataSelector::owner_type(owner_type).except_sync(sync_id),
            ));
        }
    }
    ops
}
