// ABOUTME: Entity mirroring engine - turns remote objects into reconciled local rows
// ABOUTME: Builds one reconciliation tree per object, re-paging truncated children, and applies it atomically

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use mirror_store::{MirrorStore, Record};

use crate::entity::EntityKind;
use crate::error::Result;
use crate::reconcile::{self, ChildSet, ReconcileNode};
use crate::remote::{BillingApi, PageRequest, RemoteObject, PAGE_SIZE};
use crate::schema::{self, ChildSource, ChildSpec, Repage};
use crate::tags::OperationTags;

/// A mirrored row, with the one-to-one relations it references resolved from
/// the local store (a discount's coupon, a subscription's plan).
#[derive(Debug, Clone, PartialEq)]
pub struct Mirrored {
    pub kind: EntityKind,
    pub record: Record,
    pub expanded: BTreeMap<String, Record>,
}

pub struct Mirror {
    api: Arc<dyn BillingApi>,
    store: Arc<dyn MirrorStore>,
}

impl Mirror {
    pub fn new(api: Arc<dyn BillingApi>, store: Arc<dyn MirrorStore>) -> Self {
        Self { api, store }
    }

    pub fn api(&self) -> &Arc<dyn BillingApi> {
        &self.api
    }

    pub fn store(&self) -> &Arc<dyn MirrorStore> {
        &self.store
    }

    /// Upsert `object` and everything it owns, then tombstone the owned rows
    /// and metadata that `tags.change_id` did not touch.
    ///
    /// The whole tree lands in one store transaction, so a concurrent mirror
    /// of the same parent never observes a half-tombstoned child set.
    pub async fn mirror(
        &self,
        kind: EntityKind,
        object: &RemoteObject,
        tags: &OperationTags,
    ) -> Result<Mirrored> {
        let plan = self.plan(kind, object).await?;
        let ops = plan.compile(tags);
        let outcome = self.store.apply(&ops)?;
        tracing::debug!(
            "Mirrored {} {} ({} entities, {} rows and {} metadata tombstoned)",
            kind,
            plan.id,
            plan.entity_count(),
            outcome.records_deleted,
            outcome.metadata_deleted
        );

        let record = plan.record(tags);
        let expanded = self.expand(kind, &record)?;
        Ok(Mirrored {
            kind,
            record,
            expanded,
        })
    }

    /// Build the reconciliation tree for one remote object. Child lists the
    /// provider truncated are completed from the remote listing.
    pub fn plan<'a>(
        &'a self,
        kind: EntityKind,
        object: &'a RemoteObject,
    ) -> BoxFuture<'a, Result<ReconcileNode>> {
        async move {
            let (id, attributes) = schema::flatten(kind, object)?;
            let mut node = ReconcileNode::new(kind, id, attributes);
            node.metadata = object.metadata();

            for child in schema::spec(kind).children {
                let objects = self.collect_children(child, object, &node.id).await?;
                let mut nodes = Vec::with_capacity(objects.len());
                for mut child_object in objects {
                    child.adopt(&mut child_object, &node.id);
                    nodes.push(self.plan(child.kind, &child_object).await?);
                }
                node.children.push(ChildSet {
                    kind: child.kind,
                    scope: child.scope_selector(&node.id),
                    nodes,
                });
            }
            Ok(node)
        }
        .boxed()
    }

    async fn collect_children(
        &self,
        child: &ChildSpec,
        parent: &RemoteObject,
        parent_id: &str,
    ) -> Result<Vec<RemoteObject>> {
        let mut objects = match child.source {
            ChildSource::Single(field) => parent.embedded_object(field).into_iter().collect(),
            ChildSource::List(field) => match (parent.embedded_list(field), child.repage) {
                (Some(list), Some(repage)) if list.has_more => {
                    let mut data = list.data;
                    self.repage(child, repage, parent_id, &mut data).await?;
                    data
                }
                (Some(list), _) => list.data,
                // Not inlined at all: the listing is the only complete view.
                (None, Some(repage)) => {
                    let mut data = Vec::new();
                    self.repage(child, repage, parent_id, &mut data).await?;
                    data
                }
                (None, None) => Vec::new(),
            },
        };
        objects.retain(|object| child.accepts(object));
        Ok(objects)
    }

    /// Continue a child listing after the last child of `child`'s type already
    /// in `data`. Foreign entries (a bank account among card sources) are
    /// never used as the cursor of a filtered listing.
    async fn repage(
        &self,
        child: &ChildSpec,
        repage: Repage,
        parent_id: &str,
        data: &mut Vec<RemoteObject>,
    ) -> Result<()> {
        let path = repage.path_for(parent_id);
        let mut request = PageRequest::first(PAGE_SIZE);
        request.filters = repage.filters_for(parent_id);
        let cursor = data
            .iter()
            .rev()
            .filter(|object| child.accepts(object))
            .find_map(RemoteObject::id);
        if let Some(last) = cursor {
            request = request.after(last);
        }

        loop {
            let page = self.api.list(&path, &request).await?;
            let cursor = page.last_id().map(str::to_string);
            let has_more = page.has_more;
            data.extend(page.data);
            match (has_more, cursor) {
                (true, Some(cursor)) => request = request.after(&cursor),
                _ => break,
            }
        }
        tracing::debug!("Re-paged {} children from {}", data.len(), path);
        Ok(())
    }

    /// Delete one row with its metadata and owned children. Returns the row as
    /// it was, or `None` when nothing was mirrored under that key.
    pub fn unmirror(&self, kind: EntityKind, id: &str) -> Result<Option<Record>> {
        let existing = self.store.get(kind.table().name, id)?;
        let outcome = self.store.apply(&reconcile::removal(kind, id))?;
        tracing::debug!(
            "Unmirrored {} {} ({} rows, {} metadata)",
            kind,
            id,
            outcome.records_deleted,
            outcome.metadata_deleted
        );
        Ok(existing)
    }

    /// Read one mirrored row back with its relations resolved.
    pub fn resolve(&self, kind: EntityKind, id: &str) -> Result<Option<Mirrored>> {
        let Some(record) = self.store.get(kind.table().name, id)? else {
            return Ok(None);
        };
        let expanded = self.expand(kind, &record)?;
        Ok(Some(Mirrored {
            kind,
            record,
            expanded,
        }))
    }

    pub fn metadata(&self, kind: EntityKind, id: &str) -> Result<BTreeMap<String, String>> {
        let Some(owner_type) = kind.metadata_owner() else {
            return Ok(BTreeMap::new());
        };
        Ok(self
            .store
            .metadata(owner_type, id)?
            .into_iter()
            .map(|row| (row.key, row.value))
            .collect())
    }

    fn expand(&self, kind: EntityKind, record: &Record) -> Result<BTreeMap<String, Record>> {
        let mut expanded = BTreeMap::new();
        for (column, related) in schema::spec(kind).expand {
            let Some(id) = record.relation(column) else {
                continue;
            };
            if let Some(found) = self.store.get(related.table().name, &id)? {
                expanded.insert(column.to_string(), found);
            }
        }
        Ok(expanded)
    }
}
