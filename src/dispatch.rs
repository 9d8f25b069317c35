// ABOUTME: Notification dispatcher - routes provider events to mirror or unmirror handlers
// ABOUTME: Publishes a BillingEvent on a broadcast channel after each handled event

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mirror_store::Record;
use tokio::sync::broadcast;

use crate::entity::EntityKind;
use crate::error::Result;
use crate::mirror::{Mirror, Mirrored};
use crate::remote::{Event, RemoteObject};
use crate::schema;
use crate::tags::OperationTags;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Mirror,
    Unmirror,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Mirrored(Mirrored),
    Unmirrored {
        kind: EntityKind,
        id: String,
        /// The row as it was before deletion, if it had been mirrored.
        record: Option<Record>,
    },
    Ignored {
        reason: String,
    },
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Mirrored(_) => "mirrored",
            DispatchOutcome::Unmirrored { .. } => "unmirrored",
            DispatchOutcome::Ignored { .. } => "ignored",
        }
    }

    /// Local key of the affected row.
    pub fn id(&self) -> Option<&str> {
        match self {
            DispatchOutcome::Mirrored(mirrored) => Some(mirrored.record.id.as_str()),
            DispatchOutcome::Unmirrored { id, .. } => Some(id.as_str()),
            DispatchOutcome::Ignored { .. } => None,
        }
    }

    fn ignored(reason: impl Into<String>) -> Self {
        DispatchOutcome::Ignored {
            reason: reason.into(),
        }
    }
}

/// Published for in-process subscribers after an event reached a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingEvent {
    /// `billing.webhook.<event type>`
    pub name: String,
    pub kind: EntityKind,
    pub id: Option<String>,
    pub outcome: DispatchOutcome,
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn kind(&self) -> EntityKind;

    fn action(&self) -> Action;

    async fn handle(&self, mirror: &Mirror, object: &RemoteObject) -> Result<DispatchOutcome>;
}

/// Payloads of another provider type share some event names (a bank account
/// on `customer.source.created`); those are not ours to mirror.
fn foreign_object(kind: EntityKind, object: &RemoteObject) -> Option<DispatchOutcome> {
    let expected = schema::spec(kind).object;
    match object.object_type() {
        Some(found) if found != expected => Some(DispatchOutcome::ignored(format!(
            "payload is a {} object, not {}",
            found, expected
        ))),
        _ => None,
    }
}

fn unmirror(mirror: &Mirror, kind: EntityKind, object: &RemoteObject) -> Result<DispatchOutcome> {
    let id = schema::key_of(kind, object)?;
    let record = mirror.unmirror(kind, &id)?;
    Ok(DispatchOutcome::Unmirrored { kind, id, record })
}

/// Mirrors the event's object. With `refresh`, the current object is read
/// back from the provider first so a late-delivered event cannot overwrite
/// newer state; an object the provider no longer has is unmirrored.
pub struct MirrorHandler {
    kind: EntityKind,
    refresh: bool,
}

impl MirrorHandler {
    pub fn new(kind: EntityKind, refresh: bool) -> Self {
        Self { kind, refresh }
    }

    async fn current(&self, mirror: &Mirror, object: &RemoteObject) -> Result<Option<RemoteObject>> {
        if !self.refresh {
            return Ok(Some(object.clone()));
        }
        let Some(path) = schema::object_path_for(self.kind, object) else {
            return Ok(Some(object.clone()));
        };
        match mirror.api().retrieve(&path).await {
            Ok(current) if current.is_deleted() => Ok(None),
            Ok(current) => Ok(Some(current)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl EventHandler for MirrorHandler {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn action(&self) -> Action {
        Action::Mirror
    }

    async fn handle(&self, mirror: &Mirror, object: &RemoteObject) -> Result<DispatchOutcome> {
        if let Some(ignored) = foreign_object(self.kind, object) {
            return Ok(ignored);
        }
        match self.current(mirror, object).await? {
            Some(current) => {
                let mirrored = mirror
                    .mirror(self.kind, &current, &OperationTags::incremental())
                    .await?;
                Ok(DispatchOutcome::Mirrored(mirrored))
            }
            None => {
                tracing::info!(
                    "{} {} is gone at the provider, unmirroring instead",
                    self.kind,
                    object.id().unwrap_or("<no id>")
                );
                unmirror(mirror, self.kind, object)
            }
        }
    }
}

pub struct UnmirrorHandler {
    kind: EntityKind,
}

impl UnmirrorHandler {
    pub fn new(kind: EntityKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl EventHandler for UnmirrorHandler {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn action(&self) -> Action {
        Action::Unmirror
    }

    async fn handle(&self, mirror: &Mirror, object: &RemoteObject) -> Result<DispatchOutcome> {
        if let Some(ignored) = foreign_object(self.kind, object) {
            return Ok(ignored);
        }
        unmirror(mirror, self.kind, object)
    }
}

const CHARGE_MIRROR: &[&str] = &[
    "charge.captured",
    "charge.failed",
    "charge.pending",
    "charge.refunded",
    "charge.succeeded",
    "charge.updated",
];
const DISPUTE_MIRROR: &[&str] = &[
    "charge.dispute.closed",
    "charge.dispute.created",
    "charge.dispute.funds_reinstated",
    "charge.dispute.funds_withdrawn",
    "charge.dispute.updated",
];
const CARD_MIRROR: &[&str] = &[
    "customer.source.created",
    "customer.source.updated",
    "source.canceled",
    "source.chargeable",
    "source.failed",
];
const SUBSCRIPTION_MIRROR: &[&str] = &[
    "customer.subscription.created",
    "customer.subscription.updated",
    "customer.subscription.trial_will_end",
    // Canceled subscriptions stay retrievable and are kept with their status.
    "customer.subscription.deleted",
];
const INVOICE_MIRROR: &[&str] = &[
    "invoice.created",
    "invoice.updated",
    "invoice.payment_failed",
    "invoice.payment_succeeded",
    "invoice.sent",
];

/// Event type registry. Unregistered types are acknowledged and ignored.
pub struct Dispatcher {
    mirror: Arc<Mirror>,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    events: broadcast::Sender<BillingEvent>,
}

impl Dispatcher {
    /// An empty registry.
    pub fn new(mirror: Arc<Mirror>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            mirror,
            handlers: HashMap::new(),
            events,
        }
    }

    /// The standard routes for every mirrored kind.
    pub fn with_default_routes(mirror: Arc<Mirror>, refresh: bool) -> Self {
        let mut dispatcher = Self::new(mirror);

        dispatcher.mirror_on(EntityKind::Charge, CHARGE_MIRROR, refresh);
        dispatcher.mirror_on(EntityKind::Dispute, DISPUTE_MIRROR, refresh);

        dispatcher.mirror_on(EntityKind::Coupon, &["coupon.created", "coupon.updated"], refresh);
        dispatcher.unmirror_on(EntityKind::Coupon, &["coupon.deleted"]);

        dispatcher.mirror_on(EntityKind::Customer, &["customer.created", "customer.updated"], refresh);
        dispatcher.unmirror_on(EntityKind::Customer, &["customer.deleted"]);

        dispatcher.mirror_on(
            EntityKind::Discount,
            &["customer.discount.created", "customer.discount.updated"],
            refresh,
        );
        dispatcher.unmirror_on(EntityKind::Discount, &["customer.discount.deleted"]);

        dispatcher.mirror_on(EntityKind::Card, CARD_MIRROR, refresh);
        dispatcher.unmirror_on(EntityKind::Card, &["customer.source.deleted"]);

        dispatcher.mirror_on(EntityKind::Subscription, SUBSCRIPTION_MIRROR, refresh);
        dispatcher.mirror_on(EntityKind::Invoice, INVOICE_MIRROR, refresh);

        dispatcher.mirror_on(
            EntityKind::InvoiceItem,
            &["invoiceitem.created", "invoiceitem.updated"],
            refresh,
        );
        dispatcher.unmirror_on(EntityKind::InvoiceItem, &["invoiceitem.deleted"]);

        dispatcher.mirror_on(EntityKind::Plan, &["plan.created", "plan.updated"], refresh);
        dispatcher.unmirror_on(EntityKind::Plan, &["plan.deleted"]);

        dispatcher
    }

    /// Route `event_type` to `handler`, replacing any earlier route.
    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(event_type.into(), handler);
    }

    pub fn mirror_on(&mut self, kind: EntityKind, event_types: &[&str], refresh: bool) {
        let handler: Arc<dyn EventHandler> = Arc::new(MirrorHandler::new(kind, refresh));
        for event_type in event_types {
            self.register(*event_type, Arc::clone(&handler));
        }
    }

    pub fn unmirror_on(&mut self, kind: EntityKind, event_types: &[&str]) {
        let handler: Arc<dyn EventHandler> = Arc::new(UnmirrorHandler::new(kind));
        for event_type in event_types {
            self.register(*event_type, Arc::clone(&handler));
        }
    }

    pub fn handler_for(&self, event_type: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(event_type)
    }

    pub fn mirror(&self) -> &Arc<Mirror> {
        &self.mirror
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BillingEvent> {
        self.events.subscribe()
    }

    pub async fn dispatch(&self, event: &Event) -> Result<DispatchOutcome> {
        let Some(handler) = self.handler_for(&event.event_type) else {
            tracing::debug!("No handler for {} ({}), ignoring", event.event_type, event.id);
            return Ok(DispatchOutcome::ignored(format!(
                "no handler for {}",
                event.event_type
            )));
        };

        let outcome = handler.handle(&self.mirror, &event.data.object).await?;
        match &outcome {
            DispatchOutcome::Ignored { reason } => {
                tracing::warn!("Ignored {} ({}): {}", event.event_type, event.id, reason)
            }
            other => tracing::info!(
                "Handled {} ({}): {} {} {}",
                event.event_type,
                event.id,
                other.label(),
                handler.kind(),
                other.id().unwrap_or_default()
            ),
        }

        // Sending only fails when nobody is subscribed.
        let _ = self.events.send(BillingEvent {
            name: format!("billing.webhook.{}", event.event_type),
            kind: handler.kind(),
            id: outcome.id().map(str::to_string),
            outcome: outcome.clone(),
        });
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::TABLES;
    use crate::error::RemoteError;
    use crate::remote::{BillingApi, ListPage, PageRequest, RemoteResult, ResourcePath};
    use mirror_store::{MirrorStore, SqliteMirrorStore};
    use serde_json::json;

    /// Provider that has nothing: every lookup is a 404.
    struct EmptyProvider;

    fn not_found() -> RemoteError {
        RemoteError::classify(
            404,
            r#"{"error": {"type": "invalid_request_error", "message": "No such object"}}"#,
        )
    }

    #[async_trait]
    impl BillingApi for EmptyProvider {
        async fn retrieve(&self, _path: &ResourcePath) -> RemoteResult<RemoteObject> {
            Err(not_found())
        }

        async fn retrieve_with(
            &self,
            _path: &ResourcePath,
            _query: &[(String, String)],
        ) -> RemoteResult<RemoteObject> {
            Err(not_found())
        }

        async fn list(&self, _path: &ResourcePath, _page: &PageRequest) -> RemoteResult<ListPage> {
            Ok(ListPage::default())
        }

        async fn create(
            &self,
            _path: &ResourcePath,
            _params: &[(String, String)],
        ) -> RemoteResult<RemoteObject> {
            Err(not_found())
        }

        async fn update(
            &self,
            _path: &ResourcePath,
            _params: &[(String, String)],
        ) -> RemoteResult<RemoteObject> {
            Err(not_found())
        }

        async fn delete(&self, _path: &ResourcePath) -> RemoteResult<RemoteObject> {
            Err(not_found())
        }
    }

    fn dispatcher(refresh: bool) -> Dispatcher {
        let store: Arc<dyn MirrorStore> = Arc::new(SqliteMirrorStore::in_memory(&TABLES).unwrap());
        let mirror = Arc::new(Mirror::new(Arc::new(EmptyProvider), store));
        Dispatcher::with_default_routes(mirror, refresh)
    }

    fn event(event_type: &str, object: serde_json::Value) -> Event {
        serde_json::from_value(json!({
            "id": "evt_1",
            "type": event_type,
            "data": {"object": object}
        }))
        .unwrap()
    }

    fn plan(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "object": "plan",
            "amount": 1500,
            "currency": "usd",
            "interval": "month",
            "livemode": false,
            "metadata": {}
        })
    }

    #[test]
    fn default_routes_cover_each_kind() {
        let dispatcher = dispatcher(false);
        let route = |event_type: &str| {
            dispatcher
                .handler_for(event_type)
                .map(|handler| (handler.kind(), handler.action()))
        };

        assert_eq!(route("charge.succeeded"), Some((EntityKind::Charge, Action::Mirror)));
        assert_eq!(route("charge.dispute.closed"), Some((EntityKind::Dispute, Action::Mirror)));
        assert_eq!(route("customer.deleted"), Some((EntityKind::Customer, Action::Unmirror)));
        assert_eq!(route("customer.source.deleted"), Some((EntityKind::Card, Action::Unmirror)));
        assert_eq!(
            route("customer.subscription.deleted"),
            Some((EntityKind::Subscription, Action::Mirror))
        );
        assert_eq!(route("invoiceitem.deleted"), Some((EntityKind::InvoiceItem, Action::Unmirror)));
        assert_eq!(route("ping"), None);
    }

    #[tokio::test]
    async fn unknown_event_types_are_ignored() {
        let outcome = dispatcher(false)
            .dispatch(&event("ping", json!({"id": "x"})))
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Ignored { .. }));
    }

    #[tokio::test]
    async fn non_card_sources_are_ignored() {
        let dispatcher = dispatcher(false);
        let outcome = dispatcher
            .dispatch(&event(
                "customer.source.created",
                json!({"id": "ba_1", "object": "bank_account", "customer": "cus_1"}),
            ))
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Ignored { .. }));
        assert_eq!(dispatcher.mirror().store().count("cards").unwrap(), 0);
    }

    #[tokio::test]
    async fn handled_events_are_published() {
        let dispatcher = dispatcher(false);
        let mut events = dispatcher.subscribe();

        dispatcher
            .dispatch(&event("plan.created", plan("gold")))
            .await
            .unwrap();

        let published = events.recv().await.unwrap();
        assert_eq!(published.name, "billing.webhook.plan.created");
        assert_eq!(published.kind, EntityKind::Plan);
        assert_eq!(published.id.as_deref(), Some("gold"));
        assert_eq!(published.outcome.label(), "mirrored");
    }

    #[tokio::test]
    async fn refresh_turns_a_vanished_object_into_an_unmirror() {
        let dispatcher = dispatcher(false);
        dispatcher
            .dispatch(&event("plan.created", plan("gold")))
            .await
            .unwrap();
        assert_eq!(dispatcher.mirror().store().count("plans").unwrap(), 1);

        let refreshing = Dispatcher::with_default_routes(Arc::clone(dispatcher.mirror()), true);
        let outcome = refreshing
            .dispatch(&event("plan.updated", plan("gold")))
            .await
            .unwrap();

        assert!(matches!(outcome, DispatchOutcome::Unmirrored { ref id, record: Some(_), .. } if id == "gold"));
        assert_eq!(dispatcher.mirror().store().count("plans").unwrap(), 0);
    }
}
