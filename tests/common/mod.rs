// ABOUTME: Shared fixtures for integration tests - an in-memory billing provider
// ABOUTME: Serves collections page by page and can fail a chosen listing call

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use billing_mirror::entity::TABLES;
use billing_mirror::mirror::Mirror;
use billing_mirror::remote::{BillingApi, ListPage, PageRequest, RemoteObject, RemoteResult, ResourcePath};
use billing_mirror::RemoteError;
use mirror_store::{MirrorStore, SqliteMirrorStore};
use serde_json::{json, Value};

#[derive(Default)]
struct Provider {
    /// Listing path -> objects in listing order
    collections: HashMap<String, Vec<RemoteObject>>,
    /// Object path -> object
    objects: HashMap<String, RemoteObject>,
    /// (listing path, call number starting at 1) that fails with a connection error
    fail_on: Option<(String, usize)>,
    list_calls: HashMap<String, usize>,
    requests: Vec<(String, PageRequest)>,
    /// Action path (`charges/ch_1/capture`) -> fields the action sets on its object
    actions: HashMap<String, Value>,
    queries: Vec<(String, Vec<(String, String)>)>,
}

/// Scripted provider. Listing paths and object paths are independent: put an
/// object in both when a test needs it listed and retrievable.
#[derive(Default, Clone)]
pub struct FakeApi {
    inner: Arc<Mutex<Provider>>,
}

pub fn not_found(path: &str) -> RemoteError {
    RemoteError::classify(
        404,
        &json!({"error": {"type": "invalid_request_error", "message": format!("No such object: {}", path)}})
            .to_string(),
    )
}

pub fn object(value: Value) -> RemoteObject {
    RemoteObject::from_value(value).expect("fixture must be a JSON object")
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_collection(&self, path: &str, items: Vec<RemoteObject>) {
        let mut provider = self.inner.lock().unwrap();
        provider.collections.insert(path.to_string(), items);
    }

    pub fn set_object(&self, path: &str, object: RemoteObject) {
        let mut provider = self.inner.lock().unwrap();
        provider.objects.insert(path.to_string(), object);
    }

    pub fn remove_object(&self, path: &str) {
        self.inner.lock().unwrap().objects.remove(path);
    }

    /// Fail the `call`-th listing request against `path`.
    pub fn fail_listing(&self, path: &str, call: usize) {
        self.inner.lock().unwrap().fail_on = Some((path.to_string(), call));
    }

    pub fn clear_failure(&self) {
        self.inner.lock().unwrap().fail_on = None;
    }

    /// Script `POST {object path}/{verb}` to merge `fields` into the object
    /// and answer with it.
    pub fn on_action(&self, path: &str, fields: Value) {
        self.inner
            .lock()
            .unwrap()
            .actions
            .insert(path.to_string(), fields);
    }

    pub fn object_at(&self, path: &str) -> Option<RemoteObject> {
        self.inner.lock().unwrap().objects.get(path).cloned()
    }

    pub fn queries(&self, path: &str) -> Vec<Vec<(String, String)>> {
        self.inner
            .lock()
            .unwrap()
            .queries
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, query)| query.clone())
            .collect()
    }

    pub fn list_requests(&self, path: &str) -> Vec<PageRequest> {
        self.inner
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, request)| request.clone())
            .collect()
    }
}

fn matches_filters(object: &RemoteObject, filters: &[(String, String)]) -> bool {
    filters.iter().all(|(key, value)| {
        // `status=all` style filters widen the listing instead of narrowing it.
        // Range filters (`created[gte]`) are not modelled and match everything.
        value == "all" || key.contains('[') || object.str_field(key) == Some(value.as_str())
    })
}

fn merge(object: &mut RemoteObject, fields: &Value) {
    if let Value::Object(fields) = fields {
        for (key, value) in fields {
            object.set(key.clone(), value.clone());
        }
    }
}

fn params_object(params: &[(String, String)]) -> serde_json::Map<String, Value> {
    params
        .iter()
        .filter(|(key, _)| !key.contains('['))
        .map(|(key, value)| (key.clone(), Value::from(value.clone())))
        .collect()
}

#[async_trait]
impl BillingApi for FakeApi {
    async fn retrieve(&self, path: &ResourcePath) -> RemoteResult<RemoteObject> {
        let provider = self.inner.lock().unwrap();
        provider
            .objects
            .get(path.as_str())
            .cloned()
            .ok_or_else(|| not_found(path.as_str()))
    }

    async fn retrieve_with(
        &self,
        path: &ResourcePath,
        query: &[(String, String)],
    ) -> RemoteResult<RemoteObject> {
        let mut provider = self.inner.lock().unwrap();
        provider.queries.push((path.to_string(), query.to_vec()));
        provider
            .objects
            .get(path.as_str())
            .cloned()
            .ok_or_else(|| not_found(path.as_str()))
    }

    async fn list(&self, path: &ResourcePath, page: &PageRequest) -> RemoteResult<ListPage> {
        // Let concurrent callers interleave between pages, as a network would.
        tokio::task::yield_now().await;
        let mut provider = self.inner.lock().unwrap();
        provider.requests.push((path.to_string(), page.clone()));
        let call = {
            let calls = provider.list_calls.entry(path.to_string()).or_insert(0);
            *calls += 1;
            *calls
        };
        if provider.fail_on.as_ref() == Some(&(path.to_string(), call)) {
            return Err(RemoteError::connection("connection reset by peer"));
        }

        let items: Vec<RemoteObject> = provider
            .collections
            .get(path.as_str())
            .map(|items| {
                items
                    .iter()
                    .filter(|object| matches_filters(object, &page.filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let start = match &page.starting_after {
            Some(cursor) => items
                .iter()
                .position(|object| object.id() == Some(cursor.as_str()))
                .map(|index| index + 1)
                .unwrap_or(items.len()),
            None => 0,
        };
        let end = (start + page.limit as usize).min(items.len());
        Ok(ListPage {
            data: items[start..end].to_vec(),
            has_more: end < items.len(),
        })
    }

    async fn create(
        &self,
        path: &ResourcePath,
        params: &[(String, String)],
    ) -> RemoteResult<RemoteObject> {
        {
            let mut provider = self.inner.lock().unwrap();
            if let Some(fields) = provider.actions.get(path.as_str()).cloned() {
                let target = path
                    .as_str()
                    .rsplit_once('/')
                    .map(|(target, _)| target.to_string())
                    .unwrap_or_default();
                let existing = provider
                    .objects
                    .get_mut(&target)
                    .ok_or_else(|| not_found(&target))?;
                merge(existing, &fields);
                return Ok(existing.clone());
            }
        }

        let mut fields = params_object(params);
        let id = fields
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RemoteError::classify(400, r#"{"error": {"type": "invalid_request_error", "message": "Missing id", "param": "id"}}"#))?;
        fields.entry("livemode").or_insert(Value::Bool(false));
        fields.entry("created").or_insert(Value::from(1_500_000_000));
        fields.entry("metadata").or_insert(json!({}));
        if path.as_str() == "coupons" {
            fields.entry("valid").or_insert(Value::Bool(true));
        }
        let created = RemoteObject::new(fields);

        let mut provider = self.inner.lock().unwrap();
        provider
            .collections
            .entry(path.to_string())
            .or_default()
            .push(created.clone());
        provider
            .objects
            .insert(path.child(&id).to_string(), created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        path: &ResourcePath,
        params: &[(String, String)],
    ) -> RemoteResult<RemoteObject> {
        let mut provider = self.inner.lock().unwrap();
        let existing = provider
            .objects
            .get_mut(path.as_str())
            .ok_or_else(|| not_found(path.as_str()))?;
        for (key, value) in params_object(params) {
            existing.set(key, value);
        }
        // Applying a coupon attaches a discount to the customer or subscription.
        if let Some(Value::String(coupon_id)) = existing.get("coupon").cloned() {
            let (customer, subscription) = match existing.object_type() {
                Some("subscription") => (
                    existing.str_field("customer").unwrap_or_default().to_string(),
                    existing.id().map(str::to_string),
                ),
                _ => (existing.id().unwrap_or_default().to_string(), None),
            };
            existing.set(
                "discount",
                discount(&coupon_id, &customer, subscription.as_deref()),
            );
        }
        Ok(existing.clone())
    }

    async fn delete(&self, path: &ResourcePath) -> RemoteResult<RemoteObject> {
        let mut provider = self.inner.lock().unwrap();
        if let Some(owner) = path.as_str().strip_suffix("/discount") {
            let owner = provider
                .objects
                .get_mut(owner)
                .ok_or_else(|| not_found(owner))?;
            owner.set("discount", Value::Null);
            return Ok(object(json!({"object": "discount", "deleted": true})));
        }
        // Canceled subscriptions stay at the provider in their final state.
        if path.as_str().starts_with("subscriptions/") {
            let subscription = provider
                .objects
                .get_mut(path.as_str())
                .ok_or_else(|| not_found(path.as_str()))?;
            subscription.set("status", json!("canceled"));
            subscription.set("canceled_at", json!(1_500_000_500));
            return Ok(subscription.clone());
        }
        let removed = provider
            .objects
            .remove(path.as_str())
            .ok_or_else(|| not_found(path.as_str()))?;
        let id = removed.id().unwrap_or_default().to_string();
        for items in provider.collections.values_mut() {
            items.retain(|object| object.id() != Some(id.as_str()));
        }
        Ok(object(json!({"id": id, "deleted": true})))
    }
}

pub struct Harness {
    pub api: FakeApi,
    pub store: Arc<dyn MirrorStore>,
    pub mirror: Arc<Mirror>,
}

pub fn harness() -> Harness {
    let api = FakeApi::new();
    let store: Arc<dyn MirrorStore> = Arc::new(SqliteMirrorStore::in_memory(&TABLES).unwrap());
    let mirror = Arc::new(Mirror::new(Arc::new(api.clone()), Arc::clone(&store)));
    Harness { api, store, mirror }
}

pub fn card(id: &str, customer: &str) -> RemoteObject {
    object(json!({
        "id": id,
        "object": "card",
        "brand": "Visa",
        "customer": customer,
        "exp_month": 12,
        "exp_year": 2030,
        "last4": "4242",
        "funding": "credit",
        "available_payout_methods": ["standard"],
        "metadata": {"label": id}
    }))
}

/// A customer with the given cards inlined. `has_more` marks the inlined list
/// as truncated.
pub fn customer(id: &str, cards: &[RemoteObject], has_more: bool) -> RemoteObject {
    object(json!({
        "id": id,
        "object": "customer",
        "created": 1_500_000_000,
        "livemode": false,
        "email": format!("{}@example.com", id),
        "account_balance": 0,
        "delinquent": false,
        "discount": null,
        "metadata": {"tier": "gold"},
        "sources": {
            "object": "list",
            "data": cards,
            "has_more": has_more
        }
    }))
}

pub fn coupon(id: &str) -> RemoteObject {
    object(json!({
        "id": id,
        "object": "coupon",
        "created": 1_500_000_000,
        "duration": "once",
        "livemode": false,
        "percent_off": 25,
        "valid": true,
        "metadata": {}
    }))
}

pub fn discount(coupon_id: &str, customer: &str, subscription: Option<&str>) -> Value {
    json!({
        "object": "discount",
        "coupon": coupon(coupon_id).into_value(),
        "customer": customer,
        "subscription": subscription,
        "start": 1_500_000_100,
        "end": null
    })
}

pub fn charge(id: &str, customer: &str, amount: i64) -> RemoteObject {
    object(json!({
        "id": id,
        "object": "charge",
        "amount": amount,
        "amount_refunded": 0,
        "created": 1_500_000_000,
        "currency": "usd",
        "customer": customer,
        "invoice": null,
        "livemode": false,
        "paid": true,
        "status": "succeeded",
        "source": {"id": "card_a", "object": "card"},
        "outcome": {"network_status": "approved_by_network", "type": "authorized"},
        "metadata": {"order": "1001"}
    }))
}

pub fn plan(id: &str) -> RemoteObject {
    object(json!({
        "id": id,
        "object": "plan",
        "amount": 2000,
        "currency": "usd",
        "interval": "month",
        "interval_count": 1,
        "livemode": false,
        "name": id,
        "metadata": {}
    }))
}

pub fn subscription_item(id: &str, plan_id: &str, subscription: &str) -> RemoteObject {
    object(json!({
        "id": id,
        "object": "subscription_item",
        "created": 1_500_000_000,
        "plan": plan(plan_id).into_value(),
        "quantity": 1,
        "subscription": subscription
    }))
}

pub fn subscription(id: &str, customer: &str, items: &[RemoteObject], has_more: bool) -> RemoteObject {
    object(json!({
        "id": id,
        "object": "subscription",
        "created": 1_500_000_000,
        "customer": customer,
        "livemode": false,
        "plan": plan("gold").into_value(),
        "status": "active",
        "discount": null,
        "metadata": {},
        "items": {"object": "list", "data": items, "has_more": has_more}
    }))
}

pub fn event(id: &str, event_type: &str, object: &RemoteObject) -> RemoteObject {
    self::object(json!({
        "id": id,
        "object": "event",
        "type": event_type,
        "created": 1_500_000_000,
        "data": {"object": object.clone().into_value()}
    }))
}

/// An invoice with the given lines inlined. `has_more` marks the inlined list
/// as truncated.
pub fn invoice(id: &str, customer: &str, lines: &[RemoteObject], has_more: bool) -> RemoteObject {
    let total: i64 = lines
        .iter()
        .filter_map(|line| line.get("amount").and_then(Value::as_i64))
        .sum();
    object(json!({
        "id": id,
        "object": "invoice",
        "amount_due": total,
        "currency": "usd",
        "customer": customer,
        "date": 1_500_000_000,
        "livemode": false,
        "paid": false,
        "closed": false,
        "subscription": null,
        "total": total,
        "metadata": {},
        "lines": {
            "object": "list",
            "data": lines,
            "has_more": has_more,
            "url": format!("/v1/invoices/{}/lines", id)
        }
    }))
}

pub fn line_item(id: &str, amount: i64) -> RemoteObject {
    object(json!({
        "id": id,
        "object": "line_item",
        "amount": amount,
        "currency": "usd",
        "description": format!("line {}", id),
        "livemode": false,
        "period": {"start": 1_500_000_000, "end": 1_502_678_400},
        "plan": plan("gold").into_value(),
        "proration": false,
        "quantity": 1,
        "type": "subscription",
        "metadata": {"line": id}
    }))
}

pub fn dispute(id: &str, charge_id: &str) -> RemoteObject {
    object(json!({
        "id": id,
        "object": "dispute",
        "amount": 500,
        "charge": charge_id,
        "created": 1_500_000_000,
        "currency": "usd",
        "evidence": {},
        "evidence_details": {"due_by": 1_500_900_000, "has_evidence": false},
        "livemode": false,
        "reason": "fraudulent",
        "status": "needs_response",
        "metadata": {}
    }))
}
