// ABOUTME: HTTP endpoint receiving provider notifications
// ABOUTME: Re-fetches each event by id from the provider before dispatching it

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::remote::{Event, ResourcePath};

#[derive(Clone)]
pub struct WebhookState {
    dispatcher: Arc<Dispatcher>,
    /// Answer 200 even when dispatch failed, so the provider stops redelivering.
    acknowledge_failures: bool,
    failures: Arc<AtomicU64>,
}

impl WebhookState {
    pub fn new(dispatcher: Arc<Dispatcher>, acknowledge_failures: bool) -> Self {
        Self {
            dispatcher,
            acknowledge_failures,
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Number of events whose dispatch failed since startup.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn failed(&self, event_id: &str, event_type: &str, error: &dyn std::fmt::Display) -> StatusCode {
        self.failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!("Failed to handle event {} ({}): {}", event_id, event_type, error);
        if self.acknowledge_failures {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn router(state: WebhookState, path: &str) -> Router {
    Router::new()
        .route(path, post(receive_event))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    failures: u64,
}

async fn health(State(state): State<WebhookState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        failures: state.failures(),
    })
}

/// Handle one notification body. Only the event id is trusted; the event
/// itself is read back from the provider.
pub async fn receive_event(State(state): State<WebhookState>, body: Bytes) -> StatusCode {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("Rejecting webhook body that is not JSON: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };
    let Some(event_id) = payload.get("id").and_then(Value::as_str) else {
        tracing::warn!("Rejecting webhook body without an event id");
        return StatusCode::BAD_REQUEST;
    };
    if !is_event_id(event_id) {
        tracing::warn!("Rejecting webhook body with malformed event id {:?}", event_id);
        return StatusCode::BAD_REQUEST;
    }
    let claimed_type = payload
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("<unknown>");

    let event = match fetch_event(&state, event_id).await {
        Ok(Some(event)) => event,
        Ok(None) => {
            tracing::warn!(
                "Event {} ({}) is unknown to the provider, acknowledging without action",
                event_id,
                claimed_type
            );
            return StatusCode::OK;
        }
        Err(e) => return state.failed(event_id, claimed_type, &e),
    };

    match state.dispatcher.dispatch(&event).await {
        Ok(_) => StatusCode::OK,
        Err(e) => state.failed(&event.id, &event.event_type, &e),
    }
}

/// Event ids are spliced into the provider URL and must be one plain path
/// segment.
fn is_event_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

async fn fetch_event(state: &WebhookState, event_id: &str) -> Result<Option<Event>> {
    let path = ResourcePath::new("events").child(event_id);
    match state.dispatcher.mirror().api().retrieve(&path).await {
        Ok(object) => Ok(Some(serde_json::from_value(object.into_value())?)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}
