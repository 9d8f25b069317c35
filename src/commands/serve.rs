// ABOUTME: Serve command - runs the webhook listener until interrupted
// ABOUTME: Wires the dispatcher's default routes into the HTTP endpoint

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;

use crate::config::MirrorConfig;
use crate::dispatch::Dispatcher;
use crate::webhook::{self, WebhookState};

pub async fn serve(config: &MirrorConfig) -> Result<()> {
    let mirror = super::connect(config)?;
    let dispatcher = Arc::new(Dispatcher::with_default_routes(
        mirror,
        config.webhook.refresh_objects,
    ));

    let mut events = dispatcher.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::debug!(
                    "{}: {} {}",
                    event.name,
                    event.outcome.label(),
                    event.id.as_deref().unwrap_or_default()
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event log fell behind, skipped {} events", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let state = WebhookState::new(dispatcher, config.webhook.acknowledge_failures);
    let router = webhook::router(state, &config.webhook.path);

    let listener = tokio::net::TcpListener::bind(&config.webhook.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.webhook.listen))?;
    tracing::info!(
        "Listening for billing events on http://{}{}",
        config.webhook.listen,
        config.webhook.path
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Webhook server failed")?;
    tracing::info!("Webhook server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
