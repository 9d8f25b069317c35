// ABOUTME: Command implementations behind the billing-mirror CLI
// ABOUTME: Exports sync, serve, bootstrap, clear, show and status commands

pub mod bootstrap;
pub mod clear;
pub mod serve;
pub mod show;
pub mod status;
pub mod sync;

pub use bootstrap::bootstrap;
pub use clear::clear;
pub use serve::serve;
pub use show::show;
pub use status::status;
pub use sync::sync;

use std::sync::Arc;

use anyhow::{Context, Result};
use mirror_store::{MirrorStore, SqliteMirrorStore};

use crate::config::MirrorConfig;
use crate::entity::TABLES;
use crate::mirror::Mirror;
use crate::remote::{BillingApi, HttpBillingClient};

pub(crate) fn open_store(config: &MirrorConfig) -> Result<Arc<dyn MirrorStore>> {
    let store = SqliteMirrorStore::open(&config.store.path, &TABLES)
        .with_context(|| format!("Failed to open mirror database {:?}", config.store.path))?;
    tracing::debug!("Opened mirror database {:?}", config.store.path);
    Ok(Arc::new(store))
}

fn client(config: &MirrorConfig, api_key: &str) -> Result<Arc<dyn BillingApi>> {
    let client = HttpBillingClient::new(&config.api.base_url, api_key, config.api.timeout())
        .context("Failed to create billing API client")?
        .with_api_version(config.api.version.clone());
    Ok(Arc::new(client))
}

/// Mirror engine for commands that talk to the provider.
pub(crate) fn connect(config: &MirrorConfig) -> Result<Arc<Mirror>> {
    config.validate()?;
    let api = client(config, config.require_api_key()?)?;
    Ok(Arc::new(Mirror::new(api, open_store(config)?)))
}

/// Mirror engine for commands that may stay local. Without a configured key
/// any provider call fails with an authentication error.
pub(crate) fn connect_local(config: &MirrorConfig) -> Result<Arc<Mirror>> {
    config.validate()?;
    let api_key = config.api.api_key.clone().unwrap_or_default();
    let api = client(config, &api_key)?;
    Ok(Arc::new(Mirror::new(api, open_store(config)?)))
}
