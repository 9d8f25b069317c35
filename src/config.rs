// ABOUTME: billing-mirror.toml loading, defaults and command-line overrides
// ABOUTME: Provider credentials, mirror database location, webhook listener and bootstrap entries

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::bootstrap::BootstrapConfig;

pub const DEFAULT_CONFIG_FILE: &str = "billing-mirror.toml";
pub const DEFAULT_API_BASE: &str = "https://api.stripe.com/v1";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub api: ApiConfig,
    pub store: StoreConfig,
    pub webhook: WebhookConfig,
    pub bootstrap: BootstrapConfig,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Sent as the `Stripe-Version` header when set.
    pub version: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            api_key: None,
            version: None,
            timeout_secs: 30,
        }
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("version", &self.version)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub listen: String,
    pub path: String,
    /// Answer 200 to events whose handling failed.
    pub acknowledge_failures: bool,
    /// Re-read each object from the provider before mirroring it.
    pub refresh_objects: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8088".to_string(),
            path: "/webhooks/billing".to_string(),
            acknowledge_failures: false,
            refresh_objects: true,
        }
    }
}

/// `~/.billing-mirror/mirror.db`, or a relative `.billing-mirror/` without a home directory.
pub fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".billing-mirror"))
        .unwrap_or_else(|| PathBuf::from(".billing-mirror"))
        .join("mirror.db")
}

/// Values given on the command line; each one set wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub database: Option<PathBuf>,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub listen: Option<String>,
}

impl MirrorConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse billing-mirror configuration")
    }

    /// Load `path`. A missing file is only an error when it was asked for
    /// explicitly; otherwise defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        if !path.exists() {
            if explicit {
                bail!("Config file {:?} does not exist", path);
            }
            tracing::debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml_str(&contents).with_context(|| format!("Invalid config file {:?}", path))
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(database) = overrides.database {
            self.store.path = database;
        }
        if let Some(api_key) = overrides.api_key {
            self.api.api_key = Some(api_key);
        }
        if let Some(api_base) = overrides.api_base {
            self.api.base_url = api_base;
        }
        if let Some(listen) = overrides.listen {
            self.webhook.listen = listen;
        }
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.api.base_url)
            .with_context(|| format!("Invalid API base URL '{}'", self.api.base_url))?;
        if self.api.timeout_secs == 0 {
            bail!("api.timeout_secs must be greater than zero");
        }
        if !self.webhook.path.starts_with('/') {
            bail!("webhook.path must start with '/', got '{}'", self.webhook.path);
        }
        Ok(())
    }

    /// The API key, required by every command that talks to the provider.
    pub fn require_api_key(&self) -> Result<&str> {
        match self.api.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => bail!(
                "An API key is required. Pass --api-key, set BILLING_API_KEY, or add api.api_key to {}",
                DEFAULT_CONFIG_FILE
            ),
        }
    }
}
