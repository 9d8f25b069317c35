// ABOUTME: Declarative provisioning of plans and coupons from configuration
// ABOUTME: Creates each configured object at the provider and mirrors it, never aborting the batch

use serde::{Deserialize, Serialize};

use crate::billing::Billing;
use crate::entity::EntityKind;
use crate::remote::form_params;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Provider create parameters, one table per plan. `id` is required.
    #[serde(default)]
    pub plans: Vec<toml::Table>,
    #[serde(default)]
    pub coupons: Vec<toml::Table>,
}

impl BootstrapConfig {
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty() && self.coupons.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapItem {
    pub kind: EntityKind,
    /// Configured id, or `None` when the entry had none.
    pub id: Option<String>,
    pub result: Result<(), String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub items: Vec<BootstrapItem>,
}

impl BootstrapReport {
    pub fn created(&self) -> usize {
        self.items.iter().filter(|item| item.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.created()
    }
}

/// Create every configured plan, then every coupon.
pub async fn bootstrap(billing: &Billing, config: &BootstrapConfig) -> BootstrapReport {
    let mut report = BootstrapReport::default();
    let batches = [
        (EntityKind::Plan, &config.plans),
        (EntityKind::Coupon, &config.coupons),
    ];

    for (kind, entries) in batches {
        for entry in entries {
            let item = provision(billing, kind, entry).await;
            match &item.result {
                Ok(()) => tracing::info!("Provisioned {} {}", kind, item.id.as_deref().unwrap_or_default()),
                Err(e) => tracing::error!(
                    "Failed to provision {} {}: {}",
                    kind,
                    item.id.as_deref().unwrap_or("<missing id>"),
                    e
                ),
            }
            report.items.push(item);
        }
    }
    report
}

async fn provision(billing: &Billing, kind: EntityKind, entry: &toml::Table) -> BootstrapItem {
    let id = entry
        .get("id")
        .and_then(toml::Value::as_str)
        .map(str::to_string);
    if id.is_none() {
        return BootstrapItem {
            kind,
            id,
            result: Err(format!("{} entry has no id", kind)),
        };
    }

    let result = match serde_json::to_value(entry) {
        Ok(value) => billing
            .create(kind, None, &form_params(&value))
            .await
            .map(|_| ())
            .map_err(|e| e.to_string()),
        Err(e) => Err(format!("invalid parameters: {}", e)),
    };
    BootstrapItem { kind, id, result }
}
