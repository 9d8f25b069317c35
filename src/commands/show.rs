// ABOUTME: Show command - prints one mirrored record with its metadata as JSON
// ABOUTME: Optionally refreshes the record from the provider first

use anyhow::{anyhow, Context, Result};
use mirror_store::Record;
use serde_json::{json, Map, Value};

use crate::billing::Billing;
use crate::config::MirrorConfig;
use crate::entity::EntityKind;

pub async fn show(
    config: &MirrorConfig,
    kind: &str,
    id: &str,
    parent: Option<&str>,
    refresh: bool,
) -> Result<()> {
    let kind: EntityKind = kind.parse()?;
    let mirror = if refresh {
        super::connect(config)?
    } else {
        super::connect_local(config)?
    };
    let billing = Billing::new(mirror);

    let mirrored = billing
        .retrieve(kind, parent, id, refresh)
        .await
        .with_context(|| format!("Failed to read {} {}", kind, id))?
        .ok_or_else(|| anyhow!("{} {} is not mirrored", kind, id))?;
    let metadata = billing.mirror().metadata(kind, id)?;

    let expanded: Map<String, Value> = mirrored
        .expanded
        .iter()
        .map(|(column, record)| (column.clone(), render(record)))
        .collect();
    let mut output = render(&mirrored.record);
    output["kind"] = json!(kind.as_str());
    output["metadata"] = json!(metadata);
    output["expanded"] = Value::Object(expanded);

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn render(record: &Record) -> Value {
    json!({
        "id": record.id,
        "attributes": record.attributes,
        "change_id": record.change_id,
        "sync_id": record.sync_id,
    })
}
