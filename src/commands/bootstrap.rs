// ABOUTME: Bootstrap command - provisions the configured plans and coupons
// ABOUTME: Prints one line per entry and fails if any entry failed

use anyhow::{bail, Result};

use crate::billing::Billing;
use crate::bootstrap;
use crate::config::MirrorConfig;

pub async fn bootstrap(config: &MirrorConfig) -> Result<()> {
    if config.bootstrap.is_empty() {
        println!("No [[bootstrap.plans]] or [[bootstrap.coupons]] configured, nothing to do.");
        return Ok(());
    }

    let billing = Billing::new(super::connect(config)?);
    let report = bootstrap::bootstrap(&billing, &config.bootstrap).await;

    for item in &report.items {
        let id = item.id.as_deref().unwrap_or("<missing id>");
        match &item.result {
            Ok(()) => println!("  ✓ {} {}", item.kind, id),
            Err(e) => println!("  ✗ {} {}: {}", item.kind, id, e),
        }
    }
    println!(
        "Bootstrap finished: {} created, {} failed",
        report.created(),
        report.failed()
    );

    if report.failed() > 0 {
        bail!("{} bootstrap entries failed", report.failed());
    }
    Ok(())
}
