// ABOUTME: Sync command - full sync of the selected targets under one run id
// ABOUTME: Shows a spinner while syncing and persists the per-target sync state

use std::time::Duration;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::MirrorConfig;
use crate::entity::SyncTarget;
use crate::state::SyncState;
use crate::sync::{SyncEngine, SyncProgress};
use crate::tags::SyncContext;

/// Run a full sync of `selectors` (every target when empty).
///
/// Unknown selectors are rejected before anything is listed. A failing
/// target does not stop the others, but makes the command fail at the end.
pub async fn sync(config: &MirrorConfig, selectors: &[String]) -> Result<()> {
    let targets = SyncTarget::parse_selectors(selectors)?;
    let mirror = super::connect(config)?;
    let engine = SyncEngine::new(mirror);

    let state_path = SyncState::default_path(&config.store.path);
    let mut state = SyncState::load_or_new(&state_path, &config.store.path).await?;

    let ctx = SyncContext::full_run();
    tracing::info!(
        "Starting full sync of {} target(s) (run {})",
        targets.len(),
        ctx.sync_id()
    );

    let style = ProgressStyle::with_template("{spinner} {msg}")
        .context("Invalid progress template")?;
    let spinner = ProgressBar::new_spinner().with_style(style);
    spinner.enable_steady_tick(Duration::from_millis(120));

    let report = engine
        .sync_targets_with_progress(&targets, &ctx, |event| match event {
            SyncProgress::Started(target) => spinner.set_message(format!("{}: listing", target)),
            SyncProgress::Mirrored(target, mirrored) => {
                spinner.set_message(format!("{}: {} records", target, mirrored))
            }
            SyncProgress::Completed(stats) => spinner.println(format!(
                "✓ {}: {} mirrored, {} stale removed",
                stats.target, stats.records_mirrored, stats.records_deleted
            )),
            SyncProgress::Failed(target, e) => spinner.println(format!("✗ {}: {}", target, e)),
        })
        .await;
    spinner.finish_and_clear();

    for stats in &report.completed {
        state.record(stats, ctx.sync_id());
    }
    state
        .save(&state_path)
        .await
        .context("Failed to save sync state")?;

    println!(
        "Mirrored {} records, removed {} stale records ({}ms)",
        report.records_mirrored(),
        report.records_deleted(),
        report.duration_ms
    );

    if !report.is_success() {
        let failed: Vec<&str> = report
            .errors
            .iter()
            .map(|(target, _)| target.selector())
            .collect();
        bail!("Sync failed for: {}", failed.join(", "));
    }
    tracing::info!("Full sync complete");
    Ok(())
}
