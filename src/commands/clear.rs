// ABOUTME: Clear command - empties every mirror table after confirmation
// ABOUTME: The provider is untouched; a full sync rebuilds the mirror

use anyhow::{bail, Context, Result};
use dialoguer::{theme::ColorfulTheme, Confirm};

use crate::config::MirrorConfig;

pub fn clear(config: &MirrorConfig, yes: bool) -> Result<()> {
    if !yes {
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "Delete every mirrored record in {}?",
                config.store.path.display()
            ))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
        if !confirmed {
            bail!("Clear cancelled");
        }
    }

    let store = super::open_store(config)?;
    let removed = store.clear().context("Failed to clear mirror database")?;
    tracing::info!("Cleared {} rows from {:?}", removed, config.store.path);
    println!("Removed {} mirrored rows.", removed);
    Ok(())
}
