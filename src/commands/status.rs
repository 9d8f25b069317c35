// ABOUTME: Status command - local record counts per kind and the last sync of each target
// ABOUTME: Reads only the mirror database and the sync state file

use anyhow::{Context, Result};

use crate::config::MirrorConfig;
use crate::entity::{EntityKind, SyncTarget};
use crate::state::SyncState;

pub async fn status(config: &MirrorConfig) -> Result<()> {
    let store = super::open_store(config)?;

    println!("Mirror database: {}", config.store.path.display());
    println!();
    println!("{:<22} {:>10}", "table", "records");
    for kind in EntityKind::ALL {
        let table = kind.table().name;
        let count = store
            .count(table)
            .with_context(|| format!("Failed to count {}", table))?;
        println!("{:<22} {:>10}", table, count);
    }

    let state_path = SyncState::default_path(&config.store.path);
    let state = SyncState::load_or_new(&state_path, &config.store.path).await?;

    println!();
    println!("{:<16} {:<26} {:>9} {:>9}", "target", "last full sync", "mirrored", "deleted");
    for target in SyncTarget::ALL {
        match state.get(target.selector()) {
            Some(last) => println!(
                "{:<16} {:<26} {:>9} {:>9}",
                target.selector(),
                last.last_sync_at.format("%Y-%m-%d %H:%M:%S UTC"),
                last.records_mirrored,
                last.records_deleted
            ),
            None => println!("{:<16} {:<26}", target.selector(), "never"),
        }
    }
    Ok(())
}
