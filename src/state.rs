// ABOUTME: Persisted record of completed full syncs, one entry per sync target
// ABOUTME: Stored as JSON next to the mirror so `status` can report run history

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::sync::TargetStats;
use crate::tags::SyncId;

/// Last completed full sync of one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSyncState {
    pub target: String,
    /// Run id stamped on every row the sync touched
    pub last_sync_id: String,
    pub last_sync_at: chrono::DateTime<chrono::Utc>,
    pub records_mirrored: u64,
    pub records_deleted: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    /// Mirror database the runs were written to
    pub store_path: String,
    /// Per-target state, keyed by selector
    pub targets: BTreeMap<String, TargetSyncState>,
    /// Version of the state format for future migrations
    pub version: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl SyncState {
    pub fn new(store_path: &Path) -> Self {
        let now = chrono::Utc::now();
        Self {
            store_path: store_path.display().to_string(),
            targets: BTreeMap::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a completed target sync.
    pub fn record(&mut self, stats: &TargetStats, sync_id: &SyncId) {
        let now = chrono::Utc::now();
        self.targets.insert(
            stats.target.selector().to_string(),
            TargetSyncState {
                target: stats.target.selector().to_string(),
                last_sync_id: sync_id.to_string(),
                last_sync_at: now,
                records_mirrored: stats.records_mirrored,
                records_deleted: stats.records_deleted,
            },
        );
        self.updated_at = now;
    }

    pub fn get(&self, selector: &str) -> Option<&TargetSyncState> {
        self.targets.get(selector)
    }

    /// Load state from a JSON file
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read sync state from {:?}", path))?;
        let state: SyncState = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse sync state from {:?}", path))?;
        Ok(state)
    }

    /// Load existing state, or start fresh when none has been written yet.
    pub async fn load_or_new(path: &Path, store_path: &Path) -> Result<Self> {
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            Ok(Self::new(store_path))
        }
    }

    /// Save state to a JSON file
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize sync state")?;
        fs::write(path, contents)
            .await
            .with_context(|| format!("Failed to write sync state to {:?}", path))?;
        Ok(())
    }

    /// Default state file: beside the mirror database.
    pub fn default_path(store_path: &Path) -> PathBuf {
        store_path
            .parent()
            .map(|dir| dir.join("sync-state.json"))
            .unwrap_or_else(|| PathBuf::from("sync-state.json"))
    }
}
