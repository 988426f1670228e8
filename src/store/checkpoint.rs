use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{MigrationState, Phase, TenantId};

/// Persisted progress of one migration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub tenant_id: TenantId,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub collections: BTreeMap<String, MigrationState>,
}

impl RunManifest {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            started_at: Utc::now(),
            completed_at: None,
            collections: BTreeMap::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    /// State for `collection`, created fresh the first time it is asked for.
    pub fn state_mut(&mut self, collection: &str) -> &mut MigrationState {
        self.collections
            .entry(collection.to_string())
            .or_insert_with(|| MigrationState::new(collection))
    }

    pub fn state(&self, collection: &str) -> Option<&MigrationState> {
        self.collections.get(collection)
    }

    /// After `collection` was restored from its archive, its live records are
    /// the archived ones again: tagging and indexing must run anew. Returns
    /// whether the recorded state changed.
    pub fn rewind_to_backup(&mut self, collection: &str) -> bool {
        let Some(state) = self.collections.get_mut(collection) else {
            return false;
        };
        let rewound = MigrationState {
            phase: Phase::BackedUp,
            last_processed_id: None,
            processed_count: 0,
            ..state.clone()
        };
        if *state == rewound {
            return false;
        }
        *state = rewound;
        true
    }
}

/// Stores the run manifest as `run.json` beside the archives.
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn open(backup_dir: &Path) -> Self {
        Self {
            path: backup_dir.join("run.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<RunManifest>> {
        if !self.path.is_file() {
            return Ok(None);
        }
        let data = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// Write via a temporary file and rename so a crash never leaves a torn manifest.
    pub fn save(&self, manifest: &RunManifest) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_string_pretty(manifest)?)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }

    /// Remove the manifest. Returns whether one existed.
    pub fn clear(&self) -> Result<bool> {
        if !self.path.is_file() {
            return Ok(false);
        }
        fs::remove_file(&self.path)?;
        Ok(true)
    }
}
