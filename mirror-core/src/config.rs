//! Controller configuration, read from `<home>/.kvmirror/config.yaml`.
//!
//! The file is optional; every field has a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};
use crate::markers::DEFAULT_IDENTITY;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerConfig {
    /// Value written to and expected in the managed-by marker.
    pub identity: String,
    /// Delay before re-checking an intent whose source is missing.
    pub source_missing_requeue_secs: u64,
    /// Extra attempts after an optimistic-concurrency conflict.
    pub max_conflict_retries: u32,
    /// Period of the daemon's full resync. `0` disables it.
    pub resync_interval_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            identity: DEFAULT_IDENTITY.to_string(),
            source_missing_requeue_secs: 30,
            max_conflict_retries: 3,
            resync_interval_secs: 600,
        }
    }
}

impl ControllerConfig {
    pub fn source_missing_requeue(&self) -> Duration {
        Duration::from_secs(self.source_missing_requeue_secs)
    }

    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }
}

pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".kvmirror").join("config.yaml")
}

/// Load the config under `home`, falling back to defaults when absent.
pub fn load_at(home: &Path) -> Result<ControllerConfig, StoreError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(ControllerConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(ControllerConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|source| StoreError::Parse { path, source })
}

pub fn load() -> Result<ControllerConfig, StoreError> {
    let home = dirs::home_dir().ok_or(StoreError::HomeNotFound)?;
    load_at(&home)
}
