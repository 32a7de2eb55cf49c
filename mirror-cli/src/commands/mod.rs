pub mod apply;
pub mod daemon;
pub mod diff;
pub mod namespace;
pub mod objects;
pub mod reconcile;
pub mod status;

use std::path::Path;

use anyhow::{Context, Result};

use mirror_core::{config, ControllerConfig, FsStore};

pub(crate) fn open_store(home: &Path) -> FsStore {
    FsStore::at(home)
}

pub(crate) fn load_config(home: &Path) -> Result<ControllerConfig> {
    config::load_at(home).with_context(|| {
        format!(
            "failed to read {}",
            config::config_path_at(home).display()
        )
    })
}
