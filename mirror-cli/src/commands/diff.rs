//! `kvmirror diff <ns>/<name>`: unified diffs of what the next pass would write.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use mirror_core::IntentKey;
use mirror_sync::plan::diff_intent;

use super::{load_config, open_store};

/// Arguments for `kvmirror diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Intent to preview, as `<namespace>/<name>`.
    pub intent: IntentKey,
}

impl DiffArgs {
    pub fn run(self, home: &Path) -> Result<()> {
        let config = load_config(home)?;
        let store = open_store(home);

        let plan = diff_intent(&store, &self.intent, &config.identity)
            .with_context(|| format!("diff failed for {}", self.intent))?;

        if plan.source_checksum.is_none() {
            println!(
                "{} source of {} not found; nothing would be written.",
                plan.kind, plan.intent
            );
            return Ok(());
        }

        for target in &plan.targets {
            if let Some(error) = &target.error {
                println!("! {}: {error}", target.target);
            }
        }

        if !plan.has_changes() {
            println!("No differences for {}.", plan.intent);
            return Ok(());
        }

        for target in plan.targets {
            if target.unified_diff.is_empty() {
                continue;
            }
            print!("{}", target.unified_diff);
            if !target.unified_diff.ends_with('\n') {
                println!();
            }
        }

        Ok(())
    }
}
