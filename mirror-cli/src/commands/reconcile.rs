//! `kvmirror reconcile`: run passes in this process.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use mirror_core::{IntentKey, Namespace, ObjectStore};
use mirror_sync::pipeline::{self, ReconcileScope, ReconcileSummary};
use mirror_sync::{Cancellation, ReconcileAction};

use super::{load_config, open_store};

/// Arguments for `kvmirror reconcile`.
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Intent to reconcile, as `<namespace>/<name>`.
    pub intent: Option<IntentKey>,

    /// Reconcile every intent.
    #[arg(long, conflicts_with_all = ["intent", "namespace"])]
    pub all: bool,

    /// Reconcile every intent in one namespace.
    #[arg(long, conflicts_with = "intent")]
    pub namespace: Option<String>,
}

impl ReconcileArgs {
    pub fn run(self, home: &Path) -> Result<()> {
        let scope = match (self.intent, self.namespace, self.all) {
            (Some(key), _, _) => ReconcileScope::Intent(key),
            (None, Some(ns), _) => ReconcileScope::Namespace(Namespace::from(ns)),
            (None, None, true) => ReconcileScope::All,
            (None, None, false) => {
                anyhow::bail!("provide <namespace>/<name>, --namespace <ns> or --all")
            }
        };

        let config = load_config(home)?;
        let store = Arc::new(open_store(home));
        let label = match &scope {
            ReconcileScope::All => "all intents".to_string(),
            ReconcileScope::Namespace(ns) => format!("namespace '{ns}'"),
            ReconcileScope::Intent(key) => format!("intent {key}"),
        };
        let summaries = pipeline::run(store.clone(), &config, scope, &Cancellation::new())
            .with_context(|| format!("reconcile failed for {label}"))?;

        if summaries.is_empty() {
            println!("No intents found. Run `kvmirror apply -f <intent.yaml>` first.");
            return Ok(());
        }

        let mut failed = 0usize;
        for summary in &summaries {
            if !print_summary(store.as_ref(), summary) {
                failed += 1;
            }
        }
        if failed > 0 {
            anyhow::bail!("{failed} of {} intents failed to reconcile", summaries.len());
        }
        Ok(())
    }
}

/// Returns `false` when the pass itself failed.
fn print_summary(store: &dyn ObjectStore, summary: &ReconcileSummary) -> bool {
    let gone = summary.result.is_ok()
        && matches!(store.get_intent(&summary.intent), Err(e) if e.is_not_found());
    if gone {
        println!("{} {} removed", "✓".green(), summary.intent);
        return true;
    }
    match &summary.result {
        Ok(ReconcileAction::RequeueAfter(delay)) => {
            println!(
                "{} {} waiting (re-check in {}s)",
                "…".yellow(),
                summary.intent,
                delay.as_secs()
            );
            true
        }
        Ok(_) if summary.ready => {
            println!("{} {} ready", "✓".green(), summary.intent);
            true
        }
        Ok(_) => {
            println!("{} {} not ready", "✗".red(), summary.intent);
            true
        }
        Err(err) => {
            println!("{} {} failed: {err}", "✗".red(), summary.intent);
            false
        }
    }
}
