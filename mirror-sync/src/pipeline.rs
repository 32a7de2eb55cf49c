//! Shared reconcile entrypoint used by the CLI and the daemon.

use std::sync::Arc;

use mirror_core::markers::CONDITION_READY;
use mirror_core::{ControllerConfig, IntentKey, Namespace, ObjectStore};

use crate::cancel::Cancellation;
use crate::conditions::is_condition_true;
use crate::correlation::{all_intents, intents_in};
use crate::error::SyncError;
use crate::reconcile::{ReconcileAction, Reconciler};

/// Immediate requeues followed within one pipeline run.
const MAX_IMMEDIATE_PASSES: usize = 5;

/// Scope for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileScope {
    /// Every intent in every namespace.
    All,
    Namespace(Namespace),
    Intent(IntentKey),
}

/// Outcome of reconciling one intent.
#[derive(Debug)]
pub struct ReconcileSummary {
    pub intent: IntentKey,
    pub result: Result<ReconcileAction, SyncError>,
    /// `Ready` condition after the run; `false` if the intent is gone.
    pub ready: bool,
}

/// Reconcile every intent in `scope`.
///
/// A single-intent scope returns its error directly. Wider scopes record
/// per-intent failures in the summaries and keep going; only cancellation
/// stops the run.
pub fn run(
    store: Arc<dyn ObjectStore>,
    config: &ControllerConfig,
    scope: ReconcileScope,
    cancel: &Cancellation,
) -> Result<Vec<ReconcileSummary>, SyncError> {
    let reconciler = Reconciler::new(Arc::clone(&store), config.clone());
    match scope {
        ReconcileScope::Intent(key) => {
            let action = reconcile_until_settled(&reconciler, &key, cancel)?;
            Ok(vec![summarize(store.as_ref(), key, Ok(action))])
        }
        ReconcileScope::All => run_many(&reconciler, all_intents(store.as_ref())?, cancel),
        ReconcileScope::Namespace(ns) => {
            run_many(&reconciler, intents_in(store.as_ref(), &ns)?, cancel)
        }
    }
}

fn run_many(
    reconciler: &Reconciler,
    keys: Vec<IntentKey>,
    cancel: &Cancellation,
) -> Result<Vec<ReconcileSummary>, SyncError> {
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let result = reconcile_until_settled(reconciler, &key, cancel);
        if let Err(SyncError::Cancelled) = result {
            return Err(SyncError::Cancelled);
        }
        if let Err(e) = &result {
            tracing::warn!("{key}: reconcile failed: {e}");
        }
        out.push(summarize(reconciler.store(), key, result));
    }
    Ok(out)
}

/// Follow immediate requeues (e.g. right after the finalizer is added).
fn reconcile_until_settled(
    reconciler: &Reconciler,
    key: &IntentKey,
    cancel: &Cancellation,
) -> Result<ReconcileAction, SyncError> {
    let mut action = reconciler.reconcile_with_retry(key, cancel)?;
    for _ in 1..MAX_IMMEDIATE_PASSES {
        if action != ReconcileAction::Requeue {
            break;
        }
        action = reconciler.reconcile_with_retry(key, cancel)?;
    }
    Ok(action)
}

fn summarize(
    store: &dyn ObjectStore,
    intent: IntentKey,
    result: Result<ReconcileAction, SyncError>,
) -> ReconcileSummary {
    let ready = store
        .get_intent(&intent)
        .map(|i| is_condition_true(&i.status, CONDITION_READY))
        .unwrap_or(false);
    ReconcileSummary {
        intent,
        result,
        ready,
    }
}
