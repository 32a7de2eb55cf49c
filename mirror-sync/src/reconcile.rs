//! The reconciliation pass: one intent, one idempotent convergence step.
//!
//! ## Pass protocol
//!
//! 1. Fetch the intent. Gone: done.
//! 2. Deletion requested: run the deletion handler. Done.
//! 3. No finalizer: add it and requeue immediately.
//! 4. Unsupported source kind: report through conditions, no timed retry.
//! 5. Source missing: report and re-check after the configured delay.
//! 6. Filter and checksum the source data.
//! 7. Sync every target; one failure never stops the others.
//! 8. Persist per-target results, checksum and the `Ready` condition.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use mirror_core::markers::{
    reason, CONDITION_READY, CONDITION_SOURCE_FOUND, FINALIZER,
};
use mirror_core::{
    ConditionStatus, ControllerConfig, Intent, IntentKey, KvObject, ObjectStore, ResourceKind,
    TargetSyncStatus,
};

use crate::cancel::Cancellation;
use crate::checksum::bundle_checksum;
use crate::conditions::set_condition;
use crate::deletion::handle_deletion;
use crate::error::SyncError;
use crate::filter::filter;
use crate::target::{sync_target, TargetRequest};

/// What the scheduler should do with the intent after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Done,
    /// Run another pass right away.
    Requeue,
    /// Run another pass after the delay.
    RequeueAfter(Duration),
}

/// Runs reconcile passes against a store.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    config: ControllerConfig,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(store: Arc<dyn ObjectStore>, config: ControllerConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Run a pass, re-running it from a fresh read when a write hits a
    /// version conflict, up to `max_conflict_retries` extra attempts.
    pub fn reconcile_with_retry(
        &self,
        key: &IntentKey,
        cancel: &Cancellation,
    ) -> Result<ReconcileAction, SyncError> {
        let mut attempt = 0;
        loop {
            match self.reconcile(key, cancel) {
                Err(e) if e.is_conflict() && attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    tracing::debug!("{key}: conflict, retrying pass ({attempt})");
                }
                other => return other,
            }
        }
    }

    /// One reconcile pass for `key`.
    pub fn reconcile(
        &self,
        key: &IntentKey,
        cancel: &Cancellation,
    ) -> Result<ReconcileAction, SyncError> {
        let store = self.store.as_ref();
        let identity = self.config.identity.as_str();

        cancel.check()?;
        let mut intent = match store.get_intent(key) {
            Ok(intent) => intent,
            Err(e) if e.is_not_found() => {
                tracing::debug!("{key}: intent gone");
                return Ok(ReconcileAction::Done);
            }
            Err(e) => return Err(e.into()),
        };

        if intent.metadata.is_deleting() {
            handle_deletion(store, &intent, identity, cancel)?;
            return Ok(ReconcileAction::Done);
        }

        if !intent.has_finalizer() {
            intent.metadata.add_finalizer(FINALIZER);
            cancel.check()?;
            store.update_intent(&intent)?;
            tracing::debug!("{key}: finalizer added");
            return Ok(ReconcileAction::Requeue);
        }

        let Some(kind) = intent.spec.source.resource_kind() else {
            return self.report_unsupported_kind(intent, cancel);
        };

        cancel.check()?;
        let source = match store.get_object(kind, &intent.source_key()) {
            Ok(source) => source,
            Err(e) if e.is_not_found() => return self.report_missing_source(intent, kind, cancel),
            Err(e) => return Err(e.into()),
        };

        set_condition(
            &mut intent.status,
            CONDITION_SOURCE_FOUND,
            ConditionStatus::True,
            reason::SOURCE_EXISTS,
            "Source resource found",
        );

        self.sync_targets(intent, kind, &source, cancel)
    }

    fn sync_targets(
        &self,
        mut intent: Intent,
        kind: ResourceKind,
        source: &KvObject,
        cancel: &Cancellation,
    ) -> Result<ReconcileAction, SyncError> {
        let store = self.store.as_ref();
        let key = intent.key();
        let data = filter(&source.data, intent.spec.sync_policy.as_ref());
        let checksum = bundle_checksum(&data);
        tracing::debug!("{key}: source checksum {checksum}");

        let now = Utc::now();
        let mut records = Vec::with_capacity(intent.spec.targets.len());
        let mut conflict = None;
        let mut writes = 0usize;
        for target in &intent.spec.targets {
            let target_key = target.key(&intent.spec.source.name);
            let req = TargetRequest {
                intent: &intent,
                kind,
                target: &target_key,
                data: &data,
                type_tag: source.type_tag.as_deref(),
                checksum: &checksum,
                mode: intent.spec.sync_mode(),
                identity: &self.config.identity,
                dry_run: false,
            };
            let record = match sync_target(store, &req, cancel) {
                Ok(outcome) => {
                    if outcome.wrote() {
                        writes += 1;
                    }
                    TargetSyncStatus {
                        namespace: target_key.namespace.clone(),
                        name: target_key.name.clone(),
                        synced: true,
                        last_synced: Some(now),
                        error: None,
                    }
                }
                Err(e @ SyncError::Cancelled) => return Err(e),
                Err(e) if e.is_conflict() => return Err(e),
                Err(e) => {
                    tracing::warn!("{key}: failed to sync {kind} {target_key}: {e}");
                    if let SyncError::TargetConflict { owner, .. } = &e {
                        conflict.get_or_insert_with(|| (target_key.clone(), owner.clone()));
                    }
                    TargetSyncStatus {
                        namespace: target_key.namespace.clone(),
                        name: target_key.name.clone(),
                        synced: false,
                        last_synced: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            records.push(record);
        }

        let all_synced = records.iter().all(|r| r.synced);
        intent.status.synced_targets = records;
        intent.status.source_checksum = checksum;
        intent.status.observed_generation = intent.metadata.generation;

        if all_synced {
            intent.status.last_sync_time = Some(now);
            set_condition(
                &mut intent.status,
                CONDITION_READY,
                ConditionStatus::True,
                reason::SYNC_SUCCESSFUL,
                "All targets synced successfully",
            );
        } else if let Some((target, owner)) = conflict {
            set_condition(
                &mut intent.status,
                CONDITION_READY,
                ConditionStatus::False,
                reason::TARGET_CONFLICT,
                &format!("Target {target} is managed by intent {owner}"),
            );
        } else {
            set_condition(
                &mut intent.status,
                CONDITION_READY,
                ConditionStatus::False,
                reason::SYNC_FAILED,
                "Some targets failed to sync",
            );
        }

        cancel.check()?;
        store.update_intent_status(&intent)?;
        tracing::info!("{key}: reconciled ({writes} targets written, all synced: {all_synced})");
        Ok(ReconcileAction::Done)
    }

    fn report_missing_source(
        &self,
        mut intent: Intent,
        kind: ResourceKind,
        cancel: &Cancellation,
    ) -> Result<ReconcileAction, SyncError> {
        let key = intent.key();
        tracing::info!("{key}: source {kind} {} not found", intent.spec.source.name);
        set_condition(
            &mut intent.status,
            CONDITION_SOURCE_FOUND,
            ConditionStatus::False,
            reason::SOURCE_NOT_FOUND,
            &format!("Source {kind}/{} not found", intent.spec.source.name),
        );
        set_condition(
            &mut intent.status,
            CONDITION_READY,
            ConditionStatus::False,
            reason::SOURCE_NOT_FOUND,
            "Cannot sync: source resource not found",
        );
        intent.status.observed_generation = intent.metadata.generation;
        cancel.check()?;
        store_status(self.store.as_ref(), &intent)?;
        Ok(ReconcileAction::RequeueAfter(
            self.config.source_missing_requeue(),
        ))
    }

    fn report_unsupported_kind(
        &self,
        mut intent: Intent,
        cancel: &Cancellation,
    ) -> Result<ReconcileAction, SyncError> {
        let message = SyncError::UnsupportedKind {
            kind: intent.spec.source.kind.clone(),
        }
        .to_string();
        tracing::warn!("{}: {message}", intent.key());
        set_condition(
            &mut intent.status,
            CONDITION_SOURCE_FOUND,
            ConditionStatus::Unknown,
            reason::UNSUPPORTED_KIND,
            &message,
        );
        set_condition(
            &mut intent.status,
            CONDITION_READY,
            ConditionStatus::False,
            reason::UNSUPPORTED_KIND,
            &message,
        );
        intent.status.observed_generation = intent.metadata.generation;
        cancel.check()?;
        self.store.update_intent_status(&intent)?;
        Ok(ReconcileAction::Done)
    }
}

/// Status write for the missing-source branch. Conflicts propagate so the pass
/// is retried; other failures are logged and the timed re-check covers them.
fn store_status(store: &dyn ObjectStore, intent: &Intent) -> Result<(), SyncError> {
    match store.update_intent_status(intent) {
        Ok(_) => Ok(()),
        Err(e) if e.is_conflict() => Err(e.into()),
        Err(e) => {
            tracing::error!("{}: failed to update status: {e}", intent.key());
            Ok(())
        }
    }
}
