//! Finalizer-gated cleanup for intents that are being deleted.

use mirror_core::markers::FINALIZER;
use mirror_core::{DeletionPolicy, Intent, ObjectKey, ObjectStore};

use crate::cancel::Cancellation;
use crate::error::SyncError;
use crate::ownership::is_managed_by;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionOutcome {
    /// The finalizer was already gone; nothing to do.
    NoFinalizer,
    /// Targets were left in place and the finalizer removed.
    Orphaned,
    /// Managed targets were removed, then the finalizer.
    Deleted { removed: Vec<ObjectKey> },
}

/// Run the deletion protocol for `intent`.
///
/// With the `delete` policy every declared target that exists and carries our
/// ownership marker is removed. Unmanaged objects are never touched. Errors
/// abort before the finalizer is released, so cleanup is retried.
pub fn handle_deletion(
    store: &dyn ObjectStore,
    intent: &Intent,
    identity: &str,
    cancel: &Cancellation,
) -> Result<DeletionOutcome, SyncError> {
    if !intent.has_finalizer() {
        return Ok(DeletionOutcome::NoFinalizer);
    }

    let outcome = match intent.spec.deletion_policy {
        DeletionPolicy::Orphan => {
            tracing::info!("{}: orphaning targets", intent.key());
            DeletionOutcome::Orphaned
        }
        DeletionPolicy::Delete => DeletionOutcome::Deleted {
            removed: delete_managed_targets(store, intent, identity, cancel)?,
        },
    };

    let mut released = intent.clone();
    released.metadata.remove_finalizer(FINALIZER);
    cancel.check()?;
    store.update_intent(&released)?;
    tracing::info!("{}: finalizer removed", intent.key());
    Ok(outcome)
}

fn delete_managed_targets(
    store: &dyn ObjectStore,
    intent: &Intent,
    identity: &str,
    cancel: &Cancellation,
) -> Result<Vec<ObjectKey>, SyncError> {
    let Some(kind) = intent.spec.source.resource_kind() else {
        tracing::warn!(
            "{}: source kind '{}' is unsupported; no targets to delete",
            intent.key(),
            intent.spec.source.kind
        );
        return Ok(vec![]);
    };

    let mut removed = Vec::new();
    for target in &intent.spec.targets {
        let key = target.key(&intent.spec.source.name);
        cancel.check()?;
        let obj = match store.get_object(kind, &key) {
            Ok(obj) => obj,
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e.into()),
        };
        if !is_managed_by(&obj.metadata, identity) {
            tracing::info!("{}: leaving unmanaged {kind} {key}", intent.key());
            continue;
        }
        cancel.check()?;
        match store.delete_object(kind, &key) {
            Ok(()) => {
                tracing::info!("{}: deleted {kind} {key}", intent.key());
                removed.push(key);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mirror_core::{
        bundle, IntentSpec, KvObject, MemoryStore, ResourceKind, SourceSpec, StoreAdmin,
        TargetSpec,
    };

    use crate::ownership::tracking_markers;

    const ID: &str = "kvmirror-controller";

    fn deleting_intent(store: &MemoryStore, policy: DeletionPolicy) -> Intent {
        let mut i = Intent::new(
            "platform",
            "db-sync",
            IntentSpec {
                source: SourceSpec::new(ResourceKind::Secret, "db-credentials"),
                targets: vec![TargetSpec::new("backend"), TargetSpec::new("jobs")],
                sync_policy: None,
                deletion_policy: policy,
            },
        );
        i.metadata.add_finalizer(FINALIZER);
        store.create_intent(&i).unwrap();
        store.delete_intent(&i.key()).unwrap().expect("held by finalizer")
    }

    fn put_target(store: &MemoryStore, intent: &Intent, ns: &str, managed: bool) {
        let mut obj =
            KvObject::new(ResourceKind::Secret, ns, "db-credentials", bundle([("a", "1")]));
        if managed {
            obj.metadata.annotations = tracking_markers(intent, ID, "x", Utc::now());
        }
        store.put_object(&obj).unwrap();
    }

    #[test]
    fn delete_policy_removes_only_managed_targets() {
        let store = MemoryStore::with_namespaces(["platform", "backend", "jobs"]);
        let intent = deleting_intent(&store, DeletionPolicy::Delete);
        put_target(&store, &intent, "backend", true);
        put_target(&store, &intent, "jobs", false);

        let out = handle_deletion(&store, &intent, ID, &Cancellation::new()).expect("delete");
        assert_eq!(
            out,
            DeletionOutcome::Deleted {
                removed: vec![ObjectKey::new("backend", "db-credentials")]
            }
        );
        assert!(store
            .get_object(ResourceKind::Secret, &ObjectKey::new("jobs", "db-credentials"))
            .is_ok());
        assert!(store.get_intent(&intent.key()).unwrap_err().is_not_found());
    }

    #[test]
    fn orphan_policy_keeps_targets() {
        let store = MemoryStore::with_namespaces(["platform", "backend", "jobs"]);
        let intent = deleting_intent(&store, DeletionPolicy::Orphan);
        put_target(&store, &intent, "backend", true);

        let out = handle_deletion(&store, &intent, ID, &Cancellation::new()).expect("orphan");
        assert_eq!(out, DeletionOutcome::Orphaned);
        assert!(store
            .get_object(ResourceKind::Secret, &ObjectKey::new("backend", "db-credentials"))
            .is_ok());
        assert!(store.list_all_intents().unwrap().is_empty());
    }

    #[test]
    fn missing_targets_are_skipped() {
        let store = MemoryStore::with_namespaces(["platform", "backend", "jobs"]);
        let intent = deleting_intent(&store, DeletionPolicy::Delete);
        let out = handle_deletion(&store, &intent, ID, &Cancellation::new()).expect("delete");
        assert_eq!(out, DeletionOutcome::Deleted { removed: vec![] });
    }

    #[test]
    fn failed_delete_keeps_finalizer() {
        let store = MemoryStore::with_namespaces(["platform", "backend", "jobs"]);
        let intent = deleting_intent(&store, DeletionPolicy::Delete);
        put_target(&store, &intent, "backend", true);
        store.fail_writes_in("backend");

        assert!(handle_deletion(&store, &intent, ID, &Cancellation::new()).is_err());
        let still = store.get_intent(&intent.key()).expect("intent kept");
        assert!(still.has_finalizer());
    }

    #[test]
    fn no_finalizer_is_a_noop() {
        let store = MemoryStore::with_namespaces(["platform"]);
        let mut intent = Intent::new(
            "platform",
            "x",
            IntentSpec {
                source: SourceSpec::new(ResourceKind::ConfigMap, "cfg"),
                targets: vec![TargetSpec::new("backend")],
                sync_policy: None,
                deletion_policy: DeletionPolicy::Delete,
            },
        );
        intent.metadata.finalizers.clear();
        let out = handle_deletion(&store, &intent, ID, &Cancellation::new()).expect("noop");
        assert_eq!(out, DeletionOutcome::NoFinalizer);
    }
}
