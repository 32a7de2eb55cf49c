//! Maps changed objects back to the intents that must be reconciled.
//!
//! A managed target names its owner through markers; anything else may be a
//! source, found by scanning intents in its namespace.

use std::collections::BTreeSet;

use mirror_core::{
    Intent, IntentKey, KvObject, Namespace, ObjectKey, ObjectStore, ResourceKind, WatchEvent,
    WatchedKind,
};

use crate::error::SyncError;
use crate::ownership::{is_managed_by, owning_intent};

/// Intents affected by a change to `object`.
pub fn intents_for_object(
    store: &dyn ObjectStore,
    object: &KvObject,
    identity: &str,
) -> Result<Vec<IntentKey>, SyncError> {
    if is_managed_by(&object.metadata, identity) {
        return Ok(owning_intent(&object.metadata).into_iter().collect());
    }
    intents_for_source(store, object.kind, &object.key())
}

/// Intents in the object's namespace whose declared source is `kind`/`key`.
pub fn intents_for_source(
    store: &dyn ObjectStore,
    kind: ResourceKind,
    key: &ObjectKey,
) -> Result<Vec<IntentKey>, SyncError> {
    let keys = store
        .list_intents(&key.namespace)?
        .iter()
        .filter(|i| sources_from(i, kind, &key.name))
        .map(Intent::key)
        .collect::<BTreeSet<_>>();
    Ok(keys.into_iter().collect())
}

/// Intents affected by an object that no longer exists.
///
/// With no markers left to read, this scans for intents using it as a source
/// and for intents declaring it as a target.
pub fn intents_for_missing_object(
    store: &dyn ObjectStore,
    kind: ResourceKind,
    key: &ObjectKey,
) -> Result<Vec<IntentKey>, SyncError> {
    let mut keys: BTreeSet<IntentKey> = intents_for_source(store, kind, key)?.into_iter().collect();
    for intent in store.list_all_intents()? {
        if intent.spec.source.resource_kind() != Some(kind) {
            continue;
        }
        let declares = intent
            .spec
            .targets
            .iter()
            .any(|t| t.key(&intent.spec.source.name) == *key);
        if declares {
            keys.insert(intent.key());
        }
    }
    Ok(keys.into_iter().collect())
}

/// Reconcile requests for a watch event. Events carry no payload, so the
/// object is re-read to decide which branch applies.
pub fn requests_for_event(
    store: &dyn ObjectStore,
    event: &WatchEvent,
    identity: &str,
) -> Result<Vec<IntentKey>, SyncError> {
    match event.kind {
        WatchedKind::Intent => Ok(vec![event.key.clone()]),
        WatchedKind::Object(kind) => match store.get_object(kind, &event.key) {
            Ok(object) => intents_for_object(store, &object, identity),
            Err(e) if e.is_not_found() => intents_for_missing_object(store, kind, &event.key),
            Err(e) => Err(e.into()),
        },
    }
}

/// Every intent in every namespace; used for periodic resyncs.
pub fn all_intents(store: &dyn ObjectStore) -> Result<Vec<IntentKey>, SyncError> {
    Ok(store.list_all_intents()?.iter().map(Intent::key).collect())
}

/// Intents in one namespace.
pub fn intents_in(store: &dyn ObjectStore, namespace: &Namespace) -> Result<Vec<IntentKey>, SyncError> {
    Ok(store.list_intents(namespace)?.iter().map(Intent::key).collect())
}

fn sources_from(intent: &Intent, kind: ResourceKind, name: &str) -> bool {
    intent.spec.source.kind == kind.as_str() && intent.spec.source.name == name
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mirror_core::{bundle, IntentSpec, MemoryStore, SourceSpec, StoreAdmin, TargetSpec};

    use crate::ownership::tracking_markers;

    const ID: &str = "kvmirror-controller";

    fn intent(ns: &str, name: &str, kind: ResourceKind, source: &str, target_ns: &str) -> Intent {
        Intent::new(
            ns,
            name,
            IntentSpec {
                source: SourceSpec::new(kind, source),
                targets: vec![TargetSpec::new(target_ns)],
                sync_policy: None,
                deletion_policy: Default::default(),
            },
        )
    }

    fn setup() -> MemoryStore {
        let store = MemoryStore::with_namespaces(["platform", "backend"]);
        store
            .create_intent(&intent("platform", "db-sync", ResourceKind::Secret, "db-credentials", "backend"))
            .unwrap();
        store
            .create_intent(&intent("platform", "db-sync-2", ResourceKind::Secret, "db-credentials", "jobs"))
            .unwrap();
        store
            .create_intent(&intent("platform", "cfg-sync", ResourceKind::ConfigMap, "db-credentials", "backend"))
            .unwrap();
        store
    }

    #[test]
    fn source_change_maps_to_every_referencing_intent() {
        let store = setup();
        let source = KvObject::new(ResourceKind::Secret, "platform", "db-credentials", bundle([("a", "1")]));
        let keys = intents_for_object(&store, &source, ID).unwrap();
        assert_eq!(
            keys,
            vec![
                IntentKey::new("platform", "db-sync"),
                IntentKey::new("platform", "db-sync-2"),
            ]
        );
    }

    #[test]
    fn managed_target_maps_to_its_owner_only() {
        let store = setup();
        let owner = intent("platform", "db-sync", ResourceKind::Secret, "db-credentials", "backend");
        let mut target = KvObject::new(ResourceKind::Secret, "backend", "db-credentials", bundle([("a", "1")]));
        target.metadata.annotations = tracking_markers(&owner, ID, "x", Utc::now());
        let keys = intents_for_object(&store, &target, ID).unwrap();
        assert_eq!(keys, vec![IntentKey::new("platform", "db-sync")]);
    }

    #[test]
    fn managed_target_without_owner_markers_maps_to_nothing() {
        let store = setup();
        let mut target = KvObject::new(ResourceKind::Secret, "backend", "x", bundle([("a", "1")]));
        target
            .metadata
            .annotations
            .insert(mirror_core::markers::MANAGED_BY.into(), ID.into());
        assert!(intents_for_object(&store, &target, ID).unwrap().is_empty());
    }

    #[test]
    fn unrelated_object_maps_to_nothing() {
        let store = setup();
        let other = KvObject::new(ResourceKind::Secret, "platform", "unrelated", bundle([("a", "1")]));
        assert!(intents_for_object(&store, &other, ID).unwrap().is_empty());
    }

    #[test]
    fn intent_event_maps_to_itself() {
        let store = setup();
        let event = WatchEvent {
            kind: WatchedKind::Intent,
            key: IntentKey::new("platform", "anything"),
        };
        assert_eq!(
            requests_for_event(&store, &event, ID).unwrap(),
            vec![IntentKey::new("platform", "anything")]
        );
    }

    #[test]
    fn deleted_target_is_found_by_declared_targets() {
        let store = setup();
        let event = WatchEvent {
            kind: WatchedKind::Object(ResourceKind::Secret),
            key: ObjectKey::new("backend", "db-credentials"),
        };
        assert_eq!(
            requests_for_event(&store, &event, ID).unwrap(),
            vec![IntentKey::new("platform", "db-sync")]
        );
    }

    #[test]
    fn deleted_source_is_found_by_source_scan() {
        let store = setup();
        let event = WatchEvent {
            kind: WatchedKind::Object(ResourceKind::ConfigMap),
            key: ObjectKey::new("platform", "db-credentials"),
        };
        assert_eq!(
            requests_for_event(&store, &event, ID).unwrap(),
            vec![IntentKey::new("platform", "cfg-sync")]
        );
    }
}
