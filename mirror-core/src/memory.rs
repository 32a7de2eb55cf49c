//! In-process object store.
//!
//! Used by tests and by embedders that bring their own persistence. Besides
//! the [`ObjectStore`] contract it counts object writes and can inject
//! conflicts or namespace-wide write failures.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use crate::error::StoreError;
use crate::store::{
    admit_intent_apply, admit_intent_create, admit_intent_delete, admit_intent_update,
    admit_object_create, admit_object_put, admit_object_update, admit_status_update, IntentWrite,
    ObjectStore, StoreAdmin, INTENT_KIND,
};
use crate::types::{Intent, IntentKey, KvObject, Namespace, ObjectKey, ResourceKind};

#[derive(Debug, Default)]
struct MemoryState {
    namespaces: BTreeSet<Namespace>,
    intents: BTreeMap<IntentKey, Intent>,
    objects: BTreeMap<(ResourceKind, ObjectKey), KvObject>,
    object_writes: usize,
    pending_conflicts: usize,
    failing_namespaces: BTreeSet<Namespace>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with the given namespaces.
    pub fn with_namespaces<I, N>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Namespace>,
    {
        let store = Self::default();
        {
            let mut state = store.lock();
            state
                .namespaces
                .extend(namespaces.into_iter().map(Into::into));
        }
        store
    }

    /// Number of successful create/update/delete calls on key/value objects.
    pub fn object_writes(&self) -> usize {
        self.lock().object_writes
    }

    /// Make the next `n` optimistic updates fail with a conflict.
    pub fn inject_conflicts(&self, n: usize) {
        self.lock().pending_conflicts = n;
    }

    /// Fail every object write into `namespace` with [`StoreError::Unavailable`].
    pub fn fail_writes_in(&self, namespace: impl Into<Namespace>) {
        self.lock().failing_namespaces.insert(namespace.into());
    }

    pub fn heal_writes_in(&self, namespace: &Namespace) {
        self.lock().failing_namespaces.remove(namespace);
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MemoryState {
    fn take_conflict(&mut self, kind: &str, key: &ObjectKey, stored: u64) -> Result<(), StoreError> {
        if self.pending_conflicts == 0 {
            return Ok(());
        }
        self.pending_conflicts -= 1;
        Err(StoreError::Conflict {
            kind: kind.to_string(),
            key: key.clone(),
            stored: stored + 1,
            given: stored,
        })
    }

    fn check_writable(&self, key: &ObjectKey) -> Result<(), StoreError> {
        if self.failing_namespaces.contains(&key.namespace) {
            return Err(StoreError::Unavailable(format!(
                "writes to namespace '{}' are failing",
                key.namespace
            )));
        }
        Ok(())
    }

    fn apply_intent_write(&mut self, write: IntentWrite) -> Intent {
        match write {
            IntentWrite::Store(intent) => {
                self.intents.insert(intent.key(), intent.clone());
                intent
            }
            IntentWrite::Remove(intent) => {
                self.intents.remove(&intent.key());
                intent
            }
        }
    }
}

impl ObjectStore for MemoryStore {
    fn get_intent(&self, key: &IntentKey) -> Result<Intent, StoreError> {
        self.lock()
            .intents
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(INTENT_KIND, key))
    }

    fn list_intents(&self, namespace: &Namespace) -> Result<Vec<Intent>, StoreError> {
        Ok(self
            .lock()
            .intents
            .values()
            .filter(|i| &i.metadata.namespace == namespace)
            .cloned()
            .collect())
    }

    fn list_all_intents(&self) -> Result<Vec<Intent>, StoreError> {
        Ok(self.lock().intents.values().cloned().collect())
    }

    fn update_intent(&self, intent: &Intent) -> Result<Intent, StoreError> {
        let mut state = self.lock();
        let key = intent.key();
        let stored = state
            .intents
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(INTENT_KIND, &key))?;
        state.take_conflict(INTENT_KIND, &key, stored.metadata.resource_version)?;
        let write = admit_intent_update(&stored, intent)?;
        Ok(state.apply_intent_write(write))
    }

    fn update_intent_status(&self, intent: &Intent) -> Result<Intent, StoreError> {
        let mut state = self.lock();
        let key = intent.key();
        let stored = state
            .intents
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(INTENT_KIND, &key))?;
        state.take_conflict(INTENT_KIND, &key, stored.metadata.resource_version)?;
        let next = admit_status_update(&stored, intent)?;
        state.intents.insert(key, next.clone());
        Ok(next)
    }

    fn get_object(&self, kind: ResourceKind, key: &ObjectKey) -> Result<KvObject, StoreError> {
        self.lock()
            .objects
            .get(&(kind, key.clone()))
            .cloned()
            .ok_or_else(|| StoreError::not_found(kind.as_str(), key))
    }

    fn list_objects(
        &self,
        kind: ResourceKind,
        namespace: &Namespace,
    ) -> Result<Vec<KvObject>, StoreError> {
        Ok(self
            .lock()
            .objects
            .iter()
            .filter(|((k, key), _)| *k == kind && &key.namespace == namespace)
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    fn create_object(&self, object: &KvObject) -> Result<KvObject, StoreError> {
        let mut state = self.lock();
        let key = object.key();
        state.check_writable(&key)?;
        if !state.namespaces.contains(&key.namespace) {
            return Err(StoreError::NamespaceNotFound(key.namespace));
        }
        let slot = (object.kind, key.clone());
        if state.objects.contains_key(&slot) {
            return Err(StoreError::AlreadyExists {
                kind: object.kind.to_string(),
                key,
            });
        }
        let next = admit_object_create(object);
        state.objects.insert(slot, next.clone());
        state.object_writes += 1;
        Ok(next)
    }

    fn update_object(&self, object: &KvObject) -> Result<KvObject, StoreError> {
        let mut state = self.lock();
        let key = object.key();
        state.check_writable(&key)?;
        let slot = (object.kind, key.clone());
        let stored = state
            .objects
            .get(&slot)
            .cloned()
            .ok_or_else(|| StoreError::not_found(object.kind.as_str(), &key))?;
        state.take_conflict(object.kind.as_str(), &key, stored.metadata.resource_version)?;
        let next = admit_object_update(&stored, object)?;
        state.objects.insert(slot, next.clone());
        state.object_writes += 1;
        Ok(next)
    }

    fn delete_object(&self, kind: ResourceKind, key: &ObjectKey) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.check_writable(key)?;
        match state.objects.remove(&(kind, key.clone())) {
            Some(_) => {
                state.object_writes += 1;
                Ok(())
            }
            None => Err(StoreError::not_found(kind.as_str(), key)),
        }
    }

    fn namespace_exists(&self, namespace: &Namespace) -> Result<bool, StoreError> {
        Ok(self.lock().namespaces.contains(namespace))
    }
}

impl StoreAdmin for MemoryStore {
    fn create_namespace(&self, namespace: &Namespace) -> Result<(), StoreError> {
        self.lock().namespaces.insert(namespace.clone());
        Ok(())
    }

    fn list_namespaces(&self) -> Result<Vec<Namespace>, StoreError> {
        Ok(self.lock().namespaces.iter().cloned().collect())
    }

    fn create_intent(&self, intent: &Intent) -> Result<Intent, StoreError> {
        let mut state = self.lock();
        let key = intent.key();
        if !state.namespaces.contains(&key.namespace) {
            return Err(StoreError::NamespaceNotFound(key.namespace));
        }
        if state.intents.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: INTENT_KIND.to_string(),
                key,
            });
        }
        let next = admit_intent_create(intent)?;
        state.intents.insert(key, next.clone());
        Ok(next)
    }

    fn apply_intent(&self, intent: &Intent) -> Result<Intent, StoreError> {
        let mut state = self.lock();
        let key = intent.key();
        if !state.namespaces.contains(&key.namespace) {
            return Err(StoreError::NamespaceNotFound(key.namespace));
        }
        let next = admit_intent_apply(state.intents.get(&key), intent)?;
        state.intents.insert(key, next.clone());
        Ok(next)
    }

    fn delete_intent(&self, key: &IntentKey) -> Result<Option<Intent>, StoreError> {
        let mut state = self.lock();
        let stored = state
            .intents
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(INTENT_KIND, key))?;
        match admit_intent_delete(&stored, Utc::now()) {
            IntentWrite::Store(intent) => {
                state.intents.insert(key.clone(), intent.clone());
                Ok(Some(intent))
            }
            IntentWrite::Remove(_) => {
                state.intents.remove(key);
                Ok(None)
            }
        }
    }

    fn put_object(&self, object: &KvObject) -> Result<KvObject, StoreError> {
        let mut state = self.lock();
        let key = object.key();
        if !state.namespaces.contains(&key.namespace) {
            return Err(StoreError::NamespaceNotFound(key.namespace));
        }
        let slot = (object.kind, key);
        let next = admit_object_put(state.objects.get(&slot), object);
        state.objects.insert(slot, next.clone());
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::FINALIZER;
    use crate::types::{bundle, IntentSpec, SourceSpec, TargetSpec};

    fn configmap(ns: &str, name: &str) -> KvObject {
        KvObject::new(ResourceKind::ConfigMap, ns, name, bundle([("k", "v")]))
    }

    fn intent(ns: &str, name: &str) -> Intent {
        Intent::new(
            ns,
            name,
            IntentSpec {
                source: SourceSpec::new(ResourceKind::ConfigMap, "app-config"),
                targets: vec![TargetSpec::new("backend")],
                sync_policy: None,
                deletion_policy: Default::default(),
            },
        )
    }

    #[test]
    fn create_requires_existing_namespace() {
        let store = MemoryStore::with_namespaces(["platform"]);
        let err = store.create_object(&configmap("missing", "a")).unwrap_err();
        assert!(matches!(err, StoreError::NamespaceNotFound(_)), "got: {err}");
        store.create_object(&configmap("platform", "a")).expect("create");
        assert_eq!(store.object_writes(), 1);
    }

    #[test]
    fn update_with_stale_version_conflicts() {
        let store = MemoryStore::with_namespaces(["platform"]);
        let created = store.create_object(&configmap("platform", "a")).expect("create");
        store.update_object(&created).expect("first update");
        let err = store.update_object(&created).unwrap_err();
        assert!(err.is_conflict(), "got: {err}");
    }

    #[test]
    fn injected_conflicts_are_consumed() {
        let store = MemoryStore::with_namespaces(["platform"]);
        let created = store.create_object(&configmap("platform", "a")).expect("create");
        store.inject_conflicts(1);
        assert!(store.update_object(&created).unwrap_err().is_conflict());
        store.update_object(&created).expect("second attempt succeeds");
    }

    #[test]
    fn failing_namespace_rejects_writes() {
        let store = MemoryStore::with_namespaces(["platform"]);
        store.fail_writes_in("platform");
        let err = store.create_object(&configmap("platform", "a")).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        store.heal_writes_in(&Namespace::from("platform"));
        store.create_object(&configmap("platform", "a")).expect("create");
    }

    #[test]
    fn intent_deletion_waits_for_finalizer() {
        let store = MemoryStore::with_namespaces(["platform"]);
        let mut i = intent("platform", "mirror");
        i.metadata.add_finalizer(FINALIZER);
        store.create_intent(&i).expect("create");

        let marked = store
            .delete_intent(&i.key())
            .expect("delete")
            .expect("still present");
        assert!(marked.metadata.is_deleting());

        let mut cleared = marked.clone();
        cleared.metadata.remove_finalizer(FINALIZER);
        store.update_intent(&cleared).expect("clear finalizer");
        assert!(store.get_intent(&i.key()).unwrap_err().is_not_found());
    }

    #[test]
    fn intent_without_finalizer_is_removed_immediately() {
        let store = MemoryStore::with_namespaces(["platform"]);
        let i = intent("platform", "mirror");
        store.create_intent(&i).expect("create");
        assert!(store.delete_intent(&i.key()).expect("delete").is_none());
        assert!(store.list_all_intents().expect("list").is_empty());
    }
}
