//! Object store abstraction.
//!
//! [`ObjectStore`] is everything the reconciliation engine needs: typed reads,
//! optimistic writes and namespace listing. [`StoreAdmin`] holds the
//! operator-side writes (creating namespaces, applying and deleting intents)
//! that the engine itself never performs.
//!
//! Both bundled implementations ([`crate::MemoryStore`], [`crate::FsStore`])
//! share the admission rules below so their semantics cannot drift apart:
//!
//! - every write bumps `resource_version`; writes carrying a stale version fail
//!   with [`StoreError::Conflict`]
//! - an intent spec change bumps `generation`
//! - deleting an intent that still has finalizers only stamps
//!   `deletion_timestamp`; the intent disappears once an update clears the
//!   last finalizer
//! - objects can only be created in namespaces that exist

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::types::{
    validate_name, Intent, IntentKey, IntentStatus, KvObject, Namespace, ObjectKey, ResourceKind,
};

pub(crate) const INTENT_KIND: &str = "Intent";

/// Kind of a watched object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchedKind {
    Intent,
    Object(ResourceKind),
}

/// A change notification: something at `key` of `kind` was written or removed.
///
/// Events carry no payload; consumers re-read the live object, which keeps the
/// engine level-triggered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchEvent {
    pub kind: WatchedKind,
    pub key: ObjectKey,
}

/// Reads and optimistic writes used by the reconciliation engine.
pub trait ObjectStore: Send + Sync {
    fn get_intent(&self, key: &IntentKey) -> Result<Intent, StoreError>;

    fn list_intents(&self, namespace: &Namespace) -> Result<Vec<Intent>, StoreError>;

    fn list_all_intents(&self) -> Result<Vec<Intent>, StoreError>;

    /// Persist metadata (finalizers, annotations) and spec. Status is untouched.
    fn update_intent(&self, intent: &Intent) -> Result<Intent, StoreError>;

    /// Persist status only.
    fn update_intent_status(&self, intent: &Intent) -> Result<Intent, StoreError>;

    fn get_object(&self, kind: ResourceKind, key: &ObjectKey) -> Result<KvObject, StoreError>;

    fn list_objects(
        &self,
        kind: ResourceKind,
        namespace: &Namespace,
    ) -> Result<Vec<KvObject>, StoreError>;

    fn create_object(&self, object: &KvObject) -> Result<KvObject, StoreError>;

    fn update_object(&self, object: &KvObject) -> Result<KvObject, StoreError>;

    fn delete_object(&self, kind: ResourceKind, key: &ObjectKey) -> Result<(), StoreError>;

    fn namespace_exists(&self, namespace: &Namespace) -> Result<bool, StoreError>;
}

/// Operator-side writes: the things a human or automation does.
pub trait StoreAdmin: ObjectStore {
    fn create_namespace(&self, namespace: &Namespace) -> Result<(), StoreError>;

    fn list_namespaces(&self) -> Result<Vec<Namespace>, StoreError>;

    fn create_intent(&self, intent: &Intent) -> Result<Intent, StoreError>;

    /// Create, or replace spec and annotations of an existing intent
    /// regardless of its resource version. Finalizers and status are kept.
    fn apply_intent(&self, intent: &Intent) -> Result<Intent, StoreError>;

    /// Request removal. Returns the intent if it is now waiting on finalizers,
    /// `None` if it was removed outright.
    fn delete_intent(&self, key: &IntentKey) -> Result<Option<Intent>, StoreError>;

    /// Create or overwrite a key/value object regardless of its version.
    fn put_object(&self, object: &KvObject) -> Result<KvObject, StoreError>;
}

// ---------------------------------------------------------------------------
// Shared admission rules
// ---------------------------------------------------------------------------

/// What the store must do with an intent after admitting a write.
#[derive(Debug)]
pub(crate) enum IntentWrite {
    Store(Intent),
    Remove(Intent),
}

fn check_version(kind: &str, key: &ObjectKey, stored: u64, given: u64) -> Result<(), StoreError> {
    if stored != given {
        return Err(StoreError::Conflict {
            kind: kind.to_string(),
            key: key.clone(),
            stored,
            given,
        });
    }
    Ok(())
}

/// Both segments of `key` must be usable as single path components.
pub(crate) fn validate_key(kind: &str, key: &ObjectKey) -> Result<(), StoreError> {
    validate_name("namespace", &key.namespace.0)
        .and_then(|()| validate_name("name", &key.name))
        .map_err(|message| StoreError::Invalid {
            kind: kind.to_string(),
            key: key.clone(),
            message,
        })
}

pub(crate) fn validate_namespace(namespace: &Namespace) -> Result<(), StoreError> {
    validate_name("namespace", &namespace.0).map_err(|message| StoreError::InvalidNamespace {
        namespace: namespace.clone(),
        message,
    })
}

fn validate_intent(intent: &Intent) -> Result<(), StoreError> {
    validate_key(INTENT_KIND, &intent.key())?;
    intent.spec.validate().map_err(|message| StoreError::Invalid {
        kind: INTENT_KIND.to_string(),
        key: intent.key(),
        message,
    })
}

/// Status is controller-owned; whatever the manifest carried is dropped.
pub(crate) fn admit_intent_create(incoming: &Intent) -> Result<Intent, StoreError> {
    validate_intent(incoming)?;
    let mut next = incoming.clone();
    next.status = IntentStatus::default();
    next.metadata.resource_version = 1;
    next.metadata.generation = 1;
    next.metadata.deletion_timestamp = None;
    Ok(next)
}

pub(crate) fn admit_intent_apply(
    stored: Option<&Intent>,
    incoming: &Intent,
) -> Result<Intent, StoreError> {
    let Some(stored) = stored else {
        return admit_intent_create(incoming);
    };
    validate_intent(incoming)?;
    let mut next = stored.clone();
    next.metadata.annotations = incoming.metadata.annotations.clone();
    if next.spec != incoming.spec {
        next.spec = incoming.spec.clone();
        next.metadata.generation += 1;
    }
    next.metadata.resource_version += 1;
    Ok(next)
}

pub(crate) fn admit_intent_update(
    stored: &Intent,
    incoming: &Intent,
) -> Result<IntentWrite, StoreError> {
    check_version(
        INTENT_KIND,
        &stored.key(),
        stored.metadata.resource_version,
        incoming.metadata.resource_version,
    )?;
    validate_intent(incoming)?;
    let mut next = stored.clone();
    next.metadata.annotations = incoming.metadata.annotations.clone();
    next.metadata.finalizers = incoming.metadata.finalizers.clone();
    if next.spec != incoming.spec {
        next.spec = incoming.spec.clone();
        next.metadata.generation += 1;
    }
    next.metadata.resource_version += 1;
    if next.metadata.is_deleting() && next.metadata.finalizers.is_empty() {
        return Ok(IntentWrite::Remove(next));
    }
    Ok(IntentWrite::Store(next))
}

pub(crate) fn admit_status_update(stored: &Intent, incoming: &Intent) -> Result<Intent, StoreError> {
    check_version(
        INTENT_KIND,
        &stored.key(),
        stored.metadata.resource_version,
        incoming.metadata.resource_version,
    )?;
    let mut next = stored.clone();
    next.status = incoming.status.clone();
    next.metadata.resource_version += 1;
    Ok(next)
}

pub(crate) fn admit_intent_delete(stored: &Intent, now: DateTime<Utc>) -> IntentWrite {
    if stored.metadata.finalizers.is_empty() {
        return IntentWrite::Remove(stored.clone());
    }
    let mut next = stored.clone();
    if next.metadata.deletion_timestamp.is_none() {
        next.metadata.deletion_timestamp = Some(now);
        next.metadata.resource_version += 1;
    }
    IntentWrite::Store(next)
}

pub(crate) fn admit_object_create(incoming: &KvObject) -> KvObject {
    let mut next = incoming.clone();
    next.metadata.resource_version = 1;
    next.metadata.deletion_timestamp = None;
    if next.kind == ResourceKind::ConfigMap {
        next.type_tag = None;
    }
    next
}

pub(crate) fn admit_object_update(
    stored: &KvObject,
    incoming: &KvObject,
) -> Result<KvObject, StoreError> {
    check_version(
        incoming.kind.as_str(),
        &stored.key(),
        stored.metadata.resource_version,
        incoming.metadata.resource_version,
    )?;
    let mut next = incoming.clone();
    next.metadata.resource_version = stored.metadata.resource_version + 1;
    Ok(next)
}

pub(crate) fn admit_object_put(stored: Option<&KvObject>, incoming: &KvObject) -> KvObject {
    match stored {
        None => admit_object_create(incoming),
        Some(stored) => {
            let mut next = incoming.clone();
            next.metadata.resource_version = stored.metadata.resource_version + 1;
            next
        }
    }
}
