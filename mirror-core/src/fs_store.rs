//! YAML-on-disk object store.
//!
//! # Storage layout
//!
//! ```text
//! ~/.kvmirror/
//!   namespaces/
//!     <namespace>/
//!       intents/<name>.yaml      (mode 0600)
//!       secrets/<name>.yaml
//!       configmaps/<name>.yaml
//! ```
//!
//! A namespace exists when its directory exists. Writes go to a `.yaml.tmp`
//! sibling, get `chmod 0600`, then `rename` over the target.
//!
//! Read-compare-write sequences are serialized by an in-process lock. Two
//! processes writing the same file can still race; the daemon is the only
//! long-lived writer.
//!
//! # API pattern
//!
//! - `FsStore::at(home)`: explicit home; used in tests with `TempDir`
//! - `FsStore::open()`: derives home from `dirs::home_dir()`

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{io_err, StoreError};
use crate::store::{
    admit_intent_apply, admit_intent_create, admit_intent_delete, admit_intent_update,
    admit_object_create, admit_object_put, admit_object_update, admit_status_update, IntentWrite,
    validate_key, validate_namespace, ObjectStore, StoreAdmin, WatchEvent, WatchedKind,
    INTENT_KIND,
};
use crate::types::{Intent, IntentKey, KvObject, Namespace, ObjectKey, ResourceKind};

const INTENTS_DIR: &str = "intents";

#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsStore {
    /// Store rooted at `<home>/.kvmirror`.
    pub fn at(home: &Path) -> Self {
        Self {
            root: home.join(".kvmirror"),
            write_lock: Mutex::new(()),
        }
    }

    pub fn open() -> Result<Self, StoreError> {
        Ok(Self::at(&home()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/namespaces`; the directory the daemon watches.
    pub fn namespaces_dir(&self) -> PathBuf {
        self.root.join("namespaces")
    }

    /// Where `key` lives on disk. Does not validate the key; every read and
    /// write goes through the checked variants below.
    pub fn intent_path(&self, key: &IntentKey) -> PathBuf {
        self.namespaces_dir()
            .join(&key.namespace.0)
            .join(INTENTS_DIR)
            .join(format!("{}.yaml", key.name))
    }

    pub fn object_path(&self, kind: ResourceKind, key: &ObjectKey) -> PathBuf {
        self.namespaces_dir()
            .join(&key.namespace.0)
            .join(kind.dir_name())
            .join(format!("{}.yaml", key.name))
    }

    fn namespace_dir(&self, namespace: &Namespace) -> Result<PathBuf, StoreError> {
        validate_namespace(namespace)?;
        Ok(self.namespaces_dir().join(&namespace.0))
    }

    fn checked_intent_path(&self, key: &IntentKey) -> Result<PathBuf, StoreError> {
        validate_key(INTENT_KIND, key)?;
        Ok(self.intent_path(key))
    }

    fn checked_object_path(&self, kind: ResourceKind, key: &ObjectKey) -> Result<PathBuf, StoreError> {
        validate_key(kind.as_str(), key)?;
        Ok(self.object_path(kind, key))
    }

    /// Map a changed file under [`FsStore::namespaces_dir`] to a watch event.
    ///
    /// Returns `None` for temp files, directories and anything outside the
    /// layout above.
    pub fn event_for_path(&self, path: &Path) -> Option<WatchEvent> {
        let rel = path.strip_prefix(self.namespaces_dir()).ok()?;
        let mut parts = rel.iter().map(|c| c.to_str());
        let (Some(Some(ns)), Some(Some(dir)), Some(Some(file)), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return None;
        };
        let name = file.strip_suffix(".yaml")?;
        if name.is_empty() {
            return None;
        }
        let kind = if dir == INTENTS_DIR {
            WatchedKind::Intent
        } else {
            WatchedKind::Object(ResourceKind::from_dir_name(dir)?)
        };
        Some(WatchEvent {
            kind,
            key: ObjectKey::new(ns, name),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn require_namespace(&self, namespace: &Namespace) -> Result<(), StoreError> {
        if self.namespace_dir(namespace)?.is_dir() {
            Ok(())
        } else {
            Err(StoreError::NamespaceNotFound(namespace.clone()))
        }
    }

    fn read_intent(&self, key: &IntentKey) -> Result<Option<Intent>, StoreError> {
        read_yaml(&self.checked_intent_path(key)?)
    }

    fn read_object(&self, kind: ResourceKind, key: &ObjectKey) -> Result<Option<KvObject>, StoreError> {
        read_yaml(&self.checked_object_path(kind, key)?)
    }

    fn store_intent(&self, write: IntentWrite) -> Result<Intent, StoreError> {
        match write {
            IntentWrite::Store(intent) => {
                write_yaml(&self.checked_intent_path(&intent.key())?, &intent)?;
                Ok(intent)
            }
            IntentWrite::Remove(intent) => {
                remove_file(&self.checked_intent_path(&intent.key())?)?;
                Ok(intent)
            }
        }
    }
}

impl ObjectStore for FsStore {
    fn get_intent(&self, key: &IntentKey) -> Result<Intent, StoreError> {
        self.read_intent(key)?
            .ok_or_else(|| StoreError::not_found(INTENT_KIND, key))
    }

    fn list_intents(&self, namespace: &Namespace) -> Result<Vec<Intent>, StoreError> {
        list_yaml(&self.namespace_dir(namespace)?.join(INTENTS_DIR))
    }

    fn list_all_intents(&self) -> Result<Vec<Intent>, StoreError> {
        let mut all = Vec::new();
        for namespace in self.list_namespaces()? {
            all.extend(self.list_intents(&namespace)?);
        }
        Ok(all)
    }

    fn update_intent(&self, intent: &Intent) -> Result<Intent, StoreError> {
        let _guard = self.lock();
        let key = intent.key();
        let stored = self.get_intent(&key)?;
        let write = admit_intent_update(&stored, intent)?;
        self.store_intent(write)
    }

    fn update_intent_status(&self, intent: &Intent) -> Result<Intent, StoreError> {
        let _guard = self.lock();
        let stored = self.get_intent(&intent.key())?;
        let next = admit_status_update(&stored, intent)?;
        self.store_intent(IntentWrite::Store(next))
    }

    fn get_object(&self, kind: ResourceKind, key: &ObjectKey) -> Result<KvObject, StoreError> {
        self.read_object(kind, key)?
            .ok_or_else(|| StoreError::not_found(kind.as_str(), key))
    }

    fn list_objects(
        &self,
        kind: ResourceKind,
        namespace: &Namespace,
    ) -> Result<Vec<KvObject>, StoreError> {
        list_yaml(&self.namespace_dir(namespace)?.join(kind.dir_name()))
    }

    fn create_object(&self, object: &KvObject) -> Result<KvObject, StoreError> {
        let _guard = self.lock();
        let key = object.key();
        self.require_namespace(&key.namespace)?;
        if self.read_object(object.kind, &key)?.is_some() {
            return Err(StoreError::AlreadyExists {
                kind: object.kind.to_string(),
                key,
            });
        }
        let next = admit_object_create(object);
        write_yaml(&self.checked_object_path(object.kind, &key)?, &next)?;
        Ok(next)
    }

    fn update_object(&self, object: &KvObject) -> Result<KvObject, StoreError> {
        let _guard = self.lock();
        let key = object.key();
        let stored = self.get_object(object.kind, &key)?;
        let next = admit_object_update(&stored, object)?;
        write_yaml(&self.checked_object_path(object.kind, &key)?, &next)?;
        Ok(next)
    }

    fn delete_object(&self, kind: ResourceKind, key: &ObjectKey) -> Result<(), StoreError> {
        let _guard = self.lock();
        let path = self.checked_object_path(kind, key)?;
        if !path.exists() {
            return Err(StoreError::not_found(kind.as_str(), key));
        }
        remove_file(&path)
    }

    fn namespace_exists(&self, namespace: &Namespace) -> Result<bool, StoreError> {
        Ok(self.namespace_dir(namespace)?.is_dir())
    }
}

impl StoreAdmin for FsStore {
    fn create_namespace(&self, namespace: &Namespace) -> Result<(), StoreError> {
        ensure_dir(&self.root)?;
        ensure_dir(&self.namespaces_dir())?;
        ensure_dir(&self.namespace_dir(namespace)?)
    }

    fn list_namespaces(&self) -> Result<Vec<Namespace>, StoreError> {
        let dir = self.namespaces_dir();
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut names: Vec<Namespace> = std::fs::read_dir(&dir)
            .map_err(|e| io_err(&dir, e))?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| Namespace::from(e.file_name().to_string_lossy().into_owned()))
            .collect();
        names.sort();
        Ok(names)
    }

    fn create_intent(&self, intent: &Intent) -> Result<Intent, StoreError> {
        let _guard = self.lock();
        let key = intent.key();
        self.require_namespace(&key.namespace)?;
        if self.read_intent(&key)?.is_some() {
            return Err(StoreError::AlreadyExists {
                kind: INTENT_KIND.to_string(),
                key,
            });
        }
        let next = admit_intent_create(intent)?;
        self.store_intent(IntentWrite::Store(next))
    }

    fn apply_intent(&self, intent: &Intent) -> Result<Intent, StoreError> {
        let _guard = self.lock();
        let key = intent.key();
        self.require_namespace(&key.namespace)?;
        let stored = self.read_intent(&key)?;
        let next = admit_intent_apply(stored.as_ref(), intent)?;
        self.store_intent(IntentWrite::Store(next))
    }

    fn delete_intent(&self, key: &IntentKey) -> Result<Option<Intent>, StoreError> {
        let _guard = self.lock();
        let stored = self.get_intent(key)?;
        match admit_intent_delete(&stored, Utc::now()) {
            write @ IntentWrite::Store(_) => self.store_intent(write).map(Some),
            write @ IntentWrite::Remove(_) => self.store_intent(write).map(|_| None),
        }
    }

    fn put_object(&self, object: &KvObject) -> Result<KvObject, StoreError> {
        let _guard = self.lock();
        let key = object.key();
        self.require_namespace(&key.namespace)?;
        let stored = self.read_object(object.kind, &key)?;
        let next = admit_object_put(stored.as_ref(), object);
        write_yaml(&self.checked_object_path(object.kind, &key)?, &next)?;
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents)
        .map(Some)
        .map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Load every `*.yaml` in `dir`, sorted by file name. A missing dir is empty.
fn list_yaml<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, StoreError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| io_err(dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".yaml"))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        if let Some(item) = read_yaml(&entry.path())? {
            out.push(item);
        }
    }
    Ok(out)
}

/// serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let yaml = serde_yaml::to_string(value)?;
    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

fn remove_file(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path, e)),
    }
}

fn ensure_dir(dir: &Path) -> Result<(), StoreError> {
    if dir.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    set_dir_permissions(dir)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
