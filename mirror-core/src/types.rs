//! Domain types for the kvmirror object model.
//!
//! Every persisted type serializes with camelCase field names via serde +
//! serde_yaml. Bundle values are raw bytes and travel as base64 strings.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::markers;

/// Key/value payload of a source or target object.
pub type Bundle = BTreeMap<String, Vec<u8>>;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed namespace name. Intents, sources and targets all live in one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(pub String);

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Namespace {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Namespace {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// `<namespace>/<name>` identity of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: Namespace,
    pub name: String,
}

/// Intents are addressed the same way as any other object.
pub type IntentKey = ObjectKey;

impl ObjectKey {
    pub fn new(namespace: impl Into<Namespace>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ObjectKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                validate_name("namespace", ns)?;
                validate_name("name", name)?;
                Ok(ObjectKey::new(ns, name))
            }
            _ => Err(format!("expected '<namespace>/<name>', got '{s}'")),
        }
    }
}

/// Namespaces and names become single path segments in the file store.
pub fn validate_name(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} is required"));
    }
    if value == "." || value == ".." || value.contains(['/', '\\', '\0']) {
        return Err(format!(
            "{field} '{}' must not be '.', '..' or contain '/', '\\' or NUL",
            value.escape_default()
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The two synchronizable resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Opaque key/value bundle that also carries a type tag.
    Secret,
    /// Opaque key/value bundle.
    ConfigMap,
}

impl ResourceKind {
    pub fn all() -> &'static [ResourceKind] {
        &[ResourceKind::Secret, ResourceKind::ConfigMap]
    }

    /// Directory name used by the filesystem store.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ResourceKind::Secret => "secrets",
            ResourceKind::ConfigMap => "configmaps",
        }
    }

    pub fn from_dir_name(dir: &str) -> Option<ResourceKind> {
        ResourceKind::all()
            .iter()
            .copied()
            .find(|kind| kind.dir_name() == dir)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Secret => "Secret",
            ResourceKind::ConfigMap => "ConfigMap",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "secret" => Ok(ResourceKind::Secret),
            "configmap" => Ok(ResourceKind::ConfigMap),
            other => Err(format!(
                "unknown resource kind '{other}'; expected: Secret, ConfigMap"
            )),
        }
    }
}

/// How source data is written into targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Target data equals the (filtered) source data exactly.
    #[default]
    Copy,
    /// Only keys chosen by the key selector are written.
    Selective,
    /// Source keys overwrite target keys; target-only keys survive.
    Merge,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Copy => write!(f, "copy"),
            SyncMode::Selective => write!(f, "selective"),
            SyncMode::Merge => write!(f, "merge"),
        }
    }
}

/// What happens to targets when their intent is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeletionPolicy {
    #[default]
    Orphan,
    Delete,
}

/// Tri-state condition value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Metadata shared by intents and key/value objects.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: Namespace,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    /// Set by the store when removal was requested while finalizers remained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// Optimistic-concurrency token, assigned by the store on every write.
    #[serde(default)]
    pub resource_version: u64,
    /// Bumped by the store whenever an intent's spec changes.
    #[serde(default)]
    pub generation: u64,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<Namespace>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Returns `true` if the finalizer was added.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Returns `true` if the finalizer was present and removed.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        self.finalizers.len() != before
    }
}

// ---------------------------------------------------------------------------
// Intent spec
// ---------------------------------------------------------------------------

/// The bundle to mirror. Always resolved in the intent's own namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Raw kind string; see [`SourceSpec::resource_kind`].
    pub kind: String,
    pub name: String,
}

impl SourceSpec {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            name: name.into(),
        }
    }

    /// `None` when the declared kind is not one of the supported kinds.
    pub fn resource_kind(&self) -> Option<ResourceKind> {
        match self.kind.as_str() {
            "Secret" => Some(ResourceKind::Secret),
            "ConfigMap" => Some(ResourceKind::ConfigMap),
            _ => None,
        }
    }
}

/// One destination. The namespace must already exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub namespace: Namespace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl TargetSpec {
    pub fn new(namespace: impl Into<Namespace>) -> Self {
        Self {
            namespace: namespace.into(),
            name: None,
        }
    }

    pub fn named(namespace: impl Into<Namespace>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: Some(name.into()),
        }
    }

    /// Override name, or the source name when no (non-empty) override is set.
    pub fn resolved_name<'a>(&'a self, source_name: &'a str) -> &'a str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => source_name,
        }
    }

    pub fn key(&self, source_name: &str) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.resolved_name(source_name))
    }
}

/// Include/exclude key lists. Exclude is applied after include.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeySelector {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncPolicy {
    #[serde(default)]
    pub mode: SyncMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<KeySelector>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentSpec {
    pub source: SourceSpec,
    pub targets: Vec<TargetSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_policy: Option<SyncPolicy>,
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
}

impl IntentSpec {
    /// Structural checks applied by the store on create/apply.
    pub fn validate(&self) -> Result<(), String> {
        validate_name("spec.source.name", &self.source.name)?;
        if self.targets.is_empty() {
            return Err("spec.targets must contain at least one target".to_string());
        }
        for (i, target) in self.targets.iter().enumerate() {
            validate_name(&format!("spec.targets[{i}].namespace"), &target.namespace.0)?;
            if let Some(name) = target.name.as_deref().filter(|n| !n.is_empty()) {
                validate_name(&format!("spec.targets[{i}].name"), name)?;
            }
        }
        Ok(())
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.sync_policy
            .as_ref()
            .map(|p| p.mode)
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Intent status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSyncStatus {
    pub namespace: Namespace,
    pub name: String,
    pub synced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synced_targets: Vec<TargetSyncStatus>,
    /// Time of the last pass in which every target synced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_checksum: String,
    #[serde(default)]
    pub observed_generation: u64,
}

/// A declared mirroring intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub metadata: ObjectMeta,
    pub spec: IntentSpec,
    #[serde(default)]
    pub status: IntentStatus,
}

impl Intent {
    pub fn new(namespace: impl Into<Namespace>, name: impl Into<String>, spec: IntentSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: IntentStatus::default(),
        }
    }

    pub fn key(&self) -> IntentKey {
        self.metadata.key()
    }

    /// Key of the declared source; the source shares the intent's namespace.
    pub fn source_key(&self) -> ObjectKey {
        ObjectKey::new(self.metadata.namespace.clone(), self.spec.source.name.clone())
    }

    pub fn has_finalizer(&self) -> bool {
        self.metadata.has_finalizer(markers::FINALIZER)
    }
}

// ---------------------------------------------------------------------------
// Key/value objects
// ---------------------------------------------------------------------------

/// A source or target key/value object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KvObject {
    pub metadata: ObjectMeta,
    pub kind: ResourceKind,
    /// Secret type (e.g. `kubernetes.io/tls`); never set on config maps.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_tag: Option<String>,
    #[serde(default, with = "bundle_serde")]
    pub data: Bundle,
}

impl KvObject {
    pub fn new(
        kind: ResourceKind,
        namespace: impl Into<Namespace>,
        name: impl Into<String>,
        data: Bundle,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            kind,
            type_tag: None,
            data,
        }
    }

    pub fn with_type(mut self, type_tag: impl Into<String>) -> Self {
        self.type_tag = Some(type_tag.into());
        self
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }
}

/// Build a [`Bundle`] from string pairs.
pub fn bundle<K, V, I>(pairs: I) -> Bundle
where
    K: Into<String>,
    V: AsRef<[u8]>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.as_ref().to_vec()))
        .collect()
}

mod bundle_serde {
    use std::collections::BTreeMap;

    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    use super::Bundle;

    pub fn serialize<S: Serializer>(bundle: &Bundle, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(bundle.iter().map(|(k, v)| (k, STANDARD.encode(v))))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bundle, D::Error> {
        let encoded = BTreeMap::<String, String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|(k, v)| {
                STANDARD
                    .decode(v.as_bytes())
                    .map(|bytes| (k.clone(), bytes))
                    .map_err(|e| D::Error::custom(format!("data[{k}] is not valid base64: {e}")))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
