//! The ownership check and the tracking markers written onto targets.
//!
//! Every mutation of an existing target (delete, correlation back to an
//! intent, conflict detection) goes through [`is_managed_by`].

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};

use mirror_core::markers::{
    CHECKSUM, LAST_SYNCED, MANAGED_BY, SOURCE_INTENT, SOURCE_NAME, SOURCE_NAMESPACE,
};
use mirror_core::{Intent, IntentKey, ObjectMeta};

/// `true` when the object's managed-by marker equals `identity`.
pub fn is_managed_by(meta: &ObjectMeta, identity: &str) -> bool {
    meta.annotation(MANAGED_BY) == Some(identity)
}

/// The intent named by the object's source markers, if both are present.
pub fn owning_intent(meta: &ObjectMeta) -> Option<IntentKey> {
    let namespace = meta.annotation(SOURCE_NAMESPACE).filter(|s| !s.is_empty())?;
    let name = meta.annotation(SOURCE_INTENT).filter(|s| !s.is_empty())?;
    Some(IntentKey::new(namespace, name))
}

/// The six markers stamped on a target written for `intent`.
pub fn tracking_markers(
    intent: &Intent,
    identity: &str,
    checksum: &str,
    now: DateTime<Utc>,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY.to_string(), identity.to_string()),
        (
            SOURCE_NAMESPACE.to_string(),
            intent.metadata.namespace.to_string(),
        ),
        (SOURCE_NAME.to_string(), intent.spec.source.name.clone()),
        (SOURCE_INTENT.to_string(), intent.metadata.name.clone()),
        (CHECKSUM.to_string(), checksum.to_string()),
        (
            LAST_SYNCED.to_string(),
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::{IntentSpec, ResourceKind, SourceSpec, TargetSpec};

    fn intent() -> Intent {
        Intent::new(
            "platform",
            "db-sync",
            IntentSpec {
                source: SourceSpec::new(ResourceKind::Secret, "db-credentials"),
                targets: vec![TargetSpec::new("backend")],
                sync_policy: None,
                deletion_policy: Default::default(),
            },
        )
    }

    #[test]
    fn markers_identify_the_intent() {
        let mut meta = ObjectMeta::new("backend", "db-credentials");
        meta.annotations = tracking_markers(&intent(), "ctl", "abc", Utc::now());

        assert_eq!(meta.annotations.len(), 6);
        assert!(is_managed_by(&meta, "ctl"));
        assert!(!is_managed_by(&meta, "someone-else"));
        assert_eq!(owning_intent(&meta), Some(IntentKey::new("platform", "db-sync")));
        assert!(meta.annotation(LAST_SYNCED).unwrap().ends_with('Z'));
    }

    #[test]
    fn unmarked_object_is_not_managed() {
        let meta = ObjectMeta::new("backend", "db-credentials");
        assert!(!is_managed_by(&meta, "ctl"));
        assert_eq!(owning_intent(&meta), None);
    }

    #[test]
    fn owner_requires_both_markers() {
        let mut meta = ObjectMeta::new("backend", "x");
        meta.annotations.insert(SOURCE_NAMESPACE.into(), "platform".into());
        assert_eq!(owning_intent(&meta), None);
        meta.annotations.insert(SOURCE_INTENT.into(), String::new());
        assert_eq!(owning_intent(&meta), None);
    }
}
