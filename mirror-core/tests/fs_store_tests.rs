//! Integration tests for the YAML-on-disk store.

use assert_fs::prelude::*;
use assert_fs::TempDir;
use mirror_core::markers::FINALIZER;
use mirror_core::{
    bundle, FsStore, Intent, IntentSpec, KvObject, Namespace, ObjectKey, ObjectStore,
    ResourceKind, SourceSpec, StoreAdmin, StoreError, TargetSpec,
};
use predicates::prelude::*;

fn intent(name: &str) -> Intent {
    Intent::new(
        "platform",
        name,
        IntentSpec {
            source: SourceSpec::new(ResourceKind::Secret, "db-credentials"),
            targets: vec![TargetSpec::new("backend")],
            sync_policy: None,
            deletion_policy: Default::default(),
        },
    )
}

fn setup() -> (TempDir, FsStore) {
    let home = TempDir::new().unwrap();
    let store = FsStore::at(home.path());
    for ns in ["platform", "backend"] {
        store.create_namespace(&Namespace::from(ns)).unwrap();
    }
    (home, store)
}

#[test]
fn objects_are_written_as_yaml_with_base64_data() {
    let (home, store) = setup();
    let obj = KvObject::new(
        ResourceKind::Secret,
        "platform",
        "db-credentials",
        bundle([("password", "secret123")]),
    );
    store.create_object(&obj).unwrap();

    home.child(".kvmirror/namespaces/platform/secrets/db-credentials.yaml")
        .assert(predicate::str::contains("c2VjcmV0MTIz"))
        .assert(predicate::str::contains("resourceVersion: 1"));
}

#[test]
fn list_namespaces_is_sorted() {
    let (_home, store) = setup();
    let names = store.list_namespaces().unwrap();
    assert_eq!(names, vec![Namespace::from("backend"), Namespace::from("platform")]);
}

#[test]
fn create_in_missing_namespace_fails() {
    let (_home, store) = setup();
    let obj = KvObject::new(ResourceKind::ConfigMap, "nowhere", "cfg", bundle([("a", "1")]));
    let err = store.create_object(&obj).unwrap_err();
    assert!(matches!(err, StoreError::NamespaceNotFound(_)), "got: {err}");
}

#[test]
fn stale_update_conflicts() {
    let (_home, store) = setup();
    let obj = KvObject::new(ResourceKind::ConfigMap, "backend", "cfg", bundle([("a", "1")]));
    let created = store.create_object(&obj).unwrap();
    let updated = store.update_object(&created).unwrap();
    assert_eq!(updated.metadata.resource_version, 2);
    assert!(store.update_object(&created).unwrap_err().is_conflict());
}

#[test]
fn intents_survive_reopen() {
    let (home, store) = setup();
    store.create_intent(&intent("a")).unwrap();
    store.create_intent(&intent("b")).unwrap();
    drop(store);

    let reopened = FsStore::at(home.path());
    let names: Vec<String> = reopened
        .list_all_intents()
        .unwrap()
        .into_iter()
        .map(|i| i.metadata.name)
        .collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[test]
fn intent_file_removed_after_finalizer_cleared() {
    let (home, store) = setup();
    let mut i = intent("db-sync");
    i.metadata.add_finalizer(FINALIZER);
    store.create_intent(&i).unwrap();

    let marked = store.delete_intent(&i.key()).unwrap().expect("kept for finalizer");
    let file = home.child(".kvmirror/namespaces/platform/intents/db-sync.yaml");
    file.assert(predicate::str::contains("deletionTimestamp"));

    let mut cleared = marked;
    cleared.metadata.remove_finalizer(FINALIZER);
    store.update_intent(&cleared).unwrap();
    file.assert(predicate::path::missing());
}

#[test]
fn malformed_file_reports_path() {
    let (home, store) = setup();
    home.child(".kvmirror/namespaces/backend/configmaps/bad.yaml")
        .write_str("metadata: [oops\n")
        .unwrap();
    let err = store
        .get_object(ResourceKind::ConfigMap, &ObjectKey::new("backend", "bad"))
        .unwrap_err();
    assert!(matches!(err, StoreError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("bad.yaml"));
}

#[test]
fn path_like_keys_never_leave_the_store() {
    let (home, store) = setup();

    let up_two = KvObject::new(ResourceKind::Secret, "../..", "db", bundle([("a", "1")]));
    let err = store.create_object(&up_two).unwrap_err();
    assert!(matches!(err, StoreError::InvalidNamespace { .. }), "got: {err}");

    let renamed = KvObject::new(
        ResourceKind::Secret,
        "platform",
        "../../../../escaped",
        bundle([("a", "1")]),
    );
    let err = store.put_object(&renamed).unwrap_err();
    assert!(matches!(err, StoreError::Invalid { .. }), "got: {err}");

    let err = store
        .get_object(ResourceKind::Secret, &ObjectKey::new("platform", ".."))
        .unwrap_err();
    assert!(matches!(err, StoreError::Invalid { .. }), "got: {err}");
    assert!(store.list_intents(&Namespace::from("..")).is_err());
    assert!(store.create_namespace(&Namespace::from("a/b")).is_err());

    home.child(".kvmirror/secrets/db.yaml")
        .assert(predicate::path::missing());
    home.child("escaped.yaml").assert(predicate::path::missing());
}

#[test]
fn intents_with_escaping_targets_are_rejected() {
    let (home, store) = setup();
    let mut bad = intent("escape");
    bad.spec.targets = vec![
        TargetSpec::new("../.."),
        TargetSpec::named("platform", "../../../../escaped"),
    ];
    let err = store.apply_intent(&bad).unwrap_err();
    assert!(matches!(err, StoreError::Invalid { .. }), "got: {err}");

    bad.spec.targets = vec![TargetSpec::named("platform", "../../../../escaped")];
    let err = store.create_intent(&bad).unwrap_err();
    assert!(err.to_string().contains("spec.targets[0].name"), "got: {err}");

    home.child(".kvmirror/namespaces/platform/intents/escape.yaml")
        .assert(predicate::path::missing());
}

#[test]
fn applied_status_is_discarded() {
    let (_home, store) = setup();
    let mut seeded = intent("db-sync");
    seeded.status.source_checksum = "forged".to_string();
    seeded.status.observed_generation = 9;
    let stored = store.apply_intent(&seeded).unwrap();
    assert!(stored.status.source_checksum.is_empty());
    assert_eq!(stored.status.observed_generation, 0);
}
