use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;

use mirror_core::{bundle, FsStore, ObjectKey, ObjectStore, ResourceKind};
use tempfile::TempDir;

fn kvmirror(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("kvmirror"));
    cmd.env("HOME", home).env("USERPROFILE", home);
    cmd
}

fn namespaces(home: &TempDir, names: &[&str]) {
    for name in names {
        kvmirror(home.path())
            .args(["namespace", "create", name])
            .assert()
            .success();
    }
}

fn write_manifest(home: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = home.path().join(name);
    fs::write(&path, body).expect("write manifest");
    path
}

const DB_SYNC: &str = r#"
metadata:
  name: db-sync
  namespace: platform
spec:
  source:
    kind: Secret
    name: db-credentials
  targets:
    - namespace: backend
  deletionPolicy: delete
"#;

const CFG_SYNC: &str = r#"
metadata:
  name: cfg-sync
  namespace: platform
spec:
  source:
    kind: ConfigMap
    name: app-config
  targets:
    - namespace: backend
"#;

fn setup_db_sync(home: &TempDir) {
    namespaces(home, &["platform", "backend"]);
    kvmirror(home.path())
        .args([
            "put",
            "secret",
            "platform/db-credentials",
            "username=admin",
            "password=s3cret",
            "--type",
            "Opaque",
        ])
        .assert()
        .success()
        .stdout(contains("written (2 keys)"));
    let manifest = write_manifest(home, "db-sync.yaml", DB_SYNC);
    kvmirror(home.path())
        .arg("apply")
        .arg("-f")
        .arg(&manifest)
        .assert()
        .success()
        .stdout(contains("Intent platform/db-sync applied"));
}

#[test]
fn namespace_list_shows_created_namespaces() {
    let home = TempDir::new().expect("home");
    namespaces(&home, &["platform", "backend"]);

    kvmirror(home.path())
        .args(["namespace", "list"])
        .assert()
        .success()
        .stdout(contains("backend").and(contains("platform")));
}

#[test]
fn namespace_list_counts_contents_and_create_is_idempotent() {
    let home = TempDir::new().expect("home");
    setup_db_sync(&home);

    kvmirror(home.path())
        .args(["namespace", "create", "platform"])
        .assert()
        .success()
        .stdout(contains("Namespace 'platform' already exists"));

    kvmirror(home.path())
        .args(["namespace", "list"])
        .assert()
        .success()
        .stdout(contains("platform  (1 intents, 1 secrets, 0 configmaps)"))
        .stdout(contains("backend  (0 intents, 0 secrets, 0 configmaps)"));
}

#[test]
fn path_like_names_are_rejected() {
    let home = TempDir::new().expect("home");
    namespaces(&home, &["platform"]);

    kvmirror(home.path())
        .args(["namespace", "create", ".."])
        .assert()
        .failure();

    let manifest = write_manifest(
        &home,
        "escape.yaml",
        "metadata:\n  name: escape\n  namespace: platform\n\
         spec:\n  source:\n    kind: Secret\n    name: db\n  \
         targets:\n    - namespace: ../..\n",
    );
    kvmirror(home.path())
        .arg("apply")
        .arg("-f")
        .arg(&manifest)
        .assert()
        .failure()
        .stderr(contains("spec.targets[0].namespace"));
    assert!(!home.path().join(".kvmirror/namespaces/platform/intents/escape.yaml").exists());
}

#[test]
fn copy_intent_converges_and_reports_ready() {
    let home = TempDir::new().expect("home");
    setup_db_sync(&home);

    kvmirror(home.path())
        .args(["diff", "platform/db-sync"])
        .assert()
        .success()
        .stdout(contains("--- /dev/null"))
        .stdout(contains("+++ b/backend/db-credentials"))
        .stdout(contains("+password=sha256:"))
        .stdout(contains("s3cret").not());

    kvmirror(home.path())
        .args(["reconcile", "platform/db-sync"])
        .assert()
        .success()
        .stdout(contains("platform/db-sync ready"));

    let store = FsStore::at(home.path());
    let target = store
        .get_object(
            ResourceKind::Secret,
            &ObjectKey::new("backend", "db-credentials"),
        )
        .expect("target secret");
    assert_eq!(
        target.data,
        bundle([("password", "s3cret"), ("username", "admin")])
    );
    assert_eq!(target.type_tag.as_deref(), Some("Opaque"));

    kvmirror(home.path())
        .args(["diff", "platform/db-sync"])
        .assert()
        .success()
        .stdout(contains("No differences for platform/db-sync."));

    let assert = kvmirror(home.path())
        .args(["status", "--json"])
        .assert()
        .success();
    let status: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("status JSON");
    assert_eq!(status["summary"]["ready"], serde_json::json!(1));
    let intent = &status["intents"][0];
    assert_eq!(intent["intent"], "platform/db-sync");
    assert_eq!(intent["ready"], "True");
    assert_eq!(intent["targets_synced"], serde_json::json!(1));
    assert_eq!(intent["message"], "All targets synced successfully");
}

#[test]
fn missing_source_waits_and_reports_not_ready() {
    let home = TempDir::new().expect("home");
    namespaces(&home, &["platform", "backend"]);
    let manifest = write_manifest(&home, "cfg-sync.yaml", CFG_SYNC);
    kvmirror(home.path())
        .arg("apply")
        .arg("-f")
        .arg(&manifest)
        .assert()
        .success();

    kvmirror(home.path())
        .args(["reconcile", "--all"])
        .assert()
        .success()
        .stdout(contains("platform/cfg-sync waiting (re-check in 30s)"));

    let assert = kvmirror(home.path())
        .args(["status", "--namespace", "platform", "--json"])
        .assert()
        .success();
    let status: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("status JSON");
    let intent = &status["intents"][0];
    assert_eq!(intent["ready"], "False");
    assert_eq!(intent["source_found"], "False");
    assert_eq!(intent["message"], "Cannot sync: source resource not found");
}

#[test]
fn tampered_target_is_restored() {
    let home = TempDir::new().expect("home");
    namespaces(&home, &["platform", "backend"]);
    kvmirror(home.path())
        .args(["put", "configmap", "platform/app-config", "log_level=debug"])
        .assert()
        .success();
    let manifest = write_manifest(&home, "cfg-sync.yaml", CFG_SYNC);
    kvmirror(home.path())
        .arg("apply")
        .arg("-f")
        .arg(&manifest)
        .assert()
        .success();
    kvmirror(home.path())
        .args(["reconcile", "platform/cfg-sync"])
        .assert()
        .success();

    kvmirror(home.path())
        .args(["put", "configmap", "backend/app-config", "log_level=tampered"])
        .assert()
        .success();
    kvmirror(home.path())
        .args(["diff", "platform/cfg-sync"])
        .assert()
        .success()
        .stdout(contains("-log_level=tampered"))
        .stdout(contains("+log_level=debug"));

    kvmirror(home.path())
        .args(["reconcile", "platform/cfg-sync"])
        .assert()
        .success();
    kvmirror(home.path())
        .args(["get", "configmap", "backend/app-config"])
        .assert()
        .success()
        .stdout(contains("log_level=debug"))
        .stdout(contains("kvmirror.dev/managed-by: kvmirror-controller"));
}

#[test]
fn deleting_intent_with_delete_policy_removes_targets() {
    let home = TempDir::new().expect("home");
    setup_db_sync(&home);
    kvmirror(home.path())
        .args(["reconcile", "platform/db-sync"])
        .assert()
        .success();

    kvmirror(home.path())
        .args(["delete", "intent", "platform/db-sync"])
        .assert()
        .success()
        .stdout(contains("marked for deletion"));

    kvmirror(home.path())
        .args(["reconcile", "platform/db-sync"])
        .assert()
        .success()
        .stdout(contains("platform/db-sync removed"));

    let store = FsStore::at(home.path());
    let target = store.object_path(
        ResourceKind::Secret,
        &ObjectKey::new("backend", "db-credentials"),
    );
    assert!(!target.exists(), "managed target should be deleted");
    let source = store.object_path(
        ResourceKind::Secret,
        &ObjectKey::new("platform", "db-credentials"),
    );
    assert!(source.exists(), "source must never be touched");
}

#[test]
fn get_masks_secret_values_unless_asked() {
    let home = TempDir::new().expect("home");
    setup_db_sync(&home);

    kvmirror(home.path())
        .args(["get", "secret", "platform/db-credentials"])
        .assert()
        .success()
        .stdout(contains("password=sha256:"))
        .stdout(contains("s3cret").not());

    kvmirror(home.path())
        .args(["get", "secret", "platform/db-credentials", "--show-secrets"])
        .assert()
        .success()
        .stdout(contains("password=s3cret"));
}

#[test]
fn put_into_missing_namespace_fails() {
    let home = TempDir::new().expect("home");
    kvmirror(home.path())
        .args(["put", "configmap", "nowhere/app-config", "a=1"])
        .assert()
        .failure();
}

#[test]
fn malformed_intent_key_is_rejected() {
    let home = TempDir::new().expect("home");
    kvmirror(home.path())
        .args(["reconcile", "no-slash"])
        .assert()
        .failure()
        .stderr(contains("expected '<namespace>/<name>'"));
}
