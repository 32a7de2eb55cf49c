use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use mirror_core::{FsStore, ObjectKey, ObjectStore, ResourceKind};
use tempfile::TempDir;

fn kvmirror_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_kvmirror"))
}

fn kvmirror(binary: &Path, home: &Path, args: &[&str]) -> std::process::Output {
    Command::new(binary)
        .env("HOME", home)
        .env("USERPROFILE", home)
        .args(args)
        .output()
        .expect("run kvmirror")
}

struct DaemonProcess {
    child: Child,
    binary: PathBuf,
    home: PathBuf,
}

impl DaemonProcess {
    fn start(binary: PathBuf, home: PathBuf) -> Self {
        let child = Command::new(&binary)
            .env("HOME", &home)
            .env("USERPROFILE", &home)
            .args(["daemon", "start"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");

        Self {
            child,
            binary,
            home,
        }
    }

    fn stop(&mut self) {
        let _ = Command::new(&self.binary)
            .env("HOME", &self.home)
            .env("USERPROFILE", &self.home)
            .args(["daemon", "stop"])
            .status();

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            sleep(Duration::from_millis(50));
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

fn daemon_running(binary: &Path, home: &Path) -> bool {
    let output = kvmirror(binary, home, &["daemon", "status"]);
    if !output.status.success() {
        return false;
    }
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(&output.stdout) else {
        return false;
    };
    value
        .get("running")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(100));
    }
    false
}

fn target_value(home: &Path, key: &str) -> Option<String> {
    let store = FsStore::at(home);
    let obj = store
        .get_object(
            ResourceKind::ConfigMap,
            &ObjectKey::new("backend", "app-config"),
        )
        .ok()?;
    obj.data
        .get(key)
        .map(|v| String::from_utf8_lossy(v).into_owned())
}

#[test]
fn source_change_propagates_through_daemon() {
    let home = TempDir::new().expect("home");
    let binary = kvmirror_bin();

    for ns in ["platform", "backend"] {
        let out = kvmirror(&binary, home.path(), &["namespace", "create", ns]);
        assert!(out.status.success(), "namespace create {ns} failed");
    }
    let out = kvmirror(
        &binary,
        home.path(),
        &["put", "configmap", "platform/app-config", "log_level=info"],
    );
    assert!(out.status.success(), "put source failed");

    let mut daemon = DaemonProcess::start(binary.clone(), home.path().to_path_buf());
    assert!(
        wait_until(Duration::from_secs(5), || daemon_running(
            &binary,
            home.path()
        )),
        "daemon did not report running state in time",
    );

    let manifest = home.path().join("cfg-sync.yaml");
    std::fs::write(
        &manifest,
        "metadata:\n  name: cfg-sync\n  namespace: platform\n\
         spec:\n  source:\n    kind: ConfigMap\n    name: app-config\n  \
         targets:\n    - namespace: backend\n",
    )
    .expect("write manifest");
    let manifest_arg = manifest.display().to_string();
    let out = kvmirror(&binary, home.path(), &["apply", "-f", &manifest_arg]);
    assert!(
        out.status.success(),
        "apply failed: {}",
        String::from_utf8_lossy(&out.stderr),
    );

    assert!(
        wait_until(Duration::from_secs(10), || {
            target_value(home.path(), "log_level").as_deref() == Some("info")
        }),
        "daemon did not create the target after the intent was applied",
    );

    let out = kvmirror(
        &binary,
        home.path(),
        &["put", "configmap", "platform/app-config", "log_level=debug"],
    );
    assert!(out.status.success(), "put updated source failed");

    assert!(
        wait_until(Duration::from_secs(10), || {
            target_value(home.path(), "log_level").as_deref() == Some("debug")
        }),
        "daemon did not propagate the source change within timeout",
    );

    daemon.stop();
}
