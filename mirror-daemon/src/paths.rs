use std::path::{Path, PathBuf};
use std::time::Duration;

/// Quiet period before a changed file is acted on again.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// First retry delay after a failed pass; doubles per consecutive failure.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);
pub const BACKOFF_MAX: Duration = Duration::from_secs(300);

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn kvmirror_root(home: &Path) -> PathBuf {
    home.join(".kvmirror")
}

pub fn namespaces_root(home: &Path) -> PathBuf {
    kvmirror_root(home).join("namespaces")
}

pub fn socket_path(home: &Path) -> PathBuf {
    kvmirror_root(home).join(DAEMON_SOCKET)
}
