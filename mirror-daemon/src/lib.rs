//! kvmirror daemon: filesystem watcher, work queue, single reconcile worker
//! and the Unix-socket control protocol.

mod error;
pub mod paths;
pub mod protocol;
pub mod queue;
mod runtime;

pub use error::DaemonError;
pub use protocol::{request_reconcile, request_status, request_stop, DaemonRequest, DaemonResponse};
pub use runtime::{run, start_blocking, IntentOutcome, IntentRecord, ReconcileLog, RunSummary};
