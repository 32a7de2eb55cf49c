//! # mirror-sync
//!
//! The reconciliation engine.
//!
//! Call [`Reconciler::reconcile`] for a single pass over one intent, or
//! [`pipeline::run`] to reconcile a whole scope. [`correlation`] turns store
//! change events into the intent keys that need a pass.

pub mod cancel;
pub mod checksum;
pub mod conditions;
pub mod correlation;
pub mod deletion;
pub mod error;
pub mod filter;
pub mod ownership;
pub mod pipeline;
pub mod plan;
pub mod reconcile;
pub mod target;

pub use cancel::Cancellation;
pub use checksum::{bundle_checksum, checksum};
pub use error::SyncError;
pub use pipeline::{ReconcileScope, ReconcileSummary};
pub use reconcile::{ReconcileAction, Reconciler};
pub use target::{sync_target, TargetOutcome, TargetRequest};
