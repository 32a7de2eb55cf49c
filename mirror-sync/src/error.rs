//! Error types for mirror-sync.

use thiserror::Error;

use mirror_core::{IntentKey, ObjectKey, StoreError};

/// All errors that can arise from a reconciliation pass.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the object store, propagated unmodified.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The intent names a source kind that cannot be synchronized.
    #[error("unsupported source kind '{kind}'; expected Secret or ConfigMap")]
    UnsupportedKind { kind: String },

    /// The target is managed by us on behalf of another live intent.
    #[error("target {target} is already managed by intent {owner}")]
    TargetConflict { target: ObjectKey, owner: IntentKey },

    /// The pass was cancelled or ran past its deadline.
    #[error("reconcile pass cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Store(e) if e.is_conflict())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Store(e) if e.is_not_found())
    }
}
