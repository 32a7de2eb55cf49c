//! Well-known annotation keys, finalizer token and condition vocabulary.

/// Guard token that keeps an intent in the store until deletion cleanup ran.
pub const FINALIZER: &str = "kvmirror.dev/finalizer";

// ---------------------------------------------------------------------------
// Tracking markers stamped on every managed target
// ---------------------------------------------------------------------------

/// Ownership tag. Its value must equal the controller identity.
pub const MANAGED_BY: &str = "kvmirror.dev/managed-by";
pub const SOURCE_NAMESPACE: &str = "kvmirror.dev/source-namespace";
pub const SOURCE_NAME: &str = "kvmirror.dev/source-name";
/// Name of the owning intent (in `SOURCE_NAMESPACE`).
pub const SOURCE_INTENT: &str = "kvmirror.dev/source-intent";
/// Checksum of the filtered source data at the last write.
pub const CHECKSUM: &str = "kvmirror.dev/checksum";
/// RFC3339 time of the last write.
pub const LAST_SYNCED: &str = "kvmirror.dev/last-synced";

/// Default value of the ownership tag.
pub const DEFAULT_IDENTITY: &str = "kvmirror-controller";

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_SOURCE_FOUND: &str = "SourceFound";

pub mod reason {
    pub const SOURCE_EXISTS: &str = "SourceExists";
    pub const SOURCE_NOT_FOUND: &str = "SourceNotFound";
    pub const UNSUPPORTED_KIND: &str = "UnsupportedKind";
    pub const SYNC_SUCCESSFUL: &str = "SyncSuccessful";
    pub const SYNC_FAILED: &str = "SyncFailed";
    pub const TARGET_CONFLICT: &str = "TargetConflict";
}
