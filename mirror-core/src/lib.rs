//! kvmirror core library: object model, store contract and bundled stores.
//!
//! - [`types`]: namespaces, intents, key/value objects
//! - [`markers`]: annotation keys, finalizer, condition vocabulary
//! - [`store`]: the [`ObjectStore`] / [`StoreAdmin`] traits
//! - [`memory`], [`fs_store`]: in-process and YAML-on-disk stores
//! - [`config`]: [`ControllerConfig`]

pub mod config;
pub mod error;
pub mod fs_store;
pub mod markers;
pub mod memory;
pub mod store;
pub mod types;

pub use config::ControllerConfig;
pub use error::StoreError;
pub use fs_store::FsStore;
pub use memory::MemoryStore;
pub use store::{ObjectStore, StoreAdmin, WatchEvent, WatchedKind};
pub use types::{
    bundle, Bundle, Condition, ConditionStatus, DeletionPolicy, Intent, IntentKey, IntentSpec,
    IntentStatus, KeySelector, KvObject, Namespace, ObjectKey, ObjectMeta, ResourceKind,
    SourceSpec, SyncMode, SyncPolicy, TargetSpec, TargetSyncStatus, validate_name,
};
