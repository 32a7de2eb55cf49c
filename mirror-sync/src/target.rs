//! Checksum-gated create/update of a single target object.
//!
//! ## `sync_target` protocol
//!
//! 1. Read the live target.
//! 2. Missing: create it with the filtered data, type tag and markers.
//! 3. Present and managed for another live intent: refuse with
//!    [`SyncError::TargetConflict`].
//! 4. Compute the desired data (copy: filtered data; merge: live data
//!    overlaid with filtered data).
//! 5. Compare checksums of live and desired data. Equal: no write.
//! 6. Replace data and type tag, refresh markers, optimistic update.

use chrono::Utc;

use mirror_core::{Bundle, Intent, KvObject, ObjectKey, ObjectStore, ResourceKind, SyncMode};

use crate::cancel::Cancellation;
use crate::checksum::bundle_checksum;
use crate::error::SyncError;
use crate::ownership::{is_managed_by, owning_intent, tracking_markers};

/// Outcome of syncing one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOutcome {
    Created,
    Updated,
    /// Live data already equals the desired data; nothing was written.
    Unchanged,
    /// Dry run: the target would have been created.
    WouldCreate,
    /// Dry run: the target would have been updated.
    WouldUpdate,
}

impl TargetOutcome {
    pub fn wrote(&self) -> bool {
        matches!(self, TargetOutcome::Created | TargetOutcome::Updated)
    }
}

/// Everything needed to converge one target.
#[derive(Debug, Clone, Copy)]
pub struct TargetRequest<'a> {
    pub intent: &'a Intent,
    pub kind: ResourceKind,
    pub target: &'a ObjectKey,
    /// Source data after key filtering.
    pub data: &'a Bundle,
    /// Source type tag; only meaningful for secrets.
    pub type_tag: Option<&'a str>,
    /// Checksum of `data`, recorded in the checksum marker.
    pub checksum: &'a str,
    pub mode: SyncMode,
    pub identity: &'a str,
    pub dry_run: bool,
}

/// Data a target should hold after a sync.
pub fn desired_data(live: Option<&Bundle>, filtered: &Bundle, mode: SyncMode) -> Bundle {
    match (mode, live) {
        (SyncMode::Merge, Some(live)) => {
            let mut merged = live.clone();
            merged.extend(filtered.iter().map(|(k, v)| (k.clone(), v.clone())));
            merged
        }
        _ => filtered.clone(),
    }
}

pub fn sync_target(
    store: &dyn ObjectStore,
    req: &TargetRequest<'_>,
    cancel: &Cancellation,
) -> Result<TargetOutcome, SyncError> {
    let type_tag = match req.kind {
        ResourceKind::Secret => req.type_tag.map(str::to_string),
        ResourceKind::ConfigMap => None,
    };

    cancel.check()?;
    let live = match store.get_object(req.kind, req.target) {
        Ok(obj) => Some(obj),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e.into()),
    };

    let Some(mut live) = live else {
        if req.dry_run {
            tracing::info!("[dry-run] would create {} {}", req.kind, req.target);
            return Ok(TargetOutcome::WouldCreate);
        }
        let mut obj = KvObject::new(
            req.kind,
            req.target.namespace.clone(),
            req.target.name.clone(),
            req.data.clone(),
        );
        obj.type_tag = type_tag;
        obj.metadata.annotations =
            tracking_markers(req.intent, req.identity, req.checksum, Utc::now());
        cancel.check()?;
        store.create_object(&obj)?;
        tracing::info!("created {} {}", req.kind, req.target);
        return Ok(TargetOutcome::Created);
    };

    check_owner(store, req, &live, cancel)?;

    let desired = desired_data(Some(&live.data), req.data, req.mode);
    if bundle_checksum(&live.data) == bundle_checksum(&desired) {
        tracing::debug!("unchanged: {} {} ({})", req.kind, req.target, req.mode);
        return Ok(TargetOutcome::Unchanged);
    }

    if req.dry_run {
        tracing::info!("[dry-run] would update {} {}", req.kind, req.target);
        return Ok(TargetOutcome::WouldUpdate);
    }

    live.data = desired;
    live.type_tag = type_tag;
    live.metadata.annotations.extend(tracking_markers(
        req.intent,
        req.identity,
        req.checksum,
        Utc::now(),
    ));
    cancel.check()?;
    store.update_object(&live)?;
    tracing::info!("updated {} {} ({})", req.kind, req.target, req.mode);
    Ok(TargetOutcome::Updated)
}

/// Refuse targets we manage on behalf of a different intent that still exists.
/// Objects whose recorded owner is gone are adopted.
fn check_owner(
    store: &dyn ObjectStore,
    req: &TargetRequest<'_>,
    live: &KvObject,
    cancel: &Cancellation,
) -> Result<(), SyncError> {
    if !is_managed_by(&live.metadata, req.identity) {
        return Ok(());
    }
    let Some(owner) = owning_intent(&live.metadata) else {
        return Ok(());
    };
    if owner == req.intent.key() {
        return Ok(());
    }
    cancel.check()?;
    match store.get_intent(&owner) {
        Ok(_) => Err(SyncError::TargetConflict {
            target: req.target.clone(),
            owner,
        }),
        Err(e) if e.is_not_found() => {
            tracing::info!("adopting {} {} from removed intent {owner}", req.kind, req.target);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
