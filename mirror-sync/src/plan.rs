//! Dry-run preview for `kvmirror diff`.
//!
//! Computes what the next pass would write to each target and renders it as a
//! unified diff over sorted `key=value` lines. Secret values are shown as
//! short digests. Nothing is written.

use similar::TextDiff;

use mirror_core::{Bundle, IntentKey, ObjectKey, ObjectStore, ResourceKind};

use crate::cancel::Cancellation;
use crate::checksum::{bundle_checksum, value_digest};
use crate::error::SyncError;
use crate::filter::filter;
use crate::target::{desired_data, sync_target, TargetOutcome, TargetRequest};

/// Planned change for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPlan {
    pub target: ObjectKey,
    /// `None` when the target could not be evaluated; see `error`.
    pub outcome: Option<TargetOutcome>,
    pub unified_diff: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentPlan {
    pub intent: IntentKey,
    pub kind: ResourceKind,
    /// `None` when the source does not exist.
    pub source_checksum: Option<String>,
    pub targets: Vec<TargetPlan>,
}

impl IntentPlan {
    pub fn has_changes(&self) -> bool {
        self.targets.iter().any(|t| !t.unified_diff.is_empty())
    }
}

/// Preview the next pass for `key` without writing.
pub fn diff_intent(
    store: &dyn ObjectStore,
    key: &IntentKey,
    identity: &str,
) -> Result<IntentPlan, SyncError> {
    let intent = store.get_intent(key)?;
    let kind = intent
        .spec
        .source
        .resource_kind()
        .ok_or_else(|| SyncError::UnsupportedKind {
            kind: intent.spec.source.kind.clone(),
        })?;

    let source = match store.get_object(kind, &intent.source_key()) {
        Ok(source) => source,
        Err(e) if e.is_not_found() => {
            return Ok(IntentPlan {
                intent: key.clone(),
                kind,
                source_checksum: None,
                targets: vec![],
            })
        }
        Err(e) => return Err(e.into()),
    };

    let data = filter(&source.data, intent.spec.sync_policy.as_ref());
    let checksum = bundle_checksum(&data);
    let cancel = Cancellation::new();

    let mut targets = Vec::new();
    for target in &intent.spec.targets {
        let target_key = target.key(&intent.spec.source.name);
        let req = TargetRequest {
            intent: &intent,
            kind,
            target: &target_key,
            data: &data,
            type_tag: source.type_tag.as_deref(),
            checksum: &checksum,
            mode: intent.spec.sync_mode(),
            identity,
            dry_run: true,
        };
        let plan = match sync_target(store, &req, &cancel) {
            Ok(outcome) => {
                let live = match store.get_object(kind, &target_key) {
                    Ok(obj) => Some(obj.data),
                    Err(e) if e.is_not_found() => None,
                    Err(e) => return Err(e.into()),
                };
                let desired = desired_data(live.as_ref(), &data, intent.spec.sync_mode());
                TargetPlan {
                    unified_diff: render_diff(kind, &target_key, live.as_ref(), &desired),
                    target: target_key,
                    outcome: Some(outcome),
                    error: None,
                }
            }
            Err(e @ (SyncError::TargetConflict { .. } | SyncError::Store(_))) => TargetPlan {
                target: target_key,
                outcome: None,
                unified_diff: String::new(),
                error: Some(e.to_string()),
            },
            Err(e) => return Err(e),
        };
        targets.push(plan);
    }

    Ok(IntentPlan {
        intent: key.clone(),
        kind,
        source_checksum: Some(checksum),
        targets,
    })
}

fn render_diff(
    kind: ResourceKind,
    target: &ObjectKey,
    live: Option<&Bundle>,
    desired: &Bundle,
) -> String {
    let old = live.map(|b| render_lines(kind, b)).unwrap_or_default();
    let new = render_lines(kind, desired);
    if old == new {
        return String::new();
    }
    let old_header = if live.is_some() {
        format!("a/{target}")
    } else {
        "/dev/null".to_string()
    };
    let new_header = format!("b/{target}");
    TextDiff::from_lines(&old, &new)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string()
}

fn render_lines(kind: ResourceKind, data: &Bundle) -> String {
    data.iter()
        .map(|(k, v)| match kind {
            ResourceKind::Secret => format!("{k}={}\n", value_digest(v)),
            ResourceKind::ConfigMap => format!("{k}={}\n", String::from_utf8_lossy(v)),
        })
        .collect()
}
