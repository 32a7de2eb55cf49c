//! Key selection applied to source data before it is written anywhere.

use mirror_core::{Bundle, SyncMode, SyncPolicy};

/// Apply the intent's key policy to `data`.
///
/// No policy, copy mode, or no key selector: data passes through unchanged.
/// Otherwise a non-empty include list picks the listed keys that are present
/// (missing ones are skipped), an empty include list keeps everything, and
/// then every exclude key is removed.
pub fn filter(data: &Bundle, policy: Option<&SyncPolicy>) -> Bundle {
    let Some(policy) = policy else {
        return data.clone();
    };
    if policy.mode == SyncMode::Copy {
        return data.clone();
    }
    let Some(keys) = policy.keys.as_ref() else {
        return data.clone();
    };

    let mut out: Bundle = if keys.include.is_empty() {
        data.clone()
    } else {
        keys.include
            .iter()
            .filter_map(|k| data.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    };
    for k in &keys.exclude {
        out.remove(k);
    }
    out
}
