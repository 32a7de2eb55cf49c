//! Condition bookkeeping on intent status. One entry per condition type.

use chrono::{DateTime, Utc};

use mirror_core::{Condition, ConditionStatus, IntentStatus};

/// Record an observation, stamping transitions with the current time.
pub fn set_condition(
    status: &mut IntentStatus,
    type_: &str,
    observed: ConditionStatus,
    reason: &str,
    message: &str,
) {
    set_condition_at(status, type_, observed, reason, message, Utc::now());
}

/// Like [`set_condition`] with an explicit clock.
///
/// An unchanged status keeps its `last_transition_time` and only refreshes
/// reason and message. A changed status replaces the entry.
pub fn set_condition_at(
    status: &mut IntentStatus,
    type_: &str,
    observed: ConditionStatus,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) {
    let fresh = Condition {
        type_: type_.to_string(),
        status: observed,
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: now,
    };
    match status.conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) if existing.status == observed => {
            existing.reason = fresh.reason;
            existing.message = fresh.message;
        }
        Some(existing) => *existing = fresh,
        None => status.conditions.push(fresh),
    }
}

pub fn find_condition<'a>(status: &'a IntentStatus, type_: &str) -> Option<&'a Condition> {
    status.conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_condition_true(status: &IntentStatus, type_: &str) -> bool {
    find_condition(status, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mirror_core::markers::{reason, CONDITION_READY, CONDITION_SOURCE_FOUND};

    #[test]
    fn new_condition_is_appended() {
        let mut status = IntentStatus::default();
        let t0 = Utc::now();
        set_condition_at(&mut status, CONDITION_READY, ConditionStatus::True, "R", "m", t0);
        set_condition_at(&mut status, CONDITION_SOURCE_FOUND, ConditionStatus::True, "R", "m", t0);
        assert_eq!(status.conditions.len(), 2);
        assert!(is_condition_true(&status, CONDITION_READY));
    }

    #[test]
    fn same_status_keeps_transition_time() {
        let mut status = IntentStatus::default();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(60);
        set_condition_at(&mut status, CONDITION_READY, ConditionStatus::False, reason::SYNC_FAILED, "first", t0);
        set_condition_at(&mut status, CONDITION_READY, ConditionStatus::False, reason::SOURCE_NOT_FOUND, "second", t1);

        let c = find_condition(&status, CONDITION_READY).expect("ready");
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(c.last_transition_time, t0);
        assert_eq!(c.reason, reason::SOURCE_NOT_FOUND);
        assert_eq!(c.message, "second");
    }

    #[test]
    fn changed_status_replaces_entry() {
        let mut status = IntentStatus::default();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(60);
        set_condition_at(&mut status, CONDITION_READY, ConditionStatus::False, reason::SYNC_FAILED, "x", t0);
        set_condition_at(&mut status, CONDITION_READY, ConditionStatus::True, reason::SYNC_SUCCESSFUL, "y", t1);

        let c = find_condition(&status, CONDITION_READY).expect("ready");
        assert_eq!(c.status, ConditionStatus::True);
        assert_eq!(c.last_transition_time, t1);
    }

    #[test]
    fn unknown_to_false_is_a_transition() {
        let mut status = IntentStatus::default();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(5);
        set_condition_at(&mut status, CONDITION_SOURCE_FOUND, ConditionStatus::Unknown, "a", "", t0);
        set_condition_at(&mut status, CONDITION_SOURCE_FOUND, ConditionStatus::False, "b", "", t1);
        assert_eq!(
            find_condition(&status, CONDITION_SOURCE_FOUND).unwrap().last_transition_time,
            t1
        );
        assert!(!is_condition_true(&status, CONDITION_SOURCE_FOUND));
    }

    #[test]
    fn missing_condition_is_not_true() {
        assert!(!is_condition_true(&IntentStatus::default(), CONDITION_READY));
    }
}
