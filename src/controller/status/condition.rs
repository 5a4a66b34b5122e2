//! # Condition Helpers
//!
//! Constructors for the canonical condition shapes and the upsert rule for
//! top-level conditions.

use crate::crd::{reason, ComponentCondition, Condition, ConditionStatus};

/// Current time in the RFC3339 form stored on conditions
pub fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Build a top-level condition stamped with the current time
pub fn new_condition(
    condition_type: &str,
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
) -> Condition {
    let ts = now();
    Condition {
        r#type: condition_type.to_string(),
        status,
        last_update_time: Some(ts.clone()),
        last_transition_time: Some(ts),
        reason: Some(reason.to_string()),
        message: Some(message.into()),
    }
}

/// Sentinel for a backing resource that exposes no usable conditions
pub fn unknown_status(name: &str, kind: &str) -> ComponentCondition {
    ComponentCondition {
        name: name.to_string(),
        kind: kind.to_string(),
        r#type: "Unknown".to_string(),
        status: ConditionStatus::Unknown,
        reason: Some("No conditions available".to_string()),
        message: Some("No conditions available".to_string()),
        available: false,
        ..Default::default()
    }
}

/// Sentinel for a probe that failed with an unexpected client error
pub fn probe_error_status(name: &str, kind: &str) -> ComponentCondition {
    ComponentCondition {
        name: name.to_string(),
        kind: kind.to_string(),
        r#type: "Unknown".to_string(),
        status: ConditionStatus::Unknown,
        reason: Some(reason::UNKNOWN.to_string()),
        message: Some("Error getting resource".to_string()),
        available: false,
        ..Default::default()
    }
}

/// Upsert `new` into `conditions` by type
///
/// Identical status, reason and message leave the list untouched. An unchanged
/// status keeps the existing transition time. Returns whether anything changed.
pub fn set_condition(conditions: &mut Vec<Condition>, mut new: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.r#type == new.r#type) {
        Some(existing) => {
            if existing.status == new.status
                && existing.reason == new.reason
                && existing.message == new.message
            {
                return false;
            }
            if existing.status == new.status {
                new.last_transition_time = existing.last_transition_time.clone();
            }
            *existing = new;
            true
        }
        None => {
            conditions.push(new);
            true
        }
    }
}

/// Find a condition by type
pub fn get_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Remove a condition by type
pub fn remove_condition(conditions: &mut Vec<Condition>, condition_type: &str) {
    conditions.retain(|c| c.r#type != condition_type);
}

#[cfg(test)]
mod tests {
    use super::*;

    const OLD: &str = "2020-01-01T00:00:00Z";

    fn seeded(status: ConditionStatus, reason: &str, message: &str) -> Condition {
        Condition {
            r#type: "Progressing".to_string(),
            status,
            last_update_time: Some(OLD.to_string()),
            last_transition_time: Some(OLD.to_string()),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }
    }

    #[test]
    fn test_identical_condition_is_noop() {
        let mut conditions = vec![seeded(ConditionStatus::True, "A", "m")];
        let changed = set_condition(
            &mut conditions,
            new_condition("Progressing", ConditionStatus::True, "A", "m"),
        );
        assert!(!changed);
        assert_eq!(conditions[0].last_update_time.as_deref(), Some(OLD));
    }

    #[test]
    fn test_same_status_keeps_transition_time() {
        let mut conditions = vec![seeded(ConditionStatus::True, "A", "m")];
        set_condition(
            &mut conditions,
            new_condition("Progressing", ConditionStatus::True, "B", "other"),
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].reason.as_deref(), Some("B"));
        assert_eq!(conditions[0].last_transition_time.as_deref(), Some(OLD));
    }

    #[test]
    fn test_status_change_moves_transition_time() {
        let mut conditions = vec![seeded(ConditionStatus::True, "A", "m")];
        set_condition(
            &mut conditions,
            new_condition("Progressing", ConditionStatus::False, "A", "m"),
        );
        assert_eq!(conditions[0].status, ConditionStatus::False);
        assert_ne!(conditions[0].last_transition_time.as_deref(), Some(OLD));
    }

    #[test]
    fn test_transition_time_constant_across_unchanged_status_sequence() {
        let mut conditions = vec![seeded(ConditionStatus::False, "A", "m")];
        for (reason, message) in [("A", "m"), ("B", "x"), ("C", "y"), ("C", "y")] {
            set_condition(
                &mut conditions,
                new_condition("Progressing", ConditionStatus::False, reason, message),
            );
            assert_eq!(conditions[0].last_transition_time.as_deref(), Some(OLD));
        }
    }

    #[test]
    fn test_conditions_keep_insertion_order() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            new_condition("Available", ConditionStatus::True, "A", ""),
        );
        set_condition(
            &mut conditions,
            new_condition("Progressing", ConditionStatus::True, "A", ""),
        );
        set_condition(
            &mut conditions,
            new_condition("Available", ConditionStatus::False, "B", ""),
        );
        let types: Vec<_> = conditions.iter().map(|c| c.r#type.as_str()).collect();
        assert_eq!(types, vec!["Available", "Progressing"]);
        remove_condition(&mut conditions, "Available");
        assert!(get_condition(&conditions, "Available").is_none());
    }
}
