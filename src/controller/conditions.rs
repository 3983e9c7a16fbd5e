//! Condition management helpers following Kubernetes API conventions

use chrono::Utc;

use crate::crd::Condition;

/// Standard condition types (§7)
pub const CONDITION_TYPE_READY: &str = "Ready";
pub const CONDITION_TYPE_CONTROL_PLANE_READY: &str = "ControlPlaneReady";
pub const CONDITION_TYPE_WORKERS_READY: &str = "WorkersReady";
pub const CONDITION_TYPE_ADDONS_HEALTHY: &str = "AddonsHealthy";
pub const CONDITION_TYPE_PROGRESSING: &str = "Progressing";
pub const CONDITION_TYPE_DEGRADED: &str = "Degraded";

/// Standard condition statuses
pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";
pub const CONDITION_STATUS_UNKNOWN: &str = "Unknown";

/// Update or add a condition to the conditions list.
///
/// The transition time only moves forward when the status actually
/// changes; a repeated `set_condition` call with the same status just
/// refreshes reason/message in place.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: &str,
    reason: &str,
    message: &str,
) {
    let now = Utc::now().to_rfc3339();

    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        let should_update_time = existing.status != status;

        existing.status = status.to_string();
        existing.reason = reason.to_string();
        existing.message = message.to_string();

        if should_update_time {
            existing.last_transition_time = now;
        }
    } else {
        conditions.push(Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            last_transition_time: now,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}

pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_)
        .map(|c| c.status == CONDITION_STATUS_TRUE)
        .unwrap_or(false)
}

pub fn remove_condition(conditions: &mut Vec<Condition>, type_: &str) {
    conditions.retain(|c| c.type_ != type_);
}

/// Sets the `ControlPlaneReady` condition from the control-plane node group's health
pub fn set_control_plane_ready(conditions: &mut Vec<Condition>, ready: i32, desired: i32) {
    if ready >= desired && desired > 0 {
        set_condition(
            conditions,
            CONDITION_TYPE_CONTROL_PLANE_READY,
            CONDITION_STATUS_TRUE,
            "AllControlPlanesReady",
            &format!("{ready}/{desired} control plane nodes ready"),
        );
    } else {
        set_condition(
            conditions,
            CONDITION_TYPE_CONTROL_PLANE_READY,
            CONDITION_STATUS_FALSE,
            "ControlPlanesNotReady",
            &format!("{ready}/{desired} control plane nodes ready"),
        );
    }
}

/// Sets the `WorkersReady` condition from the worker node group's health
pub fn set_workers_ready(conditions: &mut Vec<Condition>, ready: i32, desired: i32) {
    if ready >= desired {
        set_condition(
            conditions,
            CONDITION_TYPE_WORKERS_READY,
            CONDITION_STATUS_TRUE,
            "AllWorkersReady",
            &format!("{ready}/{desired} worker nodes ready"),
        );
    } else {
        set_condition(
            conditions,
            CONDITION_TYPE_WORKERS_READY,
            CONDITION_STATUS_FALSE,
            "WorkersNotReady",
            &format!("{ready}/{desired} worker nodes ready"),
        );
    }
}

/// Sets the `AddonsHealthy` condition: true only when every installed addon is healthy
pub fn set_addons_healthy(conditions: &mut Vec<Condition>, all_healthy: bool, installed: usize, total: usize) {
    if all_healthy {
        set_condition(
            conditions,
            CONDITION_TYPE_ADDONS_HEALTHY,
            CONDITION_STATUS_TRUE,
            "AllAddonsHealthy",
            &format!("{installed}/{total} addons installed and healthy"),
        );
    } else {
        set_condition(
            conditions,
            CONDITION_TYPE_ADDONS_HEALTHY,
            CONDITION_STATUS_FALSE,
            "AddonsNotHealthy",
            &format!("{installed}/{total} addons installed and healthy"),
        );
    }
}

/// Sets the overall `Ready` condition — True only when control planes, workers,
/// and addons are all ready.
pub fn set_ready(conditions: &mut Vec<Condition>) {
    let ready = is_condition_true(conditions, CONDITION_TYPE_CONTROL_PLANE_READY)
        && is_condition_true(conditions, CONDITION_TYPE_WORKERS_READY)
        && is_condition_true(conditions, CONDITION_TYPE_ADDONS_HEALTHY);

    if ready {
        set_condition(
            conditions,
            CONDITION_TYPE_READY,
            CONDITION_STATUS_TRUE,
            "ClusterReady",
            "Control planes, workers, and addons are ready",
        );
    } else {
        set_condition(
            conditions,
            CONDITION_TYPE_READY,
            CONDITION_STATUS_FALSE,
            "ClusterNotReady",
            "Waiting for control planes, workers, or addons",
        );
    }
}

pub fn progressing_condition(reason: &str, message: &str) -> Condition {
    Condition {
        type_: CONDITION_TYPE_PROGRESSING.to_string(),
        status: CONDITION_STATUS_TRUE.to_string(),
        last_transition_time: Utc::now().to_rfc3339(),
        reason: reason.to_string(),
        message: message.to_string(),
    }
}

pub fn degraded_condition(reason: &str, message: &str) -> Condition {
    Condition {
        type_: CONDITION_TYPE_DEGRADED.to_string(),
        status: CONDITION_STATUS_TRUE.to_string(),
        last_transition_time: Utc::now().to_rfc3339(),
        reason: reason.to_string(),
        message: message.to_string(),
    }
}

pub fn not_degraded_condition() -> Condition {
    Condition {
        type_: CONDITION_TYPE_DEGRADED.to_string(),
        status: CONDITION_STATUS_FALSE.to_string(),
        last_transition_time: Utc::now().to_rfc3339(),
        reason: "NoIssues".to_string(),
        message: "No degradation detected".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_condition_adds_new() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, CONDITION_TYPE_READY, CONDITION_STATUS_TRUE, "AllHealthy", "ok");

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].type_, CONDITION_TYPE_READY);
        assert_eq!(conditions[0].status, CONDITION_STATUS_TRUE);
    }

    #[test]
    fn set_condition_updates_existing_and_bumps_time_only_on_status_change() {
        let mut conditions = vec![Condition {
            type_: CONDITION_TYPE_READY.to_string(),
            status: CONDITION_STATUS_FALSE.to_string(),
            last_transition_time: "2024-01-01T00:00:00Z".to_string(),
            reason: "NotHealthy".to_string(),
            message: "not ready".to_string(),
        }];

        let old_time = conditions[0].last_transition_time.clone();
        set_condition(&mut conditions, CONDITION_TYPE_READY, CONDITION_STATUS_TRUE, "Healthy", "ready");

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, CONDITION_STATUS_TRUE);
        assert_ne!(conditions[0].last_transition_time, old_time);
    }

    #[test]
    fn ready_requires_all_three_subconditions() {
        let mut conditions = Vec::new();
        set_control_plane_ready(&mut conditions, 3, 3);
        set_workers_ready(&mut conditions, 1, 2);
        set_addons_healthy(&mut conditions, true, 2, 2);
        set_ready(&mut conditions);
        assert!(!is_condition_true(&conditions, CONDITION_TYPE_READY));

        set_workers_ready(&mut conditions, 2, 2);
        set_ready(&mut conditions);
        assert!(is_condition_true(&conditions, CONDITION_TYPE_READY));
    }

    #[test]
    fn find_condition_returns_none_when_absent() {
        let conditions = vec![progressing_condition("Syncing", "working")];
        assert!(find_condition(&conditions, CONDITION_TYPE_READY).is_none());
        assert!(find_condition(&conditions, CONDITION_TYPE_PROGRESSING).is_some());
    }
}
