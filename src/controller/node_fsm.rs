//! Node lifecycle FSM helpers (§4.3)
//!
//! The FSM's states live on `NodeStatus.phase` (`crd::NodePhase`); this
//! module holds the pure, state-independent helpers shared by the phase
//! machine, self-healing, and scaling: stuck-phase timeouts and the
//! legal transition set used by tests.

use std::time::Duration;

use chrono::Utc;

use crate::crd::{NodePhase, NodeStatus};

use super::constants::phase_timeout;

/// Timeout for a node stuck in the given phase, if that phase is bounded.
///
/// Phases not in this table (`Ready`, `NodeInitializing`, `RebootingWithConfig`,
/// `RemovingFromEtcd`, `Failed`) have no stuck-node timeout of their own —
/// `RebootingWithConfig`/`NodeInitializing` are expected to be transient
/// and are bounded instead by the downstream `WaitingForK8s`/`nodeReadyTimeout`
/// waits that follow them.
pub fn stuck_timeout(phase: NodePhase) -> Option<Duration> {
    match phase {
        NodePhase::CreatingServer => Some(phase_timeout::CREATING_SERVER),
        NodePhase::WaitingForTalosApi => Some(phase_timeout::WAITING_FOR_TALOS_API),
        NodePhase::ApplyingTalosConfig => Some(phase_timeout::APPLYING_TALOS_CONFIG),
        NodePhase::WaitingForK8s => Some(phase_timeout::WAITING_FOR_K8S),
        _ => None,
    }
}

/// Whether a node has been in its current phase longer than that phase's timeout.
pub fn is_stuck(node: &NodeStatus) -> bool {
    let Some(timeout) = stuck_timeout(node.phase) else {
        return false;
    };
    let Some(since) = node.phase_since else {
        return false;
    };
    Utc::now().signed_duration_since(since).to_std().unwrap_or_default() > timeout
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn node_within_timeout_is_not_stuck() {
        let mut node = NodeStatus::new("cp-1", NodePhase::CreatingServer);
        node.phase_since = Some(Utc::now() - ChronoDuration::minutes(1));
        assert!(!is_stuck(&node));
    }

    #[test]
    fn node_past_timeout_is_stuck() {
        let mut node = NodeStatus::new("cp-1", NodePhase::CreatingServer);
        node.phase_since = Some(Utc::now() - ChronoDuration::minutes(11));
        assert!(is_stuck(&node));
    }

    #[test]
    fn unbounded_phase_is_never_stuck() {
        let mut node = NodeStatus::new("cp-1", NodePhase::Ready);
        node.phase_since = Some(Utc::now() - ChronoDuration::days(3650));
        assert!(!is_stuck(&node));
    }
}
