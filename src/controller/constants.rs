//! Authoritative timing constants (§6)
//!
//! Process-wide immutable, per the design notes' treatment of global
//! constants: initialized once, never mutated at runtime.

use std::time::Duration;

pub const DEFAULT_REQUEUE_AFTER: Duration = Duration::from_secs(30);
pub const FAST_REQUEUE_AFTER: Duration = Duration::from_secs(10);
pub const WORKER_READY_REQUEUE_AFTER: Duration = Duration::from_secs(15);

pub const DEFAULT_NODE_NOT_READY_THRESHOLD: Duration = Duration::from_secs(3 * 60);
pub const DEFAULT_ETCD_UNHEALTHY_THRESHOLD: Duration = Duration::from_secs(2 * 60);

pub const SERVER_IP_TIMEOUT: Duration = Duration::from_secs(2 * 60);
pub const NODE_READY_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const CILIUM_READY_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const CILIUM_CHECK_INTERVAL: Duration = Duration::from_secs(10);
pub const KUBECONFIG_TIMEOUT: Duration = Duration::from_secs(2 * 60);

pub const STATUS_UPDATE_RETRIES: u32 = 3;
pub const STATUS_RETRY_INTERVAL: Duration = Duration::from_millis(100);

pub const DEFAULT_MAX_CONCURRENT_HEALS: usize = 1;

/// Per-`NodePhase` stuck-node timeouts (§4.1)
pub mod phase_timeout {
    use std::time::Duration;

    pub const CREATING_SERVER: Duration = Duration::from_secs(10 * 60);
    pub const WAITING_FOR_TALOS_API: Duration = Duration::from_secs(5 * 60);
    pub const APPLYING_TALOS_CONFIG: Duration = Duration::from_secs(3 * 60);
    pub const WAITING_FOR_K8S: Duration = Duration::from_secs(10 * 60);
}

/// Exponential backoff schedule for addon install retries (§4.6): `{1: 10s, 2: 30s, >=3: 60s}`
pub fn addon_backoff(retry_count: u32) -> Duration {
    match retry_count {
        0 | 1 => Duration::from_secs(10),
        2 => Duration::from_secs(30),
        _ => Duration::from_secs(60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addon_backoff_schedule_matches_spec() {
        assert_eq!(addon_backoff(1), Duration::from_secs(10));
        assert_eq!(addon_backoff(2), Duration::from_secs(30));
        assert_eq!(addon_backoff(3), Duration::from_secs(60));
        assert_eq!(addon_backoff(10), Duration::from_secs(60));
    }
}
