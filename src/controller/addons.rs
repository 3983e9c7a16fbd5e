//! Addon Installer (§4.6)
//!
//! Installs one pending addon step per reconcile tick, in a fixed order,
//! with bounded exponential backoff on failure. CNI/Cilium is handled by
//! the CNI phase, not here — this module owns everything after it.

use chrono::Utc;

use crate::crd::{AddonPhase, AddonStatus, AddonsSpec, ClusterStatus};
use crate::error::Result;

use super::constants::addon_backoff;
use super::deps::Deps;

/// One entry of the fixed addon order (§4.6). The CNI step is intentionally
/// absent — it is installed by the CNI phase before this module ever runs.
const ADDON_ORDER: &[(&str, fn(&AddonsSpec) -> bool)] = &[
    ("ccm", |a| a.ccm),
    ("csi", |a| a.csi),
    ("metrics-server", |a| a.metrics_server),
    ("cert-manager", |a| a.cert_manager),
    ("traefik", |a| a.traefik),
    ("external-dns", |a| a.external_dns),
    ("argocd", |a| a.argocd),
    ("monitoring", |a| a.monitoring),
    ("talos-backup", |a| a.talos_backup),
];

/// Installs addon rendering/applying is an out-of-scope primitive (§1); this
/// trait is the seam a production binary plugs a real Helm-equivalent
/// installer into. Tests use a stub that always succeeds or a configurable
/// failing one.
#[async_trait::async_trait]
pub trait AddonApplier: Send + Sync {
    async fn install(&self, addon: &str) -> Result<()>;
    async fn is_healthy(&self, addon: &str) -> Result<bool>;
}

/// Enabled addon names in fixed install order.
pub fn enabled_steps(addons: &AddonsSpec) -> Vec<&'static str> {
    ADDON_ORDER.iter().filter(|(_, enabled)| enabled(addons)).map(|(name, _)| *name).collect()
}

/// Ensure every enabled addon has a (possibly `Pending`) `AddonStatus` entry.
pub fn ensure_addon_entries(status: &mut ClusterStatus, addons: &AddonsSpec) {
    for (order, name) in enabled_steps(addons).into_iter().enumerate() {
        status.addons.entry(name.to_string()).or_insert_with(|| AddonStatus::pending(order as u32));
    }
}

/// Install the next pending addon step, if any. Returns `true` when an
/// install was attempted this tick (whether it succeeded or failed) — the
/// caller should requeue immediately either way, per §4.6.
pub async fn install_next(
    status: &mut ClusterStatus,
    addons: &AddonsSpec,
    applier: &dyn AddonApplier,
) -> Result<bool> {
    ensure_addon_entries(status, addons);

    let next = enabled_steps(addons)
        .into_iter()
        .find(|name| status.addons.get(*name).map(|s| s.phase != AddonPhase::Installed).unwrap_or(true));

    let Some(name) = next else {
        return Ok(false);
    };

    let entry = status.addons.entry(name.to_string()).or_insert_with(|| AddonStatus::pending(0));
    if entry.started_at.is_none() {
        entry.started_at = Some(Utc::now());
    }
    entry.phase = AddonPhase::Installing;

    match applier.install(name).await {
        Ok(()) => {
            let now = Utc::now();
            entry.phase = AddonPhase::Installed;
            entry.installed = true;
            entry.healthy = true;
            entry.last_transition_time = Some(now);
            entry.duration_secs = entry.started_at.map(|s| (now - s).num_seconds());
            entry.message = None;
        }
        Err(err) => {
            entry.phase = AddonPhase::Failed;
            entry.retry_count += 1;
            entry.last_transition_time = Some(Utc::now());
            entry.message = Some(err.to_string());
        }
    }

    Ok(true)
}

/// Requeue delay after the most recent install attempt, per the retry count
/// of whichever addon is currently `Failed` (there is at most one active
/// step per tick, so the first `Failed` entry found is the right one).
pub fn next_requeue_hint(status: &ClusterStatus) -> Option<std::time::Duration> {
    status
        .addons
        .values()
        .find(|a| a.phase == AddonPhase::Failed)
        .map(|a| addon_backoff(a.retry_count))
}

/// Whether every enabled addon has reached `Installed`.
pub fn all_installed(status: &ClusterStatus, addons: &AddonsSpec) -> bool {
    enabled_steps(addons)
        .iter()
        .all(|name| status.addons.get(*name).map(|s| s.phase == AddonPhase::Installed).unwrap_or(false))
}

/// Runtime health check pass (§4.6): separate from installation. API errors
/// are swallowed — an addon that cannot be checked stays at its last known
/// health, since flapping on transient API errors is worse than staleness.
pub async fn check_health(status: &mut ClusterStatus, applier: &dyn AddonApplier) {
    for (name, entry) in status.addons.iter_mut() {
        if entry.phase != AddonPhase::Installed {
            continue;
        }
        if let Ok(healthy) = applier.is_healthy(name).await {
            entry.healthy = healthy;
        }
    }
}

/// True only when every installed addon is healthy — backs the `AddonsHealthy` condition.
pub fn all_healthy(status: &ClusterStatus) -> bool {
    status.addons.values().filter(|a| a.installed).all(|a| a.healthy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    struct StubApplier {
        fail_once: AtomicBool,
        installed: StdMutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl AddonApplier for StubApplier {
        async fn install(&self, addon: &str) -> Result<()> {
            if self.fail_once.swap(false, Ordering::SeqCst) {
                return Err(crate::error::Error::Fatal("boom".to_string()));
            }
            self.installed.lock().unwrap().push(addon.to_string());
            Ok(())
        }

        async fn is_healthy(&self, _addon: &str) -> Result<bool> {
            Ok(true)
        }
    }

    fn addons_with(ccm: bool, csi: bool) -> AddonsSpec {
        AddonsSpec { ccm, csi, ..Default::default() }
    }

    #[tokio::test]
    async fn installs_in_fixed_order_one_step_per_tick() {
        let mut status = ClusterStatus::default();
        let addons = addons_with(true, true);
        let applier = StubApplier { fail_once: AtomicBool::new(false), installed: StdMutex::new(Vec::new()) };

        assert!(install_next(&mut status, &addons, &applier).await.unwrap());
        assert_eq!(status.addons["ccm"].phase, AddonPhase::Installed);
        assert_ne!(status.addons["csi"].phase, AddonPhase::Installed);

        assert!(install_next(&mut status, &addons, &applier).await.unwrap());
        assert!(all_installed(&status, &addons));
    }

    #[tokio::test]
    async fn failure_then_retry_succeeds() {
        let mut status = ClusterStatus::default();
        let addons = addons_with(true, false);
        let applier = StubApplier { fail_once: AtomicBool::new(true), installed: StdMutex::new(Vec::new()) };

        install_next(&mut status, &addons, &applier).await.unwrap();
        assert_eq!(status.addons["ccm"].phase, AddonPhase::Failed);
        assert_eq!(status.addons["ccm"].retry_count, 1);
        assert_eq!(next_requeue_hint(&status), Some(addon_backoff(1)));

        install_next(&mut status, &addons, &applier).await.unwrap();
        assert_eq!(status.addons["ccm"].phase, AddonPhase::Installed);
    }

    #[test]
    fn no_pending_steps_when_nothing_enabled() {
        let status = ClusterStatus::default();
        let addons = AddonsSpec::default();
        assert!(all_installed(&status, &addons));
    }
}
