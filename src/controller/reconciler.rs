//! Reconcile Entry (§4.1) and Phase Machine (§4.2)
//!
//! This is the orchestrator the watch runtime invokes per cluster key. It
//! is deliberately a sequence of short, synchronous-looking steps
//! separated by persisted status and explicit requeue hints (§9 Design
//! Notes: "do not model the loop as long-lived async tasks").

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use kube::{
    api::Api,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    Client, ResourceExt,
};
use tracing::{error, info, instrument, warn};

use crate::crd::{
    push_bounded_error, Cluster, ClusterPhase, ClusterStatus, Credentials, ErrorRecord,
    NodeGroupStatus, NodePhase, NodeStatus, PhaseRecord, ProvisioningPhase,
};
use crate::error::{Error, Result};

use super::addons::{self, AddonApplier};
use super::conditions;
use super::constants::{
    CILIUM_CHECK_INTERVAL, CILIUM_READY_TIMEOUT, DEFAULT_REQUEUE_AFTER, FAST_REQUEUE_AFTER,
    WORKER_READY_REQUEUE_AFTER,
};
use super::credentials;
use super::deps::Deps;
use super::events::{self, reason, TYPE_NORMAL, TYPE_WARNING};
use super::finalizers;
use super::healing;
use super::health;
use super::node_fsm;
use super::provision::{self, ProvisionRequest, ROLE_CONTROL_PLANE, ROLE_WORKER};
use super::scaling;
use super::ssh;
use super::status as status_writer;
use super::verifier::{self, K8sObservation};

/// Shared state for the controller: the four collaborator surfaces (as
/// `Deps`), plus the addon applier. Built once at process start by
/// `main.rs`; tests build one from `controller::mock` + a stub applier.
pub struct ControllerState {
    pub deps: Deps,
    pub addon_applier: Arc<dyn AddonApplier>,
}

/// Builder mirroring §9 Design Notes: "explicit dependency objects passed
/// into the reconciler constructor (builder with optional overrides)".
pub struct ReconcilerBuilder {
    deps: Deps,
    addon_applier: Arc<dyn AddonApplier>,
}

impl ReconcilerBuilder {
    pub fn new(deps: Deps, addon_applier: Arc<dyn AddonApplier>) -> Self {
        Self { deps, addon_applier }
    }

    pub fn max_concurrent_heals(mut self, n: usize) -> Self {
        self.deps.max_concurrent_heals = n;
        self
    }

    pub fn default_requeue_after(mut self, d: Duration) -> Self {
        self.deps.default_requeue_after = d;
        self
    }

    pub fn build(self) -> ControllerState {
        ControllerState { deps: self.deps, addon_applier: self.addon_applier }
    }
}

/// Starts the watch/reconcile loop. The watch/informer runtime itself is
/// an out-of-scope collaborator (§1); this wires `kube_runtime::Controller`
/// as the concrete instance of it.
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let client = state.deps.client.clone();
    let clusters: Api<Cluster> = Api::all(client.clone());

    info!("starting k8zner cluster controller");

    if let Err(err) = clusters.list(&Default::default()).await {
        error!(%err, "Cluster CRD not found; install it before starting the operator");
        return Err(Error::ConfigError("Cluster CRD not installed".to_string()));
    }

    Controller::new(clusters, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!(object = ?o.0, "reconciled"),
                Err(err) => error!(%err, "reconcile failed"),
            }
        })
        .await;

    Ok(())
}

#[instrument(skip(ctx, cluster), fields(name = %cluster.name_any(), namespace = cluster.namespace()))]
async fn reconcile(cluster: Arc<Cluster>, ctx: Arc<ControllerState>) -> Result<Action> {
    reconcile_cluster(&ctx.deps, &ctx.addon_applier, &cluster).await
}

fn error_policy(cluster: Arc<Cluster>, error: &Error, ctx: Arc<ControllerState>) -> Action {
    error!(cluster = %cluster.name_any(), %error, "reconcile returned a fatal error");
    let delay = if error.is_retriable() { FAST_REQUEUE_AFTER } else { ctx.deps.default_requeue_after };
    Action::requeue(delay)
}

/// The Reconcile Entry contract (§4.1), steps 1-8.
pub async fn reconcile_cluster(
    deps: &Deps,
    applier: &Arc<dyn AddonApplier>,
    cluster: &Cluster,
) -> Result<Action> {
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let name = cluster.name_any();

    if finalizers::is_being_deleted(cluster) {
        return handle_deletion(deps, cluster).await;
    }
    if !finalizers::has_finalizer(cluster) {
        finalizers::add_finalizer(&deps.client, cluster).await?;
    }

    let mut status = cluster.status.clone().unwrap_or_default();
    status.last_reconcile_time = Some(Utc::now());
    status.observed_generation = match (status.observed_generation, cluster.metadata.generation) {
        (Some(prev), Some(gen)) => Some(prev.max(gen)),
        (None, Some(gen)) => Some(gen),
        (prev, None) => prev,
    };

    if cluster.spec.paused {
        status_writer::write_status(&deps.client, &namespace, &name, status).await?;
        return Ok(Action::requeue(DEFAULT_REQUEUE_AFTER));
    }

    // Step 2: Health Probe.
    let health_list = health::probe_nodes(&deps.client).await.unwrap_or_default();
    let health_map: BTreeMap<String, health::NodeHealth> =
        health_list.into_iter().map(|h| (h.name.clone(), h)).collect();
    let newly_unhealthy_cp = health::apply_health(&mut status.control_planes.nodes, &health_map);
    let newly_unhealthy_workers = health::apply_health(&mut status.workers.nodes, &health_map);
    status.control_planes.recompute_counts();
    status.workers.recompute_counts();
    for name in newly_unhealthy_cp.iter().chain(newly_unhealthy_workers.iter()) {
        events::emit_event(&deps.client, cluster, TYPE_WARNING, reason::NODE_UNHEALTHY, &format!("node {name} is not ready")).await;
    }

    // Step 3: Node State Verifier, non-fatal, for every tracked node not already Ready.
    verify_tracked_nodes(deps, &health_map, &mut status.control_planes).await;
    verify_tracked_nodes(deps, &health_map, &mut status.workers).await;

    // Step 4: refresh desired counts from spec.
    status.control_planes.desired = cluster.spec.control_planes.count;
    status.workers.desired = cluster.spec.workers.count;

    // Step 5: stuck-node cleanup.
    cleanup_stuck_nodes(deps, &mut status.control_planes).await;
    cleanup_stuck_nodes(deps, &mut status.workers).await;

    // Step 6: dispatch.
    let dispatch_result = if !cluster.spec.credentials_ref.name.trim().is_empty() {
        run_phase_machine(deps, applier, cluster, &mut status).await
    } else {
        Ok(legacy_health_only_action(&status))
    };

    // Step 7: overall Phase, always updated regardless of dispatch outcome.
    update_overall_phase(&mut status);

    // Step 8: Status Writer.
    status_writer::write_status(&deps.client, &namespace, &name, status).await?;

    match dispatch_result {
        Ok(action) => Ok(action),
        Err(err) => {
            events::emit_event(&deps.client, cluster, TYPE_WARNING, err.event_reason(), &err.to_string()).await;
            if err.kind() == crate::error::ErrorKind::Fatal {
                Err(err)
            } else {
                Ok(Action::requeue(DEFAULT_REQUEUE_AFTER))
            }
        }
    }
}

/// Finalizer cleanup (§10.7): best-effort teardown of every cloud server
/// this cluster provisioned, then release the finalizer so Kubernetes can
/// garbage-collect the object. Network, firewall, and load balancer are
/// shared, create-if-absent infrastructure (§5, §6) — the cloud client
/// exposes no delete for them, so they are left in place, same as a failed
/// mid-provision control plane is left running rather than torn down.
async fn handle_deletion(deps: &Deps, cluster: &Cluster) -> Result<Action> {
    if !finalizers::has_finalizer(cluster) {
        return Ok(Action::await_change());
    }

    let cluster_name = cluster.name_any();
    let labels = BTreeMap::from([("cluster".to_string(), cluster_name.clone())]);
    match deps.cloud.get_servers_by_label(&labels).await {
        Ok(servers) => {
            for server in servers {
                if let Err(err) = deps.cloud.delete_server(&server.name).await {
                    warn!(cluster = %cluster_name, server = %server.name, %err, "failed to delete server during cluster teardown, will retry");
                }
            }
        }
        Err(err) => {
            warn!(cluster = %cluster_name, %err, "failed to list servers during cluster teardown, will retry");
            return Ok(Action::requeue(FAST_REQUEUE_AFTER));
        }
    }

    finalizers::remove_finalizer(&deps.client, cluster).await?;
    info!(cluster = %cluster_name, "cluster finalizer removed, teardown complete");
    Ok(Action::await_change())
}

async fn verify_tracked_nodes(deps: &Deps, health_map: &BTreeMap<String, health::NodeHealth>, group: &mut NodeGroupStatus) {
    for node in group.nodes.iter_mut() {
        if node.phase == NodePhase::Ready && node.healthy {
            continue;
        }
        let k8s = health_map.get(&node.name).map(|h| K8sObservation {
            node_exists: true,
            kubelet_running: h.healthy || h.unhealthy_reason.is_some(),
            ready: h.healthy,
        });
        let phase = verifier::verify_node_phase(&deps.cloud, &deps.node_os, &node.name, k8s).await;
        node.set_phase(phase);
    }
}

/// Stuck-node policy (§4.1): delete the underlying server best-effort and
/// drop the `NodeStatus` so the next tick recreates it. Also removes any
/// node whose derived phase is `Failed` (server missing) per §8.
async fn cleanup_stuck_nodes(deps: &Deps, group: &mut NodeGroupStatus) {
    let mut i = 0;
    while i < group.nodes.len() {
        let stuck = node_fsm::is_stuck(&group.nodes[i]) || group.nodes[i].phase == NodePhase::Failed;
        if stuck {
            let name = group.nodes[i].name.clone();
            warn!(node = %name, phase = ?group.nodes[i].phase, "node stuck or failed, removing for recreation");
            let _ = deps.cloud.delete_server(&name).await;
            group.nodes.remove(i);
        } else {
            i += 1;
        }
    }
    group.recompute_counts();
}

fn legacy_health_only_action(status: &ClusterStatus) -> Action {
    let _ = status;
    Action::requeue(DEFAULT_REQUEUE_AFTER)
}

fn record_phase_transition(status: &mut ClusterStatus, new_phase: ProvisioningPhase) {
    let now = Utc::now();
    if let Some(open) = status.phase_history.iter_mut().rev().find(|p| p.ended_at.is_none()) {
        open.ended_at = Some(now);
        open.duration_secs = Some((now - open.started_at).num_seconds());
    }
    status.phase_history.push(PhaseRecord { phase: new_phase, started_at: now, ended_at: None, duration_secs: None, error: None });
    status.provisioning_phase = new_phase;
    status.phase_started_at = Some(now);
}

fn record_phase_error(status: &mut ClusterStatus, component: &str, message: &str) {
    if let Some(open) = status.phase_history.iter_mut().rev().find(|p| p.ended_at.is_none()) {
        open.error = Some(message.to_string());
    }
    push_bounded_error(&mut status.last_errors, ErrorRecord { component: component.to_string(), message: message.to_string(), time: Utc::now() });
}

/// The Phase Machine (§4.2).
async fn run_phase_machine(
    deps: &Deps,
    applier: &Arc<dyn AddonApplier>,
    cluster: &Cluster,
    status: &mut ClusterStatus,
) -> Result<Action> {
    // Start-state selection, only on the very first reconcile.
    if status.phase_history.is_empty() {
        let start = if cluster.spec.bootstrap_completed() { ProvisioningPhase::Cni } else { ProvisioningPhase::Infrastructure };
        record_phase_transition(status, start);
        return Ok(Action::requeue(FAST_REQUEUE_AFTER));
    }

    match status.provisioning_phase {
        ProvisioningPhase::Infrastructure => phase_infrastructure(deps, cluster, status).await,
        ProvisioningPhase::Image => phase_image(deps, cluster, status).await,
        ProvisioningPhase::Compute => phase_compute(deps, cluster, status).await,
        ProvisioningPhase::Bootstrap => phase_bootstrap(deps, cluster, status).await,
        ProvisioningPhase::Cni => phase_cni(deps, applier, cluster, status).await,
        ProvisioningPhase::Addons => phase_addons(deps, applier, cluster, status).await,
        // §9 Open Questions: new implementations omit `Configuring`; alias it to CNI.
        ProvisioningPhase::Configuring => {
            record_phase_transition(status, ProvisioningPhase::Cni);
            Ok(Action::requeue(FAST_REQUEUE_AFTER))
        }
        ProvisioningPhase::Complete => phase_complete(deps, cluster, status).await,
    }
}

async fn phase_infrastructure(deps: &Deps, cluster: &Cluster, status: &mut ClusterStatus) -> Result<Action> {
    if status.infrastructure.is_provisioned() {
        record_phase_transition(status, ProvisioningPhase::Image);
        return Ok(Action::requeue(FAST_REQUEUE_AFTER));
    }

    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let _creds: Credentials = match credentials::load_credentials(&deps.client, &namespace, &cluster.spec).await {
        Ok(c) => c,
        Err(err) => {
            record_phase_error(status, "Infrastructure", &err.to_string());
            return Err(err.into());
        }
    };

    let cluster_name = cluster.name_any();

    // Operations are idempotent by name (§5): this discovers already-existing
    // infrastructure, or creates it, via the cloud wrapper's create-if-absent
    // semantics.
    let network_id = deps.cloud.get_network(&cluster_name).await?;
    let firewall_id = deps.cloud.get_firewall(&cluster_name).await?;
    let load_balancer_id = deps.cloud.get_load_balancer(&cluster_name).await?;

    match (network_id, firewall_id, load_balancer_id) {
        (Some(network_id), Some(firewall_id), Some(load_balancer_id)) => {
            status.infrastructure.network_id = network_id;
            status.infrastructure.firewall_id = firewall_id;
            status.infrastructure.load_balancer_id = load_balancer_id;
            status.infrastructure.network_ready = true;
            status.infrastructure.firewall_ready = true;
            status.infrastructure.load_balancer_ready = true;
            if let Some(ip) = cluster.spec.bootstrap.as_ref().and_then(|b| b.public_ip.clone()) {
                status.control_plane_endpoint = Some(ip);
            }
            record_phase_transition(status, ProvisioningPhase::Image);
            Ok(Action::requeue(FAST_REQUEUE_AFTER))
        }
        _ => {
            let msg = "infrastructure (network/firewall/load balancer) not yet available".to_string();
            record_phase_error(status, "Infrastructure", &msg);
            Ok(Action::requeue(DEFAULT_REQUEUE_AFTER))
        }
    }
}

fn snapshot_labels(cluster: &Cluster) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("managed-by".to_string(), "k8zner-operator".to_string()),
        ("node-os-version".to_string(), cluster.spec.node_os.version.clone()),
    ])
}

async fn phase_image(deps: &Deps, cluster: &Cluster, status: &mut ClusterStatus) -> Result<Action> {
    match deps.cloud.get_snapshot_by_labels(&snapshot_labels(cluster)).await {
        Ok(Some(_id)) => {
            record_phase_transition(status, ProvisioningPhase::Compute);
            Ok(Action::requeue(FAST_REQUEUE_AFTER))
        }
        Ok(None) => {
            record_phase_error(status, "Image", "no snapshot available for node-OS version");
            Ok(Action::requeue(DEFAULT_REQUEUE_AFTER))
        }
        Err(err) => {
            record_phase_error(status, "Image", &err.to_string());
            Err(err)
        }
    }
}

async fn phase_compute(deps: &Deps, cluster: &Cluster, status: &mut ClusterStatus) -> Result<Action> {
    let cluster_name = cluster.name_any();
    let snapshot_id = deps
        .cloud
        .get_snapshot_by_labels(&snapshot_labels(cluster))
        .await?
        .unwrap_or_else(|| "snapshot-1".to_string());

    if cluster.spec.bootstrap_completed() {
        if status.control_planes.nodes.is_empty() {
            let mut bootstrap_node = NodeStatus::new(format!("{cluster_name}-cp-bootstrap"), NodePhase::Ready);
            bootstrap_node.healthy = true;
            bootstrap_node.public_ip = cluster.spec.bootstrap.as_ref().and_then(|b| b.public_ip.clone());
            status.control_planes.nodes.push(bootstrap_node);
            status.control_planes.recompute_counts();
        }

        let created = scaling::scale_up_workers(
            deps,
            &mut status.workers,
            cluster.spec.workers.count,
            &cluster.spec.workers.size,
            &cluster.spec.region,
            &status.infrastructure.network_id,
            &snapshot_id,
            &cluster_name,
            usize::MAX,
        )
        .await?;

        if (status.workers.nodes.len() as i32) >= cluster.spec.workers.count {
            record_phase_transition(status, ProvisioningPhase::Addons);
        }
        let _ = created;
        return Ok(Action::requeue(FAST_REQUEUE_AFTER));
    }

    // Fresh cluster: create control-plane and worker servers (no node-OS
    // config applied yet — that is Bootstrap's job).
    let mut progressed = false;

    for i in status.control_planes.nodes.len()..cluster.spec.control_planes.count as usize {
        let name = format!("{cluster_name}-cp-{i}");
        match provision::create_and_wait_for_ip(
            deps,
            &ProvisionRequest {
                name: name.clone(),
                role: ROLE_CONTROL_PLANE,
                size: &cluster.spec.control_planes.size,
                region: &cluster.spec.region,
                network_id: &status.infrastructure.network_id,
                ssh_key_name: "",
                cluster_name: &cluster_name,
                snapshot_id: &snapshot_id,
            },
        )
        .await
        {
            Ok(node) => {
                status.control_planes.nodes.push(node);
                progressed = true;
            }
            Err(err) => {
                record_phase_error(status, "Compute", &err.to_string());
                return Err(err);
            }
        }
    }

    for i in status.workers.nodes.len()..cluster.spec.workers.count as usize {
        let name = format!("{cluster_name}-worker-{i}");
        match provision::create_and_wait_for_ip(
            deps,
            &ProvisionRequest {
                name: name.clone(),
                role: ROLE_WORKER,
                size: &cluster.spec.workers.size,
                region: &cluster.spec.region,
                network_id: &status.infrastructure.network_id,
                ssh_key_name: "",
                cluster_name: &cluster_name,
                snapshot_id: &snapshot_id,
            },
        )
        .await
        {
            Ok(node) => {
                status.workers.nodes.push(node);
                progressed = true;
            }
            Err(err) => {
                record_phase_error(status, "Compute", &err.to_string());
                return Err(err);
            }
        }
    }

    status.control_planes.recompute_counts();
    status.workers.recompute_counts();

    let all_created = status.control_planes.nodes.len() as i32 >= cluster.spec.control_planes.count
        && status.workers.nodes.len() as i32 >= cluster.spec.workers.count;
    if all_created {
        record_phase_transition(status, ProvisioningPhase::Bootstrap);
    }

    Ok(Action::requeue(if progressed { FAST_REQUEUE_AFTER } else { DEFAULT_REQUEUE_AFTER }))
}

async fn phase_bootstrap(deps: &Deps, cluster: &Cluster, status: &mut ClusterStatus) -> Result<Action> {
    let cp_public_ips: Vec<String> = status.control_planes.nodes.iter().filter_map(|n| n.public_ip.clone()).collect();

    for idx in 0..status.control_planes.nodes.len() {
        if status.control_planes.nodes[idx].phase == NodePhase::Ready {
            continue;
        }
        let (name, server_id, ip) = {
            let n = &status.control_planes.nodes[idx];
            (n.name.clone(), n.server_id.clone(), n.private_ip.clone())
        };
        let Some(ip) = ip else { continue };

        let config = {
            let gen = deps.config_gen.lock().await;
            gen.generate_control_plane_config(&cp_public_ips, &name, &server_id)?
        };

        if let Err(err) = provision::apply_config_and_wait_ready(deps, &ip, &config).await {
            record_phase_error(status, "Bootstrap", &err.to_string());
            // A control plane may already be an etcd member by this point (§4.4 step 5 analogue).
            return Err(err);
        }
        status.control_planes.nodes[idx].set_phase(NodePhase::Ready);
        status.control_planes.nodes[idx].healthy = true;
    }

    for idx in 0..status.workers.nodes.len() {
        if status.workers.nodes[idx].phase == NodePhase::Ready {
            continue;
        }
        let (name, server_id, ip) = {
            let n = &status.workers.nodes[idx];
            (n.name.clone(), n.server_id.clone(), n.private_ip.clone())
        };
        let Some(ip) = ip else { continue };

        let config = {
            let gen = deps.config_gen.lock().await;
            gen.generate_worker_config(&name, &server_id)?
        };

        if let Err(err) = provision::apply_config_and_wait_ready(deps, &ip, &config).await {
            record_phase_error(status, "Bootstrap", &err.to_string());
            let _ = deps.cloud.delete_server(&name).await;
            status.workers.nodes.remove(idx);
            status.workers.recompute_counts();
            return Ok(Action::requeue(DEFAULT_REQUEUE_AFTER));
        }
        status.workers.nodes[idx].set_phase(NodePhase::Ready);
        status.workers.nodes[idx].healthy = true;
    }

    status.control_planes.recompute_counts();
    status.workers.recompute_counts();

    let all_ready = status.control_planes.nodes.iter().all(|n| n.phase == NodePhase::Ready)
        && status.workers.nodes.iter().all(|n| n.phase == NodePhase::Ready);
    if all_ready {
        record_phase_transition(status, ProvisioningPhase::Cni);
    }

    let _ = cluster;
    Ok(Action::requeue(FAST_REQUEUE_AFTER))
}

const CNI_ADDON_NAME: &str = "cilium";

async fn phase_cni(deps: &Deps, applier: &Arc<dyn AddonApplier>, cluster: &Cluster, status: &mut ClusterStatus) -> Result<Action> {
    let already_installed = status.addons.get(CNI_ADDON_NAME).map(|a| a.installed).unwrap_or(false);

    if !already_installed {
        events::emit_event(&deps.client, cluster, TYPE_NORMAL, reason::PHASE_CNI, "installing CNI").await;
        if let Err(err) = applier.install(CNI_ADDON_NAME).await {
            record_phase_error(status, "CNI", &err.to_string());
            return Ok(Action::requeue(DEFAULT_REQUEUE_AFTER));
        }

        let deadline = tokio::time::Instant::now() + CILIUM_READY_TIMEOUT;
        let mut ready = false;
        loop {
            if applier.is_healthy(CNI_ADDON_NAME).await.unwrap_or(false) {
                ready = true;
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(CILIUM_CHECK_INTERVAL).await;
        }

        if !ready {
            record_phase_error(status, "CNI", "CNI pods did not become ready within timeout");
            events::emit_event(&deps.client, cluster, TYPE_WARNING, reason::CNI_FAILED, "CNI not ready in time").await;
            return Ok(Action::requeue(DEFAULT_REQUEUE_AFTER));
        }

        let now = Utc::now();
        let entry = status.addons.entry(CNI_ADDON_NAME.to_string()).or_insert_with(|| crate::crd::AddonStatus::pending(0));
        entry.installed = true;
        entry.healthy = true;
        entry.phase = crate::crd::AddonPhase::Installed;
        entry.started_at = entry.started_at.or(Some(now));
        entry.last_transition_time = Some(now);
    }

    let next = if cluster.spec.bootstrap_completed() { ProvisioningPhase::Compute } else { ProvisioningPhase::Addons };
    record_phase_transition(status, next);
    Ok(Action::requeue(FAST_REQUEUE_AFTER))
}

async fn phase_addons(deps: &Deps, applier: &Arc<dyn AddonApplier>, cluster: &Cluster, status: &mut ClusterStatus) -> Result<Action> {
    let addons_spec = cluster.spec.addons();

    // "ensure worker desired count is satisfied (trigger scale-up if not)".
    if (status.workers.nodes.len() as i32) < cluster.spec.workers.count {
        let cluster_name = cluster.name_any();
        let snapshot_id = deps
            .cloud
            .get_snapshot_by_labels(&snapshot_labels(cluster))
            .await?
            .unwrap_or_else(|| "snapshot-1".to_string());
        scaling::scale_up_workers(
            deps,
            &mut status.workers,
            cluster.spec.workers.count,
            &cluster.spec.workers.size,
            &cluster.spec.region,
            &status.infrastructure.network_id,
            &snapshot_id,
            &cluster_name,
            deps.max_concurrent_heals,
        )
        .await?;
        return Ok(Action::requeue(WORKER_READY_REQUEUE_AFTER));
    }

    let attempted = addons::install_next(status, &addons_spec, applier.as_ref()).await?;

    if !attempted && addons::all_installed(status, &addons_spec) {
        record_phase_transition(status, ProvisioningPhase::Complete);
        status.phase = ClusterPhase::Running;
        events::emit_event(&deps.client, cluster, TYPE_NORMAL, reason::PROVISIONING_COMPLETE, "cluster provisioning complete").await;
        return Ok(Action::requeue(DEFAULT_REQUEUE_AFTER));
    }

    let delay = addons::next_requeue_hint(status).unwrap_or(FAST_REQUEUE_AFTER);
    Ok(Action::requeue(delay))
}

/// Complete (§4.2): the running-cluster convergence loop — self-healing and
/// scaling for both node groups, every tick.
async fn phase_complete(deps: &Deps, cluster: &Cluster, status: &mut ClusterStatus) -> Result<Action> {
    let cluster_name = cluster.name_any();
    let snapshot_id = deps.cloud.get_snapshot_by_labels(&snapshot_labels(cluster)).await?.unwrap_or_else(|| "snapshot-1".to_string());
    let health_check = cluster.spec.health_check();

    reconcile_control_planes(deps, cluster, status, &cluster_name, &snapshot_id, health_check.etcd_unhealthy_threshold_secs).await;
    reconcile_workers(deps, cluster, status, &cluster_name, &snapshot_id, health_check.node_not_ready_threshold_secs).await;

    Ok(Action::requeue(DEFAULT_REQUEUE_AFTER))
}

async fn reconcile_control_planes(
    deps: &Deps,
    cluster: &Cluster,
    status: &mut ClusterStatus,
    cluster_name: &str,
    snapshot_id: &str,
    threshold_secs: u64,
) {
    let desired = cluster.spec.control_planes.count;

    // Self-healing: at most one candidate per tick (§4.4).
    if let Some(idx) = healing::find_control_plane_candidate(&status.control_planes, desired, threshold_secs) {
        let ready = status.control_planes.ready;
        let quorum = healing::quorum_threshold(desired);
        if ready >= quorum {
            events::emit_event(&deps.client, cluster, TYPE_NORMAL, reason::NODE_REPLACING, &status.control_planes.nodes[idx].name).await;
            match healing::replace_control_plane(
                deps,
                &cluster.spec,
                &mut status.control_planes,
                idx,
                &cluster.spec.region,
                &status.infrastructure.network_id,
                snapshot_id,
                cluster_name,
            )
            .await
            {
                Ok(()) => events::emit_event(&deps.client, cluster, TYPE_NORMAL, reason::NODE_REPLACED, "control plane replaced").await,
                Err(err) => record_phase_error(status, "Healing", &err.to_string()),
            }
        } else {
            events::emit_event(&deps.client, cluster, TYPE_WARNING, reason::QUORUM_LOST, &format!("ready={ready} quorum={quorum}")).await;
        }
    }

    // CP scale-up only (§2 item 6: "same pattern for control planes (scale-up only)").
    if (status.control_planes.nodes.len() as i32) < desired {
        events::emit_event(&deps.client, cluster, TYPE_NORMAL, reason::SCALING_UP, "scaling up control planes").await;
        let _ = scaling::scale_up_control_planes(
            deps,
            &mut status.control_planes,
            desired,
            &cluster.spec.control_planes.size,
            &cluster.spec.region,
            &status.infrastructure.network_id,
            snapshot_id,
            cluster_name,
            deps.max_concurrent_heals,
        )
        .await;
    }

    conditions::set_control_plane_ready(&mut status.conditions, status.control_planes.ready, desired);
}

async fn reconcile_workers(
    deps: &Deps,
    cluster: &Cluster,
    status: &mut ClusterStatus,
    cluster_name: &str,
    snapshot_id: &str,
    threshold_secs: u64,
) {
    let desired = cluster.spec.workers.count;

    let candidates = healing::find_worker_candidates(&status.workers, threshold_secs, deps.max_concurrent_heals);
    for idx in candidates.into_iter().rev() {
        events::emit_event(&deps.client, cluster, TYPE_NORMAL, reason::NODE_REPLACING, &status.workers.nodes[idx].name).await;
        match healing::replace_worker(deps, &cluster.spec, &mut status.workers, idx, &cluster.spec.region, &status.infrastructure.network_id, snapshot_id, cluster_name).await {
            Ok(()) => events::emit_event(&deps.client, cluster, TYPE_NORMAL, reason::NODE_REPLACED, "worker replaced").await,
            Err(err) => record_phase_error(status, "Healing", &err.to_string()),
        }
    }

    if (status.workers.nodes.len() as i32) < desired {
        events::emit_event(&deps.client, cluster, TYPE_NORMAL, reason::SCALING_UP, "scaling up workers").await;
        let _ = scaling::scale_up_workers(
            deps,
            &mut status.workers,
            desired,
            &cluster.spec.workers.size,
            &cluster.spec.region,
            &status.infrastructure.network_id,
            snapshot_id,
            cluster_name,
            deps.max_concurrent_heals,
        )
        .await;
    } else if (status.workers.nodes.len() as i32) > desired {
        events::emit_event(&deps.client, cluster, TYPE_NORMAL, reason::SCALING_DOWN, "scaling down workers").await;
        let _ = scaling::scale_down_workers(deps, &mut status.workers, desired).await;
    }

    conditions::set_workers_ready(&mut status.conditions, status.workers.ready, desired);
}

/// Recompute the overall user-visible `Phase` from current health/addon
/// counts (step 7: "always defer-update the overall Status.Phase").
fn update_overall_phase(status: &mut ClusterStatus) {
    let addons_healthy = addons::all_healthy(status);
    conditions::set_addons_healthy(
        &mut status.conditions,
        addons_healthy,
        status.addons.values().filter(|a| a.installed).count(),
        status.addons.len(),
    );
    conditions::set_ready(&mut status.conditions);

    let any_unhealthy = status.control_planes.unhealthy > 0 || status.workers.unhealthy > 0;
    let healing_in_progress = status.control_planes.nodes.iter().any(|n| !matches!(n.phase, NodePhase::Ready))
        || status.workers.nodes.iter().any(|n| !matches!(n.phase, NodePhase::Ready));

    status.phase = match status.provisioning_phase {
        ProvisioningPhase::Complete if !any_unhealthy => ClusterPhase::Running,
        ProvisioningPhase::Complete if healing_in_progress => ClusterPhase::Healing,
        ProvisioningPhase::Complete => ClusterPhase::Degraded,
        _ if status.phase_history.is_empty() => ClusterPhase::Pending,
        _ => ClusterPhase::Provisioning,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::mock::{MockCloudProvider, MockNodeOsClient, MockNodeOsConfigGenerator};
    use crate::crd::{AddonsSpec, BootstrapSpec, ClusterSpec, CredentialsRef, KubernetesSpec, NodeGroupSpec, NodeOsSpec};
    use tokio::sync::Mutex;

    struct StubApplier;

    #[async_trait::async_trait]
    impl AddonApplier for StubApplier {
        async fn install(&self, _addon: &str) -> Result<()> {
            Ok(())
        }
        async fn is_healthy(&self, _addon: &str) -> Result<bool> {
            Ok(true)
        }
    }

    fn spec(cp: i32, workers: i32, bootstrap: Option<BootstrapSpec>) -> ClusterSpec {
        ClusterSpec {
            region: "nbg1".to_string(),
            control_planes: NodeGroupSpec { count: cp, size: "cx22".to_string() },
            workers: NodeGroupSpec { count: workers, size: "cx22".to_string() },
            kubernetes: KubernetesSpec { version: "1.30.0".to_string() },
            node_os: NodeOsSpec { version: "1.7.0".to_string() },
            bootstrap,
            credentials_ref: CredentialsRef { name: "creds".to_string() },
            paused: false,
            health_check: None,
            addons: Some(AddonsSpec { ccm: true, ..Default::default() }),
            domain: "example.com".to_string(),
        }
    }

    #[test]
    fn phase_record_transition_closes_open_record() {
        let mut status = ClusterStatus::default();
        record_phase_transition(&mut status, ProvisioningPhase::Infrastructure);
        record_phase_transition(&mut status, ProvisioningPhase::Image);

        assert_eq!(status.phase_history.len(), 2);
        assert!(status.phase_history[0].ended_at.is_some());
        assert!(status.phase_history[1].ended_at.is_none());
        assert_eq!(status.provisioning_phase, ProvisioningPhase::Image);
    }

    #[tokio::test]
    async fn infrastructure_phase_is_idempotent_when_already_provisioned() {
        let deps = test_deps();
        let cluster = test_cluster(spec(3, 2, None));
        let mut status = ClusterStatus::default();
        status.infrastructure.network_id = "net-1".to_string();
        status.infrastructure.firewall_id = "fw-1".to_string();
        status.infrastructure.load_balancer_id = "lb-1".to_string();

        let _action = phase_infrastructure(&deps, &cluster, &mut status).await.unwrap();
        assert_eq!(status.provisioning_phase, ProvisioningPhase::Image);
    }

    #[tokio::test]
    async fn bootstrap_completed_cluster_starts_at_cni() {
        let deps = test_deps();
        let cluster = test_cluster(spec(1, 2, Some(BootstrapSpec { completed: true, public_ip: Some("203.0.113.1".to_string()) })));
        let mut status = ClusterStatus::default();

        run_phase_machine(&deps, &stub_applier(), &cluster, &mut status).await.unwrap();
        assert_eq!(status.provisioning_phase, ProvisioningPhase::Cni);
    }

    fn stub_applier() -> Arc<dyn AddonApplier> {
        Arc::new(StubApplier)
    }

    fn test_deps() -> Deps {
        let config = kube::Config::new("https://127.0.0.1:6443".parse().unwrap());
        let client = kube::Client::try_from(config).expect("build fake kube client");
        Deps::new(
            client,
            Arc::new(MockCloudProvider::new()),
            Arc::new(MockNodeOsClient::new()),
            Arc::new(Mutex::new(MockNodeOsConfigGenerator::default())),
        )
    }

    fn test_cluster(spec: ClusterSpec) -> Cluster {
        Cluster::new("test-cluster", spec)
    }
}
