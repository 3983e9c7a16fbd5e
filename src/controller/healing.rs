//! Self-Healing (§4.4, §4.5): quorum-aware control-plane replacement and
//! worker replacement-with-drain.

use chrono::Utc;
use kube::{api::Api, Client};
use tracing::{info, warn};

use crate::crd::{ClusterSpec, NodeGroupStatus, NodePhase, NodeStatus};
use crate::error::{Error, Result};

use super::deps::Deps;
use super::drain::drain_node;
use super::provision::{apply_config_and_wait_ready, create_and_wait_for_ip, ProvisionRequest, ROLE_CONTROL_PLANE, ROLE_WORKER};
use super::ssh;

/// Minimum healthy count for a control plane of size `n`: `⌊n/2⌋+1`.
pub fn quorum_threshold(n: i32) -> i32 {
    n / 2 + 1
}

/// A control plane is a replacement candidate once unhealthy longer than
/// the threshold. `Spec.ControlPlanes.Count == 1` never auto-replaces (no HA).
pub fn find_control_plane_candidate(status: &NodeGroupStatus, n: i32, threshold_secs: u64) -> Option<usize> {
    if n <= 1 {
        return None;
    }
    let now = Utc::now();
    status.nodes.iter().position(|node| {
        !node.healthy
            && node
                .unhealthy_since
                .map(|since| (now - since).num_seconds() as u64 > threshold_secs)
                .unwrap_or(false)
    })
}

/// Replace one unhealthy control plane. Caller has already verified the
/// quorum gate (`ready >= quorum_threshold(desired)`); this function does
/// not re-check it, since the gate is evaluated against `Status.ControlPlanes.Ready`
/// which only the caller has in scope alongside `Spec.ControlPlanes.Count`.
///
/// Implements the critical ordering invariant from §4.4 step 5: once
/// `apply_config_and_wait_ready` has been called, the new server may
/// already be an etcd member, so any error from that point on is returned
/// as-is (retryable) without deleting the freshly created server.
pub async fn replace_control_plane(
    deps: &Deps,
    spec: &ClusterSpec,
    status: &mut NodeGroupStatus,
    dying_index: usize,
    region: &str,
    network_id: &str,
    snapshot_id: &str,
    cluster_name: &str,
) -> Result<()> {
    let dying = status.nodes[dying_index].clone();
    info!(node = %dying.name, "replacing unhealthy control plane");

    if let Some(healthy) = status.nodes.iter().find(|n| n.healthy && n.name != dying.name) {
        if let Some(ip) = healthy.private_ip.clone() {
            match deps.node_os.get_etcd_members(&ip).await {
                Ok(members) => {
                    let dying_ip = dying.private_ip.clone().unwrap_or_default();
                    let matched = members
                        .iter()
                        .find(|m| m.name == dying.name)
                        .or_else(|| members.iter().find(|m| !dying_ip.is_empty() && m.endpoint.contains(&dying_ip)));
                    if let Some(member) = matched {
                        if let Err(err) = deps.node_os.remove_etcd_member(&ip, &member.id).await {
                            warn!(%err, "failed to remove dying etcd member, continuing anyway");
                        }
                    }
                }
                Err(err) => warn!(%err, "failed to list etcd members, continuing anyway"),
            }
        }
    }

    let nodes_api: Api<k8s_openapi::api::core::v1::Node> = Api::all(deps.client.clone());
    let _ = nodes_api.delete(&dying.name, &Default::default()).await;
    let _ = deps.cloud.delete_server(&dying.name).await;

    let ephemeral = ssh::generate();
    let key_name = format!("{cluster_name}-cp-replace-{}", Utc::now().timestamp());
    let key_labels = std::collections::BTreeMap::from([("cluster".to_string(), cluster_name.to_string())]);
    let _ = deps.cloud.create_ssh_key(&key_name, &ephemeral.public_key_openssh, &key_labels).await?;

    let new_name = format!("{cluster_name}-cp-{}", Utc::now().timestamp());
    let provisioned = create_and_wait_for_ip(
        deps,
        &ProvisionRequest {
            name: new_name.clone(),
            role: ROLE_CONTROL_PLANE,
            size: &spec.control_planes.size,
            region,
            network_id,
            ssh_key_name: &key_name,
            cluster_name,
            snapshot_id,
        },
    )
    .await;

    let _ = deps.cloud.delete_ssh_key(&key_name).await;

    let mut new_node = match provisioned {
        Ok(n) => n,
        Err(err) => {
            status.nodes.remove(dying_index);
            return Err(err);
        }
    };

    let sans: Vec<String> = status
        .nodes
        .iter()
        .filter_map(|n| n.public_ip.clone())
        .chain(new_node.public_ip.clone())
        .collect();

    let config = {
        let gen = deps.config_gen.lock().await;
        gen.generate_control_plane_config(&sans, &new_name, &new_node.server_id)?
    };

    let ip = new_node.private_ip.clone().ok_or_else(|| Error::Fatal("no private IP after provisioning".to_string()))?;

    // From here on, the new server may already be in etcd: do not delete it on error.
    apply_config_and_wait_ready(deps, &ip, &config).await?;

    new_node.set_phase(NodePhase::Ready);
    new_node.healthy = true;
    status.nodes.remove(dying_index);
    status.nodes.push(new_node);
    status.recompute_counts();

    Ok(())
}

/// A worker is a candidate for unhealthy replacement past the threshold.
pub fn find_worker_candidates(status: &NodeGroupStatus, threshold_secs: u64, max: usize) -> Vec<usize> {
    let now = Utc::now();
    status
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| {
            !node.healthy
                && node
                    .unhealthy_since
                    .map(|since| (now - since).num_seconds() as u64 > threshold_secs)
                    .unwrap_or(false)
        })
        .map(|(i, _)| i)
        .take(max)
        .collect()
}

/// Replace one unhealthy worker: cordon, drain, delete K8s node, delete
/// cloud server, provision a fresh one. Unlike control planes, a failed
/// mid-provision worker MAY be deleted — workers are not etcd members.
pub async fn replace_worker(
    deps: &Deps,
    spec: &ClusterSpec,
    status: &mut NodeGroupStatus,
    dying_index: usize,
    region: &str,
    network_id: &str,
    snapshot_id: &str,
    cluster_name: &str,
) -> Result<()> {
    let dying = status.nodes[dying_index].clone();
    info!(node = %dying.name, "replacing unhealthy worker");

    cordon_and_drain(&deps.client, &dying.name).await;

    let nodes_api: Api<k8s_openapi::api::core::v1::Node> = Api::all(deps.client.clone());
    let _ = nodes_api.delete(&dying.name, &Default::default()).await;
    let _ = deps.cloud.delete_server(&dying.name).await;

    let ephemeral = ssh::generate();
    let key_name = format!("{cluster_name}-worker-replace-{}", Utc::now().timestamp());
    let key_labels = std::collections::BTreeMap::from([("cluster".to_string(), cluster_name.to_string())]);
    let _ = deps.cloud.create_ssh_key(&key_name, &ephemeral.public_key_openssh, &key_labels).await?;

    let new_name = format!("{cluster_name}-worker-{}", Utc::now().timestamp());
    let provisioned = create_and_wait_for_ip(
        deps,
        &ProvisionRequest {
            name: new_name.clone(),
            role: ROLE_WORKER,
            size: &spec.workers.size,
            region,
            network_id,
            ssh_key_name: &key_name,
            cluster_name,
            snapshot_id,
        },
    )
    .await;

    let _ = deps.cloud.delete_ssh_key(&key_name).await;

    let mut new_node = match provisioned {
        Ok(n) => n,
        Err(err) => {
            let _ = deps.cloud.delete_server(&new_name).await;
            status.nodes.remove(dying_index);
            return Err(err);
        }
    };

    let config = {
        let gen = deps.config_gen.lock().await;
        gen.generate_worker_config(&new_name, &new_node.server_id)?
    };
    let ip = new_node.private_ip.clone().ok_or_else(|| Error::Fatal("no private IP after provisioning".to_string()))?;

    if let Err(err) = apply_config_and_wait_ready(deps, &ip, &config).await {
        let _ = deps.cloud.delete_server(&new_name).await;
        status.nodes.remove(dying_index);
        return Err(err);
    }

    new_node.set_phase(NodePhase::Ready);
    new_node.healthy = true;
    status.nodes.remove(dying_index);
    status.nodes.push(new_node);
    status.recompute_counts();

    Ok(())
}

async fn cordon_and_drain(client: &Client, node_name: &str) {
    use k8s_openapi::api::core::v1::Node;
    use kube::api::{Patch, PatchParams};

    let nodes: Api<Node> = Api::all(client.clone());
    let patch = serde_json::json!({ "spec": { "unschedulable": true } });
    let _ = nodes.patch(node_name, &PatchParams::default(), &Patch::Merge(&patch)).await;

    if let Err(err) = drain_node(client, node_name).await {
        warn!(node = node_name, %err, "drain encountered errors, proceeding with decommission anyway");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_threshold_matches_floor_n_over_2_plus_1() {
        assert_eq!(quorum_threshold(3), 2);
        assert_eq!(quorum_threshold(5), 3);
        assert_eq!(quorum_threshold(1), 1);
    }

    #[test]
    fn single_control_plane_never_replaces() {
        let mut group = NodeGroupStatus::default();
        let mut n = NodeStatus::new("cp-1", NodePhase::Ready);
        n.healthy = false;
        n.unhealthy_since = Some(Utc::now() - chrono::Duration::hours(1));
        group.nodes.push(n);
        assert!(find_control_plane_candidate(&group, 1, 120).is_none());
    }

    #[test]
    fn within_threshold_is_not_a_candidate() {
        let mut group = NodeGroupStatus::default();
        let mut n = NodeStatus::new("cp-1", NodePhase::Ready);
        n.healthy = false;
        n.unhealthy_since = Some(Utc::now() - chrono::Duration::seconds(10));
        group.nodes.push(n);
        assert!(find_control_plane_candidate(&group, 3, 120).is_none());
    }

    #[test]
    fn past_threshold_is_a_candidate() {
        let mut group = NodeGroupStatus::default();
        let mut n = NodeStatus::new("cp-1", NodePhase::Ready);
        n.healthy = false;
        n.unhealthy_since = Some(Utc::now() - chrono::Duration::seconds(200));
        group.nodes.push(n);
        assert_eq!(find_control_plane_candidate(&group, 3, 120), Some(0));
    }
}
