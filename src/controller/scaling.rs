//! Scaling (§4.5): grow or shrink a node group to its desired count.

use chrono::Utc;
use kube::api::Api;
use tracing::info;

use crate::crd::{NodeGroupStatus, NodePhase};
use crate::error::Result;

use super::deps::Deps;
use super::drain::drain_node;
use super::provision::{create_and_wait_for_ip, apply_config_and_wait_ready, ProvisionRequest, ROLE_CONTROL_PLANE, ROLE_WORKER};
use super::ssh;

/// Early provisioning phases that block a fresh scale-up attempt — we don't
/// want to pile on more `CreateServer` calls while one is still mid-flight.
fn in_early_provisioning(status: &NodeGroupStatus) -> bool {
    status
        .nodes
        .iter()
        .any(|n| matches!(n.phase, NodePhase::CreatingServer | NodePhase::WaitingForIp | NodePhase::WaitingForTalosApi))
}

/// Scale a worker group up to `desired`, creating at most `max_per_tick`
/// new servers sharing one ephemeral SSH key for the batch.
pub async fn scale_up_workers(
    deps: &Deps,
    status: &mut NodeGroupStatus,
    desired: i32,
    size: &str,
    region: &str,
    network_id: &str,
    snapshot_id: &str,
    cluster_name: &str,
    max_per_tick: usize,
) -> Result<usize> {
    let missing = (desired - status.nodes.len() as i32).max(0) as usize;
    if missing == 0 || in_early_provisioning(status) {
        return Ok(0);
    }
    let batch = missing.min(max_per_tick);

    let ephemeral = ssh::generate();
    let key_name = format!("{cluster_name}-worker-scaleup-{}", Utc::now().timestamp());
    let key_labels = std::collections::BTreeMap::from([("cluster".to_string(), cluster_name.to_string())]);
    deps.cloud.create_ssh_key(&key_name, &ephemeral.public_key_openssh, &key_labels).await?;

    let mut created = 0;
    for i in 0..batch {
        let name = format!("{cluster_name}-worker-{}-{i}", Utc::now().timestamp());
        let provisioned = create_and_wait_for_ip(
            deps,
            &ProvisionRequest {
                name: name.clone(),
                role: ROLE_WORKER,
                size,
                region,
                network_id,
                ssh_key_name: &key_name,
                cluster_name,
                snapshot_id,
            },
        )
        .await;

        let mut node = match provisioned {
            Ok(n) => n,
            Err(_) => {
                // Workers aren't etcd members: a failed mid-provision server MAY be deleted.
                let _ = deps.cloud.delete_server(&name).await;
                continue;
            }
        };

        let config = {
            let gen = deps.config_gen.lock().await;
            gen.generate_worker_config(&name, &node.server_id)?
        };
        if let Some(ip) = node.private_ip.clone() {
            if apply_config_and_wait_ready(deps, &ip, &config).await.is_err() {
                let _ = deps.cloud.delete_server(&name).await;
                continue;
            }
        }

        node.set_phase(NodePhase::Ready);
        node.healthy = true;
        status.nodes.push(node);
        created += 1;
    }

    let _ = deps.cloud.delete_ssh_key(&key_name).await;
    status.recompute_counts();
    info!(created, batch, cluster = cluster_name, "worker scale-up batch complete");
    Ok(created)
}

/// Scale a control-plane group up from `N` to `N+k` (§4.5 "CP scale-up").
///
/// Each new control plane joins etcd, so — mirroring §4.4 step 5 — once
/// `apply_config_and_wait_ready` has been called for a given new node, a
/// failure downstream of that call is returned as-is (retryable) rather
/// than deleting the server; only a failure strictly before that point
/// (server creation itself) allows cleanup of the half-created server.
pub async fn scale_up_control_planes(
    deps: &Deps,
    status: &mut NodeGroupStatus,
    desired: i32,
    size: &str,
    region: &str,
    network_id: &str,
    snapshot_id: &str,
    cluster_name: &str,
    max_per_tick: usize,
) -> Result<usize> {
    let missing = (desired - status.nodes.len() as i32).max(0) as usize;
    if missing == 0 || in_early_provisioning(status) {
        return Ok(0);
    }
    let batch = missing.min(max_per_tick);

    let ephemeral = ssh::generate();
    let key_name = format!("{cluster_name}-cp-scaleup-{}", Utc::now().timestamp());
    let key_labels = std::collections::BTreeMap::from([("cluster".to_string(), cluster_name.to_string())]);
    deps.cloud.create_ssh_key(&key_name, &ephemeral.public_key_openssh, &key_labels).await?;

    let mut created = 0;
    for i in 0..batch {
        let name = format!("{cluster_name}-cp-{}-{i}", Utc::now().timestamp());
        let provisioned = create_and_wait_for_ip(
            deps,
            &ProvisionRequest {
                name: name.clone(),
                role: ROLE_CONTROL_PLANE,
                size,
                region,
                network_id,
                ssh_key_name: &key_name,
                cluster_name,
                snapshot_id,
            },
        )
        .await;

        let mut node = match provisioned {
            Ok(n) => n,
            Err(_) => {
                let _ = deps.cloud.delete_server(&name).await;
                continue;
            }
        };

        let sans: Vec<String> = status
            .nodes
            .iter()
            .filter_map(|n| n.public_ip.clone())
            .chain(node.public_ip.clone())
            .collect();
        let config = {
            let gen = deps.config_gen.lock().await;
            gen.generate_control_plane_config(&sans, &name, &node.server_id)?
        };
        let Some(ip) = node.private_ip.clone() else {
            continue;
        };

        // Once applied, the new node may already be an etcd member: no deletion past this point.
        apply_config_and_wait_ready(deps, &ip, &config).await?;

        node.set_phase(NodePhase::Ready);
        node.healthy = true;
        status.nodes.push(node);
        created += 1;
    }

    let _ = deps.cloud.delete_ssh_key(&key_name).await;
    status.recompute_counts();
    info!(created, batch, cluster = cluster_name, "control-plane scale-up batch complete");
    Ok(created)
}

/// Select workers for scale-down: unhealthy first, then healthy newest-first (§4.5).
pub fn select_scale_down(status: &NodeGroupStatus, excess: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..status.nodes.len()).collect();
    indices.sort_by_key(|&i| {
        let node = &status.nodes[i];
        // false (unhealthy) sorts before true; within a bucket, reverse insertion
        // order is approximated by negating the index (newest = highest index first).
        (node.healthy, std::cmp::Reverse(i))
    });
    indices.into_iter().take(excess).collect()
}

/// Scale a worker group down to `desired`: cordon, drain, delete K8s node,
/// delete cloud server, then drop from `Status.Workers.Nodes`.
pub async fn scale_down_workers(deps: &Deps, status: &mut NodeGroupStatus, desired: i32) -> Result<usize> {
    let excess = (status.nodes.len() as i32 - desired).max(0) as usize;
    if excess == 0 {
        return Ok(0);
    }

    let mut victims = select_scale_down(status, excess);
    victims.sort_unstable_by(|a, b| b.cmp(a)); // remove highest index first, keeps earlier indices valid

    for &idx in &victims {
        let name = status.nodes[idx].name.clone();
        cordon_and_drain(deps, &name).await;
        let nodes_api: Api<k8s_openapi::api::core::v1::Node> = Api::all(deps.client.clone());
        let _ = nodes_api.delete(&name, &Default::default()).await;
        let _ = deps.cloud.delete_server(&name).await;
        status.nodes.remove(idx);
    }

    status.recompute_counts();
    Ok(victims.len())
}

async fn cordon_and_drain(deps: &Deps, node_name: &str) {
    use k8s_openapi::api::core::v1::Node;
    use kube::api::{Patch, PatchParams};

    let nodes: Api<Node> = Api::all(deps.client.clone());
    let patch = serde_json::json!({ "spec": { "unschedulable": true } });
    let _ = nodes.patch(node_name, &PatchParams::default(), &Patch::Merge(&patch)).await;
    let _ = drain_node(&deps.client, node_name).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::NodeStatus;

    fn node(name: &str, healthy: bool) -> NodeStatus {
        let mut n = NodeStatus::new(name, NodePhase::Ready);
        n.healthy = healthy;
        n
    }

    #[test]
    fn scale_down_prefers_unhealthy_then_newest() {
        let mut status = NodeGroupStatus::default();
        status.nodes = vec![node("w-1", true), node("w-2", false), node("w-3", true)];
        let victims = select_scale_down(&status, 2);
        let names: Vec<&str> = victims.iter().map(|&i| status.nodes[i].name.as_str()).collect();
        assert_eq!(names, vec!["w-2", "w-3"]);
    }

    #[test]
    fn no_early_provisioning_nodes_allows_scale_up() {
        let status = NodeGroupStatus::default();
        assert!(!in_early_provisioning(&status));
    }

    #[test]
    fn early_provisioning_node_blocks_scale_up() {
        let mut status = NodeGroupStatus::default();
        status.nodes.push(node("w-1", false));
        status.nodes[0].phase = NodePhase::WaitingForIp;
        assert!(in_early_provisioning(&status));
    }
}
