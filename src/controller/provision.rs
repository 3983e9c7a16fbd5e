//! Shared server-provisioning sequence used by Compute, Self-Healing, and
//! Scaling (§4.3-§4.5): create a cloud server, wait for its private IP,
//! apply node-OS config, and wait for kubelet readiness.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::crd::{NodePhase, NodeStatus};
use crate::error::{Error, Result};

use super::constants::{NODE_READY_TIMEOUT, SERVER_IP_TIMEOUT};
use super::deps::Deps;
use super::interfaces::{normalize_server_size, CreateServerOpts};

pub const ROLE_CONTROL_PLANE: &str = "control-plane";
pub const ROLE_WORKER: &str = "worker";

pub struct ProvisionRequest<'a> {
    pub name: String,
    pub role: &'static str,
    pub size: &'a str,
    pub region: &'a str,
    pub network_id: &'a str,
    pub ssh_key_name: &'a str,
    pub cluster_name: &'a str,
    pub snapshot_id: &'a str,
}

fn labels(req: &ProvisionRequest<'_>) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("role".to_string(), req.role.to_string()),
        ("pool".to_string(), req.role.to_string()),
        ("managed-by".to_string(), "k8zner-operator".to_string()),
        ("cluster".to_string(), req.cluster_name.to_string()),
    ])
}

/// Create the cloud server and block (via short polls, each a candidate
/// requeue point in a real event loop) until it has a private IP, or the
/// `serverIPTimeout` elapses.
pub async fn create_and_wait_for_ip(deps: &Deps, req: &ProvisionRequest<'_>) -> Result<NodeStatus> {
    deps.cloud
        .create_server(CreateServerOpts {
            name: req.name.clone(),
            snapshot_id: req.snapshot_id.to_string(),
            server_type: normalize_server_size(req.size),
            region: req.region.to_string(),
            ssh_key_name: req.ssh_key_name.to_string(),
            labels: labels(req),
            network_id: req.network_id.to_string(),
        })
        .await?;

    let mut node = NodeStatus::new(&req.name, NodePhase::CreatingServer);

    let deadline = Instant::now() + SERVER_IP_TIMEOUT;
    loop {
        if let Some(server) = deps.cloud.get_server_by_name(&req.name).await? {
            node.server_id = server.id.clone();
            if let Some(ip) = server.private_ip.clone() {
                node.private_ip = Some(ip);
                node.public_ip = server.public_ip;
                node.set_phase(NodePhase::WaitingForTalosApi);
                return Ok(node);
            }
        }
        if Instant::now() >= deadline {
            return Err(Error::Timeout(format!("server {} did not acquire a private IP", req.name)));
        }
        node.set_phase(NodePhase::WaitingForIp);
        sleep(Duration::from_secs(2)).await;
    }
}

/// Apply machine config and wait for kubelet readiness.
///
/// Returns `Ok(())` once `NodeOsClient::wait_for_node_ready` reports the
/// node as ready. Callers that have crossed the "new node may already be
/// an etcd member" line (§4.4 step 5) must treat an `Err` here as
/// retryable and MUST NOT delete the server in response.
pub async fn apply_config_and_wait_ready(deps: &Deps, ip: &str, config: &[u8]) -> Result<()> {
    deps.node_os.apply_config(ip, config).await?;
    info!(ip, "applied node-OS config");

    match deps.node_os.wait_for_node_ready(ip, NODE_READY_TIMEOUT.as_secs()).await {
        Ok(()) => Ok(()),
        Err(err) => {
            warn!(ip, %err, "node did not become ready in time");
            Err(err)
        }
    }
}
