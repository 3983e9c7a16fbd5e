//! Node State Verifier (§4.3)
//!
//! Derives a ground-truth `NodePhase` for one node from live observations:
//! the cloud server lookup, node-OS API reachability/maintenance-mode, and
//! Kubernetes node/kubelet state. All probes are non-fatal and best-effort
//! — a probe failure just leaves that observation at its default ("unknown"),
//! which the derivation table below treats as absent.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::crd::NodePhase;

use super::interfaces::{CloudProvider, NodeOsClient, ServerStatus};

const PORT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const NODE_OS_API_PORT: u16 = 50000;
const SSH_PORT: u16 = 22;

/// What the verifier observed about a node's Kubernetes-side state.
/// Supplied by the caller (via the Health Probe's node listing) since the
/// verifier itself has no opinion on which Kubernetes node maps to which
/// tracked server — that's a name/label join the reconciler performs.
#[derive(Clone, Copy, Debug, Default)]
pub struct K8sObservation {
    pub node_exists: bool,
    pub kubelet_running: bool,
    pub ready: bool,
}

async fn port_open(ip: &str, port: u16) -> bool {
    let Ok(addr) = format!("{ip}:{port}").parse::<SocketAddr>() else {
        return false;
    };
    matches!(timeout(PORT_PROBE_TIMEOUT, TcpStream::connect(addr)).await, Ok(Ok(_)))
}

/// Derive the `NodePhase` for a tracked server from live observations.
///
/// `name` is the server's cloud-provider name; `k8s` is `None` when the
/// caller has no Kubernetes-side observation to offer (e.g. the node was
/// never expected to exist in Kubernetes yet).
pub async fn verify_node_phase(
    cloud: &Arc<dyn CloudProvider>,
    node_os: &Arc<dyn NodeOsClient>,
    name: &str,
    k8s: Option<K8sObservation>,
) -> NodePhase {
    let Ok(Some(server)) = cloud.get_server_by_name(name).await else {
        return NodePhase::Failed;
    };

    if let Some(k8s) = k8s {
        if k8s.node_exists {
            if k8s.ready {
                return NodePhase::Ready;
            }
            return if k8s.kubelet_running {
                NodePhase::NodeInitializing
            } else {
                NodePhase::WaitingForK8s
            };
        }
    }

    match server.status {
        ServerStatus::Starting => return NodePhase::WaitingForIp,
        ServerStatus::Running => {}
        _ => return NodePhase::CreatingServer,
    }

    let Some(ip) = server.private_ip.clone().or(server.public_ip.clone()) else {
        return NodePhase::WaitingForIp;
    };

    let node_os_up = port_open(&ip, NODE_OS_API_PORT).await;
    let _ssh_up = port_open(&ip, SSH_PORT).await;

    if !node_os_up {
        return NodePhase::WaitingForTalosApi;
    }

    match node_os.is_node_in_maintenance_mode(&ip).await {
        Ok(true) => NodePhase::WaitingForTalosApi,
        Ok(false) => {
            if let Some(k8s) = k8s {
                if !k8s.node_exists {
                    return if k8s.kubelet_running {
                        NodePhase::WaitingForK8s
                    } else {
                        NodePhase::RebootingWithConfig
                    };
                }
            }
            NodePhase::ApplyingTalosConfig
        }
        Err(_) => NodePhase::WaitingForTalosApi,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::mock::{MockCloudProvider, MockNodeOsClient};

    #[tokio::test]
    async fn missing_server_is_failed() {
        let cloud: Arc<dyn CloudProvider> = Arc::new(MockCloudProvider::new());
        let node_os: Arc<dyn NodeOsClient> = Arc::new(MockNodeOsClient::new());
        let phase = verify_node_phase(&cloud, &node_os, "cp-1", None).await;
        assert_eq!(phase, NodePhase::Failed);
    }

    #[tokio::test]
    async fn k8s_ready_wins_over_everything_else() {
        let cloud: Arc<dyn CloudProvider> = Arc::new(MockCloudProvider::new());
        let node_os: Arc<dyn NodeOsClient> = Arc::new(MockNodeOsClient::new());
        cloud.seed_running_server("cp-1", "10.0.0.5").await;
        let phase = verify_node_phase(
            &cloud,
            &node_os,
            "cp-1",
            Some(K8sObservation { node_exists: true, kubelet_running: true, ready: true }),
        )
        .await;
        assert_eq!(phase, NodePhase::Ready);
    }
}
