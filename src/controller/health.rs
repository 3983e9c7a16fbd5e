//! Health Probe (§4.7)
//!
//! Lists every Kubernetes node once per reconcile, splits by role label,
//! and computes healthy/unhealthy status for each tracked node group.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Node;
use kube::{api::Api, Client, ResourceExt};
use tracing::warn;

use crate::crd::NodeStatus;
use crate::error::Result;

pub const ROLE_LABEL: &str = "node-role.kubernetes.io/control-plane";

/// Classification of why a node is not ready, mirroring the well-known
/// node condition types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnhealthyReason {
    NodeNotReady,
    MemoryPressure,
    DiskPressure,
    PidPressure,
    Unknown,
}

impl UnhealthyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NodeNotReady => "NodeNotReady",
            Self::MemoryPressure => "MemoryPressure",
            Self::DiskPressure => "DiskPressure",
            Self::PidPressure => "PIDPressure",
            Self::Unknown => "Unknown",
        }
    }
}

/// One live node's computed health, keyed by node name.
#[derive(Clone, Debug)]
pub struct NodeHealth {
    pub name: String,
    pub server_id: String,
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
    pub healthy: bool,
    pub unhealthy_reason: Option<&'static str>,
    pub unhealthy_since: Option<DateTime<Utc>>,
    pub is_control_plane: bool,
}

/// Parses the numeric server ID out of a `hcloud://<int>` style `ProviderID`.
pub fn parse_server_id(provider_id: &str) -> String {
    provider_id.rsplit('/').next().unwrap_or_default().to_string()
}

fn classify(node: &Node) -> (bool, Option<&'static str>, Option<DateTime<Utc>>) {
    let conditions = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.clone())
        .unwrap_or_default();

    let ready = conditions.iter().find(|c| c.type_ == "Ready");
    let healthy = ready.map(|c| c.status == "True").unwrap_or(false);
    if healthy {
        return (true, None, None);
    }

    let since = ready.and_then(|c| c.last_transition_time.as_ref()).map(|t| t.0);

    let reason = if conditions.iter().any(|c| c.type_ == "MemoryPressure" && c.status == "True") {
        UnhealthyReason::MemoryPressure
    } else if conditions.iter().any(|c| c.type_ == "DiskPressure" && c.status == "True") {
        UnhealthyReason::DiskPressure
    } else if conditions.iter().any(|c| c.type_ == "PIDPressure" && c.status == "True") {
        UnhealthyReason::PidPressure
    } else if ready.is_some() {
        UnhealthyReason::NodeNotReady
    } else {
        UnhealthyReason::Unknown
    };

    (false, Some(reason.as_str()), since)
}

/// List all Kubernetes nodes once and compute each one's health.
pub async fn probe_nodes(client: &Client) -> Result<Vec<NodeHealth>> {
    let api: Api<Node> = Api::all(client.clone());
    let nodes = api.list(&Default::default()).await?;

    let mut out = Vec::with_capacity(nodes.items.len());
    for node in &nodes.items {
        let labels = node.labels();
        let is_control_plane = labels.contains_key(ROLE_LABEL);

        let provider_id = node.spec.as_ref().and_then(|s| s.provider_id.clone()).unwrap_or_default();
        let server_id = parse_server_id(&provider_id);

        let addresses = node.status.as_ref().and_then(|s| s.addresses.clone()).unwrap_or_default();
        let internal_ip = addresses.iter().find(|a| a.type_ == "InternalIP").map(|a| a.address.clone());
        let external_ip = addresses.iter().find(|a| a.type_ == "ExternalIP").map(|a| a.address.clone());

        let (healthy, unhealthy_reason, unhealthy_since) = classify(node);

        out.push(NodeHealth {
            name: node.name_any(),
            server_id,
            internal_ip,
            external_ip,
            healthy,
            unhealthy_reason,
            unhealthy_since,
            is_control_plane,
        });
    }

    Ok(out)
}

/// Merge freshly probed health into the tracked `NodeStatus` list (by name),
/// returning the names of nodes that newly became unhealthy this tick.
pub fn apply_health(nodes: &mut [NodeStatus], health: &BTreeMap<String, NodeHealth>) -> Vec<String> {
    let mut newly_unhealthy = Vec::new();

    for node in nodes.iter_mut() {
        let Some(h) = health.get(&node.name) else {
            continue;
        };
        let was_healthy = node.healthy;
        node.healthy = h.healthy;
        node.unhealthy_reason = h.unhealthy_reason.map(str::to_string);
        node.last_health_check = Some(Utc::now());
        if !h.healthy {
            node.unhealthy_since = node.unhealthy_since.or(h.unhealthy_since).or(Some(Utc::now()));
            if was_healthy {
                newly_unhealthy.push(node.name.clone());
            }
        } else {
            node.unhealthy_since = None;
        }
        if !h.server_id.is_empty() {
            node.server_id = h.server_id.clone();
        }
        if h.internal_ip.is_some() {
            node.private_ip = h.internal_ip.clone();
        }
        if h.external_ip.is_some() {
            node.public_ip = h.external_ip.clone();
        }
    }

    if newly_unhealthy.is_empty() {
        // nothing to log; kept as a branch to make the "no transition" path explicit
    } else {
        warn!(nodes = ?newly_unhealthy, "nodes newly unhealthy");
    }

    newly_unhealthy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_id_from_provider_id() {
        assert_eq!(parse_server_id("hcloud://12345"), "12345");
        assert_eq!(parse_server_id(""), "");
    }

    #[test]
    fn apply_health_tracks_newly_unhealthy_transition() {
        let mut nodes = vec![NodeStatus::new("cp-1", crate::crd::NodePhase::Ready)];
        nodes[0].healthy = true;

        let mut health = BTreeMap::new();
        health.insert(
            "cp-1".to_string(),
            NodeHealth {
                name: "cp-1".to_string(),
                server_id: "1".to_string(),
                internal_ip: None,
                external_ip: None,
                healthy: false,
                unhealthy_reason: Some("NodeNotReady"),
                unhealthy_since: None,
                is_control_plane: true,
            },
        );

        let newly = apply_health(&mut nodes, &health);
        assert_eq!(newly, vec!["cp-1".to_string()]);
        assert!(!nodes[0].healthy);
        assert!(nodes[0].unhealthy_since.is_some());
    }
}
