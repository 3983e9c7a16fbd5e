//! Shared types for the Cluster custom resource
//!
//! These types back both `ClusterSpec` (the user's desired state) and
//! `ClusterStatus` (the operator's observed/converged state). They mirror
//! the entities of the data model: node groups, individual node records,
//! addon progress, and phase history.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to the Kubernetes Secret holding cloud and node-OS credentials
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsRef {
    #[serde(default)]
    pub name: String,
}

/// Desired size of a node group (control planes or workers)
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupSpec {
    pub count: i32,
    pub size: String,
}

/// Details carried over from a CLI-driven bootstrap of the first control plane
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapSpec {
    #[serde(default)]
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
}

/// Thresholds controlling when an unhealthy node becomes a replacement candidate
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckSpec {
    #[serde(default = "default_node_not_ready_threshold_secs")]
    pub node_not_ready_threshold_secs: u64,
    #[serde(default = "default_etcd_unhealthy_threshold_secs")]
    pub etcd_unhealthy_threshold_secs: u64,
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            node_not_ready_threshold_secs: default_node_not_ready_threshold_secs(),
            etcd_unhealthy_threshold_secs: default_etcd_unhealthy_threshold_secs(),
        }
    }
}

fn default_node_not_ready_threshold_secs() -> u64 {
    180
}

fn default_etcd_unhealthy_threshold_secs() -> u64 {
    120
}

/// Enabled addons and their per-addon configuration knobs
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddonsSpec {
    #[serde(default)]
    pub ccm: bool,
    #[serde(default)]
    pub csi: bool,
    #[serde(default)]
    pub metrics_server: bool,
    #[serde(default)]
    pub cert_manager: bool,
    #[serde(default)]
    pub traefik: bool,
    #[serde(default)]
    pub external_dns: bool,
    #[serde(default)]
    pub argocd: bool,
    #[serde(default)]
    pub monitoring: bool,
    #[serde(default)]
    pub talos_backup: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub subdomains: BTreeMap<String, String>,
}

/// Coarse provisioning states, forming the DAG from §4.2
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ProvisioningPhase {
    #[default]
    Infrastructure,
    Image,
    Compute,
    Bootstrap,
    Cni,
    Addons,
    /// Legacy alias, omitted by new control flow (§9 Open Questions) but
    /// kept so existing persisted status deserializes.
    Configuring,
    Complete,
}

impl std::fmt::Display for ProvisioningPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Overall user-visible cluster phase
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ClusterPhase {
    #[default]
    Pending,
    Provisioning,
    Running,
    Degraded,
    Healing,
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Fine-grained per-node lifecycle state (§4.3)
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum NodePhase {
    CreatingServer,
    WaitingForIp,
    WaitingForTalosApi,
    ApplyingTalosConfig,
    RebootingWithConfig,
    WaitingForK8s,
    NodeInitializing,
    Ready,
    RemovingFromEtcd,
    Failed,
}

impl std::fmt::Display for NodePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Infrastructure handles: the durable link between status and cloud resources
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureStatus {
    #[serde(default)]
    pub network_id: String,
    #[serde(default)]
    pub firewall_id: String,
    #[serde(default)]
    pub load_balancer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancer_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancer_private_ip: Option<String>,
    #[serde(default)]
    pub network_ready: bool,
    #[serde(default)]
    pub firewall_ready: bool,
    #[serde(default)]
    pub load_balancer_ready: bool,
}

impl InfrastructureStatus {
    /// All three handles have been populated by a prior Infrastructure phase
    pub fn is_provisioned(&self) -> bool {
        !self.network_id.is_empty() && !self.firewall_id.is_empty() && !self.load_balancer_id.is_empty()
    }
}

/// One tracked server within a node group
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub name: String,
    #[serde(default)]
    pub server_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
    pub phase: NodePhase,
    #[serde(default)]
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unhealthy_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unhealthy_since: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the node entered its current `phase`; used for stuck-node detection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_since: Option<chrono::DateTime<chrono::Utc>>,
}

impl NodeStatus {
    pub fn new(name: impl Into<String>, phase: NodePhase) -> Self {
        Self {
            name: name.into(),
            server_id: String::new(),
            public_ip: None,
            private_ip: None,
            phase,
            healthy: false,
            unhealthy_reason: None,
            unhealthy_since: None,
            last_health_check: None,
            reason: None,
            phase_since: Some(chrono::Utc::now()),
        }
    }

    pub fn set_phase(&mut self, phase: NodePhase) {
        if self.phase != phase {
            self.phase = phase;
            self.phase_since = Some(chrono::Utc::now());
        }
    }
}

/// Aggregate status of one node group (control planes or workers)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupStatus {
    #[serde(default)]
    pub desired: i32,
    #[serde(default)]
    pub ready: i32,
    #[serde(default)]
    pub unhealthy: i32,
    #[serde(default)]
    pub nodes: Vec<NodeStatus>,
}

impl NodeGroupStatus {
    /// Recompute `ready`/`unhealthy` from the current `nodes` list
    pub fn recompute_counts(&mut self) {
        self.ready = self.nodes.iter().filter(|n| n.healthy).count() as i32;
        self.unhealthy = self.nodes.iter().filter(|n| !n.healthy).count() as i32;
    }
}

/// Installation phase of a single addon
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum AddonPhase {
    #[default]
    Pending,
    Installing,
    Installed,
    Failed,
}

/// Status of a single addon's installation/health
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddonStatus {
    #[serde(default)]
    pub installed: bool,
    #[serde(default)]
    pub healthy: bool,
    pub phase: AddonPhase,
    pub install_order: u32,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AddonStatus {
    pub fn pending(order: u32) -> Self {
        Self {
            installed: false,
            healthy: false,
            phase: AddonPhase::Pending,
            install_order: order,
            retry_count: 0,
            started_at: None,
            last_transition_time: None,
            duration_secs: None,
            message: None,
        }
    }
}

/// One entry in the `PhaseHistory` ring: the span of time spent in a phase
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseRecord {
    pub phase: ProvisioningPhase,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One entry in the bounded `LastErrors` ring
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub component: String,
    pub message: String,
    pub time: chrono::DateTime<chrono::Utc>,
}

/// The bounded ring size for `Status.LastErrors` (§6)
pub const MAX_LAST_ERRORS: usize = 10;

/// Append an error record to a bounded ring, dropping the oldest entry when full
pub fn push_bounded_error(errors: &mut Vec<ErrorRecord>, record: ErrorRecord) {
    errors.push(record);
    if errors.len() > MAX_LAST_ERRORS {
        let overflow = errors.len() - MAX_LAST_ERRORS;
        errors.drain(0..overflow);
    }
}

/// A typed status condition, following Kubernetes API conventions
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub last_transition_time: String,
    pub reason: String,
    pub message: String,
}

/// Credentials resolved from the Secret named by `Spec.CredentialsRef`
#[derive(Clone)]
pub struct Credentials {
    pub cloud_token: String,
    pub node_os_secrets: Vec<u8>,
    pub node_os_client_config: Vec<u8>,
}
