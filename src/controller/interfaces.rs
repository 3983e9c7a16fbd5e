//! Trait definitions for the four external collaborator surfaces (§6)
//!
//! The reconciliation engine never talks to a cloud SDK, a node-OS gRPC
//! endpoint, or a templating engine directly. It is handed `Arc<dyn ...>`
//! trait objects at construction time (see `ReconcilerBuilder` in
//! `reconciler.rs`), the same "dependency objects passed into the
//! constructor" shape the design notes call for. Production wiring of real
//! implementations, and the addon-rendering/applying primitives, are out of
//! scope for this crate (§1); `controller::mock` provides in-memory
//! fixtures used by tests.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::Result;

/// A server as reported by the cloud provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloudServer {
    pub id: String,
    pub name: String,
    pub status: ServerStatus,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerStatus {
    Starting,
    Running,
    Off,
    Other,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateServerOpts {
    pub name: String,
    pub snapshot_id: String,
    pub server_type: String,
    pub region: String,
    pub ssh_key_name: String,
    pub labels: BTreeMap<String, String>,
    pub network_id: String,
}

/// Cloud provider operations consumed by provisioning, healing, and scaling.
///
/// All operations are idempotent by name: calling `create_server` for a
/// name that already exists, or `delete_server`/`delete_ssh_key` for a name
/// that doesn't, must not be treated as a hard failure by callers — the
/// mock implementation in `controller::mock` models this, and real
/// implementations are expected to as well.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn create_server(&self, opts: CreateServerOpts) -> Result<String>;
    async fn delete_server(&self, name: &str) -> Result<()>;
    async fn get_server_by_name(&self, name: &str) -> Result<Option<CloudServer>>;
    async fn get_server_ip(&self, name: &str) -> Result<Option<String>>;
    async fn get_servers_by_label(&self, labels: &BTreeMap<String, String>) -> Result<Vec<CloudServer>>;
    async fn get_network(&self, name: &str) -> Result<Option<String>>;
    async fn get_firewall(&self, name: &str) -> Result<Option<String>>;
    async fn get_load_balancer(&self, name: &str) -> Result<Option<String>>;
    async fn get_snapshot_by_labels(&self, labels: &BTreeMap<String, String>) -> Result<Option<String>>;
    async fn create_ssh_key(&self, name: &str, public_key: &str, labels: &BTreeMap<String, String>) -> Result<String>;
    async fn delete_ssh_key(&self, name: &str) -> Result<()>;
}

/// One member of the embedded etcd cluster, as reported by the node-OS API.
///
/// Per §9 Open Questions, `is_leader` is not meaningful (the source maps it
/// from an `IsLearner` field) and replacement logic must never branch on
/// it — it is retained here purely for API fidelity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EtcdMember {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub is_leader: bool,
}

/// Node-OS configuration API consumed by bootstrap, healing, and scaling.
#[async_trait]
pub trait NodeOsClient: Send + Sync {
    async fn apply_config(&self, ip: &str, config: &[u8]) -> Result<()>;
    async fn is_node_in_maintenance_mode(&self, ip: &str) -> Result<bool>;
    async fn get_etcd_members(&self, ip: &str) -> Result<Vec<EtcdMember>>;
    async fn remove_etcd_member(&self, ip: &str, member_id: &str) -> Result<()>;
    /// Polls the node's service list until `kubelet` reports `Running`, or
    /// the timeout elapses.
    async fn wait_for_node_ready(&self, ip: &str, timeout_secs: u64) -> Result<()>;
}

/// Generates node-OS machine configuration bytes for new servers.
pub trait NodeOsConfigGenerator: Send + Sync {
    fn generate_control_plane_config(
        &self,
        sans: &[String],
        hostname: &str,
        server_id: &str,
    ) -> Result<Vec<u8>>;
    fn generate_worker_config(&self, hostname: &str, server_id: &str) -> Result<Vec<u8>>;
    fn set_endpoint(&mut self, endpoint: &str);
    fn get_client_config(&self) -> Result<Vec<u8>>;
}

/// Maps legacy cloud server-size names to their current equivalents (§6).
///
/// Applied at every `create_server` call site so that specs written against
/// older documentation keep working without the caller needing to know the
/// cloud provider's renaming history.
pub fn normalize_server_size(size: &str) -> String {
    match size {
        "cx22" => "cx23".to_string(),
        "cx32" => "cx33".to_string(),
        "cx42" => "cx43".to_string(),
        "cx52" => "cx53".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_known_legacy_sizes() {
        assert_eq!(normalize_server_size("cx22"), "cx23");
        assert_eq!(normalize_server_size("cx32"), "cx33");
    }

    #[test]
    fn leaves_unknown_sizes_untouched() {
        assert_eq!(normalize_server_size("cx23"), "cx23");
        assert_eq!(normalize_server_size("cpx31"), "cpx31");
    }
}
