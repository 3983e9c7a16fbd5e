//! In-memory fixtures for the four collaborator traits (§9 Design Notes)
//!
//! These are the substitutable mocks the design notes call for — "this is
//! what the test suite exercises by substituting mocks" — used by unit
//! tests throughout `controller` and by the integration tests under
//! `tests/`. Not used in production; `main.rs` wires real implementations.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

use super::addons::AddonApplier;
use super::interfaces::{
    CloudProvider, CloudServer, CreateServerOpts, EtcdMember, NodeOsClient, NodeOsConfigGenerator,
    ServerStatus,
};

#[derive(Default)]
pub struct MockCloudProvider {
    servers: Mutex<BTreeMap<String, CloudServer>>,
    labels: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    ssh_keys: Mutex<BTreeMap<String, String>>,
    next_id: AtomicU64,
    pub fail_create: Mutex<bool>,
}

impl MockCloudProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Test helper: seed a server as if it had already booted and acquired an IP.
    pub async fn seed_running_server(&self, name: &str, private_ip: &str) {
        let id = self.next_id();
        self.servers.lock().await.insert(
            name.to_string(),
            CloudServer {
                id,
                name: name.to_string(),
                status: ServerStatus::Running,
                public_ip: None,
                private_ip: Some(private_ip.to_string()),
            },
        );
    }

    pub async fn seed_labels(&self, name: &str, labels: BTreeMap<String, String>) {
        self.labels.lock().await.insert(name.to_string(), labels);
    }

    pub async fn server_count(&self) -> usize {
        self.servers.lock().await.len()
    }
}

#[async_trait]
impl CloudProvider for MockCloudProvider {
    async fn create_server(&self, opts: CreateServerOpts) -> Result<String> {
        if *self.fail_create.lock().await {
            return Err(Error::CloudError("mock: create_server configured to fail".to_string()));
        }
        let id = self.next_id();
        self.servers.lock().await.insert(
            opts.name.clone(),
            CloudServer {
                id: id.clone(),
                name: opts.name.clone(),
                status: ServerStatus::Starting,
                public_ip: None,
                private_ip: None,
            },
        );
        self.labels.lock().await.insert(opts.name, opts.labels);
        Ok(id)
    }

    async fn delete_server(&self, name: &str) -> Result<()> {
        self.servers.lock().await.remove(name);
        self.labels.lock().await.remove(name);
        Ok(())
    }

    async fn get_server_by_name(&self, name: &str) -> Result<Option<CloudServer>> {
        Ok(self.servers.lock().await.get(name).cloned())
    }

    async fn get_server_ip(&self, name: &str) -> Result<Option<String>> {
        Ok(self.servers.lock().await.get(name).and_then(|s| s.private_ip.clone()))
    }

    async fn get_servers_by_label(&self, labels: &BTreeMap<String, String>) -> Result<Vec<CloudServer>> {
        let all_labels = self.labels.lock().await;
        let servers = self.servers.lock().await;
        Ok(servers
            .iter()
            .filter(|(name, _)| {
                all_labels
                    .get(*name)
                    .map(|l| labels.iter().all(|(k, v)| l.get(k) == Some(v)))
                    .unwrap_or(false)
            })
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn get_network(&self, name: &str) -> Result<Option<String>> {
        Ok(Some(format!("net-{name}")))
    }

    async fn get_firewall(&self, name: &str) -> Result<Option<String>> {
        Ok(Some(format!("fw-{name}")))
    }

    async fn get_load_balancer(&self, name: &str) -> Result<Option<String>> {
        Ok(Some(format!("lb-{name}")))
    }

    async fn get_snapshot_by_labels(&self, _labels: &BTreeMap<String, String>) -> Result<Option<String>> {
        Ok(Some("snapshot-1".to_string()))
    }

    async fn create_ssh_key(&self, name: &str, public_key: &str, _labels: &BTreeMap<String, String>) -> Result<String> {
        let id = self.next_id();
        self.ssh_keys.lock().await.insert(name.to_string(), public_key.to_string());
        Ok(id)
    }

    async fn delete_ssh_key(&self, name: &str) -> Result<()> {
        self.ssh_keys.lock().await.remove(name);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockNodeOsClient {
    maintenance: Mutex<BTreeMap<String, bool>>,
    etcd_members: Mutex<BTreeMap<String, Vec<EtcdMember>>>,
    pub fail_apply: Mutex<bool>,
}

impl MockNodeOsClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_maintenance_mode(&self, ip: &str, in_maintenance: bool) {
        self.maintenance.lock().await.insert(ip.to_string(), in_maintenance);
    }

    pub async fn seed_etcd_members(&self, ip: &str, members: Vec<EtcdMember>) {
        self.etcd_members.lock().await.insert(ip.to_string(), members);
    }
}

#[async_trait]
impl NodeOsClient for MockNodeOsClient {
    async fn apply_config(&self, _ip: &str, _config: &[u8]) -> Result<()> {
        if *self.fail_apply.lock().await {
            return Err(Error::NodeOsError("mock: apply_config configured to fail".to_string()));
        }
        Ok(())
    }

    async fn is_node_in_maintenance_mode(&self, ip: &str) -> Result<bool> {
        Ok(*self.maintenance.lock().await.get(ip).unwrap_or(&true))
    }

    async fn get_etcd_members(&self, ip: &str) -> Result<Vec<EtcdMember>> {
        Ok(self.etcd_members.lock().await.get(ip).cloned().unwrap_or_default())
    }

    async fn remove_etcd_member(&self, ip: &str, member_id: &str) -> Result<()> {
        if let Some(members) = self.etcd_members.lock().await.get_mut(ip) {
            members.retain(|m| m.id != member_id);
        }
        Ok(())
    }

    async fn wait_for_node_ready(&self, _ip: &str, _timeout_secs: u64) -> Result<()> {
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct MockNodeOsConfigGenerator {
    pub endpoint: String,
}

impl NodeOsConfigGenerator for MockNodeOsConfigGenerator {
    fn generate_control_plane_config(&self, sans: &[String], hostname: &str, server_id: &str) -> Result<Vec<u8>> {
        Ok(format!("cp-config:{hostname}:{server_id}:sans={}", sans.join(",")).into_bytes())
    }

    fn generate_worker_config(&self, hostname: &str, server_id: &str) -> Result<Vec<u8>> {
        Ok(format!("worker-config:{hostname}:{server_id}").into_bytes())
    }

    fn set_endpoint(&mut self, endpoint: &str) {
        self.endpoint = endpoint.to_string();
    }

    fn get_client_config(&self) -> Result<Vec<u8>> {
        Ok(format!("client-config:{}", self.endpoint).into_bytes())
    }
}

/// An addon applier that reports every install as immediately successful
/// and healthy. Stands in for the out-of-scope Helm-equivalent renderer
/// (§1, §10.6) in development and tests.
#[derive(Default)]
pub struct MockAddonApplier;

#[async_trait]
impl AddonApplier for MockAddonApplier {
    async fn install(&self, _addon: &str) -> Result<()> {
        Ok(())
    }

    async fn is_healthy(&self, _addon: &str) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_server_round_trips() {
        let cloud = MockCloudProvider::new();
        cloud
            .create_server(CreateServerOpts {
                name: "cp-1".to_string(),
                snapshot_id: "snap".to_string(),
                server_type: "cx23".to_string(),
                region: "nbg1".to_string(),
                ssh_key_name: "key".to_string(),
                labels: BTreeMap::new(),
                network_id: "net".to_string(),
            })
            .await
            .unwrap();
        let server = cloud.get_server_by_name("cp-1").await.unwrap();
        assert!(server.is_some());
        assert_eq!(server.unwrap().status, ServerStatus::Starting);
    }

    #[tokio::test]
    async fn delete_absent_server_is_not_an_error() {
        let cloud = MockCloudProvider::new();
        assert!(cloud.delete_server("does-not-exist").await.is_ok());
    }
}
