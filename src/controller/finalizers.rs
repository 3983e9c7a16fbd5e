//! Finalizer handling for Cluster cleanup
//!
//! The finalizer is added on first reconcile and only removed once cleanup
//! (cloud server/SSH-key/network teardown) has run to completion, per the
//! `kube::runtime::finalizer` `Cleanup` event contract used by `reconciler.rs`.

use kube::{
    api::{Api, Patch, PatchParams},
    Client, ResourceExt,
};
use serde_json::json;
use tracing::info;

use crate::crd::Cluster;
use crate::error::Result;

pub const CLUSTER_FINALIZER: &str = "k8zner.io/finalizer";

#[allow(dead_code)]
pub async fn add_finalizer(client: &Client, cluster: &Cluster) -> Result<()> {
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Cluster> = Api::namespaced(client.clone(), &namespace);

    let finalizers: Vec<String> = cluster.finalizers().iter().cloned().collect();
    if !finalizers.contains(&CLUSTER_FINALIZER.to_string()) {
        let mut new_finalizers = finalizers;
        new_finalizers.push(CLUSTER_FINALIZER.to_string());

        let patch = json!({ "metadata": { "finalizers": new_finalizers } });
        api.patch(&cluster.name_any(), &PatchParams::apply("k8zner-operator"), &Patch::Merge(&patch))
            .await?;
        info!(cluster = %cluster.name_any(), "added finalizer");
    }
    Ok(())
}

#[allow(dead_code)]
pub async fn remove_finalizer(client: &Client, cluster: &Cluster) -> Result<()> {
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Cluster> = Api::namespaced(client.clone(), &namespace);

    let finalizers: Vec<String> = cluster
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != CLUSTER_FINALIZER)
        .cloned()
        .collect();

    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(&cluster.name_any(), &PatchParams::apply("k8zner-operator"), &Patch::Merge(&patch))
        .await?;

    info!(cluster = %cluster.name_any(), "removed finalizer");
    Ok(())
}

pub fn is_being_deleted(cluster: &Cluster) -> bool {
    cluster.metadata.deletion_timestamp.is_some()
}

pub fn has_finalizer(cluster: &Cluster) -> bool {
    cluster.finalizers().iter().any(|f| f == CLUSTER_FINALIZER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalizer_name_is_domain_scoped() {
        assert_eq!(CLUSTER_FINALIZER, "k8zner.io/finalizer");
    }
}
