//! Node drain (§4.5 Glossary: "eviction of non-mirror, non-DaemonSet pods
//! from a node prior to decommission")

use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, EvictParams, ListParams},
    Client, ResourceExt,
};
use tracing::warn;

use crate::error::Result;

const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.source";

fn is_mirror_pod(pod: &Pod) -> bool {
    pod.annotations().contains_key(MIRROR_POD_ANNOTATION)
}

fn is_daemonset_owned(pod: &Pod) -> bool {
    pod.owner_references().iter().any(|o| o.kind == "DaemonSet")
}

/// List pods on `node_name` and evict everything except mirror pods and
/// DaemonSet-owned pods. `NotFound`/`TooManyRequests` (429, already being
/// evicted) are swallowed; other eviction errors are logged and draining
/// continues — decommission proceeds regardless (§4.5).
pub async fn drain_node(client: &Client, node_name: &str) -> Result<()> {
    let pods: Api<Pod> = Api::all(client.clone());
    let field_selector = format!("spec.nodeName={node_name}");
    let list = pods.list(&ListParams::default().fields(&field_selector)).await?;

    for pod in &list.items {
        if is_mirror_pod(pod) || is_daemonset_owned(pod) {
            continue;
        }
        let namespace = pod.namespace().unwrap_or_else(|| "default".to_string());
        let ns_pods: Api<Pod> = Api::namespaced(client.clone(), &namespace);
        match ns_pods.evict(&pod.name_any(), &EvictParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 || e.code == 429 => {}
            Err(err) => warn!(pod = %pod.name_any(), %err, "eviction failed, continuing drain"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::api::ObjectMeta;

    fn pod_with(annotations: std::collections::BTreeMap<String, String>, owners: Vec<OwnerReference>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                annotations: Some(annotations),
                owner_references: Some(owners),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn detects_mirror_pods() {
        let pod = pod_with(
            std::collections::BTreeMap::from([(MIRROR_POD_ANNOTATION.to_string(), "file".to_string())]),
            vec![],
        );
        assert!(is_mirror_pod(&pod));
    }

    #[test]
    fn detects_daemonset_owned_pods() {
        let owner = OwnerReference {
            kind: "DaemonSet".to_string(),
            name: "cilium".to_string(),
            api_version: "apps/v1".to_string(),
            uid: "abc".to_string(),
            ..Default::default()
        };
        let pod = pod_with(Default::default(), vec![owner]);
        assert!(is_daemonset_owned(&pod));
    }

    #[test]
    fn plain_pod_is_neither() {
        let pod = pod_with(Default::default(), vec![]);
        assert!(!is_mirror_pod(&pod));
        assert!(!is_daemonset_owned(&pod));
    }
}
