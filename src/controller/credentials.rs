//! Loads `Credentials` from the Secret named by `Spec.CredentialsRef` (§3)

use k8s_openapi::api::core::v1::Secret;
use kube::{api::Api, Client};

use crate::crd::{ClusterSpec, Credentials};
use crate::error::Error;

const KEY_CLOUD_TOKEN: &str = "cloud-token";
const KEY_NODE_OS_SECRETS: &str = "node-os-secrets";
const KEY_NODE_OS_CLIENT_CONFIG: &str = "node-os-client-config";

/// Fetch and decode the credentials Secret referenced by the spec.
///
/// A missing secret, or a secret missing one of the three required keys,
/// is a `Precondition` error (§7) — the caller should record it and
/// requeue after the default interval rather than treat it as fatal.
pub async fn load_credentials(client: &Client, namespace: &str, spec: &ClusterSpec) -> Result<Credentials, Error> {
    if spec.credentials_ref.name.trim().is_empty() {
        return Err(Error::MissingCredentials("spec.credentialsRef.name is empty".to_string()));
    }

    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = secrets
        .get(&spec.credentials_ref.name)
        .await
        .map_err(|e| Error::MissingCredentials(format!("secret {}: {e}", spec.credentials_ref.name)))?;

    let data = secret.data.unwrap_or_default();

    let cloud_token = data
        .get(KEY_CLOUD_TOKEN)
        .map(|b| String::from_utf8_lossy(&b.0).trim().to_string())
        .ok_or_else(|| Error::MissingCredentials(format!("secret missing key {KEY_CLOUD_TOKEN}")))?;

    let node_os_secrets = data
        .get(KEY_NODE_OS_SECRETS)
        .map(|b| b.0.clone())
        .ok_or_else(|| Error::MissingCredentials(format!("secret missing key {KEY_NODE_OS_SECRETS}")))?;

    let node_os_client_config = data
        .get(KEY_NODE_OS_CLIENT_CONFIG)
        .map(|b| b.0.clone())
        .ok_or_else(|| Error::MissingCredentials(format!("secret missing key {KEY_NODE_OS_CLIENT_CONFIG}")))?;

    Ok(Credentials {
        cloud_token,
        node_os_secrets,
        node_os_client_config,
    })
}
