//! Status Writer (§4.7)
//!
//! Persists `ClusterStatus` with optimistic-concurrency retry: on a
//! version conflict, re-fetch the live object, graft our desired status
//! onto it (preserving the live object's `Addons` map when ours is empty,
//! so a concurrent reconcile's addon progress is never lost), sleep, retry.

use kube::{
    api::{Api, Patch, PatchParams},
    Client,
};
use serde_json::json;
use tokio::time::sleep;
use tracing::warn;

use crate::crd::{Cluster, ClusterStatus};
use crate::error::Result;

use super::constants::{STATUS_RETRY_INTERVAL, STATUS_UPDATE_RETRIES};

const FIELD_MANAGER: &str = "k8zner-operator";

/// Patch `Cluster/{name}.status` to `status`, retrying on conflict.
pub async fn write_status(client: &Client, namespace: &str, name: &str, mut status: ClusterStatus) -> Result<()> {
    let api: Api<Cluster> = Api::namespaced(client.clone(), namespace);

    for attempt in 0..STATUS_UPDATE_RETRIES {
        let patch = json!({ "status": status });
        let result = api
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&patch))
            .await;

        match result {
            Ok(_) => return Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 && attempt + 1 < STATUS_UPDATE_RETRIES => {
                warn!(name, attempt, "status update conflict, retrying");
                if status.addons.is_empty() {
                    if let Ok(latest) = api.get(name).await {
                        if let Some(latest_status) = latest.status {
                            if !latest_status.addons.is_empty() {
                                status.addons = latest_status.addons;
                            }
                        }
                    }
                }
                sleep(STATUS_RETRY_INTERVAL).await;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
