//! Event reason constants and the emission helper (§6)
//!
//! Reasons are process-wide immutable constants, matching the design
//! notes' treatment of event-reason tables as initialized once at start
//! and never mutated at runtime.

use k8s_openapi::api::core::v1::Event as K8sEvent;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    api::{Api, ObjectMeta, PostParams},
    Client, Resource, ResourceExt,
};
use tracing::warn;

use crate::crd::Cluster;

/// Emit a Kubernetes Event against a Cluster, best-effort.
///
/// Event delivery failures are logged, never propagated — per §7, "event
/// emission plumbing" is ambient and must not turn a successful reconcile
/// step into a failed one.
pub async fn emit_event(client: &Client, cluster: &Cluster, event_type: &str, reason: &str, message: &str) {
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let events: Api<K8sEvent> = Api::namespaced(client.clone(), &namespace);

    let now = chrono::Utc::now();
    let event = K8sEvent {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-event-", cluster.name_any())),
            namespace: Some(namespace),
            ..Default::default()
        },
        type_: Some(event_type.to_string()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        involved_object: cluster.object_ref(&()),
        first_timestamp: Some(Time(now)),
        last_timestamp: Some(Time(now)),
        count: Some(1),
        ..Default::default()
    };

    if let Err(err) = events.create(&PostParams::default(), &event).await {
        warn!(%err, reason, "failed to publish event");
    }
}

pub const TYPE_NORMAL: &str = "Normal";
pub const TYPE_WARNING: &str = "Warning";

pub mod reason {
    pub const RECONCILING: &str = "Reconciling";
    pub const RECONCILE_SUCCEEDED: &str = "ReconcileSucceeded";
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
    pub const NODE_UNHEALTHY: &str = "NodeUnhealthy";
    pub const NODE_REPLACING: &str = "NodeReplacing";
    pub const NODE_REPLACED: &str = "NodeReplaced";
    pub const QUORUM_LOST: &str = "QuorumLost";
    pub const SCALING_UP: &str = "ScalingUp";
    pub const SCALING_DOWN: &str = "ScalingDown";
    pub const SERVER_CREATION_ERROR: &str = "ServerCreationError";
    pub const CONFIG_APPLY_ERROR: &str = "ConfigApplyError";
    pub const NODE_READY_TIMEOUT: &str = "NodeReadyTimeout";
    pub const CREDENTIALS_ERROR: &str = "CredentialsError";
    pub const ADDONS_TIMEOUT: &str = "AddonsTimeout";
    pub const PROVISIONING_COMPLETE: &str = "ProvisioningComplete";

    pub const PHASE_INFRASTRUCTURE: &str = "PhaseInfrastructure";
    pub const PHASE_IMAGE: &str = "PhaseImage";
    pub const PHASE_COMPUTE: &str = "PhaseCompute";
    pub const PHASE_BOOTSTRAP: &str = "PhaseBootstrap";
    pub const PHASE_CNI: &str = "PhaseCNI";
    pub const PHASE_ADDONS: &str = "PhaseAddons";
    pub const PHASE_CONFIGURING: &str = "PhaseConfiguring";

    pub const INFRASTRUCTURE_FAILED: &str = "InfrastructureFailed";
    pub const IMAGE_FAILED: &str = "ImageFailed";
    pub const COMPUTE_FAILED: &str = "ComputeFailed";
    pub const BOOTSTRAP_FAILED: &str = "BootstrapFailed";
    pub const CNI_FAILED: &str = "CNIFailed";
    pub const ADDONS_FAILED: &str = "AddonsFailed";
    pub const CONFIGURING_FAILED: &str = "ConfiguringFailed";
}
