//! Cluster Custom Resource Definition
//!
//! The Cluster CRD represents a user's desired Kubernetes cluster running on
//! an immutable node OS, and the operator's converged view of its live state.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    AddonStatus, AddonsSpec, BootstrapSpec, ClusterPhase, Condition, CredentialsRef,
    ErrorRecord, HealthCheckSpec, InfrastructureStatus, NodeGroupSpec, NodeGroupStatus,
    PhaseRecord, ProvisioningPhase,
};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "k8zner.io",
    version = "v1alpha1",
    kind = "Cluster",
    namespaced,
    status = "ClusterStatus",
    shortname = "kc",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Provisioning","type":"string","jsonPath":".status.provisioningPhase"}"#,
    printcolumn = r#"{"name":"Region","type":"string","jsonPath":".spec.region"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub region: String,
    pub control_planes: NodeGroupSpec,
    pub workers: NodeGroupSpec,
    pub kubernetes: KubernetesSpec,
    pub node_os: NodeOsSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<BootstrapSpec>,
    pub credentials_ref: CredentialsRef,
    #[serde(default)]
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addons: Option<AddonsSpec>,
    pub domain: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesSpec {
    pub version: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeOsSpec {
    pub version: String,
}

/// Structured validation error for `ClusterSpec`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecValidationError {
    pub field: String,
    pub message: String,
}

impl SpecValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl ClusterSpec {
    pub fn health_check(&self) -> HealthCheckSpec {
        self.health_check.clone().unwrap_or_default()
    }

    pub fn addons(&self) -> AddonsSpec {
        self.addons.clone().unwrap_or_default()
    }

    pub fn bootstrap_completed(&self) -> bool {
        self.bootstrap.as_ref().map(|b| b.completed).unwrap_or(false)
    }

    /// Validate the spec invariants that the reconciler assumes hold.
    ///
    /// This is intentionally narrow: structural validity (required fields
    /// present, non-negative counts), not business policy. Quorum/HA policy
    /// is enforced at reconcile time (see `controller::healing`), not here,
    /// since `ControlPlanes.Count == 1` is a legal (if non-HA) spec.
    pub fn validate(&self) -> Result<(), Vec<SpecValidationError>> {
        let mut errors = Vec::new();

        if self.region.trim().is_empty() {
            errors.push(SpecValidationError::new("spec.region", "region must not be empty"));
        }
        if self.domain.trim().is_empty() {
            errors.push(SpecValidationError::new("spec.domain", "domain must not be empty"));
        }
        if self.control_planes.count < 1 {
            errors.push(SpecValidationError::new(
                "spec.controlPlanes.count",
                "controlPlanes.count must be at least 1",
            ));
        }
        if self.workers.count < 0 {
            errors.push(SpecValidationError::new(
                "spec.workers.count",
                "workers.count must not be negative",
            ));
        }
        if self.kubernetes.version.trim().is_empty() {
            errors.push(SpecValidationError::new(
                "spec.kubernetes.version",
                "kubernetes.version must not be empty",
            ));
        }
        if self.node_os.version.trim().is_empty() {
            errors.push(SpecValidationError::new(
                "spec.nodeOS.version",
                "nodeOS.version must not be empty",
            ));
        }
        if let Some(bootstrap) = &self.bootstrap {
            if bootstrap.completed && bootstrap.public_ip.is_none() {
                errors.push(SpecValidationError::new(
                    "spec.bootstrap.publicIP",
                    "bootstrap.publicIP is required when bootstrap.completed is true",
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default)]
    pub phase: ClusterPhase,
    #[serde(default)]
    pub provisioning_phase: ProvisioningPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reconcile_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<String>,
    #[serde(default)]
    pub infrastructure: InfrastructureStatus,
    #[serde(default)]
    pub control_planes: NodeGroupStatus,
    #[serde(default)]
    pub workers: NodeGroupStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub addons: BTreeMap<String, AddonStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phase_history: Vec<PhaseRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub last_errors: Vec<ErrorRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// When the current `provisioning_phase` was entered; drives stuck-phase detection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_started_at: Option<chrono::DateTime<chrono::Utc>>,
}
