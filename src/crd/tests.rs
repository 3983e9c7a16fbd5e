//! Unit tests for `ClusterSpec::validate()`
//!
//! Tests that the validator accepts well-formed cluster specs and rejects
//! structurally invalid ones.

#[cfg(test)]
mod cluster_spec_validation {
    use crate::crd::{
        BootstrapSpec, ClusterSpec, CredentialsRef, KubernetesSpec, NodeGroupSpec, NodeOsSpec,
    };

    fn valid_spec() -> ClusterSpec {
        ClusterSpec {
            region: "nbg1".to_string(),
            control_planes: NodeGroupSpec { count: 3, size: "cx23".to_string() },
            workers: NodeGroupSpec { count: 2, size: "cx23".to_string() },
            kubernetes: KubernetesSpec { version: "1.30.0".to_string() },
            node_os: NodeOsSpec { version: "1.7.0".to_string() },
            bootstrap: None,
            credentials_ref: CredentialsRef { name: "cluster-credentials".to_string() },
            paused: false,
            health_check: None,
            addons: None,
            domain: "example.com".to_string(),
        }
    }

    #[test]
    fn accepts_minimal_valid_spec() {
        assert!(valid_spec().validate().is_ok());
    }

    #[test]
    fn rejects_empty_region() {
        let mut spec = valid_spec();
        spec.region = "".to_string();
        let errors = spec.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "spec.region"));
    }

    #[test]
    fn rejects_empty_domain() {
        let mut spec = valid_spec();
        spec.domain = "   ".to_string();
        let errors = spec.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "spec.domain"));
    }

    #[test]
    fn rejects_zero_control_planes() {
        let mut spec = valid_spec();
        spec.control_planes.count = 0;
        let errors = spec.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "spec.controlPlanes.count"));
    }

    #[test]
    fn allows_single_control_plane() {
        let mut spec = valid_spec();
        spec.control_planes.count = 1;
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn rejects_negative_workers() {
        let mut spec = valid_spec();
        spec.workers.count = -1;
        let errors = spec.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "spec.workers.count"));
    }

    #[test]
    fn allows_zero_workers() {
        let mut spec = valid_spec();
        spec.workers.count = 0;
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn rejects_bootstrap_completed_without_public_ip() {
        let mut spec = valid_spec();
        spec.bootstrap = Some(BootstrapSpec { completed: true, public_ip: None });
        let errors = spec.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "spec.bootstrap.publicIP"));
    }

    #[test]
    fn accepts_bootstrap_completed_with_public_ip() {
        let mut spec = valid_spec();
        spec.bootstrap = Some(BootstrapSpec {
            completed: true,
            public_ip: Some("203.0.113.1".to_string()),
        });
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn rejects_empty_kubernetes_version() {
        let mut spec = valid_spec();
        spec.kubernetes.version = "".to_string();
        let errors = spec.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "spec.kubernetes.version"));
    }
}
