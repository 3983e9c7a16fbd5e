//! k8zner-operator: a Kubernetes operator that reconciles a `Cluster`
//! custom resource into a running cloud-provisioned Kubernetes cluster.
//!
//! The reconciliation engine is the core of this crate (`controller`); it
//! treats the cloud provider, the node-OS configuration client, and the
//! addon installer as injected collaborators (see `controller::interfaces`
//! and `controller::mock`) rather than talking to any SDK directly.

pub mod controller;
pub mod crd;
pub mod error;

pub use crate::error::{Error, Result};
