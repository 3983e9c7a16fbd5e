//! Custom Resource Definitions for the k8zner operator
//!
//! This module defines the Cluster CRD and the shared status/spec types it
//! is built from.

mod cluster;
pub mod types;

#[cfg(test)]
mod tests;

pub use cluster::{Cluster, ClusterSpec, ClusterStatus, KubernetesSpec, NodeOsSpec, SpecValidationError};
pub use types::*;
