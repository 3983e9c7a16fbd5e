//! The reconciler's dependency-injection surface (§9 Design Notes)
//!
//! "The four collaborator surfaces... are best modeled as explicit
//! dependency objects passed into the reconciler constructor (builder
//! with optional overrides)." `Deps` is that bundle; `main.rs` builds one
//! with real implementations, tests build one from `controller::mock`.

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::sync::Mutex;

use super::interfaces::{CloudProvider, NodeOsClient, NodeOsConfigGenerator};

#[derive(Clone)]
pub struct Deps {
    pub client: Client,
    pub cloud: Arc<dyn CloudProvider>,
    pub node_os: Arc<dyn NodeOsClient>,
    pub config_gen: Arc<Mutex<dyn NodeOsConfigGenerator>>,
    pub max_concurrent_heals: usize,
    /// Overrides `constants::DEFAULT_REQUEUE_AFTER` (§10.4 `--default-requeue-secs`).
    pub default_requeue_after: Duration,
}

impl Deps {
    pub fn new(
        client: Client,
        cloud: Arc<dyn CloudProvider>,
        node_os: Arc<dyn NodeOsClient>,
        config_gen: Arc<Mutex<dyn NodeOsConfigGenerator>>,
    ) -> Self {
        Self {
            client,
            cloud,
            node_os,
            config_gen,
            max_concurrent_heals: super::constants::DEFAULT_MAX_CONCURRENT_HEALS,
            default_requeue_after: super::constants::DEFAULT_REQUEUE_AFTER,
        }
    }

    pub fn with_max_concurrent_heals(mut self, n: usize) -> Self {
        self.max_concurrent_heals = n;
        self
    }

    pub fn with_default_requeue_after(mut self, d: Duration) -> Self {
        self.default_requeue_after = d;
        self
    }
}
