//! k8zner-operator entry point.
//!
//! Wires a `kube::Client`, an operator configuration (§10.4), and the
//! four collaborator surfaces (§6/§10.6) into a `ControllerState`, then
//! runs the reconcile loop to completion (on shutdown signal).

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::Mutex;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use k8zner_operator::controller::mock::{MockAddonApplier, MockCloudProvider, MockNodeOsClient, MockNodeOsConfigGenerator};
use k8zner_operator::controller::{Deps, ReconcilerBuilder};
use k8zner_operator::{controller, Error};

#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

/// CLI configuration (§10.4). All timing/concurrency constants in
/// `controller::constants` remain compiled-in defaults; these flags are
/// the only operational overrides.
#[derive(Parser, Debug)]
#[command(name = "k8zner-operator", version, about = "Kubernetes operator for the Cluster CRD")]
struct Args {
    /// Path to a kubeconfig file. Falls back to in-cluster config when unset.
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<std::path::PathBuf>,

    /// Override the default (non-fast) reconcile requeue interval, in seconds.
    #[arg(long, env = "DEFAULT_REQUEUE_SECS")]
    default_requeue_secs: Option<u64>,

    /// Override the maximum number of concurrent node heals/scale-ups per tick.
    #[arg(long, env = "MAX_CONCURRENT_HEALS")]
    max_concurrent_heals: Option<usize>,

    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::builder().with_default_directive(Level::INFO.into()).from_env_lossy();
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).init(),
    }
}

async fn build_client(kubeconfig: Option<std::path::PathBuf>) -> Result<kube::Client, Error> {
    match kubeconfig {
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(&path)
                .map_err(|e| Error::ConfigError(format!("failed to read kubeconfig at {}: {e}", path.display())))?;
            let config = kube::Config::from_custom_kubeconfig(kubeconfig, &Default::default())
                .await
                .map_err(|e| Error::ConfigError(format!("failed to build client config: {e}")))?;
            kube::Client::try_from(config).map_err(Error::KubeError)
        }
        None => kube::Client::try_default().await.map_err(Error::KubeError),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("starting k8zner-operator v{}", env!("CARGO_PKG_VERSION"));

    let client = build_client(args.kubeconfig).await?;
    info!("connected to Kubernetes cluster");

    // The cloud provider, node-OS client, config generator, and addon
    // applier are out-of-scope external collaborators (§1, §10.6); the
    // mock fixtures stand in as the development wiring until a real
    // implementation of each is plugged in via `Deps`/`ReconcilerBuilder`.
    let deps = Deps::new(
        client,
        Arc::new(MockCloudProvider::new()),
        Arc::new(MockNodeOsClient::new()),
        Arc::new(Mutex::new(MockNodeOsConfigGenerator::default())),
    );

    let mut builder = ReconcilerBuilder::new(deps, Arc::new(MockAddonApplier));
    if let Some(max_heals) = args.max_concurrent_heals {
        builder = builder.max_concurrent_heals(max_heals);
    }
    if let Some(secs) = args.default_requeue_secs {
        builder = builder.default_requeue_after(std::time::Duration::from_secs(secs));
    }

    let state = Arc::new(builder.build());
    controller::run_controller(state).await
}
