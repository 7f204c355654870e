//! DbCluster Kubernetes Operator
//!
//! This operator manages multi-role database clusters on Kubernetes.
//!
//! ## Usage
//!
//! ```bash
//! # Run the operator (requires kubeconfig)
//! dbcluster-operator --registry registry.example.com/db
//!
//! # Keep storage on the nodes and reclaim it when stores die
//! dbcluster-operator --provisioner host-path --host-path-root /mnt/dbcluster
//!
//! # Run with custom log level
//! RUST_LOG=debug dbcluster-operator
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dbcluster_operator::config::{self, OperatorConfig, ProvisionerKind, RoleLimits};
use dbcluster_operator::{HttpHealthChecker, KubePlatform, Watcher};
use kube::Client;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Timeout of a single status endpoint request
const HEALTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// DbCluster Kubernetes Operator
#[derive(Parser, Debug)]
#[command(name = "dbcluster-operator")]
#[command(version, about = "Kubernetes Operator for multi-role database clusters")]
struct Args {
    /// Namespace to manage (auto-detected if empty)
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "")]
    namespace: String,

    /// Node this operator runs on (falls back to NODE_NAME, then HOSTNAME)
    #[arg(long, default_value = "")]
    node_name: String,

    /// How storage volumes are provisioned and reclaimed
    #[arg(long, env = "PROVISIONER", value_enum, default_value = "none")]
    provisioner: ProvisionerKind,

    /// Host directory holding one volume directory per storage pod
    #[arg(long, env = "HOST_PATH_ROOT")]
    host_path_root: Option<PathBuf>,

    /// Comma-separated directory names under the host path root never reclaimed
    #[arg(long, env = "GC_EXCLUDE", default_value = "grafana,prometheus")]
    exclude: String,

    /// Image registry prefix for role images
    #[arg(long, env = "IMAGE_REGISTRY", default_value = "pingcap")]
    registry: String,

    /// Maximum coordinator replicas
    #[arg(long, default_value = "7")]
    max_coordinator_replicas: i32,

    /// Maximum storage replicas
    #[arg(long, default_value = "100")]
    max_storage_replicas: i32,

    /// Maximum frontend replicas
    #[arg(long, default_value = "50")]
    max_frontend_replicas: i32,

    /// How long a role may take to become healthy, in seconds
    #[arg(long, env = "HEALTH_TIMEOUT_SECS", default_value = "300")]
    health_timeout_secs: u64,

    /// Startup attempts before giving up (0 = retry forever)
    #[arg(long, default_value = "0")]
    startup_max_attempts: u32,
}

impl Args {
    fn into_config(self) -> anyhow::Result<OperatorConfig> {
        let node_name = config::detect_node_name(&self.node_name).unwrap_or_default();
        let config = OperatorConfig {
            node_name,
            namespace: config::detect_namespace(&self.namespace),
            provisioner: self.provisioner,
            host_path_root: self.host_path_root,
            gc_exclude: config::parse_exclude(&self.exclude),
            registry: self.registry,
            limits: RoleLimits {
                coordinator: self.max_coordinator_replicas,
                storage: self.max_storage_replicas,
                frontend: self.max_frontend_replicas,
            },
            health_timeout: Duration::from_secs(self.health_timeout_secs),
            startup_max_attempts: self.startup_max_attempts,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Resolve on the first termination signal; returns the exit code.
async fn shutdown_signal() -> anyhow::Result<i32> {
    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut hup = signal(SignalKind::hangup())?;
    let mut quit = signal(SignalKind::quit())?;

    let (name, code) = tokio::select! {
        _ = term.recv() => ("SIGTERM", 0),
        _ = int.recv() => ("SIGINT", 1),
        _ = hup.recv() => ("SIGHUP", 1),
        _ = quit.recv() => ("SIGQUIT", 1),
    };
    info!(signal = name, "Received shutdown signal");
    Ok(code)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Args::parse().into_config()?;

    info!("Starting DbCluster Kubernetes Operator");
    info!(
        namespace = %config.namespace,
        node = %config.node_name,
        provisioner = ?config.provisioner,
        "Operator configuration loaded"
    );

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    info!("Connected to Kubernetes API server");

    let platform = Arc::new(KubePlatform::new(client, &config.namespace));
    let health = Arc::new(HttpHealthChecker::new(HEALTH_REQUEST_TIMEOUT)?);
    let watcher = Watcher::new(platform, health, config);

    let code = tokio::select! {
        result = watcher.run() => {
            if let Err(e) = result {
                error!(error = %e, "Operator stopped");
            }
            1
        }
        code = shutdown_signal() => code?,
    };

    info!("DbCluster Operator shutting down");
    std::process::exit(code);
}
