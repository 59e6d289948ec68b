//! # Initialization
//!
//! Controller startup: rustls setup, tracing, metrics, probe server, and the
//! Kubernetes client.

use crate::config::ControllerConfig;
use crate::constants::{DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS};
use crate::controller::reconciler::Reconciler;
use crate::crd::Challenge;
use crate::observability;
use crate::server::{start_server, ServerState};
use crate::store::KubeStore;
use anyhow::{Context, Result};
use kube::{api::Api, Client};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Everything the watch loop needs
pub struct InitializationResult {
    pub challenges: Api<Challenge>,
    pub reconciler: Arc<Reconciler<KubeStore>>,
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.ready())
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
pub async fn initialize() -> Result<InitializationResult> {
    // Must happen before any rustls connection is made. An error only means
    // a provider is already installed.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    let config = ControllerConfig::from_env();
    observability::init_tracing(&config.log_format)?;

    info!("Starting ACME HTTP-01 solver controller v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Build info: datetime={}, git_hash={}",
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!(
        "Solver image {}, watching {}",
        config.solver_image,
        config
            .watch_namespace
            .as_deref()
            .map_or_else(|| "all namespaces".to_string(), |ns| format!("namespace {ns}"))
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_state_clone = server_state.clone();
    let server_port = config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let challenges: Api<Challenge> = match config.watch_namespace.as_deref() {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    };

    let reconciler = Arc::new(Reconciler::new(KubeStore::new(client), config));

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        challenges,
        reconciler,
        server_state,
    })
}

/// Wait for the HTTP server to bind
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(DEFAULT_SERVER_STARTUP_TIMEOUT_SECS);
    let poll_interval = Duration::from_millis(DEFAULT_SERVER_POLL_INTERVAL_MS);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.ready() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}
