//! # Initialization
//!
//! Reconciler initialization: rustls setup, tracing, metrics, Kubernetes
//! client, ports, state restore and HTTP server startup.

use crate::cluster::KubeCluster;
use crate::config::ControllerConfig;
use crate::controller::control::ControlPlane;
use crate::controller::kustomize::KustomizeRenderer;
use crate::controller::reconciler::{
    KubeStatusPublisher, Reconciler, ReconcilerSettings, Registry, StatusPublisher,
};
use crate::controller::server::{start_server, ServerState};
use crate::controller::store::{FileStore, MemoryStore, StateStore};
use crate::observability;
use crate::provider::{AwsSecretsManager, EnvProvider, ProviderRegistry};
use anyhow::{Context, Result};
use kube::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

const SERVER_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const SERVER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything the watch loop and shutdown need
pub struct InitializationResult {
    pub client: Client,
    pub config: ControllerConfig,
    pub control: Arc<ControlPlane>,
    pub publisher: Arc<KubeStatusPublisher>,
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field(
                "server_ready",
                &self.server_state.is_ready.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

/// Initialize the reconciler runtime
///
/// # Errors
///
/// Fails when tracing, metrics, the Kubernetes client, the state store or the
/// HTTP server cannot be set up.
pub async fn initialize() -> Result<InitializationResult> {
    // Must run before any TLS connection is made
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }

    let config = ControllerConfig::from_env();
    observability::logging::init_tracing(&config).context("Failed to initialize tracing")?;

    info!("Starting GitOps reconciler");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let providers = Arc::new(build_providers(&config).await);
    info!(
        providers = ?providers.provider_ids().collect::<Vec<_>>(),
        "secret providers registered"
    );

    let renderer = Arc::new(KustomizeRenderer::new(
        config.kustomize_binary.clone(),
        config.sources_dir.clone(),
    ));
    let cluster = Arc::new(
        KubeCluster::new(client.clone(), &config.field_manager, &config.managed_kinds)
            .context("Invalid MANAGED_KINDS")?,
    );
    let store = open_store(&config).await?;
    let publisher = Arc::new(KubeStatusPublisher::new(
        client.clone(),
        config.field_manager.clone(),
    ));

    let reconciler = Arc::new(
        Reconciler::new(
            renderer,
            cluster,
            providers,
            store,
            ReconcilerSettings::from_config(&config)?,
        )
        .with_publisher(Arc::clone(&publisher) as Arc<dyn StatusPublisher>),
    );
    let control = Arc::new(ControlPlane::new(
        reconciler,
        Arc::new(Registry::new()),
        config.clone(),
    ));
    control
        .restore()
        .await
        .context("Failed to restore applications")?;

    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(AtomicBool::new(false)),
        control: Arc::clone(&control),
    });
    let server_state_clone = Arc::clone(&server_state);
    let server_port = config.server_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle).await?;

    info!("Reconciler initialized");

    Ok(InitializationResult {
        client,
        config,
        control,
        publisher,
        server_state,
    })
}

async fn build_providers(config: &ControllerConfig) -> ProviderRegistry {
    let mut providers = ProviderRegistry::new();
    if let Some(region) = &config.aws_region {
        providers.register(Arc::new(AwsSecretsManager::new(region).await));
    }
    if config.enable_env_provider {
        providers.register(Arc::new(EnvProvider::default()));
    }
    providers
}

async fn open_store(config: &ControllerConfig) -> Result<Arc<dyn StateStore>> {
    match &config.state_dir {
        Some(dir) => {
            info!("Persisting application state under {}", dir.display());
            let store = FileStore::open(dir.clone())
                .await
                .with_context(|| format!("Failed to open state directory {}", dir.display()))?;
            Ok(Arc::new(store))
        }
        None => {
            info!("STATE_DIR not set, application state is kept in memory");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        // Set by start_server once bound
        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > SERVER_STARTUP_TIMEOUT {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                SERVER_STARTUP_TIMEOUT.as_secs()
            ));
        }

        tokio::time::sleep(SERVER_POLL_INTERVAL).await;
    }
}
