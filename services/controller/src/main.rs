//! driftd control plane.
//!
//! The control plane keeps registered applications synchronized with
//! their declared desired state and drives progressive rollouts of new
//! revisions. It serves the operator REST API and runs one worker task
//! per application.

use std::sync::Arc;

use anyhow::Result;
use drift_controller::{
    analysis::{HttpMetricsProvider, MetricsProvider, StaticMetricsProvider},
    api,
    cluster::InMemoryCluster,
    config,
    health::HealthRules,
    reconcile::ReconcilerConfig,
    registry::Registry,
    scheduler::AppWorkerDeps,
    source::FsSourceStore,
    state::AppState,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to DRIFT_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting driftd control plane");
    info!(
        listen_addr = %config.listen_addr,
        source_root = %config.source_root.display(),
        "Configuration loaded"
    );

    let source = Arc::new(FsSourceStore::new(config.source_root.clone()));

    // The in-memory cluster is the dev-mode execution backend; a real
    // deployment swaps in a cluster-API adapter behind the same trait.
    let cluster = Arc::new(InMemoryCluster::new());
    if !config.dev_mode {
        warn!("No external cluster adapter configured, using in-memory backend");
    }

    let metrics: Arc<dyn MetricsProvider> = match &config.metrics_url {
        Some(url) => {
            info!(url = %url, "Using HTTP metrics provider");
            Arc::new(HttpMetricsProvider::new(url.clone()))
        }
        None => {
            info!("No metrics provider configured, analysis will be inconclusive");
            Arc::new(StaticMetricsProvider::new())
        }
    };

    let deps = AppWorkerDeps {
        source,
        cluster: cluster.clone(),
        metrics,
        refresh_interval: config.refresh_interval,
        external_timeout: config.external_timeout,
        reconciler: ReconcilerConfig {
            call_timeout: config.external_timeout,
            ..ReconcilerConfig::default()
        },
        health: HealthRules::default(),
    };

    let registry = Registry::new(deps);
    let state = AppState::new(registry, cluster);

    // Build and run the server
    let app = api::create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await?;

    // Stop every application worker before exiting.
    state.registry().shutdown_all().await;

    info!("Control plane shutdown complete");
    Ok(())
}
