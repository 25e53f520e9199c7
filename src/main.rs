use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use video_ad_engine::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::{
        ads::{GraphAdsClient, GraphAdsConfig, SandboxAdNetwork},
        collaborators::{AdNetworkClient, ArtifactStore},
        inference::InferenceToolkitFactory,
        ledger::JobLedger,
        pipeline::PipelineSettings,
        queue::JobQueue,
        retention,
        storage::LocalArtifactStore,
        worker::{PoolConfig, WorkerDeps, WorkerPool},
    },
};

const REBUILD_BACKOFF: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing video-ad-engine");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    tracing::info!(path = %config.storage_path.display(), "Opening artifact store");
    let store: Arc<dyn ArtifactStore> = Arc::new(
        LocalArtifactStore::new(&config.storage_path)
            .await
            .expect("Failed to initialize artifact store"),
    );
    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .expect("Failed to create work directory");

    let ads = ad_network(&config, Arc::clone(&store));
    let factory = Arc::new(InferenceToolkitFactory::new(
        config.inference_url.clone(),
        Duration::from_secs(config.inference_timeout_secs),
        ads,
    ));

    let ledger = Arc::new(JobLedger::new(config.max_jobs));
    let queue = Arc::new(JobQueue::new());

    let pool = WorkerPool::spawn(
        PoolConfig {
            workers: config.worker_count.max(1),
            max_jobs_per_worker: config.max_jobs_per_worker,
            rebuild_backoff: REBUILD_BACKOFF,
        },
        WorkerDeps {
            queue: Arc::clone(&queue),
            ledger: Arc::clone(&ledger),
            store: Arc::clone(&store),
            factory,
            settings: Arc::new(PipelineSettings {
                work_root: config.work_dir.clone(),
                seed: config.video_seed,
                overlay_style: config.overlay_style,
                stage_timeout: config.stage_timeout(),
            }),
        },
    );

    let (stop_sweeper, sweeper_rx) = watch::channel(false);
    let sweeper = retention::spawn_sweeper(
        Arc::clone(&ledger),
        Arc::clone(&store),
        config.retention(),
        Duration::from_secs(config.sweep_interval_secs.max(1)),
        sweeper_rx,
    );

    let state = AppState::new(ledger, queue, store, pool.monitor());

    let app = routes::build_router(state, config.max_upload_bytes).merge(
        Router::new().route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        ),
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Shutting down, waiting for in-progress jobs");
    let _ = stop_sweeper.send(true);
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Retention sweeper ended abnormally");
    }
    pool.shutdown().await;
}

fn ad_network(config: &AppConfig, store: Arc<dyn ArtifactStore>) -> Arc<dyn AdNetworkClient> {
    if config.ad_sandbox_mode {
        tracing::info!("Ad network in sandbox mode");
        return Arc::new(SandboxAdNetwork);
    }
    match (&config.ad_access_token, &config.ad_account_id) {
        (Some(token), Some(account)) => {
            let client = GraphAdsClient::new(
                GraphAdsConfig {
                    api_url: config.ad_api_url.clone(),
                    access_token: token.clone(),
                    account_id: account.clone(),
                    page_id: config.ad_page_id.clone(),
                    timeout: Duration::from_secs(config.inference_timeout_secs),
                },
                store,
            )
            .expect("Failed to initialize ad network client");
            Arc::new(client)
        }
        _ => {
            tracing::warn!("AD_ACCESS_TOKEN or AD_ACCOUNT_ID missing, falling back to sandbox ads");
            Arc::new(SandboxAdNetwork)
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
