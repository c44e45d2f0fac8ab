mod api;
mod cli;
mod config;
mod error;
mod insights;
mod logging;
mod queue;
mod scheduler;
mod services;
mod store;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method};
use clap::Parser;
use dotenvy::dotenv;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::cli::Cli;
use crate::config::Config;
use crate::error::AppError;
use crate::insights::{FeeInsightsEngine, HorizonLedgerProvider, LedgerDataProvider};
use crate::logging::init_logging;
use crate::queue::EventQueue;
use crate::scheduler::{forward_shutdown_signal, run_ingestion, run_ledger_polling, UpstreamStatus};
use crate::services::horizon::{HorizonClient, NetworkFeeSource};
use crate::store::QueryService;

fn fail(err: AppError) -> ! {
    tracing::error!("{}", err);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenv().ok();

    init_logging();

    let cli = Cli::parse();

    // CLI overrides env
    let config = Config::from_sources(&cli).unwrap_or_else(|err| fail(err.into()));

    tracing::info!("Configuration loaded: {:?}", config);

    // ---- Ingestion pipeline ----
    let engine =
        FeeInsightsEngine::new(config.insights.clone()).unwrap_or_else(|err| fail(err.into()));
    let query = QueryService::new(engine.store());

    let horizon_client = HorizonClient::new(config.horizon_url.clone());
    tracing::info!("Horizon client initialized: {}", horizon_client.base_url());
    let network: Arc<dyn NetworkFeeSource> = Arc::new(horizon_client.clone());
    let provider: Arc<dyn LedgerDataProvider> =
        Arc::new(HorizonLedgerProvider::new(horizon_client));

    if let Err(err) = provider.health_check().await {
        tracing::warn!("Horizon health check failed at startup: {}", err);
    }

    let queue = Arc::new(EventQueue::new(config.queue_capacity, config.backpressure));
    let (status_tx, status_rx) = watch::channel(UpstreamStatus::Available);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ---- CORS policy ----
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>().unwrap_or_else(|_| {
                fail(AppError::Config(format!("invalid origin in ALLOWED_ORIGINS: {}", o)))
            })
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([HeaderName::from_static("content-type")])
        .max_age(Duration::from_secs(3600));

    let app = api::create_router(query, network).layer(cors);

    // ---- TCP listener ----
    let addr = format!("0.0.0.0:{}", config.api_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|err| {
            fail(AppError::Network(format!("failed to bind to {}: {}", addr, err)))
        });

    tracing::info!("API server listening on {}", addr);

    // ---- Shutdown on Ctrl-C ----
    tokio::spawn(forward_shutdown_signal(tokio::signal::ctrl_c(), shutdown_tx));

    let mut server_shutdown = shutdown_rx.clone();

    // ---- Run server, poller and ingestion concurrently ----
    let (_, _, engine) = tokio::join!(
        async {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown.changed().await;
                })
                .await
                .unwrap_or_else(|err| tracing::error!("Server error: {}", err));
        },
        run_ledger_polling(
            provider,
            queue.clone(),
            status_tx,
            Duration::from_secs(config.poll_interval_seconds),
            shutdown_rx.clone(),
        ),
        run_ingestion(engine, queue.clone(), status_rx, shutdown_rx),
    );

    let stats = engine.extractor_stats();
    tracing::info!(
        "Ledgers: {} accepted, {} stale rejected, {} forced out of the reorder buffer; {} failed transactions excluded",
        stats.accepted,
        stats.stale_rejected,
        stats.forced_releases,
        stats.failed_excluded
    );
    for window in engine.window_ids() {
        if let Some(late) = engine.late_drops(window) {
            tracing::info!("Window {}: {} late records dropped", window, late);
        }
    }

    tracing::info!(
        "Application shut down cleanly ({} snapshots published, {} queued ledgers dropped)",
        engine.published(),
        queue.dropped()
    );
}
