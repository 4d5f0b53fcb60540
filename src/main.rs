use std::sync::Arc;

use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use omniparser_queue::app_state::AppState;
use omniparser_queue::config::AppConfig;
use omniparser_queue::routes;

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
    let instances = config
        .instances()
        .expect("Failed to parse OMNIPARSER_SERVERS");
    let settings = config.queue_settings();

    tracing::info!(
        instances = instances.len(),
        max_queue_size = settings.max_queue_size,
        "Initializing omniparser-queue"
    );
    if instances.is_empty() {
        tracing::warn!("No OmniParser instances configured; jobs will time out until PUT /instances");
    }

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    let state = AppState::new(settings, instances).expect("Failed to build OmniParser HTTP client");

    let shutdown = CancellationToken::new();
    let workers = state.start(shutdown.clone());

    let app = routes::router(state, config.max_body_bytes).route(
        "/metrics",
        get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            signal.cancel();
        })
        .await
        .expect("Server error");

    shutdown.cancel();
    for handle in workers {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Background task panicked");
        }
    }
    tracing::info!("omniparser-queue stopped");
}
