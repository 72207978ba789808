use shard_search::{
    api::{build_router, AppState},
    config::Config,
    connectors::ConnectorRegistry,
    state::ServerState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let (config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "shard_search={},tower_http=info",
            config.observability.log_level
        )
        .into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    if let Some(e) = config_error {
        tracing::warn!(error = %e, "Failed to load configuration, using defaults");
    }
    tracing::info!(
        service = %config.observability.service_name,
        "Starting shard-search v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Initialize Prometheus metrics
    if config.observability.prometheus_enabled {
        if let Err(e) = shard_search::metrics::init_metrics() {
            tracing::warn!(error = %e, "Failed to initialize metrics, continuing without them");
        } else {
            tracing::info!("Prometheus metrics initialized");
        }
    } else {
        tracing::info!("Prometheus metrics disabled in configuration");
    }

    // Load indexes
    let server = Arc::new(ServerState::new(config.clone(), ConnectorRegistry::with_builtin()));
    let loaded = server.load_indexes().await?;
    tracing::info!(
        indexes = loaded,
        settings_path = %config.engine.settings_path.display(),
        data_path = %config.engine.data_path.display(),
        "Indexes loaded"
    );
    for (index, reason) in server.failed_indexes() {
        tracing::error!(index = %index, reason = %reason, "Index unavailable");
    }

    // Start HTTP server
    let app = build_router(AppState::new(server.clone()));
    let http_addr = format!("{}:{}", config.server.host, config.server.http_port);
    let listener = tokio::net::TcpListener::bind(&http_addr).await?;
    tracing::info!("HTTP API server listening on http://{}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    tracing::info!("Shutting down gracefully...");
    server.shutdown().await;
    Ok(())
}
