use anyhow::{Context, Result};
use pulsemon_server::app;
use pulsemon_server::backend::StorageBackend;
use pulsemon_server::config::ServerConfig;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pulsemon=info".parse()?))
        .init();

    let config_path = std::env::args().nth(1);
    let config = ServerConfig::load(config_path.as_deref())?;
    tracing::info!(
        address = %config.address,
        store_interval_secs = config.store_interval_secs,
        restore = config.restore,
        "pulsemon-server starting"
    );

    run_server(config).await
}

async fn run_server(config: ServerConfig) -> Result<()> {
    let shutdown = CancellationToken::new();
    let backend = StorageBackend::select(&config, shutdown.clone()).await?;

    if let Some(persistence) = backend.persistence() {
        if let Some(mut errors) = persistence.take_errors() {
            tokio::spawn(async move {
                while let Some(e) = errors.recv().await {
                    tracing::error!(error = %e, "Snapshot flush failed");
                }
            });
        }
        persistence.start().await;
    }

    let app = app::build_http_app(backend.app_state(config.ping_timeout()));
    let listener = tokio::net::TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("binding {}", config.address))?;
    tracing::info!(address = %config.address, backend = backend.name(), "Server started");

    let signal_token = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            pulsemon_common::shutdown::signal().await;
            tracing::info!("Shutting down gracefully");
            signal_token.cancel();
        })
        .await;
    if let Err(e) = &served {
        tracing::error!(error = %e, "HTTP server error");
    }

    backend.shutdown().await?;
    tracing::info!("Server stopped");
    served.context("serving HTTP")
}
