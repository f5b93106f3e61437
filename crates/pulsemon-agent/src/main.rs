use anyhow::Result;
use pulsemon_agent::config::AgentConfig;
use pulsemon_agent::sender::Sender;
use pulsemon_agent::service::{AgentService, LoopSettings};
use pulsemon_collector::store::MetricStore;
use pulsemon_common::retry::RetryExecutor;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pulsemon=info".parse()?))
        .init();

    let config_path = std::env::args().nth(1);
    let config = AgentConfig::load(config_path.as_deref())?;
    tracing::info!(
        server = %config.base_url(),
        mode = ?config.report_mode,
        "pulsemon-agent starting"
    );

    let sender = Sender::new(
        config.base_url(),
        config.request_timeout(),
        RetryExecutor::new(config.retry.policy()),
        config.report_mode,
    )?;
    let store = Arc::new(MetricStore::new(pulsemon_collector::default_collectors()));
    let service = AgentService::new(
        store,
        Arc::new(sender),
        LoopSettings {
            poll_interval: config.poll_interval(),
            report_interval: config.report_interval(),
            batch_size: config.batch_size,
            shutdown_timeout: config.shutdown_timeout(),
        },
    );

    service.run().await?;
    pulsemon_common::shutdown::signal().await;
    tracing::info!("Shutting down gracefully");
    service.stop().await;
    tracing::info!("Agent stopped");

    Ok(())
}
