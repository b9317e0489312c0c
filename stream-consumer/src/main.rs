use anyhow::{Context, Result};
use axum::{routing::get, Router};
use futures::future::ready;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stream_consumer::{config::Config, service::StreamConsumerService};

pub async fn index() -> &'static str {
    "stream consumer service"
}

fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus metrics recorder")
}

fn start_server(config: &Config, metrics: PrometheusHandle) -> JoinHandle<Result<()>> {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(|| ready("ok")))
        .route("/metrics", get(move || ready(metrics.render())));

    let bind = config.bind_address();

    tokio::task::spawn(async move {
        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .with_context(|| format!("Failed to bind metrics server to {bind}"))?;
        axum::serve(listener, router)
            .await
            .context("Metrics server failed")
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting stream consumer service");

    let config = Config::init_with_defaults()
        .context("Failed to load configuration from environment variables")?;

    info!("Configuration loaded: {config:?}");

    let metrics = setup_metrics_recorder()?;
    let server_handle = start_server(&config, metrics);
    info!("Started metrics server on {}", config.bind_address());

    let service = StreamConsumerService::new(config)
        .context("Failed to create stream consumer service. Check your Kafka configuration.")?;

    // Blocks until shutdown
    service.run().await?;

    server_handle.abort();

    Ok(())
}
