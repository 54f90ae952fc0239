use anyhow::Result;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tallymon_alert::evaluator::AlertEvaluator;
use tallymon_alert::sink::{AlertDispatcher, AlertSink, LogSink, WebhookSink};
use tallymon_storage::{MemoryMetricStore, MetricStore, SqliteMetricStore};
use tokio::signal;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use tallymon_server::app;
use tallymon_server::config::{ServerConfig, StorageBackend};
use tallymon_server::rules::build_rules;
use tallymon_server::state::AppState;

/// How long shutdown waits for queued batches and alerts to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tallymon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/server.toml".to_string());
    let config = ServerConfig::load_or_default(&config_path)?;

    tracing::info!(
        http_port = config.http_port,
        backend = ?config.storage.backend,
        data_dir = %config.storage.data_dir,
        rules = config.alert.rules.len(),
        "tallymon-server starting"
    );

    let store: Arc<dyn MetricStore> = match config.storage.backend {
        StorageBackend::Sqlite => Arc::new(SqliteMetricStore::new(Path::new(
            &config.storage.data_dir,
        ))?),
        StorageBackend::Memory => Arc::new(MemoryMetricStore::new()),
    };

    // Alert pipeline: ingest -> evaluator -> dispatcher -> sinks
    let evaluator = AlertEvaluator::new(build_rules(&config.alert.rules)?);
    let mut sinks: Vec<Box<dyn AlertSink>> = vec![Box::new(LogSink)];
    if let Some(url) = config.alert.webhook_url.as_deref().filter(|u| !u.is_empty()) {
        sinks.push(Box::new(WebhookSink::with_delivery_budget(
            url,
            config.alert.sink_timeout(),
        )?));
        tracing::info!(url, "Webhook alert sink enabled");
    }
    let dispatcher = AlertDispatcher::new(sinks, config.alert.sink_timeout());

    let (batch_tx, batch_rx) = mpsc::channel(config.alert.queue_capacity.max(1));
    let (event_tx, event_rx) = mpsc::channel(config.alert.sink_queue_capacity.max(1));
    let evaluator_handle = tokio::spawn(evaluator.run(batch_rx, event_tx));
    let dispatcher_handle = tokio::spawn(dispatcher.run(event_rx));

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let state = AppState::new(store, batch_tx, config);
    let app = app::build_http_app(state);
    let listener = tokio::net::TcpListener::bind(http_addr).await?;

    tracing::info!(http = %http_addr, "Server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
            tracing::info!("Shutting down gracefully");
        })
        .await?;

    // The router (and with it every batch sender) is gone, so both loops
    // end once their queues are empty.
    match tokio::time::timeout(DRAIN_TIMEOUT, evaluator_handle).await {
        Ok(Ok(stats)) => tracing::info!(batches = stats.batches, "Alert evaluator drained"),
        Ok(Err(e)) => tracing::error!(error = %e, "Alert evaluator task failed"),
        Err(_) => tracing::warn!("Alert evaluator did not drain in time"),
    }
    match tokio::time::timeout(DRAIN_TIMEOUT, dispatcher_handle).await {
        Ok(Ok(stats)) => tracing::info!(delivered = stats.delivered, "Alert dispatcher drained"),
        Ok(Err(e)) => tracing::error!(error = %e, "Alert dispatcher task failed"),
        Err(_) => tracing::warn!("Alert dispatcher did not drain in time"),
    }

    tracing::info!("Server stopped");
    Ok(())
}
