mod config;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tallymon_collector::cpu::CpuTimesCollector;
use tallymon_collector::network::NetworkCollector;
use tallymon_collector::{Collector, Readings};
use tokio::signal;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

/// Body of `POST /v1/metrics`.
#[derive(Debug, Serialize)]
struct MetricsPayload<'a> {
    resource_id: &'a str,
    timestamp: String,
    metrics: &'a Readings,
}

impl<'a> MetricsPayload<'a> {
    fn new(resource_id: &'a str, at: DateTime<Utc>, metrics: &'a Readings) -> Self {
        Self {
            resource_id,
            timestamp: at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            metrics,
        }
    }
}

fn collect_all(collectors: &mut [Box<dyn Collector>]) -> Readings {
    let mut readings = Readings::new();
    for collector in collectors.iter_mut() {
        match collector.collect() {
            Ok(r) => readings.extend(r),
            Err(e) => tracing::warn!(collector = collector.name(), error = %e, "Collection failed"),
        }
    }
    readings
}

async fn report(client: &reqwest::Client, url: &str, payload: &MetricsPayload<'_>) -> Result<()> {
    let resp = client.post(url).json(payload).send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("server answered {status}: {body}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tallymon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());
    let config = config::AgentConfig::load_or_default(&config_path)?;
    let resource_id = config.resolve_resource_id();
    let url = config.ingest_url();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()?;

    let mut collectors: Vec<Box<dyn Collector>> = vec![
        Box::new(CpuTimesCollector::new()),
        Box::new(NetworkCollector::new()),
    ];

    let mut tick = interval(Duration::from_secs(config.collection_interval_secs.max(1)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        resource_id = %resource_id,
        server = %url,
        interval_secs = config.collection_interval_secs,
        "tallymon-agent starting"
    );

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let readings = collect_all(&mut collectors);
                if readings.is_empty() {
                    continue;
                }
                let payload = MetricsPayload::new(&resource_id, Utc::now(), &readings);
                match report(&client, &url, &payload).await {
                    Ok(()) => tracing::debug!(count = readings.len(), "Metrics reported"),
                    Err(e) => tracing::warn!(error = %e, "Failed to report metrics"),
                }
            }
            _ = signal::ctrl_c() => {
                tracing::info!("Shutting down gracefully");
                break;
            }
        }
    }

    Ok(())
}
