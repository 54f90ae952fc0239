use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tallymon_common::types::AlertEvent;
use tokio::sync::mpsc;
use tracing;

/// Destination for alert events (log, webhook, test collector, ...).
///
/// Sinks are write-only from the pipeline's point of view: a failed or slow
/// delivery is logged and never fed back into evaluation.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Delivers one event.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery failed after any internal retries.
    async fn deliver(&self, event: &AlertEvent) -> Result<()>;

    /// Short name used in logs (e.g., `"log"`, `"webhook"`).
    fn name(&self) -> &str;
}

/// Writes each event as a structured `warn` line.
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn deliver(&self, event: &AlertEvent) -> Result<()> {
        tracing::warn!(
            rule_id = %event.rule_id,
            resource_id = %event.resource_id,
            metric_key = %event.metric_key,
            value = event.value,
            threshold = event.threshold,
            timestamp = %event.timestamp.to_rfc3339(),
            "{}",
            event.message
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

const WEBHOOK_ATTEMPTS: u32 = 3;
const WEBHOOK_BASE_BACKOFF_MS: u64 = 100;
const MIN_REQUEST_TIMEOUT: Duration = Duration::from_millis(10);

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(WEBHOOK_BASE_BACKOFF_MS * 2u64.pow(attempt))
}

/// POSTs each event as JSON to a fixed URL, retrying with exponential
/// backoff.
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    /// Builds a sink whose retries all fit inside `budget`, the per-delivery
    /// timeout enforced by [`AlertDispatcher`].
    pub fn with_delivery_budget(url: &str, budget: Duration) -> Result<Self> {
        Self::new(url, Self::request_timeout_for(budget))
    }

    /// Per-request timeout that leaves room for every attempt plus the
    /// backoff sleeps between them.
    pub fn request_timeout_for(budget: Duration) -> Duration {
        let sleeps: Duration = (0..WEBHOOK_ATTEMPTS - 1).map(backoff).sum();
        (budget.saturating_sub(sleeps) / WEBHOOK_ATTEMPTS).max(MIN_REQUEST_TIMEOUT)
    }

    pub fn new(url: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    fn render_body(event: &AlertEvent) -> serde_json::Value {
        serde_json::json!({
            "rule_id": event.rule_id,
            "resource_id": event.resource_id,
            "metric_key": event.metric_key,
            "value": event.value,
            "threshold": event.threshold,
            "timestamp": event.timestamp.to_rfc3339(),
            "message": event.message,
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn deliver(&self, event: &AlertEvent) -> Result<()> {
        let body = Self::render_body(event);
        let mut last_err = None;

        for attempt in 0..WEBHOOK_ATTEMPTS {
            match self.client.post(&self.url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    let status = resp.status();
                    tracing::warn!(
                        attempt = attempt + 1,
                        status = %status,
                        "Webhook returned non-success status, retrying"
                    );
                    last_err = Some(anyhow::anyhow!("HTTP {status}"));
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %e,
                        "Webhook send failed, retrying"
                    );
                    last_err = Some(e.into());
                }
            }
            if attempt + 1 < WEBHOOK_ATTEMPTS {
                tokio::time::sleep(backoff(attempt)).await;
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("webhook delivery failed")))
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Counters reported when the dispatcher loop ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub failed: u64,
    pub timed_out: u64,
}

/// Drains the alert event queue into every registered sink.
///
/// Each delivery is bounded by `delivery_timeout`; a sink that takes longer
/// is abandoned for that event and counted in [`DispatchStats::timed_out`].
pub struct AlertDispatcher {
    sinks: Vec<Box<dyn AlertSink>>,
    delivery_timeout: Duration,
}

impl AlertDispatcher {
    pub fn new(sinks: Vec<Box<dyn AlertSink>>, delivery_timeout: Duration) -> Self {
        Self {
            sinks,
            delivery_timeout,
        }
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    pub async fn run(self, mut events: mpsc::Receiver<AlertEvent>) -> DispatchStats {
        let mut stats = DispatchStats::default();

        while let Some(event) = events.recv().await {
            for sink in &self.sinks {
                match tokio::time::timeout(self.delivery_timeout, sink.deliver(&event)).await {
                    Ok(Ok(())) => stats.delivered += 1,
                    Ok(Err(e)) => {
                        stats.failed += 1;
                        tracing::error!(
                            sink = sink.name(),
                            rule_id = %event.rule_id,
                            error = %e,
                            "Failed to deliver alert"
                        );
                    }
                    Err(_) => {
                        stats.timed_out += 1;
                        tracing::warn!(
                            sink = sink.name(),
                            rule_id = %event.rule_id,
                            timeout_ms = self.delivery_timeout.as_millis() as u64,
                            "Alert delivery timed out"
                        );
                    }
                }
            }
        }

        tracing::info!(
            delivered = stats.delivered,
            failed = stats.failed,
            timed_out = stats.timed_out,
            "Alert dispatcher stopped"
        );
        stats
    }
}
