use crate::error::{AlertError, Result};
use crate::AlertRule;
use tallymon_common::query::Pattern;
use tallymon_common::types::{AlertEvent, MetricBatch};
use tokio::sync::mpsc;
use tracing;

/// Counters reported when the evaluator loop ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EvaluatorStats {
    pub batches: u64,
    pub skipped: u64,
    pub events: u64,
}

/// Holds the rule set (immutable after construction) and evaluates batches
/// against it.
pub struct AlertEvaluator {
    rules: Vec<Box<dyn AlertRule>>,
    /// `resource_pattern` of each rule, same index as `rules`.
    resources: Vec<Pattern>,
}

impl AlertEvaluator {
    pub fn new(rules: Vec<Box<dyn AlertRule>>) -> Self {
        let resources = rules
            .iter()
            .map(|rule| Pattern::parse(rule.resource_pattern()))
            .collect();
        Self { rules, resources }
    }

    pub fn rules(&self) -> &[Box<dyn AlertRule>] {
        &self.rules
    }

    /// Evaluates every metric of `batch` against every applicable rule.
    ///
    /// Events come out in metric-key order, and for one metric in rule
    /// order. A batch with an empty resource id or a non-finite value is
    /// rejected as a whole.
    pub fn evaluate(&self, batch: &MetricBatch) -> Result<Vec<AlertEvent>> {
        if batch.resource_id.is_empty() {
            return Err(AlertError::MalformedBatch("resource_id is empty".into()));
        }
        if let Some((key, value)) = batch.metrics.iter().find(|(_, v)| !v.is_finite()) {
            return Err(AlertError::MalformedBatch(format!(
                "metric {key} has non-finite value {value}"
            )));
        }

        let mut events = Vec::new();
        for (metric_key, value) in &batch.metrics {
            for (rule, resource) in self.rules.iter().zip(&self.resources) {
                if rule.metric() != metric_key {
                    continue;
                }
                if !resource.matches(&batch.resource_id) {
                    continue;
                }
                if let Some(event) = rule.evaluate(&batch.resource_id, *value, batch.timestamp) {
                    events.push(event);
                }
            }
        }
        Ok(events)
    }

    /// Consumes batches until every sender is dropped, forwarding events to
    /// `events`. Batches are handled strictly one after another in arrival
    /// order. A full `events` queue suspends the loop until the dispatcher
    /// catches up.
    pub async fn run(
        self,
        mut batches: mpsc::Receiver<MetricBatch>,
        events: mpsc::Sender<AlertEvent>,
    ) -> EvaluatorStats {
        let mut stats = EvaluatorStats::default();
        tracing::info!(rules = self.rules.len(), "Alert evaluator started");

        while let Some(batch) = batches.recv().await {
            stats.batches += 1;
            let fired = match self.evaluate(&batch) {
                Ok(fired) => fired,
                Err(e) => {
                    stats.skipped += 1;
                    tracing::warn!(
                        resource_id = %batch.resource_id,
                        error = %e,
                        "Skipping batch in alert evaluation"
                    );
                    continue;
                }
            };

            for event in fired {
                stats.events += 1;
                if events.send(event).await.is_err() {
                    tracing::error!("Alert dispatcher is gone, dropping alert event");
                }
            }
        }

        tracing::info!(
            batches = stats.batches,
            skipped = stats.skipped,
            events = stats.events,
            "Alert evaluator stopped"
        );
        stats
    }
}
