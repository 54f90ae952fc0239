//! Alerting pipeline for ingested metric batches.
//!
//! Batches arrive on a bounded queue and are evaluated one at a time, in
//! the order they were enqueued, by the [`evaluator::AlertEvaluator`]. Every
//! rule is checked against every metric of the batch; each hit becomes an
//! [`AlertEvent`] that the [`sink::AlertDispatcher`] hands to the registered
//! [`sink::AlertSink`]s. Evaluation keeps no state between batches: there
//! is no windowing and no deduplication, so a value that stays above a
//! threshold alerts on every batch.

pub mod error;
pub mod evaluator;
pub mod rules;
pub mod sink;


use chrono::{DateTime, Utc};
use tallymon_common::types::AlertEvent;

/// A predicate over a single metric value.
///
/// Rules are held by the [`evaluator::AlertEvaluator`] in a fixed order and
/// evaluated independently: for a sample whose metric key equals
/// [`AlertRule::metric`] and whose resource matches
/// [`AlertRule::resource_pattern`], `evaluate` decides whether an event is
/// raised.
pub trait AlertRule: Send + Sync {
    /// Unique identifier for this rule instance (e.g., `"cpu-user-high"`).
    fn id(&self) -> &str;

    /// The metric key this rule applies to (e.g., `"cpu.user"`).
    fn metric(&self) -> &str;

    /// Resource ids this rule applies to, in the query pattern syntax of
    /// [`tallymon_common::query::Pattern`]. `*` matches any run of
    /// characters including `/`; every other character is literal.
    fn resource_pattern(&self) -> &str;

    /// Returns an alert event if `value` satisfies the rule.
    fn evaluate(
        &self,
        resource_id: &str,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Option<AlertEvent>;
}
