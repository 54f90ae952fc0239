use crate::AlertRule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tallymon_common::types::AlertEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CompareOp {
    GreaterThan,
    LessThan,
    GreaterEqual,
    LessEqual,
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "greater_than" | "gt" => Ok(Self::GreaterThan),
            "less_than" | "lt" => Ok(Self::LessThan),
            "greater_equal" | "gte" => Ok(Self::GreaterEqual),
            "less_equal" | "lte" => Ok(Self::LessEqual),
            _ => Err(format!("unknown compare operator: {s}")),
        }
    }
}

impl TryFrom<String> for CompareOp {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<CompareOp> for String {
    fn from(op: CompareOp) -> Self {
        op.to_string()
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GreaterThan => write!(f, "gt"),
            Self::LessThan => write!(f, "lt"),
            Self::GreaterEqual => write!(f, "gte"),
            Self::LessEqual => write!(f, "lte"),
        }
    }
}

impl CompareOp {
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
            Self::GreaterEqual => value >= threshold,
            Self::LessEqual => value <= threshold,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::GreaterThan => "above",
            Self::LessThan => "below",
            Self::GreaterEqual => "at or above",
            Self::LessEqual => "at or below",
        }
    }
}

/// Fires whenever a single value compares true against a fixed threshold.
pub struct ThresholdRule {
    pub id: String,
    pub metric: String,
    pub resource_pattern: String,
    pub operator: CompareOp,
    pub threshold: f64,
}

impl ThresholdRule {
    /// The stock rule: `cpu.user > 15` on every resource.
    pub fn cpu_user_high() -> Self {
        Self {
            id: "cpu-user-high".into(),
            metric: "cpu.user".into(),
            resource_pattern: "*".into(),
            operator: CompareOp::GreaterThan,
            threshold: 15.0,
        }
    }
}

impl AlertRule for ThresholdRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn metric(&self) -> &str {
        &self.metric
    }

    fn resource_pattern(&self) -> &str {
        &self.resource_pattern
    }

    fn evaluate(
        &self,
        resource_id: &str,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Option<AlertEvent> {
        if !self.operator.check(value, self.threshold) {
            return None;
        }

        Some(AlertEvent {
            rule_id: self.id.clone(),
            resource_id: resource_id.to_string(),
            metric_key: self.metric.clone(),
            value,
            threshold: self.threshold,
            timestamp,
            message: format!(
                "{} is {} {} on {} (value {})",
                self.metric,
                self.operator.describe(),
                self.threshold,
                resource_id,
                value,
            ),
        })
    }
}
