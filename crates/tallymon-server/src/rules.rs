use crate::config::RuleConfig;
use tallymon_alert::error::{AlertError, Result};
use tallymon_alert::rules::threshold::{CompareOp, ThresholdRule};
use tallymon_alert::AlertRule;

/// Builds the evaluator's rule set from `[[alert.rules]]`, keeping config
/// order. Any invalid entry fails the whole build so a typo cannot silently
/// disable a rule.
pub fn build_rules(configs: &[RuleConfig]) -> Result<Vec<Box<dyn AlertRule>>> {
    let mut rules: Vec<Box<dyn AlertRule>> = Vec::with_capacity(configs.len());
    for cfg in configs {
        rules.push(Box::new(build_threshold(cfg)?));
    }
    Ok(rules)
}

fn build_threshold(cfg: &RuleConfig) -> Result<ThresholdRule> {
    let invalid = |reason: String| AlertError::InvalidRule {
        id: cfg.id.clone(),
        reason,
    };

    if cfg.id.is_empty() {
        return Err(invalid("id is empty".into()));
    }
    if cfg.metric.is_empty() {
        return Err(invalid("metric is empty".into()));
    }
    if !cfg.threshold.is_finite() {
        return Err(invalid(format!("threshold {} is not finite", cfg.threshold)));
    }
    let operator: CompareOp = cfg.operator.parse().map_err(invalid)?;

    Ok(ThresholdRule {
        id: cfg.id.clone(),
        metric: cfg.metric.clone(),
        resource_pattern: cfg.resource_pattern.clone(),
        operator,
        threshold: cfg.threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, operator: &str) -> RuleConfig {
        RuleConfig {
            id: id.into(),
            metric: "cpu.user".into(),
            resource_pattern: "*".into(),
            operator: operator.into(),
            threshold: 15.0,
        }
    }

    #[test]
    fn builds_rules_in_order() {
        let rules = build_rules(&[rule("a", "gt"), rule("b", "less_than")]).unwrap();
        let ids: Vec<_> = rules.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let err = build_rules(&[rule("a", "gt"), rule("b", "between")])
            .err()
            .unwrap();
        assert!(err.to_string().contains("'b'"));
    }

    #[test]
    fn empty_metric_is_rejected() {
        let mut cfg = rule("a", "gt");
        cfg.metric.clear();
        assert!(build_rules(&[cfg]).is_err());
    }
}
