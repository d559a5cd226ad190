//! Regulatory compliance rules: filing deadlines, required disclosures and
//! threshold breaches.
//!
//! Compliance rules see every anomaly metric plus `filing_delay_days` and
//! the `disclosed("<name>")` function.

use super::findings::{CompiledRule, RuleDefinition, RuleEvaluator, RuleOutcome, Severity};
use crate::rules::MetricSet;

/// Default compliance rules.
pub fn default_compliance_rules() -> Vec<RuleDefinition> {
    vec![
        RuleDefinition::new(
            "late_filing",
            "filing_delay_days > 60",
            Severity::High,
            "Statements filed more than 60 days after period end",
        ),
        RuleDefinition::new(
            "severely_late_filing",
            "filing_delay_days > 120",
            Severity::Critical,
            "Statements filed more than 120 days after period end",
        ),
        RuleDefinition::new(
            "missing_auditor_report",
            "NOT disclosed('auditor_report')",
            Severity::Critical,
            "Filing has no auditor report",
        ),
        RuleDefinition::new(
            "missing_related_party_disclosure",
            "NOT disclosed('related_party_transactions')",
            Severity::High,
            "Related-party transactions are not disclosed",
        ),
        RuleDefinition::new(
            "missing_segment_reporting",
            "NOT disclosed('segment_reporting')",
            Severity::Medium,
            "Segment reporting is not disclosed",
        ),
        RuleDefinition::new(
            "negative_equity",
            "total_equity < 0",
            Severity::High,
            "Total equity is negative",
        ),
        RuleDefinition::new(
            "undisclosed_going_concern",
            "z_band == 'distress' AND NOT disclosed('going_concern')",
            Severity::Critical,
            "Distressed company without a going-concern disclosure",
        ),
    ]
}

/// Disclosures expected in every filing.
pub fn default_required_disclosures() -> Vec<String> {
    [
        "auditor_report",
        "related_party_transactions",
        "segment_reporting",
        "contingent_liabilities",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Evaluates configured compliance rules.
pub struct ComplianceEvaluator<'a> {
    inner: RuleEvaluator<'a>,
}

impl<'a> ComplianceEvaluator<'a> {
    pub fn new(rules: &'a [CompiledRule], version: &'a str) -> Self {
        Self {
            inner: RuleEvaluator::new(rules, version),
        }
    }

    pub fn evaluate(&self, metrics: &MetricSet) -> RuleOutcome {
        self.inner.evaluate(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::findings::{compile_rules, RuleKind};
    use crate::rules::MetricRegistry;

    fn compiled() -> Vec<CompiledRule> {
        let registry = MetricRegistry::analysis(std::iter::empty());
        compile_rules(&default_compliance_rules(), RuleKind::Compliance, &registry).unwrap()
    }

    #[test]
    fn test_late_filing_and_missing_disclosures() {
        let rules = compiled();
        let mut metrics = MetricSet::new();
        metrics.insert_number("filing_delay_days", Some(95.0));
        metrics.insert_number("total_equity", Some(400.0));
        metrics.insert_string("z_band", Some("safe".into()));
        metrics.set_disclosures(Some(
            ["auditor_report".to_string(), "segment_reporting".to_string()]
                .into_iter()
                .collect(),
        ));

        let outcome = ComplianceEvaluator::new(&rules, "v1").evaluate(&metrics);
        let ids: Vec<_> = outcome.findings.iter().map(|f| f.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["late_filing", "missing_related_party_disclosure"]);
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn test_unknown_filing_skips_filing_rules() {
        let rules = compiled();
        let mut metrics = MetricSet::new();
        metrics.insert_number("filing_delay_days", None);
        metrics.insert_number("total_equity", Some(-5.0));
        metrics.insert_string("z_band", None);
        metrics.set_disclosures(None);

        let outcome = ComplianceEvaluator::new(&rules, "v1").evaluate(&metrics);
        assert_eq!(outcome.findings.len(), 1);
        assert_eq!(outcome.findings[0].rule_id, "negative_equity");
        assert_eq!(outcome.skipped.len(), 6);
    }
}
