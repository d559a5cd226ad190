//! Anomaly rules over computed metrics.

use super::findings::{RuleDefinition, RuleEvaluator, RuleOutcome, CompiledRule, Severity};
use crate::rules::MetricSet;

/// Default anomaly rules.
pub fn default_anomaly_rules() -> Vec<RuleDefinition> {
    vec![
        RuleDefinition::new(
            "receivables_outpacing_revenue",
            "receivables_growth > revenue_growth + 20",
            Severity::High,
            "Receivables grew more than 20 points faster than revenue",
        ),
        RuleDefinition::new(
            "inventory_buildup",
            "inventory_growth > cost_of_revenue_growth + 25",
            Severity::Medium,
            "Inventory grew much faster than cost of revenue",
        ),
        RuleDefinition::new(
            "earnings_without_cash",
            "net_income > 0 AND operating_cash_flow < 0",
            Severity::High,
            "Reported profit with negative operating cash flow",
        ),
        RuleDefinition::new(
            "low_liquidity",
            "current_ratio < 1.0",
            Severity::Medium,
            "Current liabilities exceed current assets",
        ),
        RuleDefinition::new(
            "excessive_leverage",
            "debt_to_equity > 3.0",
            Severity::High,
            "Liabilities exceed three times equity",
        ),
        RuleDefinition::new(
            "bankruptcy_distress",
            "z_band == 'distress'",
            Severity::Critical,
            "Bankruptcy score in the distress zone",
        ),
        RuleDefinition::new(
            "earnings_manipulation",
            "m_flagged",
            Severity::High,
            "Manipulation score above threshold",
        ),
        RuleDefinition::new(
            "digit_distribution",
            "benford_anomalous",
            Severity::Medium,
            "Leading digits deviate from the expected distribution",
        ),
        RuleDefinition::new(
            "balance_sheet_gap",
            "abs(balance_gap) > 1",
            Severity::High,
            "Assets do not equal liabilities plus equity",
        ),
        RuleDefinition::new(
            "revenue_spike",
            "revenue_growth > 50",
            Severity::Low,
            "Revenue grew more than 50% in one period",
        ),
    ]
}

/// Evaluates configured anomaly rules.
pub struct AnomalyEvaluator<'a> {
    inner: RuleEvaluator<'a>,
}

impl<'a> AnomalyEvaluator<'a> {
    pub fn new(rules: &'a [CompiledRule], version: &'a str) -> Self {
        Self {
            inner: RuleEvaluator::new(rules, version),
        }
    }

    pub fn evaluate(&self, metrics: &MetricSet) -> RuleOutcome {
        self.inner.evaluate(metrics)
    }
}
