//! Metric sets handed to formulas and rules.

use super::StageOutputs;
use crate::rules::MetricSet;
use crate::statement::{canonical_field_names, StatementPair};

/// Raw line items of both periods (`revenue`, `prior.revenue`).
///
/// Every canonical field is present; fields a statement does not report
/// are `None` so formulas see them as missing rather than unknown.
pub fn statement_metrics(pair: &StatementPair) -> MetricSet {
    let mut metrics = MetricSet::new();
    for field in canonical_field_names() {
        metrics.insert_number(field, pair.current.get(field));
        metrics.insert_number(
            format!("prior.{field}"),
            pair.prior.as_ref().and_then(|p| p.get(field)),
        );
    }
    metrics
}

/// Full metric set for anomaly and compliance rules.
pub fn analysis_metrics(pair: &StatementPair, outputs: &StageOutputs<'_>) -> MetricSet {
    let mut metrics = statement_metrics(pair);

    if let Some(ratios) = outputs.ratios {
        for (name, result) in &ratios.ratios {
            metrics.insert_number(name.clone(), result.value);
        }
    }
    for field in canonical_field_names() {
        let growth = outputs
            .ratios
            .and_then(|r| r.horizontal.get(field).copied().flatten());
        let pct = outputs.ratios.and_then(|r| r.vertical.get(field).copied());
        metrics.insert_number(format!("{field}_growth"), growth);
        metrics.insert_number(format!("{field}_pct"), pct);
    }

    let bankruptcy = outputs.bankruptcy;
    metrics.insert_number("z_score", bankruptcy.and_then(|b| b.score()));
    metrics.insert_string(
        "z_band",
        bankruptcy.and_then(|b| b.band()).map(|band| band.as_str().to_string()),
    );

    let manipulation = outputs.manipulation;
    metrics.insert_number("m_score", manipulation.map(|m| m.score));
    metrics.insert_bool("m_flagged", manipulation.map(|m| m.flagged));
    for name in super::manipulation::INDEX_NAMES {
        metrics.insert_number(*name, manipulation.and_then(|m| m.indices.get(*name).copied()));
    }

    let digits = outputs.digit_test.and_then(|d| d.report());
    metrics.insert_number("benford_chi_square", digits.map(|d| d.chi_square));
    metrics.insert_number("benford_p_value", digits.and_then(|d| d.p_value));
    metrics.insert_bool("benford_anomalous", digits.map(|d| d.is_anomalous));
    metrics.insert_number("benford_sample_size", digits.map(|d| d.sample_size as f64));

    metrics.insert_number("balance_gap", pair.current.balance_gap());
    metrics.insert_number("filing_delay_days", pair.filing_delay_days().map(|d| d as f64));
    metrics.set_disclosures(pair.filing.as_ref().map(|f| f.disclosures.clone()));

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::{pair_from, scenario_items};
    use crate::rules::{MetricRegistry, Value};

    #[test]
    fn test_statement_metrics_mark_missing_fields() {
        let pair = pair_from(&[("revenue", 10.0)], None);
        let metrics = statement_metrics(&pair);
        assert_eq!(metrics.number("revenue"), Some(10.0));
        assert_eq!(metrics.get("cash"), Some(&None));
        assert_eq!(metrics.get("prior.revenue"), Some(&None));
    }

    #[test]
    fn test_analysis_metrics_cover_registry() {
        let pair = pair_from(&scenario_items(), Some(&scenario_items()));
        let metrics = analysis_metrics(&pair, &StageOutputs::default());
        let registry = MetricRegistry::analysis(std::iter::empty());
        for name in registry.names() {
            assert!(metrics.get(name).is_some(), "metric {name} not populated");
        }
        assert_eq!(metrics.get("balance_gap"), Some(&Some(Value::Number(0.0))));
    }
}
