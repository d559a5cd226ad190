//! Ratio engine.
//!
//! Computes configured financial ratios, vertical analysis (common-size
//! statements) and horizontal analysis (period-over-period change) from a
//! statement pair. A ratio that cannot be computed is reported with a null
//! value and a reason code; the engine itself never fails.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::metrics::statement_metrics;
use crate::rules::{CompiledExpr, EvalError, MetricRegistry, RuleValidationError, ValueType};
use crate::statement::{section_of, Section, StatementPair};

/// Ratio family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatioCategory {
    Liquidity,
    Profitability,
    Leverage,
    Efficiency,
}

/// A configured ratio.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatioDefinition {
    pub name: String,
    pub category: RatioCategory,
    /// Expression over statement fields, e.g. `current_assets / current_liabilities`
    pub formula: String,
    #[serde(default)]
    pub healthy_min: Option<f64>,
    #[serde(default)]
    pub healthy_max: Option<f64>,
}

impl RatioDefinition {
    fn new(name: &str, category: RatioCategory, formula: &str, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            name: name.into(),
            category,
            formula: formula.into(),
            healthy_min: min,
            healthy_max: max,
        }
    }

    /// Parse and type-check the formula.
    pub fn compile(&self) -> Result<CompiledRatio, RuleValidationError> {
        if let (Some(min), Some(max)) = (self.healthy_min, self.healthy_max) {
            if min > max {
                return Err(RuleValidationError::InvalidValue {
                    field: format!("ratios.{}", self.name),
                    reason: format!("healthy_min {} exceeds healthy_max {}", min, max),
                });
            }
        }

        let formula = CompiledExpr::compile(
            &self.name,
            &self.formula,
            &MetricRegistry::statement_fields(),
            ValueType::Number,
        )?;

        Ok(CompiledRatio {
            definition: self.clone(),
            formula,
        })
    }

    /// Whether a value sits inside the healthy range.
    pub fn is_healthy(&self, value: f64) -> bool {
        self.healthy_min.map_or(true, |min| value >= min) && self.healthy_max.map_or(true, |max| value <= max)
    }
}

/// Default ratio set.
pub fn default_ratios() -> Vec<RatioDefinition> {
    use RatioCategory::*;
    vec![
        RatioDefinition::new("current_ratio", Liquidity, "current_assets / current_liabilities", Some(1.0), None),
        RatioDefinition::new(
            "quick_ratio",
            Liquidity,
            "(current_assets - inventory) / current_liabilities",
            Some(0.8),
            None,
        ),
        RatioDefinition::new("cash_ratio", Liquidity, "cash / current_liabilities", Some(0.2), None),
        RatioDefinition::new(
            "gross_margin",
            Profitability,
            "(revenue - cost_of_revenue) / revenue",
            Some(0.2),
            None,
        ),
        RatioDefinition::new("net_margin", Profitability, "net_income / revenue", Some(0.0), None),
        RatioDefinition::new("return_on_assets", Profitability, "net_income / total_assets", Some(0.02), None),
        RatioDefinition::new("return_on_equity", Profitability, "net_income / total_equity", Some(0.05), None),
        RatioDefinition::new(
            "cash_conversion",
            Profitability,
            "operating_cash_flow / net_income",
            Some(0.8),
            None,
        ),
        RatioDefinition::new("debt_to_equity", Leverage, "total_liabilities / total_equity", None, Some(2.0)),
        RatioDefinition::new("debt_ratio", Leverage, "total_liabilities / total_assets", None, Some(0.7)),
        RatioDefinition::new("interest_coverage", Leverage, "ebit / interest_expense", Some(1.5), None),
        RatioDefinition::new("asset_turnover", Efficiency, "revenue / total_assets", Some(0.5), None),
        RatioDefinition::new("receivables_turnover", Efficiency, "revenue / receivables", Some(4.0), None),
        RatioDefinition::new("inventory_turnover", Efficiency, "cost_of_revenue / inventory", Some(3.0), None),
    ]
}

/// A ratio with its parsed formula.
#[derive(Debug, Clone)]
pub struct CompiledRatio {
    pub definition: RatioDefinition,
    pub formula: CompiledExpr,
}

/// Why a ratio has no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatioReason {
    MissingField,
    DivisionByZero,
    NonFinite,
}

impl From<&EvalError> for RatioReason {
    fn from(err: &EvalError) -> Self {
        match err {
            EvalError::MissingMetric(_) | EvalError::UnknownMetric(_) => RatioReason::MissingField,
            EvalError::DivisionByZero => RatioReason::DivisionByZero,
            // Formulas are type-checked at load, so anything else is a bad number
            EvalError::NonFinite | EvalError::TypeError(_) | EvalError::UnknownFunction(_) => {
                RatioReason::NonFinite
            }
        }
    }
}

/// One computed ratio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioResult {
    pub name: String,
    pub category: RatioCategory,
    pub value: Option<f64>,
    /// `None` when the value is null
    pub healthy: Option<bool>,
    pub reason: Option<RatioReason>,
}

/// Output of the ratio stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatioAnalysis {
    pub ratios: BTreeMap<String, RatioResult>,
    /// Current line items as % of total assets (balance sheet) or revenue (income statement)
    pub vertical: BTreeMap<String, f64>,
    /// % change from prior to current; `None` when the prior value is zero
    pub horizontal: BTreeMap<String, Option<f64>>,
}

impl RatioAnalysis {
    pub fn value(&self, name: &str) -> Option<f64> {
        self.ratios.get(name).and_then(|r| r.value)
    }

    /// Share of computed ratios inside their healthy range, `None` if none computed.
    pub fn healthy_share(&self) -> Option<f64> {
        let flags: Vec<bool> = self.ratios.values().filter_map(|r| r.healthy).collect();
        if flags.is_empty() {
            return None;
        }
        let healthy = flags.iter().filter(|h| **h).count();
        Some(healthy as f64 / flags.len() as f64)
    }
}

/// Computes ratios and common-size analysis for a statement pair.
pub struct RatioEngine<'a> {
    ratios: &'a [CompiledRatio],
}

impl<'a> RatioEngine<'a> {
    pub fn new(ratios: &'a [CompiledRatio]) -> Self {
        Self { ratios }
    }

    pub fn analyze(&self, pair: &StatementPair) -> RatioAnalysis {
        RatioAnalysis {
            ratios: self.compute_ratios(pair),
            vertical: vertical_analysis(pair),
            horizontal: horizontal_analysis(pair),
        }
    }

    fn compute_ratios(&self, pair: &StatementPair) -> BTreeMap<String, RatioResult> {
        let metrics = statement_metrics(pair);

        self.ratios
            .iter()
            .map(|ratio| {
                let def = &ratio.definition;
                let result = match ratio.formula.evaluate_number(&metrics) {
                    Ok(value) => RatioResult {
                        name: def.name.clone(),
                        category: def.category,
                        value: Some(value),
                        healthy: Some(def.is_healthy(value)),
                        reason: None,
                    },
                    Err(err) => RatioResult {
                        name: def.name.clone(),
                        category: def.category,
                        value: None,
                        healthy: None,
                        reason: Some(RatioReason::from(&err)),
                    },
                };
                (def.name.clone(), result)
            })
            .collect()
    }
}

/// Each current line item as a percentage of its section base.
pub fn vertical_analysis(pair: &StatementPair) -> BTreeMap<String, f64> {
    let current = &pair.current;
    let base = |section: Section| match section {
        Section::BalanceSheet => current.get("total_assets"),
        Section::IncomeStatement => current.get("revenue"),
        Section::CashFlow => None,
    };

    current
        .line_items()
        .iter()
        .filter_map(|(field, value)| {
            let denominator = base(section_of(field)?)?;
            if denominator == 0.0 {
                return None;
            }
            let pct = value / denominator * 100.0;
            pct.is_finite().then(|| (field.clone(), pct))
        })
        .collect()
}

/// Percentage change of every line item present in both periods.
pub fn horizontal_analysis(pair: &StatementPair) -> BTreeMap<String, Option<f64>> {
    let Some(prior) = &pair.prior else {
        return BTreeMap::new();
    };

    pair.current
        .line_items()
        .iter()
        .filter_map(|(field, current)| {
            let previous = prior.get(field)?;
            let change = if previous == 0.0 {
                None
            } else {
                Some((current - previous) / previous.abs() * 100.0)
            };
            Some((field.clone(), change))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::{pair_from, scenario_items};

    fn compiled_defaults() -> Vec<CompiledRatio> {
        default_ratios().iter().map(|r| r.compile().unwrap()).collect()
    }

    #[test]
    fn test_scenario_ratios() {
        let ratios = compiled_defaults();
        let pair = pair_from(&scenario_items(), Some(&scenario_items()));
        let analysis = RatioEngine::new(&ratios).analyze(&pair);

        assert!((analysis.value("current_ratio").unwrap() - 2.0).abs() < 1e-9);
        assert!((analysis.value("quick_ratio").unwrap() - 1.0).abs() < 1e-9);
        assert!((analysis.value("debt_to_equity").unwrap() - 1.5).abs() < 1e-9);
        assert_eq!(analysis.ratios["current_ratio"].healthy, Some(true));
    }

    #[test]
    fn test_missing_field_never_fails() {
        let ratios = compiled_defaults();
        let pair = pair_from(&[("revenue", 100.0), ("total_assets", 50.0)], None);
        let analysis = RatioEngine::new(&ratios).analyze(&pair);

        let current = &analysis.ratios["current_ratio"];
        assert_eq!(current.value, None);
        assert_eq!(current.reason, Some(RatioReason::MissingField));
        assert!((analysis.value("asset_turnover").unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(analysis.ratios.len(), ratios.len());
    }

    #[test]
    fn test_division_by_zero_reason() {
        let ratios = compiled_defaults();
        let pair = pair_from(&[("current_assets", 100.0), ("current_liabilities", 0.0)], None);
        let analysis = RatioEngine::new(&ratios).analyze(&pair);
        assert_eq!(
            analysis.ratios["current_ratio"].reason,
            Some(RatioReason::DivisionByZero)
        );
    }

    #[test]
    fn test_vertical_analysis() {
        let pair = pair_from(
            &[("total_assets", 1000.0), ("cash", 100.0), ("revenue", 500.0), ("net_income", 50.0)],
            None,
        );
        let vertical = vertical_analysis(&pair);
        assert!((vertical["cash"] - 10.0).abs() < 1e-9);
        assert!((vertical["net_income"] - 10.0).abs() < 1e-9);
        assert!((vertical["total_assets"] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_horizontal_analysis() {
        let pair = pair_from(
            &[("revenue", 120.0), ("cash", 5.0), ("inventory", 10.0)],
            Some(&[("revenue", 100.0), ("cash", 0.0)]),
        );
        let horizontal = horizontal_analysis(&pair);
        assert!((horizontal["revenue"].unwrap() - 20.0).abs() < 1e-9);
        assert_eq!(horizontal["cash"], None);
        assert!(!horizontal.contains_key("inventory"));
    }

    #[test]
    fn test_healthy_range_validation() {
        let mut def = default_ratios().remove(0);
        def.healthy_min = Some(3.0);
        def.healthy_max = Some(1.0);
        assert!(matches!(def.compile(), Err(RuleValidationError::InvalidValue { .. })));
    }

    #[test]
    fn test_formula_cannot_reference_derived_metrics() {
        let def = RatioDefinition::new("bad", RatioCategory::Leverage, "z_score * 2", None, None);
        assert!(matches!(def.compile(), Err(RuleValidationError::UnknownMetric { .. })));
    }
}
