//! Bankruptcy-risk scoring (Altman-style linear discriminant).
//!
//! `score = Σ coefficient × factor` over configured factors. The default set
//! is the classic five-factor model:
//!
//! | Factor | Formula | Coefficient |
//! |--------|---------|-------------|
//! | working_capital_to_assets | (CA − CL) / TA | 1.2 |
//! | retained_earnings_to_assets | RE / TA | 1.4 |
//! | ebit_to_assets | EBIT / TA | 3.3 |
//! | equity_to_liabilities | Equity / TL | 0.6 |
//! | sales_to_assets | Revenue / TA | 1.0 |
//!
//! Bands: distress below 1.81, grey zone up to 2.99, safe from 2.99. A
//! score exactly on a cut point belongs to the safer band.

use serde::{Deserialize, Serialize};

use super::metrics::statement_metrics;
use crate::rules::{CompiledExpr, MetricRegistry, RuleValidationError, ValueType};
use crate::statement::StatementPair;

/// One configured factor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactorDefinition {
    pub name: String,
    pub formula: String,
    pub coefficient: f64,
}

/// Bankruptcy scorer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BankruptcyConfig {
    #[serde(default = "default_factors")]
    pub factors: Vec<FactorDefinition>,

    /// Scores below this are in distress
    #[serde(default = "default_distress_below")]
    pub distress_below: f64,

    /// Scores at or above this are safe
    #[serde(default = "default_safe_from")]
    pub safe_from: f64,
}

impl Default for BankruptcyConfig {
    fn default() -> Self {
        Self {
            factors: default_factors(),
            distress_below: default_distress_below(),
            safe_from: default_safe_from(),
        }
    }
}

fn factor(name: &str, formula: &str, coefficient: f64) -> FactorDefinition {
    FactorDefinition {
        name: name.into(),
        formula: formula.into(),
        coefficient,
    }
}

fn default_factors() -> Vec<FactorDefinition> {
    vec![
        factor(
            "working_capital_to_assets",
            "(current_assets - current_liabilities) / total_assets",
            1.2,
        ),
        factor("retained_earnings_to_assets", "retained_earnings / total_assets", 1.4),
        factor("ebit_to_assets", "ebit / total_assets", 3.3),
        factor("equity_to_liabilities", "total_equity / total_liabilities", 0.6),
        factor("sales_to_assets", "revenue / total_assets", 1.0),
    ]
}

fn default_distress_below() -> f64 {
    1.81
}

fn default_safe_from() -> f64 {
    2.99
}

impl BankruptcyConfig {
    /// Validate cut points and compile factor formulas.
    pub fn compile(&self) -> Result<CompiledBankruptcy, RuleValidationError> {
        if !(self.distress_below.is_finite() && self.safe_from.is_finite()) || self.distress_below > self.safe_from {
            return Err(RuleValidationError::InvalidValue {
                field: "bankruptcy".into(),
                reason: format!(
                    "cut points must be finite and ordered (distress_below {} <= safe_from {})",
                    self.distress_below, self.safe_from
                ),
            });
        }
        if self.factors.is_empty() {
            return Err(RuleValidationError::InvalidValue {
                field: "bankruptcy.factors".into(),
                reason: "at least one factor is required".into(),
            });
        }

        let registry = MetricRegistry::statement_fields();
        let mut seen = std::collections::HashSet::new();
        let factors = self
            .factors
            .iter()
            .map(|f| {
                if !seen.insert(f.name.as_str()) {
                    return Err(RuleValidationError::DuplicateId(f.name.clone()));
                }
                Ok(CompiledFactor {
                    name: f.name.clone(),
                    coefficient: f.coefficient,
                    formula: CompiledExpr::compile(&f.name, &f.formula, &registry, ValueType::Number)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CompiledBankruptcy {
            factors,
            distress_below: self.distress_below,
            safe_from: self.safe_from,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CompiledFactor {
    pub name: String,
    pub coefficient: f64,
    pub formula: CompiledExpr,
}

#[derive(Debug, Clone)]
pub struct CompiledBankruptcy {
    pub factors: Vec<CompiledFactor>,
    pub distress_below: f64,
    pub safe_from: f64,
}

/// Risk band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneBand {
    Distress,
    Grey,
    Safe,
}

impl ZoneBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneBand::Distress => "distress",
            ZoneBand::Grey => "grey",
            ZoneBand::Safe => "safe",
        }
    }
}

/// A factor's value and weighted contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorContribution {
    pub name: String,
    pub value: f64,
    pub coefficient: f64,
    pub contribution: f64,
}

/// Output of the bankruptcy scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BankruptcyResult {
    Scored {
        score: f64,
        band: ZoneBand,
        factors: Vec<FactorContribution>,
    },
    /// Never zero-substituted: listing what could not be computed
    Indeterminate { missing_factors: Vec<String> },
}

impl BankruptcyResult {
    pub fn score(&self) -> Option<f64> {
        match self {
            BankruptcyResult::Scored { score, .. } => Some(*score),
            BankruptcyResult::Indeterminate { .. } => None,
        }
    }

    pub fn band(&self) -> Option<ZoneBand> {
        match self {
            BankruptcyResult::Scored { band, .. } => Some(*band),
            BankruptcyResult::Indeterminate { .. } => None,
        }
    }
}

/// Scores a statement pair's current period.
pub struct BankruptcyScorer<'a> {
    config: &'a CompiledBankruptcy,
}

impl<'a> BankruptcyScorer<'a> {
    pub fn new(config: &'a CompiledBankruptcy) -> Self {
        Self { config }
    }

    /// Band for a score. Cut points belong to the safer band.
    pub fn classify(&self, score: f64) -> ZoneBand {
        if score >= self.config.safe_from {
            ZoneBand::Safe
        } else if score >= self.config.distress_below {
            ZoneBand::Grey
        } else {
            ZoneBand::Distress
        }
    }

    pub fn score(&self, pair: &StatementPair) -> BankruptcyResult {
        let metrics = statement_metrics(pair);
        let mut contributions = Vec::with_capacity(self.config.factors.len());
        let mut missing = Vec::new();

        for factor in &self.config.factors {
            match factor.formula.evaluate_number(&metrics) {
                Ok(value) => contributions.push(FactorContribution {
                    name: factor.name.clone(),
                    value,
                    coefficient: factor.coefficient,
                    contribution: factor.coefficient * value,
                }),
                Err(_) => missing.push(factor.name.clone()),
            }
        }

        if !missing.is_empty() {
            return BankruptcyResult::Indeterminate {
                missing_factors: missing,
            };
        }

        let score: f64 = contributions.iter().map(|c| c.contribution).sum();
        BankruptcyResult::Scored {
            score,
            band: self.classify(score),
            factors: contributions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::{pair_from, scenario_items};
    use test_case::test_case;

    fn compiled() -> CompiledBankruptcy {
        BankruptcyConfig::default().compile().unwrap()
    }

    #[test]
    fn test_scenario_is_safe() {
        let config = compiled();
        let pair = pair_from(&scenario_items(), None);
        let result = BankruptcyScorer::new(&config).score(&pair);

        let score = result.score().unwrap();
        assert!((score - 3.2).abs() < 1e-9, "score was {score}");
        assert_eq!(result.band(), Some(ZoneBand::Safe));
        if let BankruptcyResult::Scored { factors, .. } = result {
            assert_eq!(factors.len(), 5);
            assert!((factors[4].contribution - 1.95).abs() < 1e-9);
        }
    }

    #[test_case(1.80 => ZoneBand::Distress ; "below distress cut")]
    #[test_case(1.81 => ZoneBand::Grey ; "distress cut point is grey")]
    #[test_case(2.50 => ZoneBand::Grey ; "inside grey zone")]
    #[test_case(2.99 => ZoneBand::Safe ; "safe cut point is safe")]
    #[test_case(4.00 => ZoneBand::Safe ; "well above safe")]
    fn test_band_boundaries(score: f64) -> ZoneBand {
        let config = compiled();
        BankruptcyScorer::new(&config).classify(score)
    }

    #[test]
    fn test_missing_factor_is_indeterminate() {
        let config = compiled();
        let mut items = scenario_items();
        items.retain(|(k, _)| *k != "retained_earnings" && *k != "ebit");
        let result = BankruptcyScorer::new(&config).score(&pair_from(&items, None));
        assert_eq!(
            result,
            BankruptcyResult::Indeterminate {
                missing_factors: vec!["retained_earnings_to_assets".into(), "ebit_to_assets".into()]
            }
        );
    }

    #[test]
    fn test_unordered_cut_points_rejected() {
        let config = BankruptcyConfig {
            distress_below: 3.0,
            safe_from: 2.0,
            ..BankruptcyConfig::default()
        };
        assert!(config.compile().is_err());
    }
}
