//! Earnings-manipulation scoring (Beneish-style M-score).
//!
//! Eight period-over-period indices combined linearly:
//!
//! - **DSRI** days sales in receivables index
//! - **GMI** gross margin index
//! - **AQI** asset quality index
//! - **SGI** sales growth index
//! - **DEPI** depreciation index
//! - **SGAI** SG&A expense index
//! - **LVGI** leverage index
//! - **TATA** total accruals to total assets
//!
//! A score above the threshold (default −1.78) flags likely manipulation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::rules::RuleValidationError;
use crate::statement::{NormalizedStatement, StatementPair};

/// Index names in evaluation order.
pub const INDEX_NAMES: &[&str] = &["dsri", "gmi", "aqi", "sgi", "depi", "sgai", "lvgi", "tata"];

/// Manipulation scorer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManipulationConfig {
    #[serde(default = "default_intercept")]
    pub intercept: f64,

    /// Coefficient per index name
    #[serde(default = "default_coefficients")]
    pub coefficients: BTreeMap<String, f64>,

    /// Scores strictly above this are flagged
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Default for ManipulationConfig {
    fn default() -> Self {
        Self {
            intercept: default_intercept(),
            coefficients: default_coefficients(),
            threshold: default_threshold(),
        }
    }
}

fn default_intercept() -> f64 {
    -4.84
}

fn default_coefficients() -> BTreeMap<String, f64> {
    [
        ("dsri", 0.920),
        ("gmi", 0.528),
        ("aqi", 0.404),
        ("sgi", 0.892),
        ("depi", 0.115),
        ("sgai", -0.172),
        ("lvgi", -0.327),
        ("tata", 4.679),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn default_threshold() -> f64 {
    -1.78
}

impl ManipulationConfig {
    /// Every index needs exactly one finite coefficient.
    pub fn validate(&self) -> Result<(), RuleValidationError> {
        let invalid = |reason: String| RuleValidationError::InvalidValue {
            field: "manipulation".into(),
            reason,
        };

        if !self.intercept.is_finite() || !self.threshold.is_finite() {
            return Err(invalid("intercept and threshold must be finite".into()));
        }
        for name in INDEX_NAMES {
            match self.coefficients.get(*name) {
                Some(c) if c.is_finite() => {}
                Some(_) => return Err(invalid(format!("coefficient for {name} is not finite"))),
                None => return Err(invalid(format!("missing coefficient for {name}"))),
            }
        }
        if let Some(unknown) = self.coefficients.keys().find(|k| !INDEX_NAMES.contains(&k.as_str())) {
            return Err(invalid(format!("unknown index '{unknown}'")));
        }
        Ok(())
    }

    fn coefficient(&self, index: &str) -> f64 {
        self.coefficients.get(index).copied().unwrap_or(0.0)
    }
}

/// Data problems that prevent scoring.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ManipulationError {
    #[error("Comparison data insufficient: prior period required")]
    InsufficientComparisonData,

    #[error("Index {index} unavailable: {reason}")]
    IndexUnavailable { index: String, reason: String },
}

/// Output of the manipulation scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManipulationScore {
    pub score: f64,
    pub threshold: f64,
    pub flagged: bool,
    pub indices: BTreeMap<String, f64>,
}

struct Periods<'a> {
    current: &'a NormalizedStatement,
    prior: &'a NormalizedStatement,
}

impl Periods<'_> {
    fn field(statement: &NormalizedStatement, index: &str, field: &str) -> Result<f64, ManipulationError> {
        statement.get(field).ok_or_else(|| ManipulationError::IndexUnavailable {
            index: index.to_string(),
            reason: format!("missing {field}"),
        })
    }

    fn cur(&self, index: &str, field: &str) -> Result<f64, ManipulationError> {
        Self::field(self.current, index, field)
    }

    fn pri(&self, index: &str, field: &str) -> Result<f64, ManipulationError> {
        Self::field(self.prior, index, field)
    }
}

fn div(index: &str, numerator: f64, denominator: f64) -> Result<f64, ManipulationError> {
    if denominator == 0.0 {
        return Err(ManipulationError::IndexUnavailable {
            index: index.to_string(),
            reason: "division by zero".into(),
        });
    }
    let value = numerator / denominator;
    if !value.is_finite() {
        return Err(ManipulationError::IndexUnavailable {
            index: index.to_string(),
            reason: "non-finite result".into(),
        });
    }
    Ok(value)
}

fn compute_index(name: &str, p: &Periods<'_>) -> Result<f64, ManipulationError> {
    match name {
        "dsri" => {
            let cur = div(name, p.cur(name, "receivables")?, p.cur(name, "revenue")?)?;
            let pri = div(name, p.pri(name, "receivables")?, p.pri(name, "revenue")?)?;
            div(name, cur, pri)
        }
        "gmi" => {
            let margin = |rev: f64, cogs: f64| div(name, rev - cogs, rev);
            let cur = margin(p.cur(name, "revenue")?, p.cur(name, "cost_of_revenue")?)?;
            let pri = margin(p.pri(name, "revenue")?, p.pri(name, "cost_of_revenue")?)?;
            div(name, pri, cur)
        }
        "aqi" => {
            let soft_assets = |s: &NormalizedStatement| -> Result<f64, ManipulationError> {
                let hard = Periods::field(s, name, "current_assets")?
                    + Periods::field(s, name, "ppe_net")?
                    + Periods::field(s, name, "securities")?;
                Ok(1.0 - div(name, hard, Periods::field(s, name, "total_assets")?)?)
            };
            div(name, soft_assets(p.current)?, soft_assets(p.prior)?)
        }
        "sgi" => div(name, p.cur(name, "revenue")?, p.pri(name, "revenue")?),
        "depi" => {
            let rate = |s: &NormalizedStatement| -> Result<f64, ManipulationError> {
                let dep = Periods::field(s, name, "depreciation")?;
                div(name, dep, dep + Periods::field(s, name, "ppe_net")?)
            };
            div(name, rate(p.prior)?, rate(p.current)?)
        }
        "sgai" => {
            let cur = div(name, p.cur(name, "sga_expense")?, p.cur(name, "revenue")?)?;
            let pri = div(name, p.pri(name, "sga_expense")?, p.pri(name, "revenue")?)?;
            div(name, cur, pri)
        }
        "lvgi" => {
            let leverage = |s: &NormalizedStatement| -> Result<f64, ManipulationError> {
                let debt = Periods::field(s, name, "current_liabilities")? + Periods::field(s, name, "long_term_debt")?;
                div(name, debt, Periods::field(s, name, "total_assets")?)
            };
            div(name, leverage(p.current)?, leverage(p.prior)?)
        }
        "tata" => {
            let accruals = p.cur(name, "net_income")? - p.cur(name, "operating_cash_flow")?;
            div(name, accruals, p.cur(name, "total_assets")?)
        }
        other => Err(ManipulationError::IndexUnavailable {
            index: other.to_string(),
            reason: "unknown index".into(),
        }),
    }
}

/// Computes the manipulation score from two periods.
pub struct ManipulationScorer<'a> {
    config: &'a ManipulationConfig,
}

impl<'a> ManipulationScorer<'a> {
    pub fn new(config: &'a ManipulationConfig) -> Self {
        Self { config }
    }

    pub fn score(&self, pair: &StatementPair) -> Result<ManipulationScore, ManipulationError> {
        let prior = pair
            .prior
            .as_ref()
            .ok_or(ManipulationError::InsufficientComparisonData)?;
        let periods = Periods {
            current: &pair.current,
            prior,
        };

        let mut indices = BTreeMap::new();
        let mut score = self.config.intercept;
        for name in INDEX_NAMES {
            let value = compute_index(name, &periods)?;
            score += self.config.coefficient(name) * value;
            indices.insert(name.to_string(), value);
        }

        Ok(ManipulationScore {
            score,
            threshold: self.config.threshold,
            flagged: score > self.config.threshold,
            indices,
        })
    }
}
