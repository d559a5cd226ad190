//! Composite risk aggregation.
//!
//! Six category sub-scores (0-100, higher is healthier) are combined with a
//! weight map that sums to 1.0, then classified through descending bands:
//!
//! | Band | Composite |
//! |------|-----------|
//! | LOW | ≥ 80 |
//! | MEDIUM | ≥ 60 |
//! | HIGH | ≥ 40 |
//! | CRITICAL | < 40 |
//!
//! A missing sub-score counts as 0, so missing data can only lower the
//! composite. A value outside [0, 100] is treated as missing.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::rules::RuleValidationError;

/// Weight-sum tolerance.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Sub-score category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    FinancialHealth,
    EarningsQuality,
    DisclosureQuality,
    MarketSignal,
    ForensicFlags,
    Sentiment,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 6] = [
        RiskCategory::FinancialHealth,
        RiskCategory::EarningsQuality,
        RiskCategory::DisclosureQuality,
        RiskCategory::MarketSignal,
        RiskCategory::ForensicFlags,
        RiskCategory::Sentiment,
    ];
}

/// A classification band: composites at or above `min_score` get `label`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskBand {
    pub label: String,
    pub min_score: f64,
}

/// Aggregator settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskConfig {
    #[serde(default = "default_weights")]
    pub weights: BTreeMap<RiskCategory, f64>,

    #[serde(default = "default_bands")]
    pub bands: Vec<RiskBand>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            weights: default_weights(),
            bands: default_bands(),
        }
    }
}

fn default_weights() -> BTreeMap<RiskCategory, f64> {
    BTreeMap::from([
        (RiskCategory::FinancialHealth, 0.20),
        (RiskCategory::EarningsQuality, 0.20),
        (RiskCategory::DisclosureQuality, 0.15),
        (RiskCategory::MarketSignal, 0.15),
        (RiskCategory::ForensicFlags, 0.15),
        (RiskCategory::Sentiment, 0.15),
    ])
}

fn default_bands() -> Vec<RiskBand> {
    [("LOW", 80.0), ("MEDIUM", 60.0), ("HIGH", 40.0), ("CRITICAL", 0.0)]
        .into_iter()
        .map(|(label, min_score)| RiskBand {
            label: label.into(),
            min_score,
        })
        .collect()
}

impl RiskConfig {
    /// Weights must cover every category and sum to 1; bands must tile [0, 100].
    pub fn validate(&self) -> Result<(), Vec<RuleValidationError>> {
        let mut errors = Vec::new();
        let invalid = |field: &str, reason: String| RuleValidationError::InvalidValue {
            field: field.into(),
            reason,
        };

        for category in RiskCategory::ALL {
            match self.weights.get(&category) {
                None => errors.push(invalid("risk.weights", format!("missing weight for {category:?}"))),
                Some(w) if !(0.0..=1.0).contains(w) => {
                    errors.push(invalid("risk.weights", format!("weight for {category:?} must be in [0, 1]")))
                }
                Some(_) => {}
            }
        }
        let sum: f64 = self.weights.values().sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            errors.push(invalid("risk.weights", format!("weights sum to {sum}, expected 1.0")));
        }

        if self.bands.is_empty() {
            errors.push(invalid("risk.bands", "at least one band is required".into()));
        } else {
            let mut labels = HashSet::new();
            for band in &self.bands {
                if !labels.insert(band.label.as_str()) {
                    errors.push(invalid("risk.bands", format!("duplicate band '{}'", band.label)));
                }
                if !(0.0..=100.0).contains(&band.min_score) {
                    errors.push(invalid("risk.bands", format!("band '{}' outside [0, 100]", band.label)));
                }
            }
            let mut mins: Vec<f64> = self.bands.iter().map(|b| b.min_score).collect();
            mins.sort_by(|a, b| b.total_cmp(a));
            if mins.windows(2).any(|w| w[0] == w[1]) {
                errors.push(invalid("risk.bands", "bands overlap (equal lower bounds)".into()));
            }
            if mins.last().copied() != Some(0.0) {
                errors.push(invalid("risk.bands", "lowest band must start at 0".into()));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// One category's contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubScore {
    pub category: RiskCategory,
    pub value: f64,
    pub weight: f64,
    /// True when the input was missing and 0 was used
    pub substituted: bool,
}

/// Composite, classification and sub-scores, always reported together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub composite: f64,
    pub classification: String,
    pub subscores: Vec<SubScore>,
}

/// Weighted composite of category sub-scores.
pub struct RiskAggregator<'a> {
    config: &'a RiskConfig,
}

impl<'a> RiskAggregator<'a> {
    pub fn new(config: &'a RiskConfig) -> Self {
        Self { config }
    }

    /// Aggregate sub-scores. Input order does not matter.
    pub fn aggregate(&self, inputs: impl IntoIterator<Item = (RiskCategory, Option<f64>)>) -> RiskScore {
        let provided: BTreeMap<RiskCategory, Option<f64>> = inputs.into_iter().collect();

        // Fixed category order keeps the floating-point sum order-invariant
        let subscores: Vec<SubScore> = RiskCategory::ALL
            .iter()
            .map(|category| {
                let weight = self.config.weights.get(category).copied().unwrap_or(0.0);
                let value = provided.get(category).copied().flatten();
                if let Some(v) = value.filter(|v| !(0.0..=100.0).contains(v)) {
                    tracing::warn!(category = ?category, value = v, "Sub-score outside [0, 100], counted as missing");
                }
                match value.filter(|v| (0.0..=100.0).contains(v)) {
                    Some(value) => SubScore {
                        category: *category,
                        value,
                        weight,
                        substituted: false,
                    },
                    None => SubScore {
                        category: *category,
                        value: 0.0,
                        weight,
                        substituted: true,
                    },
                }
            })
            .collect();

        let composite = subscores.iter().map(|s| s.weight * s.value).sum::<f64>().clamp(0.0, 100.0);

        RiskScore {
            composite,
            classification: self.classify(composite),
            subscores,
        }
    }

    /// Label of the highest band whose lower bound the composite reaches.
    pub fn classify(&self, composite: f64) -> String {
        let mut bands: Vec<&RiskBand> = self.config.bands.iter().collect();
        bands.sort_by(|a, b| b.min_score.total_cmp(&a.min_score));
        bands
            .iter()
            .find(|band| composite >= band.min_score)
            .or_else(|| bands.last())
            .map(|band| band.label.clone())
            .unwrap_or_default()
    }
}
