//! Category sub-scores feeding the risk aggregator.
//!
//! - financial health: bankruptcy band score blended with the share of healthy ratios
//! - earnings quality: linear in the manipulation score around its threshold
//! - disclosure quality: share of required disclosures present
//! - forensic flags: 100 minus penalties for anomaly findings, except findings
//!   whose signal already has its own category (bankruptcy, manipulation)
//! - market signal / sentiment: passed through from the signal provider
//!
//! A category whose inputs are unavailable is `None` and is later counted as 0.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::bankruptcy::ZoneBand;
use super::compliance::default_required_disclosures;
use super::findings::Severity;
use super::manipulation::ManipulationScore;
use super::ratios::RatioAnalysis;
use super::risk::RiskCategory;
use super::StageOutputs;
use crate::rules::RuleValidationError;
use crate::statement::FilingMetadata;

/// Sub-score derivation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscoreConfig {
    /// Score per bankruptcy band
    #[serde(default = "default_band_scores")]
    pub band_scores: BTreeMap<String, f64>,

    /// Weight of the band score in financial health
    #[serde(default = "default_band_weight")]
    pub band_weight: f64,

    /// Weight of the healthy-ratio share in financial health
    #[serde(default = "default_ratio_weight")]
    pub ratio_weight: f64,

    /// Points deducted from forensic flags per anomaly finding
    #[serde(default = "default_severity_penalties")]
    pub severity_penalties: BTreeMap<Severity, f64>,

    /// Anomaly rules left out of forensic flags because their signal is
    /// already scored by another category
    #[serde(default = "default_category_scored_rules")]
    pub category_scored_rules: Vec<String>,

    /// Disclosures every filing should carry
    #[serde(default = "default_required_disclosures")]
    pub required_disclosures: Vec<String>,
}

impl Default for SubscoreConfig {
    fn default() -> Self {
        Self {
            band_scores: default_band_scores(),
            band_weight: default_band_weight(),
            ratio_weight: default_ratio_weight(),
            severity_penalties: default_severity_penalties(),
            category_scored_rules: default_category_scored_rules(),
            required_disclosures: default_required_disclosures(),
        }
    }
}

fn default_band_scores() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("safe".to_string(), 100.0),
        ("grey".to_string(), 60.0),
        ("distress".to_string(), 20.0),
    ])
}

fn default_band_weight() -> f64 {
    0.6
}

fn default_ratio_weight() -> f64 {
    0.4
}

fn default_severity_penalties() -> BTreeMap<Severity, f64> {
    BTreeMap::from([
        (Severity::Low, 5.0),
        (Severity::Medium, 10.0),
        (Severity::High, 20.0),
        (Severity::Critical, 35.0),
    ])
}

fn default_category_scored_rules() -> Vec<String> {
    vec!["bankruptcy_distress".into(), "earnings_manipulation".into()]
}

impl SubscoreConfig {
    pub fn validate(&self) -> Result<(), Vec<RuleValidationError>> {
        let mut errors = Vec::new();
        let invalid = |field: &str, reason: String| RuleValidationError::InvalidValue {
            field: format!("subscores.{field}"),
            reason,
        };

        for band in [ZoneBand::Safe, ZoneBand::Grey, ZoneBand::Distress] {
            match self.band_scores.get(band.as_str()) {
                Some(v) if (0.0..=100.0).contains(v) => {}
                Some(_) => errors.push(invalid("band_scores", format!("{} must be in [0, 100]", band.as_str()))),
                None => errors.push(invalid("band_scores", format!("missing score for {}", band.as_str()))),
            }
        }
        if !(0.0..=1.0).contains(&self.band_weight) || !(0.0..=1.0).contains(&self.ratio_weight) {
            errors.push(invalid("band_weight", "blend weights must be in [0, 1]".into()));
        } else if (self.band_weight + self.ratio_weight - 1.0).abs() > super::risk::WEIGHT_TOLERANCE {
            errors.push(invalid("band_weight", "band_weight + ratio_weight must equal 1.0".into()));
        }
        if self.severity_penalties.values().any(|p| !p.is_finite() || *p < 0.0) {
            errors.push(invalid("severity_penalties", "penalties must be non-negative".into()));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Derives the six category sub-scores.
pub struct SubscoreCalculator<'a> {
    config: &'a SubscoreConfig,
}

impl<'a> SubscoreCalculator<'a> {
    pub fn new(config: &'a SubscoreConfig) -> Self {
        Self { config }
    }

    pub fn derive(&self, inputs: &StageOutputs<'_>) -> Vec<(RiskCategory, Option<f64>)> {
        vec![
            (RiskCategory::FinancialHealth, self.financial_health(inputs)),
            (RiskCategory::EarningsQuality, inputs.manipulation.map(earnings_quality)),
            (RiskCategory::DisclosureQuality, inputs.filing.map(|f| self.disclosure_quality(f))),
            (RiskCategory::MarketSignal, inputs.signals.and_then(|s| s.market_signal)),
            (RiskCategory::ForensicFlags, self.forensic_flags(inputs)),
            (RiskCategory::Sentiment, inputs.signals.and_then(|s| s.sentiment)),
        ]
    }

    fn financial_health(&self, inputs: &StageOutputs<'_>) -> Option<f64> {
        let band = inputs.bankruptcy?.band()?;
        let band_score = self.config.band_scores.get(band.as_str()).copied()?;

        match inputs.ratios.and_then(RatioAnalysis::healthy_share) {
            Some(share) => Some(self.config.band_weight * band_score + self.config.ratio_weight * share * 100.0),
            None => Some(band_score),
        }
    }

    fn disclosure_quality(&self, filing: &FilingMetadata) -> f64 {
        let required = &self.config.required_disclosures;
        if required.is_empty() {
            return 100.0;
        }
        let present = required.iter().filter(|d| filing.has_disclosure(d)).count();
        present as f64 / required.len() as f64 * 100.0
    }

    fn forensic_flags(&self, inputs: &StageOutputs<'_>) -> Option<f64> {
        let anomalies = inputs.anomalies?;
        let penalty: f64 = anomalies
            .findings
            .iter()
            .filter(|f| !self.config.category_scored_rules.contains(&f.rule_id))
            .map(|f| self.config.severity_penalties.get(&f.severity).copied().unwrap_or(0.0))
            .sum();
        Some(f64::max(100.0 - penalty, 0.0))
    }
}

/// 100 at threshold − 1, 50 at the threshold, 0 at threshold + 1.
pub fn earnings_quality(score: &ManipulationScore) -> f64 {
    (50.0 - 50.0 * (score.score - score.threshold)).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::bankruptcy::BankruptcyResult;
    use crate::analysis::findings::{Finding, RuleKind, RuleOutcome};
    use crate::provider::ExternalSignals;
    use test_case::test_case;

    fn manipulation(score: f64) -> ManipulationScore {
        ManipulationScore {
            score,
            threshold: -1.78,
            flagged: score > -1.78,
            indices: BTreeMap::new(),
        }
    }

    #[test_case(-2.78 => 100.0 ; "one below threshold")]
    #[test_case(-1.78 => 50.0 ; "at threshold")]
    #[test_case(-0.78 => 0.0 ; "one above threshold")]
    #[test_case(-5.00 => 100.0 ; "clamped high")]
    fn test_earnings_quality(score: f64) -> f64 {
        (earnings_quality(&manipulation(score)) * 1e6).round() / 1e6
    }

    #[test]
    fn test_financial_health_blend() {
        let config = SubscoreConfig::default();
        let bankruptcy = BankruptcyResult::Scored {
            score: 3.2,
            band: ZoneBand::Safe,
            factors: vec![],
        };
        let mut ratios = RatioAnalysis::default();
        for (name, healthy) in [("a", true), ("b", true), ("c", false), ("d", true)] {
            ratios.ratios.insert(
                name.into(),
                crate::analysis::ratios::RatioResult {
                    name: name.into(),
                    category: crate::analysis::ratios::RatioCategory::Liquidity,
                    value: Some(1.0),
                    healthy: Some(healthy),
                    reason: None,
                },
            );
        }
        let inputs = StageOutputs {
            ratios: Some(&ratios),
            bankruptcy: Some(&bankruptcy),
            ..Default::default()
        };

        let scores = SubscoreCalculator::new(&config).derive(&inputs);
        let health = scores[0].1.unwrap();
        // 0.6 * 100 + 0.4 * 75
        assert!((health - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_inputs_yield_none() {
        let config = SubscoreConfig::default();
        let indeterminate = BankruptcyResult::Indeterminate {
            missing_factors: vec!["ebit_to_assets".into()],
        };
        let inputs = StageOutputs {
            bankruptcy: Some(&indeterminate),
            ..Default::default()
        };
        let scores = SubscoreCalculator::new(&config).derive(&inputs);
        assert!(scores.iter().all(|(_, v)| v.is_none()));
    }

    #[test]
    fn test_disclosure_and_forensic_flags() {
        let config = SubscoreConfig::default();
        let filing = FilingMetadata {
            filed_on: None,
            disclosures: ["auditor_report".to_string(), "segment_reporting".to_string()]
                .into_iter()
                .collect(),
        };
        let anomalies = RuleOutcome {
            findings: vec![Finding {
                rule_id: "x".into(),
                kind: RuleKind::Anomaly,
                severity: Severity::High,
                description: String::new(),
                evidence: BTreeMap::new(),
                rule_version: "v".into(),
            }],
            skipped: vec![],
        };
        let signals = ExternalSignals {
            market_signal: Some(70.0),
            sentiment: None,
        };
        let inputs = StageOutputs {
            anomalies: Some(&anomalies),
            filing: Some(&filing),
            signals: Some(&signals),
            ..Default::default()
        };

        let scores: BTreeMap<_, _> = SubscoreCalculator::new(&config).derive(&inputs).into_iter().collect();
        assert_eq!(scores[&RiskCategory::DisclosureQuality], Some(50.0));
        assert_eq!(scores[&RiskCategory::ForensicFlags], Some(80.0));
        assert_eq!(scores[&RiskCategory::MarketSignal], Some(70.0));
        assert_eq!(scores[&RiskCategory::Sentiment], None);
    }

    #[test]
    fn test_forensic_flags_count_each_signal_once() {
        let rules = crate::config_store::RuleSet::default().compile().unwrap();
        let digit_config = crate::analysis::benford::DigitTestConfig::default();
        let values: Vec<f64> = (1..=9).flat_map(|d| std::iter::repeat(f64::from(d) * 100.0).take(20)).collect();
        let digits = crate::analysis::DigitLawTest::new(&digit_config).run(values);
        assert!(digits.is_anomalous());

        let mut metrics = crate::rules::MetricSet::new();
        metrics.insert_bool("benford_anomalous", Some(digits.is_anomalous()));
        metrics.insert_string("z_band", Some("distress".into()));
        metrics.insert_bool("m_flagged", Some(true));
        let anomalies = crate::analysis::AnomalyEvaluator::new(&rules.anomaly_rules, "v").evaluate(&metrics);
        let fired: Vec<_> = anomalies.findings.iter().map(|f| f.rule_id.as_str()).collect();
        for rule in ["digit_distribution", "bankruptcy_distress", "earnings_manipulation"] {
            assert!(fired.contains(&rule), "{rule} did not fire: {fired:?}");
        }

        let config = SubscoreConfig::default();
        let inputs = StageOutputs {
            digit_test: Some(&digits),
            anomalies: Some(&anomalies),
            ..Default::default()
        };
        let scores: BTreeMap<_, _> = SubscoreCalculator::new(&config).derive(&inputs).into_iter().collect();
        // Only the Medium digit finding counts; distress and manipulation have their own categories
        assert_eq!(scores[&RiskCategory::ForensicFlags], Some(90.0));
    }

    #[test]
    fn test_config_validation() {
        assert!(SubscoreConfig::default().validate().is_ok());
        let config = SubscoreConfig {
            band_weight: 0.7,
            ..SubscoreConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
