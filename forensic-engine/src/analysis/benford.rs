//! First-digit (Benford's law) test.
//!
//! Leading significant digits of naturally occurring amounts follow
//! `P(d) = log10(1 + 1/d)`. Fabricated figures tend to drift toward a
//! uniform distribution, which a chi-square goodness-of-fit test detects.
//!
//! | Digit | Expected share |
//! |-------|----------------|
//! | 1 | 30.1% |
//! | 2 | 17.6% |
//! | 3 | 12.5% |
//! | ... | ... |
//! | 9 | 4.6% |

use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::statement::{canonical_field_names, StatementPair};

/// Degrees of freedom for nine digit buckets.
const DEGREES_OF_FREEDOM: f64 = 8.0;

/// Digit test settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DigitTestConfig {
    /// Line items sampled from every available period
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,

    /// Below this many non-zero values the test is not run
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Chi-square critical value (15.507 = 95% confidence, 8 dof)
    #[serde(default = "default_critical_value")]
    pub critical_value: f64,
}

impl Default for DigitTestConfig {
    fn default() -> Self {
        Self {
            fields: default_fields(),
            min_samples: default_min_samples(),
            critical_value: default_critical_value(),
        }
    }
}

fn default_fields() -> Vec<String> {
    canonical_field_names().map(String::from).collect()
}

fn default_min_samples() -> usize {
    30
}

fn default_critical_value() -> f64 {
    15.507
}

/// Observed vs expected frequency for one digit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitFrequency {
    pub digit: u8,
    pub observed_count: usize,
    pub observed_share: f64,
    pub expected_share: f64,
}

/// Completed test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitTestReport {
    pub chi_square: f64,
    pub critical_value: f64,
    pub p_value: Option<f64>,
    pub is_anomalous: bool,
    pub sample_size: usize,
    pub digit_distribution: Vec<DigitFrequency>,
}

/// Outcome of the digit test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DigitTestResult {
    Completed(DigitTestReport),
    InsufficientData { sample_size: usize, min_samples: usize },
}

impl DigitTestResult {
    pub fn report(&self) -> Option<&DigitTestReport> {
        match self {
            DigitTestResult::Completed(report) => Some(report),
            DigitTestResult::InsufficientData { .. } => None,
        }
    }

    pub fn is_anomalous(&self) -> bool {
        self.report().is_some_and(|r| r.is_anomalous)
    }
}

/// Expected share of leading digit `d` (1-9).
pub fn expected_share(d: u8) -> f64 {
    (1.0 + 1.0 / f64::from(d)).log10()
}

/// Leading significant digit of a non-zero finite value.
pub fn leading_digit(value: f64) -> Option<u8> {
    if value == 0.0 || !value.is_finite() {
        return None;
    }
    // Scientific notation always starts with the first significant digit
    let formatted = format!("{:e}", value.abs());
    formatted
        .chars()
        .next()
        .and_then(|c| c.to_digit(10))
        .filter(|d| *d >= 1)
        .map(|d| d as u8)
}

/// First-digit test over a configured field set.
pub struct DigitLawTest<'a> {
    config: &'a DigitTestConfig,
}

impl<'a> DigitLawTest<'a> {
    pub fn new(config: &'a DigitTestConfig) -> Self {
        Self { config }
    }

    /// Sample the configured fields of every statement in the pair.
    pub fn run_on_pair(&self, pair: &StatementPair) -> DigitTestResult {
        let values = pair.statements().into_iter().flat_map(|statement| {
            self.config
                .fields
                .iter()
                .filter_map(move |field| statement.get(field))
        });
        self.run(values)
    }

    /// Run the test on raw values. Depends only on the multiset of inputs.
    pub fn run(&self, values: impl IntoIterator<Item = f64>) -> DigitTestResult {
        let mut counts = [0usize; 9];
        for digit in values.into_iter().filter_map(leading_digit) {
            counts[usize::from(digit - 1)] += 1;
        }

        let sample_size: usize = counts.iter().sum();
        if sample_size < self.config.min_samples || sample_size == 0 {
            return DigitTestResult::InsufficientData {
                sample_size,
                min_samples: self.config.min_samples,
            };
        }

        let n = sample_size as f64;
        let mut chi_square = 0.0;
        let digit_distribution: Vec<DigitFrequency> = (1..=9u8)
            .map(|digit| {
                let observed = counts[usize::from(digit - 1)];
                let expected_share = expected_share(digit);
                let expected = expected_share * n;
                chi_square += (observed as f64 - expected).powi(2) / expected;
                DigitFrequency {
                    digit,
                    observed_count: observed,
                    observed_share: observed as f64 / n,
                    expected_share,
                }
            })
            .collect();

        let p_value = ChiSquared::new(DEGREES_OF_FREEDOM)
            .ok()
            .map(|dist| (1.0 - dist.cdf(chi_square)).clamp(0.0, 1.0));

        DigitTestResult::Completed(DigitTestReport {
            chi_square,
            critical_value: self.config.critical_value,
            p_value,
            is_anomalous: chi_square > self.config.critical_value,
            sample_size,
            digit_distribution,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Values whose leading digits appear with the given counts.
    fn values_with_counts(counts: [usize; 9]) -> Vec<f64> {
        counts
            .iter()
            .enumerate()
            .flat_map(|(i, &count)| (0..count).map(move |k| (i as f64 + 1.0) * 10f64.powi((k % 5) as i32) + 0.5))
            .collect()
    }

    #[test]
    fn test_leading_digit() {
        assert_eq!(leading_digit(1234.5), Some(1));
        assert_eq!(leading_digit(-987.0), Some(9));
        assert_eq!(leading_digit(0.00042), Some(4));
        assert_eq!(leading_digit(0.0), None);
        assert_eq!(leading_digit(f64::NAN), None);
    }

    #[test]
    fn test_expected_shares_sum_to_one() {
        let total: f64 = (1..=9).map(expected_share).sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!((expected_share(1) - 0.30103).abs() < 1e-5);
    }

    #[test]
    fn test_uniform_digits_are_anomalous() {
        let config = DigitTestConfig::default();
        let result = DigitLawTest::new(&config).run(values_with_counts([20; 9]));
        let report = result.report().unwrap();
        assert_eq!(report.sample_size, 180);
        assert!(report.is_anomalous, "chi-square {} should exceed critical", report.chi_square);
        assert!(report.p_value.unwrap() < 0.05);
    }

    #[test]
    fn test_benford_distribution_is_not_anomalous() {
        let config = DigitTestConfig::default();
        let counts = [301, 176, 125, 97, 79, 67, 58, 51, 46];
        let result = DigitLawTest::new(&config).run(values_with_counts(counts));
        let report = result.report().unwrap();
        assert_eq!(report.sample_size, 1000);
        assert!(!report.is_anomalous);
        assert!(report.chi_square < 1.0);
        assert!(report.p_value.unwrap() > 0.95);
    }

    #[test]
    fn test_insufficient_sample() {
        let config = DigitTestConfig::default();
        let result = DigitLawTest::new(&config).run(vec![1.0, 2.0, 0.0, 3.0]);
        assert_eq!(
            result,
            DigitTestResult::InsufficientData {
                sample_size: 3,
                min_samples: 30
            }
        );
        assert!(!result.is_anomalous());
    }

    #[test]
    fn test_distribution_reports_every_digit() {
        let config = DigitTestConfig {
            min_samples: 1,
            ..DigitTestConfig::default()
        };
        let result = DigitLawTest::new(&config).run(vec![1.0, 10.0, 200.0]);
        let report = result.report().unwrap();
        assert_eq!(report.digit_distribution.len(), 9);
        assert_eq!(report.digit_distribution[0].observed_count, 2);
        assert!((report.digit_distribution[1].observed_share - 1.0 / 3.0).abs() < 1e-12);
    }
}
