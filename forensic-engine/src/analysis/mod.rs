//! Forensic analysis primitives.
//!
//! Every component here is a pure function of its inputs and the active
//! rule snapshot; orchestration lives in [`crate::pipeline`].

pub mod anomaly;
pub mod bankruptcy;
pub mod benford;
pub mod compliance;
pub mod findings;
pub mod manipulation;
pub mod metrics;
pub mod ratios;
pub mod risk;
pub mod subscores;

pub use anomaly::AnomalyEvaluator;
pub use bankruptcy::{BankruptcyResult, BankruptcyScorer, ZoneBand};
pub use benford::{DigitLawTest, DigitTestResult};
pub use compliance::ComplianceEvaluator;
pub use findings::{Finding, RuleKind, RuleOutcome, Severity};
pub use manipulation::{ManipulationError, ManipulationScore, ManipulationScorer};
pub use ratios::{RatioAnalysis, RatioEngine};
pub use risk::{RiskAggregator, RiskCategory, RiskScore};
pub use subscores::SubscoreCalculator;

use crate::provider::ExternalSignals;
use crate::statement::FilingMetadata;

/// Stage outputs available so far. Absent outputs are `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageOutputs<'a> {
    pub ratios: Option<&'a RatioAnalysis>,
    pub bankruptcy: Option<&'a BankruptcyResult>,
    pub manipulation: Option<&'a ManipulationScore>,
    pub digit_test: Option<&'a DigitTestResult>,
    pub anomalies: Option<&'a RuleOutcome>,
    pub filing: Option<&'a FilingMetadata>,
    pub signals: Option<&'a ExternalSignals>,
}
