//! Per-job analysis context.
//!
//! The coordinator owns the context and hands each stage an immutable clone.
//! Stage outputs go into write-once slots, so a later stage can never
//! overwrite what an earlier one produced. Data issues are append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use super::Stage;
use crate::analysis::{
    BankruptcyResult, DigitTestResult, ManipulationScore, RatioAnalysis, RiskScore, RuleOutcome, StageOutputs,
};
use crate::provider::ExternalSignals;
use crate::statement::{FiscalPeriod, PeriodRange, StatementPair};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("Output slot '{0}' already written")]
    AlreadyWritten(&'static str),

    #[error("Required input '{0}' not available")]
    MissingInput(&'static str),
}

/// A data problem recorded against a stage. Never retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataIssue {
    pub stage: String,
    pub code: String,
    pub message: String,
}

impl DataIssue {
    pub fn new(stage: Stage, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.name().to_string(),
            code: code.into(),
            message: message.into(),
        }
    }
}

fn write_once<T>(slot: &mut Option<Arc<T>>, name: &'static str, value: T) -> Result<(), ContextError> {
    if slot.is_some() {
        return Err(ContextError::AlreadyWritten(name));
    }
    *slot = Some(Arc::new(value));
    Ok(())
}

#[derive(Debug, Clone)]
pub struct AnalysisContext {
    job_id: String,
    company_id: String,
    range: PeriodRange,
    pair: Option<Arc<StatementPair>>,
    signals: Option<Arc<ExternalSignals>>,
    ratios: Option<Arc<RatioAnalysis>>,
    digit_test: Option<Arc<DigitTestResult>>,
    bankruptcy: Option<Arc<BankruptcyResult>>,
    manipulation: Option<Arc<ManipulationScore>>,
    anomalies: Option<Arc<RuleOutcome>>,
    risk: Option<Arc<RiskScore>>,
    compliance: Option<Arc<RuleOutcome>>,
    data_issues: Vec<DataIssue>,
}

impl AnalysisContext {
    pub fn new(job_id: impl Into<String>, company_id: impl Into<String>, range: PeriodRange) -> Self {
        Self {
            job_id: job_id.into(),
            company_id: company_id.into(),
            range,
            pair: None,
            signals: None,
            ratios: None,
            digit_test: None,
            bankruptcy: None,
            manipulation: None,
            anomalies: None,
            risk: None,
            compliance: None,
            data_issues: Vec::new(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn company_id(&self) -> &str {
        &self.company_id
    }

    pub fn range(&self) -> &PeriodRange {
        &self.range
    }

    pub fn pair(&self) -> Result<&StatementPair, ContextError> {
        self.pair.as_deref().ok_or(ContextError::MissingInput("statements"))
    }

    pub fn data_issues(&self) -> &[DataIssue] {
        &self.data_issues
    }

    /// Borrowed view of every output written so far.
    pub fn outputs(&self) -> StageOutputs<'_> {
        StageOutputs {
            ratios: self.ratios.as_deref(),
            bankruptcy: self.bankruptcy.as_deref(),
            manipulation: self.manipulation.as_deref(),
            digit_test: self.digit_test.as_deref(),
            anomalies: self.anomalies.as_deref(),
            filing: self.pair.as_deref().and_then(|p| p.filing.as_ref()),
            signals: self.signals.as_deref(),
        }
    }

    pub fn record_issue(&mut self, issue: DataIssue) {
        tracing::warn!(
            job_id = %self.job_id,
            stage = %issue.stage,
            code = %issue.code,
            "Data issue: {}",
            issue.message
        );
        self.data_issues.push(issue);
    }

    pub fn set_statements(&mut self, pair: StatementPair) -> Result<(), ContextError> {
        write_once(&mut self.pair, "statements", pair)
    }

    pub fn set_signals(&mut self, signals: ExternalSignals) -> Result<(), ContextError> {
        write_once(&mut self.signals, "signals", signals)
    }

    pub fn set_ratios(&mut self, ratios: RatioAnalysis) -> Result<(), ContextError> {
        write_once(&mut self.ratios, "ratios", ratios)
    }

    pub fn set_digit_test(&mut self, result: DigitTestResult) -> Result<(), ContextError> {
        write_once(&mut self.digit_test, "digit_test", result)
    }

    pub fn set_bankruptcy(&mut self, result: BankruptcyResult) -> Result<(), ContextError> {
        write_once(&mut self.bankruptcy, "bankruptcy", result)
    }

    pub fn set_manipulation(&mut self, score: ManipulationScore) -> Result<(), ContextError> {
        write_once(&mut self.manipulation, "manipulation", score)
    }

    pub fn set_anomalies(&mut self, outcome: RuleOutcome) -> Result<(), ContextError> {
        write_once(&mut self.anomalies, "anomalies", outcome)
    }

    pub fn set_risk(&mut self, score: RiskScore) -> Result<(), ContextError> {
        write_once(&mut self.risk, "risk_score", score)
    }

    pub fn set_compliance(&mut self, outcome: RuleOutcome) -> Result<(), ContextError> {
        write_once(&mut self.compliance, "compliance", outcome)
    }

    /// Assemble the final report. Risk, anomaly and compliance outputs are required.
    pub fn into_report(self, rule_version: &str) -> Result<AnalysisReport, ContextError> {
        let pair = self.pair.ok_or(ContextError::MissingInput("statements"))?;
        let risk = self.risk.ok_or(ContextError::MissingInput("risk_score"))?;
        let anomalies = self.anomalies.ok_or(ContextError::MissingInput("anomalies"))?;
        let compliance = self.compliance.ok_or(ContextError::MissingInput("compliance"))?;

        Ok(AnalysisReport {
            job_id: self.job_id,
            company_id: self.company_id,
            rule_version: rule_version.to_string(),
            current_period: pair.current.period().clone(),
            prior_period: pair.prior.as_ref().map(|p| p.period().clone()),
            risk: Arc::unwrap_or_clone(risk),
            ratios: self.ratios.map(Arc::unwrap_or_clone),
            digit_test: self.digit_test.map(Arc::unwrap_or_clone),
            bankruptcy: self.bankruptcy.map(Arc::unwrap_or_clone),
            manipulation: self.manipulation.map(Arc::unwrap_or_clone),
            anomalies: Arc::unwrap_or_clone(anomalies),
            compliance: Arc::unwrap_or_clone(compliance),
            signals: self.signals.map(Arc::unwrap_or_clone),
            data_issues: self.data_issues,
            completed_at: Utc::now(),
        })
    }
}

/// The result of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub job_id: String,
    pub company_id: String,
    pub rule_version: String,
    pub current_period: FiscalPeriod,
    pub prior_period: Option<FiscalPeriod>,
    pub risk: RiskScore,
    pub ratios: Option<RatioAnalysis>,
    pub digit_test: Option<DigitTestResult>,
    pub bankruptcy: Option<BankruptcyResult>,
    pub manipulation: Option<ManipulationScore>,
    pub anomalies: RuleOutcome,
    pub compliance: RuleOutcome,
    pub signals: Option<ExternalSignals>,
    pub data_issues: Vec<DataIssue>,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::{pair_from, scenario_items};
    use chrono::NaiveDate;

    fn context() -> AnalysisContext {
        let range = PeriodRange::new(
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        )
        .unwrap();
        AnalysisContext::new("job-1", "ACME", range)
    }

    #[test]
    fn test_slots_are_write_once() {
        let mut ctx = context();
        ctx.set_ratios(RatioAnalysis::default()).unwrap();
        assert_eq!(
            ctx.set_ratios(RatioAnalysis::default()),
            Err(ContextError::AlreadyWritten("ratios"))
        );
    }

    #[test]
    fn test_clones_do_not_see_later_writes() {
        let mut ctx = context();
        ctx.set_statements(pair_from(&scenario_items(), None)).unwrap();
        let view = ctx.clone();
        ctx.set_anomalies(RuleOutcome::default()).unwrap();

        assert!(view.outputs().anomalies.is_none());
        assert!(ctx.outputs().anomalies.is_some());
    }

    #[test]
    fn test_report_requires_scoring_outputs() {
        let mut ctx = context();
        ctx.set_statements(pair_from(&scenario_items(), None)).unwrap();
        ctx.record_issue(DataIssue::new(Stage::Manipulation, "insufficient_comparison_data", "no prior"));
        assert_eq!(
            ctx.clone().into_report("v1").unwrap_err(),
            ContextError::MissingInput("risk_score")
        );

        ctx.set_anomalies(RuleOutcome::default()).unwrap();
        ctx.set_compliance(RuleOutcome::default()).unwrap();
        ctx.set_risk(RiskScore {
            composite: 50.0,
            classification: "HIGH".into(),
            subscores: vec![],
        })
        .unwrap();
        let report = ctx.into_report("v1").unwrap();
        assert_eq!(report.rule_version, "v1");
        assert_eq!(report.data_issues.len(), 1);
        assert!(report.prior_period.is_none());
    }
}
