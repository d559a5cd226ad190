//! Job pipeline: stage ordering, retries, budgets and cancellation.
//!
//! ```text
//! INGESTING   ingest
//! ANALYZING   ratios -> digit_test -> bankruptcy -> manipulation -> anomalies
//! SCORING     risk_score || compliance
//! ```
//!
//! Every stage runs through the same [`RetryPolicy`]. Transient errors and
//! hard-budget timeouts are retried with backoff; data and fatal errors are
//! not. A data error in an optional stage (manipulation) is recorded as a
//! data issue and the job carries on.

pub mod context;
pub mod coordinator;
pub mod retry;

pub use context::{AnalysisContext, AnalysisReport, ContextError, DataIssue};
pub use coordinator::StageCoordinator;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::analysis::ManipulationError;
use crate::jobs::JobState;
use crate::provider::ProviderError;
use crate::statement::StatementError;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingest,
    Ratios,
    DigitTest,
    Bankruptcy,
    Manipulation,
    Anomalies,
    RiskScore,
    Compliance,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Ingest,
        Stage::Ratios,
        Stage::DigitTest,
        Stage::Bankruptcy,
        Stage::Manipulation,
        Stage::Anomalies,
        Stage::RiskScore,
        Stage::Compliance,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Ratios => "ratios",
            Stage::DigitTest => "digit_test",
            Stage::Bankruptcy => "bankruptcy",
            Stage::Manipulation => "manipulation",
            Stage::Anomalies => "anomalies",
            Stage::RiskScore => "risk_score",
            Stage::Compliance => "compliance",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Job state the stage runs under.
    pub fn phase(&self) -> JobState {
        match self {
            Stage::Ingest => JobState::Ingesting,
            Stage::Ratios | Stage::DigitTest | Stage::Bankruptcy | Stage::Manipulation | Stage::Anomalies => {
                JobState::Analyzing
            }
            Stage::RiskScore | Stage::Compliance => JobState::Scoring,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a stage attempt failed.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageError {
    /// Rate limit, network or outage; retried
    #[error("Transient failure ({code}): {message}")]
    Transient { code: String, message: String },

    /// Hard budget exceeded; retried
    #[error("Stage exceeded hard budget of {budget_ms} ms")]
    Timeout { budget_ms: u64 },

    /// Missing or unusable data; never retried
    #[error("Data error ({code}): {message}")]
    Data { code: String, message: String },

    /// Permanent failure; never retried
    #[error("Fatal failure ({code}): {message}")]
    Fatal { code: String, message: String },
}

impl StageError {
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn data(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Data {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn fatal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }

    /// Machine-readable reason code.
    pub fn code(&self) -> &str {
        match self {
            Self::Transient { code, .. } | Self::Data { code, .. } | Self::Fatal { code, .. } => code,
            Self::Timeout { .. } => "timeout",
        }
    }
}

impl From<ProviderError> for StageError {
    fn from(err: ProviderError) -> Self {
        let code = err.code();
        match err {
            ProviderError::NotFound(_) => Self::fatal(code, err.to_string()),
            ProviderError::InvalidData(_) => Self::data(code, err.to_string()),
            _ => Self::transient(code, err.to_string()),
        }
    }
}

impl From<StatementError> for StageError {
    fn from(err: StatementError) -> Self {
        let code = match &err {
            StatementError::Empty { .. } => "no_statements",
            StatementError::CompanyMismatch { .. } => "company_mismatch",
            StatementError::DuplicatePeriod(_) => "duplicate_period",
            StatementError::NonFinite { .. } => "non_finite_value",
            StatementError::InvalidRange { .. } => "invalid_range",
        };
        Self::data(code, err.to_string())
    }
}

impl From<ManipulationError> for StageError {
    fn from(err: ManipulationError) -> Self {
        let code = match &err {
            ManipulationError::InsufficientComparisonData => "insufficient_comparison_data",
            ManipulationError::IndexUnavailable { .. } => "index_unavailable",
        };
        Self::data(code, err.to_string())
    }
}

impl From<ContextError> for StageError {
    fn from(err: ContextError) -> Self {
        Self::fatal("missing_input", err.to_string())
    }
}

/// Why a job run ended without a report.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("Cancelled before {stage}")]
    Cancelled { stage: String },

    #[error("Stage {stage} failed after {attempts} attempt(s): {error}")]
    StageFailed {
        stage: String,
        error: StageError,
        attempts: u32,
    },

    #[error("Failed to persist transition: {0}")]
    Persistence(String),
}

impl PipelineError {
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Cancelled { stage } | Self::StageFailed { stage, .. } => Some(stage),
            Self::Persistence(_) => None,
        }
    }
}

/// One attempt at a stage, as written to the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageAttempt {
    pub stage: Stage,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<StageError>,
}

impl StageAttempt {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Receives pipeline progress. The job manager persists what it is told.
#[async_trait]
pub trait PipelineObserver: Send + Sync {
    /// Called before the first stage of a phase. The transition must be
    /// durable when this returns.
    async fn transition(&self, job_id: &str, to: JobState) -> anyhow::Result<()>;

    async fn stage_started(&self, job_id: &str, stage: Stage);

    async fn attempt_finished(&self, job_id: &str, attempt: &StageAttempt);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_phases() {
        assert_eq!(Stage::Ingest.phase(), JobState::Ingesting);
        assert_eq!(Stage::Anomalies.phase(), JobState::Analyzing);
        assert_eq!(Stage::Compliance.phase(), JobState::Scoring);
        for stage in Stage::ALL {
            assert_eq!(Stage::from_name(stage.name()), Some(stage));
        }
    }

    #[test]
    fn test_provider_error_classification() {
        let transient: StageError = ProviderError::RateLimited { retry_after_secs: Some(5) }.into();
        assert!(transient.is_retryable());
        assert_eq!(transient.code(), "rate_limited");

        let fatal: StageError = ProviderError::NotFound("ACME".into()).into();
        assert!(!fatal.is_retryable());
        assert_eq!(fatal.code(), "not_found");

        let data: StageError = ProviderError::InvalidData("bad".into()).into();
        assert!(matches!(data, StageError::Data { .. }));
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = StageError::Timeout { budget_ms: 10 };
        assert!(err.is_retryable());
        assert_eq!(err.code(), "timeout");
    }

    #[test]
    fn test_stage_error_serialization() {
        let err = StageError::data("insufficient_comparison_data", "prior period required");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "data");
        assert_eq!(json["code"], "insufficient_comparison_data");
    }
}
