//! Analysis job lifecycle.
//!
//! ```text
//! CREATED -> INGESTING -> ANALYZING -> SCORING -> COMPLETED
//!     \           \            \           \
//!      +-----------+------------+-----------+--> FAILED | CANCELLED
//! ```
//!
//! Transitions only move forward and are written to the store before the
//! stages of the new state start. Jobs are never deleted by the pipeline.

mod manager;
mod store;

pub use manager::{JobManager, JobStatus};
pub use store::{JobFailure, JobRecord, JobStore, TransitionRecord};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Accepted, waiting for a worker
    Created,
    /// Fetching statements
    Ingesting,
    /// Ratios, digit test, scorers, anomaly rules
    Analyzing,
    /// Risk aggregation and compliance
    Scoring,
    /// Report stored
    Completed,
    /// A stage failed for good
    Failed,
    /// Stopped on request
    Cancelled,
}

impl JobState {
    /// Convert to database string
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Ingesting => "INGESTING",
            Self::Analyzing => "ANALYZING",
            Self::Scoring => "SCORING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse from database string
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(Self::Created),
            "INGESTING" => Some(Self::Ingesting),
            "ANALYZING" => Some(Self::Analyzing),
            "SCORING" => Some(Self::Scoring),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn next(&self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::Ingesting),
            Self::Ingesting => Some(Self::Analyzing),
            Self::Analyzing => Some(Self::Scoring),
            Self::Scoring => Some(Self::Completed),
            _ => None,
        }
    }

    /// Forward one step, or to FAILED/CANCELLED from any non-terminal state.
    pub fn can_transition_to(&self, to: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(to, Self::Failed | Self::Cancelled) || self.next() == Some(to)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// One state transition, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: String,
    pub from: Option<JobState>,
    pub to: JobState,
    pub at: DateTime<Utc>,
}

/// Errors returned to job API callers.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {job_id} has no result yet (state {state})")]
    NotReady { job_id: String, state: JobState },

    #[error("Job {job_id} already finished as {state}")]
    AlreadyTerminal { job_id: String, state: JobState },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Job store error: {0}")]
    Store(String),
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        Self::Store(format!("{err:#}"))
    }
}

impl From<JobError> for forensic_common::Error {
    fn from(err: JobError) -> Self {
        use forensic_common::Error;
        match err {
            JobError::NotFound(id) => Error::NotFound(format!("job {id}")),
            JobError::NotReady { .. } | JobError::AlreadyTerminal { .. } => Error::Conflict(err.to_string()),
            JobError::InvalidRequest(msg) => Error::InvalidInput(msg),
            JobError::Store(msg) => Error::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [JobState; 7] = [
        JobState::Created,
        JobState::Ingesting,
        JobState::Analyzing,
        JobState::Scoring,
        JobState::Completed,
        JobState::Failed,
        JobState::Cancelled,
    ];

    #[test]
    fn test_job_state_db_roundtrip() {
        for state in ALL {
            assert_eq!(JobState::from_db_string(state.to_db_string()), Some(state));
        }
        assert_eq!(JobState::from_db_string("running"), None);
    }

    #[test]
    fn test_transitions_are_monotonic() {
        assert!(JobState::Created.can_transition_to(JobState::Ingesting));
        assert!(JobState::Scoring.can_transition_to(JobState::Completed));
        assert!(!JobState::Created.can_transition_to(JobState::Analyzing));
        assert!(!JobState::Analyzing.can_transition_to(JobState::Ingesting));
        assert!(JobState::Created.can_transition_to(JobState::Cancelled));
        assert!(JobState::Analyzing.can_transition_to(JobState::Failed));

        for terminal in [JobState::Completed, JobState::Failed, JobState::Cancelled] {
            assert!(terminal.is_terminal());
            assert!(ALL.iter().all(|to| !terminal.can_transition_to(*to)));
        }
    }

    #[test]
    fn test_job_state_serialization() {
        assert_eq!(serde_json::to_string(&JobState::Completed).unwrap(), "\"COMPLETED\"");
        let parsed: JobState = serde_json::from_str("\"SCORING\"").unwrap();
        assert_eq!(parsed, JobState::Scoring);
    }

    #[test]
    fn test_error_status_mapping() {
        let not_ready: forensic_common::Error = JobError::NotReady {
            job_id: "j".into(),
            state: JobState::Analyzing,
        }
        .into();
        assert_eq!(not_ready.status_code(), 409);
        let missing: forensic_common::Error = JobError::NotFound("j".into()).into();
        assert_eq!(missing.status_code(), 404);
    }
}
