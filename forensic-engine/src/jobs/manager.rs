//! Job manager: the only writer of job state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{JobError, JobEvent, JobFailure, JobRecord, JobState, JobStore, TransitionRecord};
use crate::config_store::{ConfigStore, RuleSnapshot};
use crate::pipeline::{
    AnalysisContext, AnalysisReport, PipelineError, PipelineObserver, Stage, StageAttempt, StageCoordinator,
};
use crate::statement::PeriodRange;
use async_trait::async_trait;
use forensic_common::PipelineConfig;

/// Job status (API response)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub company_id: String,
    pub range: PeriodRange,
    pub state: JobState,
    pub current_stage: Option<String>,
    pub rule_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub failure: Option<JobFailure>,
    /// Attempts made per stage
    pub attempts: BTreeMap<String, u32>,
}

impl JobStatus {
    fn from_record(record: JobRecord, attempts: BTreeMap<String, u32>) -> Self {
        Self {
            job_id: record.id,
            company_id: record.company_id,
            range: record.range,
            state: record.state,
            current_stage: record.current_stage,
            rule_version: record.rule_version,
            created_at: record.created_at,
            updated_at: record.updated_at,
            failure: record.failure,
            attempts,
        }
    }
}

/// Creates jobs, runs them on bounded workers and records every transition.
pub struct JobManager {
    store: Arc<JobStore>,
    rules: Arc<ConfigStore>,
    coordinator: StageCoordinator,
    /// Cancellation handles of jobs not yet finished
    active: RwLock<HashMap<String, CancellationToken>>,
    permits: Arc<Semaphore>,
    events: broadcast::Sender<JobEvent>,
}

impl JobManager {
    pub fn new(
        store: Arc<JobStore>,
        rules: Arc<ConfigStore>,
        coordinator: StageCoordinator,
        config: &PipelineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            store,
            rules,
            coordinator,
            active: RwLock::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            events,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn rules(&self) -> &Arc<ConfigStore> {
        &self.rules
    }

    /// One event per state transition, for every job.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Create a job and start it. Duplicate submissions create independent jobs.
    pub async fn submit(self: &Arc<Self>, company_id: &str, range: PeriodRange) -> Result<String, JobError> {
        validate_company_id(company_id)?;
        range.validate().map_err(|e| JobError::InvalidRequest(e.to_string()))?;

        let snapshot = self.rules.snapshot().await;
        let rule_snapshot = snapshot
            .to_json()
            .map_err(|e| JobError::Store(format!("Failed to serialize rule set: {e}")))?;

        let now = Utc::now();
        let job_id = uuid::Uuid::new_v4().to_string();
        let record = JobRecord {
            id: job_id.clone(),
            company_id: company_id.to_string(),
            range,
            state: JobState::Created,
            current_stage: None,
            rule_version: snapshot.version().to_string(),
            rule_snapshot,
            created_at: now,
            updated_at: now,
            failure: None,
        };
        // Registered before the record is visible: a cancel always finds a token
        let cancel = CancellationToken::new();
        self.active.write().await.insert(job_id.clone(), cancel.clone());
        if let Err(e) = self.store.create_job(&record) {
            self.active.write().await.remove(&job_id);
            return Err(e.into());
        }
        self.emit(&job_id, None, JobState::Created);

        info!(
            job_id = %job_id,
            company_id,
            rule_version = %snapshot.version(),
            "Job submitted"
        );

        tokio::spawn(Arc::clone(self).execute(job_id.clone(), company_id.to_string(), range, snapshot, cancel));
        Ok(job_id)
    }

    pub async fn status(&self, job_id: &str) -> Result<JobStatus, JobError> {
        let record = self.load(job_id)?;
        let attempts = self.store.attempt_counts(job_id)?;
        Ok(JobStatus::from_record(record, attempts))
    }

    /// The report, only once the job is COMPLETED.
    pub async fn result(&self, job_id: &str) -> Result<AnalysisReport, JobError> {
        let record = self.load(job_id)?;
        if record.state != JobState::Completed {
            return Err(JobError::NotReady {
                job_id: job_id.to_string(),
                state: record.state,
            });
        }
        let json = self
            .store
            .get_result(job_id)?
            .ok_or_else(|| JobError::Store(format!("Job {job_id} completed without a stored result")))?;
        serde_json::from_str(&json).map_err(|e| JobError::Store(format!("Corrupt result for job {job_id}: {e}")))
    }

    /// Request cancellation. Takes effect at the next stage boundary.
    pub async fn cancel(&self, job_id: &str) -> Result<JobState, JobError> {
        // Final states are recorded under the write lock
        let active = self.active.read().await;
        let record = self.load(job_id)?;
        if record.state.is_terminal() {
            return Err(JobError::AlreadyTerminal {
                job_id: job_id.to_string(),
                state: record.state,
            });
        }

        match active.get(job_id) {
            Some(token) => {
                info!(job_id, state = %record.state, "Cancellation requested");
                token.cancel();
            }
            None => {
                // No worker owns the job; close it directly
                self.record_transition(job_id, JobState::Cancelled, Some(&cancelled_failure(record.current_stage)), None)?;
            }
        }
        Ok(record.state)
    }

    pub async fn transitions(&self, job_id: &str) -> Result<Vec<TransitionRecord>, JobError> {
        self.load(job_id)?;
        Ok(self.store.transitions(job_id)?)
    }

    pub async fn attempts(&self, job_id: &str) -> Result<Vec<StageAttempt>, JobError> {
        self.load(job_id)?;
        Ok(self.store.attempts(job_id)?)
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<JobStatus>, JobError> {
        self.store
            .list_jobs(limit)?
            .into_iter()
            .map(|record| -> Result<JobStatus, JobError> {
                let attempts = self.store.attempt_counts(&record.id)?;
                Ok(JobStatus::from_record(record, attempts))
            })
            .collect()
    }

    /// Fail jobs a previous process left unfinished.
    pub fn recover_interrupted(&self) -> Result<usize, JobError> {
        let unfinished = self.store.unfinished_jobs()?;
        for job in &unfinished {
            let failure = JobFailure {
                stage: job.current_stage.clone().unwrap_or_else(|| Stage::Ingest.name().into()),
                code: "interrupted".into(),
                message: "service stopped before the job finished".into(),
                attempts: 0,
            };
            self.record_transition(&job.id, JobState::Failed, Some(&failure), None)?;
        }
        if !unfinished.is_empty() {
            warn!(count = unfinished.len(), "Marked interrupted jobs as failed");
        }
        Ok(unfinished.len())
    }

    fn load(&self, job_id: &str) -> Result<JobRecord, JobError> {
        self.store
            .get_job(job_id)?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    fn emit(&self, job_id: &str, from: Option<JobState>, to: JobState) {
        // No subscribers is fine
        let _ = self.events.send(JobEvent {
            job_id: job_id.to_string(),
            from,
            to,
            at: Utc::now(),
        });
    }

    fn record_transition(
        &self,
        job_id: &str,
        to: JobState,
        failure: Option<&JobFailure>,
        result: Option<&str>,
    ) -> anyhow::Result<()> {
        let from = self.store.transition(job_id, to, failure, result)?;
        self.emit(job_id, Some(from), to);
        Ok(())
    }

    async fn execute(
        self: Arc<Self>,
        job_id: String,
        company_id: String,
        range: PeriodRange,
        snapshot: Arc<RuleSnapshot>,
        cancel: CancellationToken,
    ) {
        let outcome = self.run_job(&job_id, &company_id, range, snapshot, &cancel).await;
        let mut active = self.active.write().await;
        self.finish(&job_id, outcome);
        active.remove(&job_id);
    }

    async fn run_job(
        &self,
        job_id: &str,
        company_id: &str,
        range: PeriodRange,
        snapshot: Arc<RuleSnapshot>,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport, PipelineError> {
        let _permit = tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| PipelineError::Persistence("worker pool closed".into()))?
            }
            _ = cancel.cancelled() => {
                return Err(PipelineError::Cancelled { stage: Stage::Ingest.name().into() });
            }
        };

        let ctx = AnalysisContext::new(job_id, company_id, range);
        self.coordinator.run(ctx, snapshot, cancel, self).await
    }

    fn finish(&self, job_id: &str, outcome: Result<AnalysisReport, PipelineError>) {
        let recorded = match outcome {
            Ok(report) => match serde_json::to_string(&report) {
                Ok(json) => {
                    info!(
                        job_id,
                        composite = report.risk.composite,
                        classification = %report.risk.classification,
                        findings = report.anomalies.findings.len() + report.compliance.findings.len(),
                        "Job completed"
                    );
                    self.record_transition(job_id, JobState::Completed, None, Some(&json))
                }
                Err(e) => {
                    let failure = JobFailure {
                        stage: "report".into(),
                        code: "serialization".into(),
                        message: e.to_string(),
                        attempts: 1,
                    };
                    self.record_transition(job_id, JobState::Failed, Some(&failure), None)
                }
            },
            Err(PipelineError::Cancelled { stage }) => {
                info!(job_id, stage = %stage, "Job cancelled");
                self.record_transition(job_id, JobState::Cancelled, Some(&cancelled_failure(Some(stage))), None)
            }
            Err(PipelineError::StageFailed { stage, error, attempts }) => {
                error!(job_id, stage = %stage, attempts, code = error.code(), "Job failed");
                let failure = JobFailure {
                    stage,
                    code: error.code().to_string(),
                    message: error.to_string(),
                    attempts,
                };
                self.record_transition(job_id, JobState::Failed, Some(&failure), None)
            }
            Err(PipelineError::Persistence(message)) => {
                error!(job_id, error = %message, "Job aborted");
                let failure = JobFailure {
                    stage: "pipeline".into(),
                    code: "persistence".into(),
                    message,
                    attempts: 0,
                };
                self.record_transition(job_id, JobState::Failed, Some(&failure), None)
            }
        };

        if let Err(e) = recorded {
            error!(job_id, error = %e, "Failed to record final job state");
        }
    }
}

fn cancelled_failure(stage: Option<String>) -> JobFailure {
    JobFailure {
        stage: stage.unwrap_or_else(|| Stage::Ingest.name().into()),
        code: "cancelled".into(),
        message: "cancelled on request".into(),
        attempts: 0,
    }
}

fn validate_company_id(company_id: &str) -> Result<(), JobError> {
    if company_id.trim().is_empty() {
        return Err(JobError::InvalidRequest("company_id must not be empty".into()));
    }
    if !company_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(JobError::InvalidRequest(format!("invalid company_id '{company_id}'")));
    }
    Ok(())
}

#[async_trait]
impl PipelineObserver for JobManager {
    async fn transition(&self, job_id: &str, to: JobState) -> anyhow::Result<()> {
        self.record_transition(job_id, to, None, None)
    }

    async fn stage_started(&self, job_id: &str, stage: Stage) {
        if let Err(e) = self.store.set_current_stage(job_id, stage.name()) {
            warn!(job_id, stage = stage.name(), error = %e, "Failed to record current stage");
        }
    }

    async fn attempt_finished(&self, job_id: &str, attempt: &StageAttempt) {
        if let Err(e) = self.store.record_attempt(job_id, attempt) {
            warn!(job_id, stage = attempt.stage.name(), error = %e, "Failed to record stage attempt");
        }
    }
}
