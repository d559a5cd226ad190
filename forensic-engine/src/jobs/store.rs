//! SQLite persistence for jobs, transitions and stage attempts.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use super::JobState;
use crate::pipeline::{Stage, StageAttempt};
use crate::statement::PeriodRange;

/// Why a job ended in FAILED or CANCELLED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub stage: String,
    pub code: String,
    pub message: String,
    pub attempts: u32,
}

/// Stored job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub company_id: String,
    pub range: PeriodRange,
    pub state: JobState,
    /// Stage most recently started
    pub current_stage: Option<String>,
    pub rule_version: String,
    /// Rule set as JSON, fixed at creation
    pub rule_snapshot: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub failure: Option<JobFailure>,
}

/// One row of a job's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Option<JobState>,
    pub to: JobState,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

const JOB_COLUMNS: &str = "id, company_id, range_start, range_end, state, current_stage, rule_version, \
                           rule_snapshot, created_at, updated_at, failure";

fn conversion_error(column: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn timestamp(row: &Row<'_>, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

fn date(row: &Row<'_>, column: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(column)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| conversion_error(column, e))
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown job state '{0}'")]
struct UnknownState(String);

fn state(row: &Row<'_>, column: usize) -> rusqlite::Result<JobState> {
    let raw: String = row.get(column)?;
    JobState::from_db_string(&raw).ok_or_else(|| conversion_error(column, UnknownState(raw)))
}

fn optional_state(row: &Row<'_>, column: usize) -> rusqlite::Result<Option<JobState>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|raw| JobState::from_db_string(&raw).ok_or_else(|| conversion_error(column, UnknownState(raw))))
        .transpose()
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let failure: Option<String> = row.get(10)?;

    Ok(JobRecord {
        id: row.get(0)?,
        company_id: row.get(1)?,
        range: PeriodRange {
            start: date(row, 2)?,
            end: date(row, 3)?,
        },
        state: state(row, 4)?,
        current_stage: row.get(5)?,
        rule_version: row.get(6)?,
        rule_snapshot: row.get(7)?,
        created_at: timestamp(row, 8)?,
        updated_at: timestamp(row, 9)?,
        failure: failure
            .map(|f| serde_json::from_str(&f).map_err(|e| conversion_error(10, e)))
            .transpose()?,
    })
}

/// SQLite store for analysis jobs
pub struct JobStore {
    conn: Arc<Mutex<Connection>>,
}

impl JobStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", path.as_ref()))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;

        info!(path = ?path.as_ref(), "Job store opened");
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;

        debug!("In-memory job store created");
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("Job store lock poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                company_id TEXT NOT NULL,
                range_start TEXT NOT NULL,
                range_end TEXT NOT NULL,
                state TEXT NOT NULL,
                current_stage TEXT,
                rule_version TEXT NOT NULL,
                rule_snapshot TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                failure TEXT,
                result TEXT
            );

            CREATE TABLE IF NOT EXISTS job_transitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                from_state TEXT,
                to_state TEXT NOT NULL,
                at TEXT NOT NULL,
                reason TEXT,
                FOREIGN KEY (job_id) REFERENCES jobs(id)
            );

            CREATE TABLE IF NOT EXISTS stage_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                stage TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                error TEXT,
                FOREIGN KEY (job_id) REFERENCES jobs(id)
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
            CREATE INDEX IF NOT EXISTS idx_transitions_job ON job_transitions(job_id);
            CREATE INDEX IF NOT EXISTS idx_attempts_job ON stage_attempts(job_id);
            "#,
        )?;

        debug!("Job store schema initialized");
        Ok(())
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    /// Insert a new job and its CREATED transition.
    pub fn create_job(&self, job: &JobRecord) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            &format!("INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
            params![
                job.id,
                job.company_id,
                job.range.start.to_string(),
                job.range.end.to_string(),
                job.state.to_db_string(),
                job.current_stage,
                job.rule_version,
                job.rule_snapshot,
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
                job.failure.as_ref().map(serde_json::to_string).transpose()?,
            ],
        )?;
        tx.execute(
            "INSERT INTO job_transitions (job_id, from_state, to_state, at) VALUES (?1, NULL, ?2, ?3)",
            params![job.id, job.state.to_db_string(), job.created_at.to_rfc3339()],
        )?;
        tx.commit()?;

        debug!(job_id = %job.id, "Job created");
        Ok(())
    }

    /// Move a job to `to`, returning the state it left.
    ///
    /// Rejects transitions that are not forward moves. The failure and the
    /// result are written in the same transaction as the state change.
    pub fn transition(
        &self,
        job_id: &str,
        to: JobState,
        failure: Option<&JobFailure>,
        result: Option<&str>,
    ) -> Result<JobState> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let current: String = tx
            .query_row("SELECT state FROM jobs WHERE id = ?1", params![job_id], |row| row.get(0))
            .optional()?
            .ok_or_else(|| anyhow!("Job {job_id} not found"))?;
        let from = JobState::from_db_string(&current).ok_or_else(|| anyhow!("Unknown job state '{current}'"))?;
        if !from.can_transition_to(to) {
            bail!("Illegal transition {from} -> {to} for job {job_id}");
        }

        let now = Utc::now().to_rfc3339();
        let failure_json = failure.map(serde_json::to_string).transpose()?;
        tx.execute(
            r#"
            UPDATE jobs
            SET state = ?1, updated_at = ?2, failure = COALESCE(?3, failure), result = COALESCE(?4, result)
            WHERE id = ?5
            "#,
            params![to.to_db_string(), now, failure_json, result, job_id],
        )?;
        tx.execute(
            "INSERT INTO job_transitions (job_id, from_state, to_state, at, reason) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![job_id, from.to_db_string(), to.to_db_string(), now, failure.map(|f| f.code.as_str())],
        )?;
        tx.commit()?;

        debug!(job_id, from = %from, to = %to, "Job transitioned");
        Ok(from)
    }

    pub fn set_current_stage(&self, job_id: &str, stage: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE jobs SET current_stage = ?1, updated_at = ?2 WHERE id = ?3",
            params![stage, Utc::now().to_rfc3339(), job_id],
        )?;
        Ok(())
    }

    pub fn get_job(&self, id: &str) -> Result<Option<JobRecord>> {
        let conn = self.lock()?;
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// Stored report JSON, present once the job is COMPLETED.
    pub fn get_result(&self, id: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let result: Option<Option<String>> = conn
            .query_row("SELECT result FROM jobs WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        Ok(result.flatten())
    }

    /// Most recent jobs first
    pub fn list_jobs(&self, limit: usize) -> Result<Vec<JobRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC LIMIT ?1"
        ))?;
        let jobs = stmt
            .query_map(params![i64::try_from(limit).unwrap_or(i64::MAX)], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Jobs left in a non-terminal state, e.g. by a restart.
    pub fn unfinished_jobs(&self) -> Result<Vec<JobRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE state IN ('CREATED', 'INGESTING', 'ANALYZING', 'SCORING') \
             ORDER BY created_at"
        ))?;
        let jobs = stmt.query_map([], job_from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    // ========================================================================
    // Audit trail
    // ========================================================================

    pub fn transitions(&self, job_id: &str) -> Result<Vec<TransitionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT from_state, to_state, at, reason FROM job_transitions WHERE job_id = ?1 ORDER BY id",
        )?;
        let transitions = stmt
            .query_map(params![job_id], |row| {
                Ok(TransitionRecord {
                    from: optional_state(row, 0)?,
                    to: state(row, 1)?,
                    at: timestamp(row, 2)?,
                    reason: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(transitions)
    }

    pub fn record_attempt(&self, job_id: &str, attempt: &StageAttempt) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO stage_attempts (job_id, stage, attempt, started_at, duration_ms, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                job_id,
                attempt.stage.name(),
                attempt.attempt,
                attempt.started_at.to_rfc3339(),
                i64::try_from(attempt.duration_ms).unwrap_or(i64::MAX),
                attempt.error.as_ref().map(serde_json::to_string).transpose()?,
            ],
        )?;
        Ok(())
    }

    pub fn attempts(&self, job_id: &str) -> Result<Vec<StageAttempt>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT stage, attempt, started_at, duration_ms, error FROM stage_attempts WHERE job_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![job_id], |row| {
                let stage: String = row.get(0)?;
                let duration_ms: i64 = row.get(3)?;
                let error: Option<String> = row.get(4)?;
                Ok((stage, row.get::<_, u32>(1)?, timestamp(row, 2)?, duration_ms, error))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let attempts = rows
            .into_iter()
            .filter_map(|(stage, attempt, started_at, duration_ms, error)| {
                Some(StageAttempt {
                    stage: Stage::from_name(&stage)?,
                    attempt,
                    started_at,
                    duration_ms: u64::try_from(duration_ms).unwrap_or_default(),
                    error: error.and_then(|e| serde_json::from_str(&e).ok()),
                })
            })
            .collect();
        Ok(attempts)
    }

    /// Number of attempts per stage name.
    pub fn attempt_counts(&self, job_id: &str) -> Result<BTreeMap<String, u32>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT stage, COUNT(*) FROM stage_attempts WHERE job_id = ?1 GROUP BY stage")?;
        let counts = stmt
            .query_map(params![job_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)))?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(counts)
    }
}
