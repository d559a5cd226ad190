//! Stage coordinator: runs one job's stages against a rule snapshot.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    AnalysisContext, AnalysisReport, DataIssue, PipelineError, PipelineObserver, RetryPolicy, Stage, StageAttempt,
    StageError,
};
use crate::analysis::metrics::analysis_metrics;
use crate::analysis::{
    AnomalyEvaluator, BankruptcyResult, BankruptcyScorer, ComplianceEvaluator, DigitLawTest, DigitTestResult,
    ManipulationScorer, RatioEngine, RiskAggregator, SubscoreCalculator,
};
use crate::config_store::RuleSnapshot;
use crate::jobs::JobState;
use crate::provider::{SignalProvider, StatementProvider};
use crate::statement::{PeriodRange, StatementPair};
use forensic_common::PipelineConfig;

/// Budget key for the signal lookup done during ingest.
const SIGNALS_BUDGET: &str = "signals";

/// Runs jobs through the fixed stage sequence.
pub struct StageCoordinator {
    statements: Arc<dyn StatementProvider>,
    signals: Arc<dyn SignalProvider>,
    policy: RetryPolicy,
    config: PipelineConfig,
}

impl StageCoordinator {
    pub fn new(
        statements: Arc<dyn StatementProvider>,
        signals: Arc<dyn SignalProvider>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            statements,
            signals,
            policy: RetryPolicy::from_config(&config),
            config,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run every stage. The returned report is complete; on error the
    /// failed stage and reason are in the [`PipelineError`].
    pub async fn run(
        &self,
        mut ctx: AnalysisContext,
        snapshot: Arc<RuleSnapshot>,
        cancel: &CancellationToken,
        observer: &dyn PipelineObserver,
    ) -> Result<AnalysisReport, PipelineError> {
        let job_id = ctx.job_id().to_string();

        // INGESTING
        self.enter(&job_id, JobState::Ingesting, Stage::Ingest, cancel, observer).await?;
        let company_id = ctx.company_id().to_string();
        let range = *ctx.range();
        let pair = self
            .run_stage(&job_id, Stage::Ingest, cancel, observer, || {
                self.fetch_pair(&company_id, &range)
            })
            .await?;
        self.check_balance(&mut ctx, &pair, snapshot.compiled.balance_tolerance);
        store(&mut ctx, |c| c.set_statements(pair))?;
        self.fetch_signals(&mut ctx).await?;

        // ANALYZING
        self.enter(&job_id, JobState::Analyzing, Stage::Ratios, cancel, observer).await?;

        let ratios = self
            .run_compute(&job_id, Stage::Ratios, &ctx, &snapshot, cancel, observer, |ctx, snap| {
                Ok(RatioEngine::new(&snap.compiled.ratios).analyze(ctx.pair()?))
            })
            .await?;
        store(&mut ctx, |c| c.set_ratios(ratios))?;

        let digits = self
            .run_compute(&job_id, Stage::DigitTest, &ctx, &snapshot, cancel, observer, |ctx, snap| {
                Ok(DigitLawTest::new(&snap.compiled.digit_test).run_on_pair(ctx.pair()?))
            })
            .await?;
        if let DigitTestResult::InsufficientData { sample_size, min_samples } = &digits {
            ctx.record_issue(DataIssue::new(
                Stage::DigitTest,
                "insufficient_sample",
                format!("{sample_size} values, {min_samples} required"),
            ));
        }
        store(&mut ctx, |c| c.set_digit_test(digits))?;

        let bankruptcy = self
            .run_compute(&job_id, Stage::Bankruptcy, &ctx, &snapshot, cancel, observer, |ctx, snap| {
                Ok(BankruptcyScorer::new(&snap.compiled.bankruptcy).score(ctx.pair()?))
            })
            .await?;
        if let BankruptcyResult::Indeterminate { missing_factors } = &bankruptcy {
            ctx.record_issue(DataIssue::new(
                Stage::Bankruptcy,
                "indeterminate",
                format!("missing factors: {}", missing_factors.join(", ")),
            ));
        }
        store(&mut ctx, |c| c.set_bankruptcy(bankruptcy))?;

        let manipulation = self
            .run_compute(&job_id, Stage::Manipulation, &ctx, &snapshot, cancel, observer, |ctx, snap| {
                Ok(ManipulationScorer::new(&snap.compiled.manipulation).score(ctx.pair()?)?)
            })
            .await;
        match manipulation {
            Ok(score) => store(&mut ctx, |c| c.set_manipulation(score))?,
            // Manipulation needs a prior period; its absence fails this stage only
            Err(PipelineError::StageFailed {
                error: StageError::Data { code, message },
                ..
            }) => ctx.record_issue(DataIssue::new(Stage::Manipulation, code, message)),
            Err(e) => return Err(e),
        }

        let anomalies = self
            .run_compute(&job_id, Stage::Anomalies, &ctx, &snapshot, cancel, observer, |ctx, snap| {
                let metrics = analysis_metrics(ctx.pair()?, &ctx.outputs());
                Ok(AnomalyEvaluator::new(&snap.compiled.anomaly_rules, snap.version()).evaluate(&metrics))
            })
            .await?;
        store(&mut ctx, |c| c.set_anomalies(anomalies))?;

        // SCORING: risk and compliance are independent, the job waits for both
        self.enter(&job_id, JobState::Scoring, Stage::RiskScore, cancel, observer).await?;

        let (risk, compliance) = tokio::join!(
            self.run_compute(&job_id, Stage::RiskScore, &ctx, &snapshot, cancel, observer, |ctx, snap| {
                let subscores = SubscoreCalculator::new(&snap.compiled.subscores).derive(&ctx.outputs());
                Ok(RiskAggregator::new(&snap.compiled.risk).aggregate(subscores))
            }),
            self.run_compute(&job_id, Stage::Compliance, &ctx, &snapshot, cancel, observer, |ctx, snap| {
                let metrics = analysis_metrics(ctx.pair()?, &ctx.outputs());
                Ok(ComplianceEvaluator::new(&snap.compiled.compliance_rules, snap.version()).evaluate(&metrics))
            }),
        );
        let (risk, compliance) = (risk?, compliance?);
        store(&mut ctx, |c| c.set_risk(risk))?;
        store(&mut ctx, |c| c.set_compliance(compliance))?;

        ctx.into_report(snapshot.version())
            .map_err(|e| stage_failed(Stage::RiskScore, StageError::from(e), 1))
    }

    /// Check for cancellation, then persist the phase transition.
    async fn enter(
        &self,
        job_id: &str,
        state: JobState,
        first_stage: Stage,
        cancel: &CancellationToken,
        observer: &dyn PipelineObserver,
    ) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled {
                stage: first_stage.name().into(),
            });
        }
        observer
            .transition(job_id, state)
            .await
            .map_err(|e| PipelineError::Persistence(format!("{e:#}")))
    }

    async fn fetch_pair(&self, company_id: &str, range: &PeriodRange) -> Result<StatementPair, StageError> {
        let set = self.statements.fetch_statements(company_id, range).await?;
        debug!(
            company_id,
            provider = self.statements.name(),
            statements = set.statements.len(),
            "Statements fetched"
        );
        Ok(set.into_pair(company_id)?)
    }

    fn check_balance(&self, ctx: &mut AnalysisContext, pair: &StatementPair, tolerance: f64) {
        for statement in pair.statements() {
            let check = statement.check_balance(tolerance);
            if check.balanced == Some(false) {
                ctx.record_issue(DataIssue::new(
                    Stage::Ingest,
                    "balance_mismatch",
                    format!(
                        "{}: assets differ from liabilities + equity by {:.2}",
                        check.period,
                        check.gap.unwrap_or_default()
                    ),
                ));
            }
        }
    }

    /// Signals are optional: failures become data issues.
    async fn fetch_signals(&self, ctx: &mut AnalysisContext) -> Result<(), PipelineError> {
        let budget = self.config.budget_for(SIGNALS_BUDGET);
        let outcome = tokio::time::timeout(budget.hard(), self.signals.fetch_signals(ctx.company_id())).await;
        match outcome {
            Ok(Ok(Some(signals))) => store(ctx, |c| c.set_signals(signals))?,
            Ok(Ok(None)) => debug!(job_id = %ctx.job_id(), "No external signals"),
            Ok(Err(e)) => ctx.record_issue(DataIssue::new(Stage::Ingest, "signals_unavailable", e.to_string())),
            Err(_) => ctx.record_issue(DataIssue::new(
                Stage::Ingest,
                "signals_timeout",
                format!("no answer within {} ms", budget.hard_ms),
            )),
        }
        Ok(())
    }

    /// Run a CPU-bound stage on the blocking pool against an immutable view.
    #[allow(clippy::too_many_arguments)]
    async fn run_compute<T, F>(
        &self,
        job_id: &str,
        stage: Stage,
        ctx: &AnalysisContext,
        snapshot: &Arc<RuleSnapshot>,
        cancel: &CancellationToken,
        observer: &dyn PipelineObserver,
        compute: F,
    ) -> Result<T, PipelineError>
    where
        T: Send + 'static,
        F: Fn(&AnalysisContext, &RuleSnapshot) -> Result<T, StageError> + Copy + Send + 'static,
    {
        self.run_stage(job_id, stage, cancel, observer, || {
            let view = ctx.clone();
            let snapshot = Arc::clone(snapshot);
            async move {
                tokio::task::spawn_blocking(move || compute(&view, &snapshot))
                    .await
                    .map_err(|e| StageError::fatal("stage_panicked", e.to_string()))?
            }
        })
        .await
    }

    /// Attempt a stage under the retry policy and its time budget.
    async fn run_stage<T, F, Fut>(
        &self,
        job_id: &str,
        stage: Stage,
        cancel: &CancellationToken,
        observer: &dyn PipelineObserver,
        mut op: F,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        let budget = self.config.budget_for(stage.name());
        observer.stage_started(job_id, stage).await;

        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled {
                    stage: stage.name().into(),
                });
            }
            attempt += 1;

            let started_at = Utc::now();
            let started = Instant::now();
            let result = match tokio::time::timeout(budget.hard(), op()).await {
                Ok(result) => result,
                Err(_) => Err(StageError::Timeout {
                    budget_ms: budget.hard_ms,
                }),
            };
            let elapsed = started.elapsed();
            let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

            if elapsed > budget.soft() {
                warn!(
                    job_id,
                    stage = stage.name(),
                    duration_ms,
                    soft_budget_ms = budget.soft_ms,
                    "Stage exceeded soft budget"
                );
            }

            observer
                .attempt_finished(
                    job_id,
                    &StageAttempt {
                        stage,
                        attempt,
                        started_at,
                        duration_ms,
                        error: result.as_ref().err().cloned(),
                    },
                )
                .await;

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        info!(job_id, stage = stage.name(), attempt, "Stage recovered after retries");
                    } else {
                        debug!(job_id, stage = stage.name(), duration_ms, "Stage completed");
                    }
                    return Ok(value);
                }
                Err(error) if error.is_retryable() && self.policy.allows_retry_after(attempt) => {
                    let delay = self.policy.backoff_delay(attempt - 1);
                    warn!(
                        job_id,
                        stage = stage.name(),
                        attempt,
                        max_retries = self.policy.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Stage attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(PipelineError::Cancelled { stage: stage.name().into() });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(error) => {
                    if matches!(error, StageError::Data { .. }) {
                        warn!(job_id, stage = stage.name(), code = error.code(), "Stage failed on data");
                    } else {
                        error!(job_id, stage = stage.name(), attempt, error = %error, "Stage failed");
                    }
                    return Err(stage_failed(stage, error, attempt));
                }
            }
        }
    }
}

fn stage_failed(stage: Stage, error: StageError, attempts: u32) -> PipelineError {
    PipelineError::StageFailed {
        stage: stage.name().into(),
        error,
        attempts,
    }
}

/// Write a stage output; a double write is an internal fault.
fn store(
    ctx: &mut AnalysisContext,
    write: impl FnOnce(&mut AnalysisContext) -> Result<(), super::ContextError>,
) -> Result<(), PipelineError> {
    write(ctx).map_err(|e| PipelineError::StageFailed {
        stage: "context".into(),
        error: StageError::fatal("context", e.to_string()),
        attempts: 1,
    })
}
