//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use forensic_common::{PipelineConfig, StageBudget};
use forensic_engine::config_store::{ConfigStore, RuleSet};
use forensic_engine::jobs::{JobManager, JobState, JobStatus, JobStore};
use forensic_engine::pipeline::StageCoordinator;
use forensic_engine::provider::{ExternalSignals, ProviderError, SignalProvider, StatementProvider};
use forensic_engine::statement::{
    FilingMetadata, FiscalPeriod, NormalizedStatement, PeriodRange, StatementScope, StatementSet,
};

pub const COMPANY: &str = "ACME";

/// Current ratio 2.0, quick ratio 1.0, debt/equity 1.5, bankruptcy score 3.2,
/// manipulation score -1.5 against an identical prior period.
pub fn scenario_items() -> Vec<(&'static str, f64)> {
    vec![
        ("total_assets", 1000.0),
        ("current_assets", 400.0),
        ("current_liabilities", 200.0),
        ("inventory", 200.0),
        ("receivables", 100.0),
        ("cash", 100.0),
        ("total_liabilities", 600.0),
        ("total_equity", 400.0),
        ("retained_earnings", 200.0),
        ("ebit", 100.0),
        ("revenue", 1950.0),
        ("cost_of_revenue", 1200.0),
        ("ppe_net", 500.0),
        ("securities", 0.0),
        ("depreciation", 50.0),
        ("sga_expense", 300.0),
        ("long_term_debt", 400.0),
        ("net_income", 60.0),
        ("operating_cash_flow", 60.0 - 1000.0 * 0.98 / 4.679),
    ]
}

pub fn statement(label: &str, year: i32, items: &[(&str, f64)]) -> NormalizedStatement {
    NormalizedStatement::new(
        COMPANY,
        FiscalPeriod {
            label: label.into(),
            end_date: NaiveDate::from_ymd_opt(year, 12, 31).unwrap(),
        },
        StatementScope::Consolidated,
        "fixture",
        items.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
    )
    .unwrap()
}

pub fn scenario_set() -> StatementSet {
    let items = scenario_items();
    StatementSet {
        statements: vec![statement("FY2023", 2023, &items), statement("FY2024", 2024, &items)],
        filing: Some(FilingMetadata {
            filed_on: NaiveDate::from_ymd_opt(2025, 2, 15),
            disclosures: [
                "auditor_report",
                "related_party_transactions",
                "segment_reporting",
                "contingent_liabilities",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }),
    }
}

pub fn range() -> PeriodRange {
    PeriodRange::new(
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
    )
    .unwrap()
}

/// Millisecond backoff so retry tests finish quickly.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        base_backoff_ms: 1,
        max_backoff_ms: 4,
        default_budget: StageBudget {
            soft_ms: 1_000,
            hard_ms: 5_000,
        },
        ..PipelineConfig::default()
    }
}

/// Fails with a network error `failures` times, then serves the scenario.
pub struct FlakyProvider {
    set: StatementSet,
    failures: AtomicU32,
    pub calls: AtomicU32,
}

impl FlakyProvider {
    pub fn new(failures: u32) -> Self {
        Self {
            set: scenario_set(),
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl StatementProvider for FlakyProvider {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn fetch_statements(&self, _company_id: &str, _range: &PeriodRange) -> Result<StatementSet, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Network("connection reset".into()));
        }
        Ok(self.set.clone())
    }
}

/// Blocks every fetch until the test opens the gate.
pub struct GatedProvider {
    gate: Semaphore,
    pub waiting: AtomicU32,
}

impl GatedProvider {
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            waiting: AtomicU32::new(0),
        }
    }

    pub fn open(&self, fetches: usize) {
        self.gate.add_permits(fetches);
    }
}

#[async_trait]
impl StatementProvider for GatedProvider {
    fn name(&self) -> &str {
        "gated"
    }

    async fn fetch_statements(&self, _company_id: &str, _range: &PeriodRange) -> Result<StatementSet, ProviderError> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| ProviderError::Unavailable("gate closed".into()))?;
        permit.forget();
        Ok(scenario_set())
    }
}

/// Market signal and sentiment both at 70.
pub struct SteadySignals;

#[async_trait]
impl SignalProvider for SteadySignals {
    fn name(&self) -> &str {
        "steady"
    }

    async fn fetch_signals(&self, _company_id: &str) -> Result<Option<ExternalSignals>, ProviderError> {
        Ok(Some(ExternalSignals {
            market_signal: Some(70.0),
            sentiment: Some(70.0),
        }))
    }
}

pub fn manager_with(statements: Arc<dyn StatementProvider>, config: PipelineConfig) -> Arc<JobManager> {
    let coordinator = StageCoordinator::new(statements, Arc::new(SteadySignals), config.clone());
    Arc::new(JobManager::new(
        Arc::new(JobStore::in_memory().unwrap()),
        Arc::new(ConfigStore::from_rule_set(RuleSet::default()).unwrap()),
        coordinator,
        &config,
    ))
}

/// Poll until the job reaches `predicate`, or panic after five seconds.
pub async fn wait_for(manager: &JobManager, job_id: &str, predicate: impl Fn(&JobStatus) -> bool) -> JobStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = manager.status(job_id).await.unwrap();
        if predicate(&status) {
            return status;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {job_id} stuck in {}",
            status.state
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_terminal(manager: &JobManager, job_id: &str) -> JobStatus {
    wait_for(manager, job_id, |s| s.state.is_terminal()).await
}

pub fn states(transitions: &[forensic_engine::jobs::TransitionRecord]) -> Vec<JobState> {
    transitions.iter().map(|t| t.to).collect()
}
