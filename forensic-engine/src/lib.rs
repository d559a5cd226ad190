//! Forensic Engine - forensic analysis and risk orchestration.
//!
//! Each job takes one company's normalized financial statements through a
//! fixed pipeline:
//!
//! ```text
//! CREATED → INGESTING → ANALYZING → SCORING → COMPLETED
//!              │            │           │
//!           ingest      ratios       risk_score ┐ concurrent,
//!                       digit_test   compliance ┘ both required
//!                       bankruptcy
//!                       manipulation
//!                       anomalies
//! ```
//!
//! Any non-terminal state may also end in FAILED or CANCELLED. Every
//! transition and every stage attempt is persisted.
//!
//! Thresholds, weights and rule conditions come from a versioned
//! [`config_store::ConfigStore`]; each job runs against the snapshot that
//! was current when it was submitted.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod analysis;
pub mod config_store;
pub mod jobs;
pub mod pipeline;
pub mod provider;
pub mod routes;
pub mod rules;
pub mod statement;

use anyhow::{Context, Result};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use forensic_common::config::{expand_path, Config};

pub use config_store::{ConfigStore, RuleSet, RuleSnapshot, RuleSource};
pub use jobs::{JobError, JobEvent, JobManager, JobState, JobStatus, JobStore};
pub use pipeline::{AnalysisReport, StageCoordinator};
pub use routes::{build_router, ServiceState};

use crate::provider::{
    shared_limiter, FileSignalProvider, FileStatementProvider, NoSignals, RateLimitedProvider, SignalProvider,
    StatementProvider,
};

/// Rule source described by the service configuration.
pub fn rule_source(config: &Config) -> RuleSource {
    match config.rules_dir() {
        Some(dir) => RuleSource::Directory {
            dir,
            environment: config.rules.environment.clone(),
        },
        None => RuleSource::BuiltIn,
    }
}

// ============================================================================
// Forensic Service
// ============================================================================

/// Wires providers, the job store and the job manager, and serves the API.
pub struct ForensicService {
    config: Config,
    state: Arc<ServiceState>,
}

impl ForensicService {
    /// Build the service around an already loaded rule store.
    pub fn new(config: Config, rules: Arc<ConfigStore>) -> Result<Self> {
        let limiter = shared_limiter("statements", config.provider.rate_limit_rpm);
        let files: Arc<dyn StatementProvider> =
            Arc::new(FileStatementProvider::new(expand_path(&config.provider.statements_dir)));
        let statements: Arc<dyn StatementProvider> = Arc::new(RateLimitedProvider::new(files, limiter));

        let signals: Arc<dyn SignalProvider> = match config.provider.signals_dir.as_deref() {
            Some(dir) => Arc::new(FileSignalProvider::new(expand_path(dir))),
            None => Arc::new(NoSignals),
        };

        let store = match config.db_path() {
            Some(path) => JobStore::open(&path).with_context(|| format!("Failed to open job store at {}", path.display()))?,
            None => {
                tracing::warn!("No storage.db_path configured, jobs are kept in memory only");
                JobStore::in_memory()?
            }
        };

        let coordinator = StageCoordinator::new(statements, signals, config.pipeline.clone());
        let manager = JobManager::new(Arc::new(store), rules, coordinator, &config.pipeline);
        manager.recover_interrupted()?;

        Ok(Self {
            state: ServiceState::new(Arc::new(manager)),
            config,
        })
    }

    pub fn jobs(&self) -> &Arc<JobManager> {
        &self.state.jobs
    }

    /// Router with every route and the shared layers.
    pub fn build_router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        build_router(self.state.clone())
            .layer(RequestBodyLimitLayer::new(routes::MAX_BODY_BYTES))
            .layer(cors)
    }

    /// Start the HTTP server and run until SIGINT or SIGTERM.
    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.service.host, self.config.service.port)
            .parse()
            .context("Invalid service bind address")?;

        tracing::info!(address = %addr, "Starting HTTP server");
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `shutdown` resolves, then drain open requests.
    ///
    /// Unfinished jobs are failed as interrupted on the next start.
    pub async fn serve(self, listener: TcpListener, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let app = self.build_router();
        axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
                    _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "Failed to install signal handlers, falling back to ctrl-c");
            }
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received ctrl-c, shutting down"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for ctrl-c, serving until killed");
            std::future::pending::<()>().await;
        }
    }
}
