//! Service configuration for the forensic risk services.
//!
//! The service reads a single configuration file at `~/.forensic/config.json`.
//! Rule and threshold definitions live in separate rule files (see
//! [`RulesConfig`]) so they can be tuned without touching service settings.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (`FORENSIC_*` prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `FORENSIC_PORT` → service.port
//! - `FORENSIC_BIND_ADDRESS` → service.host
//! - `FORENSIC_LOG_LEVEL` → observability.log_level
//! - `FORENSIC_LOG_FORMAT` → observability.log_format
//! - `FORENSIC_ENV` → rules.environment
//! - `FORENSIC_RULES_DIR` → rules.dir
//! - `FORENSIC_DB_PATH` → storage.db_path
//! - `FORENSIC_MAX_RETRIES` → pipeline.max_retries

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".forensic"),
        |dirs| dirs.home_dir().join(".forensic"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Expand `~` and environment variables in a configured path.
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

// ============================================================================
// Service
// ============================================================================

/// HTTP service binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Bind address. Default: "127.0.0.1" (local only)
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    4460
}

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Pipeline
// ============================================================================

/// Time budget for a single stage attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageBudget {
    /// Exceeding this logs a warning
    pub soft_ms: u64,
    /// Exceeding this fails the attempt (retryable)
    pub hard_ms: u64,
}

impl StageBudget {
    pub fn soft(&self) -> Duration {
        Duration::from_millis(self.soft_ms)
    }

    pub fn hard(&self) -> Duration {
        Duration::from_millis(self.hard_ms)
    }
}

impl Default for StageBudget {
    fn default() -> Self {
        Self {
            soft_ms: 5_000,
            hard_ms: 30_000,
        }
    }
}

/// Job pipeline execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Retries per stage after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds (doubles with each retry)
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Jobs allowed to run at the same time
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Budget applied to stages without an explicit override
    #[serde(default)]
    pub default_budget: StageBudget,

    /// Per-stage budget overrides keyed by stage name (e.g. "ingest")
    #[serde(default)]
    pub stage_budgets: HashMap<String, StageBudget>,

    /// Capacity of the job event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl PipelineConfig {
    /// Budget for the named stage, falling back to the default budget.
    pub fn budget_for(&self, stage: &str) -> StageBudget {
        self.stage_budgets
            .get(stage)
            .copied()
            .unwrap_or(self.default_budget)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            default_budget: StageBudget::default(),
            stage_budgets: HashMap::new(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    2_000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_max_concurrent_jobs() -> usize {
    8
}

fn default_event_capacity() -> usize {
    256
}

// ============================================================================
// Provider
// ============================================================================

/// Upstream statement provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Global request budget shared by all jobs (requests per minute)
    #[serde(default = "default_rate_limit_rpm")]
    pub rate_limit_rpm: u32,

    /// Directory holding `<company_id>.json` statement files
    #[serde(default = "default_statements_dir")]
    pub statements_dir: String,

    /// Directory holding `<company_id>.json` market/sentiment signal files
    #[serde(default)]
    pub signals_dir: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            rate_limit_rpm: default_rate_limit_rpm(),
            statements_dir: default_statements_dir(),
            signals_dir: None,
        }
    }
}

fn default_rate_limit_rpm() -> u32 {
    120
}

fn default_statements_dir() -> String {
    "~/.forensic/statements".into()
}

// ============================================================================
// Storage
// ============================================================================

/// Job store location.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// SQLite database path. `None` keeps jobs in memory only.
    #[serde(default)]
    pub db_path: Option<String>,
}

// ============================================================================
// Rules
// ============================================================================

/// Where rule definitions are loaded from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Directory with `rules.json` and `rules.<environment>.json`.
    /// `None` uses the built-in rule set.
    #[serde(default)]
    pub dir: Option<String>,

    /// Deployment environment selecting the overlay file
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            dir: None,
            environment: default_environment(),
        }
    }
}

fn default_environment() -> String {
    "production".into()
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub rules: RulesConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("FORENSIC_PORT") {
            if let Ok(p) = port.parse() {
                self.service.port = p;
            }
        }

        if let Ok(bind) = std::env::var("FORENSIC_BIND_ADDRESS") {
            self.service.host = bind;
        }

        if let Ok(level) = std::env::var("FORENSIC_LOG_LEVEL") {
            self.observability.log_level = level;
        }

        if let Ok(format) = std::env::var("FORENSIC_LOG_FORMAT") {
            self.observability.log_format = format;
        }

        if let Ok(env) = std::env::var("FORENSIC_ENV") {
            self.rules.environment = env;
        }

        if let Ok(dir) = std::env::var("FORENSIC_RULES_DIR") {
            self.rules.dir = Some(dir);
        }

        if let Ok(path) = std::env::var("FORENSIC_DB_PATH") {
            self.storage.db_path = Some(path);
        }

        if let Ok(retries) = std::env::var("FORENSIC_MAX_RETRIES") {
            if let Ok(r) = retries.parse() {
                self.pipeline.max_retries = r;
            }
        }
    }

    /// Rules directory, expanded.
    pub fn rules_dir(&self) -> Option<PathBuf> {
        self.rules.dir.as_deref().map(expand_path)
    }

    /// Database path, expanded.
    pub fn db_path(&self) -> Option<PathBuf> {
        self.storage.db_path.as_deref().map(expand_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.service.port, 4460);
        assert_eq!(config.pipeline.max_retries, 3);
        assert_eq!(config.pipeline.base_backoff_ms, 2_000);
        assert_eq!(config.rules.environment, "production");
        assert!(config.storage.db_path.is_none());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "pipeline": { "max_retries": 5 }, "service": { "port": 9000 } }"#,
        )
        .unwrap();

        assert_eq!(config.pipeline.max_retries, 5);
        assert_eq!(config.pipeline.base_backoff_ms, 2_000);
        assert_eq!(config.service.port, 9000);
        assert_eq!(config.service.host, "127.0.0.1");
    }

    #[test]
    fn test_stage_budget_override() {
        let mut pipeline = PipelineConfig::default();
        pipeline.stage_budgets.insert(
            "ingest".into(),
            StageBudget {
                soft_ms: 10,
                hard_ms: 20,
            },
        );

        assert_eq!(pipeline.budget_for("ingest").hard_ms, 20);
        assert_eq!(pipeline.budget_for("ratios"), StageBudget::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "observability": { "log_format": "json" } }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.observability.log_format, "json");
        assert_eq!(config.observability.log_level, "info");
    }
}
