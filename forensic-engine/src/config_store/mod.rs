//! Versioned rule configuration.
//!
//! The store holds one immutable [`RuleSnapshot`] at a time. Jobs take an
//! `Arc` to the snapshot current at submission, so a reload only affects
//! jobs created afterwards. A reload that fails to load or validate leaves
//! the previous snapshot active.

mod rule_set;

pub use rule_set::{CompiledRules, RuleSet};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::rules::RuleValidationError;
use forensic_common::config_loader::load_layered;

/// Base name of the rule files (`rules.json`, `rules.<env>.json`).
pub const RULES_FILE_STEM: &str = "rules";

/// Errors from loading or validating a rule set.
#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("Failed to load rules: {0:#}")]
    Load(anyhow::Error),

    #[error("Invalid rules ({} problems): {}", .0.len(), join_errors(.0))]
    Invalid(Vec<RuleValidationError>),
}

fn join_errors(errors: &[RuleValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl From<ConfigStoreError> for forensic_common::Error {
    fn from(err: ConfigStoreError) -> Self {
        forensic_common::Error::Config(err.to_string())
    }
}

/// Where rule definitions come from.
#[derive(Debug, Clone)]
pub enum RuleSource {
    /// Compiled-in defaults only
    BuiltIn,
    /// `rules.json` merged with the environment overlay
    Directory { dir: PathBuf, environment: String },
}

impl RuleSource {
    fn describe(&self) -> String {
        match self {
            RuleSource::BuiltIn => "builtin".into(),
            RuleSource::Directory { dir, environment } => format!("{} ({environment})", dir.display()),
        }
    }

    fn read(&self) -> Result<RuleSet, ConfigStoreError> {
        let RuleSource::Directory { dir, environment } = self else {
            return Ok(RuleSet::default());
        };

        let merged = load_layered(dir, RULES_FILE_STEM, environment).map_err(ConfigStoreError::Load)?;
        match merged {
            Some(value) => serde_json::from_value(value)
                .context("Failed to deserialize rule set")
                .map_err(ConfigStoreError::Load),
            None => {
                tracing::warn!(dir = %dir.display(), "No rule files found, using built-in defaults");
                Ok(RuleSet::default())
            }
        }
    }
}

/// An immutable, validated rule set.
#[derive(Debug)]
pub struct RuleSnapshot {
    pub rules: RuleSet,
    pub compiled: CompiledRules,
    pub loaded_at: DateTime<Utc>,
    pub origin: String,
}

impl RuleSnapshot {
    pub fn build(rules: RuleSet, origin: impl Into<String>) -> Result<Self, ConfigStoreError> {
        let compiled = rules.compile().map_err(ConfigStoreError::Invalid)?;
        Ok(Self {
            rules,
            compiled,
            loaded_at: Utc::now(),
            origin: origin.into(),
        })
    }

    pub fn version(&self) -> &str {
        &self.rules.version
    }

    /// Serialized rule set, as recorded with each job.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.rules)
    }

    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            version: self.rules.version.clone(),
            origin: self.origin.clone(),
            loaded_at: self.loaded_at,
            ratios: self.compiled.ratios.len(),
            anomaly_rules: self.compiled.anomaly_rules.len(),
            compliance_rules: self.compiled.compliance_rules.len(),
        }
    }
}

/// What `GET /api/v1/config` reports.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotSummary {
    pub version: String,
    pub origin: String,
    pub loaded_at: DateTime<Utc>,
    pub ratios: usize,
    pub anomaly_rules: usize,
    pub compliance_rules: usize,
}

/// Holds the active rule snapshot.
pub struct ConfigStore {
    source: RuleSource,
    current: RwLock<Arc<RuleSnapshot>>,
}

impl ConfigStore {
    /// Load and validate the initial snapshot. Any error is fatal to startup.
    pub fn load(source: RuleSource) -> Result<Self, ConfigStoreError> {
        let snapshot = RuleSnapshot::build(source.read()?, source.describe())?;
        tracing::info!(
            version = %snapshot.version(),
            origin = %snapshot.origin,
            "Rule set loaded"
        );
        Ok(Self {
            source,
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Store with a fixed rule set and no backing files.
    pub fn from_rule_set(rules: RuleSet) -> Result<Self, ConfigStoreError> {
        let snapshot = RuleSnapshot::build(rules, "inline")?;
        Ok(Self {
            source: RuleSource::BuiltIn,
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    pub async fn snapshot(&self) -> Arc<RuleSnapshot> {
        self.current.read().await.clone()
    }

    /// Re-read the source. Running jobs keep the snapshot they started with.
    pub async fn reload(&self) -> Result<Arc<RuleSnapshot>, ConfigStoreError> {
        let snapshot = match self
            .source
            .read()
            .and_then(|rules| RuleSnapshot::build(rules, self.source.describe()))
        {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                let active = self.current.read().await.version().to_string();
                tracing::error!(error = %e, active_version = %active, "Rule reload rejected");
                return Err(e);
            }
        };

        let mut current = self.current.write().await;
        tracing::info!(
            previous = %current.version(),
            version = %snapshot.version(),
            "Rule set reloaded"
        );
        *current = snapshot.clone();
        Ok(snapshot)
    }

    /// Replace the snapshot directly.
    pub async fn replace(&self, rules: RuleSet) -> Result<Arc<RuleSnapshot>, ConfigStoreError> {
        let snapshot = Arc::new(RuleSnapshot::build(rules, "inline")?);
        *self.current.write().await = snapshot.clone();
        Ok(snapshot)
    }
}
