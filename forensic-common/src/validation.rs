//! Configuration validation.
//!
//! Invalid configuration is fatal at startup: every section is checked and
//! all problems are reported together.

use thiserror::Error;

use crate::config::{Config, ObservabilityConfig, PipelineConfig, ProviderConfig, ServiceConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

impl ValidationError {
    /// Shorthand for [`ValidationError::InvalidValue`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Collapse a list of errors into one result.
    pub fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Flattened list of individual errors.
    pub fn flatten(&self) -> Vec<&ValidationError> {
        match self {
            Self::Multiple(errors) => errors.iter().flat_map(|e| e.flatten()).collect(),
            other => vec![other],
        }
    }
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let errors: Vec<ValidationError> = [
            self.service.validate(),
            self.observability.validate(),
            self.pipeline.validate(),
            self.provider.validate(),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        ValidationError::collect(errors)
    }

    /// Load, apply environment overrides and validate.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

impl Validate for ServiceConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort {
                port: self.port,
                field: "service.port".into(),
            });
        }

        if self.host.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "service.host".into(),
            });
        }

        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::invalid(
                "observability.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::invalid(
                "observability.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        Ok(())
    }
}

impl Validate for PipelineConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.max_concurrent_jobs == 0 {
            errors.push(ValidationError::invalid(
                "pipeline.max_concurrent_jobs",
                "must be greater than 0",
            ));
        }

        if self.base_backoff_ms > self.max_backoff_ms {
            errors.push(ValidationError::Conflict {
                reason: format!(
                    "pipeline.base_backoff_ms ({}) exceeds pipeline.max_backoff_ms ({})",
                    self.base_backoff_ms, self.max_backoff_ms
                ),
            });
        }

        if self.event_capacity == 0 {
            errors.push(ValidationError::invalid(
                "pipeline.event_capacity",
                "must be greater than 0",
            ));
        }

        let budgets = std::iter::once(("default_budget".to_string(), self.default_budget)).chain(
            self.stage_budgets
                .iter()
                .map(|(stage, budget)| (format!("stage_budgets.{stage}"), *budget)),
        );

        for (field, budget) in budgets {
            if budget.hard_ms == 0 {
                errors.push(ValidationError::invalid(
                    format!("pipeline.{field}.hard_ms"),
                    "must be greater than 0",
                ));
            } else if budget.soft_ms > budget.hard_ms {
                errors.push(ValidationError::invalid(
                    format!("pipeline.{field}.soft_ms"),
                    "must not exceed hard_ms",
                ));
            }
        }

        ValidationError::collect(errors)
    }
}

impl Validate for ProviderConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.rate_limit_rpm == 0 {
            return Err(ValidationError::invalid(
                "provider.rate_limit_rpm",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}
