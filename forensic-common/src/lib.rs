//! Forensic Common - shared configuration, logging and error types.
//!
//! This crate provides:
//! - Service configuration types and loading
//! - Layered (base + environment overlay) JSON loading for rule files
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod config_loader;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::{
    Config, ObservabilityConfig, PipelineConfig, ProviderConfig, RulesConfig, ServiceConfig,
    StageBudget, StorageConfig,
};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::{Config, PipelineConfig, StageBudget};
    pub use crate::error::{Error, Result};
    pub use crate::logging::init_logging;
    pub use crate::validation::{Validate, ValidationError};
}
