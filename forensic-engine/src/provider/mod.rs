//! Upstream collaborators: statement and signal providers.
//!
//! How statements are fetched (portals, OCR, vendor feeds) is outside this
//! crate; providers only have to honor the error contract below so the
//! pipeline can tell transient failures from permanent ones.

pub mod file;
pub mod limited;
pub mod rate_limiter;

pub use file::{FileSignalProvider, FileStatementProvider};
pub use limited::RateLimitedProvider;
pub use rate_limiter::{shared_limiter, RateLimiter, SharedRateLimiter};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::statement::{PeriodRange, StatementSet};

/// Errors returned by providers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("Rate limited{}", .retry_after_secs.map(|s| format!(", retry after {s} seconds")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Upstream returned data that cannot be used
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl ProviderError {
    /// Rate limits, network errors and outages are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Network(_) | Self::Unavailable(_)
        )
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Network(_) => "network",
            Self::Unavailable(_) => "unavailable",
            Self::NotFound(_) => "not_found",
            Self::InvalidData(_) => "invalid_data",
        }
    }
}

/// Source of normalized financial statements.
#[async_trait]
pub trait StatementProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Statements for a company whose period end falls inside `range`.
    async fn fetch_statements(&self, company_id: &str, range: &PeriodRange) -> Result<StatementSet, ProviderError>;
}

/// Opaque market and sentiment scores (0-100) from document/news analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalSignals {
    #[serde(default)]
    pub market_signal: Option<f64>,
    #[serde(default)]
    pub sentiment: Option<f64>,
}

/// Source of external signals. Absence is normal, not an error.
#[async_trait]
pub trait SignalProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_signals(&self, company_id: &str) -> Result<Option<ExternalSignals>, ProviderError>;
}

/// Signal provider that never has anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSignals;

#[async_trait]
impl SignalProvider for NoSignals {
    fn name(&self) -> &str {
        "none"
    }

    async fn fetch_signals(&self, _company_id: &str) -> Result<Option<ExternalSignals>, ProviderError> {
        Ok(None)
    }
}
