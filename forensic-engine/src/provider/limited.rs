//! Statement provider wrapper enforcing the shared rate limit.

use async_trait::async_trait;
use std::sync::Arc;

use super::{ProviderError, SharedRateLimiter, StatementProvider};
use crate::statement::{PeriodRange, StatementSet};

/// Waits for a token from the shared limiter before every upstream call.
pub struct RateLimitedProvider {
    inner: Arc<dyn StatementProvider>,
    limiter: SharedRateLimiter,
}

impl RateLimitedProvider {
    pub fn new(inner: Arc<dyn StatementProvider>, limiter: SharedRateLimiter) -> Self {
        Self { inner, limiter }
    }

    pub fn limiter(&self) -> &SharedRateLimiter {
        &self.limiter
    }
}

#[async_trait]
impl StatementProvider for RateLimitedProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch_statements(&self, company_id: &str, range: &PeriodRange) -> Result<StatementSet, ProviderError> {
        self.limiter.acquire().await;
        self.inner.fetch_statements(company_id, range).await
    }
}
