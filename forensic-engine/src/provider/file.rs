//! Providers backed by JSON files, one per company.
//!
//! `<dir>/<company_id>.json` holds a [`StatementSet`] for statements, or an
//! [`ExternalSignals`] object for signals.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{ExternalSignals, ProviderError, SignalProvider, StatementProvider};
use crate::statement::{PeriodRange, StatementSet};

fn company_file(dir: &Path, company_id: &str) -> Result<PathBuf, ProviderError> {
    let valid = !company_id.is_empty()
        && company_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !company_id.starts_with('.');
    if !valid {
        return Err(ProviderError::InvalidData(format!("invalid company id '{company_id}'")));
    }
    Ok(dir.join(format!("{company_id}.json")))
}

async fn read_company_file(dir: &Path, company_id: &str) -> Result<Option<String>, ProviderError> {
    let path = company_file(dir, company_id)?;
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ProviderError::Unavailable(format!("{}: {}", path.display(), e))),
    }
}

/// Reads statements from `<dir>/<company_id>.json`.
#[derive(Debug, Clone)]
pub struct FileStatementProvider {
    dir: PathBuf,
}

impl FileStatementProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl StatementProvider for FileStatementProvider {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch_statements(&self, company_id: &str, range: &PeriodRange) -> Result<StatementSet, ProviderError> {
        let content = read_company_file(&self.dir, company_id)
            .await?
            .ok_or_else(|| ProviderError::NotFound(company_id.to_string()))?;

        let mut set: StatementSet =
            serde_json::from_str(&content).map_err(|e| ProviderError::InvalidData(e.to_string()))?;
        let total = set.statements.len();
        set.statements.retain(|s| range.contains(s.period().end_date));

        debug!(
            company_id,
            total,
            in_range = set.statements.len(),
            "Loaded statements from file"
        );
        Ok(set)
    }
}

/// Reads signals from `<dir>/<company_id>.json`; a missing file means no signals.
#[derive(Debug, Clone)]
pub struct FileSignalProvider {
    dir: PathBuf,
}

impl FileSignalProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SignalProvider for FileSignalProvider {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch_signals(&self, company_id: &str) -> Result<Option<ExternalSignals>, ProviderError> {
        match read_company_file(&self.dir, company_id).await? {
            Some(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| ProviderError::InvalidData(e.to_string())),
            None => Ok(None),
        }
    }
}
