//! Normalized financial statements.
//!
//! A [`NormalizedStatement`] is one fiscal period's line items keyed by
//! canonical field name. Statements are immutable once built; analysis
//! stages only ever read them.
//!
//! # Canonical Fields
//!
//! | Section | Fields |
//! |---------|--------|
//! | Balance sheet | total_assets, current_assets, cash, receivables, inventory, securities, ppe_net, total_liabilities, current_liabilities, long_term_debt, total_equity, retained_earnings |
//! | Income statement | revenue, cost_of_revenue, gross_profit, sga_expense, depreciation, ebit, interest_expense, net_income |
//! | Cash flow | operating_cash_flow, investing_cash_flow, financing_cash_flow, capital_expenditure |

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Statement section a canonical field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    BalanceSheet,
    IncomeStatement,
    CashFlow,
}

/// Canonical line items and their sections.
pub const CANONICAL_FIELDS: &[(&str, Section)] = &[
    ("total_assets", Section::BalanceSheet),
    ("current_assets", Section::BalanceSheet),
    ("cash", Section::BalanceSheet),
    ("receivables", Section::BalanceSheet),
    ("inventory", Section::BalanceSheet),
    ("securities", Section::BalanceSheet),
    ("ppe_net", Section::BalanceSheet),
    ("total_liabilities", Section::BalanceSheet),
    ("current_liabilities", Section::BalanceSheet),
    ("long_term_debt", Section::BalanceSheet),
    ("total_equity", Section::BalanceSheet),
    ("retained_earnings", Section::BalanceSheet),
    ("revenue", Section::IncomeStatement),
    ("cost_of_revenue", Section::IncomeStatement),
    ("gross_profit", Section::IncomeStatement),
    ("sga_expense", Section::IncomeStatement),
    ("depreciation", Section::IncomeStatement),
    ("ebit", Section::IncomeStatement),
    ("interest_expense", Section::IncomeStatement),
    ("net_income", Section::IncomeStatement),
    ("operating_cash_flow", Section::CashFlow),
    ("investing_cash_flow", Section::CashFlow),
    ("financing_cash_flow", Section::CashFlow),
    ("capital_expenditure", Section::CashFlow),
];

/// Section of a canonical field, `None` for non-canonical names.
pub fn section_of(field: &str) -> Option<Section> {
    CANONICAL_FIELDS
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, section)| *section)
}

/// Iterate canonical field names.
pub fn canonical_field_names() -> impl Iterator<Item = &'static str> {
    CANONICAL_FIELDS.iter().map(|(name, _)| *name)
}

/// Reporting scope of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatementScope {
    #[default]
    Consolidated,
    Standalone,
}

/// A fiscal period identified by a label and its closing date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalPeriod {
    /// e.g. "FY2024"
    pub label: String,
    pub end_date: NaiveDate,
}

/// Data problems found while assembling statements.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StatementError {
    #[error("No statements available for {company_id}")]
    Empty { company_id: String },

    #[error("Statements mix companies: {expected} and {found}")]
    CompanyMismatch { expected: String, found: String },

    #[error("Duplicate statements for period ending {0}")]
    DuplicatePeriod(NaiveDate),

    #[error("Line item {field} is not a finite number")]
    NonFinite { field: String },

    #[error("Invalid period range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
}

/// One fiscal period's line items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedStatement {
    company_id: String,
    period: FiscalPeriod,
    #[serde(default)]
    scope: StatementScope,
    source: String,
    line_items: BTreeMap<String, f64>,
}

impl NormalizedStatement {
    /// Build a statement, rejecting NaN or infinite line items.
    pub fn new(
        company_id: impl Into<String>,
        period: FiscalPeriod,
        scope: StatementScope,
        source: impl Into<String>,
        line_items: BTreeMap<String, f64>,
    ) -> Result<Self, StatementError> {
        let statement = Self {
            company_id: company_id.into(),
            period,
            scope,
            source: source.into(),
            line_items,
        };
        statement.check_finite()?;
        Ok(statement)
    }

    /// Reject NaN/infinite values (needed after deserialization too).
    pub fn check_finite(&self) -> Result<(), StatementError> {
        match self.line_items.iter().find(|(_, v)| !v.is_finite()) {
            Some((field, _)) => Err(StatementError::NonFinite {
                field: field.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn company_id(&self) -> &str {
        &self.company_id
    }

    pub fn period(&self) -> &FiscalPeriod {
        &self.period
    }

    pub fn scope(&self) -> StatementScope {
        self.scope
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Value of a line item, if reported.
    pub fn get(&self, field: &str) -> Option<f64> {
        self.line_items.get(field).copied()
    }

    pub fn line_items(&self) -> &BTreeMap<String, f64> {
        &self.line_items
    }

    /// total_assets − (total_liabilities + total_equity), when all three exist.
    pub fn balance_gap(&self) -> Option<f64> {
        let assets = self.get("total_assets")?;
        let liabilities = self.get("total_liabilities")?;
        let equity = self.get("total_equity")?;
        Some(assets - (liabilities + equity))
    }

    /// Check the accounting equation against an absolute tolerance.
    pub fn check_balance(&self, tolerance: f64) -> BalanceCheck {
        match self.balance_gap() {
            Some(gap) => BalanceCheck {
                period: self.period.label.clone(),
                gap: Some(gap),
                balanced: Some(gap.abs() <= tolerance),
            },
            None => BalanceCheck {
                period: self.period.label.clone(),
                gap: None,
                balanced: None,
            },
        }
    }
}

/// Outcome of the assets = liabilities + equity check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceCheck {
    pub period: String,
    pub gap: Option<f64>,
    /// `None` when a required total is missing
    pub balanced: Option<bool>,
}

/// Filing facts used by compliance rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FilingMetadata {
    /// Date the statements were filed with the regulator
    #[serde(default)]
    pub filed_on: Option<NaiveDate>,
    /// Names of disclosures present in the filing
    #[serde(default)]
    pub disclosures: BTreeSet<String>,
}

impl FilingMetadata {
    pub fn has_disclosure(&self, name: &str) -> bool {
        self.disclosures.contains(name)
    }
}

/// Statements returned by a provider for a company and period range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementSet {
    pub statements: Vec<NormalizedStatement>,
    #[serde(default)]
    pub filing: Option<FilingMetadata>,
}

impl StatementSet {
    /// Keep the two most recent periods: latest is current, the one before is prior.
    pub fn into_pair(self, company_id: &str) -> Result<StatementPair, StatementError> {
        let mut statements = self.statements;

        for statement in &statements {
            statement.check_finite()?;
            if statement.company_id != company_id {
                return Err(StatementError::CompanyMismatch {
                    expected: company_id.to_string(),
                    found: statement.company_id.clone(),
                });
            }
        }

        statements.sort_by_key(|s| s.period.end_date);
        for window in statements.windows(2) {
            if window[0].period.end_date == window[1].period.end_date {
                return Err(StatementError::DuplicatePeriod(window[0].period.end_date));
            }
        }

        let current = statements.pop().ok_or_else(|| StatementError::Empty {
            company_id: company_id.to_string(),
        })?;
        let prior = statements.pop();

        Ok(StatementPair {
            current,
            prior,
            filing: self.filing,
        })
    }
}

/// The current period, the prior period when available, and filing facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementPair {
    pub current: NormalizedStatement,
    pub prior: Option<NormalizedStatement>,
    pub filing: Option<FilingMetadata>,
}

impl StatementPair {
    /// Statements in chronological order.
    pub fn statements(&self) -> Vec<&NormalizedStatement> {
        self.prior.iter().chain(std::iter::once(&self.current)).collect()
    }

    /// Days between period end and filing, when the filing date is known.
    pub fn filing_delay_days(&self) -> Option<i64> {
        let filed_on = self.filing.as_ref()?.filed_on?;
        Some((filed_on - self.current.period.end_date).num_days())
    }
}

/// Requested reporting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PeriodRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, StatementError> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<(), StatementError> {
        if self.start > self.end {
            return Err(StatementError::InvalidRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}
