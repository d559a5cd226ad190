//! Rule expression language.
//!
//! Ratio formulas, scoring factors and anomaly/compliance conditions are all
//! written in one small expression language:
//!
//! ```text
//! current_ratio < 1.0 AND receivables_growth > revenue_growth * 1.5
//! filing_delay_days > 60 || NOT disclosed("auditor_report")
//! (current_assets - current_liabilities) / total_assets
//! ```
//!
//! Expressions are parsed once when a rule set is loaded and checked against
//! a [`MetricRegistry`]; unknown metrics, unknown functions and type errors
//! are rejected there, never at evaluation time.

pub mod expression;
pub mod parser;
pub mod registry;

pub use expression::{evaluate, evaluate_bool, evaluate_number, EvalError, MetricSet, Value};
pub use parser::{parse_expression, Expr, ParseError};
pub use registry::{MetricRegistry, ValueType};

use std::collections::BTreeSet;
use thiserror::Error;

/// A rule or formula rejected at load time.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuleValidationError {
    #[error("{rule}: cannot parse expression: {source}")]
    Parse {
        rule: String,
        #[source]
        source: ParseError,
    },

    #[error("{rule}: unknown metric '{metric}'")]
    UnknownMetric { rule: String, metric: String },

    #[error("{rule}: unknown function '{function}'")]
    UnknownFunction { rule: String, function: String },

    #[error("{rule}: expected {expected}, found {found} ({context})")]
    TypeMismatch {
        rule: String,
        expected: ValueType,
        found: ValueType,
        context: String,
    },

    #[error("duplicate rule id '{0}'")]
    DuplicateId(String),

    #[error("{field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// A parsed, type-checked expression.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    source: String,
    expr: Expr,
    metrics: BTreeSet<String>,
}

impl CompiledExpr {
    /// Parse `source` and require it to have type `expected`.
    pub fn compile(
        rule: &str,
        source: &str,
        registry: &MetricRegistry,
        expected: ValueType,
    ) -> Result<Self, RuleValidationError> {
        let expr = parse_expression(source).map_err(|e| RuleValidationError::Parse {
            rule: rule.to_string(),
            source: e,
        })?;

        let found = registry.infer(rule, &expr)?;
        if found != expected {
            return Err(RuleValidationError::TypeMismatch {
                rule: rule.to_string(),
                expected,
                found,
                context: "expression result".into(),
            });
        }

        let metrics = expr.metrics();
        Ok(Self {
            source: source.to_string(),
            expr,
            metrics,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Metrics referenced by the expression.
    pub fn metrics(&self) -> &BTreeSet<String> {
        &self.metrics
    }

    pub fn evaluate_bool(&self, metrics: &MetricSet) -> Result<bool, EvalError> {
        evaluate_bool(&self.expr, metrics)
    }

    pub fn evaluate_number(&self, metrics: &MetricSet) -> Result<f64, EvalError> {
        evaluate_number(&self.expr, metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_boolean_condition() {
        let registry = MetricRegistry::analysis(["current_ratio"]);
        let compiled =
            CompiledExpr::compile("low_liquidity", "current_ratio < 1.0", &registry, ValueType::Bool).unwrap();
        assert_eq!(compiled.source(), "current_ratio < 1.0");
        assert!(compiled.metrics().contains("current_ratio"));

        let mut metrics = MetricSet::new();
        metrics.insert_number("current_ratio", Some(0.5));
        assert_eq!(compiled.evaluate_bool(&metrics), Ok(true));
    }

    #[test]
    fn test_compile_rejects_non_boolean_condition() {
        let registry = MetricRegistry::analysis(std::iter::empty());
        let err = CompiledExpr::compile("r1", "revenue * 2", &registry, ValueType::Bool).unwrap_err();
        assert!(matches!(
            err,
            RuleValidationError::TypeMismatch {
                expected: ValueType::Bool,
                found: ValueType::Number,
                ..
            }
        ));
    }

    #[test]
    fn test_compile_rejects_unparseable() {
        let registry = MetricRegistry::analysis(std::iter::empty());
        let err = CompiledExpr::compile("r1", "revenue >", &registry, ValueType::Bool).unwrap_err();
        assert!(matches!(err, RuleValidationError::Parse { .. }));
        assert!(err.to_string().starts_with("r1:"));
    }
}
