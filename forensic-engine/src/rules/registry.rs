//! Metric registry: which names rules may reference, and their types.

use serde::Serialize;
use std::collections::BTreeMap;

use super::parser::{BinaryOperator, Expr, UnaryOperator};
use super::RuleValidationError;
use crate::analysis::manipulation::INDEX_NAMES;
use crate::statement::canonical_field_names;

/// Static type of a metric or expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Bool,
    Number,
    String,
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueType::Bool => write!(f, "bool"),
            ValueType::Number => write!(f, "number"),
            ValueType::String => write!(f, "string"),
        }
    }
}

/// Built-in functions: name, argument types, return type.
pub const FUNCTIONS: &[(&str, &[ValueType], ValueType)] = &[
    ("disclosed", &[ValueType::String], ValueType::Bool),
    ("abs", &[ValueType::Number], ValueType::Number),
    ("min", &[ValueType::Number, ValueType::Number], ValueType::Number),
    ("max", &[ValueType::Number, ValueType::Number], ValueType::Number),
];

/// Derived metrics produced by the analysis stages.
pub const ANALYSIS_METRICS: &[(&str, ValueType)] = &[
    ("z_score", ValueType::Number),
    ("z_band", ValueType::String),
    ("m_score", ValueType::Number),
    ("m_flagged", ValueType::Bool),
    ("benford_chi_square", ValueType::Number),
    ("benford_p_value", ValueType::Number),
    ("benford_anomalous", ValueType::Bool),
    ("benford_sample_size", ValueType::Number),
    ("balance_gap", ValueType::Number),
    ("filing_delay_days", ValueType::Number),
];

/// Set of known metric names with their types.
#[derive(Debug, Clone, Default)]
pub struct MetricRegistry {
    metrics: BTreeMap<String, ValueType>,
}

impl MetricRegistry {
    /// Raw line items of both periods: `revenue`, `prior.revenue`.
    ///
    /// This is what ratio and scoring-factor formulas may reference.
    pub fn statement_fields() -> Self {
        let mut registry = Self::default();
        for field in canonical_field_names() {
            registry.register(field, ValueType::Number);
            registry.register(format!("prior.{field}"), ValueType::Number);
        }
        registry
    }

    /// Everything anomaly and compliance rules may reference.
    pub fn analysis<'a>(ratio_names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut registry = Self::statement_fields();
        for field in canonical_field_names() {
            registry.register(format!("{field}_growth"), ValueType::Number);
            registry.register(format!("{field}_pct"), ValueType::Number);
        }
        for name in ratio_names {
            registry.register(name, ValueType::Number);
        }
        for name in INDEX_NAMES {
            registry.register(*name, ValueType::Number);
        }
        for (name, kind) in ANALYSIS_METRICS {
            registry.register(*name, *kind);
        }
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, kind: ValueType) {
        self.metrics.insert(name.into(), kind);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.metrics.contains_key(name)
    }

    pub fn kind_of(&self, name: &str) -> Option<ValueType> {
        self.metrics.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }

    /// Infer the static type of an expression, rejecting unknown names.
    pub fn infer(&self, rule: &str, expr: &Expr) -> Result<ValueType, RuleValidationError> {
        let mismatch = |expected: ValueType, found: ValueType, context: &str| RuleValidationError::TypeMismatch {
            rule: rule.to_string(),
            expected,
            found,
            context: context.to_string(),
        };

        match expr {
            Expr::Bool(_) => Ok(ValueType::Bool),
            Expr::Number(_) => Ok(ValueType::Number),
            Expr::String(_) => Ok(ValueType::String),
            Expr::Metric(name) => self.kind_of(name).ok_or_else(|| RuleValidationError::UnknownMetric {
                rule: rule.to_string(),
                metric: name.clone(),
            }),
            Expr::UnaryOp { op, expr } => {
                let inner = self.infer(rule, expr)?;
                let expected = match op {
                    UnaryOperator::Not => ValueType::Bool,
                    UnaryOperator::Neg => ValueType::Number,
                };
                if inner != expected {
                    return Err(mismatch(expected, inner, "unary operand"));
                }
                Ok(expected)
            }
            Expr::BinaryOp { left, op, right } => {
                let l = self.infer(rule, left)?;
                let r = self.infer(rule, right)?;
                match op {
                    _ if op.is_arithmetic() => {
                        if l != ValueType::Number {
                            return Err(mismatch(ValueType::Number, l, "arithmetic operand"));
                        }
                        if r != ValueType::Number {
                            return Err(mismatch(ValueType::Number, r, "arithmetic operand"));
                        }
                        Ok(ValueType::Number)
                    }
                    _ if op.is_logical() => {
                        if l != ValueType::Bool {
                            return Err(mismatch(ValueType::Bool, l, "logical operand"));
                        }
                        if r != ValueType::Bool {
                            return Err(mismatch(ValueType::Bool, r, "logical operand"));
                        }
                        Ok(ValueType::Bool)
                    }
                    BinaryOperator::Eq | BinaryOperator::Ne => {
                        if l != r {
                            return Err(mismatch(l, r, "equality operand"));
                        }
                        Ok(ValueType::Bool)
                    }
                    _ => {
                        if l != ValueType::Number {
                            return Err(mismatch(ValueType::Number, l, "comparison operand"));
                        }
                        if r != ValueType::Number {
                            return Err(mismatch(ValueType::Number, r, "comparison operand"));
                        }
                        Ok(ValueType::Bool)
                    }
                }
            }
            Expr::FunctionCall { name, args } => {
                let (_, params, ret) = FUNCTIONS
                    .iter()
                    .find(|(n, params, _)| *n == name.as_str() && params.len() == args.len())
                    .ok_or_else(|| RuleValidationError::UnknownFunction {
                        rule: rule.to_string(),
                        function: format!("{}/{}", name, args.len()),
                    })?;
                for (arg, expected) in args.iter().zip(params.iter()) {
                    let found = self.infer(rule, arg)?;
                    if found != *expected {
                        return Err(mismatch(*expected, found, name.as_str()));
                    }
                }
                Ok(*ret)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::parser::parse_expression;

    fn infer(registry: &MetricRegistry, src: &str) -> Result<ValueType, RuleValidationError> {
        registry.infer("r", &parse_expression(src).unwrap())
    }

    #[test]
    fn test_statement_fields_include_prior() {
        let registry = MetricRegistry::statement_fields();
        assert!(registry.contains("revenue"));
        assert!(registry.contains("prior.revenue"));
        assert!(!registry.contains("revenue_growth"));
        assert!(!registry.contains("z_score"));
    }

    #[test]
    fn test_analysis_registry() {
        let registry = MetricRegistry::analysis(["current_ratio"]);
        assert_eq!(registry.kind_of("current_ratio"), Some(ValueType::Number));
        assert_eq!(registry.kind_of("m_flagged"), Some(ValueType::Bool));
        assert_eq!(registry.kind_of("z_band"), Some(ValueType::String));
        assert!(registry.contains("revenue_growth"));
        assert!(registry.contains("dsri"));
    }

    #[test]
    fn test_infer_types() {
        let registry = MetricRegistry::analysis(["current_ratio"]);
        assert_eq!(infer(&registry, "current_ratio < 1"), Ok(ValueType::Bool));
        assert_eq!(infer(&registry, "revenue / total_assets"), Ok(ValueType::Number));
        assert_eq!(infer(&registry, "disclosed('x') || m_flagged"), Ok(ValueType::Bool));
        assert_eq!(infer(&registry, "z_band != 'safe'"), Ok(ValueType::Bool));
    }

    #[test]
    fn test_infer_rejects_unknowns_and_mismatches() {
        let registry = MetricRegistry::analysis(std::iter::empty());
        assert!(matches!(
            infer(&registry, "bogus > 1"),
            Err(RuleValidationError::UnknownMetric { .. })
        ));
        assert!(matches!(
            infer(&registry, "median(revenue) > 1"),
            Err(RuleValidationError::UnknownFunction { .. })
        ));
        assert!(matches!(
            infer(&registry, "abs(revenue, 2)"),
            Err(RuleValidationError::UnknownFunction { .. })
        ));
        assert!(matches!(
            infer(&registry, "revenue + m_flagged"),
            Err(RuleValidationError::TypeMismatch { .. })
        ));
        assert!(matches!(
            infer(&registry, "z_band == 1"),
            Err(RuleValidationError::TypeMismatch { .. })
        ));
    }
}
