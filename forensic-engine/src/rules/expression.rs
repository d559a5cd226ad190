//! Expression evaluation over a job's metric set.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

use super::parser::{BinaryOperator, Expr, UnaryOperator};

/// Evaluation error types.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    /// Metric is known but has no value for this job
    #[error("Metric has no value: {0}")]
    MissingMetric(String),
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Result is not a finite number")]
    NonFinite,
}

/// Evaluation result type alias.
pub type EvalResult<T> = Result<T, EvalError>;

/// A runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    String(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
        }
    }

    fn as_number(&self) -> EvalResult<f64> {
        match self {
            Value::Number(n) => Ok(*n),
            other => Err(EvalError::TypeError(format!(
                "expected number, got {}",
                other.type_name()
            ))),
        }
    }

    fn as_bool(&self) -> EvalResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(EvalError::TypeError(format!(
                "expected bool, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Metric values available to rules for one job.
///
/// A metric present with `None` is known but could not be computed
/// (missing line item, indeterminate score...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricSet {
    values: HashMap<String, Option<Value>>,
    disclosures: Option<BTreeSet<String>>,
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Option<Value>) {
        self.values.insert(name.into(), value);
    }

    pub fn insert_number(&mut self, name: impl Into<String>, value: Option<f64>) {
        self.insert(name, value.map(Value::Number));
    }

    pub fn insert_bool(&mut self, name: impl Into<String>, value: Option<bool>) {
        self.insert(name, value.map(Value::Bool));
    }

    pub fn insert_string(&mut self, name: impl Into<String>, value: Option<String>) {
        self.insert(name, value.map(Value::String));
    }

    /// Disclosures present in the filing; `None` when the filing is unknown.
    pub fn set_disclosures(&mut self, disclosures: Option<BTreeSet<String>>) {
        self.disclosures = disclosures;
    }

    pub fn get(&self, name: &str) -> Option<&Option<Value>> {
        self.values.get(name)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(Some(Value::Number(n))) => Some(*n),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values of the given metrics, for finding evidence.
    pub fn evidence<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> BTreeMap<String, Option<Value>> {
        names
            .into_iter()
            .map(|name| (name.clone(), self.values.get(name).cloned().flatten()))
            .collect()
    }

    fn resolve(&self, name: &str) -> EvalResult<Value> {
        match self.values.get(name) {
            Some(Some(value)) => Ok(value.clone()),
            Some(None) => Err(EvalError::MissingMetric(name.to_string())),
            None => Err(EvalError::UnknownMetric(name.to_string())),
        }
    }

    fn disclosed(&self, name: &str) -> EvalResult<bool> {
        match &self.disclosures {
            Some(set) => Ok(set.contains(name)),
            None => Err(EvalError::MissingMetric(format!("disclosed({name})"))),
        }
    }
}

/// Evaluate an expression.
pub fn evaluate(expr: &Expr, metrics: &MetricSet) -> EvalResult<Value> {
    match expr {
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::String(s) => Ok(Value::String(s.clone())),
        Expr::Metric(name) => metrics.resolve(name),
        Expr::UnaryOp { op, expr } => {
            let value = evaluate(expr, metrics)?;
            match op {
                UnaryOperator::Not => Ok(Value::Bool(!value.as_bool()?)),
                UnaryOperator::Neg => Ok(Value::Number(-value.as_number()?)),
            }
        }
        Expr::BinaryOp { left, op, right } => evaluate_binary(left, *op, right, metrics),
        Expr::FunctionCall { name, args } => evaluate_call(name, args, metrics),
    }
}

/// Evaluate an expression that must produce a boolean.
pub fn evaluate_bool(expr: &Expr, metrics: &MetricSet) -> EvalResult<bool> {
    evaluate(expr, metrics)?.as_bool()
}

/// Evaluate an expression that must produce a finite number.
pub fn evaluate_number(expr: &Expr, metrics: &MetricSet) -> EvalResult<f64> {
    let n = evaluate(expr, metrics)?.as_number()?;
    if n.is_finite() {
        Ok(n)
    } else {
        Err(EvalError::NonFinite)
    }
}

fn evaluate_binary(left: &Expr, op: BinaryOperator, right: &Expr, metrics: &MetricSet) -> EvalResult<Value> {
    // Logical operators short-circuit
    if op.is_logical() {
        let l = evaluate_bool(left, metrics)?;
        return match (op, l) {
            (BinaryOperator::And, false) => Ok(Value::Bool(false)),
            (BinaryOperator::Or, true) => Ok(Value::Bool(true)),
            _ => Ok(Value::Bool(evaluate_bool(right, metrics)?)),
        };
    }

    let l = evaluate(left, metrics)?;
    let r = evaluate(right, metrics)?;

    if op.is_arithmetic() {
        let (a, b) = (l.as_number()?, r.as_number()?);
        let result = match op {
            BinaryOperator::Add => a + b,
            BinaryOperator::Sub => a - b,
            BinaryOperator::Mul => a * b,
            BinaryOperator::Div => {
                if b == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                a / b
            }
            _ => unreachable!("non-arithmetic operator"),
        };
        if !result.is_finite() {
            return Err(EvalError::NonFinite);
        }
        return Ok(Value::Number(result));
    }

    let result = match (op, &l, &r) {
        (BinaryOperator::Eq, _, _) => values_equal(&l, &r)?,
        (BinaryOperator::Ne, _, _) => !values_equal(&l, &r)?,
        (_, Value::Number(a), Value::Number(b)) => match op {
            BinaryOperator::Lt => a < b,
            BinaryOperator::Le => a <= b,
            BinaryOperator::Gt => a > b,
            BinaryOperator::Ge => a >= b,
            _ => unreachable!("non-ordering operator"),
        },
        _ => {
            return Err(EvalError::TypeError(format!(
                "cannot order {} and {}",
                l.type_name(),
                r.type_name()
            )))
        }
    };

    Ok(Value::Bool(result))
}

fn values_equal(l: &Value, r: &Value) -> EvalResult<bool> {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => Ok(a == b),
        (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
        (Value::String(a), Value::String(b)) => Ok(a == b),
        _ => Err(EvalError::TypeError(format!(
            "cannot compare {} and {}",
            l.type_name(),
            r.type_name()
        ))),
    }
}

fn evaluate_call(name: &str, args: &[Expr], metrics: &MetricSet) -> EvalResult<Value> {
    match (name, args) {
        ("disclosed", [arg]) => match evaluate(arg, metrics)? {
            Value::String(s) => Ok(Value::Bool(metrics.disclosed(&s)?)),
            other => Err(EvalError::TypeError(format!(
                "disclosed() expects a string, got {}",
                other.type_name()
            ))),
        },
        ("abs", [arg]) => Ok(Value::Number(evaluate(arg, metrics)?.as_number()?.abs())),
        ("min", [a, b]) => {
            let (a, b) = (evaluate(a, metrics)?.as_number()?, evaluate(b, metrics)?.as_number()?);
            Ok(Value::Number(a.min(b)))
        }
        ("max", [a, b]) => {
            let (a, b) = (evaluate(a, metrics)?.as_number()?, evaluate(b, metrics)?.as_number()?);
            Ok(Value::Number(a.max(b)))
        }
        _ => Err(EvalError::UnknownFunction(format!("{}/{}", name, args.len()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::parser::parse_expression;

    fn metrics() -> MetricSet {
        let mut m = MetricSet::new();
        m.insert_number("current_ratio", Some(0.8));
        m.insert_number("revenue", Some(1000.0));
        m.insert_number("zero", Some(0.0));
        m.insert_number("inventory", None);
        m.insert_bool("m_flagged", Some(true));
        m.insert_string("z_band", Some("grey".into()));
        m.set_disclosures(Some(["auditor_report".to_string()].into_iter().collect()));
        m
    }

    fn eval(src: &str) -> EvalResult<Value> {
        evaluate(&parse_expression(src).unwrap(), &metrics())
    }

    #[test]
    fn test_comparison_and_logic() {
        assert_eq!(eval("current_ratio < 1.0 && revenue > 500"), Ok(Value::Bool(true)));
        assert_eq!(eval("current_ratio > 1.0 OR NOT m_flagged"), Ok(Value::Bool(false)));
        assert_eq!(eval("z_band == 'grey'"), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("revenue * 0.1 + 5"), Ok(Value::Number(105.0)));
        assert_eq!(eval("-current_ratio"), Ok(Value::Number(-0.8)));
        assert_eq!(eval("revenue / zero"), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn test_missing_metric() {
        assert_eq!(eval("inventory > 0"), Err(EvalError::MissingMetric("inventory".into())));
        assert_eq!(eval("nope > 0"), Err(EvalError::UnknownMetric("nope".into())));
    }

    #[test]
    fn test_short_circuit_skips_missing_metric() {
        assert_eq!(eval("revenue < 0 && inventory > 0"), Ok(Value::Bool(false)));
        assert_eq!(eval("revenue > 0 || inventory > 0"), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_functions() {
        assert_eq!(eval("disclosed('auditor_report')"), Ok(Value::Bool(true)));
        assert_eq!(eval("disclosed('related_party')"), Ok(Value::Bool(false)));
        assert_eq!(eval("abs(-current_ratio)"), Ok(Value::Number(0.8)));
        assert_eq!(eval("max(revenue, 2000)"), Ok(Value::Number(2000.0)));
        assert!(matches!(eval("foo(1)"), Err(EvalError::UnknownFunction(_))));
    }

    #[test]
    fn test_disclosed_without_filing_is_missing() {
        let mut m = MetricSet::new();
        m.set_disclosures(None);
        let expr = parse_expression("disclosed('x')").unwrap();
        assert!(matches!(evaluate(&expr, &m), Err(EvalError::MissingMetric(_))));
    }

    #[test]
    fn test_type_errors() {
        assert!(matches!(eval("revenue && m_flagged"), Err(EvalError::TypeError(_))));
        assert!(matches!(eval("z_band > 1"), Err(EvalError::TypeError(_))));
    }

    #[test]
    fn test_evidence() {
        let m = metrics();
        let names = vec!["current_ratio".to_string(), "inventory".to_string()];
        let evidence = m.evidence(&names);
        assert_eq!(evidence["current_ratio"], Some(Value::Number(0.8)));
        assert_eq!(evidence["inventory"], None);
    }
}
