//! Rule definitions, findings and the shared rule evaluator.
//!
//! Anomaly and compliance rules share one shape: an id, a boolean condition
//! over metrics, a severity and a description. Every rule whose condition
//! holds produces a [`Finding`]. Rules never depend on each other.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::rules::{CompiledExpr, EvalError, MetricRegistry, MetricSet, RuleValidationError, Value, ValueType};

/// Finding severity, ordered LOW < MEDIUM < HIGH < CRITICAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Which evaluator a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Anomaly,
    Compliance,
}

/// A configured anomaly or compliance rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleDefinition {
    pub id: String,
    pub condition: String,
    pub severity: Severity,
    pub description: String,
}

impl RuleDefinition {
    pub fn new(id: &str, condition: &str, severity: Severity, description: &str) -> Self {
        Self {
            id: id.into(),
            condition: condition.into(),
            severity,
            description: description.into(),
        }
    }
}

/// A rule with its parsed condition.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: String,
    pub kind: RuleKind,
    pub condition: CompiledExpr,
    pub severity: Severity,
    pub description: String,
}

/// Compile a rule list, rejecting duplicate ids and non-boolean conditions.
pub fn compile_rules(
    definitions: &[RuleDefinition],
    kind: RuleKind,
    registry: &MetricRegistry,
) -> Result<Vec<CompiledRule>, Vec<RuleValidationError>> {
    let mut seen = HashSet::new();
    let mut errors = Vec::new();
    let mut compiled = Vec::with_capacity(definitions.len());

    for def in definitions {
        if def.id.trim().is_empty() {
            errors.push(RuleValidationError::InvalidValue {
                field: format!("{:?} rule", kind).to_lowercase(),
                reason: "rule id must not be empty".into(),
            });
            continue;
        }
        if !seen.insert(def.id.as_str()) {
            errors.push(RuleValidationError::DuplicateId(def.id.clone()));
            continue;
        }
        match CompiledExpr::compile(&def.id, &def.condition, registry, ValueType::Bool) {
            Ok(condition) => compiled.push(CompiledRule {
                id: def.id.clone(),
                kind,
                condition,
                severity: def.severity,
                description: def.description.clone(),
            }),
            Err(e) => errors.push(e),
        }
    }

    if errors.is_empty() {
        Ok(compiled)
    } else {
        Err(errors)
    }
}

/// A rule that fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub rule_id: String,
    pub kind: RuleKind,
    pub severity: Severity,
    pub description: String,
    /// Values of the metrics the rule references
    pub evidence: BTreeMap<String, Option<Value>>,
    pub rule_version: String,
}

/// A rule that could not be evaluated for this job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRule {
    pub rule_id: String,
    pub reason: String,
}

/// Findings plus the rules that were skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub findings: Vec<Finding>,
    pub skipped: Vec<SkippedRule>,
}

impl RuleOutcome {
    pub fn count_by_severity(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for finding in &self.findings {
            *counts.entry(finding.severity).or_insert(0) += 1;
        }
        counts
    }
}

/// Sort by severity descending, ties broken by rule id.
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.rule_id.cmp(&b.rule_id)));
}

/// Evaluates a list of compiled rules against a metric set.
pub struct RuleEvaluator<'a> {
    rules: &'a [CompiledRule],
    version: &'a str,
}

impl<'a> RuleEvaluator<'a> {
    pub fn new(rules: &'a [CompiledRule], version: &'a str) -> Self {
        Self { rules, version }
    }

    pub fn evaluate(&self, metrics: &MetricSet) -> RuleOutcome {
        let mut outcome = RuleOutcome::default();

        for rule in self.rules {
            match rule.condition.evaluate_bool(metrics) {
                Ok(true) => {
                    let mut evidence = metrics.evidence(rule.condition.metrics());
                    collect_disclosure_evidence(rule, metrics, &mut evidence);
                    outcome.findings.push(Finding {
                        rule_id: rule.id.clone(),
                        kind: rule.kind,
                        severity: rule.severity,
                        description: rule.description.clone(),
                        evidence,
                        rule_version: self.version.to_string(),
                    });
                }
                Ok(false) => {}
                Err(EvalError::MissingMetric(metric)) => {
                    tracing::debug!(rule_id = %rule.id, metric = %metric, "Rule skipped: metric has no value");
                    outcome.skipped.push(SkippedRule {
                        rule_id: rule.id.clone(),
                        reason: format!("missing metric: {metric}"),
                    });
                }
                Err(err) => {
                    tracing::debug!(rule_id = %rule.id, error = %err, "Rule skipped");
                    outcome.skipped.push(SkippedRule {
                        rule_id: rule.id.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        sort_findings(&mut outcome.findings);
        outcome
    }
}

fn collect_disclosure_evidence(rule: &CompiledRule, metrics: &MetricSet, evidence: &mut BTreeMap<String, Option<Value>>) {
    use crate::rules::parser::Expr;

    fn walk(expr: &Expr, metrics: &MetricSet, evidence: &mut BTreeMap<String, Option<Value>>) {
        match expr {
            Expr::FunctionCall { name, args } if name == "disclosed" => {
                if let [Expr::String(disclosure)] = args.as_slice() {
                    let value = crate::rules::evaluate(expr, metrics).ok();
                    evidence.insert(format!("disclosed({disclosure})"), value);
                }
            }
            Expr::FunctionCall { args, .. } => args.iter().for_each(|a| walk(a, metrics, evidence)),
            Expr::BinaryOp { left, right, .. } => {
                walk(left, metrics, evidence);
                walk(right, metrics, evidence);
            }
            Expr::UnaryOp { expr, .. } => walk(expr, metrics, evidence),
            _ => {}
        }
    }

    walk(rule.condition.expr(), metrics, evidence);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(defs: &[RuleDefinition]) -> Vec<CompiledRule> {
        let registry = MetricRegistry::analysis(["current_ratio"]);
        compile_rules(defs, RuleKind::Anomaly, &registry).unwrap()
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"CRITICAL\"");
    }

    #[test]
    fn test_findings_sorted_by_severity_then_id() {
        let compiled = rules(&[
            RuleDefinition::new("b_rule", "revenue > 0", Severity::High, "b"),
            RuleDefinition::new("c_rule", "revenue > 0", Severity::Low, "c"),
            RuleDefinition::new("a_rule", "revenue > 0", Severity::High, "a"),
            RuleDefinition::new("d_rule", "revenue > 0", Severity::Critical, "d"),
            RuleDefinition::new("quiet", "revenue < 0", Severity::Critical, "never"),
        ]);
        let mut metrics = MetricSet::new();
        metrics.insert_number("revenue", Some(10.0));

        let outcome = RuleEvaluator::new(&compiled, "v1").evaluate(&metrics);
        let ids: Vec<_> = outcome.findings.iter().map(|f| f.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["d_rule", "a_rule", "b_rule", "c_rule"]);
        assert_eq!(outcome.findings[0].rule_version, "v1");
        assert_eq!(outcome.findings[0].evidence["revenue"], Some(Value::Number(10.0)));
    }

    #[test]
    fn test_missing_metric_skips_rule() {
        let compiled = rules(&[RuleDefinition::new("low_liq", "current_ratio < 1", Severity::High, "x")]);
        let mut metrics = MetricSet::new();
        metrics.insert_number("current_ratio", None);

        let outcome = RuleEvaluator::new(&compiled, "v1").evaluate(&metrics);
        assert!(outcome.findings.is_empty());
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].reason, "missing metric: current_ratio");
    }

    #[test]
    fn test_disclosure_evidence() {
        let registry = MetricRegistry::analysis(std::iter::empty());
        let compiled = compile_rules(
            &[RuleDefinition::new(
                "no_auditor",
                "NOT disclosed('auditor_report')",
                Severity::Critical,
                "x",
            )],
            RuleKind::Compliance,
            &registry,
        )
        .unwrap();
        let mut metrics = MetricSet::new();
        metrics.set_disclosures(Some(Default::default()));

        let outcome = RuleEvaluator::new(&compiled, "v1").evaluate(&metrics);
        assert_eq!(outcome.findings.len(), 1);
        assert_eq!(
            outcome.findings[0].evidence["disclosed(auditor_report)"],
            Some(Value::Bool(false))
        );
        assert_eq!(outcome.findings[0].kind, RuleKind::Compliance);
    }

    #[test]
    fn test_duplicate_and_malformed_rules_rejected() {
        let registry = MetricRegistry::analysis(std::iter::empty());
        let errors = compile_rules(
            &[
                RuleDefinition::new("r1", "revenue > 0", Severity::Low, ""),
                RuleDefinition::new("r1", "revenue > 1", Severity::Low, ""),
                RuleDefinition::new("r2", "revenue +", Severity::Low, ""),
                RuleDefinition::new("r3", "unknown_metric > 1", Severity::Low, ""),
                RuleDefinition::new("r4", "revenue", Severity::Low, ""),
            ],
            RuleKind::Anomaly,
            &registry,
        )
        .unwrap_err();

        assert_eq!(errors.len(), 4);
        assert!(matches!(errors[0], RuleValidationError::DuplicateId(_)));
        assert!(matches!(errors[1], RuleValidationError::Parse { .. }));
        assert!(matches!(errors[2], RuleValidationError::UnknownMetric { .. }));
        assert!(matches!(errors[3], RuleValidationError::TypeMismatch { .. }));
    }
}
