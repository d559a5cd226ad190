//! Rule set definition and load-time compilation.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::analysis::anomaly::default_anomaly_rules;
use crate::analysis::bankruptcy::{BankruptcyConfig, CompiledBankruptcy};
use crate::analysis::benford::DigitTestConfig;
use crate::analysis::compliance::default_compliance_rules;
use crate::analysis::findings::{compile_rules, CompiledRule, RuleDefinition, RuleKind};
use crate::analysis::manipulation::ManipulationConfig;
use crate::analysis::ratios::{default_ratios, CompiledRatio, RatioDefinition};
use crate::analysis::risk::RiskConfig;
use crate::analysis::subscores::SubscoreConfig;
use crate::rules::{MetricRegistry, RuleValidationError};
use crate::statement::section_of;

/// Every tunable rule, threshold and coefficient.
///
/// Loaded from `rules.json` (merged with `rules.<environment>.json`); any
/// section left out takes its built-in default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleSet {
    /// Version tag stamped on every finding and job
    #[serde(default = "default_version")]
    pub version: String,

    /// Absolute tolerance for assets = liabilities + equity
    #[serde(default = "default_balance_tolerance")]
    pub balance_tolerance: f64,

    #[serde(default = "default_ratios")]
    pub ratios: Vec<RatioDefinition>,

    #[serde(default)]
    pub digit_test: DigitTestConfig,

    #[serde(default)]
    pub bankruptcy: BankruptcyConfig,

    #[serde(default)]
    pub manipulation: ManipulationConfig,

    #[serde(default = "default_anomaly_rules")]
    pub anomaly_rules: Vec<RuleDefinition>,

    #[serde(default = "default_compliance_rules")]
    pub compliance_rules: Vec<RuleDefinition>,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub subscores: SubscoreConfig,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            version: default_version(),
            balance_tolerance: default_balance_tolerance(),
            ratios: default_ratios(),
            digit_test: DigitTestConfig::default(),
            bankruptcy: BankruptcyConfig::default(),
            manipulation: ManipulationConfig::default(),
            anomaly_rules: default_anomaly_rules(),
            compliance_rules: default_compliance_rules(),
            risk: RiskConfig::default(),
            subscores: SubscoreConfig::default(),
        }
    }
}

fn default_version() -> String {
    "builtin-1".into()
}

fn default_balance_tolerance() -> f64 {
    1.0
}

/// A rule set with every expression parsed and checked.
#[derive(Debug, Clone)]
pub struct CompiledRules {
    pub version: String,
    pub balance_tolerance: f64,
    pub ratios: Vec<CompiledRatio>,
    pub digit_test: DigitTestConfig,
    pub bankruptcy: CompiledBankruptcy,
    pub manipulation: ManipulationConfig,
    pub anomaly_rules: Vec<CompiledRule>,
    pub compliance_rules: Vec<CompiledRule>,
    pub risk: RiskConfig,
    pub subscores: SubscoreConfig,
}

impl RuleSet {
    /// Compile everything, reporting every problem found.
    pub fn compile(&self) -> Result<CompiledRules, Vec<RuleValidationError>> {
        let mut errors = Vec::new();
        let invalid = |field: &str, reason: String| RuleValidationError::InvalidValue {
            field: field.into(),
            reason,
        };

        if self.version.trim().is_empty() {
            errors.push(invalid("version", "must not be empty".into()));
        }
        if !self.balance_tolerance.is_finite() || self.balance_tolerance < 0.0 {
            errors.push(invalid("balance_tolerance", "must be a non-negative number".into()));
        }

        // Ratios
        let base_metrics = MetricRegistry::analysis(std::iter::empty());
        let mut ratio_names = HashSet::new();
        let mut ratios = Vec::with_capacity(self.ratios.len());
        for def in &self.ratios {
            if !ratio_names.insert(def.name.as_str()) {
                errors.push(RuleValidationError::DuplicateId(def.name.clone()));
                continue;
            }
            if base_metrics.contains(&def.name) {
                errors.push(invalid(
                    &format!("ratios.{}", def.name),
                    "name collides with a built-in metric".into(),
                ));
                continue;
            }
            match def.compile() {
                Ok(ratio) => ratios.push(ratio),
                Err(e) => errors.push(e),
            }
        }

        // Digit test
        if self.digit_test.fields.is_empty() {
            errors.push(invalid("digit_test.fields", "at least one field is required".into()));
        }
        for field in &self.digit_test.fields {
            if section_of(field).is_none() {
                errors.push(RuleValidationError::UnknownMetric {
                    rule: "digit_test".into(),
                    metric: field.clone(),
                });
            }
        }
        if self.digit_test.min_samples == 0 {
            errors.push(invalid("digit_test.min_samples", "must be greater than 0".into()));
        }
        if !(self.digit_test.critical_value.is_finite() && self.digit_test.critical_value > 0.0) {
            errors.push(invalid("digit_test.critical_value", "must be a positive number".into()));
        }

        // Scorers
        let bankruptcy = self.bankruptcy.compile().map_err(|e| errors.push(e)).ok();
        if let Err(e) = self.manipulation.validate() {
            errors.push(e);
        }

        // Rules
        let registry = MetricRegistry::analysis(self.ratios.iter().map(|r| r.name.as_str()));
        let anomaly_rules = compile_rules(&self.anomaly_rules, RuleKind::Anomaly, &registry)
            .map_err(|e| errors.extend(e))
            .ok();
        let compliance_rules = compile_rules(&self.compliance_rules, RuleKind::Compliance, &registry)
            .map_err(|e| errors.extend(e))
            .ok();
        let anomaly_ids: HashSet<&str> = self.anomaly_rules.iter().map(|r| r.id.as_str()).collect();
        for rule in &self.compliance_rules {
            if anomaly_ids.contains(rule.id.as_str()) {
                errors.push(RuleValidationError::DuplicateId(rule.id.clone()));
            }
        }

        // Aggregation
        if let Err(e) = self.risk.validate() {
            errors.extend(e);
        }
        if let Err(e) = self.subscores.validate() {
            errors.extend(e);
        }

        match (bankruptcy, anomaly_rules, compliance_rules) {
            (Some(bankruptcy), Some(anomaly_rules), Some(compliance_rules)) if errors.is_empty() => Ok(CompiledRules {
                version: self.version.clone(),
                balance_tolerance: self.balance_tolerance,
                ratios,
                digit_test: self.digit_test.clone(),
                bankruptcy,
                manipulation: self.manipulation.clone(),
                anomaly_rules,
                compliance_rules,
                risk: self.risk.clone(),
                subscores: self.subscores.clone(),
            }),
            _ => Err(errors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::findings::Severity;

    #[test]
    fn test_default_rule_set_compiles() {
        let compiled = RuleSet::default().compile().unwrap();
        assert_eq!(compiled.version, "builtin-1");
        assert_eq!(compiled.ratios.len(), default_ratios().len());
        assert!(!compiled.anomaly_rules.is_empty());
        assert!(!compiled.compliance_rules.is_empty());
    }

    #[test]
    fn test_rules_may_reference_configured_ratios() {
        let mut rules = RuleSet::default();
        rules.anomaly_rules = vec![RuleDefinition::new(
            "thin_cash",
            "cash_ratio < 0.05",
            Severity::Low,
            "cash ratio",
        )];
        assert!(rules.compile().is_ok());

        rules.ratios.retain(|r| r.name != "cash_ratio");
        let errors = rules.compile().unwrap_err();
        assert!(matches!(errors[0], RuleValidationError::UnknownMetric { .. }));
    }

    #[test]
    fn test_all_errors_reported() {
        let mut rules = RuleSet::default();
        rules.version = String::new();
        rules.digit_test.fields.push("not_a_field".into());
        rules.bankruptcy.distress_below = 5.0;
        rules.compliance_rules.push(RuleDefinition::new(
            "low_liquidity",
            "current_ratio < 1",
            Severity::Low,
            "clashes with an anomaly rule id",
        ));

        let errors = rules.compile().unwrap_err();
        assert_eq!(errors.len(), 4, "{errors:?}");
    }

    #[test]
    fn test_ratio_name_cannot_shadow_metric() {
        let mut rules = RuleSet::default();
        rules.ratios[0].name = "revenue".into();
        let errors = rules.compile().unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, RuleValidationError::InvalidValue { field, .. } if field == "ratios.revenue")));
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let rules: RuleSet = serde_json::from_str(r#"{ "version": "2024.2", "balance_tolerance": 0.5 }"#).unwrap();
        assert_eq!(rules.version, "2024.2");
        assert_eq!(rules.ratios, default_ratios());
        assert!(rules.compile().is_ok());
    }
}
