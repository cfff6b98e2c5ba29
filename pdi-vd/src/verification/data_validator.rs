//! Category schema validation
//!
//! Checks resolved field values against the configured schema of their
//! category: required fields, value kind, numeric range and allowed units.
//! Violations are recorded as `ValidationIssue`s. Only `critical` issues
//! remove a field (its value becomes N/A); everything else is tolerated.
//!
//! Anomaly detection compares a resolved number to the median of every
//! number asserted for the field. Outliers are kept with reduced confidence.

use crate::config::{CategorySchema, FieldKind, FieldSpec, PipelineConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::types::{AuditStage, AuditTrail, FieldStatus, FieldValue, Severity, ValidationIssue, ValidationRule};
use crate::verification::conflict_resolver::ResolvedField;
use tracing::{debug, info, warn};

const ACTOR: &str = "DataValidator";

/// Resolved field with its validation outcome
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedField {
    pub resolved: ResolvedField,
    pub status: FieldStatus,
    /// Applied to the merged confidence (1.0 unless anomalous)
    pub confidence_multiplier: f64,
}

/// Validator output for one category
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationOutcome {
    pub fields: Vec<ValidatedField>,
    pub issues: Vec<ValidationIssue>,
}

/// Data validator
pub struct DataValidator<'a> {
    config: &'a PipelineConfig,
}

impl<'a> DataValidator<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Validate the resolved fields of one category
    ///
    /// # Errors
    /// `Configuration` when the category has no configured schema. This
    /// fails the category only.
    pub fn validate(
        &self,
        category: &str,
        fields: Vec<ResolvedField>,
        trail: &mut AuditTrail,
    ) -> PipelineResult<ValidationOutcome> {
        let schema = self.config.schema_for(category).ok_or_else(|| {
            PipelineError::Configuration(format!("no schema configured for category '{}'", category))
        })?;

        let mut outcome = ValidationOutcome::default();

        for spec in schema.fields.iter().filter(|s| s.required) {
            if !fields.iter().any(|f| f.field_name == spec.name) {
                outcome.issues.push(issue(
                    &spec.name,
                    ValidationRule::Required,
                    Severity::High,
                    format!("required field '{}' has no value from any source", spec.name),
                ));
            }
        }

        for resolved in fields {
            let (validated, issues) = self.validate_field(schema, resolved);
            if !issues.is_empty() {
                let mut reasoning =
                    issues.iter().map(|i| format!("[{}] {}", i.severity, i.message)).collect::<Vec<_>>().join("; ");
                if validated.status == FieldStatus::Suppressed {
                    let err = PipelineError::Validation {
                        field: validated.resolved.field_name.clone(),
                        reason: reasoning,
                    };
                    warn!(category, error = %err, "Field removed from merge");
                    reasoning = format!("{}; value set to N/A", err);
                }
                trail.record(
                    AuditStage::Validation,
                    ACTOR,
                    format!("{}:{}", category, validated.resolved.field_name),
                    format!("{:?}", validated.status),
                    reasoning,
                );
            }
            outcome.issues.extend(issues);
            outcome.fields.push(validated);
        }

        let suppressed = outcome.fields.iter().filter(|f| f.status == FieldStatus::Suppressed).count();
        let anomalous = outcome.fields.iter().filter(|f| f.status == FieldStatus::Anomalous).count();

        trail.record(
            AuditStage::Validation,
            ACTOR,
            format!("{}:resolved_fields", category),
            format!("{}:validated_fields", category),
            format!(
                "{} field(s) checked against schema '{}': {} issue(s), {} suppressed, {} anomalous",
                outcome.fields.len(),
                schema.category_id,
                outcome.issues.len(),
                suppressed,
                anomalous
            ),
        );

        info!(
            category,
            fields = outcome.fields.len(),
            issues = outcome.issues.len(),
            suppressed,
            anomalous,
            "Validation complete"
        );

        Ok(outcome)
    }

    fn validate_field(&self, schema: &CategorySchema, resolved: ResolvedField) -> (ValidatedField, Vec<ValidationIssue>) {
        let mut issues = Vec::new();

        let Some(spec) = schema.field(&resolved.field_name) else {
            issues.push(issue(
                &resolved.field_name,
                ValidationRule::UnknownField,
                Severity::Low,
                format!(
                    "field '{}' is not part of category '{}'",
                    resolved.field_name, schema.category_id
                ),
            ));
            return (
                ValidatedField {
                    resolved,
                    status: FieldStatus::Valid,
                    confidence_multiplier: 1.0,
                },
                issues,
            );
        };

        check_structure(spec, &resolved.value, &mut issues);

        if issues.iter().any(|i| i.severity == Severity::Critical) {
            debug!(field = %resolved.field_name, "Field suppressed by critical validation issue");
            let mut resolved = resolved;
            resolved.value = FieldValue::NotAvailable;
            return (
                ValidatedField {
                    resolved,
                    status: FieldStatus::Suppressed,
                    confidence_multiplier: 0.0,
                },
                issues,
            );
        }

        let (status, multiplier) = match self.detect_anomaly(&resolved) {
            Some(message) => {
                issues.push(issue(&resolved.field_name, ValidationRule::Anomaly, Severity::Medium, message));
                (FieldStatus::Anomalous, self.config.validation.anomaly_penalty)
            }
            None => (FieldStatus::Valid, 1.0),
        };

        (
            ValidatedField {
                resolved,
                status,
                confidence_multiplier: multiplier,
            },
            issues,
        )
    }

    /// Distance from the cross-source median in standard deviations
    fn detect_anomaly(&self, resolved: &ResolvedField) -> Option<String> {
        let cfg = &self.config.validation;
        let value = resolved.value.as_number()?;
        let samples = &resolved.observed_numbers;
        if samples.len() < cfg.anomaly_min_samples {
            return None;
        }

        let median = median(samples);
        let std_dev = std_dev(samples);
        if std_dev <= 0.0 {
            return None;
        }

        let distance = (value - median).abs() / std_dev;
        (distance > cfg.anomaly_std_devs).then(|| {
            format!(
                "value {} is {:.2} standard deviations from the cross-source median {} (limit {:.1})",
                value, distance, median, cfg.anomaly_std_devs
            )
        })
    }
}

fn check_structure(spec: &FieldSpec, value: &FieldValue, issues: &mut Vec<ValidationIssue>) {
    match (spec.kind, value) {
        (FieldKind::Numeric, FieldValue::Numeric(q)) => {
            let below = spec.min.map_or(false, |min| q.value < min);
            let above = spec.max.map_or(false, |max| q.value > max);
            if below || above {
                issues.push(issue(
                    &spec.name,
                    ValidationRule::Range,
                    Severity::Critical,
                    format!(
                        "value {} outside allowed range [{}, {}]",
                        q.value,
                        spec.min.map_or("-inf".to_string(), |v| v.to_string()),
                        spec.max.map_or("inf".to_string(), |v| v.to_string())
                    ),
                ));
            }
            if !spec.units.is_empty() {
                let allowed = q
                    .unit
                    .as_deref()
                    .map_or(false, |u| spec.units.iter().any(|a| a.eq_ignore_ascii_case(u.trim())));
                if !allowed {
                    issues.push(issue(
                        &spec.name,
                        ValidationRule::Unit,
                        Severity::Medium,
                        format!(
                            "unit {} not in allowed units [{}]",
                            q.unit.as_deref().unwrap_or("<none>"),
                            spec.units.join(", ")
                        ),
                    ));
                }
            }
        }
        (FieldKind::Text, FieldValue::Text(_)) => {}
        (_, FieldValue::NotAvailable) => {}
        (kind, other) => issues.push(issue(
            &spec.name,
            ValidationRule::Kind,
            Severity::Critical,
            format!("expected {:?} value, got '{}'", kind, other),
        )),
    }
}

fn issue(field: &str, rule: ValidationRule, severity: Severity, message: String) -> ValidationIssue {
    ValidationIssue {
        field: field.to_string(),
        rule,
        severity,
        message,
    }
}

/// Median of an ascending slice
fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Population standard deviation
fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::conflict_resolver::{Contributor, Tier};
    use uuid::Uuid;

    fn resolved(name: &str, value: FieldValue, observed: &[f64]) -> ResolvedField {
        ResolvedField {
            field_name: name.to_string(),
            value,
            tier: Tier::Primary,
            contributors: vec![Contributor {
                source_id: "s1".to_string(),
                authority_weight: 8.0,
                credibility_score: 0.9,
            }],
            observed_numbers: observed.to_vec(),
            resolution_confidence: None,
            unresolved: false,
        }
    }

    fn trail() -> AuditTrail {
        AuditTrail::new(Uuid::new_v4(), Some("physicochemical"))
    }

    #[test]
    fn test_missing_schema_is_configuration_error() {
        let config = PipelineConfig::default();
        let validator = DataValidator::new(&config);
        let err = validator.validate("pharmacokinetics", vec![], &mut trail()).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(ref m) if m.contains("pharmacokinetics")));
    }

    #[test]
    fn test_missing_required_fields_are_high() {
        let config = PipelineConfig::default();
        let validator = DataValidator::new(&config);
        let fields = vec![resolved("log_p", FieldValue::numeric(2.5, None), &[2.5])];

        let outcome = validator.validate("physicochemical", fields, &mut trail()).unwrap();
        let required: Vec<_> = outcome.issues.iter().filter(|i| i.rule == ValidationRule::Required).collect();
        assert_eq!(required.len(), 2);
        assert!(required.iter().all(|i| i.severity == Severity::High));
        assert_eq!(outcome.fields[0].status, FieldStatus::Valid);
    }

    #[test]
    fn test_out_of_range_suppresses_field() {
        let config = PipelineConfig::default();
        let validator = DataValidator::new(&config);
        let fields = vec![resolved("log_p", FieldValue::numeric(42.0, None), &[42.0])];
        let mut trail = trail();

        let outcome = validator.validate("physicochemical", fields, &mut trail).unwrap();
        let field = &outcome.fields[0];
        assert_eq!(field.status, FieldStatus::Suppressed);
        assert_eq!(field.resolved.value, FieldValue::NotAvailable);
        assert_eq!(field.confidence_multiplier, 0.0);
        assert!(outcome.issues.iter().any(|i| i.rule == ValidationRule::Range && i.severity == Severity::Critical));
        // one per-field record plus the summary
        assert_eq!(trail.len(), 2);
        let reasoning = &trail.records()[0].decision_reasoning;
        assert!(reasoning.starts_with("Validation failure on log_p"), "{}", reasoning);
        assert!(reasoning.ends_with("value set to N/A"));
    }

    #[test]
    fn test_kind_mismatch_is_critical() {
        let config = PipelineConfig::default();
        let validator = DataValidator::new(&config);
        let fields = vec![resolved("melting_point", FieldValue::text("high"), &[])];
        let outcome = validator.validate("physicochemical", fields, &mut trail()).unwrap();
        assert_eq!(outcome.fields[0].status, FieldStatus::Suppressed);
        assert!(outcome.issues.iter().any(|i| i.rule == ValidationRule::Kind));
    }

    #[test]
    fn test_unit_not_allowed_is_medium_and_retained() {
        let config = PipelineConfig::default();
        let validator = DataValidator::new(&config);
        let fields = vec![resolved("molecular_weight", FieldValue::numeric(254.3, Some("kDa")), &[254.3])];
        let outcome = validator.validate("physicochemical", fields, &mut trail()).unwrap();
        assert_eq!(outcome.fields[0].status, FieldStatus::Valid);
        let unit = outcome.issues.iter().find(|i| i.rule == ValidationRule::Unit).unwrap();
        assert_eq!(unit.severity, Severity::Medium);
    }

    #[test]
    fn test_unknown_field_is_low() {
        let config = PipelineConfig::default();
        let validator = DataValidator::new(&config);
        let fields = vec![resolved("colour", FieldValue::text("white"), &[])];
        let outcome = validator.validate("physicochemical", fields, &mut trail()).unwrap();
        let unknown = outcome.issues.iter().find(|i| i.rule == ValidationRule::UnknownField).unwrap();
        assert_eq!(unknown.severity, Severity::Low);
        assert_eq!(outcome.fields[0].status, FieldStatus::Valid);
    }

    #[test]
    fn test_outlier_flagged_anomalous() {
        let config = PipelineConfig::default();
        let validator = DataValidator::new(&config);
        let fields = vec![resolved(
            "molecular_weight",
            FieldValue::numeric(900.0, Some("g/mol")),
            &[300.0, 300.0, 300.0, 900.0],
        )];
        let outcome = validator.validate("physicochemical", fields, &mut trail()).unwrap();
        assert_eq!(outcome.fields[0].status, FieldStatus::Anomalous);
        assert_eq!(outcome.fields[0].confidence_multiplier, 0.75);
        assert!(outcome.issues.iter().any(|i| i.rule == ValidationRule::Anomaly));
    }

    #[test]
    fn test_anomaly_needs_enough_samples() {
        let config = PipelineConfig::default();
        let validator = DataValidator::new(&config);
        let fields = vec![resolved("molecular_weight", FieldValue::numeric(900.0, Some("g/mol")), &[300.0, 900.0])];
        let outcome = validator.validate("physicochemical", fields, &mut trail()).unwrap();
        assert_eq!(outcome.fields[0].status, FieldStatus::Valid);
    }

    #[test]
    fn test_median_and_std_dev() {
        assert_eq!(median(&[1.0, 2.0, 3.0]), 2.0);
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.5);
        assert!((std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.0).abs() < 1e-12);
    }
}
