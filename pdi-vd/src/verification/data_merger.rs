//! Weighted data merge
//!
//! Consolidates validated, conflict-resolved fields into one
//! `CategoryResult` with per-field confidence and source attribution.
//!
//! # Confidence Policy
//! - No conflict: mean credibility of the contributing sources
//! - Resolved conflict: the conflict's resolution confidence, times the
//!   unresolved penalty when it stayed below the threshold
//! - One contributing source below the low-authority bound: capped at the
//!   single-source ceiling, whatever that source's own credibility
//! - Anomalous fields: times the anomaly penalty
//! - Suppressed fields: N/A at confidence 0
//!
//! Fields supplied only by disputed sources are kept as enrichment.
//! The merge is a pure function of its input.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::types::{AuditStage, AuditTrail, CategoryResult, FieldConflict, FieldStatus, MergedField};
use crate::verification::conflict_resolver::Tier;
use crate::verification::data_validator::{ValidatedField, ValidationOutcome};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

const ACTOR: &str = "DataMerger";

/// Data merger
pub struct DataMerger<'a> {
    config: &'a PipelineConfig,
}

impl<'a> DataMerger<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Merge one category's validated fields
    ///
    /// Records one audit record per merged field plus a summary record.
    pub fn merge(
        &self,
        request_id: Uuid,
        category: &str,
        validated: &ValidationOutcome,
        conflicts: &[FieldConflict],
        trail: &mut AuditTrail,
    ) -> CategoryResult {
        let mut merged_fields = BTreeMap::new();

        for field in &validated.fields {
            let merged = self.merge_field(field);
            let name = &field.resolved.field_name;
            debug!(category, field = %name, confidence = merged.confidence, status = ?merged.status, "Field merged");

            trail.record(
                AuditStage::Merge,
                ACTOR,
                format!("{}:{}", category, name),
                format!("{}={}", name, merged.value),
                self.explain(field, &merged),
            );
            merged_fields.insert(name.clone(), merged);
        }

        let usable = merged_fields
            .values()
            .filter(|f| f.status != FieldStatus::Suppressed && f.value.is_available())
            .count();
        let insufficient_data = usable == 0;
        let data_quality_score = if insufficient_data {
            0.0
        } else {
            self.quality_score(category, &merged_fields)
        };

        let summary = if insufficient_data {
            let err = PipelineError::MergeInsufficientData(category.to_string());
            warn!(category, error = %err, "No usable field survived the merge");
            format!("{}; data_quality_score forced to 0", err)
        } else {
            format!(
                "{} field(s) merged ({} usable, {} enrichment), {} conflict(s), data_quality_score {:.3}",
                merged_fields.len(),
                usable,
                merged_fields.values().filter(|f| f.enrichment).count(),
                conflicts.len(),
                data_quality_score
            )
        };

        trail.record(
            AuditStage::Merge,
            ACTOR,
            format!("{}:validated_fields", category),
            format!("category_result:{}:{}", request_id, category),
            summary,
        );

        info!(
            %request_id,
            category,
            fields = merged_fields.len(),
            data_quality_score,
            insufficient_data,
            "Category merged"
        );

        CategoryResult {
            category_id: category.to_string(),
            request_id,
            merged_fields,
            data_quality_score,
            conflicts: conflicts.to_vec(),
            validation_issues: validated.issues.clone(),
            insufficient_data,
        }
    }

    fn merge_field(&self, field: &ValidatedField) -> MergedField {
        let resolved = &field.resolved;
        let contributing_sources: Vec<String> = resolved.contributors.iter().map(|c| c.source_id.clone()).collect();
        let enrichment = resolved.tier == Tier::Secondary;

        if field.status == FieldStatus::Suppressed {
            return MergedField {
                value: resolved.value.clone(),
                confidence: 0.0,
                contributing_sources,
                status: FieldStatus::Suppressed,
                enrichment,
            };
        }

        let cfg = &self.config.merge;
        let mut confidence = match resolved.resolution_confidence {
            Some(c) if resolved.unresolved => c * cfg.unresolved_penalty,
            Some(c) => c,
            None => mean_credibility(field),
        };

        if let [only] = resolved.contributors.as_slice() {
            if only.authority_weight < cfg.low_authority_threshold {
                confidence = confidence.min(cfg.single_source_ceiling);
            }
        }

        confidence = (confidence * field.confidence_multiplier).clamp(0.0, 1.0);

        MergedField {
            value: resolved.value.clone(),
            confidence,
            contributing_sources,
            status: field.status,
            enrichment,
        }
    }

    fn explain(&self, field: &ValidatedField, merged: &MergedField) -> String {
        let resolved = &field.resolved;
        let basis = match (field.status, resolved.resolution_confidence) {
            (FieldStatus::Suppressed, _) => "suppressed by critical validation issue".to_string(),
            (_, Some(c)) if resolved.unresolved => format!(
                "unresolved conflict confidence {:.3} x penalty {:.2}",
                c, self.config.merge.unresolved_penalty
            ),
            (_, Some(c)) => format!("resolved conflict confidence {:.3}", c),
            (_, None) => format!("mean credibility {:.3} of {} source(s)", mean_credibility(field), resolved.contributors.len()),
        };
        let mut text = format!("{}; final confidence {:.3}", basis, merged.confidence);
        if let [only] = resolved.contributors.as_slice() {
            if only.authority_weight < self.config.merge.low_authority_threshold && field.status != FieldStatus::Suppressed {
                text.push_str(&format!(
                    "; single low-authority source, ceiling {:.2}",
                    self.config.merge.single_source_ceiling
                ));
            }
        }
        if field.status == FieldStatus::Anomalous {
            text.push_str(&format!("; anomalous x {:.2}", field.confidence_multiplier));
        }
        if merged.enrichment {
            text.push_str("; enrichment from disputed source(s)");
        }
        text
    }

    /// Importance-weighted mean field confidence
    ///
    /// Schema fields without a merged value count as 0. Fields outside the
    /// schema use the default importance.
    fn quality_score(&self, category: &str, merged: &BTreeMap<String, MergedField>) -> f64 {
        let default_importance = self.config.merge.default_importance;
        let mut weighted = 0.0;
        let mut total = 0.0;

        if let Some(schema) = self.config.schema_for(category) {
            for spec in &schema.fields {
                total += spec.importance;
                weighted += spec.importance * merged.get(&spec.name).map_or(0.0, |f| f.confidence);
            }
            for (name, field) in merged {
                if schema.field(name).is_none() {
                    total += default_importance;
                    weighted += default_importance * field.confidence;
                }
            }
        } else {
            for field in merged.values() {
                total += default_importance;
                weighted += default_importance * field.confidence;
            }
        }

        if total > 0.0 {
            (weighted / total).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

fn mean_credibility(field: &ValidatedField) -> f64 {
    let contributors = &field.resolved.contributors;
    if contributors.is_empty() {
        return 0.0;
    }
    contributors.iter().map(|c| c.credibility_score).sum::<f64>() / contributors.len() as f64
}
