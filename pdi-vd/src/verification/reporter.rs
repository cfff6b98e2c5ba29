//! Verification summary for compliance review
//!
//! Pure aggregation over merged category results and the source profiles
//! that fed them. Nothing here makes a decision or writes an audit record.

use crate::types::{CategoryResult, FieldStatus, Severity, SourceProfile, SourceType, VerificationStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of ranked sources kept in the summary
const TOP_SOURCES: usize = 10;

/// Contribution of one source across all merged categories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceContribution {
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceType>,
    /// Merged fields this source backed
    pub fields_contributed: usize,
    /// Sum of the confidences of those fields
    pub confidence_mass: f64,
}

/// Read-only quality and coverage summary
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub source_coverage: BTreeMap<SourceType, usize>,
    pub verification_counts: BTreeMap<String, usize>,
    pub conflicts_by_severity: BTreeMap<Severity, usize>,
    pub unresolved_conflicts: usize,
    pub suppressed_fields: usize,
    pub mean_data_quality: f64,
    pub insufficient_categories: Vec<String>,
    pub top_sources: Vec<SourceContribution>,
}

impl VerificationSummary {
    pub fn total_conflicts(&self) -> usize {
        self.conflicts_by_severity.values().sum()
    }
}

/// Verification reporter
#[derive(Debug, Default)]
pub struct VerificationReporter;

impl VerificationReporter {
    pub fn new() -> Self {
        Self
    }

    /// Summarize results and the profiles of every authenticated source
    pub fn summarize(&self, results: &[CategoryResult], profiles: &[SourceProfile]) -> VerificationSummary {
        let mut summary = VerificationSummary::default();

        let mut types_by_source: BTreeMap<&str, SourceType> = BTreeMap::new();
        for profile in profiles {
            *summary.source_coverage.entry(profile.source_type).or_default() += 1;
            *summary
                .verification_counts
                .entry(status_name(profile.verification_status).to_string())
                .or_default() += 1;
            types_by_source.insert(profile.source_id.as_str(), profile.source_type);
        }

        let mut contributions: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
        for result in results {
            for conflict in &result.conflicts {
                *summary.conflicts_by_severity.entry(conflict.severity).or_default() += 1;
                if conflict.unresolved {
                    summary.unresolved_conflicts += 1;
                }
            }
            for field in result.merged_fields.values() {
                if field.status == FieldStatus::Suppressed {
                    summary.suppressed_fields += 1;
                    continue;
                }
                for source in &field.contributing_sources {
                    let entry = contributions.entry(source.as_str()).or_default();
                    entry.0 += 1;
                    entry.1 += field.confidence;
                }
            }
            if result.insufficient_data {
                summary.insufficient_categories.push(result.category_id.clone());
            }
        }

        if !results.is_empty() {
            summary.mean_data_quality =
                results.iter().map(|r| r.data_quality_score).sum::<f64>() / results.len() as f64;
        }

        let mut ranked: Vec<SourceContribution> = contributions
            .into_iter()
            .map(|(source_id, (fields, mass))| SourceContribution {
                source_id: source_id.to_string(),
                source_type: types_by_source.get(source_id).copied(),
                fields_contributed: fields,
                confidence_mass: mass,
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.fields_contributed
                .cmp(&a.fields_contributed)
                .then_with(|| b.confidence_mass.total_cmp(&a.confidence_mass))
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        ranked.truncate(TOP_SOURCES);
        summary.top_sources = ranked;

        summary
    }
}

fn status_name(status: VerificationStatus) -> &'static str {
    match status {
        VerificationStatus::Pending => "pending",
        VerificationStatus::Verified => "verified",
        VerificationStatus::Disputed => "disputed",
        VerificationStatus::Invalid => "invalid",
    }
}
