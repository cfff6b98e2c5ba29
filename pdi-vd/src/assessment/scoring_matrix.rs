//! Parameter scoring matrix
//!
//! Maps merged numeric parameters to discrete 0-9 scores per delivery route
//! using the configured range tables. Tables are validated at load, so for
//! any value inside a table's domain exactly one range matches.
//!
//! A value in an exclusion range still contributes its score; the exclusion
//! flag travels with the entry to the verdict. A parameter with no usable
//! value (missing, N/A, wrong unit, outside the table domain) is omitted,
//! never imputed.

use crate::config::{ParameterSpec, PipelineConfig, ScoreRange};
use crate::types::{AuditStage, AuditTrail, CategoryResult, FieldStatus, Route, ScoreEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

const ACTOR: &str = "ScoringMatrixEngine";

/// Parameter left out of scoring, with the reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OmittedParameter {
    pub parameter_name: String,
    pub reason: String,
}

/// Scoring output for one route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringOutcome {
    pub route: Route,
    pub entries: Vec<ScoreEntry>,
    pub omitted: Vec<OmittedParameter>,
    /// Category each scored parameter was read from
    pub value_sources: BTreeMap<String, String>,
}

impl ScoringOutcome {
    pub fn has_exclusion(&self) -> bool {
        self.entries.iter().any(|e| e.is_exclusion)
    }
}

/// Scoring matrix engine
pub struct ScoringMatrixEngine<'a> {
    config: &'a PipelineConfig,
}

impl<'a> ScoringMatrixEngine<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Range matching a raw value, if the value is inside the table domain
    pub fn lookup(&self, route: Route, parameter: &str, value: f64) -> Option<&'a ScoreRange> {
        if !value.is_finite() {
            return None;
        }
        self.config
            .scoring
            .ranges(route, parameter)?
            .iter()
            .find(|range| range.contains(value))
    }

    /// Score every configured parameter for one route
    ///
    /// Records one audit record per parameter, scored or omitted.
    pub fn score(&self, route: Route, results: &[CategoryResult], trail: &mut AuditTrail) -> ScoringOutcome {
        let mut outcome = ScoringOutcome {
            route,
            entries: Vec::new(),
            omitted: Vec::new(),
            value_sources: BTreeMap::new(),
        };

        for parameter in &self.config.scoring.parameters {
            match self.score_parameter(route, parameter, results) {
                Ok((entry, category)) => {
                    debug!(
                        route = %route,
                        parameter = %parameter.name,
                        raw_value = entry.raw_value,
                        score = entry.discrete_score,
                        exclusion = entry.is_exclusion,
                        "Parameter scored"
                    );
                    trail.record(
                        AuditStage::Scoring,
                        ACTOR,
                        format!("{}:{}", category, parameter.field),
                        format!("score:{}:{}={}", route, parameter.name, entry.discrete_score),
                        entry.rationale.clone(),
                    );
                    outcome.value_sources.insert(parameter.name.clone(), category);
                    outcome.entries.push(entry);
                }
                Err(reason) => {
                    debug!(route = %route, parameter = %parameter.name, %reason, "Parameter omitted");
                    trail.record(
                        AuditStage::Scoring,
                        ACTOR,
                        parameter.field.clone(),
                        format!("score:{}:{}=omitted", route, parameter.name),
                        format!("{} omitted from weighted sum: {}", parameter.label, reason),
                    );
                    outcome.omitted.push(OmittedParameter {
                        parameter_name: parameter.name.clone(),
                        reason,
                    });
                }
            }
        }

        outcome
    }

    fn score_parameter(
        &self,
        route: Route,
        parameter: &ParameterSpec,
        results: &[CategoryResult],
    ) -> Result<(ScoreEntry, String), String> {
        let (category, field) = find_field(parameter, results)
            .ok_or_else(|| format!("no merged value for field '{}'", parameter.field))?;

        if field.status == FieldStatus::Suppressed || !field.value.is_available() {
            return Err(format!("value of '{}' is N/A", parameter.field));
        }
        let value = field
            .value
            .as_number()
            .ok_or_else(|| format!("value '{}' is not numeric", field.value))?;

        if !parameter.units.is_empty() {
            let unit = field.value.unit().map(str::trim);
            let accepted = unit.map_or(false, |u| parameter.units.iter().any(|a| a.eq_ignore_ascii_case(u)));
            if !accepted {
                return Err(format!(
                    "unit {} does not match expected [{}]",
                    unit.unwrap_or("<none>"),
                    parameter.units.join(", ")
                ));
            }
        }

        let range = self
            .lookup(route, &parameter.name, value)
            .ok_or_else(|| format!("value {} is outside the {} scoring domain", value, route))?;

        let mut rationale = format!(
            "{} {} falls in {} -> score {} for {}",
            parameter.label,
            field.value,
            describe_range(range),
            range.score,
            route
        );
        if range.is_exclusion {
            rationale.push_str(" (exclusion range)");
        }

        Ok((
            ScoreEntry {
                parameter_name: parameter.name.clone(),
                raw_value: value,
                route,
                discrete_score: range.score,
                is_exclusion: range.is_exclusion,
                rationale,
            },
            category.to_string(),
        ))
    }
}

/// Locate the merged field for a parameter
///
/// Restricted to the configured category when one is named, otherwise the
/// first category in id order that holds the field.
fn find_field<'r>(
    parameter: &ParameterSpec,
    results: &'r [CategoryResult],
) -> Option<(&'r str, &'r crate::types::MergedField)> {
    let mut ordered: Vec<&CategoryResult> = results
        .iter()
        .filter(|r| parameter.category.as_deref().map_or(true, |c| r.category_id == c))
        .collect();
    ordered.sort_by(|a, b| a.category_id.cmp(&b.category_id));
    ordered
        .into_iter()
        .find_map(|r| r.merged_fields.get(&parameter.field).map(|f| (r.category_id.as_str(), f)))
}

fn describe_range(range: &ScoreRange) -> String {
    match (range.min, range.max) {
        (Some(min), Some(max)) => format!("[{}, {})", min, max),
        (Some(min), None) => format!(">= {}", min),
        (None, Some(max)) => format!("< {}", max),
        (None, None) => "any value".to_string(),
    }
}
