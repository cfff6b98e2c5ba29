//! Weighted assessment
//!
//! Combines the discrete scores of one route into a composite:
//!
//! - `weighted_total = Σ score × weight / 100`
//! - `max_possible = Σ 9 × weight / 100`, over scored parameters only
//! - `percentage = 100 × weighted_total / max_possible`
//!
//! Omitted parameters shrink `max_possible` instead of counting as zero.
//! Weight sums are checked when the configuration loads, never here.

use crate::config::{PipelineConfig, MAX_DISCRETE_SCORE};
use crate::types::{AuditStage, AuditTrail, Contribution, ScoreEntry, SensitivityReport, WeightedAssessment};
use crate::assessment::scoring_matrix::ScoringOutcome;
use std::collections::BTreeMap;
use tracing::info;

const ACTOR: &str = "WeightedAssessmentEngine";

/// Weight perturbation used for sensitivity analysis
const PERTURBATION: f64 = 1.0;

/// Weighted assessment engine
pub struct WeightedAssessmentEngine<'a> {
    config: &'a PipelineConfig,
}

impl<'a> WeightedAssessmentEngine<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Assess one route's score entries
    pub fn assess(&self, scoring: &ScoringOutcome, trail: &mut AuditTrail) -> WeightedAssessment {
        let weights = &self.config.scoring.weights;
        let (weighted_total, max_possible, percentage) = composite(&scoring.entries, weights);

        let contributions: Vec<Contribution> = scoring
            .entries
            .iter()
            .map(|entry| {
                let weight = weights.get(&entry.parameter_name).copied().unwrap_or(0.0);
                Contribution {
                    parameter_name: entry.parameter_name.clone(),
                    discrete_score: entry.discrete_score,
                    weight,
                    weighted_score: f64::from(entry.discrete_score) * weight / 100.0,
                }
            })
            .collect();

        let sensitivity = sensitivity(&scoring.entries, weights, percentage);

        info!(
            route = %scoring.route,
            weighted_total,
            max_possible,
            percentage,
            scored = scoring.entries.len(),
            omitted = scoring.omitted.len(),
            "Weighted assessment complete"
        );

        trail.record(
            AuditStage::Assessment,
            ACTOR,
            format!("scores:{}", scoring.route),
            format!("assessment:{}={:.2}%", scoring.route, percentage),
            format!(
                "weighted_total {:.3} of max_possible {:.3} over {} scored parameter(s) ({} omitted); most influential weight: {}",
                weighted_total,
                max_possible,
                scoring.entries.len(),
                scoring.omitted.len(),
                sensitivity.most_influential.as_deref().unwrap_or("none")
            ),
        );

        WeightedAssessment {
            route: scoring.route,
            weighted_total,
            max_possible,
            percentage,
            category_weights: weights.clone(),
            contributions,
            sensitivity,
        }
    }
}

/// (weighted_total, max_possible, percentage) for a set of entries
pub fn composite(entries: &[ScoreEntry], weights: &BTreeMap<String, f64>) -> (f64, f64, f64) {
    let mut total = 0.0;
    let mut max = 0.0;
    for entry in entries {
        let weight = weights.get(&entry.parameter_name).copied().unwrap_or(0.0);
        total += f64::from(entry.discrete_score) * weight / 100.0;
        max += f64::from(MAX_DISCRETE_SCORE) * weight / 100.0;
    }
    let percentage = if max > 0.0 { 100.0 * total / max } else { 0.0 };
    (total, max, percentage)
}

/// Percentage-point change under ±1 perturbation of each weight
fn sensitivity(entries: &[ScoreEntry], weights: &BTreeMap<String, f64>, baseline: f64) -> SensitivityReport {
    let mut deltas = Vec::with_capacity(weights.len());
    for (name, weight) in weights {
        let mut largest: f64 = 0.0;
        for perturbed in [weight + PERTURBATION, (weight - PERTURBATION).max(0.0)] {
            let mut adjusted = weights.clone();
            adjusted.insert(name.clone(), perturbed);
            let (_, _, pct) = composite(entries, &adjusted);
            largest = largest.max((pct - baseline).abs());
        }
        deltas.push((name.clone(), largest));
    }

    let most_influential = deltas
        .iter()
        .filter(|(_, d)| *d > 0.0)
        .fold(None::<&(String, f64)>, |best, item| match best {
            Some(b) if b.1 >= item.1 => Some(b),
            _ => Some(item),
        })
        .map(|(name, _)| name.clone());

    SensitivityReport { deltas, most_influential }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Route;

    fn entry(name: &str, score: u8) -> ScoreEntry {
        ScoreEntry {
            parameter_name: name.to_string(),
            raw_value: 0.0,
            route: Route::Transdermal,
            discrete_score: score,
            is_exclusion: false,
            rationale: String::new(),
        }
    }

    fn outcome(entries: Vec<ScoreEntry>) -> ScoringOutcome {
        ScoringOutcome {
            route: Route::Transdermal,
            entries,
            omitted: vec![],
            value_sources: BTreeMap::new(),
        }
    }

    #[test]
    fn test_reference_example_percentage() {
        let config = PipelineConfig::default();
        let engine = WeightedAssessmentEngine::new(&config);
        let scoring = outcome(vec![
            entry("dose", 7),
            entry("molecular_weight", 3),
            entry("melting_point", 5),
            entry("log_p", 9),
        ]);

        let assessment = engine.assess(&scoring, &mut AuditTrail::new(uuid::Uuid::nil(), None));
        assert!((assessment.weighted_total - 5.6).abs() < 1e-9);
        assert!((assessment.max_possible - 9.0).abs() < 1e-9);
        assert!((assessment.percentage - 5.6 / 9.0 * 100.0).abs() < 1e-9);
        assert!((assessment.percentage - 62.22).abs() < 0.01);
        assert_eq!(assessment.category_weights.values().sum::<f64>(), 100.0);

        let dose = assessment.contributions.iter().find(|c| c.parameter_name == "dose").unwrap();
        assert!((dose.weighted_score - 2.8).abs() < 1e-9);
    }

    #[test]
    fn test_missing_parameter_reduces_max_possible() {
        let config = PipelineConfig::default();
        let engine = WeightedAssessmentEngine::new(&config);
        let scoring = outcome(vec![entry("dose", 9), entry("log_p", 9)]);

        let assessment = engine.assess(&scoring, &mut AuditTrail::new(uuid::Uuid::nil(), None));
        assert!((assessment.max_possible - 4.5).abs() < 1e-9);
        assert!((assessment.percentage - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_nothing_scored_is_zero_percent() {
        let config = PipelineConfig::default();
        let engine = WeightedAssessmentEngine::new(&config);
        let assessment = engine.assess(&outcome(vec![]), &mut AuditTrail::new(uuid::Uuid::nil(), None));
        assert_eq!(assessment.percentage, 0.0);
        assert_eq!(assessment.max_possible, 0.0);
        assert_eq!(assessment.sensitivity.most_influential, None);
    }

    #[test]
    fn test_sensitivity_names_most_influential_weight() {
        let weights = PipelineConfig::default().scoring.weights;
        let entries = vec![
            entry("dose", 7),
            entry("molecular_weight", 3),
            entry("melting_point", 5),
            entry("log_p", 9),
        ];
        let (_, _, baseline) = composite(&entries, &weights);
        let report = sensitivity(&entries, &weights, baseline);

        assert_eq!(report.deltas.len(), 4);
        // LogP's score (9) sits furthest from the weighted mean score (5.6)
        assert_eq!(report.most_influential.as_deref(), Some("log_p"));
        let delta = |name: &str| report.deltas.iter().find(|(n, _)| n == name).unwrap().1;
        assert!(delta("log_p") > delta("molecular_weight"));
        assert!(delta("molecular_weight") > delta("dose"));
        assert!(delta("dose") > delta("melting_point"));
    }
}
