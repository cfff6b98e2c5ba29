//! Verdict generation
//!
//! Per-route state machine:
//!
//! ```text
//! CheckExclusions --exclusion--> Decided(NO_GO, confidence 1.0)
//!       |
//!    CheckGo --percentage >= go--> Decided(GO)
//!       |
//! CheckConditional --percentage >= conditional--> Decided(CONDITIONAL)
//!       |
//!   Decided(NO_GO)
//! ```
//!
//! Confidence combines the distance from the nearest threshold with the
//! lowest data quality among the categories that supplied scored values.
//! A weak merge therefore never yields a confident verdict.

use crate::assessment::scoring_matrix::ScoringOutcome;
use crate::config::PipelineConfig;
use crate::types::{AuditStage, AuditTrail, CategoryResult, Contribution, Decision, Verdict, WeightedAssessment};
use tracing::info;

const ACTOR: &str = "VerdictGenerator";

/// Supporting reasons and key risks kept per verdict
const MAX_REASONS: usize = 3;

/// Verdict state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VerdictState {
    CheckExclusions,
    CheckGo,
    CheckConditional,
    Decided(Decision),
}

/// Verdict generator
pub struct VerdictGenerator<'a> {
    config: &'a PipelineConfig,
}

impl<'a> VerdictGenerator<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Decide one route
    ///
    /// `results` are the merged categories of the request; only those that
    /// supplied a scored value bound the confidence.
    pub fn generate(
        &self,
        assessment: &WeightedAssessment,
        scoring: &ScoringOutcome,
        results: &[CategoryResult],
        trail: &mut AuditTrail,
    ) -> Verdict {
        let thresholds = &self.config.verdict;
        let percentage = assessment.percentage;
        let excluded: Vec<&str> = scoring
            .entries
            .iter()
            .filter(|e| e.is_exclusion)
            .map(|e| e.parameter_name.as_str())
            .collect();

        let mut path = Vec::new();
        let mut state = VerdictState::CheckExclusions;
        let decision = loop {
            path.push(state);
            state = match state {
                VerdictState::CheckExclusions if !excluded.is_empty() => VerdictState::Decided(Decision::NoGo),
                VerdictState::CheckExclusions => VerdictState::CheckGo,
                VerdictState::CheckGo if percentage >= thresholds.go_threshold => VerdictState::Decided(Decision::Go),
                VerdictState::CheckGo => VerdictState::CheckConditional,
                VerdictState::CheckConditional if percentage >= thresholds.conditional_threshold => {
                    VerdictState::Decided(Decision::Conditional)
                }
                VerdictState::CheckConditional => VerdictState::Decided(Decision::NoGo),
                VerdictState::Decided(decision) => break decision,
            };
        };

        let min_quality = self.min_contributing_quality(scoring, results);
        let confidence = if excluded.is_empty() {
            self.margin_confidence(percentage).min(min_quality).clamp(0.0, 1.0)
        } else {
            1.0
        };

        let supporting_reasons = self.supporting_reasons(assessment);
        let key_risks = self.key_risks(assessment, scoring);

        let rationale = if excluded.is_empty() {
            format!(
                "{} at {:.2}% (GO >= {:.0}%, CONDITIONAL >= {:.0}%); confidence {:.2} from threshold margin and minimum data quality {:.2}{}",
                decision,
                percentage,
                thresholds.go_threshold,
                thresholds.conditional_threshold,
                confidence,
                min_quality,
                assessment
                    .sensitivity
                    .most_influential
                    .as_ref()
                    .map(|p| format!("; most influential weight: {}", p))
                    .unwrap_or_default()
            )
        } else {
            format!(
                "NO_GO: exclusion range hit by {} (weighted percentage {:.2}% not considered)",
                excluded.join(", "),
                percentage
            )
        };

        info!(
            route = %assessment.route,
            decision = %decision,
            confidence,
            percentage,
            "Verdict generated"
        );

        trail.record(
            AuditStage::Verdict,
            ACTOR,
            format!("assessment:{}={:.2}%", assessment.route, percentage),
            format!("verdict:{}={}", assessment.route, decision),
            format!(
                "{}; states {}",
                rationale,
                path.iter().map(|s| format!("{:?}", s)).collect::<Vec<_>>().join(" -> ")
            ),
        );

        Verdict {
            route: assessment.route,
            decision,
            confidence,
            percentage,
            supporting_reasons,
            key_risks,
            rationale,
        }
    }

    /// 0.5 at a threshold, rising linearly to 1.0 at the saturation distance
    fn margin_confidence(&self, percentage: f64) -> f64 {
        let cfg = &self.config.verdict;
        let distance = (percentage - cfg.go_threshold)
            .abs()
            .min((percentage - cfg.conditional_threshold).abs());
        0.5 + 0.5 * (distance / cfg.margin_saturation).min(1.0)
    }

    fn min_contributing_quality(&self, scoring: &ScoringOutcome, results: &[CategoryResult]) -> f64 {
        results
            .iter()
            .filter(|r| scoring.value_sources.values().any(|c| *c == r.category_id))
            .map(|r| r.data_quality_score)
            .fold(None, |min: Option<f64>, q| Some(min.map_or(q, |m| m.min(q))))
            .unwrap_or(0.0)
    }

    fn label(&self, parameter: &str) -> String {
        self.config
            .scoring
            .parameter(parameter)
            .map(|p| p.label.clone())
            .unwrap_or_else(|| parameter.to_string())
    }

    fn describe(&self, c: &Contribution) -> String {
        format!(
            "{} scored {}/9 (weight {:.0}, contributes {:.2})",
            self.label(&c.parameter_name),
            c.discrete_score,
            c.weight,
            c.weighted_score
        )
    }

    fn supporting_reasons(&self, assessment: &WeightedAssessment) -> Vec<String> {
        let mut ranked: Vec<&Contribution> = assessment.contributions.iter().collect();
        ranked.sort_by(|a, b| {
            b.weighted_score
                .total_cmp(&a.weighted_score)
                .then_with(|| a.parameter_name.cmp(&b.parameter_name))
        });
        ranked.into_iter().take(MAX_REASONS).map(|c| self.describe(c)).collect()
    }

    /// Exclusions first, then the lowest weighted contributions
    fn key_risks(&self, assessment: &WeightedAssessment, scoring: &ScoringOutcome) -> Vec<String> {
        let mut risks: Vec<String> = scoring
            .entries
            .iter()
            .filter(|e| e.is_exclusion)
            .map(|e| format!("Exclusion: {}", e.rationale))
            .collect();

        let mut ranked: Vec<&Contribution> = assessment
            .contributions
            .iter()
            .filter(|c| !scoring.entries.iter().any(|e| e.is_exclusion && e.parameter_name == c.parameter_name))
            .collect();
        ranked.sort_by(|a, b| {
            a.weighted_score
                .total_cmp(&b.weighted_score)
                .then_with(|| a.parameter_name.cmp(&b.parameter_name))
        });
        risks.extend(ranked.into_iter().map(|c| self.describe(c)));
        risks.truncate(MAX_REASONS);
        risks
    }
}
