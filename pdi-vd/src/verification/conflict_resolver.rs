//! Conflict detection and resolution
//!
//! Compares every observation asserting a value for the same field,
//! detects disagreement, and resolves it by weighted consensus.
//!
//! # Algorithm: Weighted Voting
//! 1. Split observations into tiers: `verified` (primary) and `disputed`
//!    (secondary, only consulted for fields the primary tier lacks)
//! 2. Cluster the asserted values into candidates. Numbers within the relative
//!    tolerance of a cluster anchor (same unit) agree; text agrees after
//!    case/whitespace normalization
//! 3. support(candidate) = Σ authority_weight × credibility_score of its sources
//! 4. Greatest support wins; ties go to the most recent publication, then to
//!    canonical candidate ordering
//! 5. resolution_confidence = winning support / total support
//!
//! Input order never affects the outcome. Conflicts below the unresolved
//! threshold are flagged, not raised.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::types::{
    AuditStage, AuditTrail, AuthenticatedObservation, ConflictType, FieldConflict, FieldValue,
    ResolutionStrategy, Severity, VerificationStatus,
};
use chrono::{Datelike, NaiveDate};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

const ACTOR: &str = "ConflictResolver";

/// Supports closer than this count as tied
const SUPPORT_EPSILON: f64 = 1e-9;

// ============================================================================
// Output Contract
// ============================================================================

/// Which tier of observations supplied a resolved field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Verified sources
    Primary,
    /// Disputed sources, used only for enrichment
    Secondary,
}

/// Source backing a resolved value
#[derive(Debug, Clone, PartialEq)]
pub struct Contributor {
    pub source_id: String,
    pub authority_weight: f64,
    pub credibility_score: f64,
}

/// One field after resolution, ready for validation and merge
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    pub field_name: String,
    pub value: FieldValue,
    pub tier: Tier,
    /// Sources asserting the winning value, sorted by source id
    pub contributors: Vec<Contributor>,
    /// Numeric values asserted for the field in this tier in the unit of
    /// the resolved value, ascending
    pub observed_numbers: Vec<f64>,
    /// Set when the field went through conflict resolution
    pub resolution_confidence: Option<f64>,
    pub unresolved: bool,
}

/// Resolver output for one category
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub conflicts: Vec<FieldConflict>,
    /// Sorted by field name
    pub fields: Vec<ResolvedField>,
}

// ============================================================================
// Candidates
// ============================================================================

/// One asserted value with its source
struct Assertion<'o> {
    obs: &'o AuthenticatedObservation,
    value: &'o FieldValue,
}

impl Assertion<'_> {
    fn weight(&self) -> f64 {
        self.obs.profile.vote_weight()
    }

    fn source_id(&self) -> &str {
        &self.obs.observation.source_id
    }
}

/// Canonical identity of a candidate value, totally ordered
#[derive(Debug, Clone)]
enum CandidateKey {
    Numeric { anchor: f64, unit: Option<String> },
    Text(String),
}

impl CandidateKey {
    fn cmp_canonical(&self, other: &Self) -> Ordering {
        match (self, other) {
            (CandidateKey::Numeric { anchor: a, unit: ua }, CandidateKey::Numeric { anchor: b, unit: ub }) => {
                a.total_cmp(b).then_with(|| ua.cmp(ub))
            }
            (CandidateKey::Numeric { .. }, CandidateKey::Text(_)) => Ordering::Less,
            (CandidateKey::Text(_), CandidateKey::Numeric { .. }) => Ordering::Greater,
            (CandidateKey::Text(a), CandidateKey::Text(b)) => a.cmp(b),
        }
    }
}

struct Candidate<'o> {
    key: CandidateKey,
    members: Vec<Assertion<'o>>,
}

impl<'o> Candidate<'o> {
    fn support(&self) -> f64 {
        self.members.iter().map(Assertion::weight).sum()
    }

    fn latest_date(&self) -> Option<NaiveDate> {
        self.members.iter().filter_map(|m| m.obs.observation.published_date).max()
    }

    /// Member with the highest individual weight (ties → lowest source id)
    fn representative(&self) -> &Assertion<'o> {
        let mut best = &self.members[0];
        for member in &self.members[1..] {
            match member.weight().partial_cmp(&best.weight()) {
                Some(Ordering::Greater) => best = member,
                Some(Ordering::Equal) if member.source_id() < best.source_id() => best = member,
                _ => {}
            }
        }
        best
    }

    /// Strict priority order: support, then recency, then canonical key
    fn priority_cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (self.support(), other.support());
        if (a - b).abs() > SUPPORT_EPSILON {
            return b.total_cmp(&a);
        }
        other
            .latest_date()
            .cmp(&self.latest_date())
            .then_with(|| self.key.cmp_canonical(&other.key))
    }
}

fn normalized_unit(value: &FieldValue) -> Option<String> {
    value.unit().map(|u| u.trim().to_lowercase())
}

/// Relative difference of two numbers (0 when both are 0)
fn relative_difference(a: f64, b: f64) -> f64 {
    let scale = a.abs().max(b.abs());
    if scale == 0.0 {
        0.0
    } else {
        (a - b).abs() / scale
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Conflict resolver
pub struct ConflictResolver<'a> {
    config: &'a PipelineConfig,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Resolve every field of one category
    ///
    /// Emits one audit record per resolved field.
    pub fn resolve(&self, category: &str, observations: &[AuthenticatedObservation], trail: &mut AuditTrail) -> Resolution {
        let primary: Vec<&AuthenticatedObservation> = observations
            .iter()
            .filter(|o| o.profile.verification_status == VerificationStatus::Verified)
            .collect();
        let secondary: Vec<&AuthenticatedObservation> = observations
            .iter()
            .filter(|o| o.profile.verification_status == VerificationStatus::Disputed)
            .collect();

        let mut resolution = Resolution::default();
        let primary_fields = self.resolve_tier(category, &primary, Tier::Primary, None, &mut resolution, trail);
        self.resolve_tier(category, &secondary, Tier::Secondary, Some(&primary_fields), &mut resolution, trail);

        resolution.fields.sort_by(|a, b| a.field_name.cmp(&b.field_name));

        debug!(
            category,
            fields = resolution.fields.len(),
            conflicts = resolution.conflicts.len(),
            "Conflict resolution complete"
        );
        resolution
    }

    /// Resolve one tier; returns the field names it produced
    fn resolve_tier(
        &self,
        category: &str,
        observations: &[&AuthenticatedObservation],
        tier: Tier,
        skip: Option<&BTreeSet<String>>,
        resolution: &mut Resolution,
        trail: &mut AuditTrail,
    ) -> BTreeSet<String> {
        let mut by_field: BTreeMap<&str, Vec<Assertion>> = BTreeMap::new();
        for obs in observations.iter().copied() {
            for (field, value) in &obs.observation.extracted_fields {
                if !value.is_available() {
                    continue;
                }
                if skip.map_or(false, |s| s.contains(field.as_str())) {
                    continue;
                }
                by_field.entry(field.as_str()).or_default().push(Assertion { obs, value });
            }
        }

        let mut produced = BTreeSet::new();
        for (field, mut assertions) in by_field {
            assertions.sort_by(|a, b| a.source_id().cmp(b.source_id()));
            let resolved = self.resolve_field(category, field, tier, assertions, resolution, trail);
            produced.insert(resolved.field_name.clone());
            resolution.fields.push(resolved);
        }
        produced
    }

    fn resolve_field(
        &self,
        category: &str,
        field: &str,
        tier: Tier,
        assertions: Vec<Assertion>,
        resolution: &mut Resolution,
        trail: &mut AuditTrail,
    ) -> ResolvedField {
        let asserted: Vec<(Option<String>, f64)> = assertions
            .iter()
            .filter_map(|a| a.value.as_number().map(|n| (normalized_unit(a.value), n)))
            .collect();
        let all_sources: Vec<String> = assertions.iter().map(|a| a.source_id().to_string()).collect();

        let mut candidates = self.cluster(assertions);
        candidates.sort_by(|a, b| a.priority_cmp(b));

        let winner = &candidates[0];
        let representative = winner.representative();
        let mut contributors: Vec<Contributor> = winner
            .members
            .iter()
            .map(|m| Contributor {
                source_id: m.source_id().to_string(),
                authority_weight: m.obs.profile.authority_weight,
                credibility_score: m.obs.profile.credibility_score,
            })
            .collect();
        contributors.sort_by(|a, b| a.source_id.cmp(&b.source_id));

        let value = representative.value.clone();
        // Spread and anomaly statistics only compare values in one unit
        let observed_numbers = match value.as_number() {
            Some(_) => {
                let unit = normalized_unit(&value);
                let mut nums: Vec<f64> = asserted.into_iter().filter(|(u, _)| *u == unit).map(|(_, n)| n).collect();
                nums.sort_by(f64::total_cmp);
                nums
            }
            None => Vec::new(),
        };
        let tier_label = match tier {
            Tier::Primary => "primary",
            Tier::Secondary => "secondary",
        };

        if candidates.len() == 1 {
            trail.record(
                AuditStage::ConflictResolution,
                ACTOR,
                format!("{}:{}", category, field),
                format!("{}={}", field, value),
                format!(
                    "{} tier: {} source(s) agree, no conflict",
                    tier_label,
                    contributors.len()
                ),
            );
            return ResolvedField {
                field_name: field.to_string(),
                value,
                tier,
                contributors,
                observed_numbers,
                resolution_confidence: None,
                unresolved: false,
            };
        }

        let total_support: f64 = candidates.iter().map(Candidate::support).sum();
        let winning_support = winner.support();
        let confidence = if total_support > 0.0 {
            (winning_support / total_support).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let runner_up = &candidates[1];
        let strategy = if (winning_support - runner_up.support()).abs() > SUPPORT_EPSILON {
            ResolutionStrategy::WeightedVote
        } else if winner.latest_date() != runner_up.latest_date() {
            ResolutionStrategy::RecencyTiebreak
        } else {
            ResolutionStrategy::CanonicalTiebreak
        };

        let conflict_type = self.classify(&candidates);
        let spread = numeric_spread(&observed_numbers);
        let (severity, unresolved) = self.severity(confidence, spread);

        if unresolved {
            let err = PipelineError::UnresolvedConflict {
                field: field.to_string(),
                confidence,
            };
            warn!(category, field, confidence, error = %err, "Conflict left unresolved, downstream confidence penalized");
        }

        let mut conflicting_observations = all_sources;
        conflicting_observations.sort();

        let candidate_summary = candidates
            .iter()
            .map(|c| format!("{} (support {:.3}, {} source(s))", c.representative().value, c.support(), c.members.len()))
            .collect::<Vec<_>>()
            .join("; ");

        trail.record(
            AuditStage::ConflictResolution,
            ACTOR,
            format!("{}:{}", category, field),
            format!("{}={}", field, value),
            format!(
                "{} tier: {:?} conflict, candidates [{}]; {:?} chose {} with confidence {:.3}, severity {}{}",
                tier_label,
                conflict_type,
                candidate_summary,
                strategy,
                value,
                confidence,
                severity,
                if unresolved { " (unresolved)" } else { "" }
            ),
        );

        resolution.conflicts.push(FieldConflict {
            field_name: field.to_string(),
            category: category.to_string(),
            conflicting_observations,
            conflict_type,
            severity,
            resolution_strategy: strategy,
            resolved_value: value.clone(),
            resolution_confidence: confidence,
            unresolved,
        });

        ResolvedField {
            field_name: field.to_string(),
            value,
            tier,
            contributors,
            observed_numbers,
            resolution_confidence: Some(confidence),
            unresolved,
        }
    }

    /// Group assertions into agreeing candidates
    ///
    /// Numbers: sorted by (unit, value, source id), greedily clustered against
    /// the first member of the current cluster.
    fn cluster<'o>(&self, assertions: Vec<Assertion<'o>>) -> Vec<Candidate<'o>> {
        let tolerance = self.config.conflict.numeric_tolerance;
        let (mut numeric, text): (Vec<_>, Vec<_>) = assertions
            .into_iter()
            .partition(|a| matches!(a.value, FieldValue::Numeric(_)));

        numeric.sort_by(|a, b| {
            normalized_unit(a.value)
                .cmp(&normalized_unit(b.value))
                .then_with(|| a.value.as_number().unwrap_or(0.0).total_cmp(&b.value.as_number().unwrap_or(0.0)))
                .then_with(|| a.source_id().cmp(b.source_id()))
        });

        let mut candidates: Vec<Candidate<'o>> = Vec::new();
        for assertion in numeric {
            let value = assertion.value.as_number().unwrap_or(0.0);
            let unit = normalized_unit(assertion.value);
            let joins = candidates.last().map_or(false, |c| match &c.key {
                CandidateKey::Numeric { anchor, unit: anchor_unit } => {
                    *anchor_unit == unit && relative_difference(*anchor, value) <= tolerance
                }
                CandidateKey::Text(_) => false,
            });
            if joins {
                if let Some(last) = candidates.last_mut() {
                    last.members.push(assertion);
                }
            } else {
                candidates.push(Candidate {
                    key: CandidateKey::Numeric { anchor: value, unit },
                    members: vec![assertion],
                });
            }
        }

        let mut by_text: BTreeMap<String, Vec<Assertion<'o>>> = BTreeMap::new();
        for assertion in text {
            let key = assertion.value.canonical_text().unwrap_or_default();
            by_text.entry(key).or_default().push(assertion);
        }
        candidates.extend(by_text.into_iter().map(|(key, members)| Candidate {
            key: CandidateKey::Text(key),
            members,
        }));

        candidates
    }

    /// Heuristic conflict type
    fn classify(&self, candidates: &[Candidate]) -> ConflictType {
        let cfg = &self.config.conflict;
        let members = || candidates.iter().flat_map(|c| c.members.iter());

        let units: BTreeSet<Option<String>> = members()
            .filter(|m| matches!(m.value, FieldValue::Numeric(_)))
            .map(|m| normalized_unit(m.value))
            .collect();
        let years: Vec<i32> = members()
            .filter_map(|m| m.obs.observation.published_date.map(|d| d.year()))
            .collect();
        let year_span = match (years.iter().min(), years.iter().max()) {
            (Some(lo), Some(hi)) => hi - lo,
            _ => 0,
        };
        if units.len() > 1 || year_span > cfg.temporal_span_years {
            return ConflictType::Temporal;
        }

        let methods: BTreeSet<String> = members()
            .filter_map(|m| m.obs.observation.extracted_fields.get(&cfg.methodology_field))
            .filter_map(FieldValue::canonical_text)
            .collect();
        if methods.len() > 1 {
            return ConflictType::Methodological;
        }

        if candidates.iter().all(|c| matches!(c.key, CandidateKey::Numeric { .. })) {
            ConflictType::Quantitative
        } else {
            ConflictType::Factual
        }
    }

    /// Severity and unresolved flag from confidence and numeric spread
    fn severity(&self, confidence: f64, spread: f64) -> (Severity, bool) {
        let cfg = &self.config.conflict;
        if confidence < cfg.unresolved_threshold {
            (Severity::Critical, true)
        } else if confidence < cfg.high_severity_confidence || spread > cfg.high_severity_spread {
            (Severity::High, false)
        } else if confidence < cfg.medium_severity_confidence || spread > cfg.medium_severity_spread {
            (Severity::Medium, false)
        } else {
            (Severity::Low, false)
        }
    }
}

/// Relative spread of asserted numbers: (max - min) / max(|max|, |min|)
fn numeric_spread(sorted: &[f64]) -> f64 {
    match (sorted.first(), sorted.last()) {
        (Some(lo), Some(hi)) if sorted.len() > 1 => relative_difference(*lo, *hi),
        _ => 0.0,
    }
}
