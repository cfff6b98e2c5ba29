//! Source authentication and weighting
//!
//! Classifies where a raw observation came from, assigns the configured
//! authority weight, and scores credibility from authority, recency and
//! bibliographic metadata.
//!
//! # Classification Order
//! 1. Provider identity: a configured paid LLM/search provider is always `paid_api`,
//!    whatever URL it cites
//! 2. URL host rules, first match in configured order
//! 3. `other`
//!
//! Classification never fails the pipeline. An unparseable URL, or an
//! observation with neither a URL nor a known provider, falls back to
//! `other` at the minimum authority weight and the reason is audited.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::types::{
    AuditStage, AuditTrail, AuthenticatedObservation, RawObservation, SourceProfile, SourceType,
    VerificationStatus,
};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use tracing::{debug, warn};

const ACTOR: &str = "SourceAuthenticator";

/// Neutral recency for observations without a publication date
const UNKNOWN_DATE_RECENCY: f64 = 0.5;

static DOI_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b10\.\d{4,9}/\S+").expect("valid DOI pattern"));

/// Source authenticator
pub struct SourceAuthenticator<'a> {
    config: &'a PipelineConfig,
}

impl<'a> SourceAuthenticator<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Build a profile for one observation, recording one audit record
    ///
    /// `as_of` is the reference date for recency so that reruns over the
    /// same input produce identical profiles.
    pub fn authenticate(&self, observation: &RawObservation, as_of: NaiveDate, trail: &mut AuditTrail) -> SourceProfile {
        let (source_type, classification_note) = match self.classify(observation) {
            Ok(source_type) => (source_type, None),
            Err(err) => {
                warn!(
                    source_id = %observation.source_id,
                    provider = %observation.provider,
                    error = %err,
                    "Source classification failed, defaulting to lowest authority"
                );
                (SourceType::Other, Some(err.to_string()))
            }
        };

        let authority = &self.config.authority;
        let authority_weight = authority.weight_for(source_type);
        let recency = self.recency_score(observation.published_date, as_of);
        let metadata = metadata_score(observation);

        let cred = &self.config.credibility;
        let max_authority = authority.max_weight();
        let normalized_authority = if max_authority > 0.0 { authority_weight / max_authority } else { 0.0 };
        let credibility_score = (cred.authority_weight * normalized_authority
            + cred.recency_weight * recency
            + cred.metadata_weight * metadata)
            .clamp(0.0, 1.0);

        let has_fields = observation.extracted_fields.values().any(|v| v.is_available());
        let verification_status = if !has_fields {
            VerificationStatus::Invalid
        } else if credibility_score >= cred.verification_floor {
            VerificationStatus::Verified
        } else {
            VerificationStatus::Disputed
        };

        debug!(
            source_id = %observation.source_id,
            source_type = %source_type,
            authority_weight,
            credibility_score,
            status = ?verification_status,
            "Source authenticated"
        );

        let mut reasoning = format!(
            "type={} authority={:.1} credibility={:.3} (authority {:.3}, recency {:.3}, metadata {:.2}); status={:?} (floor {:.2})",
            source_type,
            authority_weight,
            credibility_score,
            normalized_authority,
            recency,
            metadata,
            verification_status,
            cred.verification_floor,
        );
        if verification_status == VerificationStatus::Invalid {
            reasoning.push_str("; no extracted fields to verify");
        }
        if let Some(note) = classification_note {
            reasoning.push_str("; ");
            reasoning.push_str(&note);
        }

        trail.record(
            AuditStage::Authentication,
            ACTOR,
            observation.source_id.clone(),
            format!("profile:{}:{}", observation.source_id, source_type),
            reasoning,
        );

        SourceProfile {
            source_id: observation.source_id.clone(),
            source_type,
            authority_weight,
            credibility_score,
            verification_status,
        }
    }

    /// Authenticate every observation of a category, preserving input order
    pub fn authenticate_all(
        &self,
        observations: &[RawObservation],
        as_of: NaiveDate,
        trail: &mut AuditTrail,
    ) -> Vec<AuthenticatedObservation> {
        observations
            .iter()
            .map(|observation| AuthenticatedObservation {
                profile: self.authenticate(observation, as_of, trail),
                observation: observation.clone(),
            })
            .collect()
    }

    /// Classify the origin of an observation
    pub fn classify(&self, observation: &RawObservation) -> Result<SourceType, PipelineError> {
        let provider = observation.provider.trim().to_lowercase();
        if self.is_paid_provider(&provider) {
            return Ok(SourceType::PaidApi);
        }

        let failure = |reason: String| PipelineError::SourceClassification {
            source_id: observation.source_id.clone(),
            reason,
        };

        let raw_url = match observation.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url,
            _ => {
                return Err(failure(format!(
                    "no URL and provider '{}' is not a known paid provider",
                    observation.provider
                )))
            }
        };

        let url = Url::parse(raw_url).map_err(|e| failure(format!("unparseable URL '{}': {}", raw_url, e)))?;
        let host = url
            .host_str()
            .map(|h| h.trim_end_matches('.').to_lowercase())
            .ok_or_else(|| failure(format!("URL '{}' has no host", raw_url)))?;

        Ok(self
            .config
            .authority
            .domain_rules
            .iter()
            .find(|rule| rule.matches(&host))
            .map(|rule| rule.source_type)
            .unwrap_or(SourceType::Other))
    }

    fn is_paid_provider(&self, provider: &str) -> bool {
        self.config.authority.paid_api_providers.iter().any(|paid| {
            let paid = paid.to_lowercase();
            provider == paid
                || provider
                    .strip_prefix(paid.as_str())
                    .map_or(false, |rest| rest.starts_with(['-', '_', ':', '/']))
        })
    }

    /// Recency component in [0, 1]
    ///
    /// Full score inside the window, then halves every half-life.
    fn recency_score(&self, published: Option<NaiveDate>, as_of: NaiveDate) -> f64 {
        let Some(published) = published else {
            return UNKNOWN_DATE_RECENCY;
        };
        let cred = &self.config.credibility;
        let age_days = (as_of - published).num_days();
        if age_days <= cred.recency_window_days {
            return 1.0;
        }
        let excess = (age_days - cred.recency_window_days) as f64;
        0.5f64.powf(excess / cred.recency_half_life_days as f64)
    }
}

/// Bibliographic metadata component: authors 0.5, DOI 0.5
fn metadata_score(observation: &RawObservation) -> f64 {
    let mut score = 0.0;
    if observation.authors.iter().any(|a| !a.trim().is_empty()) {
        score += 0.5;
    }
    if has_doi(observation) {
        score += 0.5;
    }
    score
}

fn has_doi(observation: &RawObservation) -> bool {
    observation.url.as_deref().map_or(false, |u| DOI_PATTERN.is_match(u))
        || DOI_PATTERN.is_match(&observation.content_snippet)
        || observation.title.as_deref().map_or(false, |t| DOI_PATTERN.is_match(t))
}
