//! Narrative synthesis
//!
//! The external LLM collaborator sits behind the narrow `Synthesizer`
//! trait: structured payload in, `{narrative_summary}` out. Any provider
//! implementing it can be swapped in, and tests use in-process fakes.
//!
//! `SummarySynthesizer` applies the shared retry policy to the call. When
//! every attempt fails the category is delivered without a narrative; the
//! quantitative result is never held back.

pub mod http_client;

pub use http_client::HttpSynthesizer;

use crate::assessment::ScoringOutcome;
use crate::error::PipelineError;
use crate::types::{AuditStage, AuditTrail, CategoryResult, MergedField, ScoreEntry, Verdict};
use crate::utils::retry::{retry_with_backoff, RetryPolicy, Retryable};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

const ACTOR: &str = "SummarySynthesizer";

/// Reasons and risks forwarded to the collaborator
const MAX_FORWARDED: usize = 3;

// ============================================================================
// Contract
// ============================================================================

/// Structured input for one narrative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisPayload {
    pub request_id: Uuid,
    pub drug_name: String,
    pub category: String,
    pub merged_fields: BTreeMap<String, MergedField>,
    pub data_quality_score: f64,
    /// Score entries whose values came from this category
    pub scores: Vec<ScoreEntry>,
    /// Verdicts of every route
    pub verdict_candidate: Vec<Verdict>,
    pub top_reasons: Vec<String>,
    pub key_risks: Vec<String>,
}

/// Structured collaborator response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResponse {
    pub narrative_summary: String,
}

/// Synthesis call failure
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("synthesis call timed out after {0} ms")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("collaborator rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl Retryable for SynthesisError {
    fn is_retryable(&self) -> bool {
        match self {
            SynthesisError::Rejected { status, .. } => *status == 429 || *status >= 500,
            _ => true,
        }
    }

    fn timed_out(after: Duration) -> Self {
        SynthesisError::Timeout(after.as_millis() as u64)
    }
}

/// External LLM collaborator ("prompt in, text out")
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Collaborator name for logs and audit records
    fn name(&self) -> &str;

    async fn summarize(&self, payload: &SynthesisPayload) -> Result<SynthesisResponse, SynthesisError>;
}

// ============================================================================
// Summary Synthesizer
// ============================================================================

/// Retrying wrapper around a `Synthesizer`
#[derive(Clone)]
pub struct SummarySynthesizer {
    synthesizer: Arc<dyn Synthesizer>,
    policy: RetryPolicy,
}

impl SummarySynthesizer {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, policy: RetryPolicy) -> Self {
        Self { synthesizer, policy }
    }

    /// Build the payload for one category
    pub fn build_payload(
        request_id: Uuid,
        drug_name: &str,
        result: &CategoryResult,
        scoring: &[ScoringOutcome],
        verdicts: &[Verdict],
    ) -> SynthesisPayload {
        let scores = scoring
            .iter()
            .flat_map(|outcome| {
                outcome
                    .entries
                    .iter()
                    .filter(|e| outcome.value_sources.get(&e.parameter_name) == Some(&result.category_id))
            })
            .cloned()
            .collect();

        SynthesisPayload {
            request_id,
            drug_name: drug_name.to_string(),
            category: result.category_id.clone(),
            merged_fields: result.merged_fields.clone(),
            data_quality_score: result.data_quality_score,
            scores,
            verdict_candidate: verdicts.to_vec(),
            top_reasons: collect_unique(verdicts, |v| v.supporting_reasons.as_slice()),
            key_risks: collect_unique(verdicts, |v| v.key_risks.as_slice()),
        }
    }

    /// Request a narrative; `None` when the collaborator ultimately fails
    ///
    /// The response text is stored as returned.
    pub async fn synthesize(&self, payload: &SynthesisPayload, trail: &mut AuditTrail) -> Option<String> {
        let operation = format!("synthesis:{}", payload.category);
        let synthesizer = self.synthesizer.clone();

        let outcome = retry_with_backoff(&operation, &self.policy, || {
            let synthesizer = synthesizer.clone();
            async move {
                let response = synthesizer.summarize(payload).await?;
                if response.narrative_summary.trim().is_empty() {
                    return Err(SynthesisError::Malformed("empty narrative_summary".to_string()));
                }
                Ok(response)
            }
        })
        .await;

        match outcome {
            Ok(response) => {
                info!(
                    request_id = %payload.request_id,
                    category = %payload.category,
                    collaborator = self.synthesizer.name(),
                    chars = response.narrative_summary.len(),
                    "Narrative synthesized"
                );
                trail.record(
                    AuditStage::Synthesis,
                    ACTOR,
                    format!("payload:{}:{}", payload.request_id, payload.category),
                    format!("narrative:{}", payload.category),
                    format!(
                        "narrative of {} chars from {}",
                        response.narrative_summary.len(),
                        self.synthesizer.name()
                    ),
                );
                Some(response.narrative_summary)
            }
            Err(failure) => {
                let err = PipelineError::ExternalCollaboratorTimeout {
                    attempts: failure.attempts,
                    reason: failure.error.to_string(),
                };
                warn!(
                    request_id = %payload.request_id,
                    category = %payload.category,
                    collaborator = self.synthesizer.name(),
                    error = %err,
                    "Narrative synthesis failed, delivering merged data without narrative"
                );
                trail.record(
                    AuditStage::Synthesis,
                    ACTOR,
                    format!("payload:{}:{}", payload.request_id, payload.category),
                    "narrative:none",
                    format!("{}; degraded to merged data without narrative", err),
                );
                None
            }
        }
    }
}

/// First distinct entries across all routes, in route order
fn collect_unique(verdicts: &[Verdict], pick: impl Fn(&Verdict) -> &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for text in verdicts.iter().flat_map(|v| pick(v).iter()) {
        if out.len() < MAX_FORWARDED && !out.contains(text) {
            out.push(text.clone());
        }
    }
    out
}
