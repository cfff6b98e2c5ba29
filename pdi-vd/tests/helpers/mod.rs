//! Shared fixtures for pdi-vd integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use pdi_vd::db::{MemoryStore, ResultStore};
use pdi_vd::synthesis::{SynthesisError, SynthesisPayload, SynthesisResponse, Synthesizer};
use pdi_vd::types::{AuditRecord, CategoryResult, FieldConflict, FieldValue, RawObservation, Verdict};
use pdi_vd::AnalysisRequest;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn as_of() -> NaiveDate {
    date(2024, 6, 1)
}

/// Dosage observations: two authoritative sources agree, a news item disagrees
pub fn dosage_observations(dose_mg: f64) -> Vec<RawObservation> {
    vec![
        RawObservation::new("pubmed-1", "pubmed_search")
            .with_url("https://pubmed.ncbi.nlm.nih.gov/31234567/")
            .with_title("Topical ketoprofen in knee osteoarthritis")
            .published(date(2022, 9, 14))
            .with_authors(&["Rossi M", "Chen L"])
            .with_snippet("doi:10.1016/j.ejps.2022.106201")
            .with_field("dose", FieldValue::numeric(dose_mg, Some("mg")))
            .with_field("indication", FieldValue::text("osteoarthritis pain")),
        RawObservation::new("fda-label", "web_search")
            .with_url("https://www.accessdata.fda.gov/drugsatfda_docs/label/ketoprofen.pdf")
            .published(date(2023, 2, 1))
            .with_field("dose", FieldValue::numeric(dose_mg * 1.02, Some("mg")))
            .with_field("indication", FieldValue::text("Osteoarthritis pain")),
        RawObservation::new("news-1", "web_search")
            .with_url("https://www.reuters.com/business/healthcare/ketoprofen-patch")
            .published(date(2016, 5, 2))
            .with_field("dose", FieldValue::numeric(dose_mg * 4.0, Some("mg"))),
    ]
}

/// Physicochemical observations for the reference sample (MW 450, MP 160, LogP 2.5)
pub fn physicochemical_observations() -> Vec<RawObservation> {
    vec![
        RawObservation::new("perplexity-1", "perplexity")
            .published(date(2024, 1, 20))
            .with_field("molecular_weight", FieldValue::numeric(450.0, Some("g/mol")))
            .with_field("melting_point", FieldValue::numeric(160.0, Some("C")))
            .with_field("log_p", FieldValue::numeric(2.5, None))
            .with_field("solubility", FieldValue::text("practically insoluble in water")),
        RawObservation::new("drugbank-1", "web_search")
            .with_url("https://go.drugbank.com/drugs/DB01009")
            .published(date(2023, 7, 1))
            .with_field("molecular_weight", FieldValue::numeric(451.0, Some("g/mol")))
            .with_field("melting_point", FieldValue::numeric(161.0, Some("C"))),
    ]
}

pub fn regulatory_observations() -> Vec<RawObservation> {
    vec![RawObservation::new("ema-1", "web_search")
        .with_url("https://www.ema.europa.eu/en/medicines/ketoprofen")
        .published(date(2021, 11, 3))
        .with_field("approval_status", FieldValue::text("approved"))
        .with_field("approval_year", FieldValue::numeric(1986.0, None))]
}

/// Reference request: transdermal scores 7/3/5/9
pub fn reference_request() -> AnalysisRequest {
    AnalysisRequest::new("ketoprofen")
        .as_of(as_of())
        .with_category("dosage", dosage_observations(15.0))
        .with_category("physicochemical", physicochemical_observations())
        .with_category("regulatory", regulatory_observations())
}

/// Synthesizer that always succeeds
pub struct EchoSynthesizer;

#[async_trait]
impl Synthesizer for EchoSynthesizer {
    fn name(&self) -> &str {
        "echo"
    }

    async fn summarize(&self, payload: &SynthesisPayload) -> Result<SynthesisResponse, SynthesisError> {
        Ok(SynthesisResponse {
            narrative_summary: format!(
                "{} {}: {} merged field(s), {} score(s)",
                payload.drug_name,
                payload.category,
                payload.merged_fields.len(),
                payload.scores.len()
            ),
        })
    }
}

/// Synthesizer whose endpoint is always down
pub struct UnavailableSynthesizer;

#[async_trait]
impl Synthesizer for UnavailableSynthesizer {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn summarize(&self, _payload: &SynthesisPayload) -> Result<SynthesisResponse, SynthesisError> {
        Err(SynthesisError::Rejected {
            status: 503,
            message: "service unavailable".to_string(),
        })
    }
}

// ================================================================================================
// Stores with injected faults
// ================================================================================================

/// Memory store whose verdict writes always fail
pub struct VerdictRejectingStore {
    pub inner: Arc<MemoryStore>,
}

/// Memory store whose audit writes for one category stall
pub struct StallingStore {
    pub inner: Arc<MemoryStore>,
    pub category: String,
    pub delay: Duration,
}

#[async_trait]
impl ResultStore for VerdictRejectingStore {
    async fn store_category_result(&self, result: &CategoryResult) -> pdi_common::Result<()> {
        self.inner.store_category_result(result).await
    }

    async fn store_conflicts(&self, request_id: Uuid, conflicts: &[FieldConflict]) -> pdi_common::Result<()> {
        self.inner.store_conflicts(request_id, conflicts).await
    }

    async fn store_verdict(&self, _request_id: Uuid, _verdict: &Verdict) -> pdi_common::Result<()> {
        Err(pdi_common::Error::Internal("disk full".to_string()))
    }

    async fn append_audit(&self, records: &[AuditRecord]) -> pdi_common::Result<()> {
        self.inner.append_audit(records).await
    }

    async fn audit_trail(&self, request_id: Uuid) -> pdi_common::Result<Vec<AuditRecord>> {
        self.inner.audit_trail(request_id).await
    }

    async fn category_results(&self, request_id: Uuid) -> pdi_common::Result<Vec<CategoryResult>> {
        self.inner.category_results(request_id).await
    }

    async fn verdicts(&self, request_id: Uuid) -> pdi_common::Result<Vec<Verdict>> {
        self.inner.verdicts(request_id).await
    }
}

#[async_trait]
impl ResultStore for StallingStore {
    async fn store_category_result(&self, result: &CategoryResult) -> pdi_common::Result<()> {
        self.inner.store_category_result(result).await
    }

    async fn store_conflicts(&self, request_id: Uuid, conflicts: &[FieldConflict]) -> pdi_common::Result<()> {
        self.inner.store_conflicts(request_id, conflicts).await
    }

    async fn store_verdict(&self, request_id: Uuid, verdict: &Verdict) -> pdi_common::Result<()> {
        self.inner.store_verdict(request_id, verdict).await
    }

    async fn append_audit(&self, records: &[AuditRecord]) -> pdi_common::Result<()> {
        if records.iter().any(|r| r.category.as_deref() == Some(self.category.as_str())) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.append_audit(records).await
    }

    async fn audit_trail(&self, request_id: Uuid) -> pdi_common::Result<Vec<AuditRecord>> {
        self.inner.audit_trail(request_id).await
    }

    async fn category_results(&self, request_id: Uuid) -> pdi_common::Result<Vec<CategoryResult>> {
        self.inner.category_results(request_id).await
    }

    async fn verdicts(&self, request_id: Uuid) -> pdi_common::Result<Vec<Verdict>> {
        self.inner.verdicts(request_id).await
    }
}
