//! Request workflow
//!
//! `CategoryPipeline` runs Phase 1 for one (request, category) pair;
//! `PipelineOrchestrator` fans categories and requests out over the worker
//! pool, runs Phase 2 and synthesis, and assembles the report.

pub mod orchestrator;
pub mod pipeline;

pub use orchestrator::PipelineOrchestrator;
pub use pipeline::{CategoryPipeline, Phase1Output};

use crate::error::PipelineError;
use crate::types::{CategoryResult, RawObservation};
use chrono::{NaiveDate, Utc};
use pdi_common::events::CategoryStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Collected observations for one drug, grouped by category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    #[serde(default = "Uuid::new_v4")]
    pub request_id: Uuid,
    pub drug_name: String,
    /// Reference date for recency scoring; today when absent
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
    pub categories: BTreeMap<String, Vec<RawObservation>>,
}

impl AnalysisRequest {
    pub fn new(drug_name: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            drug_name: drug_name.into(),
            as_of: None,
            categories: BTreeMap::new(),
        }
    }

    pub fn as_of(mut self, date: NaiveDate) -> Self {
        self.as_of = Some(date);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>, observations: Vec<RawObservation>) -> Self {
        self.categories.insert(category.into(), observations);
        self
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.as_of.unwrap_or_else(|| Utc::now().date_naive())
    }
}

/// Terminal outcome of one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryOutcome {
    pub category: String,
    pub status: CategoryStatus,
    /// Absent when the category failed or was cancelled during Phase 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CategoryResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    /// Failure, cancellation or degradation reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CategoryOutcome {
    pub(crate) fn terminal(category: &str, status: CategoryStatus, reason: impl Into<String>) -> Self {
        Self {
            category: category.to_string(),
            status,
            result: None,
            narrative: None,
            reason: Some(reason.into()),
        }
    }

    pub(crate) fn merged(result: CategoryResult) -> Self {
        Self {
            category: result.category_id.clone(),
            status: CategoryStatus::Completed,
            result: Some(result),
            narrative: None,
            reason: None,
        }
    }

    /// Outcome of a category that ended with an error and no merged result
    pub(crate) fn from_error(category: &str, err: &PipelineError) -> Self {
        let mut outcome = Self::terminal(category, CategoryStatus::Failed, String::new());
        outcome.record_error(err);
        outcome
    }

    /// Record the error that ended this category
    ///
    /// Fatal errors fail the category, cancellation cancels it, and any
    /// other condition only degrades it. A published result is kept.
    pub(crate) fn record_error(&mut self, err: &PipelineError) {
        let (status, reason) = match err {
            PipelineError::Cancelled(stage) => (CategoryStatus::Cancelled, format!("cancelled before {}", stage)),
            err if err.is_fatal() => (CategoryStatus::Failed, err.to_string()),
            err => (CategoryStatus::Partial, err.to_string()),
        };
        self.status = status;
        self.reason = Some(reason);
    }

    /// Still eligible for Phase 2 and synthesis
    pub(crate) fn is_live(&self) -> bool {
        self.result.is_some() && matches!(self.status, CategoryStatus::Completed | CategoryStatus::Partial)
    }
}
