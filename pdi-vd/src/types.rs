//! Core Types and Data Contracts for PDI-VD
//!
//! Defines the explicit data contracts between pipeline stages:
//! - **Collection → Authentication:** `RawObservation`
//! - **Authentication → Resolution:** `AuthenticatedObservation` (observation + `SourceProfile`)
//! - **Resolution → Validation → Merge:** `FieldConflict`, `CategoryResult`
//! - **Phase 2:** `ScoreEntry`, `WeightedAssessment`, `Verdict`
//! - **Every stage:** `AuditRecord`
//!
//! Records are immutable once produced. Re-running a stage produces new
//! values; nothing here is updated in place.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ============================================================================
// Field Values
// ============================================================================

/// Numeric value with optional unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Value of one extracted or merged field
///
/// Serialized untagged: `{"value": 285.3, "unit": "g/mol"}`, `"topical"`, or `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Numeric(Quantity),
    Text(String),
    /// Suppressed or unavailable; never approximated
    NotAvailable,
}

impl FieldValue {
    pub fn numeric(value: f64, unit: Option<&str>) -> Self {
        FieldValue::Numeric(Quantity {
            value,
            unit: unit.map(str::to_string),
        })
    }

    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Numeric(q) => Some(q.value),
            _ => None,
        }
    }

    pub fn unit(&self) -> Option<&str> {
        match self {
            FieldValue::Numeric(q) => q.unit.as_deref(),
            _ => None,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, FieldValue::NotAvailable)
    }

    /// Normalized text form used for categorical agreement
    ///
    /// Case-folded with internal whitespace collapsed.
    pub fn canonical_text(&self) -> Option<String> {
        match self {
            FieldValue::Text(s) => Some(
                s.split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .to_lowercase(),
            ),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Numeric(Quantity { value, unit: Some(unit) }) => write!(f, "{} {}", value, unit),
            FieldValue::Numeric(Quantity { value, unit: None }) => write!(f, "{}", value),
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::NotAvailable => write!(f, "N/A"),
        }
    }
}

// ============================================================================
// Collection Stage Output
// ============================================================================

/// One raw finding from an external provider
///
/// Produced by the collection stage and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    /// Unique observation identifier (also used as the source reference)
    pub source_id: String,
    /// Provider that returned the finding (e.g. "perplexity", "pubmed_search")
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub published_date: Option<NaiveDate>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub content_snippet: String,
    #[serde(default)]
    pub extracted_fields: BTreeMap<String, FieldValue>,
}

impl RawObservation {
    pub fn new(source_id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            provider: provider.into(),
            url: None,
            title: None,
            published_date: None,
            authors: Vec::new(),
            content_snippet: String::new(),
            extracted_fields: BTreeMap::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn published(mut self, date: NaiveDate) -> Self {
        self.published_date = Some(date);
        self
    }

    pub fn with_authors(mut self, authors: &[&str]) -> Self {
        self.authors = authors.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.content_snippet = snippet.into();
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.extracted_fields.insert(name.into(), value);
        self
    }
}

// ============================================================================
// Source Authentication
// ============================================================================

/// Origin classification of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    PaidApi,
    Government,
    PeerReviewed,
    Industry,
    Company,
    News,
    Other,
}

impl SourceType {
    pub const ALL: [SourceType; 7] = [
        SourceType::PaidApi,
        SourceType::Government,
        SourceType::PeerReviewed,
        SourceType::Industry,
        SourceType::Company,
        SourceType::News,
        SourceType::Other,
    ];
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SourceType::PaidApi => "paid_api",
            SourceType::Government => "government",
            SourceType::PeerReviewed => "peer_reviewed",
            SourceType::Industry => "industry",
            SourceType::Company => "company",
            SourceType::News => "news",
            SourceType::Other => "other",
        };
        write!(f, "{}", name)
    }
}

/// Verification outcome of a source profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    /// Credibility at or above the configured floor
    Verified,
    /// Credibility below the floor; used only for enrichment
    Disputed,
    /// Carries nothing to verify (no extracted fields)
    Invalid,
}

/// Authority and credibility assessment of one observation's source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProfile {
    pub source_id: String,
    pub source_type: SourceType,
    pub authority_weight: f64,
    /// Normalized credibility (0.0-1.0)
    pub credibility_score: f64,
    pub verification_status: VerificationStatus,
}

impl SourceProfile {
    /// Voting weight of this source (authority × credibility)
    pub fn vote_weight(&self) -> f64 {
        self.authority_weight * self.credibility_score
    }
}

/// Observation paired with its source profile
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedObservation {
    pub observation: RawObservation,
    pub profile: SourceProfile,
}

// ============================================================================
// Conflict Resolution
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    Factual,
    Temporal,
    Methodological,
    Quantitative,
}

/// Severity shared by conflicts and validation issues (ordered low → critical)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// How the winning value of a conflict was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Strictly greatest weighted support
    WeightedVote,
    /// Support tied; most recent publication won
    RecencyTiebreak,
    /// Support and recency tied; canonical value ordering won
    CanonicalTiebreak,
}

/// Disagreement between observations on one field, resolved exactly once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field_name: String,
    pub category: String,
    /// Source ids of every observation asserting a value for the field
    pub conflicting_observations: Vec<String>,
    pub conflict_type: ConflictType,
    pub severity: Severity,
    pub resolution_strategy: ResolutionStrategy,
    pub resolved_value: FieldValue,
    pub resolution_confidence: f64,
    /// Confidence below the unresolved threshold; downstream confidence is penalized
    pub unresolved: bool,
}

// ============================================================================
// Validation & Merge
// ============================================================================

/// Validation rule that produced an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationRule {
    Required,
    UnknownField,
    Kind,
    Range,
    Unit,
    Anomaly,
}

/// Non-fatal validation finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub rule: ValidationRule,
    pub severity: Severity,
    pub message: String,
}

/// Per-field validation outcome carried into the merged result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Valid,
    /// Retained with reduced confidence
    Anomalous,
    /// Removed by a critical issue; value is N/A
    Suppressed,
}

/// One merged field with confidence and source attribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedField {
    pub value: FieldValue,
    pub confidence: f64,
    pub contributing_sources: Vec<String>,
    pub status: FieldStatus,
    /// Supplied only by lower-priority (disputed) sources
    #[serde(default)]
    pub enrichment: bool,
}

/// Merged, validated data for one (request, category) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryResult {
    pub category_id: String,
    pub request_id: Uuid,
    pub merged_fields: BTreeMap<String, MergedField>,
    /// Importance-weighted mean field confidence (0.0-1.0)
    pub data_quality_score: f64,
    pub conflicts: Vec<FieldConflict>,
    #[serde(default)]
    pub validation_issues: Vec<ValidationIssue>,
    /// No usable field survived the merge
    #[serde(default)]
    pub insufficient_data: bool,
}

// ============================================================================
// Phase 2: Scoring, Assessment, Verdict
// ============================================================================

/// Target delivery route
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Transdermal,
    Transmucosal,
}

impl Route {
    pub const ALL: [Route; 2] = [Route::Transdermal, Route::Transmucosal];
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Transdermal => write!(f, "transdermal"),
            Route::Transmucosal => write!(f, "transmucosal"),
        }
    }
}

/// Discrete score of one parameter for one route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub parameter_name: String,
    pub raw_value: f64,
    pub route: Route,
    /// Discrete score (0-9)
    pub discrete_score: u8,
    pub is_exclusion: bool,
    pub rationale: String,
}

/// Weighted contribution of one scored parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub parameter_name: String,
    pub discrete_score: u8,
    pub weight: f64,
    /// score × weight / 100
    pub weighted_score: f64,
}

/// Influence of each weight on the percentage under ±1 perturbation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityReport {
    /// (parameter, largest absolute percentage-point change)
    pub deltas: Vec<(String, f64)>,
    pub most_influential: Option<String>,
}

/// Composite score for one route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedAssessment {
    pub route: Route,
    pub weighted_total: f64,
    pub max_possible: f64,
    /// weighted_total / max_possible, in percent (0-100)
    pub percentage: f64,
    pub category_weights: BTreeMap<String, f64>,
    pub contributions: Vec<Contribution>,
    pub sensitivity: SensitivityReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "GO")]
    Go,
    #[serde(rename = "NO_GO")]
    NoGo,
    #[serde(rename = "CONDITIONAL")]
    Conditional,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Go => write!(f, "GO"),
            Decision::NoGo => write!(f, "NO_GO"),
            Decision::Conditional => write!(f, "CONDITIONAL"),
        }
    }
}

/// Final recommendation for one route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub route: Route,
    pub decision: Decision,
    /// Confidence (0.0-1.0)
    pub confidence: f64,
    pub percentage: f64,
    /// At most 3
    pub supporting_reasons: Vec<String>,
    /// At most 3
    pub key_risks: Vec<String>,
    pub rationale: String,
}

// ============================================================================
// Audit
// ============================================================================

/// Pipeline stage that emitted an audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStage {
    Authentication,
    ConflictResolution,
    Validation,
    Merge,
    Scoring,
    Assessment,
    Verdict,
    Synthesis,
    Orchestration,
}

impl std::fmt::Display for AuditStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AuditStage::Authentication => "authentication",
            AuditStage::ConflictResolution => "conflict_resolution",
            AuditStage::Validation => "validation",
            AuditStage::Merge => "merge",
            AuditStage::Scoring => "scoring",
            AuditStage::Assessment => "assessment",
            AuditStage::Verdict => "verdict",
            AuditStage::Synthesis => "synthesis",
            AuditStage::Orchestration => "orchestration",
        };
        write!(f, "{}", name)
    }
}

/// Append-only record of one pipeline decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub request_id: Uuid,
    #[serde(default)]
    pub category: Option<String>,
    pub stage: AuditStage,
    /// Component that made the decision
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub input_ref: String,
    pub output_ref: String,
    pub decision_reasoning: String,
}

/// Collector for the audit records a stage emits
///
/// Components append here synchronously; the orchestrator drains the
/// collected records into the persistence collaborator after each stage.
#[derive(Debug, Clone)]
pub struct AuditTrail {
    request_id: Uuid,
    category: Option<String>,
    records: Vec<AuditRecord>,
}

impl AuditTrail {
    pub fn new(request_id: Uuid, category: Option<&str>) -> Self {
        Self {
            request_id,
            category: category.map(str::to_string),
            records: Vec::new(),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Append one decision record
    pub fn record(
        &mut self,
        stage: AuditStage,
        actor: &str,
        input_ref: impl Into<String>,
        output_ref: impl Into<String>,
        decision_reasoning: impl Into<String>,
    ) {
        self.records.push(AuditRecord {
            request_id: self.request_id,
            category: self.category.clone(),
            stage,
            actor: actor.to_string(),
            timestamp: Utc::now(),
            input_ref: input_ref.into(),
            output_ref: output_ref.into(),
            decision_reasoning: decision_reasoning.into(),
        });
    }

    pub fn records(&self) -> &[AuditRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Take every collected record, leaving the trail empty
    pub fn drain(&mut self) -> Vec<AuditRecord> {
        std::mem::take(&mut self.records)
    }
}

// ============================================================================
// Tests
// ============================================================================
