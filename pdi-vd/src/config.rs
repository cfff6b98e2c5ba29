//! Pipeline configuration for pdi-vd
//!
//! One explicit, versioned configuration object holds every weight table,
//! schema, range table and threshold the pipeline uses. It is passed by
//! reference into each component constructor and never mutated.
//!
//! `validate()` runs at load time. Any violation is a `ConfigurationError`
//! reported immediately; nothing is normalized or silently corrected.

use crate::error::{PipelineError, PipelineResult};
use crate::types::{Route, SourceType};
use crate::utils::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::info;

/// Tolerance for "sums to 100" and "sums to 1" checks
const SUM_EPSILON: f64 = 1e-6;

/// Highest discrete score a range may assign
pub const MAX_DISCRETE_SCORE: u8 = 9;

// ============================================================================
// Top-level configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Configuration version, recorded in audit reasoning
    pub version: String,
    pub authority: AuthorityConfig,
    pub credibility: CredibilityConfig,
    pub conflict: ConflictConfig,
    pub validation: ValidationConfig,
    pub merge: MergeConfig,
    pub categories: Vec<CategorySchema>,
    pub scoring: ScoringConfig,
    pub verdict: VerdictConfig,
    pub synthesis: SynthesisConfig,
    pub orchestration: OrchestrationConfig,
}

impl PipelineConfig {
    /// Load a configuration file and validate it
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let config: PipelineConfig = pdi_common::config::load_toml(path)
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;
        config.validate()?;
        info!(version = %config.version, path = %path.display(), "Pipeline configuration loaded");
        Ok(config)
    }

    /// Schema for a category, if configured
    pub fn schema_for(&self, category_id: &str) -> Option<&CategorySchema> {
        self.categories.iter().find(|c| c.category_id == category_id)
    }

    /// Validate every section; first violation wins
    pub fn validate(&self) -> PipelineResult<()> {
        if self.version.trim().is_empty() {
            return Err(config_error("version must not be empty"));
        }
        self.authority.validate()?;
        self.credibility.validate()?;
        self.conflict.validate()?;
        self.validation.validate()?;
        self.merge.validate()?;

        let mut seen = BTreeSet::new();
        for schema in &self.categories {
            if !seen.insert(schema.category_id.as_str()) {
                return Err(config_error(format!(
                    "duplicate category schema '{}'",
                    schema.category_id
                )));
            }
            schema.validate()?;
        }

        self.scoring.validate()?;
        self.verdict.validate()?;
        self.synthesis.retry.validate().map_err(config_error)?;
        self.orchestration.validate()?;
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: "2024.1".to_string(),
            authority: AuthorityConfig::default(),
            credibility: CredibilityConfig::default(),
            conflict: ConflictConfig::default(),
            validation: ValidationConfig::default(),
            merge: MergeConfig::default(),
            categories: default_categories(),
            scoring: ScoringConfig::default(),
            verdict: VerdictConfig::default(),
            synthesis: SynthesisConfig::default(),
            orchestration: OrchestrationConfig::default(),
        }
    }
}

fn config_error(msg: impl Into<String>) -> PipelineError {
    PipelineError::Configuration(msg.into())
}

fn check_unit_interval(name: &str, value: f64) -> PipelineResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(config_error(format!("{} must be within [0, 1], got {}", name, value)));
    }
    Ok(())
}

// ============================================================================
// Source authority
// ============================================================================

/// URL host rule mapping a domain pattern to a source type
///
/// A pattern starting with '.' matches any host ending with it (".gov");
/// otherwise it matches the host itself or any subdomain of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRule {
    pub pattern: String,
    pub source_type: SourceType,
}

impl DomainRule {
    fn new(pattern: &str, source_type: SourceType) -> Self {
        Self {
            pattern: pattern.to_string(),
            source_type,
        }
    }

    pub fn matches(&self, host: &str) -> bool {
        let pattern = self.pattern.to_lowercase();
        if pattern.starts_with('.') {
            host.ends_with(&pattern)
        } else {
            host == pattern || host.ends_with(&format!(".{}", pattern))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Authority weight per source type (`other` derives from the minimum)
    pub weights: BTreeMap<SourceType, f64>,
    /// Providers whose findings are always `paid_api`
    pub paid_api_providers: Vec<String>,
    /// Ordered host rules; first match wins
    pub domain_rules: Vec<DomainRule>,
}

impl AuthorityConfig {
    /// Authority weight for a source type
    ///
    /// `other` (and any unconfigured type) receives the minimum weight.
    pub fn weight_for(&self, source_type: SourceType) -> f64 {
        match source_type {
            SourceType::Other => self.min_weight(),
            t => self.weights.get(&t).copied().unwrap_or_else(|| self.min_weight()),
        }
    }

    pub fn min_weight(&self) -> f64 {
        self.weights.values().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max_weight(&self) -> f64 {
        self.weights.values().copied().fold(0.0, f64::max)
    }

    fn validate(&self) -> PipelineResult<()> {
        for source_type in SourceType::ALL {
            if source_type == SourceType::Other {
                continue;
            }
            match self.weights.get(&source_type) {
                None => {
                    return Err(config_error(format!(
                        "authority weight missing for source type '{}'",
                        source_type
                    )))
                }
                Some(w) if !w.is_finite() || *w <= 0.0 => {
                    return Err(config_error(format!(
                        "authority weight for '{}' must be positive, got {}",
                        source_type, w
                    )))
                }
                Some(_) => {}
            }
        }
        if let Some(w) = self.weights.get(&SourceType::Other) {
            if *w > self.min_weight() || *w <= 0.0 {
                return Err(config_error(
                    "authority weight for 'other' must be the positive minimum of the table",
                ));
            }
        }
        for rule in &self.domain_rules {
            if rule.pattern.trim().is_empty() || rule.pattern == "." {
                return Err(config_error("domain rule pattern must not be empty"));
            }
        }
        Ok(())
    }
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        let weights = BTreeMap::from([
            (SourceType::PaidApi, 10.0),
            (SourceType::Government, 8.0),
            (SourceType::PeerReviewed, 6.0),
            (SourceType::Industry, 4.0),
            (SourceType::Company, 2.0),
            (SourceType::News, 1.0),
        ]);

        let paid_api_providers = ["perplexity", "openai", "anthropic", "gemini", "grok", "tavily", "serper"]
            .iter()
            .map(|p| p.to_string())
            .collect();

        // Specific hosts come before broad suffixes (pubmed before .gov)
        let domain_rules = vec![
            DomainRule::new("pubmed.ncbi.nlm.nih.gov", SourceType::PeerReviewed),
            DomainRule::new("pmc.ncbi.nlm.nih.gov", SourceType::PeerReviewed),
            DomainRule::new("doi.org", SourceType::PeerReviewed),
            DomainRule::new("nature.com", SourceType::PeerReviewed),
            DomainRule::new("sciencedirect.com", SourceType::PeerReviewed),
            DomainRule::new("springer.com", SourceType::PeerReviewed),
            DomainRule::new("wiley.com", SourceType::PeerReviewed),
            DomainRule::new("nejm.org", SourceType::PeerReviewed),
            DomainRule::new("thelancet.com", SourceType::PeerReviewed),
            DomainRule::new("bmj.com", SourceType::PeerReviewed),
            DomainRule::new("jamanetwork.com", SourceType::PeerReviewed),
            DomainRule::new("mdpi.com", SourceType::PeerReviewed),
            DomainRule::new("plos.org", SourceType::PeerReviewed),
            DomainRule::new("fda.gov", SourceType::Government),
            DomainRule::new("ema.europa.eu", SourceType::Government),
            DomainRule::new("who.int", SourceType::Government),
            DomainRule::new("gov.uk", SourceType::Government),
            DomainRule::new(".gov", SourceType::Government),
            DomainRule::new("drugbank.com", SourceType::Industry),
            DomainRule::new("drugs.com", SourceType::Industry),
            DomainRule::new("medscape.com", SourceType::Industry),
            DomainRule::new("fiercepharma.com", SourceType::Industry),
            DomainRule::new("pharmaceutical-technology.com", SourceType::Industry),
            DomainRule::new("iqvia.com", SourceType::Industry),
            DomainRule::new("pfizer.com", SourceType::Company),
            DomainRule::new("novartis.com", SourceType::Company),
            DomainRule::new("roche.com", SourceType::Company),
            DomainRule::new("gsk.com", SourceType::Company),
            DomainRule::new("sanofi.com", SourceType::Company),
            DomainRule::new("reuters.com", SourceType::News),
            DomainRule::new("bloomberg.com", SourceType::News),
            DomainRule::new("cnbc.com", SourceType::News),
            DomainRule::new("bbc.co.uk", SourceType::News),
            DomainRule::new("nytimes.com", SourceType::News),
        ];

        Self {
            weights,
            paid_api_providers,
            domain_rules,
        }
    }
}

// ============================================================================
// Credibility
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredibilityConfig {
    /// Weight of normalized authority (authority / max authority)
    pub authority_weight: f64,
    /// Weight of publication recency
    pub recency_weight: f64,
    /// Weight of author/DOI metadata presence
    pub metadata_weight: f64,
    /// Data younger than this keeps full recency
    pub recency_window_days: i64,
    /// Recency halves every this many days beyond the window
    pub recency_half_life_days: i64,
    /// Minimum credibility for `verified`
    pub verification_floor: f64,
}

impl CredibilityConfig {
    fn validate(&self) -> PipelineResult<()> {
        for (name, w) in [
            ("credibility.authority_weight", self.authority_weight),
            ("credibility.recency_weight", self.recency_weight),
            ("credibility.metadata_weight", self.metadata_weight),
        ] {
            check_unit_interval(name, w)?;
        }
        let sum = self.authority_weight + self.recency_weight + self.metadata_weight;
        if (sum - 1.0).abs() > SUM_EPSILON {
            return Err(config_error(format!("credibility weights sum to {}, expected 1", sum)));
        }
        if self.recency_window_days < 0 || self.recency_half_life_days <= 0 {
            return Err(config_error("recency window must be >= 0 and half-life > 0"));
        }
        check_unit_interval("credibility.verification_floor", self.verification_floor)
    }
}

impl Default for CredibilityConfig {
    fn default() -> Self {
        Self {
            authority_weight: 0.60,
            recency_weight: 0.25,
            metadata_weight: 0.15,
            recency_window_days: 1825,
            recency_half_life_days: 1825,
            verification_floor: 0.35,
        }
    }
}

// ============================================================================
// Conflict resolution
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    /// Relative difference above which numeric values disagree
    pub numeric_tolerance: f64,
    /// Resolution confidence below this marks the conflict unresolved/critical
    pub unresolved_threshold: f64,
    pub high_severity_confidence: f64,
    pub medium_severity_confidence: f64,
    /// Relative spread above which a numeric conflict is at least high
    pub high_severity_spread: f64,
    /// Relative spread above which a numeric conflict is at least medium
    pub medium_severity_spread: f64,
    /// Publication years spanning more than this make a conflict temporal
    pub temporal_span_years: i32,
    /// Extracted field naming the study method of an observation
    pub methodology_field: String,
}

impl ConflictConfig {
    fn validate(&self) -> PipelineResult<()> {
        if !self.numeric_tolerance.is_finite() || self.numeric_tolerance < 0.0 {
            return Err(config_error("conflict.numeric_tolerance must be >= 0"));
        }
        check_unit_interval("conflict.unresolved_threshold", self.unresolved_threshold)?;
        check_unit_interval("conflict.high_severity_confidence", self.high_severity_confidence)?;
        check_unit_interval("conflict.medium_severity_confidence", self.medium_severity_confidence)?;
        if !(self.unresolved_threshold <= self.high_severity_confidence
            && self.high_severity_confidence <= self.medium_severity_confidence)
        {
            return Err(config_error(
                "conflict thresholds must satisfy unresolved <= high <= medium",
            ));
        }
        if self.medium_severity_spread < 0.0 || self.high_severity_spread < self.medium_severity_spread {
            return Err(config_error("conflict spreads must satisfy 0 <= medium <= high"));
        }
        if self.temporal_span_years < 0 {
            return Err(config_error("conflict.temporal_span_years must be >= 0"));
        }
        Ok(())
    }
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            numeric_tolerance: 0.10,
            unresolved_threshold: 0.55,
            high_severity_confidence: 0.70,
            medium_severity_confidence: 0.85,
            high_severity_spread: 0.50,
            medium_severity_spread: 0.25,
            temporal_span_years: 2,
            methodology_field: "study_method".to_string(),
        }
    }
}

// ============================================================================
// Validation & merge
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Standard deviations from the cross-source median that mark an anomaly
    pub anomaly_std_devs: f64,
    /// Minimum numeric observations before anomaly detection applies
    pub anomaly_min_samples: usize,
    /// Confidence multiplier for anomalous fields
    pub anomaly_penalty: f64,
}

impl ValidationConfig {
    fn validate(&self) -> PipelineResult<()> {
        if !(self.anomaly_std_devs > 0.0) {
            return Err(config_error("validation.anomaly_std_devs must be > 0"));
        }
        if self.anomaly_min_samples < 2 {
            return Err(config_error("validation.anomaly_min_samples must be >= 2"));
        }
        if !(self.anomaly_penalty > 0.0 && self.anomaly_penalty <= 1.0) {
            return Err(config_error("validation.anomaly_penalty must be within (0, 1]"));
        }
        Ok(())
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            anomaly_std_devs: 2.0,
            anomaly_min_samples: 3,
            anomaly_penalty: 0.75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Confidence ceiling for fields backed by one low-authority source
    pub single_source_ceiling: f64,
    /// Authority weights below this count as low authority
    pub low_authority_threshold: f64,
    /// Confidence multiplier for unresolved conflicts
    pub unresolved_penalty: f64,
    /// Importance of fields not named by the category schema
    pub default_importance: f64,
}

impl MergeConfig {
    fn validate(&self) -> PipelineResult<()> {
        check_unit_interval("merge.single_source_ceiling", self.single_source_ceiling)?;
        if !(self.unresolved_penalty > 0.0 && self.unresolved_penalty <= 1.0) {
            return Err(config_error("merge.unresolved_penalty must be within (0, 1]"));
        }
        if self.low_authority_threshold < 0.0 || self.default_importance < 0.0 {
            return Err(config_error("merge thresholds must be >= 0"));
        }
        Ok(())
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            single_source_ceiling: 0.5,
            low_authority_threshold: 4.0,
            unresolved_penalty: 0.8,
            default_importance: 0.5,
        }
    }
}

// ============================================================================
// Category schemas
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Numeric,
    Text,
}

/// Structural and range rules for one field of a category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Allowed units (empty = any)
    #[serde(default)]
    pub units: Vec<String>,
    /// Weight of this field in the data quality score
    #[serde(default = "default_field_importance")]
    pub importance: f64,
}

fn default_field_importance() -> f64 {
    1.0
}

impl FieldSpec {
    fn numeric(name: &str, required: bool, min: f64, max: f64, units: &[&str], importance: f64) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Numeric,
            required,
            min: Some(min),
            max: Some(max),
            units: units.iter().map(|u| u.to_string()).collect(),
            importance,
        }
    }

    fn text(name: &str, required: bool, importance: f64) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Text,
            required,
            min: None,
            max: None,
            units: Vec::new(),
            importance,
        }
    }
}

/// Schema of one category, loaded and validated with the configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySchema {
    pub category_id: String,
    pub fields: Vec<FieldSpec>,
}

impl CategorySchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn validate(&self) -> PipelineResult<()> {
        if self.category_id.trim().is_empty() {
            return Err(config_error("category_id must not be empty"));
        }
        let mut names = BTreeSet::new();
        for field in &self.fields {
            if !names.insert(field.name.as_str()) {
                return Err(config_error(format!(
                    "category '{}' declares field '{}' twice",
                    self.category_id, field.name
                )));
            }
            if !field.importance.is_finite() || field.importance < 0.0 {
                return Err(config_error(format!(
                    "field '{}.{}' importance must be >= 0",
                    self.category_id, field.name
                )));
            }
            match field.kind {
                FieldKind::Text if field.min.is_some() || field.max.is_some() => {
                    return Err(config_error(format!(
                        "text field '{}.{}' cannot declare a numeric range",
                        self.category_id, field.name
                    )))
                }
                FieldKind::Numeric => {
                    if let (Some(min), Some(max)) = (field.min, field.max) {
                        if min > max {
                            return Err(config_error(format!(
                                "field '{}.{}' has min {} > max {}",
                                self.category_id, field.name, min, max
                            )));
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn default_categories() -> Vec<CategorySchema> {
    vec![
        CategorySchema {
            category_id: "dosage".to_string(),
            fields: vec![
                FieldSpec::numeric("dose", true, 0.0, 10_000.0, &["mg", "mg/day"], 3.0),
                FieldSpec::text("dosing_frequency", false, 1.0),
                FieldSpec::text("indication", true, 1.0),
                FieldSpec::text("study_method", false, 0.0),
            ],
        },
        CategorySchema {
            category_id: "physicochemical".to_string(),
            fields: vec![
                FieldSpec::numeric("molecular_weight", true, 1.0, 5_000.0, &["g/mol", "Da"], 3.0),
                FieldSpec::numeric("melting_point", true, -100.0, 500.0, &["C"], 2.0),
                FieldSpec::numeric("log_p", true, -10.0, 15.0, &[], 2.0),
                FieldSpec::text("solubility", false, 1.0),
                FieldSpec::text("study_method", false, 0.0),
            ],
        },
        CategorySchema {
            category_id: "regulatory".to_string(),
            fields: vec![
                FieldSpec::text("approval_status", true, 2.0),
                FieldSpec::numeric("approval_year", false, 1900.0, 2100.0, &[], 1.0),
                FieldSpec::numeric("patent_expiry_year", false, 1900.0, 2100.0, &[], 1.0),
            ],
        },
    ]
}

// ============================================================================
// Scoring
// ============================================================================

/// One closed-open scoring interval `[min, max)`
///
/// `min = None` is an open lower bound (first range only);
/// `max = None` is an open upper bound (last range only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    pub score: u8,
    #[serde(default)]
    pub is_exclusion: bool,
}

impl ScoreRange {
    fn bounded(min: f64, max: f64, score: u8) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            score,
            is_exclusion: false,
        }
    }

    fn below(max: f64, score: u8) -> Self {
        Self {
            min: None,
            max: Some(max),
            score,
            is_exclusion: false,
        }
    }

    fn at_least(min: f64, score: u8) -> Self {
        Self {
            min: Some(min),
            max: None,
            score,
            is_exclusion: false,
        }
    }

    fn excluded(mut self) -> Self {
        self.is_exclusion = true;
        self
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value < max)
    }
}

/// Extracted numeric parameter feeding the scoring matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter name (key of weights and range tables)
    pub name: String,
    /// Display label used in rationale text
    pub label: String,
    /// Merged field holding the value
    pub field: String,
    /// Restrict lookup to one category (None = first category holding the field)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Accepted units (empty = any)
    #[serde(default)]
    pub units: Vec<String>,
}

impl ParameterSpec {
    fn new(name: &str, label: &str, category: &str, units: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            field: name.to_string(),
            category: Some(category.to_string()),
            units: units.iter().map(|u| u.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub parameters: Vec<ParameterSpec>,
    /// Category weights per parameter; must sum to 100
    pub weights: BTreeMap<String, f64>,
    /// Range tables: route → parameter → ordered ranges
    pub tables: BTreeMap<Route, BTreeMap<String, Vec<ScoreRange>>>,
}

impl ScoringConfig {
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn ranges(&self, route: Route, parameter: &str) -> Option<&[ScoreRange]> {
        self.tables
            .get(&route)
            .and_then(|t| t.get(parameter))
            .map(Vec::as_slice)
    }

    fn validate(&self) -> PipelineResult<()> {
        if self.parameters.is_empty() {
            return Err(config_error("scoring.parameters must not be empty"));
        }
        let mut names = BTreeSet::new();
        for p in &self.parameters {
            if !names.insert(p.name.as_str()) {
                return Err(config_error(format!("duplicate scoring parameter '{}'", p.name)));
            }
        }

        validate_weights(&self.weights, &names)?;

        for route in Route::ALL {
            let table = self.tables.get(&route).ok_or_else(|| {
                config_error(format!("no scoring table for route '{}'", route))
            })?;
            for name in &names {
                let ranges = table.get(*name).ok_or_else(|| {
                    config_error(format!("route '{}' has no ranges for parameter '{}'", route, name))
                })?;
                validate_ranges(route, name, ranges)?;
            }
            if let Some(extra) = table.keys().find(|k| !names.contains(k.as_str())) {
                return Err(config_error(format!(
                    "route '{}' has ranges for unknown parameter '{}'",
                    route, extra
                )));
            }
        }
        Ok(())
    }
}

/// Check a category weight set: covers exactly the parameters, each >= 0, sums to 100
pub fn validate_weights(weights: &BTreeMap<String, f64>, parameters: &BTreeSet<&str>) -> PipelineResult<()> {
    for name in parameters {
        if !weights.contains_key(*name) {
            return Err(config_error(format!("category weight missing for parameter '{}'", name)));
        }
    }
    for (name, w) in weights {
        if !parameters.contains(name.as_str()) {
            return Err(config_error(format!("category weight for unknown parameter '{}'", name)));
        }
        if !w.is_finite() || *w < 0.0 {
            return Err(config_error(format!("category weight for '{}' must be >= 0, got {}", name, w)));
        }
    }
    let sum: f64 = weights.values().sum();
    if (sum - 100.0).abs() > SUM_EPSILON {
        return Err(config_error(format!("category weights sum to {}, expected 100", sum)));
    }
    Ok(())
}

fn validate_ranges(route: Route, parameter: &str, ranges: &[ScoreRange]) -> PipelineResult<()> {
    let ctx = |msg: String| config_error(format!("route '{}' parameter '{}': {}", route, parameter, msg));

    if ranges.is_empty() {
        return Err(ctx("range table is empty".to_string()));
    }
    let last = ranges.len() - 1;
    for (i, range) in ranges.iter().enumerate() {
        if range.score > MAX_DISCRETE_SCORE {
            return Err(ctx(format!("range {} score {} exceeds {}", i, range.score, MAX_DISCRETE_SCORE)));
        }
        if range.min.is_none() && i != 0 {
            return Err(ctx(format!("range {} has an open lower bound but is not first", i)));
        }
        if range.max.is_none() && i != last {
            return Err(ctx(format!("range {} has an open upper bound but is not last", i)));
        }
        if let (Some(min), Some(max)) = (range.min, range.max) {
            if !(min < max) {
                return Err(ctx(format!("range {} is empty or inverted [{}, {})", i, min, max)));
            }
        }
        if i > 0 {
            let prev_max = ranges[i - 1].max;
            if prev_max != range.min {
                return Err(ctx(format!(
                    "ranges {} and {} leave a gap or overlap ({:?} vs {:?})",
                    i - 1,
                    i,
                    prev_max,
                    range.min
                )));
            }
        }
    }
    Ok(())
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let parameters = vec![
            ParameterSpec::new("dose", "Dose", "dosage", &["mg", "mg/day"]),
            ParameterSpec::new("molecular_weight", "Molecular weight", "physicochemical", &["g/mol", "Da"]),
            ParameterSpec::new("melting_point", "Melting point", "physicochemical", &["C"]),
            ParameterSpec::new("log_p", "LogP", "physicochemical", &[]),
        ];

        let weights = BTreeMap::from([
            ("dose".to_string(), 40.0),
            ("molecular_weight".to_string(), 30.0),
            ("melting_point".to_string(), 20.0),
            ("log_p".to_string(), 10.0),
        ]);

        let transdermal = BTreeMap::from([
            (
                "dose".to_string(),
                vec![
                    ScoreRange::bounded(0.0, 5.0, 9),
                    ScoreRange::bounded(5.0, 10.0, 8),
                    ScoreRange::bounded(10.0, 20.0, 7),
                    ScoreRange::bounded(20.0, 50.0, 5),
                    ScoreRange::bounded(50.0, 100.0, 3),
                    ScoreRange::at_least(100.0, 0).excluded(),
                ],
            ),
            (
                "molecular_weight".to_string(),
                vec![
                    ScoreRange::bounded(0.0, 200.0, 9),
                    ScoreRange::bounded(200.0, 300.0, 8),
                    ScoreRange::bounded(300.0, 400.0, 6),
                    ScoreRange::bounded(400.0, 500.0, 3),
                    ScoreRange::at_least(500.0, 0).excluded(),
                ],
            ),
            (
                "melting_point".to_string(),
                vec![
                    ScoreRange::below(100.0, 9),
                    ScoreRange::bounded(100.0, 150.0, 7),
                    ScoreRange::bounded(150.0, 200.0, 5),
                    ScoreRange::bounded(200.0, 250.0, 3),
                    ScoreRange::at_least(250.0, 1),
                ],
            ),
            (
                "log_p".to_string(),
                vec![
                    ScoreRange::below(0.0, 1),
                    ScoreRange::bounded(0.0, 1.0, 3),
                    ScoreRange::bounded(1.0, 2.0, 6),
                    ScoreRange::bounded(2.0, 3.0, 9),
                    ScoreRange::bounded(3.0, 4.0, 8),
                    ScoreRange::bounded(4.0, 5.0, 5),
                    ScoreRange::at_least(5.0, 2),
                ],
            ),
        ]);

        let transmucosal = BTreeMap::from([
            (
                "dose".to_string(),
                vec![
                    ScoreRange::bounded(0.0, 10.0, 9),
                    ScoreRange::bounded(10.0, 25.0, 7),
                    ScoreRange::bounded(25.0, 50.0, 5),
                    ScoreRange::bounded(50.0, 200.0, 3),
                    ScoreRange::at_least(200.0, 0).excluded(),
                ],
            ),
            (
                "molecular_weight".to_string(),
                vec![
                    ScoreRange::bounded(0.0, 300.0, 9),
                    ScoreRange::bounded(300.0, 500.0, 7),
                    ScoreRange::bounded(500.0, 1000.0, 3),
                    ScoreRange::at_least(1000.0, 0).excluded(),
                ],
            ),
            (
                "melting_point".to_string(),
                vec![
                    ScoreRange::below(150.0, 8),
                    ScoreRange::bounded(150.0, 250.0, 6),
                    ScoreRange::at_least(250.0, 3),
                ],
            ),
            (
                "log_p".to_string(),
                vec![
                    ScoreRange::below(-1.0, 2),
                    ScoreRange::bounded(-1.0, 1.0, 5),
                    ScoreRange::bounded(1.0, 3.0, 9),
                    ScoreRange::bounded(3.0, 5.0, 6),
                    ScoreRange::at_least(5.0, 2),
                ],
            ),
        ]);

        Self {
            parameters,
            weights,
            tables: BTreeMap::from([(Route::Transdermal, transdermal), (Route::Transmucosal, transmucosal)]),
        }
    }
}

// ============================================================================
// Verdict, synthesis, orchestration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerdictConfig {
    /// Percentage at or above which a route is GO
    pub go_threshold: f64,
    /// Percentage at or above which a route is CONDITIONAL
    pub conditional_threshold: f64,
    /// Distance (percentage points) from a threshold that earns full margin confidence
    pub margin_saturation: f64,
}

impl VerdictConfig {
    fn validate(&self) -> PipelineResult<()> {
        if !(0.0 <= self.conditional_threshold
            && self.conditional_threshold <= self.go_threshold
            && self.go_threshold <= 100.0)
        {
            return Err(config_error(
                "verdict thresholds must satisfy 0 <= conditional <= go <= 100",
            ));
        }
        if !(self.margin_saturation > 0.0) {
            return Err(config_error("verdict.margin_saturation must be > 0"));
        }
        Ok(())
    }
}

impl Default for VerdictConfig {
    fn default() -> Self {
        Self {
            go_threshold: 70.0,
            conditional_threshold: 50.0,
            margin_saturation: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Run narrative synthesis when a synthesizer is available
    pub enabled: bool,
    pub retry: RetryPolicy,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Concurrent category pipelines (bounded by external LLM concurrency)
    pub worker_pool_size: usize,
    /// Time budget for one category's Phase 1 stages, seconds
    pub category_budget_secs: u64,
    /// EventBus channel capacity
    pub event_capacity: usize,
}

impl OrchestrationConfig {
    fn validate(&self) -> PipelineResult<()> {
        if self.worker_pool_size == 0 {
            return Err(config_error("orchestration.worker_pool_size must be >= 1"));
        }
        if self.category_budget_secs == 0 {
            return Err(config_error("orchestration.category_budget_secs must be >= 1"));
        }
        if self.event_capacity == 0 {
            return Err(config_error("orchestration.event_capacity must be >= 1"));
        }
        Ok(())
    }
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            category_budget_secs: 120,
            event_capacity: 256,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_config_error(config: &PipelineConfig, needle: &str) {
        match config.validate() {
            Err(PipelineError::Configuration(msg)) => {
                assert!(msg.contains(needle), "expected '{}' in '{}'", needle, msg)
            }
            other => panic!("expected ConfigurationError containing '{}', got {:?}", needle, other),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_default_weights_match_reference() {
        let config = PipelineConfig::default();
        assert_eq!(config.scoring.weights["dose"], 40.0);
        assert_eq!(config.scoring.weights["molecular_weight"], 30.0);
        assert_eq!(config.scoring.weights["melting_point"], 20.0);
        assert_eq!(config.scoring.weights["log_p"], 10.0);
        assert_eq!(config.authority.weight_for(SourceType::PaidApi), 10.0);
        assert_eq!(config.authority.weight_for(SourceType::News), 1.0);
    }

    #[test]
    fn test_other_gets_minimum_authority() {
        let config = AuthorityConfig::default();
        assert_eq!(config.weight_for(SourceType::Other), 1.0);
        assert_eq!(config.max_weight(), 10.0);
    }

    #[test]
    fn test_weights_not_summing_to_100_rejected() {
        let mut config = PipelineConfig::default();
        config.scoring.weights.insert("log_p".to_string(), 15.0);
        assert_config_error(&config, "sum to 105");
    }

    #[test]
    fn test_weight_for_unknown_parameter_rejected() {
        let mut config = PipelineConfig::default();
        config.scoring.weights.insert("half_life".to_string(), 0.0);
        assert_config_error(&config, "unknown parameter 'half_life'");
    }

    #[test]
    fn test_missing_weight_rejected() {
        let mut config = PipelineConfig::default();
        config.scoring.weights.remove("dose");
        assert_config_error(&config, "missing for parameter 'dose'");
    }

    #[test]
    fn test_range_gap_rejected() {
        let mut config = PipelineConfig::default();
        let ranges = config
            .scoring
            .tables
            .get_mut(&Route::Transdermal)
            .unwrap()
            .get_mut("dose")
            .unwrap();
        ranges[1].min = Some(6.0);
        assert_config_error(&config, "gap or overlap");
    }

    #[test]
    fn test_range_score_above_nine_rejected() {
        let mut config = PipelineConfig::default();
        config
            .scoring
            .tables
            .get_mut(&Route::Transmucosal)
            .unwrap()
            .get_mut("log_p")
            .unwrap()[0]
            .score = 10;
        assert_config_error(&config, "exceeds 9");
    }

    #[test]
    fn test_open_bound_in_middle_rejected() {
        let mut config = PipelineConfig::default();
        config
            .scoring
            .tables
            .get_mut(&Route::Transdermal)
            .unwrap()
            .get_mut("melting_point")
            .unwrap()[2]
            .max = None;
        assert_config_error(&config, "open upper bound");
    }

    #[test]
    fn test_missing_route_table_rejected() {
        let mut config = PipelineConfig::default();
        config.scoring.tables.remove(&Route::Transmucosal);
        assert_config_error(&config, "no scoring table for route 'transmucosal'");
    }

    #[test]
    fn test_credibility_weights_must_sum_to_one() {
        let mut config = PipelineConfig::default();
        config.credibility.metadata_weight = 0.3;
        assert_config_error(&config, "credibility weights sum");
    }

    #[test]
    fn test_threshold_order_enforced() {
        let mut config = PipelineConfig::default();
        config.verdict.conditional_threshold = 80.0;
        assert_config_error(&config, "conditional <= go");
    }

    #[test]
    fn test_duplicate_category_rejected() {
        let mut config = PipelineConfig::default();
        let copy = config.categories[0].clone();
        config.categories.push(copy);
        assert_config_error(&config, "duplicate category schema");
    }

    #[test]
    fn test_text_field_with_range_rejected() {
        let mut config = PipelineConfig::default();
        config.categories[2].fields[0].min = Some(0.0);
        assert_config_error(&config, "cannot declare a numeric range");
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = PipelineConfig::default();
        config.orchestration.worker_pool_size = 0;
        assert_config_error(&config, "worker_pool_size");
    }

    #[test]
    fn test_domain_rule_matching() {
        let suffix = DomainRule::new(".gov", SourceType::Government);
        assert!(suffix.matches("www.fda.gov"));
        assert!(!suffix.matches("gov.example.com"));

        let host = DomainRule::new("nature.com", SourceType::PeerReviewed);
        assert!(host.matches("nature.com"));
        assert!(host.matches("www.nature.com"));
        assert!(!host.matches("signature.com"));
    }

    #[test]
    fn test_score_range_closed_open() {
        let range = ScoreRange::bounded(10.0, 20.0, 7);
        assert!(range.contains(10.0));
        assert!(range.contains(19.999));
        assert!(!range.contains(20.0));
        assert!(ScoreRange::below(0.0, 1).contains(-1e9));
        assert!(ScoreRange::at_least(5.0, 2).contains(1e9));
    }

    #[test]
    fn test_config_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pdi-vd.toml");
        let config = PipelineConfig::default();

        pdi_common::config::write_toml(&config, &path).unwrap();
        let loaded = PipelineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(
            &path,
            "version = \"site-7\"\n[verdict]\ngo_threshold = 75.0\n",
        )
        .unwrap();

        let loaded = PipelineConfig::load(&path).unwrap();
        assert_eq!(loaded.version, "site-7");
        assert_eq!(loaded.verdict.go_threshold, 75.0);
        assert_eq!(loaded.verdict.conditional_threshold, 50.0);
        assert_eq!(loaded.scoring.parameters.len(), 4);
    }

    #[test]
    fn test_invalid_toml_weights_reported_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad-weights.toml");
        std::fs::write(
            &path,
            "[scoring.weights]\ndose = 50.0\nmolecular_weight = 30.0\nmelting_point = 20.0\nlog_p = 10.0\n",
        )
        .unwrap();

        let err = PipelineConfig::load(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(ref m) if m.contains("sum to 110")));
    }
}
