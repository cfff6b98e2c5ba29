//! Pipeline orchestration
//!
//! # Flow per request
//! 1. Phase 1: every category runs `CategoryPipeline` as its own task, bounded
//!    by the worker pool and by the per-category time budget
//! 2. Phase 2: Score → Assess → Verdict per route over all merged results
//! 3. Synthesis: one narrative per merged category, on the worker pool
//! 4. Report: statuses, verdicts, verification summary, events
//!
//! A category failure never blocks its siblings. Every category ends as
//! completed, partial, failed or cancelled, with the reason in the audit trail.

use super::pipeline::{CategoryPipeline, Phase1Output};
use super::{AnalysisRequest, CategoryOutcome};
use crate::assessment::{ScoringMatrixEngine, ScoringOutcome, VerdictGenerator, WeightedAssessmentEngine};
use crate::config::PipelineConfig;
use crate::db::ResultStore;
use crate::error::{PipelineError, PipelineResult};
use crate::report::{recommend_route, IntelligenceReport, RouteReport};
use crate::synthesis::{SummarySynthesizer, Synthesizer};
use crate::types::{AuditStage, AuditTrail, CategoryResult, Route, SourceProfile, Verdict};
use crate::verification::VerificationReporter;
use chrono::Utc;
use pdi_common::events::{CategoryStatus, EventBus, PipelineEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

const ACTOR: &str = "PipelineOrchestrator";

/// Coordinates Phase 1, Phase 2 and synthesis for requests
pub struct PipelineOrchestrator {
    config: Arc<PipelineConfig>,
    store: Arc<dyn ResultStore>,
    synthesizer: Option<SummarySynthesizer>,
    workers: Arc<Semaphore>,
    events: Option<EventBus>,
    cancel: CancellationToken,
}

impl PipelineOrchestrator {
    /// Create an orchestrator
    ///
    /// # Errors
    /// `Configuration` when the configuration is invalid; nothing runs.
    pub fn new(config: PipelineConfig, store: Arc<dyn ResultStore>) -> PipelineResult<Self> {
        config.validate()?;
        let workers = Arc::new(Semaphore::new(config.orchestration.worker_pool_size));

        Ok(Self {
            config: Arc::new(config),
            store,
            synthesizer: None,
            workers,
            events: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Attach the narrative collaborator (ignored when synthesis is disabled)
    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        if self.config.synthesis.enabled {
            self.synthesizer = Some(SummarySynthesizer::new(synthesizer, self.config.synthesis.retry.clone()));
        } else {
            info!("Synthesis disabled in configuration, collaborator not attached");
        }
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Share a cancellation token (e.g. one cancelled on Ctrl-C)
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage for one request
    ///
    /// # Errors
    /// `Storage` when the audit trail cannot be written. Every other
    /// failure, including a rejected verdict write, is reported in the
    /// category outcomes.
    pub async fn process_request(&self, request: AnalysisRequest) -> PipelineResult<IntelligenceReport> {
        let request_id = request.request_id;
        let as_of = request.reference_date();

        info!(
            %request_id,
            drug = %request.drug_name,
            categories = request.categories.len(),
            %as_of,
            "Processing request"
        );
        self.emit(PipelineEvent::RequestStarted {
            request_id,
            drug_name: request.drug_name.clone(),
            category_count: request.categories.len(),
            timestamp: Utc::now(),
        });

        let budget = Duration::from_secs(self.config.orchestration.category_budget_secs);
        let mut handles = Vec::with_capacity(request.categories.len());
        for (category, observations) in request.categories {
            let config = Arc::clone(&self.config);
            let store = Arc::clone(&self.store);
            let workers = Arc::clone(&self.workers);
            let cancel = self.cancel.clone();
            let events = self.events.clone();
            let name = category.clone();

            let handle = tokio::spawn(async move {
                let _permit = workers.acquire_owned().await.ok();
                let pipeline = CategoryPipeline::new(&config, store.as_ref(), &cancel, events.as_ref());
                // Budget starts once a worker picks the category up and ends
                // before publishing
                match tokio::time::timeout(budget, pipeline.prepare(request_id, &name, &observations, as_of)).await {
                    Ok(Ok(output)) => Ok(pipeline.publish(request_id, &name, output).await),
                    Ok(Err(err)) => Ok(Err(err)),
                    Err(elapsed) => Err(elapsed),
                }
            });
            handles.push((category, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        let mut profiles: Vec<SourceProfile> = Vec::new();
        let mut trail = AuditTrail::new(request_id, None);

        for (category, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(Ok(Phase1Output { result, profiles: p }))) => {
                    profiles.extend(p);
                    CategoryOutcome::merged(result)
                }
                Ok(Ok(Err(err))) => CategoryOutcome::from_error(&category, &err),
                Ok(Err(_elapsed)) => CategoryOutcome::terminal(
                    &category,
                    CategoryStatus::Failed,
                    format!("exceeded time budget of {}s", budget.as_secs()),
                ),
                Err(join_err) => CategoryOutcome::terminal(
                    &category,
                    CategoryStatus::Failed,
                    format!("category task aborted: {}", join_err),
                ),
            };

            if outcome.status == CategoryStatus::Failed {
                warn!(
                    %request_id,
                    category = %outcome.category,
                    reason = outcome.reason.as_deref().unwrap_or(""),
                    "Category failed in Phase 1"
                );
            }
            outcomes.push(outcome);
        }

        self.finish(request_id, &request.drug_name, outcomes, &profiles, &mut trail)
            .await
    }

    /// Run several requests concurrently on the shared worker pool
    ///
    /// Results are returned in input order.
    pub async fn process_batch(&self, requests: Vec<AnalysisRequest>) -> Vec<PipelineResult<IntelligenceReport>> {
        info!(requests = requests.len(), "Processing batch");
        futures::future::join_all(requests.into_iter().map(|r| self.process_request(r))).await
    }

    /// Re-run Phase 2 and synthesis over previously merged results
    ///
    /// Verification is not repeated, so the summary carries no source
    /// profiles.
    pub async fn reassess(
        &self,
        request_id: Uuid,
        drug_name: &str,
        results: Vec<CategoryResult>,
    ) -> PipelineResult<IntelligenceReport> {
        info!(%request_id, drug = drug_name, categories = results.len(), "Reassessing merged results");
        self.emit(PipelineEvent::RequestStarted {
            request_id,
            drug_name: drug_name.to_string(),
            category_count: results.len(),
            timestamp: Utc::now(),
        });

        let mut trail = AuditTrail::new(request_id, None);
        trail.record(
            AuditStage::Orchestration,
            ACTOR,
            format!("request:{}", request_id),
            "phase2:rerun",
            format!("reassessing {} previously merged categor(ies)", results.len()),
        );

        let outcomes = results.into_iter().map(CategoryOutcome::merged).collect();
        self.finish(request_id, drug_name, outcomes, &[], &mut trail).await
    }

    /// Phase 2, synthesis, terminal statuses and report
    async fn finish(
        &self,
        request_id: Uuid,
        drug_name: &str,
        mut outcomes: Vec<CategoryOutcome>,
        profiles: &[SourceProfile],
        trail: &mut AuditTrail,
    ) -> PipelineResult<IntelligenceReport> {
        outcomes.sort_by(|a, b| a.category.cmp(&b.category));

        if self.cancel.is_cancelled() {
            for outcome in outcomes.iter_mut().filter(|o| o.is_live()) {
                outcome.status = CategoryStatus::Cancelled;
                outcome.reason = Some("cancelled before assessment".to_string());
            }
        }

        let results: Vec<CategoryResult> = outcomes
            .iter()
            .filter(|o| o.is_live())
            .filter_map(|o| o.result.clone())
            .collect();

        let (routes, scoring) = if results.is_empty() {
            info!(%request_id, "No merged categories, skipping Phase 2");
            (Vec::new(), Vec::new())
        } else {
            let phase2 = self.decide(request_id, &results, trail).await;
            if !phase2.failures.is_empty() {
                let reason = phase2.failures.join("; ");
                for outcome in outcomes.iter_mut().filter(|o| o.is_live()) {
                    outcome.status = CategoryStatus::Failed;
                    outcome.reason = Some(reason.clone());
                }
            }
            if let Err(err) = flush(self.store.as_ref(), trail).await {
                warn!(%request_id, error = %err, "Phase 2 audit records not written, retrying with the final records");
            }
            (phase2.routes, phase2.scoring)
        };

        let verdicts: Vec<Verdict> = routes.iter().map(|r| r.verdict.clone()).collect();
        self.synthesize_all(request_id, drug_name, &mut outcomes, &scoring, &verdicts)
            .await;

        for outcome in outcomes.iter_mut() {
            settle_status(outcome, self.synthesizer.is_some());
            trail.record(
                AuditStage::Orchestration,
                ACTOR,
                format!("category:{}", outcome.category),
                format!("status:{}", outcome.status),
                outcome.reason.clone().unwrap_or_else(|| "all stages succeeded".to_string()),
            );
            self.emit(PipelineEvent::CategoryFinished {
                request_id,
                category: outcome.category.clone(),
                status: outcome.status,
                reason: outcome.reason.clone(),
                timestamp: Utc::now(),
            });
        }
        flush(self.store.as_ref(), trail).await?;

        let verification = VerificationReporter::new().summarize(&results, profiles);
        let recommended_route = recommend_route(&routes);

        let report = IntelligenceReport {
            request_id,
            drug_name: drug_name.to_string(),
            categories: outcomes,
            routes,
            verification,
            recommended_route,
        };

        info!(
            %request_id,
            completed = report.count(CategoryStatus::Completed),
            partial = report.count(CategoryStatus::Partial),
            failed = report.count(CategoryStatus::Failed),
            cancelled = report.count(CategoryStatus::Cancelled),
            recommended = ?report.recommended_route,
            "Request complete"
        );
        self.emit(PipelineEvent::RequestCompleted {
            request_id,
            completed: report.count(CategoryStatus::Completed),
            partial: report.count(CategoryStatus::Partial),
            failed: report.count(CategoryStatus::Failed),
            cancelled: report.count(CategoryStatus::Cancelled),
            timestamp: Utc::now(),
        });

        Ok(report)
    }

    /// Phase 2 for every route
    ///
    /// A route whose verdict cannot be persisted is left out of the report
    /// and its storage failure is returned; the remaining routes still run.
    /// Audit records stay in `trail` for the caller to flush.
    async fn decide(&self, request_id: Uuid, results: &[CategoryResult], trail: &mut AuditTrail) -> Phase2Output {
        info!(%request_id, categories = results.len(), "Phase 2: SCORING");

        let scorer = ScoringMatrixEngine::new(&self.config);
        let assessor = WeightedAssessmentEngine::new(&self.config);
        let verdicts = VerdictGenerator::new(&self.config);

        let mut output = Phase2Output::default();
        for route in Route::ALL {
            let scoring = scorer.score(route, results, trail);
            let assessment = assessor.assess(&scoring, trail);
            let verdict = verdicts.generate(&assessment, &scoring, results, trail);

            if let Err(err) = self.store.store_verdict(request_id, &verdict).await {
                let err = PipelineError::from(err);
                warn!(%request_id, %route, error = %err, "Verdict not persisted");
                trail.record(
                    AuditStage::Orchestration,
                    ACTOR,
                    format!("route:{}", route),
                    "verdict:unpersisted",
                    format!("{} verdict withheld from the report: {}", route, err),
                );
                output.failures.push(format!("{} verdict not persisted: {}", route, err));
                continue;
            }
            self.emit(PipelineEvent::VerdictReached {
                request_id,
                route: route.to_string(),
                decision: verdict.decision.to_string(),
                confidence: verdict.confidence,
                timestamp: Utc::now(),
            });

            output.routes.push(RouteReport {
                route,
                scores: scoring.entries.clone(),
                omitted: scoring.omitted.clone(),
                assessment,
                verdict,
            });
            output.scoring.push(scoring);
        }

        output
    }

    /// One narrative per live category, concurrently on the worker pool
    async fn synthesize_all(
        &self,
        request_id: Uuid,
        drug_name: &str,
        outcomes: &mut [CategoryOutcome],
        scoring: &[ScoringOutcome],
        verdicts: &[Verdict],
    ) {
        let Some(synthesizer) = &self.synthesizer else {
            return;
        };

        let mut handles = Vec::new();
        for (index, outcome) in outcomes.iter().enumerate() {
            let Some(result) = outcome.result.as_ref().filter(|_| outcome.is_live()) else {
                continue;
            };
            let payload = SummarySynthesizer::build_payload(request_id, drug_name, result, scoring, verdicts);
            let synthesizer = synthesizer.clone();
            let store = Arc::clone(&self.store);
            let workers = Arc::clone(&self.workers);
            let cancel = self.cancel.clone();

            let handle = tokio::spawn(async move {
                let _permit = workers.acquire_owned().await.ok();
                if cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled("synthesis".to_string()));
                }
                let mut trail = AuditTrail::new(payload.request_id, Some(&payload.category));
                let narrative = synthesizer.synthesize(&payload, &mut trail).await;
                store.append_audit(&trail.drain()).await?;
                Ok(narrative)
            });
            handles.push((index, handle));
        }

        info!(%request_id, categories = handles.len(), "Synthesis: NARRATIVES");
        for (index, handle) in handles {
            let outcome = &mut outcomes[index];
            match handle.await {
                Ok(Ok(narrative)) => outcome.narrative = narrative,
                Ok(Err(err)) => outcome.record_error(&err),
                Err(join_err) => {
                    warn!(%request_id, category = %outcome.category, error = %join_err, "Synthesis task aborted");
                }
            }
        }
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            events.emit_lossy(event);
        }
    }
}

/// Phase 2 results over every route
#[derive(Default)]
struct Phase2Output {
    routes: Vec<RouteReport>,
    scoring: Vec<ScoringOutcome>,
    /// One entry per route whose verdict was not persisted
    failures: Vec<String>,
}

/// Append the collected records; they stay in `trail` when the write fails
async fn flush(store: &dyn ResultStore, trail: &mut AuditTrail) -> PipelineResult<()> {
    store.append_audit(trail.records()).await?;
    trail.drain();
    Ok(())
}

/// Final status of a category that produced a merged result
///
/// Failed and cancelled outcomes are already terminal.
fn settle_status(outcome: &mut CategoryOutcome, synthesis_attached: bool) {
    if !outcome.is_live() {
        return;
    }

    let mut degraded = Vec::new();
    if outcome.result.as_ref().map_or(false, |r| r.insufficient_data) {
        degraded.push("insufficient data");
    }
    if outcome.narrative.is_none() {
        degraded.push(if synthesis_attached {
            "narrative unavailable"
        } else {
            "no narrative collaborator configured"
        });
    }

    if degraded.is_empty() {
        outcome.status = CategoryStatus::Completed;
        outcome.reason = None;
    } else {
        outcome.status = CategoryStatus::Partial;
        outcome.reason = Some(degraded.join("; "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::synthesis::testing::ScriptedSynthesizer;
    use crate::types::{FieldValue, RawObservation};
    use crate::utils::RetryPolicy;
    use chrono::NaiveDate;

    fn fast_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.synthesis.retry = RetryPolicy {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            multiplier: 2.0,
            call_timeout_ms: 1_000,
        };
        config
    }

    fn request() -> AnalysisRequest {
        let published = NaiveDate::from_ymd_opt(2023, 4, 1).unwrap();
        AnalysisRequest::new("ketoprofen")
            .as_of(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
            .with_category(
                "dosage",
                vec![RawObservation::new("pubmed-1", "pubmed_search")
                    .with_url("https://pubmed.ncbi.nlm.nih.gov/1/")
                    .published(published)
                    .with_authors(&["Lee K"])
                    .with_field("dose", FieldValue::numeric(15.0, Some("mg")))
                    .with_field("indication", FieldValue::text("pain"))],
            )
            .with_category(
                "physicochemical",
                vec![RawObservation::new("perplexity-1", "perplexity")
                    .published(published)
                    .with_field("molecular_weight", FieldValue::numeric(254.3, Some("g/mol")))
                    .with_field("melting_point", FieldValue::numeric(94.0, Some("C")))
                    .with_field("log_p", FieldValue::numeric(3.1, None))],
            )
    }

    #[tokio::test]
    async fn test_request_completes_with_narratives() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = PipelineOrchestrator::new(fast_config(), store.clone())
            .unwrap()
            .with_synthesizer(Arc::new(ScriptedSynthesizer::new(0)));

        let report = orchestrator.process_request(request()).await.unwrap();

        assert_eq!(report.categories.len(), 2);
        for outcome in &report.categories {
            assert_eq!(outcome.status, CategoryStatus::Completed, "{:?}", outcome.reason);
            assert!(outcome.narrative.is_some());
        }
        assert_eq!(report.routes.len(), 2);
        assert_eq!(store.verdicts(report.request_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_synthesis_failure_degrades_to_partial() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = PipelineOrchestrator::new(fast_config(), store)
            .unwrap()
            .with_synthesizer(Arc::new(ScriptedSynthesizer::new(u32::MAX)));

        let report = orchestrator.process_request(request()).await.unwrap();

        for outcome in &report.categories {
            assert_eq!(outcome.status, CategoryStatus::Partial);
            assert_eq!(outcome.reason.as_deref(), Some("narrative unavailable"));
            assert!(outcome.result.is_some());
        }
        // Verdicts are unaffected by the missing narrative
        assert_eq!(report.routes.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_running() {
        let mut config = PipelineConfig::default();
        config.scoring.weights.insert("dose".to_string(), 50.0);
        let err = PipelineOrchestrator::new(config, Arc::new(MemoryStore::new())).err().unwrap();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_events_cover_request_lifecycle() {
        let bus = EventBus::new(128);
        let mut rx = bus.subscribe();
        let orchestrator = PipelineOrchestrator::new(fast_config(), Arc::new(MemoryStore::new()))
            .unwrap()
            .with_event_bus(bus);

        orchestrator.process_request(request()).await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.event_type());
        }
        assert_eq!(kinds.first(), Some(&"RequestStarted"));
        assert_eq!(kinds.last(), Some(&"RequestCompleted"));
        assert_eq!(kinds.iter().filter(|k| **k == "VerdictReached").count(), 2);
        assert_eq!(kinds.iter().filter(|k| **k == "CategoryFinished").count(), 2);
    }

    #[test]
    fn test_settle_status_combines_reasons() {
        let mut outcome = CategoryOutcome::merged(CategoryResult {
            category_id: "regulatory".to_string(),
            request_id: Uuid::nil(),
            merged_fields: Default::default(),
            data_quality_score: 0.0,
            conflicts: vec![],
            validation_issues: vec![],
            insufficient_data: true,
        });
        settle_status(&mut outcome, true);
        assert_eq!(outcome.status, CategoryStatus::Partial);
        assert_eq!(outcome.reason.as_deref(), Some("insufficient data; narrative unavailable"));
    }
}
