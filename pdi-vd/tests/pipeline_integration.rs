// End-to-end pipeline tests
//
// Runs whole requests through PipelineOrchestrator with an in-memory store
// and in-process synthesizers, so no network or database is needed.

mod helpers;

use helpers::*;
use pdi_common::events::CategoryStatus;
use pdi_vd::db::{MemoryStore, ResultStore};
use pdi_vd::types::{AuditStage, Decision, Route};
use pdi_vd::{AnalysisRequest, PipelineConfig, PipelineError, PipelineOrchestrator};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn orchestrator(store: Arc<MemoryStore>) -> PipelineOrchestrator {
    PipelineOrchestrator::new(PipelineConfig::default(), store)
        .unwrap()
        .with_synthesizer(Arc::new(EchoSynthesizer))
}

// ================================================================================================
// Reference request
// ================================================================================================

#[tokio::test]
async fn reference_request_produces_route_verdicts() {
    let store = Arc::new(MemoryStore::new());
    let report = orchestrator(store.clone())
        .process_request(reference_request())
        .await
        .unwrap();

    let transdermal = report.route(Route::Transdermal).unwrap();
    let scores: Vec<(&str, u8)> = transdermal
        .scores
        .iter()
        .map(|s| (s.parameter_name.as_str(), s.discrete_score))
        .collect();
    assert_eq!(
        scores,
        vec![("dose", 7), ("molecular_weight", 3), ("melting_point", 5), ("log_p", 9)]
    );
    assert!((transdermal.assessment.percentage - 62.22).abs() < 0.01);
    assert_eq!(transdermal.verdict.decision, Decision::Conditional);
    assert!(transdermal.verdict.supporting_reasons.len() <= 3);
    assert!(transdermal.verdict.key_risks.len() <= 3);

    // 7/7/6/9 on the transmucosal tables
    let transmucosal = report.route(Route::Transmucosal).unwrap();
    assert!((transmucosal.assessment.percentage - 700.0 / 9.0).abs() < 1e-6);
    assert_eq!(transmucosal.verdict.decision, Decision::Go);
    assert_eq!(report.recommended_route, Some(Route::Transmucosal));

    for outcome in &report.categories {
        assert_eq!(outcome.status, CategoryStatus::Completed, "{}: {:?}", outcome.category, outcome.reason);
        assert!(outcome.narrative.as_deref().unwrap().starts_with("ketoprofen"));
    }
}

#[tokio::test]
async fn disputed_source_does_not_override_verified_value() {
    let store = Arc::new(MemoryStore::new());
    let report = orchestrator(store).process_request(reference_request()).await.unwrap();

    let dosage = report.category("dosage").unwrap().result.as_ref().unwrap();
    let dose = &dosage.merged_fields["dose"];
    assert!(!dose.enrichment);
    assert!(!dose.contributing_sources.contains(&"news-1".to_string()));
    let value = dose.value.as_number().unwrap();
    assert!((15.0..=15.31).contains(&value));
}

#[tokio::test]
async fn every_decision_is_audited() {
    let store = Arc::new(MemoryStore::new());
    let report = orchestrator(store.clone())
        .process_request(reference_request())
        .await
        .unwrap();

    let trail = store.audit_trail(report.request_id).await.unwrap();
    let stages: HashSet<AuditStage> = trail.iter().map(|r| r.stage).collect();
    for stage in [
        AuditStage::Authentication,
        AuditStage::ConflictResolution,
        AuditStage::Validation,
        AuditStage::Merge,
        AuditStage::Scoring,
        AuditStage::Assessment,
        AuditStage::Verdict,
        AuditStage::Synthesis,
        AuditStage::Orchestration,
    ] {
        assert!(stages.contains(&stage), "no audit record for {}", stage);
    }
    assert!(trail.iter().all(|r| !r.decision_reasoning.is_empty()));

    // One authentication record per observation
    let authentications = trail.iter().filter(|r| r.stage == AuditStage::Authentication).count();
    assert_eq!(authentications, 6);
}

// ================================================================================================
// Exclusions
// ================================================================================================

#[tokio::test]
async fn exclusion_range_forces_no_go() {
    let request = AnalysisRequest::new("ketoprofen")
        .as_of(as_of())
        .with_category("dosage", dosage_observations(250.0))
        .with_category("physicochemical", physicochemical_observations());

    let report = orchestrator(Arc::new(MemoryStore::new()))
        .process_request(request)
        .await
        .unwrap();

    for route in &report.routes {
        let dose = route.scores.iter().find(|s| s.parameter_name == "dose").unwrap();
        assert!(dose.is_exclusion, "dose not excluded for {}", route.route);
        assert_eq!(route.verdict.decision, Decision::NoGo);
        assert_eq!(route.verdict.confidence, 1.0);
        assert!(route.verdict.key_risks[0].starts_with("Dose"));
    }
    assert_eq!(report.recommended_route, None);
}

// ================================================================================================
// Partial failure
// ================================================================================================

#[tokio::test]
async fn unconfigured_category_fails_alone() {
    let request = reference_request().with_category("pharmacokinetics", dosage_observations(15.0));

    let report = orchestrator(Arc::new(MemoryStore::new()))
        .process_request(request)
        .await
        .unwrap();

    assert_eq!(report.categories.len(), 4);
    let failed = report.category("pharmacokinetics").unwrap();
    assert_eq!(failed.status, CategoryStatus::Failed);
    assert!(failed.result.is_none());
    assert!(failed.reason.as_deref().unwrap().contains("no schema"));

    assert_eq!(report.count(CategoryStatus::Completed), 3);
    assert_eq!(report.routes.len(), 2);
}

#[tokio::test]
async fn synthesis_outage_delivers_partial_results() {
    let report = PipelineOrchestrator::new(PipelineConfig::default(), Arc::new(MemoryStore::new()))
        .unwrap()
        .with_synthesizer(Arc::new(UnavailableSynthesizer))
        .process_request(reference_request())
        .await
        .unwrap();

    assert_eq!(report.count(CategoryStatus::Partial), 3);
    for outcome in &report.categories {
        assert!(outcome.narrative.is_none());
        assert!(outcome.result.is_some());
    }
    assert_eq!(report.route(Route::Transdermal).unwrap().verdict.decision, Decision::Conditional);
}

#[tokio::test]
async fn category_without_usable_data_is_partial() {
    let request = reference_request().with_category(
        "regulatory",
        vec![pdi_vd::types::RawObservation::new("blank-1", "perplexity").published(as_of())],
    );

    let report = orchestrator(Arc::new(MemoryStore::new()))
        .process_request(request)
        .await
        .unwrap();

    let regulatory = report.category("regulatory").unwrap();
    assert_eq!(regulatory.status, CategoryStatus::Partial);
    let result = regulatory.result.as_ref().unwrap();
    assert!(result.insufficient_data);
    assert_eq!(result.data_quality_score, 0.0);
    assert!(report.verification.insufficient_categories.contains(&"regulatory".to_string()));
}

#[tokio::test]
async fn category_over_budget_fails_without_blocking_siblings() {
    let mut config = PipelineConfig::default();
    config.orchestration.category_budget_secs = 1;
    let inner = Arc::new(MemoryStore::new());
    let store = Arc::new(StallingStore {
        inner: inner.clone(),
        category: "dosage".to_string(),
        delay: Duration::from_secs(30),
    });

    let report = PipelineOrchestrator::new(config, store)
        .unwrap()
        .with_synthesizer(Arc::new(EchoSynthesizer))
        .process_request(reference_request())
        .await
        .unwrap();

    let dosage = report.category("dosage").unwrap();
    assert_eq!(dosage.status, CategoryStatus::Failed);
    assert_eq!(dosage.reason.as_deref(), Some("exceeded time budget of 1s"));
    assert!(dosage.result.is_none());
    assert_eq!(report.category("physicochemical").unwrap().status, CategoryStatus::Completed);
    assert_eq!(report.category("regulatory").unwrap().status, CategoryStatus::Completed);
    assert_eq!(report.routes.len(), 2);

    // Nothing of the timed-out category reached the store
    let published = inner.category_results(report.request_id).await.unwrap();
    assert_eq!(published.len(), 2);
    assert!(published.iter().all(|r| r.category_id != "dosage"));
    assert!(inner.conflicts(report.request_id).await.iter().all(|c| c.category != "dosage"));

    let trail = inner.audit_trail(report.request_id).await.unwrap();
    assert!(trail.iter().any(|r| {
        r.input_ref == "category:dosage" && r.output_ref == "status:failed" && r.decision_reasoning.contains("time budget")
    }));
}

#[tokio::test]
async fn rejected_verdict_write_still_settles_every_category() {
    let inner = Arc::new(MemoryStore::new());
    let store = Arc::new(VerdictRejectingStore { inner: inner.clone() });

    let report = PipelineOrchestrator::new(PipelineConfig::default(), store)
        .unwrap()
        .with_synthesizer(Arc::new(EchoSynthesizer))
        .process_request(reference_request())
        .await
        .unwrap();

    assert!(report.routes.is_empty());
    assert_eq!(report.recommended_route, None);
    assert_eq!(report.count(CategoryStatus::Failed), 3);
    for outcome in &report.categories {
        assert!(outcome.result.is_some());
        assert!(outcome.narrative.is_none());
        let reason = outcome.reason.as_deref().unwrap();
        assert!(reason.contains("transdermal verdict not persisted"), "{}", reason);
        assert!(reason.contains("disk full"), "{}", reason);
    }

    let trail = inner.audit_trail(report.request_id).await.unwrap();
    for stage in [AuditStage::Scoring, AuditStage::Assessment, AuditStage::Verdict] {
        assert!(trail.iter().any(|r| r.stage == stage), "no audit record for {}", stage);
    }
    let unpersisted = trail.iter().filter(|r| r.output_ref == "verdict:unpersisted").count();
    assert_eq!(unpersisted, 2);
    let statuses: Vec<_> = trail.iter().filter(|r| r.output_ref.starts_with("status:")).collect();
    assert_eq!(statuses.len(), 3);
    assert!(statuses.iter().all(|r| r.output_ref == "status:failed"));
}

// ================================================================================================
// Cancellation
// ================================================================================================

#[tokio::test]
async fn cancelled_request_publishes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let orchestrator = orchestrator(store.clone()).with_cancellation(cancel.clone());
    cancel.cancel();

    let report = orchestrator.process_request(reference_request()).await.unwrap();

    assert_eq!(report.count(CategoryStatus::Cancelled), 3);
    assert!(report.routes.is_empty());
    assert!(report.categories.iter().all(|c| c.result.is_none()));
    assert!(store.category_results(report.request_id).await.unwrap().is_empty());
    assert!(store.verdicts(report.request_id).await.unwrap().is_empty());
}

// ================================================================================================
// Determinism & reprocessing
// ================================================================================================

#[tokio::test]
async fn identical_requests_produce_identical_decisions() {
    let request = reference_request();
    let first = orchestrator(Arc::new(MemoryStore::new()))
        .process_request(request.clone())
        .await
        .unwrap();
    let second = orchestrator(Arc::new(MemoryStore::new()))
        .process_request(request)
        .await
        .unwrap();

    assert_eq!(first.routes, second.routes);
    assert_eq!(first.categories, second.categories);
    assert_eq!(first.verification, second.verification);
}

#[tokio::test]
async fn observation_order_does_not_change_result() {
    let forward = reference_request();
    let mut reversed = forward.clone();
    for observations in reversed.categories.values_mut() {
        observations.reverse();
    }

    let a = orchestrator(Arc::new(MemoryStore::new())).process_request(forward).await.unwrap();
    let b = orchestrator(Arc::new(MemoryStore::new())).process_request(reversed).await.unwrap();

    for (x, y) in a.categories.iter().zip(&b.categories) {
        let (x, y) = (x.result.as_ref().unwrap(), y.result.as_ref().unwrap());
        assert_eq!(x.merged_fields, y.merged_fields);
        assert_eq!(x.conflicts, y.conflicts);
    }
    let verdicts = |r: &pdi_vd::IntelligenceReport| r.routes.iter().map(|x| x.verdict.clone()).collect::<Vec<_>>();
    assert_eq!(verdicts(&a), verdicts(&b));
}

#[tokio::test]
async fn reassess_reproduces_stored_verdicts() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(store.clone());
    let report = orchestrator.process_request(reference_request()).await.unwrap();

    let stored = store.category_results(report.request_id).await.unwrap();
    assert_eq!(stored.len(), 3);

    let rerun = orchestrator
        .reassess(report.request_id, &report.drug_name, stored)
        .await
        .unwrap();

    let original: Vec<_> = report.routes.iter().map(|r| &r.verdict).collect();
    let again: Vec<_> = rerun.routes.iter().map(|r| &r.verdict).collect();
    assert_eq!(original, again);
    assert_eq!(rerun.recommended_route, report.recommended_route);
}

#[tokio::test]
async fn batch_runs_on_single_worker() {
    let mut config = PipelineConfig::default();
    config.orchestration.worker_pool_size = 1;
    let orchestrator = PipelineOrchestrator::new(config, Arc::new(MemoryStore::new()))
        .unwrap()
        .with_synthesizer(Arc::new(EchoSynthesizer));

    let requests = vec![reference_request(), reference_request(), reference_request()];
    let ids: Vec<_> = requests.iter().map(|r| r.request_id).collect();
    let reports = orchestrator.process_batch(requests).await;

    assert_eq!(reports.len(), 3);
    for (report, id) in reports.into_iter().zip(ids) {
        let report = report.unwrap();
        assert_eq!(report.request_id, id);
        assert_eq!(report.count(CategoryStatus::Completed), 3);
    }
}

// ================================================================================================
// Configuration
// ================================================================================================

#[tokio::test]
async fn bad_weight_table_stops_before_scoring() {
    let mut config = PipelineConfig::default();
    config.scoring.weights.insert("log_p".to_string(), 0.0);

    match PipelineOrchestrator::new(config, Arc::new(MemoryStore::new())) {
        Err(PipelineError::Configuration(message)) => assert!(message.contains("sum")),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("weights summing to 90 were accepted"),
    }
}
