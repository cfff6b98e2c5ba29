//! Phase 1 for one (request, category) pair
//!
//! Authenticate → Resolve → Validate → Merge, strictly in order, then
//! Publish. The cancellation token is checked before every stage and once
//! more before publishing, so a cancelled category never publishes a
//! partial result. Audit records are flushed to the store after each stage.
//! Publishing is a single store call that writes the result and its
//! conflicts together.

use crate::config::PipelineConfig;
use crate::db::ResultStore;
use crate::error::{PipelineError, PipelineResult};
use crate::types::{AuditTrail, CategoryResult, RawObservation, SourceProfile};
use crate::verification::{ConflictResolver, DataMerger, DataValidator, SourceAuthenticator};
use chrono::{NaiveDate, Utc};
use pdi_common::events::{EventBus, PipelineEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Published output of Phase 1
#[derive(Debug, Clone)]
pub struct Phase1Output {
    pub result: CategoryResult,
    /// Profiles of every authenticated observation, in input order
    pub profiles: Vec<SourceProfile>,
}

/// Sequential Phase 1 runner
pub struct CategoryPipeline<'a> {
    config: &'a PipelineConfig,
    store: &'a dyn ResultStore,
    cancel: &'a CancellationToken,
    events: Option<&'a EventBus>,
}

impl<'a> CategoryPipeline<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        store: &'a dyn ResultStore,
        cancel: &'a CancellationToken,
        events: Option<&'a EventBus>,
    ) -> Self {
        Self {
            config,
            store,
            cancel,
            events,
        }
    }

    /// Run every Phase 1 stage and publish the merged result
    ///
    /// # Errors
    /// - `Cancelled` when the token fires between stages
    /// - `Configuration` when the category has no schema
    /// - `Storage` when the store rejects a write
    pub async fn run(
        &self,
        request_id: Uuid,
        category: &str,
        observations: &[RawObservation],
        as_of: NaiveDate,
    ) -> PipelineResult<Phase1Output> {
        let output = self.prepare(request_id, category, observations, as_of).await?;
        self.publish(request_id, category, output).await
    }

    /// Stages up to and including merge; nothing is published
    pub async fn prepare(
        &self,
        request_id: Uuid,
        category: &str,
        observations: &[RawObservation],
        as_of: NaiveDate,
    ) -> PipelineResult<Phase1Output> {
        let mut trail = AuditTrail::new(request_id, Some(category));

        info!(%request_id, category, observations = observations.len(), "Phase 1: AUTHENTICATION");
        self.checkpoint(request_id, category, "authentication")?;
        let authenticated = SourceAuthenticator::new(self.config).authenticate_all(observations, as_of, &mut trail);
        self.flush(&mut trail).await?;

        self.checkpoint(request_id, category, "conflict_resolution")?;
        let resolution = ConflictResolver::new(self.config).resolve(category, &authenticated, &mut trail);
        self.flush(&mut trail).await?;
        debug!(%request_id, category, fields = resolution.fields.len(), conflicts = resolution.conflicts.len(), "Fields resolved");

        self.checkpoint(request_id, category, "validation")?;
        let validated = DataValidator::new(self.config).validate(category, resolution.fields, &mut trail);
        // Records written before a schema failure are kept
        self.flush(&mut trail).await?;
        let validated = validated?;

        self.checkpoint(request_id, category, "merge")?;
        let result = DataMerger::new(self.config).merge(request_id, category, &validated, &resolution.conflicts, &mut trail);
        self.flush(&mut trail).await?;

        Ok(Phase1Output {
            result,
            profiles: authenticated.into_iter().map(|a| a.profile).collect(),
        })
    }

    /// Publish a prepared result
    pub async fn publish(&self, request_id: Uuid, category: &str, output: Phase1Output) -> PipelineResult<Phase1Output> {
        self.checkpoint(request_id, category, "publish")?;
        self.store.publish_category(&output.result).await?;

        info!(
            %request_id,
            category,
            fields = output.result.merged_fields.len(),
            data_quality = output.result.data_quality_score,
            insufficient_data = output.result.insufficient_data,
            "Phase 1 complete"
        );

        Ok(output)
    }

    fn checkpoint(&self, request_id: Uuid, category: &str, stage: &str) -> PipelineResult<()> {
        if self.cancel.is_cancelled() {
            info!(%request_id, category, stage, "Category cancelled");
            return Err(PipelineError::Cancelled(stage.to_string()));
        }
        if let Some(events) = self.events {
            events.emit_lossy(PipelineEvent::StageStarted {
                request_id,
                category: category.to_string(),
                stage: stage.to_string(),
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    async fn flush(&self, trail: &mut AuditTrail) -> PipelineResult<()> {
        let records = trail.drain();
        self.store.append_audit(&records).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::types::{AuditStage, FieldValue};

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn observations() -> Vec<RawObservation> {
        vec![
            RawObservation::new("pubmed-1", "pubmed_search")
                .with_url("https://pubmed.ncbi.nlm.nih.gov/123456/")
                .published(NaiveDate::from_ymd_opt(2022, 5, 1).unwrap())
                .with_authors(&["Smith J"])
                .with_field("dose", FieldValue::numeric(15.0, Some("mg")))
                .with_field("indication", FieldValue::text("osteoarthritis pain")),
            RawObservation::new("fda-1", "web")
                .with_url("https://www.accessdata.fda.gov/label/ketoprofen.pdf")
                .published(NaiveDate::from_ymd_opt(2023, 1, 10).unwrap())
                .with_field("dose", FieldValue::numeric(15.5, Some("mg"))),
        ]
    }

    #[tokio::test]
    async fn test_phase1_publishes_result_and_audit() {
        let config = PipelineConfig::default();
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let request_id = Uuid::new_v4();

        let output = CategoryPipeline::new(&config, &store, &cancel, None)
            .run(request_id, "dosage", &observations(), as_of())
            .await
            .unwrap();

        assert_eq!(output.profiles.len(), 2);
        assert!(output.result.merged_fields.contains_key("dose"));
        assert!(!output.result.insufficient_data);
        assert_eq!(store.category_results(request_id).await.unwrap().len(), 1);

        let stages: Vec<AuditStage> = store.audit_trail(request_id).await.unwrap().iter().map(|r| r.stage).collect();
        assert_eq!(stages.first(), Some(&AuditStage::Authentication));
        assert!(stages.contains(&AuditStage::ConflictResolution));
        assert!(stages.contains(&AuditStage::Validation));
        assert_eq!(stages.last(), Some(&AuditStage::Merge));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_publishes_nothing() {
        let config = PipelineConfig::default();
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let request_id = Uuid::new_v4();

        let err = CategoryPipeline::new(&config, &store, &cancel, None)
            .run(request_id, "dosage", &observations(), as_of())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled(ref stage) if stage == "authentication"));
        assert!(store.category_results(request_id).await.unwrap().is_empty());
        assert!(store.audit_trail(request_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_category_fails_with_configuration_error() {
        let config = PipelineConfig::default();
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let request_id = Uuid::new_v4();

        let err = CategoryPipeline::new(&config, &store, &cancel, None)
            .run(request_id, "pharmacokinetics", &observations(), as_of())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(store.category_results(request_id).await.unwrap().is_empty());
        // Authentication and resolution records survive the failure
        assert!(!store.audit_trail(request_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prepare_publishes_nothing() {
        let config = PipelineConfig::default();
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let request_id = Uuid::new_v4();
        let pipeline = CategoryPipeline::new(&config, &store, &cancel, None);

        let output = pipeline.prepare(request_id, "dosage", &observations(), as_of()).await.unwrap();
        assert!(store.category_results(request_id).await.unwrap().is_empty());

        pipeline.publish(request_id, "dosage", output).await.unwrap();
        assert_eq!(store.category_results(request_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_checks_cancellation() {
        let config = PipelineConfig::default();
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let request_id = Uuid::new_v4();
        let pipeline = CategoryPipeline::new(&config, &store, &cancel, None);

        let output = pipeline.prepare(request_id, "dosage", &observations(), as_of()).await.unwrap();
        cancel.cancel();

        let err = pipeline.publish(request_id, "dosage", output).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled(ref stage) if stage == "publish"));
        assert!(store.category_results(request_id).await.unwrap().is_empty());
        assert!(store.conflicts(request_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_stage_events_emitted_in_order() {
        let config = PipelineConfig::default();
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();

        CategoryPipeline::new(&config, &store, &cancel, Some(&bus))
            .run(Uuid::new_v4(), "dosage", &observations(), as_of())
            .await
            .unwrap();

        let mut stages = Vec::new();
        while let Ok(PipelineEvent::StageStarted { stage, .. }) = rx.try_recv() {
            stages.push(stage);
        }
        assert_eq!(stages, vec!["authentication", "conflict_resolution", "validation", "merge", "publish"]);
    }
}
