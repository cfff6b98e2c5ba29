//! In-process result store

use super::ResultStore;
use crate::types::{AuditRecord, CategoryResult, FieldConflict, Verdict};
use async_trait::async_trait;
use pdi_common::Result;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Result store backed by append-only vectors
///
/// Used by tests and by the CLI when no database path is given.
#[derive(Default)]
pub struct MemoryStore {
    results: Mutex<Vec<CategoryResult>>,
    conflicts: Mutex<Vec<(Uuid, FieldConflict)>>,
    verdicts: Mutex<Vec<(Uuid, Verdict)>>,
    audit: Mutex<Vec<AuditRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conflicts stored for a request
    pub async fn conflicts(&self, request_id: Uuid) -> Vec<FieldConflict> {
        self.conflicts
            .lock()
            .await
            .iter()
            .filter(|(id, _)| *id == request_id)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn store_category_result(&self, result: &CategoryResult) -> Result<()> {
        self.results.lock().await.push(result.clone());
        Ok(())
    }

    async fn store_conflicts(&self, request_id: Uuid, conflicts: &[FieldConflict]) -> Result<()> {
        self.conflicts
            .lock()
            .await
            .extend(conflicts.iter().cloned().map(|c| (request_id, c)));
        Ok(())
    }

    async fn publish_category(&self, result: &CategoryResult) -> Result<()> {
        // Both locks held before either write
        let mut conflicts = self.conflicts.lock().await;
        let mut results = self.results.lock().await;
        conflicts.extend(result.conflicts.iter().cloned().map(|c| (result.request_id, c)));
        results.push(result.clone());
        Ok(())
    }

    async fn store_verdict(&self, request_id: Uuid, verdict: &Verdict) -> Result<()> {
        self.verdicts.lock().await.push((request_id, verdict.clone()));
        Ok(())
    }

    async fn append_audit(&self, records: &[AuditRecord]) -> Result<()> {
        self.audit.lock().await.extend_from_slice(records);
        Ok(())
    }

    async fn audit_trail(&self, request_id: Uuid) -> Result<Vec<AuditRecord>> {
        Ok(self
            .audit
            .lock()
            .await
            .iter()
            .filter(|r| r.request_id == request_id)
            .cloned()
            .collect())
    }

    async fn category_results(&self, request_id: Uuid) -> Result<Vec<CategoryResult>> {
        let mut results: Vec<CategoryResult> = self
            .results
            .lock()
            .await
            .iter()
            .filter(|r| r.request_id == request_id)
            .cloned()
            .collect();
        results.sort_by(|a, b| a.category_id.cmp(&b.category_id));
        Ok(results)
    }

    async fn verdicts(&self, request_id: Uuid) -> Result<Vec<Verdict>> {
        Ok(self
            .verdicts
            .lock()
            .await
            .iter()
            .filter(|(id, _)| *id == request_id)
            .map(|(_, v)| v.clone())
            .collect())
    }
}
