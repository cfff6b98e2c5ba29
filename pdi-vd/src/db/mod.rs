//! Result persistence
//!
//! The pipeline only appends: category results, conflicts, verdicts and
//! audit records are written once and never updated in place. Readers get
//! records back in append order.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::types::{AuditRecord, CategoryResult, FieldConflict, Verdict};
use async_trait::async_trait;
use pdi_common::Result;
use uuid::Uuid;

/// Persistence collaborator for pipeline outputs
///
/// Implementations must accept concurrent writers from sibling categories.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Publish the merged result of one category
    async fn store_category_result(&self, result: &CategoryResult) -> Result<()>;

    /// Publish the conflicts resolved for one category
    async fn store_conflicts(&self, request_id: Uuid, conflicts: &[FieldConflict]) -> Result<()>;

    /// Publish a merged result together with its conflicts
    ///
    /// Stores that support transactions write both or neither.
    async fn publish_category(&self, result: &CategoryResult) -> Result<()> {
        self.store_conflicts(result.request_id, &result.conflicts).await?;
        self.store_category_result(result).await
    }

    async fn store_verdict(&self, request_id: Uuid, verdict: &Verdict) -> Result<()>;

    /// Append audit records, preserving their order
    async fn append_audit(&self, records: &[AuditRecord]) -> Result<()>;

    /// Every audit record of a request, in append order
    async fn audit_trail(&self, request_id: Uuid) -> Result<Vec<AuditRecord>>;

    /// Published category results of a request, ordered by category id
    async fn category_results(&self, request_id: Uuid) -> Result<Vec<CategoryResult>>;

    /// Verdicts of a request, in append order
    async fn verdicts(&self, request_id: Uuid) -> Result<Vec<Verdict>>;
}
