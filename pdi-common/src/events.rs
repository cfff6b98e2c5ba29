//! Event types for the PDI event system
//!
//! Provides pipeline progress events and the EventBus used to fan them out
//! to any number of observers (CLI logger, dashboards, tests).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Terminal status of one (request, category) pipeline instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryStatus {
    /// Every stage succeeded
    Completed,
    /// Merged data delivered, but degraded (no narrative, or insufficient data)
    Partial,
    /// Stopped by a fatal error; reason recorded in the audit trail
    Failed,
    /// Stopped by request-level cancellation; nothing published
    Cancelled,
}

impl std::fmt::Display for CategoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CategoryStatus::Completed => write!(f, "completed"),
            CategoryStatus::Partial => write!(f, "partial"),
            CategoryStatus::Failed => write!(f, "failed"),
            CategoryStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Pipeline progress events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A request entered the pipeline
    RequestStarted {
        request_id: Uuid,
        drug_name: String,
        category_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A category began a pipeline stage
    StageStarted {
        request_id: Uuid,
        category: String,
        stage: String,
        timestamp: DateTime<Utc>,
    },

    /// A category reached a terminal status
    CategoryFinished {
        request_id: Uuid,
        category: String,
        status: CategoryStatus,
        /// Failure or degradation reason, if any
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A route verdict was generated
    VerdictReached {
        request_id: Uuid,
        route: String,
        decision: String,
        confidence: f64,
        timestamp: DateTime<Utc>,
    },

    /// All categories of a request reached a terminal status
    RequestCompleted {
        request_id: Uuid,
        completed: usize,
        partial: usize,
        failed: usize,
        cancelled: usize,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Event type name (matches the serde tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::RequestStarted { .. } => "RequestStarted",
            PipelineEvent::StageStarted { .. } => "StageStarted",
            PipelineEvent::CategoryFinished { .. } => "CategoryFinished",
            PipelineEvent::VerdictReached { .. } => "VerdictReached",
            PipelineEvent::RequestCompleted { .. } => "RequestCompleted",
        }
    }

    /// Request the event belongs to
    pub fn request_id(&self) -> Uuid {
        match self {
            PipelineEvent::RequestStarted { request_id, .. }
            | PipelineEvent::StageStarted { request_id, .. }
            | PipelineEvent::CategoryFinished { request_id, .. }
            | PipelineEvent::VerdictReached { request_id, .. }
            | PipelineEvent::RequestCompleted { request_id, .. } => *request_id,
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block the pipeline)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
