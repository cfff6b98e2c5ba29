//! Error taxonomy for the verification & decision pipeline
//!
//! Only `Configuration` and `Storage` fail a category. `Cancelled` ends it
//! without a failure. The other variants describe conditions that are
//! recorded and tolerated; they appear in audit reasoning and category
//! outcomes rather than being propagated.

use thiserror::Error;

/// Pipeline error
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid configuration (weight table, schema, range table); fatal, never corrected
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Source could not be classified; recovered as lowest authority
    #[error("Source classification failure for {source_id}: {reason}")]
    SourceClassification { source_id: String, reason: String },

    /// Conflict resolution confidence below the configured threshold
    #[error("Unresolved conflict on {field}: confidence {confidence:.2}")]
    UnresolvedConflict { field: String, confidence: f64 },

    /// Critical validation issue; field removed from merge
    #[error("Validation failure on {field}: {reason}")]
    Validation { field: String, reason: String },

    /// No usable field survived the merge
    #[error("Insufficient data for category {0}")]
    MergeInsufficientData(String),

    /// External collaborator exhausted its retries
    #[error("External collaborator timeout after {attempts} attempt(s): {reason}")]
    ExternalCollaboratorTimeout { attempts: u32, reason: String },

    /// Request-level cancellation observed between stages
    #[error("Cancelled before stage {0}")]
    Cancelled(String),

    /// Persistence collaborator rejected a write
    #[error("Storage error: {0}")]
    Storage(#[from] pdi_common::Error),
}

impl PipelineError {
    /// Whether this error fails the category it occurred in
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Configuration(_) | PipelineError::Storage(_))
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(PipelineError::Configuration("weights sum to 90".into()).is_fatal());
        assert!(PipelineError::Storage(pdi_common::Error::Internal("disk full".into())).is_fatal());
        assert!(!PipelineError::Cancelled("merge".into()).is_fatal());
        assert!(!PipelineError::Validation {
            field: "log_p".into(),
            reason: "out of range".into()
        }
        .is_fatal());
        assert!(!PipelineError::MergeInsufficientData("safety".into()).is_fatal());
        assert!(!PipelineError::UnresolvedConflict {
            field: "dose".into(),
            confidence: 0.4
        }
        .is_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = PipelineError::ExternalCollaboratorTimeout {
            attempts: 3,
            reason: "deadline elapsed".into(),
        };
        assert_eq!(
            err.to_string(),
            "External collaborator timeout after 3 attempt(s): deadline elapsed"
        );
    }
}
