//! Phase 1: verification stages
//!
//! Authenticate → Resolve → Validate → Merge, run strictly in order for one
//! (request, category) pair, plus the read-only verification summary.

pub mod conflict_resolver;
pub mod data_merger;
pub mod data_validator;
pub mod reporter;
pub mod source_authenticator;

pub use conflict_resolver::{ConflictResolver, Contributor, Resolution, ResolvedField, Tier};
pub use data_merger::DataMerger;
pub use data_validator::{DataValidator, ValidatedField, ValidationOutcome};
pub use reporter::{SourceContribution, VerificationReporter, VerificationSummary};
pub use source_authenticator::SourceAuthenticator;
