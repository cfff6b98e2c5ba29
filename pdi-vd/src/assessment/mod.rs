//! Phase 2: decision stages
//!
//! Score → Assess → Verdict, per route, over the merged results of a request.
//! These stages accept `CategoryResult`s directly, so they can be re-run
//! without repeating verification.

pub mod scoring_matrix;
pub mod verdict;
pub mod weighted_assessment;

pub use scoring_matrix::{OmittedParameter, ScoringMatrixEngine, ScoringOutcome};
pub use verdict::VerdictGenerator;
pub use weighted_assessment::{composite, WeightedAssessmentEngine};
