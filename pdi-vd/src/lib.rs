//! pdi-vd library interface
//!
//! Verification & decision pipeline for pharmaceutical intelligence:
//! raw provider findings are authenticated, reconciled, validated and merged
//! per category (Phase 1), then scored per delivery route into GO / NO_GO /
//! CONDITIONAL verdicts (Phase 2), with an optional LLM narrative per
//! category. Every decision is written to an append-only audit trail.

pub mod assessment;
pub mod config;
pub mod db;
pub mod error;
pub mod report;
pub mod synthesis;
pub mod types;
pub mod utils;
pub mod verification;
pub mod workflow;

pub use crate::config::PipelineConfig;
pub use crate::error::{PipelineError, PipelineResult};
pub use crate::report::{IntelligenceReport, RouteReport};
pub use crate::workflow::{AnalysisRequest, CategoryOutcome, PipelineOrchestrator};
