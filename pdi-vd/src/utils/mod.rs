//! Utility modules for pdi-vd

pub mod retry;

pub use retry::{retry_with_backoff, RetryFailure, RetryPolicy, Retryable};
