//! # PDI Common Library
//!
//! Shared code for the PDI pharmaceutical intelligence services:
//! - Error type used at storage and configuration boundaries
//! - Configuration file resolution and TOML loading
//! - Pipeline event types and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
