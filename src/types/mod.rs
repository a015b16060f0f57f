//! Core types for the pipeline runtime.
//!
//! This module provides foundational types used throughout the crate:
//! - **IDs**: Strongly-typed identifiers (`EnvelopeId`, `ThreadId`, etc.)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Ambient runtime configuration (observability, default bounds)

mod config;
mod errors;
mod ids;

pub use config::{Config, DefaultLimits, ExecutionConfig, ObservabilityConfig};
pub use errors::{Error, Result};
pub use ids::{EnvelopeId, RequestId, SessionId, ThreadId, UserId};
