//! Ambient runtime configuration.
//!
//! Unlike [`crate::config::PipelineConfig`] — which describes the shape of a
//! single pipeline (stages, dependencies, bounds) — this is the runtime's own
//! configuration: observability and default bounds, loaded from environment
//! variables or config files the same way the teacher's kernel loads its
//! server settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Default resource limits applied to pipelines that don't declare their own.
    #[serde(default)]
    pub defaults: DefaultLimits,

    /// Streaming/persistence channel sizing.
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,

    /// OTLP exporter endpoint (optional; only read when built with `otel`).
    pub otlp_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            otlp_endpoint: None,
        }
    }
}

/// Default resource limits.
///
/// A [`crate::config::PipelineConfig`] that omits its own bounds falls back
/// to these; an explicit pipeline bound always wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultLimits {
    /// Maximum LLM calls per envelope.
    pub max_llm_calls: u32,

    /// Maximum agent hops per envelope.
    pub max_agent_hops: u32,

    /// Maximum iterations per envelope.
    pub max_iterations: u32,

    /// Default per-run timeout, enforced by the caller via cancellation —
    /// the runtime itself has no wall-clock timer.
    #[serde(with = "humantime_serde")]
    pub run_timeout: Duration,
}

impl Default for DefaultLimits {
    fn default() -> Self {
        Self {
            max_llm_calls: 100,
            max_agent_hops: 10,
            max_iterations: 20,
            run_timeout: Duration::from_secs(300),
        }
    }
}

/// Execution-loop sizing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Minimum bounded channel capacity for streaming output, regardless of
    /// stage count (the façade also adds `stage_count + 1`).
    pub min_stream_channel_capacity: usize,

    /// Bounded channel capacity for a parallel batch's result collection.
    pub parallel_batch_channel_capacity: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            min_stream_channel_capacity: 8,
            parallel_batch_channel_capacity: 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.defaults.max_iterations, cfg.defaults.max_iterations);
    }
}
