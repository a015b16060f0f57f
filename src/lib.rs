//! # Pipeline Runtime
//!
//! A DAG-based multi-agent pipeline runtime: an envelope carries request
//! state through a declared sequence of stages, each stage an externally
//! supplied agent implementation. The runtime owns sequencing, bounds
//! enforcement, panic containment, streaming output, persistence, and the
//! interrupt/resume protocol for human-in-the-loop flows — nothing about
//! LLM prompting, tool invocation, or transport is part of this crate.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌───────────────────────────────────┐
//!   caller  ────────▶│              Runtime              │
//!                    │  ┌───────────┐   ┌──────────────┐ │
//!                    │  │  Agent    │   │  Sequential  │ │
//!                    │  │ Registry  │   │  / Parallel  │ │
//!                    │  └───────────┘   │   Executor   │ │
//!                    │  ┌───────────┐   └──────────────┘ │
//!                    │  │Persistence│                    │
//!                    │  │  Adapter  │                    │
//!                    │  └───────────┘                    │
//!                    └───────────────────────────────────┘
//! ```

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod agent;
pub mod config;
pub mod envelope;
pub mod executor;
pub mod observability;
pub mod persistence;
pub mod recovery;
pub mod runtime;
pub mod types;
pub mod validation;

pub use agent::{AgentRegistry, StageContext, StageExecutor};
pub use config::{AgentConfig, EdgeLimit, JoinStrategy, PipelineConfig, RoutingRule, RunMode};
pub use envelope::Envelope;
pub use executor::StageEvent;
pub use persistence::{InMemoryPersistenceAdapter, PersistenceAdapter};
pub use runtime::{ExecuteOptions, Runtime};
pub use types::{Config, Error, Result};
