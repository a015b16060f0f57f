//! The agent (stage-executor) capability consumed by the runtime, and the
//! registry that maps a declared stage name to one.
//!
//! Everything about *how* a stage does its work — LLM prompting, tool
//! invocation — is external to this crate; the runtime only ever calls
//! [`StageExecutor::process`] and inspects the envelope it mutated.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::envelope::Envelope;
use crate::types::{Error, Result};

/// Ambient execution context handed to a stage alongside the envelope.
///
/// This is the only channel through which the runtime exposes execution
/// context to a stage — it carries the cancellation token a long-running
/// stage should poll, and the stage name it was invoked under (useful for
/// a stage implementation that's shared across more than one declared
/// stage).
#[derive(Debug, Clone)]
pub struct StageContext {
    stage: String,
    cancellation: CancellationToken,
}

impl StageContext {
    pub fn new(stage: impl Into<String>, cancellation: CancellationToken) -> Self {
        Self {
            stage: stage.into(),
            cancellation,
        }
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }
}

/// The capability a pipeline agent exposes to the runtime.
///
/// `process` mutates the envelope in place rather than taking and returning
/// it by value: the envelope is never lost on an `Err` return, so the
/// executor loop can still inspect (and act on) whatever state the stage
/// reached before failing.
///
/// A stage:
/// - MAY update `envelope.pipeline.current_stage` (a routing decision);
/// - MAY set `envelope.bounds.terminated`;
/// - MAY increment `envelope.bounds.llm_call_count` for LLM calls it makes —
///   the runtime has no visibility into this and never increments it itself;
/// - MUST NOT push `llm_call_count` past its maximum without also
///   terminating;
/// - MAY pre-route `current_stage` to an error stage before returning `Err` —
///   the runtime honours that route instead of terminating the run.
///
/// `envelope.bounds.agent_hop_count` is the runtime's own concern: it is
/// incremented once per dispatch by the executor loop, not by the stage.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn process(&self, ctx: &StageContext, envelope: &mut Envelope) -> Result<()>;
}

/// Read-only, `Clone`-cheap map from declared stage name to its executor.
///
/// Built once at runtime construction from a [`PipelineConfig`]; never
/// mutated afterward.
#[derive(Clone)]
pub struct AgentRegistry {
    agents: Arc<HashMap<String, Arc<dyn StageExecutor>>>,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("stages", &self.agents.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AgentRegistry {
    /// Build a registry from a config and a caller-supplied map of stage
    /// name to executor. Every agent declared in `config` must have a
    /// matching executor, or construction fails.
    pub fn from_config(
        config: &PipelineConfig,
        mut executors: HashMap<String, Arc<dyn StageExecutor>>,
    ) -> Result<Self> {
        let mut agents = HashMap::with_capacity(config.agents.len());
        for agent_config in &config.agents {
            let executor = executors.remove(&agent_config.name).ok_or_else(|| {
                Error::validation(format!(
                    "no stage executor registered for agent {}",
                    agent_config.name
                ))
            })?;
            agents.insert(agent_config.name.clone(), executor);
        }
        Ok(Self {
            agents: Arc::new(agents),
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StageExecutor>> {
        self.agents.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;

    struct NoopStage;

    #[async_trait]
    impl StageExecutor for NoopStage {
        async fn process(&self, _ctx: &StageContext, envelope: &mut Envelope) -> Result<()> {
            envelope.pipeline.current_stage = "end".to_string();
            Ok(())
        }
    }

    #[test]
    fn from_config_fails_when_an_agent_has_no_executor() {
        let config = PipelineConfig::new("p", vec![AgentConfig::new("a", 0)]);
        let err = AgentRegistry::from_config(&config, HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("no stage executor"));
    }

    #[test]
    fn from_config_builds_a_lookup_for_every_declared_agent() {
        let config = PipelineConfig::new("p", vec![AgentConfig::new("a", 0)]);
        let mut executors: HashMap<String, Arc<dyn StageExecutor>> = HashMap::new();
        executors.insert("a".to_string(), Arc::new(NoopStage));

        let registry = AgentRegistry::from_config(&config, executors).unwrap();
        assert!(registry.contains("a"));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("missing").is_none());
    }

    #[tokio::test]
    async fn registered_executor_can_be_invoked_through_the_registry() {
        let config = PipelineConfig::new("p", vec![AgentConfig::new("a", 0)]);
        let mut executors: HashMap<String, Arc<dyn StageExecutor>> = HashMap::new();
        executors.insert("a".to_string(), Arc::new(NoopStage));
        let registry = AgentRegistry::from_config(&config, executors).unwrap();

        let executor = registry.get("a").unwrap();
        let ctx = StageContext::new("a", CancellationToken::new());
        let mut envelope = Envelope::new();
        executor.process(&ctx, &mut envelope).await.unwrap();
        assert_eq!(envelope.pipeline.current_stage, "end");
    }
}
