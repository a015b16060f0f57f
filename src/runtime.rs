//! The runtime façade: the one public entry point that selects an execution
//! engine by mode, owns the agent registry and optional persistence
//! adapter, and manages the streaming channel and interrupt/resume protocol
//! around whichever executor actually walks the envelope through its
//! stages.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentRegistry, StageExecutor};
use crate::config::{PipelineConfig, RunMode};
use crate::envelope::{Envelope, InterruptKind, InterruptResponse, StateDict, TerminalReason};
use crate::executor::{parallel, sequential, ExitReason, RunHooks, StageEvent, END_STAGE};
use crate::persistence::PersistenceAdapter;
use crate::types::{Error, Result};

/// Options controlling a single `execute` call.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Engine to run under; falls back to `PipelineConfig::default_run_mode`
    /// when unset.
    pub mode: Option<RunMode>,
    /// Whether to open a streaming output channel for this run.
    pub stream: bool,
    /// Thread under which to persist state; no persistence occurs without
    /// both this and a configured adapter.
    pub thread_id: Option<String>,
}

/// Entry point for running a declared pipeline against an envelope.
///
/// Cheap to clone: a `Runtime` is a config, a read-only agent registry, and
/// an optional `Arc`'d persistence adapter.
#[derive(Clone)]
pub struct Runtime {
    config: PipelineConfig,
    registry: AgentRegistry,
    persistence: Option<Arc<dyn PersistenceAdapter>>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("pipeline", &self.config.name)
            .field("agents", &self.registry)
            .field("persistence", &self.persistence.is_some())
            .finish()
    }
}

impl Runtime {
    /// Validate `config`, build the agent registry against `executors`, and
    /// construct a runtime with no persistence adapter configured.
    pub fn new(
        mut config: PipelineConfig,
        executors: HashMap<String, Arc<dyn StageExecutor>>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = AgentRegistry::from_config(&config, executors)?;
        tracing::info!(pipeline = %config.name, agents = registry.len(), "runtime_agents_built");
        Ok(Self {
            config,
            registry,
            persistence: None,
        })
    }

    /// Attach a persistence adapter used by `execute`/`resume` whenever a
    /// thread ID is supplied, and by `get_state`.
    pub fn with_persistence(mut self, adapter: Arc<dyn PersistenceAdapter>) -> Self {
        self.persistence = Some(adapter);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run `envelope` under `options`, dispatching to the sequential or
    /// parallel engine, opening a streaming channel if requested, and
    /// persisting along the way if a thread ID and adapter are both present.
    ///
    /// Takes `envelope` by `&mut` rather than by value, the same way
    /// `StageExecutor::process` does: on `Err` (including a cancellation)
    /// the caller's envelope has already been mutated in place with every
    /// output written and every counter updated up to the point the run
    /// stopped, and is never dropped along with the error.
    pub async fn execute(
        &self,
        envelope: &mut Envelope,
        options: ExecuteOptions,
        cancellation: CancellationToken,
    ) -> Result<Option<mpsc::Receiver<StageEvent>>> {
        if options.stream {
            let capacity = (self.config.agents.len() + 1).max(1);
            let (sender, receiver) = mpsc::channel(capacity);
            self.execute_inner(envelope, options.mode, options.thread_id, Some(sender), cancellation)
                .await?;
            Ok(Some(receiver))
        } else {
            self.execute_inner(envelope, options.mode, options.thread_id, None, cancellation)
                .await?;
            Ok(None)
        }
    }

    /// Convenience wrapper over `execute` for a sequential, non-streaming run.
    pub async fn run(
        &self,
        envelope: &mut Envelope,
        thread_id: Option<String>,
        cancellation: CancellationToken,
    ) -> Result<()> {
        self.execute(
            envelope,
            ExecuteOptions {
                mode: Some(RunMode::Sequential),
                stream: false,
                thread_id,
            },
            cancellation,
        )
        .await?;
        Ok(())
    }

    /// Convenience wrapper over `execute` for a parallel, non-streaming run.
    pub async fn run_parallel(
        &self,
        envelope: &mut Envelope,
        thread_id: Option<String>,
        cancellation: CancellationToken,
    ) -> Result<()> {
        self.execute(
            envelope,
            ExecuteOptions {
                mode: Some(RunMode::Parallel),
                stream: false,
                thread_id,
            },
            cancellation,
        )
        .await?;
        Ok(())
    }

    /// Return the output channel synchronously; the run itself executes in
    /// a spawned task and closes the channel (after the `__end__` marker)
    /// when done. Errors surfaced by the run are delivered as a final event
    /// rather than lost, since the caller has no other handle on this task.
    pub fn run_with_stream(
        &self,
        mut envelope: Envelope,
        thread_id: Option<String>,
        cancellation: CancellationToken,
    ) -> mpsc::Receiver<StageEvent> {
        let capacity = (self.config.agents.len() + 1).max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let runtime = self.clone();

        tokio::spawn(async move {
            if let Err(err) = runtime
                .execute_inner(&mut envelope, None, thread_id, Some(sender.clone()), cancellation)
                .await
            {
                // A cancellation already got its `__end__` marker from
                // `execute_inner`; anything else means the run aborted
                // before reaching that point, so emit one here instead.
                if !matches!(err, Error::Cancelled(_)) {
                    let mut output = HashMap::new();
                    output.insert("terminated".to_string(), serde_json::Value::Bool(true));
                    let _ = sender
                        .send(StageEvent {
                            stage: "__end__".to_string(),
                            output,
                            error: Some(err.to_string()),
                        })
                        .await;
                }
            }
        });

        receiver
    }

    /// Resume a suspended envelope with a response to its pending interrupt,
    /// selecting the re-entry stage by interrupt kind, then running the
    /// pipeline forward under the mode it was originally started in.
    pub async fn resume(
        &self,
        envelope: &mut Envelope,
        response: InterruptResponse,
        thread_id: Option<String>,
        cancellation: CancellationToken,
    ) -> Result<()> {
        if !envelope.interrupts.interrupt_pending || envelope.interrupts.interrupt.is_none() {
            return Err(Error::ResumeWithoutInterrupt);
        }
        let kind = envelope.get_interrupt_kind().expect("checked above");
        envelope.resolve_interrupt(response.clone())?;

        match kind {
            InterruptKind::Clarification => {
                if let Some(stage) = self.config.clarification_resume_stage.clone() {
                    envelope.pipeline.current_stage = stage;
                }
            }
            InterruptKind::Confirmation => {
                if response.approved == Some(true) {
                    if let Some(stage) = self.config.confirmation_resume_stage.clone() {
                        envelope.pipeline.current_stage = stage;
                    }
                } else {
                    envelope.terminate("user denied confirmation", Some(TerminalReason::UserDenied));
                    return Ok(());
                }
            }
            InterruptKind::AgentReview => {
                if let Some(stage) = self.config.agent_review_resume_stage.clone() {
                    envelope.pipeline.current_stage = stage;
                }
            }
            InterruptKind::Checkpoint
            | InterruptKind::ResourceExhausted
            | InterruptKind::Timeout
            | InterruptKind::SystemError => {}
        }

        tracing::info!(
            envelope_id = %envelope.identity.envelope_id,
            kind = ?kind,
            "pipeline_resumed"
        );

        let mode = if envelope.pipeline.parallel_mode.unwrap_or(false) {
            RunMode::Parallel
        } else {
            RunMode::Sequential
        };
        self.execute(
            envelope,
            ExecuteOptions {
                mode: Some(mode),
                stream: false,
                thread_id,
            },
            cancellation,
        )
        .await?;
        Ok(())
    }

    /// Fetch previously persisted state for `thread_id`, or `None` if no
    /// adapter is configured or nothing has been saved under that thread.
    pub async fn get_state(&self, thread_id: &str) -> Result<Option<StateDict>> {
        match &self.persistence {
            Some(adapter) => adapter.load_state(thread_id).await,
            None => Ok(None),
        }
    }

    async fn execute_inner(
        &self,
        envelope: &mut Envelope,
        mode: Option<RunMode>,
        thread_id: Option<String>,
        sender: Option<mpsc::Sender<StageEvent>>,
        cancellation: CancellationToken,
    ) -> Result<()> {
        let mode = mode.unwrap_or(self.config.default_run_mode);

        if envelope.pipeline.stage_order.is_empty() {
            envelope.pipeline.stage_order = self.config.get_stage_order();
        }
        if envelope.pipeline.current_stage == "start" {
            envelope.pipeline.current_stage = envelope
                .pipeline
                .stage_order
                .first()
                .cloned()
                .unwrap_or_else(|| END_STAGE.to_string());
        }
        envelope.pipeline.max_iterations = self.config.max_iterations as i32;
        envelope.bounds.max_llm_calls = self.config.max_llm_calls as i32;
        envelope.bounds.max_agent_hops = self.config.max_agent_hops as i32;
        envelope.pipeline.parallel_mode = Some(mode == RunMode::Parallel);

        let persistence_ref = match (&self.persistence, thread_id.as_deref()) {
            (Some(adapter), Some(tid)) if !tid.is_empty() => Some((adapter, tid)),
            _ => None,
        };
        let hooks = RunHooks {
            stream: sender.as_ref(),
            persistence: persistence_ref,
        };

        let started_at = Utc::now();
        tracing::info!(
            envelope_id = %envelope.identity.envelope_id,
            request_id = %envelope.identity.request_id,
            mode = ?mode,
            stream = sender.is_some(),
            "pipeline_started"
        );
        if mode == RunMode::Parallel {
            tracing::info!(envelope_id = %envelope.identity.envelope_id, "pipeline_parallel_started");
        }

        let exit = match mode {
            RunMode::Sequential => {
                sequential::run(&self.config, &self.registry, envelope, &cancellation, &hooks).await?
            }
            RunMode::Parallel => {
                parallel::run(&self.config, &self.registry, envelope, &cancellation, &hooks).await?
            }
        };

        let duration_ms = (Utc::now() - started_at).num_milliseconds();
        if exit != ExitReason::Cancelled {
            tracing::info!(
                envelope_id = %envelope.identity.envelope_id,
                mode = ?mode,
                stream = sender.is_some(),
                duration_ms,
                terminated = envelope.bounds.terminated,
                exit = ?exit,
                "pipeline_completed"
            );
            if mode == RunMode::Parallel {
                tracing::info!(envelope_id = %envelope.identity.envelope_id, duration_ms, "pipeline_parallel_completed");
            }
        }
        if exit == ExitReason::InterruptPending {
            tracing::info!(envelope_id = %envelope.identity.envelope_id, "pipeline_interrupt");
        }

        if let Some(sender) = sender {
            let mut output = HashMap::new();
            output.insert("terminated".to_string(), serde_json::Value::Bool(envelope.bounds.terminated));
            let _ = sender
                .send(StageEvent {
                    stage: "__end__".to_string(),
                    output,
                    error: None,
                })
                .await;
        }

        if exit == ExitReason::Cancelled {
            return Err(Error::cancelled(format!(
                "run cancelled for envelope {}",
                envelope.identity.envelope_id
            )));
        }

        Ok(())
    }
}
