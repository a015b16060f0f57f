//! The two execution engines (sequential, parallel) that drive an envelope
//! through a [`crate::config::PipelineConfig`], plus the shared streaming
//! and persistence plumbing both engines call into between stages/batches.

pub mod parallel;
pub mod sequential;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::envelope::Envelope;
use crate::persistence::PersistenceAdapter;

/// Stage name the runtime treats as the terminal "no more work" marker.
pub const END_STAGE: &str = "end";

/// Why an executor's run loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// `current_stage == "end"` (sequential) or the ready set emptied out
    /// (parallel) with no stage having failed.
    Completed,
    /// The envelope terminated — either a stage did it, or the executor did
    /// (unknown stage, edge limit, agent error, bounds).
    Terminated,
    /// A stage published an interrupt; the run must suspend until `resume`.
    InterruptPending,
    /// A cancellation signal was observed before any further dispatch.
    Cancelled,
}

/// One element of the streaming output channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEvent {
    pub stage: String,
    pub output: HashMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Streaming + persistence sinks threaded through a single `execute` call.
/// Both are optional: streaming only exists when the caller asked for it,
/// persistence only when a `thread_id` and adapter are both configured.
pub struct RunHooks<'a> {
    pub stream: Option<&'a mpsc::Sender<StageEvent>>,
    pub persistence: Option<(&'a Arc<dyn PersistenceAdapter>, &'a str)>,
}

impl<'a> RunHooks<'a> {
    pub fn none() -> Self {
        Self {
            stream: None,
            persistence: None,
        }
    }

    pub async fn emit(&self, event: StageEvent) {
        if let Some(sender) = self.stream {
            // Channel capacity is sized to the stage count up front (see
            // `Runtime::execute`); an awaiting send still applies real
            // back-pressure to a slow consumer without ever dropping output.
            let _ = sender.send(event).await;
        }
    }

    pub async fn persist(&self, envelope: &Envelope) {
        let Some((adapter, thread_id)) = self.persistence else {
            return;
        };
        if thread_id.is_empty() {
            return;
        }
        match envelope.to_state_dict() {
            Ok(dict) => {
                if let Err(err) = adapter.save_state(thread_id, dict).await {
                    tracing::warn!(
                        envelope_id = %envelope.identity.envelope_id,
                        thread_id,
                        error = %err,
                        "state_persist_error"
                    );
                }
            }
            Err(err) => {
                tracing::warn!(
                    envelope_id = %envelope.identity.envelope_id,
                    thread_id,
                    error = %err,
                    "state_persist_error"
                );
            }
        }
    }
}

/// Classify why `envelope.can_continue()` returned false, terminating the
/// envelope on a genuine bounds violation (not on an interrupt, which is
/// the caller's to resolve).
pub(crate) fn classify_cannot_continue(envelope: &mut Envelope) -> ExitReason {
    use crate::envelope::TerminalReason;

    if envelope.bounds.terminated {
        return ExitReason::Terminated;
    }
    if envelope.interrupts.interrupt_pending {
        return ExitReason::InterruptPending;
    }
    tracing::warn!(
        envelope_id = %envelope.identity.envelope_id,
        iteration = envelope.pipeline.iteration,
        max_iterations = envelope.pipeline.max_iterations,
        llm_calls = envelope.bounds.llm_call_count,
        max_llm_calls = envelope.bounds.max_llm_calls,
        agent_hops = envelope.bounds.agent_hop_count,
        max_agent_hops = envelope.bounds.max_agent_hops,
        "pipeline_bounds_exceeded"
    );
    envelope.terminate("resource bounds exceeded", Some(TerminalReason::BoundsExceeded));
    ExitReason::Terminated
}
