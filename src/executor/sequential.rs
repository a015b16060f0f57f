//! The sequential executor: drives one envelope through its declared stages
//! one at a time, following `current_stage`/`default_next`/routing decisions
//! a stage makes rather than a precomputed order. Tolerates loop-backs
//! (re-entering an earlier stage), bounded by per-edge traversal limits and
//! the envelope's iteration cap.

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentRegistry, StageContext};
use crate::config::PipelineConfig;
use crate::envelope::{Envelope, ProcessingRecord, TerminalReason};
use crate::recovery::with_recovery_async;
use crate::types::Result;

use super::{classify_cannot_continue, ExitReason, RunHooks, StageEvent, END_STAGE};

/// Run `envelope` to completion, an interrupt, a terminal bounds condition,
/// or a cancellation — whichever comes first.
pub async fn run(
    config: &PipelineConfig,
    registry: &AgentRegistry,
    envelope: &mut Envelope,
    cancellation: &CancellationToken,
    hooks: &RunHooks<'_>,
) -> Result<ExitReason> {
    let declared_order = config.get_stage_order();

    loop {
        if cancellation.is_cancelled() {
            tracing::info!(envelope_id = %envelope.identity.envelope_id, "pipeline_cancelled");
            return Ok(ExitReason::Cancelled);
        }

        if envelope.pipeline.current_stage == END_STAGE {
            return Ok(ExitReason::Completed);
        }

        if !envelope.can_continue() {
            return Ok(classify_cannot_continue(envelope));
        }

        let stage_name = envelope.pipeline.current_stage.clone();
        let Some(executor) = registry.get(&stage_name) else {
            tracing::error!(
                envelope_id = %envelope.identity.envelope_id,
                stage = %stage_name,
                "unknown_stage"
            );
            envelope.terminate(
                format!("no agent registered for stage {stage_name}"),
                Some(TerminalReason::ToolFailedFatally),
            );
            return Ok(ExitReason::Terminated);
        };

        let from_index = declared_order.iter().position(|s| s == &stage_name);
        envelope.start_stage(stage_name.clone());
        envelope.increment_agent_hops();

        let ctx = StageContext::new(stage_name.clone(), cancellation.clone());
        let started_at = Utc::now();
        let operation_name = format!("stage:{stage_name}");
        let outcome = with_recovery_async(|| executor.process(&ctx, envelope), &operation_name).await;
        let duration_ms = (Utc::now() - started_at).num_milliseconds() as i32;

        match outcome {
            Err(err) => {
                envelope.fail_stage(stage_name.clone(), err.to_string());
                envelope.add_processing_record(ProcessingRecord {
                    agent: stage_name.clone(),
                    stage_order: from_index.map(|i| i as i32).unwrap_or(-1),
                    started_at,
                    completed_at: Some(Utc::now()),
                    duration_ms,
                    status: "error".to_string(),
                    error: Some(err.to_string()),
                    llm_calls: 0,
                });
                hooks
                    .emit(StageEvent {
                        stage: stage_name.clone(),
                        output: Default::default(),
                        error: Some(err.to_string()),
                    })
                    .await;
                hooks.persist(envelope).await;

                // A stage may reroute to an error stage before returning Err;
                // the runtime honours that route instead of terminating.
                if envelope.pipeline.current_stage != stage_name
                    && envelope.pipeline.current_stage != END_STAGE
                {
                    continue;
                }
                if envelope.pipeline.current_stage == END_STAGE {
                    return Ok(ExitReason::Completed);
                }

                tracing::error!(
                    envelope_id = %envelope.identity.envelope_id,
                    stage = %stage_name,
                    error = %err,
                    "stage_failed"
                );
                envelope.terminate(
                    format!("stage {stage_name} failed: {err}"),
                    Some(TerminalReason::ToolFailedFatally),
                );
                return Ok(ExitReason::Terminated);
            }
            Ok(()) => {
                envelope.complete_stage(&stage_name);
                envelope.add_processing_record(ProcessingRecord {
                    agent: stage_name.clone(),
                    stage_order: from_index.map(|i| i as i32).unwrap_or(-1),
                    started_at,
                    completed_at: Some(Utc::now()),
                    duration_ms,
                    status: "success".to_string(),
                    error: None,
                    llm_calls: 0,
                });
                hooks
                    .emit(StageEvent {
                        stage: stage_name.clone(),
                        output: envelope.get_output(&stage_name).cloned().unwrap_or_default(),
                        error: None,
                    })
                    .await;

                if envelope.interrupts.interrupt_pending {
                    hooks.persist(envelope).await;
                    return Ok(ExitReason::InterruptPending);
                }

                let to_stage = envelope.pipeline.current_stage.clone();
                if to_stage != stage_name && to_stage != END_STAGE {
                    let to_index = declared_order.iter().position(|s| s == &to_stage);
                    let is_loop_back = match (from_index, to_index) {
                        (Some(from), Some(to)) => to <= from,
                        _ => false,
                    };
                    if is_loop_back {
                        envelope.increment_iteration(Some(&stage_name));
                    }

                    let edge = format!("{stage_name}->{to_stage}");
                    let limit = config.get_edge_limit(&stage_name, &to_stage);
                    let count = envelope.pipeline.edge_traversals.entry(edge.clone()).or_insert(0);
                    *count += 1;
                    if limit > 0 && *count > limit {
                        tracing::warn!(
                            envelope_id = %envelope.identity.envelope_id,
                            edge = %edge,
                            limit,
                            "edge_limit_exceeded"
                        );
                        envelope.pipeline.current_stage = END_STAGE.to_string();
                        envelope.terminate(
                            format!("edge {edge} exceeded its traversal limit of {limit}"),
                            Some(TerminalReason::MaxLoopExceeded),
                        );
                        hooks.persist(envelope).await;
                        return Ok(ExitReason::Terminated);
                    }
                }

                hooks.persist(envelope).await;
            }
        }
    }
}
