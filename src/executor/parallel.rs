//! The parallel executor: drives an envelope through its stages in
//! dependency-ordered batches (a strict DAG — no loop-backs), running every
//! ready stage in a batch concurrently on its own envelope clone and then
//! merging the results back into the shared envelope before computing the
//! next ready set.
//!
//! Each batch member runs on an independent clone rather than a shared,
//! lock-guarded envelope: a stage in one batch never observes a sibling's
//! in-flight writes, matching the "no loop-backs inside a batch" guarantee
//! `PipelineConfig::get_ready_stages` makes. Counters (`llm_call_count`,
//! `agent_hop_count`) are merged back as a delta against the batch's
//! starting snapshot, so two siblings each making one LLM call are counted
//! as two, not one.

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentRegistry, StageContext};
use crate::config::PipelineConfig;
use crate::envelope::{Envelope, ProcessingRecord, TerminalReason};
use crate::recovery::with_recovery_async;
use crate::types::{Error, Result};

use super::{classify_cannot_continue, ExitReason, RunHooks, StageEvent, END_STAGE};

/// Run `envelope` batch by batch until the ready set is exhausted, a stage
/// fails, an interrupt is raised, a bound is exceeded, or cancellation is
/// observed.
pub async fn run(
    config: &PipelineConfig,
    registry: &AgentRegistry,
    envelope: &mut Envelope,
    cancellation: &CancellationToken,
    hooks: &RunHooks<'_>,
) -> Result<ExitReason> {
    loop {
        if cancellation.is_cancelled() {
            tracing::info!(envelope_id = %envelope.identity.envelope_id, "pipeline_cancelled");
            return Ok(ExitReason::Cancelled);
        }

        if !envelope.can_continue() {
            return Ok(classify_cannot_continue(envelope));
        }

        let ready: Vec<String> = config
            .get_ready_stages(&envelope.pipeline.completed_stage_set)
            .into_iter()
            .filter(|s| !envelope.is_stage_active(s))
            .collect();

        if ready.is_empty() {
            if envelope.has_failures() {
                envelope.terminate(
                    "one or more parallel stages failed",
                    Some(TerminalReason::ToolFailedFatally),
                );
                return Ok(ExitReason::Terminated);
            }
            envelope.pipeline.current_stage = END_STAGE.to_string();
            return Ok(ExitReason::Completed);
        }

        let mut executors = Vec::with_capacity(ready.len());
        for stage in &ready {
            match registry.get(stage) {
                Some(executor) => executors.push((stage.clone(), executor)),
                None => {
                    tracing::error!(
                        envelope_id = %envelope.identity.envelope_id,
                        stage = %stage,
                        "unknown_stage"
                    );
                    envelope.terminate(
                        format!("no agent registered for stage {stage}"),
                        Some(TerminalReason::ToolFailedFatally),
                    );
                    return Ok(ExitReason::Terminated);
                }
            }
        }

        for stage in &ready {
            envelope.start_stage(stage.clone());
        }
        let batch_base = envelope.clone();

        let mut handles = Vec::with_capacity(executors.len());
        for (stage_name, executor) in executors {
            let mut clone_envelope = batch_base.clone();
            clone_envelope.pipeline.current_stage = stage_name.clone();
            clone_envelope.increment_agent_hops();
            let ctx = StageContext::new(stage_name.clone(), cancellation.clone());
            let started_at = Utc::now();

            handles.push(tokio::spawn(async move {
                let op_name = format!("stage:{stage_name}");
                let outcome =
                    with_recovery_async(|| executor.process(&ctx, &mut clone_envelope), &op_name).await;
                (stage_name, clone_envelope, outcome, started_at)
            }));
        }

        for handle in handles {
            let (stage_name, result_envelope, outcome, started_at) = handle
                .await
                .map_err(|err| Error::internal(format!("stage task panicked before returning: {err}")))?;
            let duration_ms = (Utc::now() - started_at).num_milliseconds() as i32;
            let from_index = config
                .get_stage_order()
                .iter()
                .position(|s| s == &stage_name)
                .map(|i| i as i32)
                .unwrap_or(-1);

            merge_counters(envelope, &batch_base, &result_envelope);

            match outcome {
                Ok(()) => {
                    envelope.complete_stage(&stage_name);
                    if let Some(output) = result_envelope.get_output(&stage_name) {
                        envelope.set_output(stage_name.clone(), output.clone());
                    }
                    if result_envelope.interrupts.interrupt_pending && !envelope.interrupts.interrupt_pending {
                        envelope.interrupts = result_envelope.interrupts.clone();
                    }
                    if result_envelope.bounds.terminated && !envelope.bounds.terminated {
                        envelope.terminate(
                            result_envelope
                                .bounds
                                .termination_reason
                                .clone()
                                .unwrap_or_else(|| "stage requested termination".to_string()),
                            result_envelope.bounds.terminal_reason,
                        );
                    }
                    envelope.add_processing_record(ProcessingRecord {
                        agent: stage_name.clone(),
                        stage_order: from_index,
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
                }
                Err(err) => {
                    envelope.fail_stage(stage_name.clone(), err.to_string());
                    envelope.add_processing_record(ProcessingRecord {
                        agent: stage_name.clone(),
                        stage_order: from_index,
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
                    tracing::error!(
                        envelope_id = %envelope.identity.envelope_id,
                        stage = %stage_name,
                        error = %err,
                        "stage_failed"
                    );
                }
            }
        }

        hooks.persist(envelope).await;

        if envelope.has_failures() {
            envelope.terminate(
                "one or more parallel stages failed",
                Some(TerminalReason::ToolFailedFatally),
            );
            return Ok(ExitReason::Terminated);
        }
        if envelope.interrupts.interrupt_pending {
            return Ok(ExitReason::InterruptPending);
        }
        if !envelope.can_continue() {
            return Ok(classify_cannot_continue(envelope));
        }
    }
}

/// Fold one batch member's counter movement (relative to the batch's shared
/// starting snapshot) back into the merged envelope.
fn merge_counters(envelope: &mut Envelope, batch_base: &Envelope, result: &Envelope) {
    envelope.bounds.llm_call_count += result.bounds.llm_call_count - batch_base.bounds.llm_call_count;
    envelope.bounds.agent_hop_count += result.bounds.agent_hop_count - batch_base.bounds.agent_hop_count;
    envelope.bounds.tool_call_count += result.bounds.tool_call_count - batch_base.bounds.tool_call_count;
    envelope.bounds.tokens_in += result.bounds.tokens_in - batch_base.bounds.tokens_in;
    envelope.bounds.tokens_out += result.bounds.tokens_out - batch_base.bounds.tokens_out;
}
