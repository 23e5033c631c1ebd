// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Two-lane tool dispatch.
//!
//! A batch of tool calls from one assistant turn is split by declared risk:
//! `safe` tools fan out as parallel tasks with settle-all semantics (a panic
//! in one task never cancels its siblings), everything else runs
//! sequentially in original order so confirmation prompts cannot interleave.
//! Results are re-sorted by original call index before they reach the
//! message buffer, so the model sees observations in the order it asked.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use olly_config::AgentMode;
use olly_model::{Message, ToolCallRec};
use olly_safety::{ConfirmationHandler, Decision, SafetyGateway};
use olly_tools::{schema, CancelToken, ToolCall, ToolContext, ToolRegistry};

use crate::events::AgentEvent;
use crate::outcome::{AgentError, Observation};

/// Prepended to every successful tool message.  The model tends to assume
/// the user saw the raw output; this reminds it otherwise.
pub const TOOL_RESULT_PREFIX: &str =
    "[Tool result — the user cannot see this output; relay anything they need to know] ";

const NOT_AVAILABLE_PREFIX: &str = "[TOOL NOT AVAILABLE]";
const BLOCKED_PREFIX: &str = "[TOOL FAILED - OPERATION NOT PERFORMED]";

/// Everything the executor needs besides the calls themselves.
#[derive(Clone)]
pub struct ExecutorEnv {
    pub registry: Arc<ToolRegistry>,
    pub safety: Arc<Mutex<SafetyGateway>>,
    pub confirmer: Arc<dyn ConfirmationHandler>,
    pub events: mpsc::Sender<AgentEvent>,
    pub ctx: ToolContext,
}

/// Aggregated outcome of one batch.
#[derive(Debug)]
pub struct BatchOutcome {
    /// One observation per call, ascending original index.
    pub observations: Vec<Observation>,
    /// One tool message per call, ascending original index.
    pub messages: Vec<Message>,
    pub executed_count: usize,
    pub total_duration_ms: u64,
    pub parallel_count: usize,
    pub sequential_count: usize,
    pub failed_count: usize,
}

struct ProcessedCall {
    index: usize,
    observation: Observation,
    message: Message,
    executed: bool,
}

/// Run one batch of tool calls through the safety gateway and both lanes.
pub async fn process_tool_calls(
    calls: &[ToolCallRec],
    mode: AgentMode,
    env: &ExecutorEnv,
    cancel: &CancelToken,
) -> Result<BatchOutcome, AgentError> {
    let started = Instant::now();

    // Partition, preserving each call's original index.
    let mut safe_lane: Vec<ToolCall> = Vec::new();
    let mut unsafe_lane: Vec<ToolCall> = Vec::new();
    for (index, call) in calls.iter().enumerate() {
        let tc = ToolCall::new(index, call.name.clone(), Value::Object(call.arguments.clone()));
        if env.registry.risk(&call.name).is_safe() {
            safe_lane.push(tc);
        } else {
            unsafe_lane.push(tc);
        }
    }
    let parallel_count = safe_lane.len();
    let sequential_count = unsafe_lane.len();

    debug!(parallel = parallel_count, sequential = sequential_count, "dispatching tool batch");

    let mut processed: Vec<ProcessedCall> = Vec::with_capacity(calls.len());

    // ── Safe lane: settle-all parallel tasks ─────────────────────────────────
    let mut tasks = Vec::with_capacity(safe_lane.len());
    for call in safe_lane {
        let env = env.clone();
        let cancel = cancel.clone();
        let mode_copy = mode;
        tasks.push((
            call.index,
            call.name.clone(),
            tokio::spawn(async move { process_one(call, mode_copy, &env, &cancel).await }),
        ));
    }
    for (index, name, task) in tasks {
        match task.await {
            Ok(p) => processed.push(p),
            Err(e) => {
                // A panicked task settles as an error result; siblings keep
                // running to completion.
                warn!(tool = %name, "tool task panicked: {e}");
                processed.push(ProcessedCall {
                    index,
                    observation: Observation {
                        tool: name.clone(),
                        output: String::new(),
                        error: Some(format!("Execution failed: {e}")),
                    },
                    message: Message::tool(format!("Error: Execution failed: {e}")),
                    executed: false,
                });
            }
        }
    }

    // ── Unsafe lane: sequential, cancellation-checked between calls ──────────
    for call in unsafe_lane {
        if cancel.is_cancelled() {
            return Err(AgentError::Aborted);
        }
        processed.push(process_one(call, mode, env, cancel).await);
    }

    // ── Re-sort into the model's original call order ─────────────────────────
    processed.sort_by_key(|p| p.index);

    let executed_count = processed.iter().filter(|p| p.executed).count();
    let failed_count = processed.iter().filter(|p| p.observation.is_error()).count();
    Ok(BatchOutcome {
        observations: processed.iter().map(|p| p.observation.clone()).collect(),
        messages: processed.into_iter().map(|p| p.message).collect(),
        executed_count,
        total_duration_ms: started.elapsed().as_millis() as u64,
        parallel_count,
        sequential_count,
        failed_count,
    })
}

/// The per-call pipeline: mode gate → safety check → execute → audit.
async fn process_one(
    call: ToolCall,
    mode: AgentMode,
    env: &ExecutorEnv,
    cancel: &CancelToken,
) -> ProcessedCall {
    let name = call.name.clone();

    // 1. Mode gate.
    if !env.registry.available_in(&name, mode) {
        let reason = format!("Tool '{name}' is not available in {mode} mode.");
        return not_executed(
            call.index,
            &name,
            format!("{NOT_AVAILABLE_PREFIX} {reason}"),
            reason,
        );
    }
    // The gate above also rejects unknown names, so the lookup cannot miss.
    let Some(tool) = env.registry.get(&name) else {
        return not_executed(
            call.index,
            &name,
            format!("{NOT_AVAILABLE_PREFIX} Unknown tool '{name}'."),
            format!("unknown tool '{name}'"),
        );
    };

    // 2. Safety check.
    let decision = env
        .safety
        .lock()
        .await
        .check(&name, &call.args, tool.risk(), mode);
    let mut confirmed = false;
    match decision {
        Decision::Allowed => {}
        Decision::Denied { reason } => {
            env.safety.lock().await.record_denied(&name, &call.args, &reason);
            let _ = env
                .events
                .send(AgentEvent::ToolBlocked {
                    index: call.index,
                    name: name.clone(),
                    reason: reason.clone(),
                })
                .await;
            return not_executed(
                call.index,
                &name,
                format!(
                    "{BLOCKED_PREFIX} {reason}. The operation did NOT execute. \
                     You must tell the user it was blocked."
                ),
                reason,
            );
        }
        Decision::NeedsConfirmation { request } => {
            let response = env.confirmer.confirm(request).await;
            env.safety
                .lock()
                .await
                .handle_confirmation_response(&name, response);
            if !response.is_allowed() {
                env.safety.lock().await.record_rejected(&name, &call.args);
                let reason = format!("The user denied execution of {name}");
                let _ = env
                    .events
                    .send(AgentEvent::ToolBlocked {
                        index: call.index,
                        name: name.clone(),
                        reason: reason.clone(),
                    })
                    .await;
                return not_executed(
                    call.index,
                    &name,
                    format!(
                        "{BLOCKED_PREFIX} {reason}. The operation did NOT execute. \
                         Tell the user and ask how to proceed."
                    ),
                    reason,
                );
            }
            confirmed = true;
        }
    }

    // 3. Execute (argument validation first).
    let problems = schema::validate_args(&tool.parameters_schema(), &call.args);
    if !problems.is_empty() {
        let reason = format!("Invalid arguments for {name}: {}", problems.join("; "));
        return not_executed(call.index, &name, format!("Error: {reason}"), reason);
    }

    let started = Instant::now();
    let output = tool.execute(&call, &env.ctx, cancel).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let _ = env
        .events
        .send(AgentEvent::ToolCallFinished {
            index: call.index,
            name: name.clone(),
            output: output.content.clone(),
            is_error: output.is_error,
        })
        .await;

    // 4. Audit.
    env.safety.lock().await.record_execution(
        &name,
        &call.args,
        duration_ms,
        (!output.is_error).then_some(output.content.as_str()),
        output.is_error.then_some(output.content.as_str()),
        confirmed,
    );

    if output.is_error {
        ProcessedCall {
            index: call.index,
            observation: Observation {
                tool: name,
                output: String::new(),
                error: Some(output.content.clone()),
            },
            message: Message::tool(format!("Error: {}", output.content)),
            executed: true,
        }
    } else {
        ProcessedCall {
            index: call.index,
            observation: Observation { tool: name, output: output.content.clone(), error: None },
            message: Message::tool(format!("{TOOL_RESULT_PREFIX}{}", output.content)),
            executed: true,
        }
    }
}

fn not_executed(index: usize, tool: &str, message: String, reason: String) -> ProcessedCall {
    ProcessedCall {
        index,
        observation: Observation {
            tool: tool.to_string(),
            output: String::new(),
            error: Some(reason),
        },
        message: Message::tool(message),
        executed: false,
    }
}

// Executor behaviour is covered end-to-end in crate::tests, where a full
// registry, gateway, and mock model are wired together.
