// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The agent control loop.
//!
//! One [`run_agent`] call drives up to `max_iterations` rounds of
//! model stream → safety gateway → tool executor → progress guard →
//! compaction.  The loop exclusively owns the message buffer for the
//! duration of the run; hosts observe it through events and the terminal
//! result.  Every failure path is an [`AgentError`] variant; the loop
//! never panics across its boundary, and the audit log is flushed on every
//! way out.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use olly_config::{AgentConfig, AgentMode, SafetyConfig};
use olly_model::{estimate_tokens, ChatRequest, Message, ModelClient};
use olly_safety::{ConfirmationHandler, SafetyGateway};
use olly_store::SessionStore;
use olly_tools::{
    CancelToken, EditFileTool, GlobTool, GrepTool, ListDirTool, ReadFileTool, RunCommandTool,
    TodoReadTool, TodoWriteTool, ToolContext, ToolRegistry, WriteFileTool,
};

use crate::compact::Compactor;
use crate::events::AgentEvent;
use crate::executor::{process_tool_calls, ExecutorEnv};
use crate::loop_check::{check_consecutive, check_doom, check_not_found};
use crate::outcome::{AgentError, AgentResult, AgentStep, ContextUsage, RunStats};
use crate::prompts::system_prompt;
use crate::stream::collect_stream;
use crate::task_tool::TaskTool;

/// Everything one run needs.  The caller keeps clones of `events` and
/// `cancel`; the rest moves in.
pub struct AgentRunArgs {
    pub model: Arc<dyn ModelClient>,
    pub host: String,
    pub user_message: String,
    pub history: Vec<Message>,
    pub session_id: String,
    pub mode: AgentMode,
    pub registry: Arc<ToolRegistry>,
    pub events: mpsc::Sender<AgentEvent>,
    pub confirmer: Arc<dyn ConfirmationHandler>,
    pub cancel: CancelToken,
    pub agent_config: AgentConfig,
    pub safety_config: SafetyConfig,
    pub system_prompt_override: Option<String>,
}

/// Build the standard tool registry.
///
/// `include_task` registers the delegating `task` tool; sub-agent
/// registries leave it out to bound nesting.
pub fn build_registry(
    store: &SessionStore,
    model: &Arc<dyn ModelClient>,
    host: &str,
    agent_config: &AgentConfig,
    safety_config: &SafetyConfig,
    include_task: bool,
) -> ToolRegistry {
    let mut reg = ToolRegistry::new();
    reg.register(ReadFileTool);
    reg.register(ListDirTool);
    reg.register(GlobTool);
    reg.register(GrepTool);
    reg.register(WriteFileTool);
    reg.register(EditFileTool);
    reg.register(RunCommandTool);
    reg.register(TodoWriteTool::new(store.clone()));
    reg.register(TodoReadTool::new(store.clone()));
    if include_task {
        reg.register(TaskTool::new(
            Arc::clone(model),
            store.clone(),
            host.to_string(),
            agent_config.clone(),
            safety_config.clone(),
        ));
    }
    reg
}

/// Run the agent loop to a terminal outcome.
pub async fn run_agent(args: AgentRunArgs) -> Result<AgentResult, AgentError> {
    let gateway = Arc::new(Mutex::new(SafetyGateway::new(
        args.safety_config.clone(),
        args.session_id.clone(),
    )));

    let result = run_inner(&args, &gateway).await;

    // Pending audit entries are flushed on every termination path.
    gateway.lock().await.flush();
    let _ = args.events.send(AgentEvent::TurnComplete).await;
    result
}

async fn run_inner(
    args: &AgentRunArgs,
    gateway: &Arc<Mutex<SafetyGateway>>,
) -> Result<AgentResult, AgentError> {
    // A failed probe disables compaction but never kills the run.
    let window = match args.model.context_window().await {
        Ok(w) if w > 0 => Some(w),
        Ok(_) => None,
        Err(e) => {
            warn!("context window probe failed, compaction disabled: {e}");
            None
        }
    };

    let compactor = Compactor {
        threshold: args.agent_config.compaction_threshold,
        min_preserved: args.agent_config.min_preserved_messages,
        llm_summarization: args.agent_config.llm_summarization,
    };

    let root = args.safety_config.project_root.display().to_string();
    let mut messages = vec![Message::system(system_prompt(
        args.mode,
        args.system_prompt_override.as_deref().or(args.agent_config.system_prompt.as_deref()),
        &root,
    ))];
    // Prior history comes in without its system prompt; the current mode
    // decides the prompt for this run.
    messages.extend(
        args.history
            .iter()
            .filter(|m| m.role != olly_model::Role::System)
            .cloned(),
    );
    messages.push(Message::user(&args.user_message));

    let env = ExecutorEnv {
        registry: Arc::clone(&args.registry),
        safety: Arc::clone(gateway),
        confirmer: Arc::clone(&args.confirmer),
        events: args.events.clone(),
        ctx: ToolContext {
            session_id: args.session_id.clone(),
            project_root: args.safety_config.project_root.clone(),
            model: args.model.model_name().to_string(),
            host: args.host.clone(),
        },
    };

    let tool_schemas: Vec<olly_model::ToolSchema> = args
        .registry
        .schemas_for_mode(args.mode)
        .into_iter()
        .map(|s| olly_model::ToolSchema {
            name: s.name,
            description: s.description,
            parameters: s.parameters,
        })
        .collect();

    let threshold = args.agent_config.loop_threshold;
    let mut steps: Vec<AgentStep> = Vec::new();
    let mut stats = RunStats::default();

    for iteration in 0..args.agent_config.max_iterations {
        if args.cancel.is_cancelled() {
            return Err(AgentError::Aborted);
        }
        gateway.lock().await.reset_turn();
        stats.iterations = iteration + 1;
        let step_started = Instant::now();

        debug!(iteration, messages = messages.len(), "starting iteration");

        let req = ChatRequest {
            model: args.model.model_name().to_string(),
            messages: messages.clone(),
            tools: tool_schemas.clone(),
            temperature: 0.2,
        };
        let stream = match args.model.chat(req).await {
            Ok(s) => s,
            Err(e) => {
                if args.cancel.is_cancelled() {
                    return Err(AgentError::Aborted);
                }
                return Err(AgentError::ModelError { message: e.to_string() });
            }
        };
        let turn = collect_stream(stream, &args.events, &args.cancel).await?;

        // Empty turn: nudge and retry.
        if turn.content.is_empty() && turn.tool_calls.is_empty() {
            messages.push(Message::user(
                "You produced no answer and no tool call. \
                 Please answer the user or use a tool.",
            ));
            continue;
        }

        // Text-only turn: the run is done.
        if turn.tool_calls.is_empty() {
            messages.push(Message::assistant(&turn.content));
            let context_usage = window.map(|w| {
                let used = estimate_tokens(&messages);
                ContextUsage {
                    used_tokens: used,
                    context_window: w,
                    fraction: used as f32 / w as f32,
                }
            });
            return Ok(AgentResult {
                steps,
                final_answer: turn.content,
                messages,
                stats,
                context_usage,
            });
        }

        // Tool-call turn: the assistant message is appended before any tool
        // message, then the batch runs through the executor.
        messages.push(Message::assistant_with_calls(&turn.content, turn.tool_calls.clone()));
        let batch = process_tool_calls(&turn.tool_calls, args.mode, &env, &args.cancel).await?;
        messages.extend(batch.messages.iter().cloned());

        stats.tool_calls += turn.tool_calls.len() as u32;
        stats.parallel_calls += batch.parallel_count as u32;
        stats.sequential_calls += batch.sequential_count as u32;
        stats.failed_calls += batch.failed_count as u32;

        let step = AgentStep {
            thought: turn.content,
            actions: turn.tool_calls,
            observations: batch.observations,
            duration_ms: step_started.elapsed().as_millis() as u64,
        };
        let _ = args.events.send(AgentEvent::StepCompleted(step.clone())).await;
        steps.push(step);

        // Progress guard: consecutive first (most specific, terminal), then
        // not-found (injects a reminder and suppresses doom for this
        // iteration), then doom (terminal).
        if let Some((action, attempts)) = check_consecutive(&steps, threshold) {
            return Err(AgentError::LoopDetected { action, attempts });
        }
        if let Some((queries, misses)) = check_not_found(&steps, threshold) {
            debug!(misses, "not-found pattern detected; injecting reminder");
            messages.push(Message::system(format!(
                "Note: {misses} searches for {} returned nothing. What you are \
                 looking for most likely does not exist in this project. Stop \
                 searching for it and tell the user what you could not find.",
                queries.join(", "),
            )));
        } else if let Some((reason, action, attempts)) = check_doom(&steps, threshold) {
            debug!(%reason, %action, "doom loop detected");
            return Err(AgentError::LoopDetected { action, attempts });
        }

        // Compaction gate (only when the window is known).
        if let Some(w) = window {
            let before = estimate_tokens(&messages);
            let usage = before as f32 / w as f32;
            if let Some(level) = compactor.level_for(usage) {
                messages = compactor.compact(&messages, level, args.model.as_ref()).await;
                let after = estimate_tokens(&messages);
                debug!(before, after, %level, "context compacted");
                let _ = args
                    .events
                    .send(AgentEvent::ContextCompacted {
                        tokens_before: before,
                        tokens_after: after,
                        level,
                    })
                    .await;
            }
        }
    }

    let last_thought = steps
        .last()
        .map(|s| s.thought.clone())
        .unwrap_or_default();
    Err(AgentError::MaxIterations {
        iterations: args.agent_config.max_iterations,
        last_thought,
    })
}
