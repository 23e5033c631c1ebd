// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use olly_config::{AgentConfig, AgentMode, RiskLevel, SafetyConfig};
use olly_model::ModelClient;
use olly_safety::AutoApprover;
use olly_store::SessionStore;
use olly_tools::{
    CancelToken, GlobTool, GrepTool, ListDirTool, ReadFileTool, TodoReadTool, TodoWriteTool,
    Tool, ToolCall, ToolContext, ToolOutput, ToolRegistry,
};

use crate::agent::{run_agent, AgentRunArgs};
use crate::events::AgentEvent;
use crate::prompts::explore_prompt;

const MAX_DEPTH: usize = 3;

/// Delegated sub-agent: runs the agent loop recursively in plan mode with a
/// read-only registry and a bounded iteration budget.
pub struct TaskTool {
    model: Arc<dyn ModelClient>,
    store: SessionStore,
    host: String,
    agent_config: AgentConfig,
    safety_config: SafetyConfig,
    depth: Arc<AtomicUsize>,
}

impl TaskTool {
    pub fn new(
        model: Arc<dyn ModelClient>,
        store: SessionStore,
        host: String,
        agent_config: AgentConfig,
        safety_config: SafetyConfig,
    ) -> Self {
        Self {
            model,
            store,
            host,
            agent_config,
            safety_config,
            depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Read-only registry for the sub-agent.  `task` itself is deliberately
    /// absent so nesting stays bounded even without the depth counter.
    fn build_sub_registry(&self) -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(ReadFileTool);
        reg.register(ListDirTool);
        reg.register(GlobTool);
        reg.register(GrepTool);
        reg.register(TodoWriteTool::new(self.store.clone()));
        reg.register(TodoReadTool::new(self.store.clone()));
        reg
    }
}

fn iteration_cap(thoroughness: &str) -> u32 {
    match thoroughness {
        "quick" => 8,
        "thorough" => 25,
        _ => 15,
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Delegate a focused exploration task to a read-only sub-agent and get its\n\
         findings back as text. Use for open-ended questions over the codebase\n\
         ('where is X handled?', 'how does Y work?') so the main conversation\n\
         stays small. thoroughness: quick | medium (default) | thorough."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "description": {
                    "type": "string",
                    "description": "Short label for the delegated task"
                },
                "prompt": {
                    "type": "string",
                    "description": "The full question or instruction for the sub-agent"
                },
                "thoroughness": {
                    "type": "string",
                    "enum": ["quick", "medium", "thorough"],
                    "description": "Effort budget: quick (8 iterations), medium (15), thorough (25)"
                }
            },
            "required": ["description", "prompt"],
            "additionalProperties": false
        })
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "success": { "type": "boolean" },
                "output": { "type": "string" },
                "files_explored": { "type": "array", "items": { "type": "string" } },
                "iterations": { "type": "integer" }
            }
        })
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::Safe
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext, cancel: &CancelToken) -> ToolOutput {
        let description = match call.args.get("description").and_then(|v| v.as_str()) {
            Some(d) => d.to_string(),
            None => return ToolOutput::err(call.index, "missing required parameter 'description'"),
        };
        let prompt = match call.args.get("prompt").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(call.index, "missing required parameter 'prompt'"),
        };
        let thoroughness = call
            .args
            .get("thoroughness")
            .and_then(|v| v.as_str())
            .unwrap_or("medium");

        let current = self.depth.load(Ordering::Relaxed);
        if current >= MAX_DEPTH {
            return ToolOutput::err(
                call.index,
                format!("maximum sub-agent depth ({MAX_DEPTH}) reached"),
            );
        }
        self.depth.fetch_add(1, Ordering::Relaxed);

        debug!(task = %description, thoroughness, depth = current + 1, "spawning sub-agent");

        let mut sub_config = self.agent_config.clone();
        sub_config.max_iterations = iteration_cap(thoroughness);
        sub_config.system_prompt = None;

        // Sub-agent events are drained and discarded; only the final text
        // flows back to the parent.
        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let root = self.safety_config.project_root.display().to_string();
        let outcome = run_agent(AgentRunArgs {
            model: Arc::clone(&self.model),
            host: self.host.clone(),
            user_message: prompt,
            history: Vec::new(),
            session_id: format!("{}-task", ctx.session_id),
            mode: AgentMode::Plan,
            registry: Arc::new(self.build_sub_registry()),
            events: tx,
            // Background sub-agents never interrupt the operator; anything
            // that would need approval is refused.
            confirmer: Arc::new(AutoApprover::deny_all()),
            cancel: cancel.clone(),
            agent_config: sub_config,
            safety_config: self.safety_config.clone(),
            system_prompt_override: Some(explore_prompt(&root)),
        })
        .await;

        self.depth.fetch_sub(1, Ordering::Relaxed);

        match outcome {
            Ok(result) => {
                let mut files: Vec<String> = result
                    .steps
                    .iter()
                    .flat_map(|s| s.actions.iter())
                    .filter(|a| a.name == "read_file")
                    .filter_map(|a| a.arguments.get("path").and_then(|v| v.as_str()))
                    .map(str::to_string)
                    .collect();
                files.sort();
                files.dedup();
                let report = json!({
                    "success": true,
                    "output": result.final_answer,
                    "files_explored": files,
                    "iterations": result.stats.iterations,
                });
                ToolOutput::ok(call.index, report.to_string())
            }
            Err(e) => {
                let report = json!({
                    "success": false,
                    "output": e.to_string(),
                    "files_explored": [],
                    "iterations": 0,
                });
                // The parent can recover from a failed exploration; report
                // it as data rather than as a tool error.
                ToolOutput::ok(call.index, report.to_string())
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
