// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use thiserror::Error;

use olly_model::{Message, ToolCallRec};

/// The outcome of one tool invocation as seen by the step record.
///
/// Exactly one of `output` (non-empty on success) or `error` is meaningful.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub tool: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Observation {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// One iteration's record.  `actions[i]` pairs with `observations[i]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    /// Assistant text that accompanied the tool calls (may be empty).
    pub thought: String,
    pub actions: Vec<ToolCallRec>,
    pub observations: Vec<Observation>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub iterations: u32,
    pub tool_calls: u32,
    pub parallel_calls: u32,
    pub sequential_calls: u32,
    pub failed_calls: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContextUsage {
    pub used_tokens: usize,
    pub context_window: u32,
    pub fraction: f32,
}

/// Successful terminal outcome of a run.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub steps: Vec<AgentStep>,
    pub final_answer: String,
    /// The full message buffer at termination (for persistence / resume).
    pub messages: Vec<Message>,
    pub stats: RunStats,
    /// `None` when the model's context window could not be determined.
    pub context_usage: Option<ContextUsage>,
}

/// Failed terminal outcome.  The loop never panics or throws to callers;
/// every failure is one of these variants and the termination switch in the
/// host matches exhaustively.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("run aborted by cancellation")]
    Aborted,
    #[error("model error: {message}")]
    ModelError { message: String },
    #[error("loop detected: {action} repeated {attempts} times")]
    LoopDetected { action: String, attempts: usize },
    #[error("no answer after {iterations} iterations")]
    MaxIterations { iterations: u32, last_thought: String },
    #[error("tool executor fault in {tool}: {message}")]
    ToolError { tool: String, message: String },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
