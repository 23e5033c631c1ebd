// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};

use olly_config::AgentMode;
pub use olly_config::RiskLevel;

use crate::cancel::CancelToken;

/// A single tool invocation requested by the model.
///
/// `index` is the call's position within its assistant turn; it survives the
/// two-lane executor so results can be re-sorted into the original order.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub index: usize,
    pub name: String,
    /// Parsed JSON arguments (always an object)
    pub args: Value,
}

impl ToolCall {
    pub fn new(index: usize, name: impl Into<String>, args: Value) -> Self {
        Self { index, name: name.into(), args }
    }
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Original call index, forwarded from [`ToolCall::index`].
    pub index: usize,
    /// Plain-text content: the tool's output on success, a user-directed
    /// message on failure.
    pub content: String,
    /// If true, the tool execution failed non-fatally.
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful plain-text result.
    pub fn ok(index: usize, content: impl Into<String>) -> Self {
        let text: String = content.into();
        Self {
            // Exactly one of output/error is meaningful; an empty success
            // output would be indistinguishable from a missing one.
            content: if text.is_empty() { "(no output)".into() } else { text },
            index,
            is_error: false,
        }
    }

    /// Error result containing a plain-text error message.
    pub fn err(index: usize, msg: impl Into<String>) -> Self {
        Self { index, content: msg.into(), is_error: true }
    }
}

/// Run-scoped context handed to every tool execution.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub session_id: String,
    pub project_root: PathBuf,
    pub model: String,
    pub host: String,
}

/// Trait that every built-in tool implements.
///
/// Stateful dependencies (the session store, sub-agent spawners) are
/// injected at construction; `execute` receives only the parsed call, the
/// run context, and the cancellation signal.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters.  Descriptions in the schema are the
    /// authoritative documentation of each tool's preconditions.
    fn parameters_schema(&self) -> Value;
    /// JSON Schema for the output.  Most tools produce plain text.
    fn output_schema(&self) -> Value {
        json!({ "type": "string" })
    }
    fn risk(&self) -> RiskLevel;
    /// The agent modes in which this tool is available.
    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Plan, AgentMode::Build]
    }
    /// Execute the tool.  Errors should be wrapped in [`ToolOutput::err`].
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext, cancel: &CancelToken)
        -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
