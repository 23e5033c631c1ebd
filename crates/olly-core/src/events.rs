// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

use crate::compact::CompactionLevel;
use crate::outcome::AgentStep;

/// Events emitted by the agent during a single run.
/// Consumers (CLI, UI) subscribe to these to drive their output; the loop
/// never blocks on a slow consumer beyond the channel's buffer.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A text chunk streamed from the model
    ContentDelta(String),
    /// The model has requested a tool call (stream-time, pre-safety)
    ToolCallStarted { index: usize, name: String, args: Value },
    /// A tool call finished (success or error)
    ToolCallFinished { index: usize, name: String, output: String, is_error: bool },
    /// The safety gateway blocked a tool call
    ToolBlocked { index: usize, name: String, reason: String },
    /// One loop iteration finished
    StepCompleted(AgentStep),
    /// Context was compacted; statistics for the host
    ContextCompacted {
        tokens_before: usize,
        tokens_after: usize,
        level: CompactionLevel,
    },
    /// The run has finished processing the current user turn
    TurnComplete,
}
