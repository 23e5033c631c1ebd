// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Threshold-driven context compaction.
//!
//! When estimated usage crosses the configured threshold the buffer is
//! rewritten: the system prompt, the recent tail, tool-call bearers near the
//! tail, and task-defining user messages survive verbatim (tool contents
//! line-capped); older runs of messages are either summarized by the model
//! into one `[Previous conversation summary: …]` system message per run, or
//! line-truncated when summarization is unavailable.
//!
//! Compaction never grows the buffer: if the summarized candidate estimates
//! larger than the truncation-only fallback, the fallback wins.  Re-running
//! at the same level on an already-compacted buffer is a no-op in shape
//! (summaries are themselves preserved).

use std::collections::HashSet;
use std::sync::OnceLock;

use futures::StreamExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use olly_model::{estimate_tokens, ChatRequest, Message, ModelClient, Role};

pub const SUMMARY_MARKER: &str = "[Previous conversation summary: ";

const SUMMARIZE_PROMPT: &str =
    "Summarize the following conversation fragment in 2-3 sentences. \
     Focus on what was accomplished, files modified, and decisions made. \
     Reply with the summary only.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompactionLevel {
    Light,
    Medium,
    Aggressive,
}

impl CompactionLevel {
    /// Line cap for tool messages that survive in place.
    fn preserved_tool_lines(self) -> usize {
        match self {
            CompactionLevel::Aggressive => 10,
            CompactionLevel::Medium => 30,
            CompactionLevel::Light => 50,
        }
    }

    /// Line cap for tool messages outside the preserved set.
    fn dropped_tool_lines(self) -> usize {
        match self {
            CompactionLevel::Aggressive => 5,
            _ => 20,
        }
    }
}

impl std::fmt::Display for CompactionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompactionLevel::Light => "light",
            CompactionLevel::Medium => "medium",
            CompactionLevel::Aggressive => "aggressive",
        };
        write!(f, "{s}")
    }
}

/// User messages that define the task survive compaction.
fn task_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)please|help me|i want|create|implement|fix").unwrap())
}

#[derive(Debug, Clone)]
pub struct Compactor {
    /// Usage fraction at which compaction triggers.
    pub threshold: f32,
    /// Recent messages preserved verbatim.
    pub min_preserved: usize,
    /// Summarize dropped runs with the model; otherwise truncate only.
    pub llm_summarization: bool,
}

impl Default for Compactor {
    fn default() -> Self {
        Self { threshold: 0.80, min_preserved: 6, llm_summarization: true }
    }
}

impl Compactor {
    /// Pick the level for the current usage fraction, or `None` below the
    /// trigger threshold.
    pub fn level_for(&self, usage: f32) -> Option<CompactionLevel> {
        if usage < self.threshold {
            None
        } else if usage < 0.85 {
            Some(CompactionLevel::Light)
        } else if usage < 0.90 {
            Some(CompactionLevel::Medium)
        } else {
            Some(CompactionLevel::Aggressive)
        }
    }

    /// Produce the compacted buffer.  The caller replaces its buffer with the
    /// returned one; the original is untouched on any model failure.
    pub async fn compact(
        &self,
        messages: &[Message],
        level: CompactionLevel,
        model: &dyn ModelClient,
    ) -> Vec<Message> {
        let preserved = self.preserved_indices(messages);
        let tokens_before = estimate_tokens(messages);

        // Truncation-only rendition: everything stays, tool contents capped.
        let truncated = self.truncate_only(messages, &preserved, level);

        if !self.llm_summarization {
            return truncated;
        }

        let candidate = self.summarize(messages, &preserved, level, model).await;
        match candidate {
            Some(c) if estimate_tokens(&c) <= tokens_before.min(estimate_tokens(&truncated)) => c,
            Some(_) => {
                debug!("summary larger than truncation; keeping truncation-only buffer");
                truncated
            }
            None => truncated,
        }
    }

    /// Indices that survive verbatim.
    fn preserved_indices(&self, messages: &[Message]) -> HashSet<usize> {
        let mut keep: HashSet<usize> = HashSet::new();
        let len = messages.len();
        if len == 0 {
            return keep;
        }

        // (a) the system message at index 0
        if messages[0].role == Role::System {
            keep.insert(0);
        }
        // (b) the recent tail
        for i in len.saturating_sub(self.min_preserved)..len {
            keep.insert(i);
        }
        // (c) tool-call bearers near the tail
        for i in len.saturating_sub(self.min_preserved * 2)..len {
            if messages[i].has_tool_calls() {
                keep.insert(i);
            }
        }
        for (i, msg) in messages.iter().enumerate() {
            // (d) task-defining user messages
            if msg.role == Role::User && task_pattern().is_match(&msg.content) {
                keep.insert(i);
            }
            // Prior summaries stay put, otherwise a second pass would
            // summarize the summaries.
            if msg.role == Role::System && msg.content.starts_with(SUMMARY_MARKER) {
                keep.insert(i);
            }
        }
        keep
    }

    fn truncate_only(
        &self,
        messages: &[Message],
        preserved: &HashSet<usize>,
        level: CompactionLevel,
    ) -> Vec<Message> {
        messages
            .iter()
            .enumerate()
            .map(|(i, msg)| {
                let cap = if preserved.contains(&i) {
                    level.preserved_tool_lines()
                } else {
                    level.dropped_tool_lines()
                };
                cap_tool_message(msg, cap)
            })
            .collect()
    }

    /// Summarize each run of consecutive non-preserved messages into one
    /// synthetic system message.  Returns `None` when any model call fails,
    /// so the caller falls back to truncation.
    async fn summarize(
        &self,
        messages: &[Message],
        preserved: &HashSet<usize>,
        level: CompactionLevel,
        model: &dyn ModelClient,
    ) -> Option<Vec<Message>> {
        let mut out: Vec<Message> = Vec::with_capacity(messages.len());
        let mut run: Vec<&Message> = Vec::new();

        for (i, msg) in messages.iter().enumerate() {
            if preserved.contains(&i) {
                if !run.is_empty() {
                    out.push(self.summarize_run(&run, model).await?);
                    run.clear();
                }
                out.push(cap_tool_message(msg, level.preserved_tool_lines()));
            } else {
                run.push(msg);
            }
        }
        if !run.is_empty() {
            out.push(self.summarize_run(&run, model).await?);
        }
        Some(out)
    }

    async fn summarize_run(&self, run: &[&Message], model: &dyn ModelClient) -> Option<Message> {
        let serialized = serialize_run(run);
        let req = ChatRequest {
            model: model.model_name().to_string(),
            messages: vec![
                Message::system(SUMMARIZE_PROMPT),
                Message::user(serialized),
            ],
            tools: vec![],
            temperature: 0.2,
        };
        let mut stream = match model.chat(req).await {
            Ok(s) => s,
            Err(e) => {
                warn!("compaction summary call failed: {e}");
                return None;
            }
        };
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(c) => {
                    if let Some(t) = c.content {
                        text.push_str(&t);
                    }
                    if c.done {
                        break;
                    }
                }
                Err(e) => {
                    warn!("compaction summary stream failed: {e}");
                    return None;
                }
            }
        }
        if text.trim().is_empty() {
            return None;
        }
        Some(Message::system(format!("{SUMMARY_MARKER}{}]", text.trim())))
    }
}

/// Serialize a run of messages for the summary prompt.
fn serialize_run(run: &[&Message]) -> String {
    run.iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "System",
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
            };
            let mut line = format!("{role}: {}", m.content);
            if let Some(calls) = &m.tool_calls {
                for c in calls {
                    line.push_str(&format!(" [called {}]", c.name));
                }
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cap a tool message's content at `max_lines`; other roles pass through.
fn cap_tool_message(msg: &Message, max_lines: usize) -> Message {
    if msg.role != Role::Tool {
        return msg.clone();
    }
    let lines: Vec<&str> = msg.content.lines().collect();
    if lines.len() <= max_lines {
        return msg.clone();
    }
    let kept = lines[..max_lines].join("\n");
    Message::tool(format!(
        "{kept}\n...[{} lines trimmed during compaction]",
        lines.len() - max_lines
    ))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
