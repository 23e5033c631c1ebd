// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in the conversation history.
///
/// `tool_calls` is only meaningful on assistant messages; its ordering within
/// one turn is significant and must be preserved end-to-end (executor results
/// are re-sorted to match it before entering the history).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRec>>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: text.into(), tool_calls: None }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: text.into(), tool_calls: None }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: text.into(), tool_calls: None }
    }

    /// An assistant turn that requests tool calls (content may be empty).
    pub fn assistant_with_calls(text: impl Into<String>, calls: Vec<ToolCallRec>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            tool_calls: if calls.is_empty() { None } else { Some(calls) },
        }
    }

    /// The formatted output of one tool invocation.
    pub fn tool(text: impl Into<String>) -> Self {
        Self { role: Role::Tool, content: text.into(), tool_calls: None }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Approximate token count used for context management.
    ///
    /// Uses a 4-chars-per-token heuristic; tool calls contribute their name
    /// and serialized arguments.  Tokenizer internals are out of scope.
    pub fn approx_tokens(&self) -> usize {
        let mut chars = self.content.len();
        if let Some(calls) = &self.tool_calls {
            for c in calls {
                chars += c.name.len();
                chars += Value::Object(c.arguments.clone()).to_string().len();
            }
        }
        (chars / 4).max(1)
    }
}

/// Sum of [`Message::approx_tokens`] over a buffer.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages.iter().map(Message::approx_tokens).sum()
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRec {
    pub name: String,
    /// Parsed JSON argument object
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCallRec {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self { name: name.into(), arguments }
    }

    /// Canonical JSON of the arguments: keys sorted, no whitespace.
    ///
    /// `serde_json::Map` preserves insertion order, so two calls with the
    /// same logical arguments in different key order would otherwise produce
    /// different signatures.
    pub fn canonical_args(&self) -> String {
        let mut pairs: Vec<(&String, &Value)> = self.arguments.iter().collect();
        pairs.sort_by_key(|(k, _)| k.as_str());
        let mut out = String::from("{");
        for (i, (k, v)) in pairs.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&Value::String((*k).clone()).to_string());
            out.push(':');
            out.push_str(&v.to_string());
        }
        out.push('}');
        out
    }
}

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: Value,
}

// ─── Streaming types ──────────────────────────────────────────────────────────

/// Request sent to the model host.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub temperature: f32,
}

/// One streamed chunk of a chat response.
///
/// The transport yields a sequence of these; the final chunk carries
/// `done = true`.  Tool calls may arrive in any chunk before the final one.
#[derive(Debug, Clone, Default)]
pub struct ChatChunk {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRec>,
    pub done: bool,
}

impl ChatChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), tool_calls: Vec::new(), done: false }
    }

    pub fn done() -> Self {
        Self { content: None, tool_calls: Vec::new(), done: true }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    // ── Message construction ──────────────────────────────────────────────────

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::user("u").role, Role::User);
        assert_eq!(Message::assistant("a").role, Role::Assistant);
        assert_eq!(Message::tool("t").role, Role::Tool);
    }

    #[test]
    fn assistant_with_empty_calls_has_none() {
        let m = Message::assistant_with_calls("hi", vec![]);
        assert!(m.tool_calls.is_none());
        assert!(!m.has_tool_calls());
    }

    #[test]
    fn assistant_with_calls_preserves_order() {
        let m = Message::assistant_with_calls(
            "",
            vec![
                ToolCallRec::new("read_file", args(json!({"path": "a"}))),
                ToolCallRec::new("glob", args(json!({"pattern": "*.rs"}))),
            ],
        );
        let calls = m.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[1].name, "glob");
    }

    // ── Token approximation ───────────────────────────────────────────────────

    #[test]
    fn approx_tokens_divides_by_four() {
        assert_eq!(Message::user("12345678").approx_tokens(), 2);
    }

    #[test]
    fn approx_tokens_minimum_is_one() {
        assert_eq!(Message::user("").approx_tokens(), 1);
    }

    #[test]
    fn approx_tokens_counts_tool_call_arguments() {
        let plain = Message::assistant("x").approx_tokens();
        let with_call = Message::assistant_with_calls(
            "x",
            vec![ToolCallRec::new(
                "grep",
                args(json!({"pattern": "a fairly long search pattern"})),
            )],
        )
        .approx_tokens();
        assert!(with_call > plain);
    }

    #[test]
    fn estimate_tokens_sums_buffer() {
        let msgs = vec![Message::user("12345678"), Message::assistant("abcd")];
        assert_eq!(estimate_tokens(&msgs), 3);
    }

    // ── Canonical arguments ───────────────────────────────────────────────────

    #[test]
    fn canonical_args_sorts_keys() {
        let a = ToolCallRec::new("t", args(json!({"b": 2, "a": 1})));
        let b = ToolCallRec::new("t", args(json!({"a": 1, "b": 2})));
        assert_eq!(a.canonical_args(), b.canonical_args());
        assert_eq!(a.canonical_args(), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn canonical_args_empty_object() {
        let c = ToolCallRec::new("t", Map::new());
        assert_eq!(c.canonical_args(), "{}");
    }

    // ── Serialisation ─────────────────────────────────────────────────────────

    #[test]
    fn message_round_trips_through_json() {
        let m = Message::assistant_with_calls(
            "calling",
            vec![ToolCallRec::new("read_file", args(json!({"path": "x"})))],
        );
        let text = serde_json::to_string(&m).unwrap();
        let back: Message = serde_json::from_str(&text).unwrap();
        assert_eq!(back.role, Role::Assistant);
        assert_eq!(back.tool_calls.unwrap()[0].name, "read_file");
    }

    #[test]
    fn plain_message_omits_tool_calls_field() {
        let text = serde_json::to_string(&Message::user("hi")).unwrap();
        assert!(!text.contains("tool_calls"), "{text}");
    }
}
