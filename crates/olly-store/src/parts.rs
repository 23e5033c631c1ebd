// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Stored message encoding.
//!
//! Each persisted message carries an ordered list of parts.  The encoding is
//! deterministic and round-trip preserving for everything the model itself
//! produced: `to_wire(from_wire(msg)) == msg` up to fields the wire format
//! does not carry (the tool name on a tool-result message).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use olly_model::{Message, Role, ToolCallRec};

/// One part of a stored message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        content: String,
    },
    ToolCall {
        name: String,
        args: Map<String, Value>,
    },
    ToolResult {
        name: String,
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// A message as persisted in the `messages` table: role + ordered parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub parts: Vec<MessagePart>,
}

impl StoredMessage {
    /// Encode a wire message into parts.
    pub fn from_wire(msg: &Message) -> Self {
        let mut parts = Vec::new();
        match msg.role {
            Role::Tool => {
                // The wire format does not carry the tool name on results;
                // it is stored empty and dropped again on the way back out.
                parts.push(MessagePart::ToolResult {
                    name: String::new(),
                    output: msg.content.clone(),
                    error: None,
                });
            }
            _ => {
                if !msg.content.is_empty() || !msg.has_tool_calls() {
                    parts.push(MessagePart::Text { content: msg.content.clone() });
                }
                if let Some(calls) = &msg.tool_calls {
                    for c in calls {
                        parts.push(MessagePart::ToolCall {
                            name: c.name.clone(),
                            args: c.arguments.clone(),
                        });
                    }
                }
            }
        }
        Self { role: msg.role, parts }
    }

    /// Decode back into the wire format.
    pub fn to_wire(&self) -> Message {
        let mut content = String::new();
        let mut calls: Vec<ToolCallRec> = Vec::new();
        for part in &self.parts {
            match part {
                MessagePart::Text { content: c } => content.push_str(c),
                MessagePart::ToolCall { name, args } => {
                    calls.push(ToolCallRec::new(name.clone(), args.clone()));
                }
                MessagePart::ToolResult { output, error, .. } => {
                    // A stored error renders the same way the executor
                    // formatted it when the message was first produced.
                    match error {
                        Some(e) => content.push_str(e),
                        None => content.push_str(output),
                    }
                }
            }
        }
        match self.role {
            Role::Tool => Message::tool(content),
            Role::Assistant => Message::assistant_with_calls(content, calls),
            Role::User => Message::user(content),
            Role::System => Message::system(content),
        }
    }
}

/// Encode a whole buffer.
pub fn encode_all(messages: &[Message]) -> Vec<StoredMessage> {
    messages.iter().map(StoredMessage::from_wire).collect()
}

/// Decode a whole buffer.
pub fn decode_all(stored: &[StoredMessage]) -> Vec<Message> {
    stored.iter().map(StoredMessage::to_wire).collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn text_message_round_trips() {
        let msg = Message::user("hello there");
        let back = StoredMessage::from_wire(&msg).to_wire();
        assert_eq!(back.role, Role::User);
        assert_eq!(back.content, "hello there");
        assert!(back.tool_calls.is_none());
    }

    #[test]
    fn assistant_with_calls_round_trips_in_order() {
        let msg = Message::assistant_with_calls(
            "let me check",
            vec![
                ToolCallRec::new("read_file", args(json!({"path": "a.rs"}))),
                ToolCallRec::new("grep", args(json!({"pattern": "fn main"}))),
            ],
        );
        let back = StoredMessage::from_wire(&msg).to_wire();
        assert_eq!(back.content, "let me check");
        let calls = back.tool_calls.unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[1].name, "grep");
        assert_eq!(calls[1].arguments["pattern"], "fn main");
    }

    #[test]
    fn tool_message_becomes_tool_result_part() {
        let stored = StoredMessage::from_wire(&Message::tool("file contents"));
        assert_eq!(stored.parts.len(), 1);
        assert!(matches!(
            &stored.parts[0],
            MessagePart::ToolResult { output, .. } if output == "file contents"
        ));
        assert_eq!(stored.to_wire().content, "file contents");
    }

    #[test]
    fn buffer_round_trip_is_identity_for_agent_output() {
        let msgs = vec![
            Message::system("you are olly"),
            Message::user("list files"),
            Message::assistant_with_calls(
                "",
                vec![ToolCallRec::new("list_dir", args(json!({"path": "."})))],
            ),
            Message::tool("a.rs\nb.rs"),
            Message::assistant("there are two files"),
        ];
        let decoded = decode_all(&encode_all(&msgs));
        assert_eq!(decoded.len(), msgs.len());
        for (orig, back) in msgs.iter().zip(&decoded) {
            assert_eq!(orig.role, back.role);
            assert_eq!(orig.content, back.content);
            assert_eq!(
                orig.tool_calls.as_ref().map(Vec::len).unwrap_or(0),
                back.tool_calls.as_ref().map(Vec::len).unwrap_or(0)
            );
        }
    }

    #[test]
    fn part_json_uses_snake_case_tags() {
        let stored = StoredMessage::from_wire(&Message::assistant_with_calls(
            "",
            vec![ToolCallRec::new("glob", Map::new())],
        ));
        let text = serde_json::to_string(&stored.parts).unwrap();
        assert!(text.contains(r#""type":"tool_call""#), "{text}");
    }

    #[test]
    fn encoding_is_deterministic() {
        let msg = Message::assistant_with_calls(
            "x",
            vec![ToolCallRec::new("t", args(json!({"a": 1, "b": 2})))],
        );
        let a = serde_json::to_string(&StoredMessage::from_wire(&msg)).unwrap();
        let b = serde_json::to_string(&StoredMessage::from_wire(&msg)).unwrap();
        assert_eq!(a, b);
    }
}
