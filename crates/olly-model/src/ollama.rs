// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Streaming driver for the Ollama chat API.
//!
//! Two endpoints are used:
//! - `POST /api/chat`: streaming chat completion returning NDJSON chunks
//!   (`{"message": {"content", "tool_calls"}, "done"}` per line).
//! - `POST /api/show`: model introspection; the context window is read from
//!   `model_info["{family}.context_length"]`.
//!
//! Authentication is optional: when an API key is configured (OLLAMA_API_KEY
//! or config) it is sent as a bearer token, which covers Ollama instances
//! behind an authenticating proxy.  A plain local install needs none.

use anyhow::{bail, Context};
use futures::StreamExt;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::{
    client::{ChunkStream, ModelClient},
    ChatChunk, ChatRequest, Message, Role, ToolCallRec,
};

pub struct OllamaClient {
    host: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(host: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        let host = host.into();
        Self {
            host: host.trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.post(format!("{}{path}", self.host));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }
}

#[async_trait::async_trait]
impl ModelClient for OllamaClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChunkStream> {
        let body = json!({
            "model": req.model,
            "messages": req.messages.iter().map(message_to_wire).collect::<Vec<_>>(),
            "tools": req.tools.iter().map(|t| json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                },
            })).collect::<Vec<_>>(),
            "stream": true,
            "options": { "temperature": req.temperature },
        });

        debug!(
            model = %req.model,
            message_count = req.messages.len(),
            tool_count = req.tools.len(),
            "sending chat request"
        );

        let resp = self
            .post("/api/chat")
            .json(&body)
            .send()
            .await
            .context("ollama chat request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("ollama error {status}: {text}");
        }

        // NDJSON chunks can be split across TCP packets.  Maintain a line
        // buffer across chunks; emit a ChatChunk only for complete lines.
        let byte_stream = resp.bytes_stream();
        let chunk_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let out: Vec<anyhow::Result<ChatChunk>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_lines(buf)
                    }
                    Err(e) => vec![Err(anyhow::anyhow!(e))],
                };
                std::future::ready(Some(out))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(chunk_stream))
    }

    async fn context_window(&self) -> anyhow::Result<u32> {
        let resp = self
            .post("/api/show")
            .json(&json!({ "model": self.model }))
            .send()
            .await
            .context("ollama show request failed")?;

        if !resp.status().is_success() {
            bail!("ollama show error {}", resp.status());
        }

        let body: Value = resp.json().await.context("parsing show response")?;
        match extract_context_length(&body) {
            Some(n) => Ok(n),
            None => bail!("model_info has no context_length field"),
        }
    }
}

// ─── Wire conversion ──────────────────────────────────────────────────────────

/// Serialize one message into Ollama's chat wire format.
///
/// Assistant tool calls nest under `tool_calls[].function`; all other roles
/// carry only `role` + `content`.
fn message_to_wire(msg: &Message) -> Value {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let mut obj = Map::new();
    obj.insert("role".into(), json!(role));
    obj.insert("content".into(), json!(msg.content));
    if let Some(calls) = &msg.tool_calls {
        if !calls.is_empty() {
            let wire_calls: Vec<Value> = calls
                .iter()
                .map(|c| {
                    json!({
                        "function": {
                            "name": c.name,
                            "arguments": c.arguments,
                        }
                    })
                })
                .collect();
            obj.insert("tool_calls".into(), Value::Array(wire_calls));
        }
    }
    Value::Object(obj)
}

/// Drain all complete `\n`-terminated NDJSON lines from `buf`.
///
/// Any trailing incomplete line is left in `buf` so it can be extended by
/// the next TCP chunk.
pub(crate) fn drain_complete_lines(buf: &mut String) -> Vec<anyhow::Result<ChatChunk>> {
    let mut chunks = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if line.trim().is_empty() {
            continue;
        }
        chunks.push(parse_chunk_line(&line));
    }
    chunks
}

fn parse_chunk_line(line: &str) -> anyhow::Result<ChatChunk> {
    let v: Value = serde_json::from_str(line)
        .with_context(|| format!("malformed stream chunk: {line}"))?;

    // Mid-stream error object: {"error": "..."}
    if let Some(err) = v.get("error").and_then(|e| e.as_str()) {
        bail!("ollama stream error: {err}");
    }

    let done = v.get("done").and_then(|d| d.as_bool()).unwrap_or(false);
    let message = v.get("message");

    let content = message
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    let mut tool_calls = Vec::new();
    if let Some(calls) = message
        .and_then(|m| m.get("tool_calls"))
        .and_then(|t| t.as_array())
    {
        for call in calls {
            let function = &call["function"];
            let name = function["name"].as_str().unwrap_or_default().to_string();
            if name.is_empty() {
                // A call with no name cannot be dispatched; storing it would
                // corrupt the history sent back on the next turn.
                warn!("dropping tool call with empty name from model");
                continue;
            }
            let arguments = match &function["arguments"] {
                Value::Object(map) => map.clone(),
                // Some models emit arguments as a JSON-encoded string.
                Value::String(s) => serde_json::from_str::<Value>(s)
                    .ok()
                    .and_then(|v| v.as_object().cloned())
                    .unwrap_or_default(),
                _ => Map::new(),
            };
            tool_calls.push(ToolCallRec { name, arguments });
        }
    }

    Ok(ChatChunk { content, tool_calls, done })
}

/// Find `model_info["{family}.context_length"]`.
///
/// The key is family-prefixed (`llama.context_length`,
/// `qwen2.context_length`, …), so scan for the suffix rather than probing a
/// fixed family name.
fn extract_context_length(body: &Value) -> Option<u32> {
    let info = body.get("model_info")?.as_object()?;
    info.iter()
        .find(|(k, _)| k.ends_with(".context_length"))
        .and_then(|(_, v)| v.as_u64())
        .map(|n| n as u32)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    // ── Wire serialisation ────────────────────────────────────────────────────

    #[test]
    fn user_message_serialises_role_and_content() {
        let wire = message_to_wire(&Message::user("hello"));
        assert_eq!(wire["role"], "user");
        assert_eq!(wire["content"], "hello");
        assert!(wire.get("tool_calls").is_none());
    }

    #[test]
    fn assistant_tool_calls_nest_under_function() {
        let msg = Message::assistant_with_calls(
            "",
            vec![ToolCallRec::new("read_file", args(json!({"path": "src/main.rs"})))],
        );
        let wire = message_to_wire(&msg);
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "read_file");
        assert_eq!(
            wire["tool_calls"][0]["function"]["arguments"]["path"],
            "src/main.rs"
        );
    }

    #[test]
    fn tool_call_order_is_preserved_on_the_wire() {
        let msg = Message::assistant_with_calls(
            "",
            vec![
                ToolCallRec::new("a", Map::new()),
                ToolCallRec::new("b", Map::new()),
                ToolCallRec::new("c", Map::new()),
            ],
        );
        let wire = message_to_wire(&msg);
        let names: Vec<&str> = wire["tool_calls"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["function"]["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    // ── Chunk parsing ─────────────────────────────────────────────────────────

    #[test]
    fn parses_content_chunk() {
        let chunk = parse_chunk_line(
            r#"{"model":"llama3.2","message":{"role":"assistant","content":"Hi"},"done":false}"#,
        )
        .unwrap();
        assert_eq!(chunk.content.as_deref(), Some("Hi"));
        assert!(!chunk.done);
        assert!(chunk.tool_calls.is_empty());
    }

    #[test]
    fn parses_done_chunk() {
        let chunk = parse_chunk_line(r#"{"model":"llama3.2","done":true}"#).unwrap();
        assert!(chunk.done);
        assert!(chunk.content.is_none());
    }

    #[test]
    fn parses_tool_call_chunk() {
        let chunk = parse_chunk_line(
            r#"{"message":{"role":"assistant","content":"","tool_calls":[{"function":{"name":"grep","arguments":{"pattern":"foo"}}}]},"done":false}"#,
        )
        .unwrap();
        assert_eq!(chunk.tool_calls.len(), 1);
        assert_eq!(chunk.tool_calls[0].name, "grep");
        assert_eq!(chunk.tool_calls[0].arguments["pattern"], "foo");
    }

    #[test]
    fn string_encoded_arguments_are_parsed() {
        let chunk = parse_chunk_line(
            r#"{"message":{"tool_calls":[{"function":{"name":"glob","arguments":"{\"pattern\":\"*.rs\"}"}}]},"done":false}"#,
        )
        .unwrap();
        assert_eq!(chunk.tool_calls[0].arguments["pattern"], "*.rs");
    }

    #[test]
    fn empty_tool_name_is_dropped() {
        let chunk = parse_chunk_line(
            r#"{"message":{"tool_calls":[{"function":{"name":"","arguments":{}}}]},"done":false}"#,
        )
        .unwrap();
        assert!(chunk.tool_calls.is_empty());
    }

    #[test]
    fn error_chunk_is_an_error() {
        let out = parse_chunk_line(r#"{"error":"model not found"}"#);
        assert!(out.is_err());
        assert!(out.unwrap_err().to_string().contains("model not found"));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_chunk_line("{not json").is_err());
    }

    // ── Line buffering ────────────────────────────────────────────────────────

    #[test]
    fn drain_leaves_incomplete_line_in_buffer() {
        let mut buf = String::from(
            "{\"message\":{\"content\":\"a\"},\"done\":false}\n{\"message\":{\"cont",
        );
        let chunks = drain_complete_lines(&mut buf);
        assert_eq!(chunks.len(), 1);
        assert_eq!(buf, "{\"message\":{\"cont");
    }

    #[test]
    fn drain_handles_multiple_lines_in_one_packet() {
        let mut buf = String::from(
            "{\"message\":{\"content\":\"a\"},\"done\":false}\n{\"done\":true}\n",
        );
        let chunks = drain_complete_lines(&mut buf);
        assert_eq!(chunks.len(), 2);
        assert!(buf.is_empty());
        assert!(chunks[1].as_ref().unwrap().done);
    }

    #[test]
    fn drain_skips_blank_lines() {
        let mut buf = String::from("\n\n{\"done\":true}\n");
        let chunks = drain_complete_lines(&mut buf);
        assert_eq!(chunks.len(), 1);
    }

    // ── Context window extraction ─────────────────────────────────────────────

    #[test]
    fn context_length_found_under_family_prefix() {
        let body = json!({
            "details": {"family": "llama"},
            "model_info": {
                "general.architecture": "llama",
                "llama.context_length": 131072,
                "llama.embedding_length": 4096
            }
        });
        assert_eq!(extract_context_length(&body), Some(131_072));
    }

    #[test]
    fn context_length_missing_yields_none() {
        let body = json!({"model_info": {"general.architecture": "llama"}});
        assert_eq!(extract_context_length(&body), None);
        assert_eq!(extract_context_length(&json!({})), None);
    }

    #[test]
    fn host_trailing_slash_is_trimmed() {
        let c = OllamaClient::new("http://127.0.0.1:11434/", "llama3.2:latest", None);
        assert_eq!(c.host, "http://127.0.0.1:11434");
        assert_eq!(c.model_name(), "llama3.2:latest");
    }
}
