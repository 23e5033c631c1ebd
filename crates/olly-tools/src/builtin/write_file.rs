// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use olly_config::AgentMode;

use crate::cancel::CancelToken;
use crate::tool::{RiskLevel, Tool, ToolCall, ToolContext, ToolOutput};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed. Overwrites\n\
         the file if it exists — prefer edit_file for targeted changes to an\n\
         existing file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the project root"
                },
                "content": {
                    "type": "string",
                    "description": "Full new content of the file"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::Prompt
    }

    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Build]
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext, _cancel: &CancelToken) -> ToolOutput {
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(call.index, "missing required parameter 'path'"),
        };
        let content = match call.args.get("content").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(call.index, "missing required parameter 'content'"),
        };

        debug!(path = %path, bytes = content.len(), "write_file tool");

        let resolved = ctx.project_root.join(&path);
        if let Some(parent) = resolved.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return ToolOutput::err(call.index, format!("cannot create {}: {e}", path));
                }
            }
        }

        match tokio::fs::write(&resolved, content.as_bytes()).await {
            Ok(_) => ToolOutput::ok(
                call.index,
                format!("Wrote {} bytes to {path}", content.len()),
            ),
            Err(e) => ToolOutput::err(call.index, format!("write error: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tool::ToolContext;

    fn ctx(root: &std::path::Path) -> ToolContext {
        ToolContext { project_root: root.to_path_buf(), ..Default::default() }
    }

    #[tokio::test]
    async fn writes_file_and_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let out = WriteFileTool
            .execute(
                &ToolCall::new(0, "write_file", json!({"path": "a/b/c.txt", "content": "hello"})),
                &ctx(dir.path()),
                &CancelToken::new(),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a/b/c.txt")).unwrap(),
            "hello"
        );
    }

    #[tokio::test]
    async fn reports_byte_count() {
        let dir = tempfile::tempdir().unwrap();
        let out = WriteFileTool
            .execute(
                &ToolCall::new(0, "write_file", json!({"path": "x.txt", "content": "12345"})),
                &ctx(dir.path()),
                &CancelToken::new(),
            )
            .await;
        assert!(out.content.contains("5 bytes"));
    }

    #[tokio::test]
    async fn missing_content_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = WriteFileTool
            .execute(
                &ToolCall::new(0, "write_file", json!({"path": "x.txt"})),
                &ctx(dir.path()),
                &CancelToken::new(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("'content'"));
    }

    #[test]
    fn build_mode_only() {
        assert_eq!(WriteFileTool.modes(), &[AgentMode::Build]);
        assert_eq!(WriteFileTool.risk(), RiskLevel::Prompt);
    }
}
