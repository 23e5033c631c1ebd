// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use olly_config::AgentMode;

use crate::cancel::CancelToken;
use crate::tool::{RiskLevel, Tool, ToolCall, ToolContext, ToolOutput};

pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace one occurrence of oldString with newString in a file.\n\
         oldString must match the file content EXACTLY ONCE — include enough\n\
         surrounding lines to make it unique. If it matches zero or multiple\n\
         times the edit is rejected and nothing is written.\n\
         Re-read the file after any previous edit before building a new oldString."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the project root"
                },
                "oldString": {
                    "type": "string",
                    "description": "Exact text to replace; must occur exactly once"
                },
                "newString": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "oldString", "newString"],
            "additionalProperties": false
        })
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::Medium
    }

    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Build]
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext, _cancel: &CancelToken) -> ToolOutput {
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(call.index, "missing required parameter 'path'"),
        };
        let old = match call.args.get("oldString").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return ToolOutput::err(call.index, "missing required parameter 'oldString'"),
        };
        let new = match call.args.get("newString").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return ToolOutput::err(call.index, "missing required parameter 'newString'"),
        };

        debug!(path = %path, "edit_file tool");

        if old.is_empty() {
            return ToolOutput::err(call.index, "oldString must not be empty");
        }

        let resolved = ctx.project_root.join(&path);
        let content = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(call.index, format!("read error: {e}")),
        };

        let occurrences = content.matches(&old).count();
        if occurrences != 1 {
            return ToolOutput::err(
                call.index,
                format!(
                    "String found {occurrences} times — oldString must match exactly once. \
                     Add surrounding lines to make it unique."
                ),
            );
        }

        let updated = content.replacen(&old, &new, 1);
        match tokio::fs::write(&resolved, updated.as_bytes()).await {
            Ok(_) => ToolOutput::ok(call.index, format!("Edited {path}")),
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

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall::new(0, "edit_file", args)
    }

    #[tokio::test]
    async fn replaces_unique_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.rs"), "fn foo() {\n    old();\n}\n").unwrap();
        let out = EditFileTool
            .execute(
                &call(json!({"path": "f.rs", "oldString": "old();", "newString": "new();"})),
                &ctx(dir.path()),
                &CancelToken::new(),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        let result = std::fs::read_to_string(dir.path().join("f.rs")).unwrap();
        assert!(result.contains("new();"));
        assert!(!result.contains("old();"));
    }

    #[tokio::test]
    async fn duplicate_occurrence_is_rejected_with_count() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.rs"), "x();\nx();\n").unwrap();
        let out = EditFileTool
            .execute(
                &call(json!({"path": "f.rs", "oldString": "x();", "newString": "y();"})),
                &ctx(dir.path()),
                &CancelToken::new(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("String found 2 times"), "{}", out.content);
        // File must be untouched.
        assert_eq!(
            std::fs::read_to_string(dir.path().join("f.rs")).unwrap(),
            "x();\nx();\n"
        );
    }

    #[tokio::test]
    async fn zero_occurrences_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.rs"), "something else\n").unwrap();
        let out = EditFileTool
            .execute(
                &call(json!({"path": "f.rs", "oldString": "absent", "newString": "x"})),
                &ctx(dir.path()),
                &CancelToken::new(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("String found 0 times"), "{}", out.content);
    }

    #[tokio::test]
    async fn multi_line_old_string_works() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.rs"), "a\nb\nc\nd\n").unwrap();
        let out = EditFileTool
            .execute(
                &call(json!({"path": "f.rs", "oldString": "b\nc\n", "newString": "B\nC\n"})),
                &ctx(dir.path()),
                &CancelToken::new(),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("f.rs")).unwrap(),
            "a\nB\nC\nd\n"
        );
    }

    #[tokio::test]
    async fn empty_old_string_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.rs"), "content\n").unwrap();
        let out = EditFileTool
            .execute(
                &call(json!({"path": "f.rs", "oldString": "", "newString": "x"})),
                &ctx(dir.path()),
                &CancelToken::new(),
            )
            .await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = EditFileTool
            .execute(
                &call(json!({"path": "ghost.rs", "oldString": "a", "newString": "b"})),
                &ctx(dir.path()),
                &CancelToken::new(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("read error"));
    }

    #[test]
    fn declared_risk_is_medium_and_build_only() {
        assert_eq!(EditFileTool.risk(), RiskLevel::Medium);
        assert_eq!(EditFileTool.modes(), &[AgentMode::Build]);
    }
}
