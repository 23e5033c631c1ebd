// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::tool::{RiskLevel, Tool, ToolCall, ToolContext, ToolOutput};

/// Default number of lines returned when the caller does not specify a limit.
const DEFAULT_LINE_LIMIT: usize = 2000;

/// Any single line longer than this is cut and marked with an ellipsis.
/// Minified bundles and generated files can put megabytes on one line.
const MAX_LINE_CHARS: usize = 2000;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file. Returns the requested line slice with line numbers\n\
         (`   42|code`). Default: 2000 lines from the top; use offset (1-indexed) and\n\
         limit to paginate. Single lines longer than 2000 chars are cut with an ellipsis.\n\
         Strategy: grep to find the relevant region first, then read only those lines."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the project root"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-indexed line number to start reading from (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default 2000)"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::Safe
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext, _cancel: &CancelToken) -> ToolOutput {
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(call.index, "missing required parameter 'path'"),
        };
        let offset = call.args.get("offset").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
        let limit = call
            .args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LINE_LIMIT as u64) as usize;

        debug!(path = %path, offset, limit, "read_file tool");

        let resolved = ctx.project_root.join(&path);
        let text = match tokio::fs::read_to_string(&resolved).await {
            Ok(t) => t,
            Err(e) => return ToolOutput::err(call.index, format!("read error: {e}")),
        };

        let all_lines: Vec<&str> = text.lines().collect();
        let total = all_lines.len();
        let start = offset.saturating_sub(1);

        // Width of the largest line number shown, for right-padded numbering.
        let end = (start + limit).min(total);
        let width = end.max(1).to_string().len().max(4);

        let mut body = String::new();
        for (i, line) in all_lines.iter().enumerate().skip(start).take(limit) {
            let shown: String = if line.chars().count() > MAX_LINE_CHARS {
                let cut: String = line.chars().take(MAX_LINE_CHARS).collect();
                format!("{cut}…")
            } else {
                (*line).to_string()
            };
            body.push_str(&format!("{:>width$}|{}\n", i + 1, shown, width = width));
        }

        let mut content = format!("<file path=\"{path}\">\n{body}</file>");
        if end < total {
            content.push_str(&format!(
                "\n(File has {total} total lines; showing {}-{}. Use offset={} to continue.)",
                start + 1,
                end,
                end + 1
            ));
        }

        ToolOutput::ok(call.index, content)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
