// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::tool::{RiskLevel, Tool, ToolCall, ToolContext, ToolOutput};

/// Directories never descended into.
const EXCLUDED_DIRS: &[&str] = &["node_modules", ".git", "dist", "build", ".next", ".cache"];

/// Matched line content is trimmed and cut at this many characters.
const MAX_CONTENT_CHARS: usize = 200;

/// Hard cap on returned matches.
const MAX_MATCHES: usize = 200;

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a case-insensitive regex. Returns file, 1-based\n\
         line number, and the matching line (trimmed, max 200 chars). filePattern\n\
         narrows which files are searched (glob, e.g. '*.rs'). Unreadable and binary\n\
         files are skipped silently."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for (case-insensitive)"
                },
                "filePattern": {
                    "type": "string",
                    "description": "Glob filter for file names, e.g. '*.ts'"
                },
                "cwd": {
                    "type": "string",
                    "description": "Directory to search from, relative to the project root (default '.')"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::Safe
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext, _cancel: &CancelToken) -> ToolOutput {
        let pattern = match call.args.get("pattern").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(call.index, "missing required parameter 'pattern'"),
        };
        let file_pattern = call
            .args
            .get("filePattern")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let cwd = call
            .args
            .get("cwd")
            .and_then(|v| v.as_str())
            .unwrap_or(".")
            .to_string();

        debug!(pattern = %pattern, file_pattern = ?file_pattern, cwd = %cwd, "grep tool");

        let re = match RegexBuilder::new(&pattern).case_insensitive(true).build() {
            Ok(re) => re,
            Err(e) => return ToolOutput::err(call.index, format!("invalid pattern: {e}")),
        };
        let file_re = match &file_pattern {
            Some(fp) => match file_glob_to_regex(fp) {
                Some(re) => Some(re),
                None => {
                    return ToolOutput::err(call.index, format!("invalid filePattern: {fp}"))
                }
            },
            None => None,
        };

        let root = ctx.project_root.join(&cwd);
        let result = tokio::task::spawn_blocking(move || {
            let mut lines: Vec<String> = Vec::new();
            let walker = WalkDir::new(&root)
                .into_iter()
                .filter_entry(|e| !EXCLUDED_DIRS.contains(&e.file_name().to_string_lossy().as_ref()));
            'files: for entry in walker.flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(fre) = &file_re {
                    let name = entry.file_name().to_string_lossy();
                    if !fre.is_match(&name) {
                        continue;
                    }
                }
                // Unreadable or non-UTF-8 files are skipped, not reported.
                let Ok(text) = std::fs::read_to_string(entry.path()) else {
                    continue;
                };
                let rel = entry
                    .path()
                    .strip_prefix(&root)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .replace('\\', "/");
                for (i, line) in text.lines().enumerate() {
                    if re.is_match(line) {
                        let mut content = line.trim().to_string();
                        if content.chars().count() > MAX_CONTENT_CHARS {
                            content = content.chars().take(MAX_CONTENT_CHARS).collect();
                        }
                        lines.push(format!("{rel}:{}:{content}", i + 1));
                        if lines.len() >= MAX_MATCHES {
                            break 'files;
                        }
                    }
                }
            }
            lines
        })
        .await;

        match result {
            Ok(lines) if lines.is_empty() => ToolOutput::ok(call.index, "(no matches)"),
            Ok(mut lines) => {
                if lines.len() >= MAX_MATCHES {
                    lines.push(
                        "...[match cap reached; narrow with filePattern or a more specific pattern]"
                            .to_string(),
                    );
                }
                ToolOutput::ok(call.index, lines.join("\n"))
            }
            Err(e) => ToolOutput::err(call.index, format!("grep failed: {e}")),
        }
    }
}

/// File-name glob (`*`, `?`) to anchored regex.
fn file_glob_to_regex(pattern: &str) -> Option<regex::Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    regex::Regex::new(&re).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
