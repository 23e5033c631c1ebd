// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::tool::{RiskLevel, Tool, ToolCall, ToolContext, ToolOutput};

/// Directories never descended into, regardless of the pattern.
const EXCLUDED_DIRS: &[&str] = &["node_modules", ".git", "dist", "build", ".next", ".cache"];

/// Hard cap on returned paths.
const MAX_RESULTS: usize = 500;

pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files by glob pattern. `*` matches within a path segment, `**` across\n\
         segments, `?` one character. A pattern without `/` matches file names at any\n\
         depth. node_modules, .git, dist, build, .next and .cache are always excluded.\n\
         Returns sorted paths relative to cwd."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern, e.g. '*.ts' or 'src/**/*.rs'"
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
        let cwd = call
            .args
            .get("cwd")
            .and_then(|v| v.as_str())
            .unwrap_or(".")
            .to_string();

        debug!(pattern = %pattern, cwd = %cwd, "glob tool");

        let re = match glob_to_regex(&pattern) {
            Some(re) => re,
            None => return ToolOutput::err(call.index, format!("invalid glob pattern: {pattern}")),
        };
        let name_only = !pattern.contains('/');

        let root = ctx.project_root.join(&cwd);
        let root_clone = root.clone();
        let matches = tokio::task::spawn_blocking(move || {
            let mut found: Vec<String> = Vec::new();
            let walker = WalkDir::new(&root_clone)
                .into_iter()
                .filter_entry(|e| !is_excluded(e.file_name().to_string_lossy().as_ref()));
            for entry in walker.flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(&root_clone)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .replace('\\', "/");
                let candidate = if name_only {
                    entry.file_name().to_string_lossy().into_owned()
                } else {
                    rel.clone()
                };
                if re.is_match(&candidate) {
                    found.push(rel);
                    if found.len() >= MAX_RESULTS {
                        break;
                    }
                }
            }
            found.sort();
            found
        })
        .await;

        match matches {
            Ok(found) if found.is_empty() => ToolOutput::ok(call.index, "(no matches)"),
            Ok(found) => ToolOutput::ok(call.index, found.join("\n")),
            Err(e) => ToolOutput::err(call.index, format!("glob failed: {e}")),
        }
    }
}

fn is_excluded(name: &str) -> bool {
    EXCLUDED_DIRS.contains(&name)
}

/// Convert a glob pattern to an anchored [`Regex`].
///
/// `**` matches across path segments, `*` within one segment, `?` a single
/// non-separator character.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // Swallow a following '/' so "src/**/*.rs" also matches
                    // files directly under src/.
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(?:.*/)?");
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
