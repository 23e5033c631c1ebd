// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::tool::{RiskLevel, Tool, ToolCall, ToolContext, ToolOutput};

/// Per-stream character cap applied to stdout and stderr independently.
const STREAM_LIMIT_CHARS: usize = 10_000;

/// Default timeout when the call does not specify one.
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

pub struct RunCommandTool;

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout, stderr, and the exit code.\n\
         Runs under `bash -c` in the project root (or cwd if given). Default\n\
         timeout 30s; each stream is truncated to 10000 chars.\n\
         Prefer non-interactive commands; avoid anything that needs a TTY.\n\
         Do NOT use this for file operations — use read_file / grep / glob /\n\
         edit_file instead."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute (bash one-liner)"
                },
                "cwd": {
                    "type": "string",
                    "description": "Working directory, relative to the project root (default '.')"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in milliseconds (default 30000)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "stdout": { "type": "string" },
                "stderr": { "type": "string" },
                "exit_code": { "type": "integer" }
            }
        })
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::Prompt
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext, cancel: &CancelToken) -> ToolOutput {
        let command = match call.args.get("command").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(call.index, "missing required parameter 'command'"),
        };
        let cwd = call
            .args
            .get("cwd")
            .and_then(|v| v.as_str())
            .unwrap_or(".")
            .to_string();
        let timeout_ms = call
            .args
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        debug!(cmd = %command, cwd = %cwd, timeout_ms, "run_command tool");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&command);
        cmd.current_dir(ctx.project_root.join(&cwd));
        // `stdin(Stdio::null())` keeps the subprocess away from the hosting
        // terminal; `kill_on_drop(true)` guarantees that when the timeout or
        // cancellation branch drops the wait future, the child receives
        // SIGKILL and is reaped rather than left as a zombie.
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        // setsid() detaches the child from the controlling terminal so it
        // cannot open /dev/tty behind our backs.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        // The raw process environment is never inherited verbatim:
        // credential-bearing variables are scrubbed first.
        cmd.env_clear();
        for (name, value) in olly_safety::sanitized_env() {
            cmd.env(name, value);
        }

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(call.index, format!("spawn error: {e}")),
        };

        let timeout = std::time::Duration::from_millis(timeout_ms);
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // Dropping the wait future kills and reaps the child.
                return ToolOutput::err(call.index, "command cancelled");
            }
            _ = tokio::time::sleep(timeout) => {
                return ToolOutput::err(call.index, format!("timeout after {timeout_ms}ms"));
            }
            out = child.wait_with_output() => out,
        };

        match output {
            Ok(output) => {
                let stdout = truncate_stream(&String::from_utf8_lossy(&output.stdout));
                let stderr = truncate_stream(&String::from_utf8_lossy(&output.stderr));
                let code = output.status.code().unwrap_or(-1);

                let mut content = format!("[exit {code}]");
                if !stdout.is_empty() {
                    content.push('\n');
                    content.push_str(&stdout);
                }
                if !stderr.is_empty() {
                    content.push_str("\n[stderr]\n");
                    content.push_str(&stderr);
                }

                if code == 0 {
                    ToolOutput::ok(call.index, content)
                } else {
                    ToolOutput::err(call.index, content)
                }
            }
            Err(e) => ToolOutput::err(call.index, format!("wait error: {e}")),
        }
    }
}

fn truncate_stream(s: &str) -> String {
    if s.chars().count() <= STREAM_LIMIT_CHARS {
        return s.to_string();
    }
    let kept: String = s.chars().take(STREAM_LIMIT_CHARS).collect();
    format!("{kept}\n...[output truncated at {STREAM_LIMIT_CHARS} chars]")
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
        ToolCall::new(0, "run_command", args)
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let out = RunCommandTool
            .execute(
                &call(json!({"command": "echo hello"})),
                &ctx(dir.path()),
                &CancelToken::new(),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("[exit 0]"));
        assert!(out.content.contains("hello"));
    }

    #[tokio::test]
    async fn captures_stderr_separately() {
        let dir = tempfile::tempdir().unwrap();
        let out = RunCommandTool
            .execute(
                &call(json!({"command": "echo out && echo err >&2"})),
                &ctx(dir.path()),
                &CancelToken::new(),
            )
            .await;
        assert!(out.content.contains("out"));
        assert!(out.content.contains("[stderr]"));
        assert!(out.content.contains("err"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_error_with_code() {
        let dir = tempfile::tempdir().unwrap();
        let out = RunCommandTool
            .execute(
                &call(json!({"command": "exit 3"})),
                &ctx(dir.path()),
                &CancelToken::new(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("[exit 3]"));
    }

    #[tokio::test]
    async fn cwd_changes_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let out = RunCommandTool
            .execute(
                &call(json!({"command": "pwd", "cwd": "sub"})),
                &ctx(dir.path()),
                &CancelToken::new(),
            )
            .await;
        assert!(out.content.contains("sub"), "{}", out.content);
    }

    #[tokio::test]
    async fn timeout_kills_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let started = std::time::Instant::now();
        let out = RunCommandTool
            .execute(
                &call(json!({"command": "sleep 30", "timeout": 200})),
                &ctx(dir.path()),
                &CancelToken::new(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("timeout"));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancellation_kills_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            canceller.cancel();
        });
        let started = std::time::Instant::now();
        let out = RunCommandTool
            .execute(
                &call(json!({"command": "sleep 30"})),
                &ctx(dir.path()),
                &cancel,
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("cancelled"));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn long_output_is_truncated_per_stream() {
        let dir = tempfile::tempdir().unwrap();
        let out = RunCommandTool
            .execute(
                &call(json!({"command": "yes x | head -20000"})),
                &ctx(dir.path()),
                &CancelToken::new(),
            )
            .await;
        assert!(out.content.contains("output truncated"), "{}", out.content);
        assert!(out.content.len() < 2 * STREAM_LIMIT_CHARS);
    }

    #[tokio::test]
    async fn secrets_are_not_visible_to_the_child() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("OLLY_TEST_SECRET_TOKEN", "super-secret");
        let out = RunCommandTool
            .execute(
                &call(json!({"command": "env"})),
                &ctx(dir.path()),
                &CancelToken::new(),
            )
            .await;
        std::env::remove_var("OLLY_TEST_SECRET_TOKEN");
        assert!(
            !out.content.contains("super-secret"),
            "credential leaked into subprocess env"
        );
    }

    #[tokio::test]
    async fn missing_command_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = RunCommandTool
            .execute(&call(json!({})), &ctx(dir.path()), &CancelToken::new())
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("'command'"));
    }

    #[test]
    fn truncate_stream_is_noop_under_limit() {
        assert_eq!(truncate_stream("short"), "short");
    }
}
