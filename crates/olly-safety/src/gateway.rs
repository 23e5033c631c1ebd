// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The safety gateway: every tool invocation passes through [`SafetyGateway::check`]
//! before execution.
//!
//! Check pipeline, short-circuiting on the first decision:
//! 1. rate limits (turn, session, and a 5-second identical-call window)
//! 2. deny overrides (config and session-scoped `deny_always`)
//! 3. path confinement for any `path` / `cwd` argument
//! 4. command filtering for `run_command`
//! 5. the write-overwrite guard for `write_file` on existing files
//! 6. the confirmation decision from risk × autonomy
//!
//! The gateway is the sole owner of the audit buffer and the rate counters;
//! callers running tools in parallel serialize access through a mutex.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};
use similar::TextDiff;
use tracing::debug;

use olly_config::{AgentMode, AutonomyLevel, RiskLevel, SafetyConfig, ToolOverride};

use crate::audit::{AuditLog, AuditResult};
use crate::commands::{validate_command, CommandVerdict};
use crate::confirm::{ConfirmationPreview, ConfirmationRequest, ConfirmationResponse};
use crate::paths::validate_path;

/// Window within which repeating the identical call trips the precursor.
const PRECURSOR_WINDOW: Duration = Duration::from_secs(5);

/// Identical calls tolerated inside the window before denial.
const PRECURSOR_LIMIT: usize = 2;

/// Content previews in confirmation requests are cut at this length.
const PREVIEW_CAP_CHARS: usize = 2000;

#[derive(Debug, Clone)]
pub enum Decision {
    Allowed,
    Denied { reason: String },
    NeedsConfirmation { request: ConfirmationRequest },
}

pub struct SafetyGateway {
    config: SafetyConfig,
    audit: AuditLog,
    turn_count: u32,
    session_count: u32,
    /// `(call signature hash, seen at)` for the loop-precursor window.
    recent: VecDeque<(String, Instant)>,
    /// Tools granted "allow always" this session.
    session_allowed: HashSet<String>,
    /// Tools denied "deny always" this session.
    session_denied: HashSet<String>,
}

impl SafetyGateway {
    pub fn new(config: SafetyConfig, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let audit_path = config.project_root.join(&config.audit_log_path);
        let audit = AuditLog::new(audit_path, config.enable_audit_log, session_id);
        Self {
            config,
            audit,
            turn_count: 0,
            session_count: 0,
            recent: VecDeque::new(),
            session_allowed: HashSet::new(),
            session_denied: HashSet::new(),
        }
    }

    /// Classify one tool invocation.  Does not record anything to the audit
    /// log; the caller reports the eventual outcome through the
    /// `record_*` methods once it is known.
    pub fn check(&mut self, tool: &str, args: &Value, risk: RiskLevel, mode: AgentMode) -> Decision {
        // 1. Rate limits.
        if self.turn_count >= self.config.max_tool_calls_per_turn {
            return Decision::Denied {
                reason: format!(
                    "turn tool-call limit reached ({})",
                    self.config.max_tool_calls_per_turn
                ),
            };
        }
        if self.session_count >= self.config.max_tool_calls_per_session {
            return Decision::Denied {
                reason: format!(
                    "session tool-call limit reached ({})",
                    self.config.max_tool_calls_per_session
                ),
            };
        }
        if self.note_repeat(tool, args) {
            return Decision::Denied {
                reason: format!(
                    "identical {tool} call repeated {PRECURSOR_LIMIT}+ times within \
                     {}s — likely a loop",
                    PRECURSOR_WINDOW.as_secs()
                ),
            };
        }

        // 2. Deny overrides.
        if matches!(
            self.config.tool_overrides.get(tool),
            Some(ToolOverride::AlwaysDeny)
        ) {
            return Decision::Denied { reason: format!("tool '{tool}' is denied by configuration") };
        }
        if self.session_denied.contains(tool) {
            return Decision::Denied {
                reason: format!("tool '{tool}' was denied by the user for this session"),
            };
        }

        // 3. Path confinement.
        for key in ["path", "cwd"] {
            if let Some(raw) = args.get(key).and_then(|v| v.as_str()) {
                if let Err(reason) = validate_path(&self.config, raw) {
                    return Decision::Denied { reason };
                }
            }
        }

        // 4. Command filtering.
        let mut forced_confirm_reason: Option<String> = None;
        if tool == "run_command" {
            let command = args.get("command").and_then(|v| v.as_str()).unwrap_or("");
            match validate_command(&self.config, command, mode) {
                CommandVerdict::Allow => {}
                CommandVerdict::Deny { reason } => return Decision::Denied { reason },
                CommandVerdict::Confirm { reason } => forced_confirm_reason = Some(reason),
            }
        }

        // 5. Write-overwrite guard.
        if tool == "write_file" {
            match self.check_overwrite(args) {
                OverwriteVerdict::Ok => {}
                OverwriteVerdict::Deny(reason) => return Decision::Denied { reason },
                OverwriteVerdict::Confirm(preview) => {
                    debug!(tool, "overwrite diverges; requiring confirmation");
                    return Decision::NeedsConfirmation {
                        request: self.build_request(tool, args, risk, Some(preview)),
                    };
                }
            }
        }

        // 6. Confirmation decision.
        let needs_confirmation = match self.config.tool_overrides.get(tool) {
            Some(ToolOverride::AlwaysAllow) => false,
            Some(ToolOverride::AlwaysConfirm) => true,
            Some(ToolOverride::AlwaysDeny) | None => {
                forced_confirm_reason.is_some() || self.requires_confirmation(tool, risk)
            }
        };
        if needs_confirmation && !self.session_allowed.contains(tool) {
            return Decision::NeedsConfirmation {
                request: self.build_request(tool, args, risk, self.build_preview(tool, args)),
            };
        }

        Decision::Allowed
    }

    /// Risk × autonomy matrix.
    fn requires_confirmation(&self, tool: &str, risk: RiskLevel) -> bool {
        match self.config.autonomy_level {
            AutonomyLevel::Paranoid => true,
            AutonomyLevel::Cautious => !risk.is_safe(),
            AutonomyLevel::Balanced => {
                matches!(risk, RiskLevel::High | RiskLevel::Prompt) || tool == "run_command"
            }
            AutonomyLevel::Autonomous => false,
        }
    }

    /// Track the call signature; true when it was already seen
    /// [`PRECURSOR_LIMIT`] times inside the window.
    fn note_repeat(&mut self, tool: &str, args: &Value) -> bool {
        let now = Instant::now();
        while let Some((_, t)) = self.recent.front() {
            if now.duration_since(*t) > PRECURSOR_WINDOW {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        let sig = call_signature(tool, args);
        let seen = self.recent.iter().filter(|(s, _)| *s == sig).count();
        self.recent.push_back((sig, now));
        seen >= PRECURSOR_LIMIT
    }

    /// Write-overwrite guard.  Reads the current file contents synchronously;
    /// the gateway is already serialized by its callers and target files are
    /// bounded by max_file_size.
    fn check_overwrite(&self, args: &Value) -> OverwriteVerdict {
        let Some(raw) = args.get("path").and_then(|v| v.as_str()) else {
            return OverwriteVerdict::Ok;
        };
        let content = args.get("content").and_then(|v| v.as_str()).unwrap_or("");

        if content.len() as u64 > self.config.max_file_size {
            return OverwriteVerdict::Deny(format!(
                "content exceeds max_file_size ({} bytes)",
                self.config.max_file_size
            ));
        }

        let Ok(resolved) = validate_path(&self.config, raw) else {
            // Path problems were already decided in the path stage.
            return OverwriteVerdict::Ok;
        };
        if !resolved.is_file() {
            return OverwriteVerdict::Ok;
        }

        // Blocks "delete by overwrite": replacing a real file with nothing
        // is almost never what the user asked for.
        if content.trim().len() < 10 {
            return OverwriteVerdict::Deny(
                "refusing to overwrite an existing file with empty or trivially \
                 short content; delete explicitly if intended"
                    .into(),
            );
        }

        let Ok(existing) = std::fs::read_to_string(&resolved) else {
            return OverwriteVerdict::Ok;
        };
        let old_len = existing.len() as f64;
        let new_len = content.len() as f64;
        if old_len > 0.0 && ((new_len - old_len).abs() / old_len) > 0.5 {
            let diff = TextDiff::from_lines(existing.as_str(), content)
                .unified_diff()
                .context_radius(3)
                .to_string();
            let preview = if diff.chars().count() > PREVIEW_CAP_CHARS {
                ConfirmationPreview::Content {
                    text: diff.chars().take(PREVIEW_CAP_CHARS).collect(),
                    truncated: true,
                }
            } else {
                ConfirmationPreview::Diff {
                    before: existing,
                    after: content.to_string(),
                    path: raw.to_string(),
                }
            };
            return OverwriteVerdict::Confirm(preview);
        }
        OverwriteVerdict::Ok
    }

    fn build_request(
        &self,
        tool: &str,
        args: &Value,
        risk: RiskLevel,
        preview: Option<ConfirmationPreview>,
    ) -> ConfirmationRequest {
        ConfirmationRequest {
            id: short_id(),
            tool: tool.to_string(),
            args: args.clone(),
            risk,
            description: describe_call(tool, args),
            preview,
        }
    }

    fn build_preview(&self, tool: &str, args: &Value) -> Option<ConfirmationPreview> {
        match tool {
            "run_command" => Some(ConfirmationPreview::Command {
                command: args.get("command")?.as_str()?.to_string(),
                cwd: args.get("cwd").and_then(|v| v.as_str()).unwrap_or(".").to_string(),
            }),
            "write_file" => {
                let text = args.get("content")?.as_str()?;
                let truncated = text.chars().count() > PREVIEW_CAP_CHARS;
                Some(ConfirmationPreview::Content {
                    text: text.chars().take(PREVIEW_CAP_CHARS).collect(),
                    truncated,
                })
            }
            "edit_file" => Some(ConfirmationPreview::Diff {
                before: args.get("oldString")?.as_str()?.to_string(),
                after: args.get("newString")?.as_str()?.to_string(),
                path: args.get("path").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            }),
            _ => None,
        }
    }

    // ── Bookkeeping ───────────────────────────────────────────────────────────

    /// Record a completed execution (whether or not it was confirmed first).
    pub fn record_execution(
        &mut self,
        tool: &str,
        args: &Value,
        duration_ms: u64,
        output: Option<&str>,
        error: Option<&str>,
        confirmed: bool,
    ) {
        self.turn_count += 1;
        self.session_count += 1;
        let result = if confirmed { AuditResult::Confirmed } else { AuditResult::Allowed };
        self.audit
            .record(tool, args, result, None, Some(duration_ms), output, error);
    }

    /// Record a gateway denial.
    pub fn record_denied(&mut self, tool: &str, args: &Value, reason: &str) {
        self.audit.record(
            tool,
            args,
            AuditResult::Denied,
            Some(reason.to_string()),
            None,
            None,
            None,
        );
    }

    /// Record a confirmation the user refused.
    pub fn record_rejected(&mut self, tool: &str, args: &Value) {
        self.audit.record(
            tool,
            args,
            AuditResult::Rejected,
            Some("user rejected the confirmation".into()),
            None,
            None,
            None,
        );
    }

    /// Install session-scoped exemptions carried by a response.
    pub fn handle_confirmation_response(&mut self, tool: &str, response: ConfirmationResponse) {
        match response {
            ConfirmationResponse::AllowAlways => {
                self.session_allowed.insert(tool.to_string());
            }
            ConfirmationResponse::DenyAlways => {
                self.session_denied.insert(tool.to_string());
            }
            ConfirmationResponse::Allow | ConfirmationResponse::Deny => {}
        }
    }

    /// Reset turn-scoped counters; called at the top of every iteration.
    pub fn reset_turn(&mut self) {
        self.turn_count = 0;
    }

    /// Flush pending audit entries; called on every loop termination path.
    pub fn flush(&mut self) {
        self.audit.flush();
    }
}

enum OverwriteVerdict {
    Ok,
    Deny(String),
    Confirm(ConfirmationPreview),
}

/// `sha256(tool + canonical args)`, hex-encoded.
fn call_signature(tool: &str, args: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool.as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical_json(args).as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Deterministic JSON: object keys sorted, no whitespace.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}

/// Opaque short random identifier for confirmation requests and sessions.
pub(crate) fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

fn describe_call(tool: &str, args: &Value) -> String {
    let str_arg = |k: &str| args.get(k).and_then(|v| v.as_str()).unwrap_or("?");
    match tool {
        "run_command" => format!("Run `{}`", str_arg("command")),
        "write_file" => {
            let bytes = args.get("content").and_then(|v| v.as_str()).map(str::len).unwrap_or(0);
            format!("Write {bytes} bytes to {}", str_arg("path"))
        }
        "edit_file" => format!("Edit {}", str_arg("path")),
        _ => format!("Execute {tool}"),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
