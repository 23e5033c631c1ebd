// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Shell command filtering.
//!
//! The filter must see through command composition: `echo x ; rm -rf /` is
//! a deletion, not an echo.  [`split_segments`] tokenizes on the explicit
//! boundary set (`|`, `;`, `&&`, `||`, newline, `$( )`, backticks) and the
//! verdict is computed per segment, denials first.
//!
//! Plan mode is allowlist-based: a segment either starts with a known
//! read-only prefix, is recognisably mutating (denied), or is unknown and
//! escalates to a confirmation.  Build mode is denylist-based: dangerous
//! patterns, configured denials, and network commands (unless permitted).

use std::sync::OnceLock;

use olly_config::{AgentMode, SafetyConfig};
use regex::Regex;

/// Outcome of command validation, before autonomy is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandVerdict {
    Allow,
    Deny { reason: String },
    /// Not classifiable as read-only or dangerous; ask the operator.
    Confirm { reason: String },
}

/// Command prefixes considered read-only in plan mode.
const READONLY_PREFIXES: &[&str] = &[
    "ls", "cat", "head", "tail", "less", "grep", "rg", "find", "fd", "pwd", "echo", "printf",
    "which", "file", "stat", "wc", "du", "df", "tree", "ps", "whoami", "date", "uname", "env",
    "git status", "git log", "git diff", "git show", "git branch", "git remote", "git blame",
    "cargo tree", "cargo metadata",
];

/// Tokens that mark a command as mutating in plan mode.
const MUTATING_TOKENS: &[&str] = &[
    ">", ">>", "rm ", "rm\t", "mv ", "cp ", "touch ", "mkdir ", "rmdir ", "ln ", "chmod ",
    "chown ", "tee ", "sed -i", "git add", "git commit", "git push", "git merge", "git rebase",
    "git checkout", "git reset", "git clean", "git stash", "npm install", "npm i ", "npm run",
    "yarn add", "pnpm add", "pip install", "cargo install", "cargo build", "cargo run",
    "make ", "make\t", "apt ", "apt-get", "brew ", "dnf ", "pacman ",
];

/// Commands with network reach, denied in build mode unless permitted.
const NETWORK_COMMANDS: &[&str] = &[
    "curl", "wget", "nc", "ncat", "scp", "rsync", "ssh", "ftp", "telnet", "sftp",
];

/// Patterns that are denied in build mode regardless of configuration.
fn dangerous_patterns() -> &'static Vec<(Regex, &'static str)> {
    static RES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            (r":\(\)\s*\{.*\}\s*;?\s*:", "fork bomb"),
            (r"\brm\s+(-[a-zA-Z]*\s+)*-[a-zA-Z]*[rR][a-zA-Z]*\s+(/|~|\$HOME)\s*$", "recursive delete of a root directory"),
            (r"\brm\s+-[a-zA-Z]*[rR][a-zA-Z]*[fF]\s+/\S*", "recursive force delete under /"),
            (r"\bsudo\b", "privilege escalation"),
            (r">\s*/dev/(sd|hd|nvme|disk)", "raw device write"),
            (r"\bmkfs(\.\w+)?\b", "filesystem format"),
            (r"\bdd\s+[^|;]*of=/dev/", "raw device write via dd"),
            (r"/etc/(passwd|shadow)\b", "system credential file access"),
            (r"\bchmod\s+(-[a-zA-Z]+\s+)*0?777\s+/\s*$", "world-writable root"),
            (r"\bcurl\b[^|;]*\|\s*(ba)?sh\b", "pipe from network to shell"),
            (r"\bwget\b[^|;]*\|\s*(ba)?sh\b", "pipe from network to shell"),
        ]
        .iter()
        .map(|(p, why)| (Regex::new(p).unwrap(), *why))
        .collect()
    })
}

/// Split a shell command at composition boundaries.
///
/// Boundaries: `|`, `;`, `&&`, `||`, newline, `$(`, backtick, and the
/// closing `)` of a substitution.  Single-quoted text is opaque;
/// double-quoted text still opens `$(` and backtick substitutions because
/// the shell executes those inside double quotes.
pub fn split_segments(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = command.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;

    let flush = |current: &mut String, segments: &mut Vec<String>| {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            segments.push(trimmed.to_string());
        }
        current.clear();
    };

    while let Some(c) = chars.next() {
        if in_single {
            current.push(c);
            if c == '\'' {
                in_single = false;
            }
            continue;
        }
        match c {
            '\'' if !in_double => {
                in_single = true;
                current.push(c);
            }
            '"' => {
                in_double = !in_double;
                current.push(c);
            }
            '`' => flush(&mut current, &mut segments),
            '$' if chars.peek() == Some(&'(') => {
                chars.next();
                flush(&mut current, &mut segments);
            }
            ')' if !in_double => flush(&mut current, &mut segments),
            '|' | ';' | '\n' if !in_double => {
                // `||` and `|` share the same boundary handling.
                if c == '|' && chars.peek() == Some(&'|') {
                    chars.next();
                }
                flush(&mut current, &mut segments);
            }
            '&' if !in_double && chars.peek() == Some(&'&') => {
                chars.next();
                flush(&mut current, &mut segments);
            }
            _ => current.push(c),
        }
    }
    flush(&mut current, &mut segments);
    segments
}

/// Validate `command` for execution under `mode`.
pub fn validate_command(config: &SafetyConfig, command: &str, mode: AgentMode) -> CommandVerdict {
    let segments = split_segments(command);
    if segments.is_empty() {
        return CommandVerdict::Deny { reason: "empty command".into() };
    }

    match mode {
        AgentMode::Plan => validate_plan(command, &segments),
        AgentMode::Build => validate_build(config, command, &segments),
    }
}

fn validate_plan(command: &str, segments: &[String]) -> CommandVerdict {
    let all_readonly = segments.iter().all(|s| starts_with_readonly(s));
    if all_readonly {
        return CommandVerdict::Allow;
    }
    // Redirects hide inside otherwise-readonly pipelines, so check the whole
    // command text as well as each segment.
    let lowered = command.to_ascii_lowercase();
    if MUTATING_TOKENS.iter().any(|t| lowered.contains(t)) {
        return CommandVerdict::Deny {
            reason: "mutating command is not allowed in plan mode".into(),
        };
    }
    CommandVerdict::Confirm {
        reason: "command is not on the plan-mode read-only allowlist".into(),
    }
}

fn validate_build(config: &SafetyConfig, command: &str, segments: &[String]) -> CommandVerdict {
    for (re, why) in dangerous_patterns() {
        if re.is_match(command) {
            return CommandVerdict::Deny { reason: format!("dangerous command: {why}") };
        }
    }

    for segment in segments {
        for denied in &config.denied_commands {
            if has_prefix(segment, denied) {
                return CommandVerdict::Deny {
                    reason: format!("command '{denied}' is denied by configuration"),
                };
            }
        }
        if !config.allow_network_commands {
            let first = segment.split_whitespace().next().unwrap_or("");
            if NETWORK_COMMANDS.contains(&first) {
                return CommandVerdict::Deny {
                    reason: format!("network command '{first}' is not permitted"),
                };
            }
        }
        if let Some(allowed) = &config.allowed_commands {
            if !allowed.iter().any(|a| has_prefix(segment, a)) {
                return CommandVerdict::Deny {
                    reason: format!("'{segment}' matches no allowed_commands prefix"),
                };
            }
        }
    }

    CommandVerdict::Allow
}

fn starts_with_readonly(segment: &str) -> bool {
    // A redirect makes any segment a write.
    if segment.contains('>') {
        return false;
    }
    READONLY_PREFIXES.iter().any(|p| has_prefix(segment, p))
}

/// Prefix match on word boundaries: `git status` matches `git status -sb`
/// but not `git statusx`.
fn has_prefix(segment: &str, prefix: &str) -> bool {
    let seg = segment.trim().to_ascii_lowercase();
    let prefix = prefix.trim().to_ascii_lowercase();
    if prefix.is_empty() {
        return false;
    }
    seg == prefix
        || (seg.starts_with(&prefix)
            && seg[prefix.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_whitespace()))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
