// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use olly_config::AgentMode;

const BASE_PROMPT: &str = "\
You are olly, a coding agent working in the user's project directory. \
You accomplish tasks by calling tools and reading their results; the user \
only sees the text you write, never raw tool output.

Rules:
- Ground every claim in tool output you actually received.
- Prefer small, verifiable steps: locate with grep/glob, read the relevant \
lines, then act.
- If a search finds nothing twice, say so instead of repeating it.
- Every mutating operation goes through a safety check and may require the \
user's approval; if an operation is blocked, tell the user plainly that it \
did not happen.";

const BUILD_PROMPT: &str = "\
You have full tool access: reading, searching, writing and editing files, \
and running shell commands. Make the requested change, keep edits minimal, \
and verify your work when a test or build command is available.";

const PLAN_PROMPT: &str = "\
You are in plan mode: read-only exploration. You may search and read files \
and manage the todo list, but you must not modify anything. Produce findings \
and a concrete plan; file writes and most shell commands are unavailable.";

const EXPLORE_PROMPT: &str = "\
You are a read-only explorer sub-agent. Answer the delegated question by \
searching and reading the codebase. Be thorough but terse: your final text \
response is returned verbatim to the parent agent, so make it a dense, \
factual summary with file paths and line references. Do not attempt any \
modification.";

/// System prompt for a run in `mode`.  A caller-supplied override replaces
/// the built-in text entirely.
pub fn system_prompt(mode: AgentMode, override_prompt: Option<&str>, project_root: &str) -> String {
    if let Some(custom) = override_prompt {
        return custom.to_string();
    }
    let mode_part = match mode {
        AgentMode::Build => BUILD_PROMPT,
        AgentMode::Plan => PLAN_PROMPT,
    };
    format!("{BASE_PROMPT}\n\n{mode_part}\n\nProject root: {project_root}")
}

/// System prompt for the `task` sub-agent.
pub fn explore_prompt(project_root: &str) -> String {
    format!("{EXPLORE_PROMPT}\n\nProject root: {project_root}")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_prompt_mentions_full_access() {
        let p = system_prompt(AgentMode::Build, None, "/work");
        assert!(p.contains("full tool access"));
        assert!(p.contains("/work"));
    }

    #[test]
    fn plan_prompt_is_read_only() {
        let p = system_prompt(AgentMode::Plan, None, "/work");
        assert!(p.contains("read-only"));
        assert!(!p.contains("full tool access"));
    }

    #[test]
    fn override_replaces_everything() {
        let p = system_prompt(AgentMode::Build, Some("custom prompt"), "/work");
        assert_eq!(p, "custom prompt");
    }

    #[test]
    fn explore_prompt_forbids_modification() {
        let p = explore_prompt("/work");
        assert!(p.contains("Do not attempt any modification"));
    }
}
