// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The progress guard: heuristics that notice a stuck run.
//!
//! Applied by the loop in a fixed order after every step:
//! 1. [`check_consecutive`]: identical calls back-to-back (terminal)
//! 2. [`check_not_found`]: repeated empty searches (injects a reminder and
//!    suppresses the doom check for that iteration)
//! 3. [`check_doom`]: repeated failures and 2-periodic oscillation (terminal)
//!
//! [`has_progress`] is a coarser estimate hosts can poll for status display.

use std::collections::HashSet;

use olly_model::ToolCallRec;

use crate::outcome::AgentStep;

/// Tools whose alternation is normal exploration, not oscillation.
const EXPLORATION_TOOLS: &[&str] = &["grep", "glob", "read_file", "list_dir"];

/// Markers of a search that found nothing.
const NOT_FOUND_TOKENS: &[&str] = &[
    "(no matches)",
    "no matches",
    "not found",
    "does not exist",
    "no such file",
    "enoent",
];

fn signature(call: &ToolCallRec) -> String {
    format!("{}:{}", call.name, call.canonical_args())
}

/// Identical-call loop over the flattened action sequence.
///
/// Fires when the same `(name, canonical args)` signature repeats
/// `threshold` times with no different signature in between; a
/// `read → edit → read` cycle on one file must not trigger.
pub fn check_consecutive(steps: &[AgentStep], threshold: usize) -> Option<(String, usize)> {
    if threshold == 0 {
        return None;
    }
    let mut run_sig: Option<String> = None;
    let mut run_name = String::new();
    let mut run_len = 0usize;
    let mut worst: Option<(String, usize)> = None;

    for step in steps {
        for call in &step.actions {
            let sig = signature(call);
            if run_sig.as_deref() == Some(sig.as_str()) {
                run_len += 1;
            } else {
                run_sig = Some(sig);
                run_name = call.name.clone();
                run_len = 1;
            }
            if run_len >= threshold {
                match &worst {
                    Some((_, len)) if *len >= run_len => {}
                    _ => worst = Some((run_name.clone(), run_len)),
                }
            }
        }
    }
    worst
}

/// Repeated fruitless searches.
///
/// Looks at the last `max(threshold + 2, 5)` steps and counts search-tool
/// observations that are empty or carry a not-found token.  Returns the
/// union of `pattern` / `path` arguments for the diagnostic message.
pub fn check_not_found(steps: &[AgentStep], threshold: usize) -> Option<(Vec<String>, usize)> {
    let lookback = (threshold + 2).max(5);
    let recent = tail(steps, lookback);

    let mut count = 0usize;
    let mut queries: HashSet<String> = HashSet::new();
    for step in recent {
        for (call, obs) in step.actions.iter().zip(&step.observations) {
            if !EXPLORATION_TOOLS.contains(&call.name.as_str()) {
                continue;
            }
            let text = obs.error.as_deref().unwrap_or(&obs.output);
            let lowered = text.to_ascii_lowercase();
            let empty = text.trim().is_empty();
            if empty || NOT_FOUND_TOKENS.iter().any(|t| lowered.contains(t)) {
                count += 1;
                for key in ["pattern", "path"] {
                    if let Some(v) = call.arguments.get(key).and_then(|v| v.as_str()) {
                        queries.insert(v.to_string());
                    }
                }
            }
        }
    }

    if count >= threshold {
        let mut list: Vec<String> = queries.into_iter().collect();
        list.sort();
        Some((list, count))
    } else {
        None
    }
}

/// The doom loop: identical repetition, repeated same-tool failures, or
/// 2-periodic `ABAB` oscillation over the last `threshold + 1` steps.
pub fn check_doom(steps: &[AgentStep], threshold: usize) -> Option<(String, String, usize)> {
    let recent = tail(steps, threshold + 1);

    // (a) identical loop within the window.
    if let Some((action, attempts)) = check_consecutive(recent, threshold) {
        return Some(("identical calls".into(), action, attempts));
    }

    // (b) the same tool failing over and over.
    let mut failures: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for step in recent {
        for obs in &step.observations {
            if obs.is_error() {
                *failures.entry(obs.tool.as_str()).or_default() += 1;
            }
        }
    }
    if let Some((tool, n)) = failures.into_iter().max_by_key(|(_, n)| *n) {
        if n >= threshold {
            return Some(("repeated failures".into(), tool.to_string(), n));
        }
    }

    // (c) ABAB oscillation, unless both tools are ordinary exploration.
    let names: Vec<&str> = recent
        .iter()
        .flat_map(|s| s.actions.iter().map(|c| c.name.as_str()))
        .collect();
    if names.len() >= 4 {
        let w = &names[names.len() - 4..];
        let oscillating = w[0] == w[2] && w[1] == w[3] && w[0] != w[1];
        let both_exploration =
            EXPLORATION_TOOLS.contains(&w[0]) && EXPLORATION_TOOLS.contains(&w[1]);
        if oscillating && !both_exploration {
            return Some(("oscillation".into(), format!("{}/{}", w[0], w[1]), 2));
        }
    }

    None
}

/// Coarse progress estimate over the last `window` steps.
///
/// `false` when the run is visibly treading water: a single tool whose
/// results all collapse to the same 100-char prefix, or a failure rate
/// above 50%.
pub fn has_progress(steps: &[AgentStep], window: usize) -> bool {
    let recent = tail(steps, window);
    if recent.is_empty() {
        return true;
    }

    let mut tools: HashSet<&str> = HashSet::new();
    let mut prefixes: HashSet<String> = HashSet::new();
    let mut total = 0usize;
    let mut errors = 0usize;
    for step in recent {
        for obs in &step.observations {
            tools.insert(obs.tool.as_str());
            let text = obs.error.as_deref().unwrap_or(&obs.output);
            prefixes.insert(text.chars().take(100).collect());
            total += 1;
            if obs.is_error() {
                errors += 1;
            }
        }
    }
    if total == 0 {
        return true;
    }
    if tools.len() <= 1 && prefixes.len() <= 1 {
        return false;
    }
    if errors * 2 > total {
        return false;
    }
    true
}

fn tail(steps: &[AgentStep], n: usize) -> &[AgentStep] {
    &steps[steps.len().saturating_sub(n)..]
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
