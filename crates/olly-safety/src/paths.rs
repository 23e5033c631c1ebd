// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Path confinement.
//!
//! Every tool argument named `path` or `cwd` resolves against the project
//! root and must stay inside it.  Resolution is lexical (the target may not
//! exist yet for writes), so `..` components are folded before the
//! containment check rather than via canonicalize.

use std::path::{Component, Path, PathBuf};

use olly_config::SafetyConfig;

/// Resolve `raw` against the project root and apply the allow/deny pattern
/// lists.  Returns the resolved absolute path or a denial reason.
pub fn validate_path(config: &SafetyConfig, raw: &str) -> Result<PathBuf, String> {
    let root = &config.project_root;
    let candidate = if Path::new(raw).is_absolute() {
        PathBuf::from(raw)
    } else {
        root.join(raw)
    };
    let resolved = normalize(&candidate);
    let normalized_root = normalize(root);

    if !resolved.starts_with(&normalized_root) {
        return Err(format!(
            "path '{raw}' resolves outside the project root"
        ));
    }

    let rel = resolved
        .strip_prefix(&normalized_root)
        .unwrap_or(&resolved)
        .to_string_lossy()
        .replace('\\', "/");

    for pattern in &config.denied_paths {
        if matches_pattern(pattern, &rel) {
            return Err(format!("path '{raw}' is denied by pattern '{pattern}'"));
        }
    }

    if let Some(allowed) = &config.allowed_paths {
        let ok = allowed.iter().any(|p| matches_pattern(p, &rel));
        if !ok {
            return Err(format!("path '{raw}' matches no allowed_paths pattern"));
        }
    }

    Ok(resolved)
}

/// Fold `.` and `..` components lexically.  A `..` that would climb above
/// the first component is preserved so the containment check fails.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Case-insensitive path pattern match against a root-relative path.
///
/// Supported forms:
/// - `exact`: equals the file name, the whole relative path, or a trailing
///   path segment sequence (`.git/config` matches `a/.git/config`)
/// - `*.ext`: file name suffix
/// - `prefix.*`: file name prefix
/// - `prefix.*.suffix`: file name prefix and suffix together
pub fn matches_pattern(pattern: &str, rel_path: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let rel = rel_path.to_ascii_lowercase();
    let name = rel.rsplit('/').next().unwrap_or(&rel);

    match pattern.find('*') {
        None => {
            // Exact or path-suffix containment.
            rel == pattern || name == pattern || rel.ends_with(&format!("/{pattern}"))
        }
        Some(star) => {
            let (before, after) = pattern.split_at(star);
            let after = &after[1..];
            if after.contains('*') {
                // Only single-star forms are specified; anything fancier
                // fails closed for deny lists by matching nothing.
                return false;
            }
            name.len() >= before.len() + after.len()
                && name.starts_with(before)
                && name.ends_with(after)
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SafetyConfig {
        SafetyConfig::for_project("/p")
    }

    // ── Containment ───────────────────────────────────────────────────────────

    #[test]
    fn relative_path_resolves_under_root() {
        let p = validate_path(&config(), "src/main.rs").unwrap();
        assert_eq!(p, PathBuf::from("/p/src/main.rs"));
    }

    #[test]
    fn parent_traversal_is_denied() {
        let err = validate_path(&config(), "../x").unwrap_err();
        assert!(err.contains("outside the project root"), "{err}");
    }

    #[test]
    fn buried_traversal_is_denied() {
        assert!(validate_path(&config(), "src/../../etc/passwd").is_err());
    }

    #[test]
    fn absolute_path_outside_root_is_denied() {
        let err = validate_path(&config(), "/etc/passwd").unwrap_err();
        assert!(err.contains("outside the project root"), "{err}");
    }

    #[test]
    fn absolute_path_inside_root_is_allowed() {
        let p = validate_path(&config(), "/p/src/lib.rs").unwrap();
        assert_eq!(p, PathBuf::from("/p/src/lib.rs"));
    }

    #[test]
    fn dot_components_are_folded() {
        let p = validate_path(&config(), "./src/./main.rs").unwrap();
        assert_eq!(p, PathBuf::from("/p/src/main.rs"));
    }

    // ── Deny patterns ─────────────────────────────────────────────────────────

    #[test]
    fn default_deny_list_blocks_env_file() {
        let err = validate_path(&config(), ".env").unwrap_err();
        assert!(err.contains("denied by pattern"), "{err}");
    }

    #[test]
    fn deny_applies_at_any_depth() {
        assert!(validate_path(&config(), "deploy/.env").is_err());
        assert!(validate_path(&config(), "certs/server.pem").is_err());
    }

    #[test]
    fn deny_matching_is_case_insensitive() {
        assert!(validate_path(&config(), "certs/Server.PEM").is_err());
    }

    // ── Allow list ────────────────────────────────────────────────────────────

    #[test]
    fn allowed_paths_restricts_to_matches() {
        let mut cfg = config();
        cfg.allowed_paths = Some(vec!["*.rs".into(), "*.toml".into()]);
        assert!(validate_path(&cfg, "src/main.rs").is_ok());
        assert!(validate_path(&cfg, "Cargo.toml").is_ok());
        let err = validate_path(&cfg, "notes.md").unwrap_err();
        assert!(err.contains("no allowed_paths"), "{err}");
    }

    #[test]
    fn deny_beats_allow() {
        let mut cfg = config();
        cfg.allowed_paths = Some(vec!["*.pem".into()]);
        assert!(validate_path(&cfg, "cert.pem").is_err(), "deny list must win");
    }

    // ── Pattern forms ─────────────────────────────────────────────────────────

    #[test]
    fn exact_pattern_matches_name_and_suffix() {
        assert!(matches_pattern("id_rsa", "id_rsa"));
        assert!(matches_pattern("id_rsa", ".ssh/id_rsa"));
        assert!(!matches_pattern("id_rsa", "id_rsa.pub"));
    }

    #[test]
    fn path_suffix_containment() {
        assert!(matches_pattern(".git/config", ".git/config"));
        assert!(matches_pattern(".git/config", "vendor/lib/.git/config"));
        assert!(!matches_pattern(".git/config", ".git/configure"));
    }

    #[test]
    fn star_ext_pattern() {
        assert!(matches_pattern("*.pem", "server.pem"));
        assert!(matches_pattern("*.pem", "deep/dir/ca.pem"));
        assert!(!matches_pattern("*.pem", "pem.txt"));
    }

    #[test]
    fn prefix_star_pattern() {
        assert!(matches_pattern(".env.*", ".env.local"));
        assert!(matches_pattern("secrets.*", "secrets.yaml"));
        assert!(!matches_pattern(".env.*", "environment"));
    }

    #[test]
    fn prefix_star_suffix_pattern() {
        assert!(matches_pattern("config.*.json", "config.prod.json"));
        assert!(!matches_pattern("config.*.json", "config.prod.yaml"));
    }

    #[test]
    fn double_star_fails_closed() {
        assert!(!matches_pattern("**.pem", "a.pem"));
    }
}
