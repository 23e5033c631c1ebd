// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// `~/.config/olly/config.json`
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("olly/config.json"))
}

/// `~/.local/share/olly`, home of the session database.
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("olly"))
}

/// Load configuration from `~/.config/olly/config.json`.
///
/// A missing file yields `Config::default()`; a present but malformed file is
/// an error (silently ignoring a broken config would mask typos in safety
/// settings).  The `extra` argument may provide an explicit path.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let path = match extra {
        Some(p) => p.to_path_buf(),
        None => match config_file_path() {
            Some(p) => p,
            None => return Ok(Config::default()),
        },
    };

    if !path.is_file() {
        debug!(path = %path.display(), "no config file; using defaults");
        return Ok(Config::default());
    }

    debug!(path = %path.display(), "loading config");
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: Config =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = load(Some(Path::new("/tmp/olly_no_such_config_xyz.json"))).unwrap();
        assert_eq!(cfg.model.name, "llama3.2:latest");
    }

    #[test]
    fn explicit_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"model": {"name": "codellama", "host": "http://10.0.0.5:11434"}}"#)
            .unwrap();
        let cfg = load(Some(&path)).unwrap();
        assert_eq!(cfg.model.name, "codellama");
        assert_eq!(cfg.model.host, "http://10.0.0.5:11434");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load(Some(&path)).is_err());
    }
}
