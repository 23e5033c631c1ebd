// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be enabled unless the user disables
/// them need a named function.
fn default_true() -> bool {
    true
}

/// Top-level configuration, loaded from `~/.config/olly/config.json`.
///
/// Every field has a serde default so older config files keep loading as new
/// fields are added; unknown fields are ignored for the same reason.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name forwarded to the Ollama API
    pub name: String,
    /// Ollama host URL.  Overridable with --host or the OLLAMA_HOST env var.
    pub host: String,
    /// Environment variable that holds the bearer token for the model host
    /// (read at runtime).  Most local Ollama installs need no auth.
    pub api_key_env: Option<String>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "llama3.2:latest".into(),
            host: "http://127.0.0.1:11434".into(),
            api_key_env: Some("OLLAMA_API_KEY".into()),
            temperature: Some(0.2),
        }
    }
}

fn default_agent_mode() -> AgentMode {
    AgentMode::Build
}
fn default_max_iterations() -> u32 {
    15
}
fn default_compaction_threshold() -> f32 {
    0.80
}
fn default_min_preserved_messages() -> usize {
    6
}
fn default_loop_threshold() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Default mode when none is specified on the CLI
    #[serde(default = "default_agent_mode")]
    pub default_mode: AgentMode,
    /// Maximum number of model ↔ tool iterations before the run stops
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Context fraction at which compaction triggers (0.0–1.0).
    /// Compaction is disabled entirely when the model's context window
    /// cannot be determined.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,
    /// Number of recent messages preserved verbatim during compaction.
    ///
    /// A value of 6 corresponds to roughly 3 back-and-forth turns.
    #[serde(default = "default_min_preserved_messages")]
    pub min_preserved_messages: usize,
    /// Use the model to summarise compacted history.  When disabled the
    /// compactor falls back to deterministic truncation only.
    #[serde(default = "default_true")]
    pub llm_summarization: bool,
    /// Number of identical consecutive tool calls (or repeated failures)
    /// that trips the progress guard.
    #[serde(default = "default_loop_threshold")]
    pub loop_threshold: usize,
    /// System prompt override; leave None to use the built-in prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_mode: AgentMode::Build,
            max_iterations: default_max_iterations(),
            compaction_threshold: default_compaction_threshold(),
            min_preserved_messages: default_min_preserved_messages(),
            llm_summarization: true,
            loop_threshold: default_loop_threshold(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Read-only exploration – search and read tools, no writes
    Plan,
    /// Full agent with read/write/execute tools
    Build,
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentMode::Plan => write!(f, "plan"),
            AgentMode::Build => write!(f, "build"),
        }
    }
}

/// How much the gateway trusts the model.
///
/// Per-tool overrides ([`ToolOverride`]) take precedence over the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AutonomyLevel {
    /// Confirm every single tool call
    Paranoid,
    /// Auto-allow only `safe`-risk tools; confirm the rest
    #[default]
    Cautious,
    /// Confirm only high-risk tools and all shell execution
    Balanced,
    /// Confirm nothing
    Autonomous,
}

impl std::fmt::Display for AutonomyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AutonomyLevel::Paranoid => write!(f, "paranoid"),
            AutonomyLevel::Cautious => write!(f, "cautious"),
            AutonomyLevel::Balanced => write!(f, "balanced"),
            AutonomyLevel::Autonomous => write!(f, "autonomous"),
        }
    }
}

/// Per-tool risk class.
///
/// `Safe` marks tools that are eligible for concurrent execution and need no
/// confirmation.  The remaining tiers only influence the confirmation
/// decision; every non-safe tool runs in the sequential lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
    /// Always requires confirmation below `autonomous`
    Prompt,
}

impl RiskLevel {
    pub fn is_safe(self) -> bool {
        self == RiskLevel::Safe
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Prompt => "prompt",
        };
        write!(f, "{s}")
    }
}

/// Per-tool policy override installed via config or a confirmation response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOverride {
    AlwaysAllow,
    AlwaysConfirm,
    AlwaysDeny,
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}
fn default_max_tool_calls_per_turn() -> u32 {
    30
}
fn default_max_tool_calls_per_session() -> u32 {
    500
}
fn default_denied_paths() -> Vec<String> {
    vec![
        ".env".into(),
        ".env.*".into(),
        "*.pem".into(),
        "*.key".into(),
        "id_rsa".into(),
        "id_ed25519".into(),
        ".git/config".into(),
        "credentials.json".into(),
        "secrets.*".into(),
    ]
}
fn default_audit_log_path() -> PathBuf {
    PathBuf::from(".ollie/audit.jsonl")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Project root every relative path resolves against.  Paths resolving
    /// outside this directory are rejected.
    #[serde(default)]
    pub project_root: PathBuf,
    #[serde(default)]
    pub autonomy_level: AutonomyLevel,
    /// Largest file (bytes) read/write tools may touch
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_max_tool_calls_per_turn")]
    pub max_tool_calls_per_turn: u32,
    #[serde(default = "default_max_tool_calls_per_session")]
    pub max_tool_calls_per_session: u32,
    /// Per-tool overrides that beat the autonomy level
    #[serde(default)]
    pub tool_overrides: HashMap<String, ToolOverride>,
    /// When set, only paths matching at least one pattern are accessible
    #[serde(default)]
    pub allowed_paths: Option<Vec<String>>,
    /// Patterns denied for both read and write regardless of allowed_paths
    #[serde(default = "default_denied_paths")]
    pub denied_paths: Vec<String>,
    /// When set, only commands starting with one of these prefixes may run
    #[serde(default)]
    pub allowed_commands: Option<Vec<String>>,
    /// Command prefixes always denied
    #[serde(default)]
    pub denied_commands: Vec<String>,
    /// Permit network commands (curl, wget, ssh, …) in build mode
    #[serde(default)]
    pub allow_network_commands: bool,
    /// Audit log location, relative to the project root
    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: PathBuf,
    #[serde(default = "default_true")]
    pub enable_audit_log: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::new(),
            autonomy_level: AutonomyLevel::Cautious,
            max_file_size: default_max_file_size(),
            max_tool_calls_per_turn: default_max_tool_calls_per_turn(),
            max_tool_calls_per_session: default_max_tool_calls_per_session(),
            tool_overrides: HashMap::new(),
            allowed_paths: None,
            denied_paths: default_denied_paths(),
            allowed_commands: None,
            denied_commands: Vec::new(),
            allow_network_commands: false,
            audit_log_path: default_audit_log_path(),
            enable_audit_log: true,
        }
    }
}

impl SafetyConfig {
    /// A config rooted at `root` with everything else at defaults.
    pub fn for_project(root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: root.into(),
            ..Self::default()
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_is_llama() {
        let c = Config::default();
        assert_eq!(c.model.name, "llama3.2:latest");
        assert_eq!(c.model.host, "http://127.0.0.1:11434");
    }

    #[test]
    fn default_autonomy_is_cautious() {
        assert_eq!(AutonomyLevel::default(), AutonomyLevel::Cautious);
    }

    #[test]
    fn default_agent_limits() {
        let a = AgentConfig::default();
        assert_eq!(a.max_iterations, 15);
        assert_eq!(a.min_preserved_messages, 6);
        assert!((a.compaction_threshold - 0.80).abs() < f32::EPSILON);
    }

    #[test]
    fn empty_json_object_deserializes_to_defaults() {
        let c: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(c.model.name, "llama3.2:latest");
        assert_eq!(c.agent.max_iterations, 15);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        // Forward compatibility: a newer config with fields this build does
        // not know about must still load.
        let c: Config =
            serde_json::from_str(r#"{"model": {"name": "qwen2.5"}, "future_section": {"x": 1}}"#)
                .unwrap();
        assert_eq!(c.model.name, "qwen2.5");
    }

    #[test]
    fn safety_defaults_deny_env_files() {
        let s = SafetyConfig::default();
        assert!(s.denied_paths.iter().any(|p| p == ".env"));
        assert!(s.enable_audit_log);
        assert!(!s.allow_network_commands);
    }

    #[test]
    fn tool_override_round_trips_snake_case() {
        let json = serde_json::to_string(&ToolOverride::AlwaysDeny).unwrap();
        assert_eq!(json, r#""always_deny""#);
        let back: ToolOverride = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ToolOverride::AlwaysDeny);
    }

    #[test]
    fn mode_display_is_lowercase() {
        assert_eq!(AgentMode::Plan.to_string(), "plan");
        assert_eq!(AgentMode::Build.to_string(), "build");
    }
}
