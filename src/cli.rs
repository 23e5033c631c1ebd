// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::Parser;

use olly_config::{AgentMode, AutonomyLevel};

/// A local coding agent for Ollama-hosted models.
///
/// Runs one instruction through the agent loop against the current
/// directory, streaming the model's answer to stdout.  Sessions persist in
/// `~/.local/share/olly/olly.db`; pass --session or --continue to resume.
#[derive(Debug, Parser)]
#[command(name = "olly", version)]
pub struct Cli {
    /// Model name (default: llama3.2:latest, or model.name from config)
    #[arg(long)]
    pub model: Option<String>,

    /// Ollama host URL (default: http://127.0.0.1:11434)
    #[arg(long, env = "OLLAMA_HOST")]
    pub host: Option<String>,

    /// Resume a specific session by id; exits with code 1 when unknown
    #[arg(long)]
    pub session: Option<String>,

    /// Resume the most recent session for this project
    #[arg(long = "continue")]
    pub continue_latest: bool,

    /// Agent mode: plan (read-only) or build (full access)
    #[arg(long, value_enum)]
    pub mode: Option<AgentMode>,

    /// Autonomy level for the safety gateway
    #[arg(long, value_enum)]
    pub autonomy: Option<AutonomyLevel>,

    /// Explicit config file (default: ~/.config/olly/config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// The instruction for the agent; read from stdin when omitted
    pub prompt: Option<String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
