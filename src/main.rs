// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Read;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::debug;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::Cli;
use olly_core::{build_registry, run_agent, AgentError, AgentEvent, AgentRunArgs};
use olly_model::{ModelClient, OllamaClient};
use olly_safety::{
    AutoApprover, ConfirmationHandler, ConfirmationPreview, ConfirmationRequest,
    ConfirmationResponse,
};
use olly_store::{decode_all, encode_all, SessionRow, SessionStore};
use olly_tools::CancelToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = olly_config::load(cli.config.as_deref())?;

    let model_name = cli.model.clone().unwrap_or_else(|| config.model.name.clone());
    let host = cli.host.clone().unwrap_or_else(|| config.model.host.clone());
    let api_key = config
        .model
        .api_key_env
        .as_deref()
        .and_then(|var| std::env::var(var).ok());
    let mode = cli.mode.unwrap_or(config.agent.default_mode);

    let project_root = std::env::current_dir().context("cannot determine working directory")?;
    let project_path = project_root.display().to_string();
    let project_name = project_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| project_path.clone());

    let store = open_store()?;

    // ── Session resolution ────────────────────────────────────────────────────
    let (session_id, history) = if let Some(id) = &cli.session {
        match store.get_session(id).await? {
            Some(row) => {
                let msgs = store.load_messages(&row.id).await?;
                (row.id, decode_all(&msgs))
            }
            None => {
                eprintln!("error: no session with id '{id}'");
                std::process::exit(1);
            }
        }
    } else if cli.continue_latest {
        match store.most_recent_session(&project_path).await? {
            Some(row) => {
                debug!(target: "agent", session = %row.id, "continuing most recent session");
                let msgs = store.load_messages(&row.id).await?;
                (row.id, decode_all(&msgs))
            }
            None => (uuid::Uuid::new_v4().simple().to_string(), Vec::new()),
        }
    } else {
        (uuid::Uuid::new_v4().simple().to_string(), Vec::new())
    };

    // ── Prompt ────────────────────────────────────────────────────────────────
    let (prompt, stdin_consumed) = match &cli.prompt {
        Some(p) => (p.clone(), false),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading instruction from stdin")?;
            (buf.trim().to_string(), true)
        }
    };
    if prompt.is_empty() {
        eprintln!("error: no instruction given (pass one as an argument or on stdin)");
        return Ok(());
    }

    // ── Wiring ────────────────────────────────────────────────────────────────
    let agent_config = config.agent.clone();
    let mut safety_config = config.safety.clone();
    safety_config.project_root = project_root.clone();
    if let Some(level) = cli.autonomy {
        safety_config.autonomy_level = level;
    }

    let model: Arc<dyn ModelClient> =
        Arc::new(OllamaClient::new(host.clone(), model_name.clone(), api_key));
    let registry = Arc::new(build_registry(
        &store,
        &model,
        &host,
        &agent_config,
        &safety_config,
        true,
    ));

    // When stdin already carried the prompt there is nobody to answer
    // confirmation questions; refuse instead of hanging.
    let confirmer: Arc<dyn ConfirmationHandler> = if stdin_consumed {
        Arc::new(AutoApprover::deny_all())
    } else {
        Arc::new(TerminalConfirmer)
    };

    let cancel = CancelToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupt: cancelling run");
            ctrl_c_cancel.cancel();
        }
    });

    let (events_tx, events_rx) = mpsc::channel::<AgentEvent>(1024);
    let printer = tokio::spawn(print_events(events_rx));

    debug!(target: "agent", model = %model_name, %host, %mode, session = %session_id, "starting run");

    let result = run_agent(AgentRunArgs {
        model,
        host: host.clone(),
        user_message: prompt.clone(),
        history: history.clone(),
        session_id: session_id.clone(),
        mode,
        registry,
        events: events_tx,
        confirmer,
        cancel,
        agent_config,
        safety_config,
        system_prompt_override: None,
    })
    .await;
    let _ = printer.await;

    // ── Persist & report ──────────────────────────────────────────────────────
    match result {
        Ok(outcome) => {
            println!();
            if let Some(usage) = outcome.context_usage {
                debug!(
                    target: "agent",
                    used = usage.used_tokens,
                    window = usage.context_window,
                    "context usage {:.0}%", usage.fraction * 100.0
                );
            }
            // Persist everything after the system prompt that the store has
            // not seen yet.
            let new_messages = &outcome.messages[1 + history.len()..];
            store.append_messages(&session_id, &encode_all(new_messages)).await?;
            let now = chrono::Utc::now();
            store
                .upsert_session(SessionRow {
                    id: session_id.clone(),
                    project_path,
                    project_name,
                    title: prompt.chars().take(64).collect(),
                    mode: mode.to_string(),
                    model: model_name,
                    host,
                    message_count: 0, // recomputed by append_messages
                    created_at: now,
                    updated_at: now,
                })
                .await?;
            debug!(target: "agent", session = %session_id, "session saved");
            Ok(())
        }
        Err(AgentError::Aborted) => {
            eprintln!("run cancelled");
            Ok(())
        }
        Err(e) => {
            eprintln!("error: {e}");
            Ok(())
        }
    }
}

/// `OLLY_DEBUG={1,true}` enables debug logging on stderr; everything else
/// stays quiet so piped stdout carries only the model's answer.
fn init_logging() {
    let debug_enabled = matches!(
        std::env::var("OLLY_DEBUG").as_deref(),
        Ok("1") | Ok("true")
    );
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("error")
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(filter)
        .init();
}

fn open_store() -> anyhow::Result<SessionStore> {
    let dir = olly_config::data_dir().context("no data directory on this platform")?;
    let path = dir.join("olly.db");
    SessionStore::open(&path).with_context(|| format!("opening session db {}", path.display()))
}

/// Stream events to the terminal: content to stdout, tool activity to stderr.
async fn print_events(mut rx: mpsc::Receiver<AgentEvent>) {
    use std::io::Write;
    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::ContentDelta(delta) => {
                print!("{delta}");
                let _ = std::io::stdout().flush();
            }
            AgentEvent::ToolCallStarted { name, .. } => {
                eprintln!("· {name} …");
            }
            AgentEvent::ToolCallFinished { name, is_error, .. } => {
                if is_error {
                    eprintln!("· {name} failed");
                }
            }
            AgentEvent::ToolBlocked { name, reason, .. } => {
                eprintln!("· {name} blocked: {reason}");
            }
            AgentEvent::ContextCompacted { tokens_before, tokens_after, level } => {
                eprintln!("· context compacted ({level}): {tokens_before} → {tokens_after} tokens");
            }
            AgentEvent::StepCompleted(_) | AgentEvent::TurnComplete => {}
        }
    }
}

/// Interactive confirmation on the controlling terminal.
struct TerminalConfirmer;

#[async_trait]
impl ConfirmationHandler for TerminalConfirmer {
    async fn confirm(&self, request: ConfirmationRequest) -> ConfirmationResponse {
        eprintln!("\n[approval needed] {} (risk: {})", request.description, request.risk);
        match &request.preview {
            Some(ConfirmationPreview::Command { command, cwd }) => {
                eprintln!("  $ {command}   (in {cwd})");
            }
            Some(ConfirmationPreview::Content { text, truncated }) => {
                for line in text.lines().take(20) {
                    eprintln!("  | {line}");
                }
                if *truncated {
                    eprintln!("  | …");
                }
            }
            Some(ConfirmationPreview::Diff { before, after, path }) => {
                eprintln!("  --- {path}");
                for line in before.lines().take(10) {
                    eprintln!("  - {line}");
                }
                for line in after.lines().take(10) {
                    eprintln!("  + {line}");
                }
            }
            None => {}
        }
        eprint!("allow? [y]es / [a]lways / [n]o / [d]eny always: ");

        let mut line = String::new();
        let mut reader = tokio::io::BufReader::new(tokio::io::stdin());
        if reader.read_line(&mut line).await.is_err() {
            return ConfirmationResponse::Deny;
        }
        match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => ConfirmationResponse::Allow,
            "a" | "always" => ConfirmationResponse::AllowAlways,
            "d" => ConfirmationResponse::DenyAlways,
            _ => ConfirmationResponse::Deny,
        }
    }
}
