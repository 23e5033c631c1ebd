// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! SQLite-backed session store.
//!
//! Sessions, messages, and todos are persisted in a single database
//! (`~/.local/share/olly/olly.db`) opened in WAL mode.  [`rusqlite`] is
//! synchronous; all I/O is bridged to async via [`tokio::task::spawn_blocking`]
//! with the connection behind an `Arc<Mutex<_>>`, so multiple handles may
//! share one database.
//!
//! Schema evolution is tracked in `schema_version(version, applied_at)`;
//! migrations are applied in order on open.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;
use crate::parts::StoredMessage;

type Result<T> = std::result::Result<T, StoreError>;

const MIGRATIONS: &[&str] = &[
    // v1: initial schema
    "CREATE TABLE sessions (
        id            TEXT PRIMARY KEY,
        project_path  TEXT NOT NULL DEFAULT '',
        project_name  TEXT NOT NULL DEFAULT '',
        title         TEXT NOT NULL DEFAULT '',
        mode          TEXT NOT NULL DEFAULT 'build',
        model         TEXT NOT NULL DEFAULT '',
        host          TEXT NOT NULL DEFAULT '',
        message_count INTEGER NOT NULL DEFAULT 0,
        created_at    TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at    TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE messages (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        role       TEXT NOT NULL,
        parts      TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE todos (
        id         TEXT NOT NULL,
        session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        content    TEXT NOT NULL,
        status     TEXT NOT NULL,
        priority   TEXT NOT NULL DEFAULT 'medium',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (session_id, id)
    );

    CREATE INDEX idx_sessions_project    ON sessions (project_path);
    CREATE INDEX idx_sessions_updated_at ON sessions (updated_at DESC);
    CREATE INDEX idx_messages_session    ON messages (session_id);
    CREATE INDEX idx_messages_created_at ON messages (created_at);",
];

// ─── Row types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: String,
    pub project_path: String,
    pub project_name: String,
    pub title: String,
    pub mode: String,
    pub model: String,
    pub host: String,
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TodoStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TodoStatus::Pending => "pending",
            TodoStatus::InProgress => "in_progress",
            TodoStatus::Completed => "completed",
            TodoStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TodoStatus::Pending),
            "in_progress" => Some(TodoStatus::InProgress),
            "completed" => Some(TodoStatus::Completed),
            "cancelled" => Some(TodoStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub session_id: String,
    pub content: String,
    pub status: TodoStatus,
    pub priority: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input shape for [`SessionStore::replace_todos`]: everything except the
/// timestamps, which the store owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoDraft {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    #[serde(default = "default_priority")]
    pub priority: String,
}

fn default_priority() -> String {
    "medium".into()
}

// ─── Store ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SessionStore {
    /// Opens (or creates) a database at `path` and applies migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        Self::from_connection(Connection::open(path.as_ref())?)
    }

    /// Opens an ephemeral in-memory database (data lost on drop).
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\
             PRAGMA foreign_keys = ON;\
             PRAGMA busy_timeout = 5000;",
        )?;
        apply_migrations(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Bridges a synchronous closure onto the tokio blocking thread pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|e| StoreError::Lock(e.to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    // ── Sessions ──────────────────────────────────────────────────────────────

    /// Insert or update a session's metadata.
    pub async fn upsert_session(&self, row: SessionRow) -> Result<()> {
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO sessions
                   (id, project_path, project_name, title, mode, model, host,
                    message_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                   project_path = excluded.project_path,
                   project_name = excluded.project_name,
                   title        = excluded.title,
                   mode         = excluded.mode,
                   model        = excluded.model,
                   host         = excluded.host,
                   updated_at   = excluded.updated_at",
                params![
                    row.id,
                    row.project_path,
                    row.project_name,
                    row.title,
                    row.mode,
                    row.model,
                    row.host,
                    row.message_count,
                    row.created_at.to_rfc3339(),
                    row.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<SessionRow>> {
        let id = id.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT id, project_path, project_name, title, mode, model, host,
                        message_count, created_at, updated_at
                 FROM sessions WHERE id = ?1",
                params![id],
                row_to_session,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    /// Most recently updated session for `project_path` (drives `--continue`).
    pub async fn most_recent_session(&self, project_path: &str) -> Result<Option<SessionRow>> {
        let project_path = project_path.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT id, project_path, project_name, title, mode, model, host,
                        message_count, created_at, updated_at
                 FROM sessions WHERE project_path = ?1
                 ORDER BY updated_at DESC LIMIT 1",
                params![project_path],
                row_to_session,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    // ── Messages ──────────────────────────────────────────────────────────────

    /// Append messages to a session, bumping `message_count` and `updated_at`.
    pub async fn append_messages(
        &self,
        session_id: &str,
        messages: &[StoredMessage],
    ) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let session_id = session_id.to_string();
        let serialized: Vec<(String, String)> = messages
            .iter()
            .map(|m| {
                Ok((
                    role_str(m).to_string(),
                    serde_json::to_string(&m.parts)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(session = %session_id, count = serialized.len(), "appending messages");

        self.blocking(move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO sessions (id) VALUES (?1)",
                params![session_id],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO messages (session_id, role, parts, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (role, parts) in &serialized {
                    stmt.execute(params![session_id, role, parts, Utc::now().to_rfc3339()])?;
                }
            }
            tx.execute(
                "UPDATE sessions SET
                   message_count = (SELECT COUNT(*) FROM messages WHERE session_id = ?1),
                   updated_at = ?2
                 WHERE id = ?1",
                params![session_id, Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// All messages for a session, in insertion order.
    pub async fn load_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>> {
        let session_id = session_id.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT role, parts FROM messages
                 WHERE session_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![session_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (role, parts_json) = row?;
                out.push(StoredMessage {
                    role: parse_role(&role),
                    parts: serde_json::from_str(&parts_json)?,
                });
            }
            Ok(out)
        })
        .await
    }

    // ── Todos ─────────────────────────────────────────────────────────────────

    /// Replace the full todo list for a session.
    ///
    /// `created_at` is preserved for ids that already existed; everything
    /// else is stamped now.  Returns the stored list.
    pub async fn replace_todos(
        &self,
        session_id: &str,
        todos: Vec<TodoDraft>,
    ) -> Result<Vec<TodoItem>> {
        let session_id = session_id.to_string();
        self.blocking(move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO sessions (id) VALUES (?1)",
                params![session_id],
            )?;

            // Remember original creation times before the delete.
            let mut existing: std::collections::HashMap<String, String> =
                std::collections::HashMap::new();
            {
                let mut stmt = tx.prepare(
                    "SELECT id, created_at FROM todos WHERE session_id = ?1",
                )?;
                let rows = stmt.query_map(params![session_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                for row in rows {
                    let (id, created) = row?;
                    existing.insert(id, created);
                }
            }

            tx.execute("DELETE FROM todos WHERE session_id = ?1", params![session_id])?;

            let now = Utc::now().to_rfc3339();
            let mut stored = Vec::with_capacity(todos.len());
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO todos (id, session_id, content, status, priority,
                                        created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for draft in todos {
                    let created_at = existing.get(&draft.id).cloned().unwrap_or_else(|| now.clone());
                    stmt.execute(params![
                        draft.id,
                        session_id,
                        draft.content,
                        draft.status.as_str(),
                        draft.priority,
                        created_at,
                        now,
                    ])?;
                    stored.push(TodoItem {
                        id: draft.id,
                        session_id: session_id.clone(),
                        content: draft.content,
                        status: draft.status,
                        priority: draft.priority,
                        created_at: parse_ts(&created_at),
                        updated_at: parse_ts(&now),
                    });
                }
            }
            tx.commit()?;
            Ok(stored)
        })
        .await
    }

    pub async fn list_todos(&self, session_id: &str) -> Result<Vec<TodoItem>> {
        let session_id = session_id.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, content, status, priority, created_at, updated_at
                 FROM todos WHERE session_id = ?1 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![session_id], |row| {
                Ok(TodoItem {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    content: row.get(2)?,
                    status: TodoStatus::parse(&row.get::<_, String>(3)?)
                        .unwrap_or(TodoStatus::Pending),
                    priority: row.get(4)?,
                    created_at: parse_ts(&row.get::<_, String>(5)?),
                    updated_at: parse_ts(&row.get::<_, String>(6)?),
                })
            })?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(StoreError::from)
        })
        .await
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn apply_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;
    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i64;
        if version <= current {
            continue;
        }
        debug!(version, "applying schema migration");
        conn.execute_batch(migration)?;
        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            params![version, Utc::now().to_rfc3339()],
        )?;
    }
    Ok(())
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        project_path: row.get(1)?,
        project_name: row.get(2)?,
        title: row.get(3)?,
        mode: row.get(4)?,
        model: row.get(5)?,
        host: row.get(6)?,
        message_count: row.get::<_, i64>(7)?.max(0) as u64,
        created_at: parse_ts(&row.get::<_, String>(8)?),
        updated_at: parse_ts(&row.get::<_, String>(9)?),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn role_str(m: &StoredMessage) -> &'static str {
    match m.role {
        olly_model::Role::System => "system",
        olly_model::Role::User => "user",
        olly_model::Role::Assistant => "assistant",
        olly_model::Role::Tool => "tool",
    }
}

fn parse_role(s: &str) -> olly_model::Role {
    match s {
        "system" => olly_model::Role::System,
        "assistant" => olly_model::Role::Assistant,
        "tool" => olly_model::Role::Tool,
        _ => olly_model::Role::User,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
