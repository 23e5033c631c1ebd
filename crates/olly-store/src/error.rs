// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store lock poisoned: {0}")]
    Lock(String),
    #[error("blocking task failed: {0}")]
    Task(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
}
