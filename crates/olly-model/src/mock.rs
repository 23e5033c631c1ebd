// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Scripted mock model for tests.  Each call to `chat` pops the next chunk
//! script from the front of the queue, so tests can specify exact chunk
//! sequences, including tool calls, without network access.
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use serde_json::{Map, Value};

use crate::{
    client::{ChunkStream, ModelClient},
    ChatChunk, ChatRequest, ToolCallRec,
};

pub struct ScriptedModel {
    scripts: Mutex<Vec<Vec<ChatChunk>>>,
    /// Context window reported by `context_window`; `None` simulates a host
    /// whose /api/show probe fails (compaction disabled).
    context_window: Option<u32>,
    /// Every `ChatRequest` seen by this model, for test inspection.
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedModel {
    /// Build a model from an ordered list of per-call chunk scripts.
    pub fn new(scripts: Vec<Vec<ChatChunk>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            context_window: Some(8192),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Report `window` from the context probe (`None` = probe failure).
    pub fn with_context_window(mut self, window: Option<u32>) -> Self {
        self.context_window = window;
        self
    }

    /// Convenience: a model that always answers with a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![vec![ChatChunk::text(reply), ChatChunk::done()]])
    }

    /// Convenience: one turn that calls `tool(args)`, then a text reply.
    pub fn tool_then_text(
        tool: impl Into<String>,
        arguments: Map<String, Value>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![
                ChatChunk {
                    content: None,
                    tool_calls: vec![ToolCallRec::new(tool, arguments)],
                    done: false,
                },
                ChatChunk::done(),
            ],
            vec![ChatChunk::text(final_text), ChatChunk::done()],
        ])
    }

    /// A turn script consisting of a single batch of tool calls.
    pub fn calls_turn(calls: Vec<ToolCallRec>) -> Vec<ChatChunk> {
        vec![
            ChatChunk { content: None, tool_calls: calls, done: false },
            ChatChunk::done(),
        ]
    }

    /// A turn script consisting of streamed text only.
    pub fn text_turn(text: impl Into<String>) -> Vec<ChatChunk> {
        vec![ChatChunk::text(text), ChatChunk::done()]
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted-mock"
    }

    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChunkStream> {
        self.requests.lock().unwrap().push(req);
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            anyhow::bail!("mock script exhausted");
        }
        let chunks: Vec<anyhow::Result<ChatChunk>> =
            scripts.remove(0).into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn context_window(&self) -> anyhow::Result<u32> {
        match self.context_window {
            Some(n) => Ok(n),
            None => anyhow::bail!("mock probe disabled"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
