// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{ChatChunk, ChatRequest};

pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<ChatChunk>> + Send>>;

/// The model transport seen by the agent loop: a streamed chat call plus a
/// context-window probe.  The loop treats a probe failure as "window
/// unknown" and disables compaction rather than aborting the run.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a chat request and return a streaming response.
    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChunkStream>;

    /// Query the host for the model's context window, in tokens.
    async fn context_window(&self) -> anyhow::Result<u32>;
}
