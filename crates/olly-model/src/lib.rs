// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod client;
pub mod mock;
mod ollama;
mod types;

pub use client::{ChunkStream, ModelClient};
pub use ollama::OllamaClient;
pub use types::{estimate_tokens, ChatChunk, ChatRequest, Message, Role, ToolCallRec, ToolSchema};
