// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use futures::StreamExt;
use tokio::sync::mpsc;

use olly_model::{ChunkStream, ToolCallRec};
use olly_tools::CancelToken;

use crate::events::AgentEvent;
use crate::outcome::AgentError;

/// Accumulated result of one model turn.
#[derive(Debug, Default)]
pub struct StreamOutcome {
    pub content: String,
    pub tool_calls: Vec<ToolCallRec>,
}

/// Drain a model stream, forwarding deltas live.
///
/// Content fragments go out as [`AgentEvent::ContentDelta`]; tool calls are
/// forwarded as [`AgentEvent::ToolCallStarted`] with their accumulating
/// index.  If the cancellation signal fires mid-stream this returns
/// [`AgentError::Aborted`] without consuming further chunks; a stream error
/// while cancelled is also reported as `Aborted` (killing the connection is
/// how cancellation usually surfaces).
pub async fn collect_stream(
    mut stream: ChunkStream,
    events: &mpsc::Sender<AgentEvent>,
    cancel: &CancelToken,
) -> Result<StreamOutcome, AgentError> {
    let mut outcome = StreamOutcome::default();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Aborted),
            chunk = stream.next() => chunk,
        };
        let chunk = match chunk {
            None => break,
            Some(Ok(c)) => c,
            Some(Err(e)) => {
                if cancel.is_cancelled() {
                    return Err(AgentError::Aborted);
                }
                return Err(AgentError::ModelError { message: e.to_string() });
            }
        };

        if let Some(content) = &chunk.content {
            if !content.is_empty() {
                outcome.content.push_str(content);
                let _ = events.send(AgentEvent::ContentDelta(content.clone())).await;
            }
        }
        for call in chunk.tool_calls {
            let index = outcome.tool_calls.len();
            let _ = events
                .send(AgentEvent::ToolCallStarted {
                    index,
                    name: call.name.clone(),
                    args: serde_json::Value::Object(call.arguments.clone()),
                })
                .await;
            outcome.tool_calls.push(call);
        }
        if chunk.done {
            break;
        }
    }

    Ok(outcome)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
