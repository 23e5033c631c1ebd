// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use olly_store::{SessionStore, TodoDraft, TodoItem, TodoStatus};

use crate::cancel::CancelToken;
use crate::tool::{RiskLevel, Tool, ToolCall, ToolContext, ToolOutput};

pub struct TodoWriteTool {
    store: SessionStore,
}

impl TodoWriteTool {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Replace the session's task list. Statuses: pending, in_progress (only ONE\n\
         at a time), completed, cancelled. Calling todo_write replaces the entire\n\
         list, not a merge — include every item you want to keep. Use for\n\
         multi-step tasks (3+ steps); mark items complete immediately after\n\
         finishing them."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session the list belongs to (defaults to the current session)"
                },
                "todos": {
                    "type": "array",
                    "description": "Full replacement list of todo items",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string", "description": "Unique id for the task" },
                            "content": { "type": "string", "description": "Description of the task" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed", "cancelled"],
                                "description": "Current status of the task"
                            },
                            "priority": {
                                "type": "string",
                                "description": "low | medium | high (default medium)"
                            }
                        },
                        "required": ["id", "content", "status"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["todos"],
            "additionalProperties": false
        })
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::Safe
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext, _cancel: &CancelToken) -> ToolOutput {
        let session_id = call
            .args
            .get("session_id")
            .and_then(|v| v.as_str())
            .unwrap_or(&ctx.session_id)
            .to_string();
        let todos_value = match call.args.get("todos").and_then(|v| v.as_array()) {
            Some(arr) => arr.clone(),
            None => return ToolOutput::err(call.index, "missing 'todos' array"),
        };

        let mut drafts: Vec<TodoDraft> = Vec::with_capacity(todos_value.len());
        for item in &todos_value {
            let id = match item.get("id").and_then(|v| v.as_str()) {
                Some(s) => s.to_string(),
                None => return ToolOutput::err(call.index, "todo item missing 'id'"),
            };
            let content = match item.get("content").and_then(|v| v.as_str()) {
                Some(s) => s.to_string(),
                None => {
                    return ToolOutput::err(call.index, format!("todo '{id}' missing 'content'"))
                }
            };
            let status_str = match item.get("status").and_then(|v| v.as_str()) {
                Some(s) => s,
                None => {
                    return ToolOutput::err(call.index, format!("todo '{id}' missing 'status'"))
                }
            };
            let status = match TodoStatus::parse(status_str) {
                Some(s) => s,
                None => {
                    return ToolOutput::err(
                        call.index,
                        format!("invalid status '{status_str}' for todo '{id}'"),
                    )
                }
            };
            let priority = item
                .get("priority")
                .and_then(|v| v.as_str())
                .unwrap_or("medium")
                .to_string();
            drafts.push(TodoDraft { id, content, status, priority });
        }

        // At most one in_progress per session, enforced here rather than in
        // the schema.
        let in_progress = drafts.iter().filter(|t| t.status == TodoStatus::InProgress).count();
        if in_progress > 1 {
            return ToolOutput::err(
                call.index,
                "at most one todo can be 'in_progress' at a time",
            );
        }

        debug!(session = %session_id, count = drafts.len(), "todo_write tool");

        match self.store.replace_todos(&session_id, drafts).await {
            Ok(stored) => ToolOutput::ok(call.index, render_todos("Todos updated", &stored)),
            Err(e) => ToolOutput::err(call.index, format!("todo store error: {e}")),
        }
    }
}

pub struct TodoReadTool {
    store: SessionStore,
}

impl TodoReadTool {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for TodoReadTool {
    fn name(&self) -> &str {
        "todo_read"
    }

    fn description(&self) -> &str {
        "Read the session's current task list."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session to read (defaults to the current session)"
                }
            },
            "additionalProperties": false
        })
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::Safe
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext, _cancel: &CancelToken) -> ToolOutput {
        let session_id = call
            .args
            .get("session_id")
            .and_then(|v| v.as_str())
            .unwrap_or(&ctx.session_id)
            .to_string();

        debug!(session = %session_id, "todo_read tool");

        match self.store.list_todos(&session_id).await {
            Ok(todos) if todos.is_empty() => ToolOutput::ok(call.index, "No todos."),
            Ok(todos) => ToolOutput::ok(call.index, render_todos("Todos", &todos)),
            Err(e) => ToolOutput::err(call.index, format!("todo store error: {e}")),
        }
    }
}

fn render_todos(heading: &str, items: &[TodoItem]) -> String {
    if items.is_empty() {
        return "Todo list cleared.".to_string();
    }
    let lines: Vec<String> = items
        .iter()
        .map(|t| {
            let icon = match t.status {
                TodoStatus::Completed => "✓",
                TodoStatus::InProgress => "→",
                TodoStatus::Cancelled => "✗",
                TodoStatus::Pending => "○",
            };
            format!("{icon} [{}] {}", t.id, t.content)
        })
        .collect();
    format!("{heading}:\n{}", lines.join("\n"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tool::ToolContext;

    fn setup() -> (TodoWriteTool, TodoReadTool, ToolContext) {
        let store = SessionStore::in_memory().unwrap();
        let ctx = ToolContext { session_id: "s1".into(), ..Default::default() };
        (TodoWriteTool::new(store.clone()), TodoReadTool::new(store), ctx)
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall::new(0, name, args)
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (write, read, ctx) = setup();
        let out = write
            .execute(
                &call(
                    "todo_write",
                    json!({"todos": [
                        {"id": "1", "content": "analyze", "status": "in_progress"},
                        {"id": "2", "content": "implement", "status": "pending"}
                    ]}),
                ),
                &ctx,
                &CancelToken::new(),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("→ [1] analyze"));

        let out = read
            .execute(&call("todo_read", json!({})), &ctx, &CancelToken::new())
            .await;
        assert!(out.content.contains("○ [2] implement"), "{}", out.content);
    }

    #[tokio::test]
    async fn write_replaces_rather_than_merges() {
        let (write, read, ctx) = setup();
        write
            .execute(
                &call(
                    "todo_write",
                    json!({"todos": [{"id": "1", "content": "old", "status": "pending"}]}),
                ),
                &ctx,
                &CancelToken::new(),
            )
            .await;
        write
            .execute(
                &call(
                    "todo_write",
                    json!({"todos": [{"id": "2", "content": "only me", "status": "pending"}]}),
                ),
                &ctx,
                &CancelToken::new(),
            )
            .await;
        let out = read
            .execute(&call("todo_read", json!({})), &ctx, &CancelToken::new())
            .await;
        assert!(!out.content.contains("old"));
        assert!(out.content.contains("only me"));
    }

    #[tokio::test]
    async fn two_in_progress_items_are_rejected() {
        let (write, _, ctx) = setup();
        let out = write
            .execute(
                &call(
                    "todo_write",
                    json!({"todos": [
                        {"id": "1", "content": "a", "status": "in_progress"},
                        {"id": "2", "content": "b", "status": "in_progress"}
                    ]}),
                ),
                &ctx,
                &CancelToken::new(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("at most one"));
    }

    #[tokio::test]
    async fn invalid_status_is_rejected() {
        let (write, _, ctx) = setup();
        let out = write
            .execute(
                &call(
                    "todo_write",
                    json!({"todos": [{"id": "1", "content": "a", "status": "doing"}]}),
                ),
                &ctx,
                &CancelToken::new(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("invalid status"));
    }

    #[tokio::test]
    async fn empty_session_reads_as_no_todos() {
        let (_, read, ctx) = setup();
        let out = read
            .execute(&call("todo_read", json!({})), &ctx, &CancelToken::new())
            .await;
        assert_eq!(out.content, "No todos.");
    }

    #[tokio::test]
    async fn explicit_session_id_overrides_context() {
        let (write, read, ctx) = setup();
        write
            .execute(
                &call(
                    "todo_write",
                    json!({"session_id": "other", "todos": [
                        {"id": "1", "content": "elsewhere", "status": "pending"}
                    ]}),
                ),
                &ctx,
                &CancelToken::new(),
            )
            .await;
        // Current session still empty
        let out = read
            .execute(&call("todo_read", json!({})), &ctx, &CancelToken::new())
            .await;
        assert_eq!(out.content, "No todos.");
        let out = read
            .execute(
                &call("todo_read", json!({"session_id": "other"})),
                &ctx,
                &CancelToken::new(),
            )
            .await;
        assert!(out.content.contains("elsewhere"));
    }
}
