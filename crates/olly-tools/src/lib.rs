// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod builtin;
mod cancel;
mod registry;
pub mod schema;
pub mod tool;

pub use builtin::{
    EditFileTool, GlobTool, GrepTool, ListDirTool, ReadFileTool, RunCommandTool, TodoReadTool,
    TodoWriteTool, WriteFileTool,
};
pub use cancel::CancelToken;
pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{RiskLevel, Tool, ToolCall, ToolContext, ToolOutput};
