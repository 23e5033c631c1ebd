// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod edit_file;
mod glob;
mod grep;
mod list_dir;
mod read_file;
mod run_command;
mod todo;
mod write_file;

pub use edit_file::EditFileTool;
pub use glob::GlobTool;
pub use grep::GrepTool;
pub use list_dir::ListDirTool;
pub use read_file::ReadFileTool;
pub use run_command::RunCommandTool;
pub use todo::{TodoReadTool, TodoWriteTool};
pub use write_file::WriteFileTool;
