// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod loader;
mod schema;

pub use loader::{config_file_path, data_dir, load};
pub use schema::{
    AgentConfig, AgentMode, AutonomyLevel, Config, ModelConfig, RiskLevel, SafetyConfig,
    ToolOverride,
};
