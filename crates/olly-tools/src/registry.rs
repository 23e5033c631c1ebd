// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use olly_config::AgentMode;

use crate::tool::{RiskLevel, Tool};

/// A tool schema – mirrors olly_model::ToolSchema but keeps the tools crate
/// independent from the model crate.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Central registry holding all available tools.
///
/// Immutable after construction; shared by reference across the executor's
/// parallel lane.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Risk class for `name`; unknown tools default to `Prompt` so they can
    /// never slip into the parallel lane.
    pub fn risk(&self, name: &str) -> RiskLevel {
        self.tools
            .get(name)
            .map(|t| t.risk())
            .unwrap_or(RiskLevel::Prompt)
    }

    /// Whether `name` is available in `mode`.  Unknown tools are unavailable.
    pub fn available_in(&self, name: &str, mode: AgentMode) -> bool {
        self.tools
            .get(name)
            .is_some_and(|t| t.modes().contains(&mode))
    }

    /// Produce schemas only for tools available in the given mode, sorted by
    /// name for a stable wire order.
    pub fn schemas_for_mode(&self, mode: AgentMode) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .filter(|t| t.modes().contains(&mode))
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn names_for_mode(&self, mode: AgentMode) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .values()
            .filter(|t| t.modes().contains(&mode))
            .map(|t| t.name().to_string())
            .collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::cancel::CancelToken;
    use crate::tool::{ToolCall, ToolContext, ToolOutput};

    struct EchoTool {
        name: &'static str,
        risk: RiskLevel,
        modes: &'static [AgentMode],
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn risk(&self) -> RiskLevel {
            self.risk
        }
        fn modes(&self) -> &[AgentMode] {
            self.modes
        }
        async fn execute(&self, call: &ToolCall, _: &ToolContext, _: &CancelToken) -> ToolOutput {
            ToolOutput::ok(call.index, format!("echo:{}", call.args))
        }
    }

    const BOTH: &[AgentMode] = &[AgentMode::Plan, AgentMode::Build];
    const BUILD_ONLY: &[AgentMode] = &[AgentMode::Build];

    fn echo(name: &'static str, risk: RiskLevel, modes: &'static [AgentMode]) -> EchoTool {
        EchoTool { name, risk, modes }
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::new();
        reg.register(echo("echo", RiskLevel::Safe, BOTH));
        assert!(reg.get("echo").is_some());
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn unknown_tool_risk_is_prompt() {
        let reg = ToolRegistry::new();
        assert_eq!(reg.risk("mystery"), RiskLevel::Prompt);
    }

    #[test]
    fn mode_filter_hides_build_only_tools_in_plan() {
        let mut reg = ToolRegistry::new();
        reg.register(echo("reader", RiskLevel::Safe, BOTH));
        reg.register(echo("writer", RiskLevel::Prompt, BUILD_ONLY));
        assert_eq!(reg.names_for_mode(AgentMode::Plan), vec!["reader"]);
        assert_eq!(reg.names_for_mode(AgentMode::Build), vec!["reader", "writer"]);
        assert!(!reg.available_in("writer", AgentMode::Plan));
        assert!(reg.available_in("writer", AgentMode::Build));
    }

    #[test]
    fn schemas_are_sorted_by_name() {
        let mut reg = ToolRegistry::new();
        reg.register(echo("zeta", RiskLevel::Safe, BOTH));
        reg.register(echo("alpha", RiskLevel::Safe, BOTH));
        let names: Vec<String> = reg
            .schemas_for_mode(AgentMode::Build)
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn registering_same_name_twice_overwrites() {
        let mut reg = ToolRegistry::new();
        reg.register(echo("t", RiskLevel::Safe, BOTH));
        reg.register(echo("t", RiskLevel::High, BOTH));
        assert_eq!(reg.risk("t"), RiskLevel::High);
    }
}
