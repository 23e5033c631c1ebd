// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use olly_config::RiskLevel;

/// What the operator is shown before approving a mutating call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfirmationPreview {
    Command {
        command: String,
        cwd: String,
    },
    Content {
        text: String,
        #[serde(default)]
        truncated: bool,
    },
    Diff {
        before: String,
        after: String,
        path: String,
    },
}

/// The structured artifact handed to the host when a call needs approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub id: String,
    pub tool: String,
    pub args: Value,
    pub risk: RiskLevel,
    /// One-line human description of what the call would do.
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<ConfirmationPreview>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationResponse {
    Allow,
    /// Allow, and stop asking for this tool for the rest of the session.
    AllowAlways,
    Deny,
    /// Deny, and auto-deny this tool for the rest of the session.
    DenyAlways,
}

impl ConfirmationResponse {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allow | Self::AllowAlways)
    }
}

/// The suspending boundary between the core and the host.
///
/// A UI resolves this when the user clicks; headless runs plug in an
/// auto-approver.  The loop awaits the handoff, so a slow human answer
/// simply parks the sequential lane.
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn confirm(&self, request: ConfirmationRequest) -> ConfirmationResponse;
}

/// Fixed-answer handler for autonomous runs and tests.
pub struct AutoApprover {
    response: ConfirmationResponse,
}

impl AutoApprover {
    pub fn allow_all() -> Self {
        Self { response: ConfirmationResponse::Allow }
    }

    pub fn deny_all() -> Self {
        Self { response: ConfirmationResponse::Deny }
    }

    pub fn with(response: ConfirmationResponse) -> Self {
        Self { response }
    }
}

#[async_trait]
impl ConfirmationHandler for AutoApprover {
    async fn confirm(&self, _request: ConfirmationRequest) -> ConfirmationResponse {
        self.response
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn allow_variants_are_allowed() {
        assert!(ConfirmationResponse::Allow.is_allowed());
        assert!(ConfirmationResponse::AllowAlways.is_allowed());
        assert!(!ConfirmationResponse::Deny.is_allowed());
        assert!(!ConfirmationResponse::DenyAlways.is_allowed());
    }

    #[test]
    fn request_serialises_with_preview() {
        let req = ConfirmationRequest {
            id: "c1".into(),
            tool: "run_command".into(),
            args: json!({"command": "make"}),
            risk: RiskLevel::Prompt,
            description: "Run `make`".into(),
            preview: Some(ConfirmationPreview::Command {
                command: "make".into(),
                cwd: ".".into(),
            }),
        };
        let text = serde_json::to_string(&req).unwrap();
        assert!(text.contains(r#""type":"command""#), "{text}");
        let back: ConfirmationRequest = serde_json::from_str(&text).unwrap();
        assert_eq!(back.tool, "run_command");
    }

    #[tokio::test]
    async fn auto_approver_returns_fixed_answer() {
        let req = ConfirmationRequest {
            id: "c1".into(),
            tool: "t".into(),
            args: json!({}),
            risk: RiskLevel::High,
            description: String::new(),
            preview: None,
        };
        assert_eq!(
            AutoApprover::allow_all().confirm(req.clone()).await,
            ConfirmationResponse::Allow
        );
        assert_eq!(
            AutoApprover::deny_all().confirm(req).await,
            ConfirmationResponse::Deny
        );
    }
}
