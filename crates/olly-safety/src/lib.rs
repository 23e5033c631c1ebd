// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod audit;
mod commands;
mod confirm;
mod gateway;
mod paths;
mod redact;

pub use audit::{AuditEntry, AuditLog, AuditResult};
pub use commands::{split_segments, validate_command, CommandVerdict};
pub use confirm::{
    AutoApprover, ConfirmationHandler, ConfirmationPreview, ConfirmationRequest,
    ConfirmationResponse,
};
pub use gateway::{Decision, SafetyGateway};
pub use paths::{matches_pattern, validate_path};
pub use redact::{redact_text, redact_value, sanitized_env};
