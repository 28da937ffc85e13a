//! Failure-memory data model.
//!
//! Tool failures are classified by kind, aggregated into per-tool patterns,
//! and converted into confidence penalties consumed when analyzing a new
//! request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Classified kind of a tool failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FileNotFound,
    MissingModule,
    InvalidJson,
    SyntaxError,
    PermissionDenied,
    Timeout,
    CommandFailed,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileNotFound => "file_not_found",
            Self::MissingModule => "missing_module",
            Self::InvalidJson => "invalid_json",
            Self::SyntaxError => "syntax_error",
            Self::PermissionDenied => "permission_denied",
            Self::Timeout => "timeout",
            Self::CommandFailed => "command_failed",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse_str(s: &str) -> Self {
        match s {
            "file_not_found" => Self::FileNotFound,
            "missing_module" => Self::MissingModule,
            "invalid_json" => Self::InvalidJson,
            "syntax_error" => Self::SyntaxError,
            "permission_denied" => Self::PermissionDenied,
            "timeout" => Self::Timeout,
            "command_failed" => Self::CommandFailed,
            _ => Self::Unknown,
        }
    }
}

/// A single recorded tool failure event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    pub error_kind: ErrorKind,
    /// Truncated to 500 characters at record time.
    pub error_message: String,
    /// Sanitized subset of the tool arguments (safe keys only).
    pub args_context: BTreeMap<String, String>,
    pub resolved: bool,
}

/// Aggregated failure pattern for a (tool, error kind) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePattern {
    pub tool_name: String,
    pub error_kind: ErrorKind,
    pub occurrence_count: u32,
    pub resolved_count: u32,
}

impl FailurePattern {
    /// Fraction of occurrences that were later resolved.
    pub fn resolution_rate(&self) -> f64 {
        if self.occurrence_count == 0 {
            return 0.0;
        }
        f64::from(self.resolved_count) / f64::from(self.occurrence_count)
    }

    /// Confidence penalty for this pattern.
    ///
    /// Base `min(count * 0.03, 0.15)`, discounted by half the resolution
    /// rate, hard-capped at 0.20.
    pub fn confidence_penalty(&self) -> f64 {
        let base = (f64::from(self.occurrence_count) * 0.03).min(0.15);
        let penalty = base * (1.0 - self.resolution_rate() * 0.5);
        penalty.min(0.20)
    }
}

/// Aggregated failure context handed to the cognition layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureContext {
    pub patterns: Vec<FailurePattern>,
    pub warning_messages: Vec<String>,
}

impl FailureContext {
    /// Total confidence penalty across all patterns, capped at 0.25.
    pub fn total_penalty(&self) -> f64 {
        let raw: f64 = self.patterns.iter().map(FailurePattern::confidence_penalty).sum();
        raw.min(0.25)
    }
}
