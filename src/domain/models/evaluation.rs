//! Supervisor evaluation of a Minion's reviewed work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Score for a single evaluation axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckScore {
    Pass,
    Fail,
    NeedsRevision,
}

impl CheckScore {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::NeedsRevision => "needs_revision",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "pass" => Some(Self::Pass),
            "fail" => Some(Self::Fail),
            "needs_revision" => Some(Self::NeedsRevision),
            _ => None,
        }
    }
}

/// Result of evaluating a Minion's work on one PR revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub pr_number: u64,
    pub repo: String,
    pub test_score: CheckScore,
    pub lint_score: CheckScore,
    pub review_score: CheckScore,
    pub revision_number: u32,
    pub test_feedback: String,
    pub lint_feedback: String,
    pub review_feedback: String,
    pub timestamp: DateTime<Utc>,
}

impl EvaluationResult {
    /// Overall score: any FAIL wins, then any NEEDS_REVISION, else PASS.
    pub fn overall(&self) -> CheckScore {
        let scores = [self.test_score, self.lint_score, self.review_score];
        if scores.contains(&CheckScore::Fail) {
            CheckScore::Fail
        } else if scores.contains(&CheckScore::NeedsRevision) {
            CheckScore::NeedsRevision
        } else {
            CheckScore::Pass
        }
    }

    /// All axis feedback joined for the revision request.
    pub fn combined_feedback(&self) -> String {
        let mut parts = Vec::new();
        if !self.test_feedback.is_empty() {
            parts.push(format!("Tests: {}", self.test_feedback));
        }
        if !self.lint_feedback.is_empty() {
            parts.push(format!("Lint: {}", self.lint_feedback));
        }
        if !self.review_feedback.is_empty() {
            parts.push(format!("Review: {}", self.review_feedback));
        }
        parts.join("\n")
    }
}

/// Request for a fresh Minion to revise previously reviewed work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionRequest {
    pub repo: String,
    pub pr_number: u64,
    pub issue_number: u64,
    pub branch: String,
    pub feedback: String,
    pub revision_number: u32,
}
