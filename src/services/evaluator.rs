//! Supervisor evaluation of reviewed Minion work, with bounded revision
//! routing.

use chrono::Utc;

use crate::domain::models::evaluation::{CheckScore, EvaluationResult, RevisionRequest};
use crate::domain::models::review::{CheckStatus, ChecksReport, ReviewDecision, ReviewResult};

/// Maximum bounded revisions per issue (so at most `MAX_REVISIONS + 1`
/// total attempts).
pub const MAX_REVISIONS: u32 = 2;

/// Identifies the work unit being evaluated.
#[derive(Debug, Clone)]
pub struct EvaluationTarget {
    pub repo: String,
    pub pr_number: u64,
    pub issue_number: u64,
    pub branch: String,
    pub revision_number: u32,
}

/// Maps check and review outcomes to an evaluation verdict.
pub struct Evaluator {
    max_revisions: u32,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(MAX_REVISIONS)
    }
}

impl Evaluator {
    pub fn new(max_revisions: u32) -> Self {
        Self { max_revisions }
    }

    /// Another revision is allowed below the bound.
    pub fn can_revise(&self, revision_number: u32) -> bool {
        revision_number < self.max_revisions
    }

    /// Evaluate one revision's checks and review.
    ///
    /// Emits a revision request when the overall verdict is NEEDS_REVISION
    /// and the revision bound has not been reached; at the bound the PR is
    /// left for human attention.
    pub fn evaluate(
        &self,
        checks: &ChecksReport,
        review: &ReviewResult,
        target: &EvaluationTarget,
    ) -> (EvaluationResult, Option<RevisionRequest>) {
        let result = Self::score(checks, review, target);

        let revision_request = if result.overall() == CheckScore::NeedsRevision
            && self.can_revise(target.revision_number)
        {
            Some(RevisionRequest {
                repo: target.repo.clone(),
                pr_number: target.pr_number,
                issue_number: target.issue_number,
                branch: target.branch.clone(),
                feedback: result.combined_feedback(),
                revision_number: target.revision_number + 1,
            })
        } else {
            None
        };

        (result, revision_request)
    }

    fn score(
        checks: &ChecksReport,
        review: &ReviewResult,
        target: &EvaluationTarget,
    ) -> EvaluationResult {
        let find_failed = |names: &[&str]| -> Option<String> {
            checks.results.iter().find_map(|r| {
                let name = r.name.to_lowercase();
                (r.status == CheckStatus::Failed && names.iter().any(|n| name.contains(n)))
                    .then(|| r.message.clone())
            })
        };

        let (test_score, test_feedback) = match find_failed(&["pytest", "tests"]) {
            Some(message) => (CheckScore::NeedsRevision, message),
            None => (CheckScore::Pass, String::new()),
        };

        let (lint_score, lint_feedback) = match find_failed(&["ruff", "lint"]) {
            Some(message) => (CheckScore::NeedsRevision, message),
            None => (CheckScore::Pass, String::new()),
        };

        let (review_score, review_feedback) = if review.decision == ReviewDecision::RequestChanges {
            let mut feedback = review.summary.clone();
            if !review.issues.is_empty() {
                feedback.push('\n');
                feedback.push_str(
                    &review
                        .issues
                        .iter()
                        .map(|i| format!("- {i}"))
                        .collect::<Vec<_>>()
                        .join("\n"),
                );
            }
            (CheckScore::NeedsRevision, feedback)
        } else {
            (CheckScore::Pass, String::new())
        };

        EvaluationResult {
            pr_number: target.pr_number,
            repo: target.repo.clone(),
            test_score,
            lint_score,
            review_score,
            revision_number: target.revision_number,
            test_feedback,
            lint_feedback,
            review_feedback,
            timestamp: Utc::now(),
        }
    }
}
