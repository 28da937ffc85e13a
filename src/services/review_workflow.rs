//! Automated PR review workflow orchestration.
//!
//! Fetch PR details, run the deterministic checks, get the LLM review,
//! optionally post it and auto-merge. An exception at any stage produces a
//! partial result with `error` set; it never re-raises.

use std::path::Path;
use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;

use crate::domain::errors::DomainResult;
use crate::domain::models::config::ReviewSettings;
use crate::domain::models::review::{
    ChecksReport, FileChange, PrDetails, ReviewResult,
};
use crate::infrastructure::github::GitHubClient;
use crate::services::checks::CheckRunner;
use crate::services::llm_review::{create_review_summary, LlmReviewer};

/// Result of a complete review workflow.
#[derive(Debug, Clone)]
pub struct WorkflowResult {
    pub pr_details: PrDetails,
    pub llm_result: ReviewResult,
    pub checks_report: Option<ChecksReport>,
    pub review_posted: bool,
    pub merged: bool,
    pub error: Option<String>,
}

impl WorkflowResult {
    /// One-line summary for logs and completion events.
    pub fn summary(&self) -> String {
        let mut parts = vec![
            format!("PR: {}#{}", self.pr_details.repo, self.pr_details.number),
            format!("Decision: {}", self.llm_result.decision.as_str()),
            format!("Confidence: {:.0}%", self.llm_result.confidence * 100.0),
        ];
        if let Some(report) = &self.checks_report {
            parts.push(format!(
                "Checks: {} passed, {} failed",
                report.passed_count(),
                report.failed_count()
            ));
        }
        if self.review_posted {
            parts.push("Review posted: Yes".to_string());
        }
        if self.merged {
            parts.push("Merged: Yes".to_string());
        }
        if let Some(error) = &self.error {
            parts.push(format!("Error: {error}"));
        }
        parts.join(" | ")
    }
}

/// Orchestrates the complete PR review process.
pub struct ReviewWorkflow {
    github: Arc<GitHubClient>,
    reviewer: LlmReviewer,
    settings: ReviewSettings,
}

impl ReviewWorkflow {
    pub fn new(github: Arc<GitHubClient>, reviewer: LlmReviewer, settings: ReviewSettings) -> Self {
        Self {
            github,
            reviewer,
            settings,
        }
    }

    /// Run the complete review workflow on a PR.
    pub async fn review_pr(
        &self,
        repo: &str,
        pr_number: u64,
        post_review: bool,
        auto_merge: bool,
        repo_path: Option<&Path>,
    ) -> WorkflowResult {
        tracing::info!(repo, pr_number, "Starting review workflow");

        let pr_details = match self.fetch_pr_details(repo, pr_number).await {
            Ok(details) => details,
            Err(e) => {
                tracing::error!(error = %e, "Review workflow failed fetching PR");
                return WorkflowResult {
                    pr_details: PrDetails::placeholder(repo, pr_number),
                    llm_result: ReviewResult::comment_with_issue(
                        format!("Review workflow failed: {e}"),
                        e.to_string(),
                    ),
                    checks_report: None,
                    review_posted: false,
                    merged: false,
                    error: Some(e.to_string()),
                };
            }
        };

        let checks_report = if self.settings.run_local_checks {
            if let Some(repo_path) = repo_path {
                tracing::info!("Running local checks");
                let changed: Vec<String> =
                    pr_details.files.iter().map(|f| f.filename.clone()).collect();
                Some(CheckRunner::new(repo_path).run_all_checks(&changed).await)
            } else {
                None
            }
        } else {
            None
        };

        tracing::info!("Getting LLM review");
        let mut llm_result = self.reviewer.review_pr(&pr_details).await;
        if let Some(report) = &checks_report {
            llm_result.checks_passed = report.all_passed();
        }

        let mut error = None;

        let review_posted = if post_review {
            let checks_summary = checks_report.as_ref().map(ChecksReport::get_summary);
            let body = create_review_summary(
                &pr_details,
                &llm_result,
                checks_summary.as_deref(),
                self.settings.min_confidence_for_approve,
            );
            match self
                .github
                .post_review(repo, pr_number, &body, llm_result.decision.as_str())
                .await
            {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to post review");
                    error = Some(e.to_string());
                    false
                }
            }
        } else {
            false
        };

        let mut merged = false;
        if auto_merge
            && self.settings.auto_merge_enabled
            && llm_result.can_auto_merge(self.settings.min_confidence_for_approve)
        {
            tracing::info!("Attempting auto-merge");
            match self
                .github
                .merge_pull_request(repo, pr_number, &self.settings.merge_method)
                .await
            {
                Ok(result) => merged = result,
                Err(e) => {
                    tracing::error!(error = %e, "Auto-merge failed");
                    error = Some(e.to_string());
                }
            }
        }

        let result = WorkflowResult {
            pr_details,
            llm_result,
            checks_report,
            review_posted,
            merged,
            error,
        };
        tracing::info!(summary = result.summary(), "Review workflow complete");
        result
    }

    async fn fetch_pr_details(&self, repo: &str, pr_number: u64) -> DomainResult<PrDetails> {
        let pr = self.github.get_pull_request(repo, pr_number).await?;
        let files = self.github.list_pull_request_files(repo, pr_number).await?;

        let body = pr.body.unwrap_or_default();
        Ok(PrDetails {
            repo: repo.to_string(),
            number: pr.number,
            title: pr.title,
            linked_issue: parse_linked_issue(&body),
            body,
            author: pr.user.map(|u| u.login).unwrap_or_default(),
            base_branch: pr.base.ref_name,
            head_branch: pr.head.ref_name,
            created_at: Some(pr.created_at),
            additions: pr.additions,
            deletions: pr.deletions,
            commits: pr.commits,
            files: files
                .into_iter()
                .map(|f| FileChange {
                    filename: f.filename,
                    status: f.status,
                    additions: f.additions,
                    deletions: f.deletions,
                    patch: f.patch,
                })
                .collect(),
        })
    }
}

/// Extract the issue a PR closes from its body.
fn parse_linked_issue(body: &str) -> Option<u64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)(?:close[sd]?|fix(?:e[sd])?|resolve[sd]?)\s+#(\d+)").expect("valid regex")
    });
    re.captures(body)?.get(1)?.as_str().parse().ok()
}
