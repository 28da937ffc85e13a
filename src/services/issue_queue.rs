//! GitHub issue queue scanning for the Overlord.
//!
//! Finds issues tagged ready-to-work across the watched repositories,
//! drives their label transitions, and enforces the API rate-limit budget
//! before every sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::domain::errors::DomainResult;
use crate::domain::models::config::GithubConfig;
use crate::domain::models::issue::QueuedIssue;
use crate::infrastructure::github::models::RateLimitBudget;
use crate::infrastructure::github::GitHubClient;

/// Don't operate when fewer requests than this remain.
pub const RATE_LIMIT_THRESHOLD: u64 = 100;
/// Requests budgeted per watched repository per sweep.
pub const REQUESTS_PER_SWEEP: u64 = 10;

/// Scans repositories for issues ready to work on.
pub struct IssueQueue {
    github: Arc<GitHubClient>,
    config: GithubConfig,
}

impl IssueQueue {
    pub fn new(github: Arc<GitHubClient>, config: GithubConfig) -> Self {
        Self { github, config }
    }

    pub fn watched_repos(&self) -> &[String] {
        &self.config.watched_repos
    }

    /// Scan all watched repos for ready issues, sorted by priority then
    /// age.
    pub async fn scan_queue(&self) -> Vec<QueuedIssue> {
        let mut all_issues = Vec::new();

        for repo in &self.config.watched_repos {
            match self.scan_repo(repo).await {
                Ok(issues) => all_issues.extend(issues),
                Err(e) => {
                    tracing::error!(repo, error = %e, "Error scanning repo");
                }
            }
        }

        all_issues.sort_by_key(QueuedIssue::sort_key);
        all_issues
    }

    async fn scan_repo(&self, repo: &str) -> DomainResult<Vec<QueuedIssue>> {
        tracing::debug!(repo, label = self.config.work_label, "Scanning for ready issues");

        let issues = self
            .github
            .list_issues_with_label(repo, &self.config.work_label)
            .await?;

        let queued: Vec<QueuedIssue> = issues
            .into_iter()
            .filter(|issue| !issue.is_pull_request())
            .filter(|issue| {
                !issue
                    .label_names()
                    .iter()
                    .any(|l| l == &self.config.in_progress_label)
            })
            .map(|issue| {
                let labels = issue.label_names();
                let priority = u8::from(labels.iter().any(|l| l == &self.config.high_priority_label));
                QueuedIssue {
                    repo: repo.to_string(),
                    number: issue.number,
                    title: issue.title.clone(),
                    body: issue.body.clone().unwrap_or_default(),
                    author: issue.author(),
                    created_at: issue.created_at,
                    labels,
                    priority,
                }
            })
            .collect();

        tracing::info!(repo, count = queued.len(), "Found ready issues");
        Ok(queued)
    }

    /// Highest-priority issue, or `None` when the queue is empty.
    pub async fn get_next_issue(&self) -> Option<QueuedIssue> {
        self.scan_queue().await.into_iter().next()
    }

    /// Mark an issue in-progress: add the in-progress label, drop the
    /// ready label.
    pub async fn mark_in_progress(&self, repo: &str, issue_number: u64) -> bool {
        let added = self
            .github
            .add_labels(repo, issue_number, vec![self.config.in_progress_label.clone()])
            .await;
        if let Err(e) = added {
            tracing::error!(repo, issue_number, error = %e, "Failed to mark in-progress");
            return false;
        }

        // The ready label might already be gone.
        if let Err(e) = self
            .github
            .remove_label(repo, issue_number, &self.config.work_label)
            .await
        {
            tracing::debug!(repo, issue_number, error = %e, "Could not remove ready label");
        }

        tracing::info!(repo, issue_number, "Marked in-progress");
        true
    }

    /// Mark an issue in-review after its PR is created, with a linking
    /// comment.
    pub async fn mark_in_review(&self, repo: &str, issue_number: u64, pr_number: u64) -> bool {
        if let Err(e) = self
            .github
            .remove_label(repo, issue_number, &self.config.in_progress_label)
            .await
        {
            tracing::debug!(repo, issue_number, error = %e, "Could not remove in-progress label");
        }
        if let Err(e) = self
            .github
            .add_labels(repo, issue_number, vec![self.config.in_review_label.clone()])
            .await
        {
            tracing::warn!(repo, issue_number, error = %e, "Could not add in-review label");
        }

        let comment = format!(
            "Minion created PR #{pr_number} to address this issue.\n\nPlease review the changes."
        );
        if let Err(e) = self.github.post_comment(repo, issue_number, &comment).await {
            tracing::error!(repo, issue_number, error = %e, "Failed to comment in-review");
            return false;
        }

        tracing::info!(repo, issue_number, pr_number, "Marked in-review");
        true
    }

    /// Mark an issue needs-attention after a failure; the ready label is
    /// restored so the issue can be retried.
    pub async fn mark_failed(&self, repo: &str, issue_number: u64, error: &str) -> bool {
        if let Err(e) = self
            .github
            .remove_label(repo, issue_number, &self.config.in_progress_label)
            .await
        {
            tracing::debug!(repo, issue_number, error = %e, "Could not remove in-progress label");
        }
        if let Err(e) = self
            .github
            .add_labels(
                repo,
                issue_number,
                vec![
                    self.config.needs_attention_label.clone(),
                    self.config.work_label.clone(),
                ],
            )
            .await
        {
            tracing::warn!(repo, issue_number, error = %e, "Could not add needs-attention label");
        }

        let comment = format!(
            "Minion failed to complete this issue.\n\n**Error:** {error}\n\n\
             The issue has been re-added to the queue. \
             Please check if the issue description needs clarification."
        );
        if let Err(e) = self.github.post_comment(repo, issue_number, &comment).await {
            tracing::error!(repo, issue_number, error = %e, "Failed to comment failure");
            return false;
        }

        tracing::info!(repo, issue_number, "Marked needs-attention");
        true
    }

    /// Current API budget.
    pub async fn get_rate_limit(&self) -> DomainResult<RateLimitBudget> {
        self.github.get_rate_limit().await
    }

    /// Below the operating threshold? Assumes limited when the probe
    /// itself fails.
    pub async fn is_rate_limited(&self) -> bool {
        match self.github.get_rate_limit().await {
            Ok(budget) => {
                if budget.remaining < RATE_LIMIT_THRESHOLD {
                    tracing::warn!(
                        remaining = budget.remaining,
                        reset_at = %budget.reset_at,
                        "GitHub API rate limited"
                    );
                    true
                } else {
                    false
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to check rate limit");
                true
            }
        }
    }

    /// Enough budget for a full sweep of every watched repo?
    pub async fn can_perform_sweep(&self) -> bool {
        let needed = Self::sweep_budget(self.config.watched_repos.len());
        match self.github.get_rate_limit().await {
            Ok(budget) => {
                if budget.remaining < needed {
                    tracing::info!(
                        remaining = budget.remaining,
                        needed,
                        "Insufficient quota for sweep"
                    );
                    false
                } else {
                    true
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to check quota");
                false
            }
        }
    }

    /// Requests required before a sweep may run.
    pub fn sweep_budget(watched_repo_count: usize) -> u64 {
        RATE_LIMIT_THRESHOLD + REQUESTS_PER_SWEEP * watched_repo_count as u64
    }

    /// Wait for the rate limit to reset, up to `max_wait`.
    ///
    /// Returns true when the budget is (or becomes) sufficient.
    pub async fn wait_for_rate_limit(&self, max_wait: Duration) -> bool {
        let budget = match self.github.get_rate_limit().await {
            Ok(budget) => budget,
            Err(e) => {
                tracing::error!(error = %e, "Failed to wait for rate limit");
                return false;
            }
        };

        if budget.remaining >= RATE_LIMIT_THRESHOLD {
            return true;
        }

        let wait_secs = budget.seconds_until_reset(Utc::now());
        if wait_secs <= 0 {
            return true;
        }
        if wait_secs as u64 > max_wait.as_secs() {
            tracing::warn!(
                wait_secs,
                max_wait_secs = max_wait.as_secs(),
                "Rate limit reset exceeds max wait"
            );
            return false;
        }

        tracing::info!(wait_secs, "Waiting for rate limit reset");
        tokio::time::sleep(Duration::from_secs(wait_secs as u64 + 1)).await;
        true
    }
}
