//! Wire models for the GitHub REST API v3.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubLabel {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub login: String,
}

/// An issue as returned by `/repos/{owner}/{repo}/issues`.
///
/// GitHub's issues endpoint also returns pull requests; they carry a
/// `pull_request` key callers must filter on.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubIssue {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Vec<GitHubLabel>,
    pub user: Option<GitHubUser>,
    pub created_at: DateTime<Utc>,
    pub pull_request: Option<Value>,
}

impl GitHubIssue {
    pub fn label_names(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.name.clone()).collect()
    }

    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    pub fn author(&self) -> String {
        self.user
            .as_ref()
            .map_or_else(String::new, |u| u.login.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
}

/// A pull request as returned by `/repos/{owner}/{repo}/pulls/{number}`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubPullRequest {
    pub number: u64,
    pub html_url: String,
    pub title: String,
    pub body: Option<String>,
    pub user: Option<GitHubUser>,
    pub base: GitHubRef,
    pub head: GitHubRef,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub commits: u64,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
}

/// A changed file as returned by `/pulls/{number}/files`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubFile {
    pub filename: String,
    pub status: String,
    pub additions: u64,
    pub deletions: u64,
    pub patch: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRepository {
    pub default_branch: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitResource {
    pub limit: u64,
    pub remaining: u64,
    /// Unix epoch seconds when the window resets.
    pub reset: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitResources {
    pub core: RateLimitResource,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitResponse {
    pub resources: RateLimitResources,
}

/// The hosting-platform API budget consulted before each sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitBudget {
    pub remaining: u64,
    pub limit: u64,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitBudget {
    pub fn seconds_until_reset(&self, now: DateTime<Utc>) -> i64 {
        (self.reset_at - now).num_seconds().max(0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentRequest {
    pub body: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LabelsRequest {
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewRequest {
    pub body: String,
    pub event: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeRequest {
    pub merge_method: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeResponse {
    #[serde(default)]
    pub merged: bool,
}
