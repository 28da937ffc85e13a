//! GitHub REST API v3 client and wire models.

pub mod client;
pub mod models;

pub use client::GitHubClient;
pub use models::{
    GitHubFile, GitHubIssue, GitHubPullRequest, GitHubRef, RateLimitBudget,
};
