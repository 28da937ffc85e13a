//! Review pipeline data model: deterministic check results, PR details, and
//! the LLM review verdict.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a single deterministic check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    Warning,
    Skipped,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Warning => "warning",
            Self::Skipped => "skipped",
        }
    }

    fn marker(self) -> &'static str {
        match self {
            Self::Passed => "[PASS]",
            Self::Failed => "[FAIL]",
            Self::Warning => "[WARN]",
            Self::Skipped => "[SKIP]",
        }
    }
}

/// Result of a single check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub details: Option<String>,
    pub file_issues: Vec<String>,
}

impl CheckResult {
    pub fn new(name: impl Into<String>, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            message: message.into(),
            details: None,
            file_issues: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_file_issues(mut self, issues: Vec<String>) -> Self {
        self.file_issues = issues;
        self
    }
}

/// Complete report of all deterministic checks, in execution order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChecksReport {
    pub results: Vec<CheckResult>,
}

impl ChecksReport {
    /// All checks passed; warnings and skips are tolerated.
    pub fn all_passed(&self) -> bool {
        self.results
            .iter()
            .all(|r| r.status != CheckStatus::Failed)
    }

    pub fn has_failures(&self) -> bool {
        !self.all_passed()
    }

    pub fn passed_count(&self) -> usize {
        self.count(CheckStatus::Passed)
    }

    pub fn failed_count(&self) -> usize {
        self.count(CheckStatus::Failed)
    }

    pub fn warning_count(&self) -> usize {
        self.count(CheckStatus::Warning)
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Markdown summary for posting alongside the LLM review.
    pub fn get_summary(&self) -> String {
        let mut lines = vec!["## Automated Checks Report".to_string(), String::new()];

        for result in &self.results {
            lines.push(format!(
                "- {} **{}**: {}",
                result.status.marker(),
                result.name,
                result.message
            ));
            for issue in result.file_issues.iter().take(5) {
                lines.push(format!("  - {issue}"));
            }
            if result.file_issues.len() > 5 {
                lines.push(format!("  - ... and {} more", result.file_issues.len() - 5));
            }
        }

        lines.push(String::new());
        lines.push(format!(
            "**Summary:** {} passed, {} failed, {} warnings",
            self.passed_count(),
            self.failed_count(),
            self.warning_count()
        ));

        lines.join("\n")
    }
}

/// LLM review decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewDecision {
    #[serde(rename = "APPROVE")]
    Approve,
    #[serde(rename = "REQUEST_CHANGES")]
    RequestChanges,
    #[serde(rename = "COMMENT")]
    Comment,
}

impl ReviewDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "APPROVE",
            Self::RequestChanges => "REQUEST_CHANGES",
            Self::Comment => "COMMENT",
        }
    }

    /// Parse a decision string. Unknown values map to `Comment`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "APPROVE" => Self::Approve,
            "REQUEST_CHANGES" => Self::RequestChanges,
            _ => Self::Comment,
        }
    }
}

/// An inline comment on a specific line of code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineComment {
    pub path: String,
    pub line: u64,
    pub body: String,
}

/// Result of an LLM PR review, merged with the deterministic check outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    pub decision: ReviewDecision,
    pub summary: String,
    pub confidence: f64,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub inline_comments: Vec<InlineComment>,
    pub checks_passed: bool,
}

impl ReviewResult {
    /// A COMMENT result carrying a single issue, used for parse failures and
    /// pipeline errors.
    pub fn comment_with_issue(summary: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            decision: ReviewDecision::Comment,
            summary: summary.into(),
            confidence: 0.0,
            issues: vec![issue.into()],
            suggestions: Vec::new(),
            inline_comments: Vec::new(),
            checks_passed: true,
        }
    }

    /// Whether this PR is safe for auto-merge at the given confidence
    /// threshold.
    pub fn can_auto_merge(&self, min_confidence: f64) -> bool {
        self.decision == ReviewDecision::Approve
            && self.checks_passed
            && self.confidence >= min_confidence
            && self.issues.is_empty()
    }
}

/// A changed file in a PR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub filename: String,
    /// added, modified, removed, renamed.
    pub status: String,
    pub additions: u64,
    pub deletions: u64,
    pub patch: Option<String>,
}

impl FileChange {
    pub fn total_changes(&self) -> u64 {
        self.additions + self.deletions
    }
}

/// Details about a pull request under review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrDetails {
    pub repo: String,
    pub number: u64,
    pub title: String,
    pub body: String,
    pub author: String,
    pub base_branch: String,
    pub head_branch: String,
    pub created_at: Option<DateTime<Utc>>,
    pub files: Vec<FileChange>,
    pub commits: u64,
    pub additions: u64,
    pub deletions: u64,
    pub linked_issue: Option<u64>,
}

impl PrDetails {
    /// Placeholder details for error paths where the fetch itself failed.
    pub fn placeholder(repo: impl Into<String>, number: u64) -> Self {
        Self {
            repo: repo.into(),
            number,
            title: String::new(),
            body: String::new(),
            author: String::new(),
            base_branch: String::new(),
            head_branch: String::new(),
            created_at: None,
            files: Vec::new(),
            commits: 0,
            additions: 0,
            deletions: 0,
            linked_issue: None,
        }
    }

    /// Summary of the change set for LLM context.
    pub fn diff_summary(&self) -> String {
        let mut lines = vec![
            format!("# PR #{}: {}", self.number, self.title),
            String::new(),
            format!("**Author:** {}", self.author),
            format!("**Branch:** {} -> {}", self.head_branch, self.base_branch),
            format!(
                "**Changes:** +{} -{} across {} files",
                self.additions,
                self.deletions,
                self.files.len()
            ),
            String::new(),
        ];

        if !self.body.is_empty() {
            lines.push("## Description".to_string());
            lines.push(self.body.clone());
            lines.push(String::new());
        }

        lines.push("## Changed Files".to_string());
        for f in &self.files {
            lines.push(format!(
                "- `{}` ({}): +{} -{}",
                f.filename, f.status, f.additions, f.deletions
            ));
        }

        lines.join("\n")
    }

    /// Aggregated diff content, truncated at `max_lines` patch lines.
    pub fn full_diff(&self, max_lines: usize) -> String {
        let mut lines: Vec<String> = Vec::new();
        let mut total_lines = 0usize;

        for f in &self.files {
            let Some(patch) = &f.patch else { continue };
            let patch_lines: Vec<&str> = patch.split('\n').collect();

            if total_lines + patch_lines.len() > max_lines {
                let remaining = max_lines.saturating_sub(total_lines);
                if remaining > 10 {
                    lines.push(format!("\n### {}\n```diff", f.filename));
                    lines.extend(patch_lines[..remaining].iter().map(ToString::to_string));
                    lines.push("```".to_string());
                    lines.push(format!(
                        "... (truncated, {} more lines)",
                        patch_lines.len() - remaining
                    ));
                }
                total_lines = max_lines;
                break;
            }

            lines.push(format!("\n### {}\n```diff", f.filename));
            lines.extend(patch_lines.iter().map(ToString::to_string));
            lines.push("```".to_string());
            total_lines += patch_lines.len();
        }

        if total_lines >= max_lines {
            lines.push(format!("\n*Diff truncated at {max_lines} lines*"));
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(statuses: &[CheckStatus]) -> ChecksReport {
        ChecksReport {
            results: statuses
                .iter()
                .enumerate()
                .map(|(i, s)| CheckResult::new(format!("check-{i}"), *s, "msg"))
                .collect(),
        }
    }

    #[test]
    fn all_passed_tolerates_warnings_and_skips() {
        let r = report(&[CheckStatus::Passed, CheckStatus::Warning, CheckStatus::Skipped]);
        assert!(r.all_passed());
        assert!(!r.has_failures());
    }

    #[test]
    fn failure_flips_all_passed() {
        let r = report(&[CheckStatus::Passed, CheckStatus::Failed]);
        assert!(!r.all_passed());
        assert!(r.has_failures());
        assert_eq!(r.failed_count(), 1);
    }

    #[test]
    fn unknown_decision_maps_to_comment() {
        assert_eq!(ReviewDecision::parse_lenient("APPROVE"), ReviewDecision::Approve);
        assert_eq!(
            ReviewDecision::parse_lenient("request_changes"),
            ReviewDecision::RequestChanges
        );
        assert_eq!(
            ReviewDecision::parse_lenient("SHIP_IT"),
            ReviewDecision::Comment
        );
    }

    #[test]
    fn auto_merge_eligibility() {
        let mut result = ReviewResult {
            decision: ReviewDecision::Approve,
            summary: "LGTM".to_string(),
            confidence: 0.9,
            issues: vec![],
            suggestions: vec![],
            inline_comments: vec![],
            checks_passed: true,
        };
        assert!(result.can_auto_merge(0.8));

        result.confidence = 0.7;
        assert!(!result.can_auto_merge(0.8));

        result.confidence = 0.9;
        result.issues.push("nit".to_string());
        assert!(!result.can_auto_merge(0.8));

        result.issues.clear();
        result.checks_passed = false;
        assert!(!result.can_auto_merge(0.8));
    }

    #[test]
    fn full_diff_truncates() {
        let patch: String = (0..100).map(|i| format!("+line {i}\n")).collect();
        let pr = PrDetails {
            files: vec![
                FileChange {
                    filename: "a.rs".to_string(),
                    status: "modified".to_string(),
                    additions: 100,
                    deletions: 0,
                    patch: Some(patch.clone()),
                },
                FileChange {
                    filename: "b.rs".to_string(),
                    status: "modified".to_string(),
                    additions: 100,
                    deletions: 0,
                    patch: Some(patch),
                },
            ],
            ..PrDetails::placeholder("org/repo", 1)
        };
        let diff = pr.full_diff(120);
        assert!(diff.contains("a.rs"));
        assert!(diff.contains("truncated"));
    }
}
