//! Queued issues produced by the GitHub queue scanner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An issue ready for work, as seen during a queue sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedIssue {
    /// Repository in `owner/name` form.
    pub repo: String,
    pub number: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub author: String,
    pub created_at: DateTime<Utc>,
    /// Higher is more urgent. 1 when the high-priority label is present.
    pub priority: u8,
}

impl QueuedIssue {
    /// Ordering key for the sweep result: priority descending, then oldest
    /// first.
    pub fn sort_key(&self) -> (i16, DateTime<Utc>) {
        (-i16::from(self.priority), self.created_at)
    }
}

impl std::fmt::Display for QueuedIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}: {}", self.repo, self.number, self.title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn issue(number: u64, priority: u8, created_secs: i64) -> QueuedIssue {
        QueuedIssue {
            repo: "org/repo".to_string(),
            number,
            title: format!("Issue {number}"),
            body: String::new(),
            labels: vec![],
            author: "alice".to_string(),
            created_at: Utc.timestamp_opt(created_secs, 0).unwrap(),
            priority,
        }
    }

    #[test]
    fn sort_key_orders_priority_then_age() {
        let mut issues = vec![issue(1, 0, 100), issue(2, 1, 300), issue(3, 0, 50)];
        issues.sort_by_key(QueuedIssue::sort_key);

        let numbers: Vec<u64> = issues.iter().map(|i| i.number).collect();
        assert_eq!(numbers, vec![2, 3, 1]);
    }

    #[test]
    fn display_format() {
        let i = issue(42, 0, 0);
        assert_eq!(i.to_string(), "org/repo#42: Issue 42");
    }
}
