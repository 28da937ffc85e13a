//! Minion lifecycle record tracked by the Overlord state store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a Minion in the Overlord's active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinionStatus {
    /// Container spawned, no heartbeat received yet.
    Starting,
    /// Heartbeats flowing, agent loop in progress.
    Working,
    /// A question is pending a human answer.
    AwaitingAnswer,
    /// Terminal: work finished with a PR.
    Completed,
    /// Terminal: work failed.
    Failed,
    /// Terminal: watchdog fired on a missing heartbeat.
    TimedOut,
}

impl MinionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Working => "working",
            Self::AwaitingAnswer => "awaiting_answer",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "starting" => Some(Self::Starting),
            "working" => Some(Self::Working),
            "awaiting_answer" => Some(Self::AwaitingAnswer),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "timed_out" => Some(Self::TimedOut),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

/// A Minion known to the Overlord.
///
/// Exactly one record exists in the active set per running Minion; on a
/// terminal transition the record moves atomically to work history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinionRecord {
    pub minion_id: String,
    pub container_id: String,
    pub repo: String,
    pub issue_number: u64,
    pub status: MinionStatus,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub pr_number: Option<u64>,
    pub error_message: Option<String>,
    pub revision_number: u32,
}

impl MinionRecord {
    /// Create a fresh record in `starting` state.
    pub fn new(
        minion_id: impl Into<String>,
        container_id: impl Into<String>,
        repo: impl Into<String>,
        issue_number: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            minion_id: minion_id.into(),
            container_id: container_id.into(),
            repo: repo.into(),
            issue_number,
            status: MinionStatus::Starting,
            started_at: now,
            last_heartbeat: now,
            pr_number: None,
            error_message: None,
            revision_number: 0,
        }
    }

    /// Mark this record as a revision attempt.
    pub fn with_revision(mut self, revision_number: u32) -> Self {
        self.revision_number = revision_number;
        self
    }

    /// Seconds since the last heartbeat.
    pub fn heartbeat_age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_heartbeat).num_seconds()
    }
}
