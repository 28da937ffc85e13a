//! Overlord state store: active Minions, work history, and evaluations.
//!
//! All writes flow through the single-consumer scheduler; reads may come
//! from anywhere. A terminal transition moves the row from the active set
//! to history in one transaction.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::evaluation::{CheckScore, EvaluationResult};
use crate::domain::models::minion::{MinionRecord, MinionStatus};
use crate::infrastructure::database::DatabaseConnection;

/// Durable record of swarm state.
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    /// Open (and create when missing) the state database at `path`.
    pub async fn open(path: &str) -> DomainResult<Self> {
        let db = DatabaseConnection::open_file(path).await?;
        let store = Self {
            pool: db.pool().clone(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Build over an existing pool (used with `sqlite::memory:` in tests).
    pub async fn with_pool(pool: SqlitePool) -> DomainResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> DomainResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS active_minions (
                minion_id TEXT PRIMARY KEY,
                container_id TEXT NOT NULL,
                repo TEXT NOT NULL,
                issue_number INTEGER NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                last_heartbeat TEXT NOT NULL,
                pr_number INTEGER,
                error_message TEXT,
                revision_number INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS work_history (
                minion_id TEXT NOT NULL,
                container_id TEXT NOT NULL,
                repo TEXT NOT NULL,
                issue_number INTEGER NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                last_heartbeat TEXT NOT NULL,
                pr_number INTEGER,
                error_message TEXT,
                revision_number INTEGER NOT NULL DEFAULT 0,
                finished_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS evaluations (
                repo TEXT NOT NULL,
                pr_number INTEGER NOT NULL,
                revision_number INTEGER NOT NULL,
                test_score TEXT NOT NULL,
                lint_score TEXT NOT NULL,
                review_score TEXT NOT NULL,
                test_feedback TEXT NOT NULL DEFAULT '',
                lint_feedback TEXT NOT NULL DEFAULT '',
                review_feedback TEXT NOT NULL DEFAULT '',
                timestamp TEXT NOT NULL,
                PRIMARY KEY (repo, pr_number, revision_number)
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> DomainResult<MinionRecord> {
        let status_str: String = row.get("status");
        let status = MinionStatus::parse_str(&status_str).ok_or_else(|| {
            DomainError::DatabaseError(format!("Unknown minion status: {status_str}"))
        })?;

        Ok(MinionRecord {
            minion_id: row.get("minion_id"),
            container_id: row.get("container_id"),
            repo: row.get("repo"),
            issue_number: row.get::<i64, _>("issue_number") as u64,
            status,
            started_at: parse_datetime(&row.get::<String, _>("started_at"))?,
            last_heartbeat: parse_datetime(&row.get::<String, _>("last_heartbeat"))?,
            pr_number: row
                .get::<Option<i64>, _>("pr_number")
                .map(|n| n as u64),
            error_message: row.get("error_message"),
            revision_number: row.get::<i64, _>("revision_number") as u32,
        })
    }

    /// Insert a new record into the active set.
    pub async fn add_minion(&self, record: &MinionRecord) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO active_minions
             (minion_id, container_id, repo, issue_number, status, started_at,
              last_heartbeat, pr_number, error_message, revision_number)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.minion_id)
        .bind(&record.container_id)
        .bind(&record.repo)
        .bind(record.issue_number as i64)
        .bind(record.status.as_str())
        .bind(record.started_at.to_rfc3339())
        .bind(record.last_heartbeat.to_rfc3339())
        .bind(record.pr_number.map(|n| n as i64))
        .bind(&record.error_message)
        .bind(i64::from(record.revision_number))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch an active Minion by id.
    pub async fn get_minion(&self, minion_id: &str) -> DomainResult<Option<MinionRecord>> {
        let row = sqlx::query("SELECT * FROM active_minions WHERE minion_id = ?")
            .bind(minion_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::row_to_record(&r)).transpose()
    }

    /// Fetch an active Minion by the issue it works on.
    pub async fn get_minion_by_issue(
        &self,
        repo: &str,
        issue_number: u64,
    ) -> DomainResult<Option<MinionRecord>> {
        let row = sqlx::query("SELECT * FROM active_minions WHERE repo = ? AND issue_number = ?")
            .bind(repo)
            .bind(issue_number as i64)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::row_to_record(&r)).transpose()
    }

    /// All active Minions, oldest first.
    pub async fn get_active_minions(&self) -> DomainResult<Vec<MinionRecord>> {
        let rows = sqlx::query("SELECT * FROM active_minions ORDER BY started_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    /// Count of active Minions.
    pub async fn active_count(&self) -> DomainResult<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM active_minions")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("count") as usize)
    }

    /// Update an active Minion's status.
    pub async fn update_status(&self, minion_id: &str, status: MinionStatus) -> DomainResult<()> {
        sqlx::query("UPDATE active_minions SET status = ? WHERE minion_id = ?")
            .bind(status.as_str())
            .bind(minion_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Refresh a Minion's heartbeat, optionally moving its status.
    pub async fn record_heartbeat(
        &self,
        minion_id: &str,
        status: Option<MinionStatus>,
    ) -> DomainResult<()> {
        let now = Utc::now().to_rfc3339();
        if let Some(status) = status {
            sqlx::query(
                "UPDATE active_minions SET last_heartbeat = ?, status = ? WHERE minion_id = ?",
            )
            .bind(&now)
            .bind(status.as_str())
            .bind(minion_id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query("UPDATE active_minions SET last_heartbeat = ? WHERE minion_id = ?")
                .bind(&now)
                .bind(minion_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Record a PR number on an active Minion.
    pub async fn set_pr_number(&self, minion_id: &str, pr_number: u64) -> DomainResult<()> {
        sqlx::query("UPDATE active_minions SET pr_number = ? WHERE minion_id = ?")
            .bind(pr_number as i64)
            .bind(minion_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Move a Minion from the active set to history with a terminal status.
    ///
    /// The move is atomic: exactly one history row appears and the active
    /// row disappears, or neither.
    pub async fn record_completion(
        &self,
        minion_id: &str,
        terminal_status: MinionStatus,
        pr_number: Option<u64>,
        error_message: Option<&str>,
    ) -> DomainResult<()> {
        if !terminal_status.is_terminal() {
            return Err(DomainError::InvalidStateTransition {
                from: "active".to_string(),
                to: terminal_status.as_str().to_string(),
            });
        }

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM active_minions WHERE minion_id = ?")
            .bind(minion_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DomainError::MinionNotFound(minion_id.to_string()))?;
        let record = Self::row_to_record(&row)?;

        sqlx::query(
            "INSERT INTO work_history
             (minion_id, container_id, repo, issue_number, status, started_at,
              last_heartbeat, pr_number, error_message, revision_number, finished_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.minion_id)
        .bind(&record.container_id)
        .bind(&record.repo)
        .bind(record.issue_number as i64)
        .bind(terminal_status.as_str())
        .bind(record.started_at.to_rfc3339())
        .bind(record.last_heartbeat.to_rfc3339())
        .bind(pr_number.or(record.pr_number).map(|n| n as i64))
        .bind(error_message.map(str::to_string).or(record.error_message))
        .bind(i64::from(record.revision_number))
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM active_minions WHERE minion_id = ?")
            .bind(minion_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Drop an active Minion without recording history.
    pub async fn remove_minion(&self, minion_id: &str) -> DomainResult<bool> {
        let result = sqlx::query("DELETE FROM active_minions WHERE minion_id = ?")
            .bind(minion_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Completed work, most recent first.
    pub async fn work_history(&self, limit: usize) -> DomainResult<Vec<MinionRecord>> {
        let rows = sqlx::query("SELECT * FROM work_history ORDER BY finished_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    /// Append an evaluation keyed by (repo, pr, revision).
    pub async fn add_evaluation(&self, evaluation: &EvaluationResult) -> DomainResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO evaluations
             (repo, pr_number, revision_number, test_score, lint_score, review_score,
              test_feedback, lint_feedback, review_feedback, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&evaluation.repo)
        .bind(evaluation.pr_number as i64)
        .bind(i64::from(evaluation.revision_number))
        .bind(evaluation.test_score.as_str())
        .bind(evaluation.lint_score.as_str())
        .bind(evaluation.review_score.as_str())
        .bind(&evaluation.test_feedback)
        .bind(&evaluation.lint_feedback)
        .bind(&evaluation.review_feedback)
        .bind(evaluation.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch one evaluation.
    pub async fn get_evaluation(
        &self,
        repo: &str,
        pr_number: u64,
        revision_number: u32,
    ) -> DomainResult<Option<EvaluationResult>> {
        let row = sqlx::query(
            "SELECT * FROM evaluations WHERE repo = ? AND pr_number = ? AND revision_number = ?",
        )
        .bind(repo)
        .bind(pr_number as i64)
        .bind(i64::from(revision_number))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let parse = |col: &str| -> DomainResult<CheckScore> {
                let s: String = row.get(col);
                CheckScore::parse_str(&s)
                    .ok_or_else(|| DomainError::DatabaseError(format!("Unknown score: {s}")))
            };
            Ok(EvaluationResult {
                repo: row.get("repo"),
                pr_number: row.get::<i64, _>("pr_number") as u64,
                revision_number: row.get::<i64, _>("revision_number") as u32,
                test_score: parse("test_score")?,
                lint_score: parse("lint_score")?,
                review_score: parse("review_score")?,
                test_feedback: row.get("test_feedback"),
                lint_feedback: row.get("lint_feedback"),
                review_feedback: row.get("review_feedback"),
                timestamp: parse_datetime(&row.get::<String, _>("timestamp"))?,
            })
        })
        .transpose()
    }
}

fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DomainError::DatabaseError(format!("Bad timestamp '{s}': {e}")))
}
