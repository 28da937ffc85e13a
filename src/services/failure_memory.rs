//! Failure memory: persistent history of tool failures.
//!
//! Classifies error messages through an ordered regex table, sanitizes
//! arguments to a whitelist of safe keys, and aggregates failures into
//! patterns the cognition layer converts to confidence penalties.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::failure::{ErrorKind, FailureContext, FailurePattern, FailureRecord};
use crate::infrastructure::database::DatabaseConnection;

/// Keys kept when sanitizing tool arguments.
const SAFE_ARG_KEYS: [&str; 6] = ["path", "command", "query", "name", "filename", "directory"];

/// Maximum stored error-message length.
const MAX_ERROR_LENGTH: usize = 500;

/// Occurrence count at which a pattern earns a warning.
const WARNING_THRESHOLD: u32 = 3;

/// Ordered classifier table; first match wins.
fn classifiers() -> &'static [(Regex, ErrorKind)] {
    static TABLE: OnceLock<Vec<(Regex, ErrorKind)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        [
            (r"(?i)file not found|no such file|FileNotFoundError", ErrorKind::FileNotFound),
            (r"(?i)no module named|ModuleNotFoundError|unresolved import", ErrorKind::MissingModule),
            (r"(?i)expecting value|extra data|invalid control|invalid json|JSONDecodeError", ErrorKind::InvalidJson),
            (r"(?i)invalid syntax|unexpected indent|SyntaxError", ErrorKind::SyntaxError),
            (r"(?i)permission denied|PermissionError", ErrorKind::PermissionDenied),
            (r"(?i)timed? ?out|TimeoutError", ErrorKind::Timeout),
            (r"(?i)non-zero exit|command failed|exit code", ErrorKind::CommandFailed),
        ]
        .into_iter()
        .map(|(pattern, kind)| (Regex::new(pattern).expect("valid classifier regex"), kind))
        .collect()
    })
}

/// Classify an error message into a known kind.
pub fn classify_error(error_message: &str) -> ErrorKind {
    for (regex, kind) in classifiers() {
        if regex.is_match(error_message) {
            return *kind;
        }
    }
    ErrorKind::Unknown
}

/// Sanitize tool arguments, keeping only safe keys with string values.
fn sanitize_args(args: &Map<String, Value>) -> BTreeMap<String, String> {
    args.iter()
        .filter(|(k, _)| SAFE_ARG_KEYS.contains(&k.as_str()))
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect()
}

/// Persistent store of classified tool failures.
pub struct FailureMemory {
    pool: SqlitePool,
}

impl FailureMemory {
    /// Open (and create when missing) the failure database at `path`.
    pub async fn open(path: &str) -> DomainResult<Self> {
        let db = DatabaseConnection::open_file(path).await?;
        let memory = Self {
            pool: db.pool().clone(),
        };
        memory.init_schema().await?;
        Ok(memory)
    }

    /// Build over an existing pool (used with `sqlite::memory:` in tests).
    pub async fn with_pool(pool: SqlitePool) -> DomainResult<Self> {
        let memory = Self { pool };
        memory.init_schema().await?;
        Ok(memory)
    }

    async fn init_schema(&self) -> DomainResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS failures (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                error_type TEXT NOT NULL,
                error_message TEXT NOT NULL,
                args_context TEXT NOT NULL DEFAULT '{}',
                resolved INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_failures_tool ON failures(tool_name, error_type)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a tool failure, classifying and sanitizing on the way in.
    pub async fn record_failure(
        &self,
        session_id: &str,
        tool_name: &str,
        error_message: &str,
        args: Option<&Map<String, Value>>,
    ) -> DomainResult<FailureRecord> {
        let error_kind = classify_error(error_message);
        let truncated: String = error_message.chars().take(MAX_ERROR_LENGTH).collect();
        let args_context = args.map(sanitize_args).unwrap_or_default();

        let record = FailureRecord {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            tool_name: tool_name.to_string(),
            error_kind,
            error_message: truncated,
            args_context,
            resolved: false,
        };

        sqlx::query(
            "INSERT INTO failures
             (id, session_id, timestamp, tool_name, error_type, error_message, args_context, resolved)
             VALUES (?, ?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(&record.id)
        .bind(&record.session_id)
        .bind(record.timestamp.to_rfc3339())
        .bind(&record.tool_name)
        .bind(record.error_kind.as_str())
        .bind(&record.error_message)
        .bind(serde_json::to_string(&record.args_context).unwrap_or_else(|_| "{}".to_string()))
        .execute(&self.pool)
        .await?;

        tracing::info!(
            tool = tool_name,
            kind = record.error_kind.as_str(),
            session = session_id,
            "Recorded tool failure"
        );
        Ok(record)
    }

    /// Mark the most recent unresolved failure of this kind as resolved.
    pub async fn mark_resolved(&self, tool_name: &str, error_kind: ErrorKind) -> DomainResult<bool> {
        let result = sqlx::query(
            "UPDATE failures SET resolved = 1
             WHERE id = (
                 SELECT id FROM failures
                 WHERE tool_name = ? AND error_type = ? AND resolved = 0
                 ORDER BY timestamp DESC LIMIT 1
             )",
        )
        .bind(tool_name)
        .bind(error_kind.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Aggregated pattern for one tool, optionally narrowed to one kind.
    pub async fn query_pattern(
        &self,
        tool_name: &str,
        error_kind: Option<ErrorKind>,
    ) -> DomainResult<FailurePattern> {
        let row = if let Some(kind) = error_kind {
            sqlx::query(
                "SELECT COUNT(*) AS count, COALESCE(SUM(resolved), 0) AS resolved
                 FROM failures WHERE tool_name = ? AND error_type = ?",
            )
            .bind(tool_name)
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT COUNT(*) AS count, COALESCE(SUM(resolved), 0) AS resolved
                 FROM failures WHERE tool_name = ?",
            )
            .bind(tool_name)
            .fetch_one(&self.pool)
            .await?
        };

        Ok(FailurePattern {
            tool_name: tool_name.to_string(),
            error_kind: error_kind.unwrap_or(ErrorKind::Unknown),
            occurrence_count: row.get::<i64, _>("count") as u32,
            resolved_count: row.get::<i64, _>("resolved") as u32,
        })
    }

    /// Build the failure context for a set of tools (all tools when `None`).
    ///
    /// Patterns at or above the warning threshold also produce a
    /// human-readable warning line.
    pub async fn build_failure_context(
        &self,
        tool_names: Option<&[&str]>,
    ) -> DomainResult<FailureContext> {
        let rows = if let Some(names) = tool_names {
            let placeholders = vec!["?"; names.len()].join(",");
            let sql = format!(
                "SELECT tool_name, error_type, COUNT(*) AS count,
                        COALESCE(SUM(resolved), 0) AS resolved
                 FROM failures WHERE tool_name IN ({placeholders})
                 GROUP BY tool_name, error_type"
            );
            let mut query = sqlx::query(&sql);
            for name in names {
                query = query.bind(*name);
            }
            query.fetch_all(&self.pool).await?
        } else {
            sqlx::query(
                "SELECT tool_name, error_type, COUNT(*) AS count,
                        COALESCE(SUM(resolved), 0) AS resolved
                 FROM failures GROUP BY tool_name, error_type",
            )
            .fetch_all(&self.pool)
            .await?
        };

        let mut patterns = Vec::new();
        let mut warnings = Vec::new();

        for row in rows {
            let pattern = FailurePattern {
                tool_name: row.get("tool_name"),
                error_kind: ErrorKind::parse_str(&row.get::<String, _>("error_type")),
                occurrence_count: row.get::<i64, _>("count") as u32,
                resolved_count: row.get::<i64, _>("resolved") as u32,
            };
            if pattern.occurrence_count == 0 {
                continue;
            }
            if pattern.occurrence_count >= WARNING_THRESHOLD {
                warnings.push(format!(
                    "Tool '{}' has failed {} times with {} errors (resolution rate: {:.0}%)",
                    pattern.tool_name,
                    pattern.occurrence_count,
                    pattern.error_kind.as_str(),
                    pattern.resolution_rate() * 100.0
                ));
            }
            patterns.push(pattern);
        }

        Ok(FailureContext {
            patterns,
            warning_messages: warnings,
        })
    }

    /// Render the failure context for injection into agent context.
    pub fn summary_for_llm(context: &FailureContext) -> String {
        if context.patterns.is_empty() {
            return String::new();
        }

        let mut lines = vec!["[Failure Memory]".to_string()];
        for pattern in &context.patterns {
            lines.push(format!(
                "- {}/{}: {} failures, {:.0}% resolved, penalty={:.2}",
                pattern.tool_name,
                pattern.error_kind.as_str(),
                pattern.occurrence_count,
                pattern.resolution_rate() * 100.0,
                pattern.confidence_penalty()
            ));
        }

        if !context.warning_messages.is_empty() {
            lines.push(String::new());
            for warning in &context.warning_messages {
                lines.push(format!("WARNING: {warning}"));
            }
        }

        lines.push(format!(
            "Total confidence penalty: {:.2}",
            context.total_penalty()
        ));
        lines.join("\n")
    }
}
