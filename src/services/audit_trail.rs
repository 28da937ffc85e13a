//! Tamper-evident audit trail.
//!
//! Append-only hash-chained semantic log of every orchestration decision,
//! with optional Ed25519 signing. Verification recomputes every hash in
//! insertion order and checks the chain; it surfaces issues without ever
//! blocking operation.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use ed25519_dalek::{Signer, SigningKey};
use serde_json::{json, Value};
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::audit::{LogEvent, SemanticLog};
use crate::infrastructure::database::DatabaseConnection;

/// Manages semantic logging with a hash chain and optional signing.
pub struct AuditTrail {
    pool: SqlitePool,
    signing_key: Option<SigningKey>,
}

impl AuditTrail {
    /// Open (and create when missing) the audit database at `path`.
    pub async fn open(path: &str, signing_key: Option<SigningKey>) -> DomainResult<Self> {
        let db = DatabaseConnection::open_file(path).await?;
        Self::with_pool(db.pool().clone(), signing_key).await
    }

    /// Build over an existing pool (used with `sqlite::memory:` in tests).
    pub async fn with_pool(pool: SqlitePool, signing_key: Option<SigningKey>) -> DomainResult<Self> {
        let trail = Self { pool, signing_key };
        trail.init_schema().await?;
        Ok(trail)
    }

    async fn init_schema(&self) -> DomainResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS audit_logs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                event TEXT NOT NULL,
                task_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                data TEXT NOT NULL,
                reasoning TEXT NOT NULL DEFAULT '',
                previous_hash TEXT NOT NULL DEFAULT '',
                signature TEXT NOT NULL DEFAULT '',
                entry_hash TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_task ON audit_logs(task_id)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn last_hash(&self) -> DomainResult<String> {
        let row = sqlx::query("SELECT entry_hash FROM audit_logs ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("entry_hash")).unwrap_or_default())
    }

    fn sign(&self, content: &str) -> String {
        match &self.signing_key {
            Some(key) => BASE64.encode(key.sign(content.as_bytes()).to_bytes()),
            None => String::new(),
        }
    }

    /// Append an entry to the trail.
    pub async fn log(
        &self,
        event: LogEvent,
        task_id: &str,
        data: Value,
        reasoning: &str,
    ) -> DomainResult<SemanticLog> {
        let mut entry = SemanticLog::new(event, task_id, data, reasoning);
        entry.previous_hash = self.last_hash().await?;

        let entry_hash = entry.compute_hash();
        entry.signature = self.sign(&entry_hash);

        sqlx::query(
            "INSERT INTO audit_logs
             (id, event, task_id, timestamp, data, reasoning, previous_hash, signature, entry_hash)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(entry.event.as_str())
        .bind(&entry.task_id)
        .bind(entry.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true))
        .bind(serde_json::to_string(&entry.data)?)
        .bind(&entry.reasoning)
        .bind(&entry.previous_hash)
        .bind(&entry.signature)
        .bind(&entry_hash)
        .execute(&self.pool)
        .await?;

        tracing::debug!(event = event.as_str(), task_id, "Audit log");
        Ok(entry)
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> DomainResult<(SemanticLog, String)> {
        let event_str: String = row.get("event");
        let event = LogEvent::parse_str(&event_str)
            .ok_or_else(|| DomainError::DatabaseError(format!("Unknown event: {event_str}")))?;
        let timestamp_str: String = row.get("timestamp");
        let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&timestamp_str)
            .map_err(|e| DomainError::DatabaseError(format!("Bad timestamp: {e}")))?
            .with_timezone(&Utc);

        let entry = SemanticLog {
            id: row.get("id"),
            event,
            task_id: row.get("task_id"),
            timestamp,
            data: serde_json::from_str(&row.get::<String, _>("data")).unwrap_or_else(|_| json!({})),
            reasoning: row.get("reasoning"),
            previous_hash: row.get("previous_hash"),
            signature: row.get("signature"),
        };
        Ok((entry, row.get("entry_hash")))
    }

    /// All entries for one task, in insertion order.
    pub async fn logs_for_task(&self, task_id: &str) -> DomainResult<Vec<SemanticLog>> {
        let rows = sqlx::query("SELECT * FROM audit_logs WHERE task_id = ? ORDER BY seq")
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| Self::row_to_entry(r).map(|(entry, _)| entry))
            .collect()
    }

    /// Most recent entries first.
    pub async fn all_logs(&self, limit: usize) -> DomainResult<Vec<SemanticLog>> {
        let rows = sqlx::query("SELECT * FROM audit_logs ORDER BY seq DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| Self::row_to_entry(r).map(|(entry, _)| entry))
            .collect()
    }

    /// Verify the hash chain.
    ///
    /// Recomputes every entry hash in insertion order and asserts each
    /// entry's `previous_hash` matches the prior entry's stored hash.
    /// Returns validity plus one diagnostic per break.
    pub async fn verify_integrity(&self) -> DomainResult<(bool, Vec<String>)> {
        let rows = sqlx::query("SELECT * FROM audit_logs ORDER BY seq")
            .fetch_all(&self.pool)
            .await?;

        let mut issues = Vec::new();
        let mut previous_hash = String::new();

        for row in &rows {
            let (entry, stored_hash) = Self::row_to_entry(row)?;

            if entry.previous_hash != previous_hash {
                issues.push(format!(
                    "Chain break at {}: expected previous_hash={}..., got {}...",
                    entry.id,
                    truncate_hash(&previous_hash),
                    truncate_hash(&entry.previous_hash),
                ));
            }

            let computed = entry.compute_hash();
            if computed != stored_hash {
                issues.push(format!(
                    "Hash mismatch at {}: computed={}..., stored={}...",
                    entry.id,
                    truncate_hash(&computed),
                    truncate_hash(&stored_hash),
                ));
            }

            previous_hash = stored_hash;
        }

        Ok((issues.is_empty(), issues))
    }

    /// Export the trail (optionally one task's slice) with integrity
    /// status.
    pub async fn export(&self, task_id: Option<&str>) -> DomainResult<Value> {
        let logs = match task_id {
            Some(task_id) => self.logs_for_task(task_id).await?,
            None => self.all_logs(1000).await?,
        };
        let (integrity_valid, integrity_issues) = self.verify_integrity().await?;

        Ok(json!({
            "exported_at": Utc::now().to_rfc3339(),
            "integrity_valid": integrity_valid,
            "integrity_issues": integrity_issues,
            "log_count": logs.len(),
            "logs": logs.iter().map(SemanticLog::to_value).collect::<Vec<_>>(),
        }))
    }
}

fn truncate_hash(hash: &str) -> &str {
    &hash[..hash.len().min(8)]
}

/// Generate a new Ed25519 signing key.
pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut rand::rngs::OsRng)
}

/// Load the signing key from `path`, creating one (mode 0600) when absent.
pub fn load_or_create_signing_key(path: &Path) -> DomainResult<SigningKey> {
    if path.exists() {
        let bytes = std::fs::read(path)
            .map_err(|e| DomainError::ConfigError(format!("Failed to read signing key: {e}")))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            DomainError::ConfigError("Signing key must be exactly 32 bytes".to_string())
        })?;
        return Ok(SigningKey::from_bytes(&bytes));
    }

    let key = generate_signing_key();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| DomainError::ConfigError(format!("Failed to create key dir: {e}")))?;
    }
    std::fs::write(path, key.to_bytes())
        .map_err(|e| DomainError::ConfigError(format!("Failed to write signing key: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .map_err(|e| DomainError::ConfigError(format!("Failed to chmod signing key: {e}")))?;
    }

    tracing::info!(path = %path.display(), "Generated new signing key");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Verifier, VerifyingKey};

    async fn trail(signing_key: Option<SigningKey>) -> AuditTrail {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        AuditTrail::with_pool(db.pool().clone(), signing_key)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn chain_links_previous_hashes() {
        let trail = trail(None).await;

        let first = trail
            .log(LogEvent::TaskReceived, "t1", json!({"issue": 42}), "queued")
            .await
            .unwrap();
        let second = trail
            .log(LogEvent::TaskDispatched, "t1", json!({"minion_id": "m"}), "capacity ok")
            .await
            .unwrap();

        assert!(first.previous_hash.is_empty());
        assert_eq!(second.previous_hash, first.compute_hash());
    }

    #[tokio::test]
    async fn unmodified_trail_verifies_clean() {
        let trail = trail(None).await;
        for i in 0..5 {
            trail
                .log(LogEvent::WorkerResult, &format!("t{i}"), json!({"i": i}), "r")
                .await
                .unwrap();
        }

        let (valid, issues) = trail.verify_integrity().await.unwrap();
        assert!(valid);
        assert!(issues.is_empty());
    }

    #[tokio::test]
    async fn empty_trail_is_valid() {
        let trail = trail(None).await;
        let (valid, issues) = trail.verify_integrity().await.unwrap();
        assert!(valid);
        assert!(issues.is_empty());
    }

    #[tokio::test]
    async fn tamper_is_detected_with_diagnostics() {
        let trail = trail(None).await;
        for i in 0..3 {
            trail
                .log(LogEvent::WorkerResult, "t1", json!({"i": i}), "r")
                .await
                .unwrap();
        }

        // Simulate a direct database edit of entry 2's stored hash.
        sqlx::query("UPDATE audit_logs SET entry_hash = 'deadbeef' WHERE seq = 2")
            .execute(&trail.pool)
            .await
            .unwrap();

        let (valid, issues) = trail.verify_integrity().await.unwrap();
        assert!(!valid);
        // Entry 2 has a hash mismatch, and entry 3's previous-hash no longer
        // chains to the tampered value's predecessor.
        assert!(issues.iter().any(|i| i.contains("Hash mismatch")));
        assert!(issues.iter().any(|i| i.contains("Chain break")));
    }

    #[tokio::test]
    async fn reasoning_tamper_breaks_recomputed_hash() {
        let trail = trail(None).await;
        trail
            .log(LogEvent::TaskComplete, "t1", json!({}), "all good")
            .await
            .unwrap();

        sqlx::query("UPDATE audit_logs SET reasoning = 'rewritten history' WHERE seq = 1")
            .execute(&trail.pool)
            .await
            .unwrap();

        let (valid, issues) = trail.verify_integrity().await.unwrap();
        assert!(!valid);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("Hash mismatch"));
    }

    #[tokio::test]
    async fn unsigned_entries_have_empty_signature_and_stay_valid() {
        let trail = trail(None).await;
        let entry = trail
            .log(LogEvent::TaskReceived, "t1", json!({}), "")
            .await
            .unwrap();
        assert!(entry.signature.is_empty());

        let (valid, _) = trail.verify_integrity().await.unwrap();
        assert!(valid);
    }

    #[tokio::test]
    async fn signed_entries_verify_against_public_key() {
        let key = generate_signing_key();
        let verifying: VerifyingKey = key.verifying_key();
        let trail = trail(Some(key)).await;

        let entry = trail
            .log(LogEvent::TaskDispatched, "t1", json!({}), "go")
            .await
            .unwrap();
        assert!(!entry.signature.is_empty());

        let signature_bytes = BASE64.decode(&entry.signature).unwrap();
        let signature = ed25519_dalek::Signature::from_slice(&signature_bytes).unwrap();
        verifying
            .verify(entry.compute_hash().as_bytes(), &signature)
            .expect("signature must verify");
    }

    #[tokio::test]
    async fn export_includes_integrity_and_logs() {
        let trail = trail(None).await;
        trail
            .log(LogEvent::TaskReceived, "t1", json!({}), "")
            .await
            .unwrap();
        trail
            .log(LogEvent::TaskComplete, "t2", json!({}), "")
            .await
            .unwrap();

        let export = trail.export(None).await.unwrap();
        assert_eq!(export["integrity_valid"], true);
        assert_eq!(export["log_count"], 2);
        assert!(export["exported_at"].is_string());

        let filtered = trail.export(Some("t1")).await.unwrap();
        assert_eq!(filtered["log_count"], 1);
        assert_eq!(filtered["logs"][0]["task_id"], "t1");
    }

    #[tokio::test]
    async fn logs_for_task_are_in_insertion_order() {
        let trail = trail(None).await;
        for event in [
            LogEvent::TaskReceived,
            LogEvent::TaskDispatched,
            LogEvent::WorkerResult,
            LogEvent::EvaluationComplete,
            LogEvent::TaskComplete,
        ] {
            trail.log(event, "org/repo#42", json!({}), "").await.unwrap();
        }

        let logs = trail.logs_for_task("org/repo#42").await.unwrap();
        let events: Vec<&str> = logs.iter().map(|l| l.event.as_str()).collect();
        assert_eq!(
            events,
            vec![
                "task_received",
                "task_dispatched",
                "worker_result",
                "evaluation_complete",
                "task_complete",
            ]
        );
    }

    #[test]
    fn signing_key_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signing_key");

        let created = load_or_create_signing_key(&path).unwrap();
        assert!(path.exists());
        let loaded = load_or_create_signing_key(&path).unwrap();
        assert_eq!(created.to_bytes(), loaded.to_bytes());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
