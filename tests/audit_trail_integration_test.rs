//! Audit-trail integrity tests against a file-backed database.

use serde_json::json;

use nebulus_swarm::domain::models::audit::{LogEvent, SemanticLog};
use nebulus_swarm::infrastructure::database::DatabaseConnection;
use nebulus_swarm::services::audit_trail::{generate_signing_key, AuditTrail};

#[tokio::test]
async fn file_backed_chain_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("audit.db");
    let db_path = db_path.to_str().unwrap();

    {
        let trail = AuditTrail::open(db_path, None).await.unwrap();
        trail
            .log(LogEvent::TaskReceived, "org/repo#42", json!({"issue": 42}), "queued")
            .await
            .unwrap();
        trail
            .log(
                LogEvent::TaskDispatched,
                "org/repo#42",
                json!({"minion_id": "minion-a"}),
                "capacity available",
            )
            .await
            .unwrap();
    }

    // Reopen and continue the chain.
    let trail = AuditTrail::open(db_path, None).await.unwrap();
    trail
        .log(
            LogEvent::TaskComplete,
            "org/repo#42",
            json!({"pr_number": 100}),
            "work done",
        )
        .await
        .unwrap();

    let (valid, issues) = trail.verify_integrity().await.unwrap();
    assert!(valid, "issues: {issues:?}");

    let logs = trail.logs_for_task("org/repo#42").await.unwrap();
    assert_eq!(logs.len(), 3);
    assert_eq!(logs[1].previous_hash, logs[0].compute_hash());
    assert_eq!(logs[2].previous_hash, logs[1].compute_hash());
}

#[tokio::test]
async fn direct_database_edit_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("audit.db");
    let db_path = db_path.to_str().unwrap();

    let trail = AuditTrail::open(db_path, None).await.unwrap();
    for i in 1..=3 {
        trail
            .log(
                LogEvent::WorkerResult,
                "org/repo#1",
                json!({"step": i}),
                "progress",
            )
            .await
            .unwrap();
    }

    // Tamper with entry 2's stored hash through a separate connection.
    let db = DatabaseConnection::open_file(db_path).await.unwrap();
    sqlx::query("UPDATE audit_logs SET entry_hash = 'deadbeef' WHERE seq = 2")
        .execute(db.pool())
        .await
        .unwrap();

    let (valid, issues) = trail.verify_integrity().await.unwrap();
    assert!(!valid);
    // The tampered entry fails hash recomputation, and the next entry's
    // previous-hash no longer chains.
    assert!(issues.iter().any(|i| i.contains("Hash mismatch")));
    assert!(issues.iter().any(|i| i.contains("Chain break")));

    let export = trail.export(None).await.unwrap();
    assert_eq!(export["integrity_valid"], false);
    assert!(!export["integrity_issues"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn signed_trail_round_trips_dictionary_form() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("audit.db");

    let trail = AuditTrail::open(db_path.to_str().unwrap(), Some(generate_signing_key()))
        .await
        .unwrap();
    let entry = trail
        .log(
            LogEvent::EvaluationComplete,
            "org/repo#7",
            json!({"overall": "pass"}),
            "all axes passed",
        )
        .await
        .unwrap();

    let restored = SemanticLog::from_value(&entry.to_value()).unwrap();
    // Timestamps compare at ISO precision via the dictionary form.
    assert_eq!(restored.to_value(), entry.to_value());
    assert!(!restored.signature.is_empty());
    assert_eq!(restored.compute_hash(), entry.compute_hash());
}
