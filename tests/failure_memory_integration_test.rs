//! Failure memory wired into the tool executor.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use nebulus_swarm::domain::models::failure::ErrorKind;
use nebulus_swarm::domain::models::scope::ScopePolicy;
use nebulus_swarm::infrastructure::database::DatabaseConnection;
use nebulus_swarm::services::failure_memory::FailureMemory;
use nebulus_swarm::services::tool_executor::ToolExecutor;

async fn memory() -> Arc<FailureMemory> {
    let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
    Arc::new(FailureMemory::with_pool(db.pool().clone()).await.unwrap())
}

#[tokio::test]
async fn executor_failures_land_in_memory() {
    let workspace = TempDir::new().unwrap();
    let memory = memory().await;
    let executor = ToolExecutor::new(workspace.path(), ScopePolicy::unrestricted())
        .with_failure_memory(Arc::clone(&memory), "session-1");

    let args = json!({"path": "missing.txt"});
    for _ in 0..3 {
        let result = executor
            .execute("read_file", args.as_object().unwrap())
            .await;
        assert!(!result.success);
    }

    let pattern = memory
        .query_pattern("read_file", Some(ErrorKind::FileNotFound))
        .await
        .unwrap();
    assert_eq!(pattern.occurrence_count, 3);
    assert!(pattern.confidence_penalty() > 0.0);

    let context = memory.build_failure_context(None).await.unwrap();
    assert_eq!(context.warning_messages.len(), 1, "threshold warning expected");
    assert!(context.total_penalty() <= 0.25);

    let summary = FailureMemory::summary_for_llm(&context);
    assert!(summary.contains("read_file/file_not_found"));
}

#[tokio::test]
async fn successful_calls_record_nothing() {
    let workspace = TempDir::new().unwrap();
    std::fs::write(workspace.path().join("real.txt"), "content").unwrap();
    let memory = memory().await;
    let executor = ToolExecutor::new(workspace.path(), ScopePolicy::unrestricted())
        .with_failure_memory(Arc::clone(&memory), "session-1");

    let args = json!({"path": "real.txt"});
    let result = executor
        .execute("read_file", args.as_object().unwrap())
        .await;
    assert!(result.success);

    let context = memory.build_failure_context(None).await.unwrap();
    assert!(context.patterns.is_empty());
}

#[tokio::test]
async fn resolution_discounts_surviving_penalty() {
    let memory = memory().await;
    for _ in 0..4 {
        memory
            .record_failure("s", "edit_file", "File not found: a.rs", None)
            .await
            .unwrap();
    }
    let before = memory
        .query_pattern("edit_file", Some(ErrorKind::FileNotFound))
        .await
        .unwrap()
        .confidence_penalty();

    memory
        .mark_resolved("edit_file", ErrorKind::FileNotFound)
        .await
        .unwrap();
    memory
        .mark_resolved("edit_file", ErrorKind::FileNotFound)
        .await
        .unwrap();

    let after = memory
        .query_pattern("edit_file", Some(ErrorKind::FileNotFound))
        .await
        .unwrap()
        .confidence_penalty();
    assert!(after < before, "resolution should lower the penalty");
}
