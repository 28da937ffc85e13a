//! SQLite connection pool management.
//!
//! Each durable store (state, audit trail, failure memory) opens its own
//! database file through this wrapper and creates its own schema at startup.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};

/// Database connection pool with SQLite configured for concurrent access.
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    /// Create a new connection pool with WAL mode enabled.
    ///
    /// `database_url` is a SQLite URL such as `sqlite:.nebulus/state.db` or
    /// `sqlite::memory:`. The database file is created when missing; parent
    /// directories must already exist (the composition root creates them).
    pub async fn new(database_url: &str) -> DomainResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| DomainError::DatabaseError(format!("Invalid database URL: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .idle_timeout(Duration::from_secs(30))
            .max_lifetime(Duration::from_secs(1800))
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| {
                DomainError::DatabaseError(format!("Failed to create connection pool: {e}"))
            })?;

        Ok(Self { pool })
    }

    /// Open a database file, creating its parent directory first.
    pub async fn open_file(path: &str) -> DomainResult<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DomainError::DatabaseError(format!(
                        "Failed to create database directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        Self::new(&format!("sqlite:{path}")).await
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the connection pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connection_pool_creation() {
        let db = DatabaseConnection::new("sqlite::memory:")
            .await
            .expect("failed to create database connection");

        assert!(!db.pool().is_closed());
        db.close().await;
        assert!(db.pool().is_closed());
    }

    #[tokio::test]
    async fn foreign_keys_enabled() {
        let db = DatabaseConnection::new("sqlite::memory:")
            .await
            .expect("failed to create database connection");

        let result: (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(db.pool())
            .await
            .expect("failed to check foreign keys pragma");

        assert_eq!(result.0, 1, "foreign keys should be enabled");
        db.close().await;
    }

    #[tokio::test]
    async fn open_file_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state.db");
        let db = DatabaseConnection::open_file(path.to_str().unwrap())
            .await
            .expect("failed to open database file");
        assert!(!db.pool().is_closed());
        db.close().await;
    }
}
