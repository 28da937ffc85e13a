//! Nebulus Swarm - autonomous software-engineering swarm
//!
//! A distributed orchestration engine with:
//! - Overlord scheduler: issue queue scanning, Minion lifecycle, watchdog
//! - Minion agent loop: turn-bounded LLM dialogue with sandboxed tools
//! - Automated PR review pipeline with bounded revision cycles
//! - Tamper-evident hash-chained audit trail

pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use infrastructure::database::DatabaseConnection;
