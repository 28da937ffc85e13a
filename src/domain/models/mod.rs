//! Domain models for the Nebulus swarm.

pub mod audit;
pub mod config;
pub mod conversation;
pub mod evaluation;
pub mod failure;
pub mod issue;
pub mod minion;
pub mod review;
pub mod scope;

pub use audit::{LogEvent, SemanticLog};
pub use config::OverlordConfig;
pub use conversation::{ChatMessage, ToolCall, ToolResult, WireFunction, WireToolCall};
pub use evaluation::{CheckScore, EvaluationResult, RevisionRequest};
pub use failure::{ErrorKind, FailureContext, FailurePattern, FailureRecord};
pub use issue::QueuedIssue;
pub use minion::{MinionRecord, MinionStatus};
pub use review::{
    CheckResult, CheckStatus, ChecksReport, FileChange, InlineComment, PrDetails,
    ReviewDecision, ReviewResult,
};
pub use scope::{ScopeMode, ScopePolicy};
