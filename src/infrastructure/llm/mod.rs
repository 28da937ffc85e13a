//! Unified LLM request surface: the process-wide connection pool, the
//! OpenAI-compatible chat client, and the cloud SDK adapters.

pub mod client;
pub mod cloud;
pub mod pool;
pub mod types;

pub use client::{LlmClient, LlmClientConfig};
pub use cloud::{estimate_cost, resolve_model, CloudProvider, CloudResponse};
pub use pool::{LlmPool, PoolStats};
pub use types::{LlmResponse, StreamChunk, Usage};
