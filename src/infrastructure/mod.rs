//! Infrastructure layer: configuration, logging, persistence, and the
//! HTTP/subprocess clients the services are built on.

pub mod config;
pub mod containers;
pub mod database;
pub mod git;
pub mod github;
pub mod llm;
pub mod logging;
