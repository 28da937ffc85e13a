//! Domain layer: plain data models and errors, no I/O.

pub mod errors;
pub mod models;
