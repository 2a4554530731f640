//! Infrastructure layer: adapters for external dependencies.
//!
//! - `database`: SQLite connection pooling (WAL mode)
//! - `config`: layered `figment` configuration loading
//! - `logging`: `tracing`-based structured logging

pub mod config;
pub mod database;
pub mod logging;
