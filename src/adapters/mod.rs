//! Adapters implementing domain ports against concrete external systems.
//!
//! - `sqlite`: `ConsolidationStore` backed by a `sqlx` SQLite pool

pub mod sqlite;
