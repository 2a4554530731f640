//! Database infrastructure: SQLite connection pooling (WAL mode) and
//! datetime parsing helpers shared by the relational store adapter.

pub mod connection;
pub mod utils;

pub use connection::DatabaseConnection;
