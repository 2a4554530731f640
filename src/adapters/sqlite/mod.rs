//! SQLite adapter for the `ConsolidationStore` port (§6.1, §10.5).

pub mod consolidation_store;

pub use consolidation_store::SqliteConsolidationStore;
