//! Configuration management infrastructure.
//!
//! Hierarchical configuration using `figment`: programmatic defaults,
//! optional YAML file, then `NIDRA_`-prefixed environment overrides
//! (§10.3).

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
