//! Domain layer: core business logic and domain models for the agent
//! runtime (task scheduler, agent pool, resilient transport, memory
//! consolidation, report synthesis).

pub mod error;
pub mod models;
pub mod ports;

pub use error::{CircuitOpenError, OrchestratorError, ProviderError, ProviderErrorCategory, StoreError};
