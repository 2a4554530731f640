//! Domain ports: the seams between the orchestration core and its external
//! collaborators (§6.1). Adapters for these traits live under
//! `infrastructure` and, for providers/executors, are expected to be
//! supplied by the embedding application.

pub mod decomposer;
pub mod executor;
pub mod provider;
pub mod store;

pub use decomposer::{Decomposer, NoopDecomposer};
pub use executor::TaskExecutor;
pub use provider::{LlmProvider, StreamEvent};
pub use store::ConsolidationStore;
