//! Nidra — AI agent orchestration core.
//!
//! Coordinates a tree of LLM-backed agents executing user tasks: a
//! priority-driven task scheduler (`services::scheduler`), an agent pool
//! manager (`services::pool_manager`), resilient provider transport with
//! circuit breaking (`services::transport`, `services::circuit_breaker`),
//! a memory consolidation pipeline (`services::consolidation`), and a
//! report synthesizer (`services::report_synthesizer`). The CLI, dashboard
//! UI, HTTP routing surface, LLM provider implementations, and MCP
//! transport are external collaborators this crate only defines ports for.

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::error::{CircuitOpenError, OrchestratorError, ProviderError, ProviderErrorCategory, StoreError};
pub use domain::models::Config;
pub use services::consolidation::{ConsolidationPipeline, SvapnaResult};
pub use services::report_synthesizer::{ReportKind, ReportSynthesizer};
pub use services::scheduler::Scheduler;
