//! Application services: the orchestration core's six components (§3).
//!
//! - `scheduler` — Task Scheduler (A)
//! - `pool_manager` — Agent Pool Manager (B)
//! - `transport`, `circuit_breaker` — Resilient Transport (C)
//! - `consolidation` — Consolidation Pipeline "Svapna" (D)
//! - `report_synthesizer` — Report Synthesizer (E)
//! - `event_bus` — Event Bus (F)

pub mod circuit_breaker;
pub mod consolidation;
pub mod event_bus;
pub mod pool_manager;
pub mod report_synthesizer;
pub mod scheduler;
pub mod transport;

pub use circuit_breaker::{CircuitBreakerRegistry, CircuitState, CircuitStats};
pub use consolidation::{ConsolidationPipeline, SvapnaResult};
pub use event_bus::{Event, EventBus};
pub use pool_manager::{AgentPoolManager, AssignOutcome, FreeOutcome};
pub use report_synthesizer::{ReportKind, ReportSynthesizer};
pub use scheduler::{Scheduler, SchedulerStats};
pub use transport::{resilient_stream, TransportError};
