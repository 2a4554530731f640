//! Domain models: pure entities with business logic and validation rules.
//! Framework-agnostic, no infrastructure concerns.

pub mod agent;
pub mod audit;
pub mod config;
pub mod graph;
pub mod memory;
pub mod plan;
pub mod queue;
pub mod session;
pub mod task;

pub use agent::{AgentInstance, AgentInstanceStatus, AgentSlot};
pub use audit::{ConsolidationLogRow, CycleStatus, CycleType, NidraState};
pub use graph::{GraphEdge, GraphNode};
pub use config::{CircuitBreakerConfig, Config, DatabaseConfig, LoggingConfig, RetryConfig, SchedulerConfig, SvapnaConfig};
pub use memory::{ParamSchemaEntry, ParamType, Pramana, Samskara, Valence, Vasana, Vidhi, VidhiStep};
pub use plan::{CoordinationPolicy, FallbackPolicy, OrchestrationPlan, RoutingRule, Strategy, SwarmMergePolicy};
pub use queue::{PriorityKey, PriorityQueue};
pub use session::{Session, ToolCall, Turn};
pub use task::{Priority, Task, TaskMetrics, TaskResult, TaskStatus, META_RACE_PARENT, META_SWARM_PARENT};
