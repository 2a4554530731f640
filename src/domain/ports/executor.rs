//! Executor callback port (§6.1: "Consumed by the core — Executor callback").
//!
//! The scheduler is purely functional with respect to how a task actually
//! runs: given a bound agent instance and a task, it calls out to this port
//! and awaits a `TaskResult`. Concrete executors (an MCP tool-call loop, a
//! shelled-out subprocess, a test double) live outside this crate.

use async_trait::async_trait;

use crate::domain::error::OrchestratorError;
use crate::domain::models::{AgentInstance, Task, TaskResult};

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, instance: &AgentInstance, task: &Task) -> Result<TaskResult, OrchestratorError>;
}
