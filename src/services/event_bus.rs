//! Event Bus (Component F, §4.6).
//!
//! A single synchronous callback per orchestrator. Every lifecycle event
//! the other components publish flows through here; the handler is called
//! in-line from the emitting component's execution context (§4.6, §5). A
//! panic inside the handler is caught and logged rather than allowed to
//! interrupt scheduler progress (§4.6, §7 "Handler exceptions ... are
//! caught and logged; never propagated").

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use crate::domain::models::{Priority, TaskResult};

/// The fixed set of lifecycle event kinds (§4.6). Closed sum type rather
/// than a plugin interface, per §9's "dynamic dispatch -> tagged
/// strategies" guidance applied to events too.
#[derive(Debug, Clone)]
pub enum Event {
    PlanStart { plan_id: String },
    PlanComplete { plan_id: String, results: Vec<(String, TaskResult)> },
    PlanFailed { plan_id: String, reason: String },
    TaskQueued { task_id: String, slot_id: Option<String> },
    TaskAssigned { task_id: String, slot_id: String, instance_id: String },
    TaskRetry { task_id: String, retry_count: u32, delay_ms: u64 },
    TaskCompleted { task_id: String, result: TaskResult },
    /// Carries the canonical provider error category name when the
    /// failure originated at the transport boundary (§7: "task:failed
    /// events carry the canonical category name in the error payload").
    TaskFailed { task_id: String, error: String, category: Option<String> },
    AgentSpawned { slot_id: String, instance_id: String },
    AgentIdle { slot_id: String, instance_id: String },
    AgentOverloaded { slot_id: String, queue_depth: usize, instance_count: usize },
    Escalation { task_id: String, priority: Priority, reason: String },
}

impl Event {
    /// The wire-ish tag used in logs, matching the `area:kind` spelling in
    /// §4.6 (`plan:start`, `task:queued`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlanStart { .. } => "plan:start",
            Self::PlanComplete { .. } => "plan:complete",
            Self::PlanFailed { .. } => "plan:failed",
            Self::TaskQueued { .. } => "task:queued",
            Self::TaskAssigned { .. } => "task:assigned",
            Self::TaskRetry { .. } => "task:retry",
            Self::TaskCompleted { .. } => "task:completed",
            Self::TaskFailed { .. } => "task:failed",
            Self::AgentSpawned { .. } => "agent:spawned",
            Self::AgentIdle { .. } => "agent:idle",
            Self::AgentOverloaded { .. } => "agent:overloaded",
            Self::Escalation { .. } => "escalation",
        }
    }
}

type Handler = dyn Fn(&Event) + Send + Sync;

/// Single-consumer callback surface over which all components publish
/// lifecycle events (§2 component F).
#[derive(Clone, Default)]
pub struct EventBus {
    handler: Arc<RwLock<Option<Arc<Handler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self { handler: Arc::new(RwLock::new(None)) }
    }

    /// Register the (sole) subscriber. Replaces any previously registered
    /// handler, matching "a single on-event callback per orchestrator".
    pub fn on_event(&self, handler: impl Fn(&Event) + Send + Sync + 'static) {
        *self.handler.write().expect("event bus handler lock poisoned") = Some(Arc::new(handler));
    }

    pub fn clear_handler(&self) {
        *self.handler.write().expect("event bus handler lock poisoned") = None;
    }

    /// Publish an event synchronously. Always also logs at `info`/`warn`
    /// via `tracing` (§10.4) independent of whether a handler is
    /// registered, since the event bus is a notification mechanism, not
    /// the sole record of what happened.
    pub fn emit(&self, event: Event) {
        match &event {
            Event::TaskFailed { task_id, error, .. } => {
                tracing::warn!(task_id, error, kind = event.kind(), "task failed")
            }
            Event::PlanFailed { plan_id, reason } => {
                tracing::warn!(plan_id, reason, kind = event.kind(), "plan failed")
            }
            Event::Escalation { task_id, reason, .. } => {
                tracing::warn!(task_id, reason, kind = event.kind(), "escalated to human")
            }
            _ => tracing::info!(kind = event.kind(), "lifecycle event"),
        }

        let handler = self.handler.read().expect("event bus handler lock poisoned").clone();
        let Some(handler) = handler else { return };

        let kind = event.kind();
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
        if let Err(panic) = result {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(kind, message, "event bus handler panicked; scheduler progress continues");
        }
    }
}
