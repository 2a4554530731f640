//! Task domain model (§3.1 of the design spec).
//!
//! A task is the unit the scheduler dispatches. Its status progresses
//! monotonically except `retrying -> queued`; it is terminal iff status is
//! one of `completed`, `failed`, `cancelled`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Dispatch priority. Smaller rank dispatches first (§4.1, priority ordering
/// rule 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
    Background = 4,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl Priority {
    pub const fn rank(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
            Self::Background => "background",
        }
    }
}

/// Status of a task in the scheduler's state machine (§3.1, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Retrying => "retrying",
        }
    }

    /// A task is terminal iff status is one of these three (§3.1 invariant).
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Valid forward transitions, per the state machine in §4.1. `retrying
    /// -> queued` is the one documented exception to monotonic progression.
    pub fn can_transition_to(self, next: Self) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Pending, Cancelled)
                | (Queued, Assigned)
                | (Queued, Cancelled)
                | (Assigned, Running)
                | (Assigned, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Retrying)
                | (Retrying, Queued)
                | (Retrying, Cancelled)
        )
    }
}

/// Metrics attached to a terminal task result (§3.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub cost: f64,
    pub tokens: u64,
    pub start_epoch_ms: Option<i64>,
    pub end_epoch_ms: Option<i64>,
}

/// Outcome of a terminal task (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub output: Vec<u8>,
    pub error: Option<String>,
    pub metrics: Option<TaskMetrics>,
}

impl TaskResult {
    pub fn success(output: Vec<u8>) -> Self {
        Self { success: true, output, error: None, metrics: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self { success: false, output: Vec::new(), error: Some(error.into()), metrics: None }
    }

    pub fn with_metrics(mut self, metrics: TaskMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Metadata keys the scheduler itself writes and reads (§4.1.1 race/swarm
/// linkage). Stored as plain string/string pairs in `Task::metadata` like
/// any caller-supplied metadata, since the spec treats the metadata map as
/// opaque except for these two reserved keys.
pub const META_RACE_PARENT: &str = "raceParent";
pub const META_SWARM_PARENT: &str = "swarmParent";

/// A unit of dispatchable work (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_type: String,
    pub input: Vec<u8>,
    pub priority: Priority,
    pub deadline_epoch_ms: Option<i64>,
    pub dependencies: Vec<String>,
    pub max_retries: u32,
    pub metadata: HashMap<String, String>,
    pub preferred_slot: Option<String>,

    pub status: TaskStatus,
    pub retry_count: u32,
    pub submitted_at: DateTime<Utc>,
    /// Monotonic submission sequence, the final FIFO tiebreak (§4.1 rule 3).
    pub submission_seq: u64,
    pub result: Option<TaskResult>,
}

impl Task {
    pub fn new(id: impl Into<String>, task_type: impl Into<String>, input: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            input,
            priority: Priority::default(),
            deadline_epoch_ms: None,
            dependencies: Vec::new(),
            max_retries: 0,
            metadata: HashMap::new(),
            preferred_slot: None,
            status: TaskStatus::Pending,
            retry_count: 0,
            submitted_at: Utc::now(),
            submission_seq: 0,
            result: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, epoch_ms: i64) -> Self {
        self.deadline_epoch_ms = Some(epoch_ms);
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn race_parent(&self) -> Option<&str> {
        self.metadata.get(META_RACE_PARENT).map(String::as_str)
    }

    pub fn swarm_parent(&self) -> Option<&str> {
        self.metadata.get(META_SWARM_PARENT).map(String::as_str)
    }

    /// A top-level task has no race/swarm parent link (§4.1.6).
    pub fn is_top_level(&self) -> bool {
        self.race_parent().is_none() && self.swarm_parent().is_none()
    }

    pub fn child_id(parent_id: &str, kind: &str, slot_id: &str) -> String {
        format!("{parent_id}:{kind}-{slot_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_rank_orders_critical_first() {
        assert!(Priority::Critical.rank() < Priority::High.rank());
        assert!(Priority::High.rank() < Priority::Normal.rank());
        assert!(Priority::Normal.rank() < Priority::Low.rank());
        assert!(Priority::Low.rank() < Priority::Background.rank());
    }

    #[test]
    fn terminal_states_match_spec() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Retrying.is_terminal());
    }

    #[test]
    fn retrying_to_queued_is_the_one_non_monotonic_edge() {
        assert!(TaskStatus::Retrying.can_transition_to(TaskStatus::Queued));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Queued));
        assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn race_child_id_format() {
        assert_eq!(Task::child_id("T1", "race", "alpha"), "T1:race-alpha");
        assert_eq!(Task::child_id("T1", "swarm", "beta"), "T1:swarm-beta");
    }

    #[test]
    fn top_level_detection_uses_reserved_metadata_keys() {
        let mut t = Task::new("T1:race-alpha", "build", vec![]);
        t.metadata.insert(META_RACE_PARENT.to_string(), "T1".to_string());
        assert!(!t.is_top_level());
        assert_eq!(t.race_parent(), Some("T1"));

        let plain = Task::new("T1", "build", vec![]);
        assert!(plain.is_top_level());
    }
}
