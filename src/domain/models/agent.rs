//! Agent slot and agent instance domain models (§3.2, §3.3).
//!
//! A slot is a typed pool description (role, capability tags, bounds); an
//! instance is a concrete, spawned worker bound to exactly one slot.

use serde::{Deserialize, Serialize};

/// Runtime status of a single agent instance (§3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentInstanceStatus {
    Idle,
    Busy,
    Overloaded,
}

impl Default for AgentInstanceStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl AgentInstanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Overloaded => "overloaded",
        }
    }
}

/// A typed pool slot from which concrete agent instances are drawn (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSlot {
    pub id: String,
    pub role: String,
    pub capability_tags: Vec<String>,
    pub min_instances: u32,
    /// `None` means unbounded.
    pub max_instances: Option<u32>,
    pub auto_scale: bool,
}

impl AgentSlot {
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            capability_tags: Vec::new(),
            min_instances: 1,
            max_instances: None,
            auto_scale: false,
        }
    }

    pub fn with_capabilities(mut self, tags: Vec<String>) -> Self {
        self.capability_tags = tags;
        self
    }

    pub fn with_bounds(mut self, min: u32, max: Option<u32>) -> Self {
        self.min_instances = min;
        self.max_instances = max;
        self
    }

    pub fn with_auto_scale(mut self, auto_scale: bool) -> Self {
        self.auto_scale = auto_scale;
        self
    }

    /// Jaccard similarity between this slot's capability tags and a task's
    /// requested tag set, used by the `specialized` strategy's fallback
    /// comparison (§4.1.1) when no exact tag match exists.
    pub fn tag_jaccard(&self, other: &[String]) -> f64 {
        use std::collections::HashSet;
        let a: HashSet<&String> = self.capability_tags.iter().collect();
        let b: HashSet<&String> = other.iter().collect();
        if a.is_empty() && b.is_empty() {
            return 0.0;
        }
        let intersection = a.intersection(&b).count() as f64;
        let union = a.union(&b).count() as f64;
        if union == 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    pub fn within_bounds(&self, count: u32) -> bool {
        count >= self.min_instances && self.max_instances.map_or(true, |max| count <= max)
    }
}

/// A concrete, spawned worker bound to one slot (§3.3). Identity is
/// slot-qualified: `{slotId}-{suffix}` where suffix is a per-slot monotonic
/// counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInstance {
    pub id: String,
    pub slot_id: String,
    pub current_task_id: Option<String>,
    pub tasks_completed: u64,
    pub status: AgentInstanceStatus,
}

impl AgentInstance {
    pub fn spawn(slot_id: impl Into<String>, suffix: u64) -> Self {
        let slot_id = slot_id.into();
        Self {
            id: format!("{slot_id}-{suffix}"),
            slot_id,
            current_task_id: None,
            tasks_completed: 0,
            status: AgentInstanceStatus::Idle,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.status, AgentInstanceStatus::Idle)
    }

    pub fn bind(&mut self, task_id: impl Into<String>) {
        self.current_task_id = Some(task_id.into());
        self.status = AgentInstanceStatus::Busy;
    }

    /// Return this instance to idle on a task's terminal transition (§4.2
    /// "Free"), bumping its completed counter.
    pub fn free(&mut self) {
        self.current_task_id = None;
        self.tasks_completed += 1;
        self.status = AgentInstanceStatus::Idle;
    }

    pub fn mark_overloaded(&mut self) {
        if self.is_idle() {
            self.status = AgentInstanceStatus::Overloaded;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_bounds_check() {
        let slot = AgentSlot::new("s1", "coder").with_bounds(1, Some(5));
        assert!(slot.within_bounds(1));
        assert!(slot.within_bounds(5));
        assert!(!slot.within_bounds(0));
        assert!(!slot.within_bounds(6));
    }

    #[test]
    fn unbounded_slot_accepts_any_upper_count() {
        let slot = AgentSlot::new("s1", "coder").with_bounds(0, None);
        assert!(slot.within_bounds(1000));
    }

    #[test]
    fn tag_jaccard_exact_match_is_one() {
        let slot = AgentSlot::new("s1", "coder").with_capabilities(vec!["rust".into(), "cli".into()]);
        assert_eq!(slot.tag_jaccard(&["rust".to_string(), "cli".to_string()]), 1.0);
    }

    #[test]
    fn tag_jaccard_partial_overlap() {
        let slot = AgentSlot::new("s1", "coder").with_capabilities(vec!["rust".into(), "cli".into()]);
        let sim = slot.tag_jaccard(&["rust".to_string(), "web".to_string()]);
        assert!((sim - (1.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn instance_lifecycle_bind_and_free() {
        let mut inst = AgentInstance::spawn("s1", 1);
        assert_eq!(inst.id, "s1-1");
        assert!(inst.is_idle());

        inst.bind("task-a");
        assert!(!inst.is_idle());
        assert_eq!(inst.current_task_id.as_deref(), Some("task-a"));

        inst.free();
        assert!(inst.is_idle());
        assert_eq!(inst.tasks_completed, 1);
        assert!(inst.current_task_id.is_none());
    }
}
