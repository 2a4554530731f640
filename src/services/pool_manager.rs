//! Agent Pool Manager (Component B, §4.2).
//!
//! Owns, per slot, a set of agent instances and a FIFO queue of tasks
//! waiting for an idle instance. Plain synchronous state: the scheduler
//! actor (§9 "message-driven core") is this manager's sole owner and
//! mutator, so there is no internal locking here — avoiding the cyclic
//! task<->agent pointer problem with two lookup indices instead (§9
//! "cyclic ownership avoidance").

use std::collections::{HashMap, VecDeque};

use crate::domain::error::OrchestratorError;
use crate::domain::models::{AgentInstance, AgentInstanceStatus, AgentSlot};

/// Result of attempting to assign a task to a slot (§4.2 "Assign").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignOutcome {
    Assigned { instance_id: String },
    Queued,
}

/// Result of freeing an instance (§4.2 "Free"): whether another waiting
/// task was immediately bound to the now-idle instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeOutcome {
    pub next_assignment: Option<(String /* task_id */, String /* instance_id */)>,
}

pub struct AgentPoolManager {
    slots: HashMap<String, AgentSlot>,
    instances: HashMap<String, Vec<AgentInstance>>,
    queues: HashMap<String, VecDeque<String>>,
    next_suffix: HashMap<String, u64>,
    /// task id -> (slot id, instance id), the second lookup index (§9).
    task_bindings: HashMap<String, (String, String)>,
}

impl AgentPoolManager {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            instances: HashMap::new(),
            queues: HashMap::new(),
            next_suffix: HashMap::new(),
            task_bindings: HashMap::new(),
        }
    }

    /// Register a slot and spawn its `minInstances` instances (§3.2
    /// invariant: active count stays within `[min, max]`).
    pub fn register_slot(&mut self, slot: AgentSlot) {
        let id = slot.id.clone();
        let mut instances = Vec::new();
        let mut suffix = 0u64;
        for _ in 0..slot.min_instances {
            suffix += 1;
            instances.push(AgentInstance::spawn(&id, suffix));
        }
        self.next_suffix.insert(id.clone(), suffix);
        self.instances.insert(id.clone(), instances);
        self.queues.insert(id.clone(), VecDeque::new());
        self.slots.insert(id, slot);
    }

    pub fn slot_ids(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    pub fn slot(&self, slot_id: &str) -> Option<&AgentSlot> {
        self.slots.get(slot_id)
    }

    fn spawn_instance(&mut self, slot_id: &str) -> String {
        let suffix = self.next_suffix.entry(slot_id.to_string()).or_insert(0);
        *suffix += 1;
        let instance = AgentInstance::spawn(slot_id, *suffix);
        let id = instance.id.clone();
        self.instances.entry(slot_id.to_string()).or_default().push(instance);
        id
    }

    pub fn instance_count(&self, slot_id: &str) -> usize {
        self.instances.get(slot_id).map_or(0, Vec::len)
    }

    pub fn queue_depth(&self, slot_id: &str) -> usize {
        self.queues.get(slot_id).map_or(0, VecDeque::len)
    }

    pub fn running_tasks(&self, slot_id: &str) -> usize {
        self.instances
            .get(slot_id)
            .map(|v| v.iter().filter(|i| !i.is_idle()).count())
            .unwrap_or(0)
    }

    pub fn completed_tasks(&self, slot_id: &str) -> u64 {
        self.instances.get(slot_id).map_or(0, |v| v.iter().map(|i| i.tasks_completed).sum())
    }

    pub fn active_instances(&self) -> Vec<AgentInstance> {
        self.instances.values().flatten().filter(|i| !i.is_idle()).cloned().collect()
    }

    pub fn all_instances(&self) -> Vec<AgentInstance> {
        self.instances.values().flatten().cloned().collect()
    }

    fn idle_instance_id(&self, slot_id: &str) -> Option<String> {
        self.instances.get(slot_id)?.iter().find(|i| i.is_idle()).map(|i| i.id.clone())
    }

    fn bind(&mut self, slot_id: &str, instance_id: &str, task_id: &str) {
        if let Some(instances) = self.instances.get_mut(slot_id) {
            if let Some(inst) = instances.iter_mut().find(|i| i.id == instance_id) {
                inst.bind(task_id);
            }
        }
        self.task_bindings.insert(task_id.to_string(), (slot_id.to_string(), instance_id.to_string()));
    }

    /// §4.2 "Assign": bind to an idle instance if one exists, else enqueue
    /// on the slot's FIFO queue and evaluate auto-scale. Returns whether
    /// the slot is now overloaded (`queue-depth > instance-count`), which
    /// the caller emits `agent:overloaded` for regardless of `autoScale`.
    pub fn assign(&mut self, slot_id: &str, task_id: &str) -> (AssignOutcome, bool, Option<String> /* spawned instance */) {
        if let Some(instance_id) = self.idle_instance_id(slot_id) {
            self.bind(slot_id, &instance_id, task_id);
            return (AssignOutcome::Assigned { instance_id }, false, None);
        }

        self.queues.entry(slot_id.to_string()).or_default().push_back(task_id.to_string());

        let mut spawned = None;
        if let Some(slot) = self.slots.get(slot_id) {
            let count = self.instance_count(slot_id);
            let depth = self.queue_depth(slot_id);
            if slot.auto_scale && slot.max_instances.map_or(true, |max| count < max as usize) && depth > 0 {
                spawned = Some(self.spawn_instance(slot_id));
            }
        }

        let overloaded = self.queue_depth(slot_id) > self.instance_count(slot_id);
        (AssignOutcome::Queued, overloaded, spawned)
    }

    /// §4.2 "Free": release the instance bound to `task_id`, then
    /// immediately bind the next queued task if any.
    pub fn free(&mut self, task_id: &str) -> Option<FreeOutcome> {
        let (slot_id, instance_id) = self.task_bindings.remove(task_id)?;
        if let Some(instances) = self.instances.get_mut(&slot_id) {
            if let Some(inst) = instances.iter_mut().find(|i| i.id == instance_id) {
                inst.free();
            }
        }

        let next = self.queues.get_mut(&slot_id).and_then(VecDeque::pop_front);
        let next_assignment = next.map(|next_task_id| {
            self.bind(&slot_id, &instance_id, &next_task_id);
            (next_task_id, instance_id.clone())
        });

        Some(FreeOutcome { next_assignment })
    }

    /// Remove a task from its slot's waiting queue without an instance
    /// ever having been bound (§4.1 `cancel` on a still-queued task).
    pub fn remove_from_queue(&mut self, task_id: &str) -> bool {
        for queue in self.queues.values_mut() {
            if let Some(pos) = queue.iter().position(|t| t == task_id) {
                queue.remove(pos);
                return true;
            }
        }
        false
    }

    /// Release a binding on cancellation without routing to the next
    /// queued task's normal free-path event semantics (the scheduler emits
    /// its own events for the resulting re-assignment).
    pub fn release_binding(&mut self, task_id: &str) -> Option<FreeOutcome> {
        self.free(task_id)
    }

    pub fn binding_of(&self, task_id: &str) -> Option<(String, String)> {
        self.task_bindings.get(task_id).cloned()
    }

    /// `scaleAgent` (§4.2 "Scale down", §6.2): remove only idle instances
    /// until `current == target` or no idle instances remain; spawn new
    /// idle instances if `target` is above current count (bounded by
    /// `maxInstances`).
    pub fn scale_agent(&mut self, slot_id: &str, target: u32) -> Result<(), OrchestratorError> {
        if !self.slots.contains_key(slot_id) {
            return Err(OrchestratorError::UnknownAgentSlot(slot_id.to_string()));
        }

        let current = self.instance_count(slot_id) as u32;
        if target > current {
            for _ in 0..(target - current) {
                self.spawn_instance(slot_id);
            }
            return Ok(());
        }

        let mut to_remove = current.saturating_sub(target);
        if let Some(instances) = self.instances.get_mut(slot_id) {
            instances.retain(|inst| {
                if to_remove > 0 && inst.is_idle() {
                    to_remove -= 1;
                    false
                } else {
                    true
                }
            });
        }
        Ok(())
    }
}

impl Default for AgentPoolManager {
    fn default() -> Self {
        Self::new()
    }
}
