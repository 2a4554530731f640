//! Task Scheduler (Component A, §4.1).
//!
//! A message-driven actor (§9 "Async control flow -> message-driven
//! core"): all task/agent state lives on one `SchedulerActor`, mutated only
//! in response to commands it receives over an internal channel. External
//! callers (including the executor worker contexts that deliver
//! `handleCompletion`/`handleFailure`) never touch that state directly —
//! they send a command and, for request/response calls, await a oneshot
//! reply. This is what gives §5's "serialized" ordering guarantee for free:
//! the actor's `select!` loop processes one command (or one tick) at a
//! time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::domain::error::OrchestratorError;
use crate::domain::models::{
    AgentInstance, OrchestrationPlan, PriorityKey, PriorityQueue, Strategy, SwarmMergePolicy, Task,
    TaskResult, TaskStatus, META_RACE_PARENT, META_SWARM_PARENT,
};
use crate::domain::ports::{Decomposer, TaskExecutor};

use super::event_bus::{Event, EventBus};
use super::pool_manager::{AgentPoolManager, AssignOutcome};

/// Snapshot returned by `getStats` (§4.1, §6.2).
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub total_tasks: u64,
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub active_agents: u64,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub average_latency_ms: f64,
    pub throughput_per_sec: f64,
}

/// Metadata key marking a hierarchical task that has already gone through
/// one decomposition pass, so a non-trivial decomposer is not invoked a
/// second time when the task re-enters dispatch after its sub-tasks
/// complete (Open Question resolution, see DESIGN.md).
const META_HIERARCHICAL_DECOMPOSED: &str = "_hierarchicalDecomposed";

struct SwarmContext {
    results: HashMap<String, TaskResult>,
    total: usize,
}

type FallbackHandler = dyn Fn(&Task) -> Option<Task> + Send + Sync;

enum Command {
    Submit(Task, oneshot::Sender<String>),
    SubmitBatch(Vec<Task>, oneshot::Sender<Vec<String>>),
    Cancel(String, oneshot::Sender<bool>),
    Completion(String, TaskResult),
    Failure(String, String),
    Requeue(String),
    Start,
    Stop(oneshot::Sender<()>),
    Pause,
    Resume,
    Stats(oneshot::Sender<SchedulerStats>),
    ActiveAgents(oneshot::Sender<Vec<AgentInstance>>),
    Results(oneshot::Sender<HashMap<String, TaskResult>>),
    ScaleAgent(String, u32, oneshot::Sender<Result<(), OrchestratorError>>),
    SetFallbackHandler(Arc<FallbackHandler>),
}

/// Cloneable handle to a running scheduler actor (§6.2 public contract).
#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<Command>,
}

impl Scheduler {
    /// Spawn the actor and return a handle to it. The actor starts
    /// stopped; call `start()` to begin processing ticks.
    pub fn spawn(
        plan: OrchestrationPlan,
        executor: Arc<dyn TaskExecutor>,
        decomposer: Arc<dyn Decomposer>,
        events: EventBus,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = SchedulerActor::new(plan, executor, decomposer, events, tx.clone());
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    pub async fn submit(&self, task: Task) -> String {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(Command::Submit(task, reply_tx));
        reply_rx.await.expect("scheduler actor dropped before replying")
    }

    pub async fn submit_batch(&self, tasks: Vec<Task>) -> Vec<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(Command::SubmitBatch(tasks, reply_tx));
        reply_rx.await.expect("scheduler actor dropped before replying")
    }

    pub async fn cancel(&self, task_id: impl Into<String>) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(Command::Cancel(task_id.into(), reply_tx));
        reply_rx.await.unwrap_or(false)
    }

    /// Called by the executor/transport layer on a terminal success (§4.1,
    /// §6.1 "Executor callback").
    pub fn handle_completion(&self, task_id: impl Into<String>, result: TaskResult) {
        let _ = self.tx.send(Command::Completion(task_id.into(), result));
    }

    /// Called by the executor/transport layer on a terminal failure.
    pub fn handle_failure(&self, task_id: impl Into<String>, error: impl Into<String>) {
        let _ = self.tx.send(Command::Failure(task_id.into(), error.into()));
    }

    pub fn start(&self) {
        let _ = self.tx.send(Command::Start);
    }

    /// Idempotent (R2): a second call observes no additional side effects.
    pub async fn stop(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(Command::Stop(reply_tx));
        let _ = reply_rx.await;
    }

    pub fn pause(&self) {
        let _ = self.tx.send(Command::Pause);
    }

    pub fn resume(&self) {
        let _ = self.tx.send(Command::Resume);
    }

    pub async fn get_stats(&self) -> SchedulerStats {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(Command::Stats(reply_tx));
        reply_rx.await.unwrap_or_default()
    }

    pub async fn get_active_agents(&self) -> Vec<AgentInstance> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(Command::ActiveAgents(reply_tx));
        reply_rx.await.unwrap_or_default()
    }

    pub async fn get_results(&self) -> HashMap<String, TaskResult> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(Command::Results(reply_tx));
        reply_rx.await.unwrap_or_default()
    }

    pub async fn scale_agent(&self, slot_id: impl Into<String>, target: u32) -> Result<(), OrchestratorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(Command::ScaleAgent(slot_id.into(), target, reply_tx));
        reply_rx.await.unwrap_or(Err(OrchestratorError::InvalidState("scheduler actor unavailable".into())))
    }

    /// Register the custom fallback handler invoked by §4.1.5 step 1.
    pub fn set_fallback_handler(&self, handler: impl Fn(&Task) -> Option<Task> + Send + Sync + 'static) {
        let _ = self.tx.send(Command::SetFallbackHandler(Arc::new(handler)));
    }
}

struct SchedulerActor {
    plan: OrchestrationPlan,
    executor: Arc<dyn TaskExecutor>,
    decomposer: Arc<dyn Decomposer>,
    events: EventBus,
    cmd_tx: mpsc::UnboundedSender<Command>,

    tasks: HashMap<String, Task>,
    main_queue: PriorityQueue<String>,
    pool: AgentPoolManager,
    swarm_contexts: HashMap<String, SwarmContext>,
    fallback_handler: Option<Arc<FallbackHandler>>,

    rr_index: usize,
    submission_seq: u64,
    running: bool,
    paused: bool,
    stop_count: u32,
    plan_terminal_emitted: bool,
    started_at: DateTime<Utc>,
}

impl SchedulerActor {
    fn new(
        plan: OrchestrationPlan,
        executor: Arc<dyn TaskExecutor>,
        decomposer: Arc<dyn Decomposer>,
        events: EventBus,
        cmd_tx: mpsc::UnboundedSender<Command>,
    ) -> Self {
        let mut pool = AgentPoolManager::new();
        for slot in plan.slots.clone() {
            pool.register_slot(slot);
        }
        Self {
            plan,
            executor,
            decomposer,
            events,
            cmd_tx,
            tasks: HashMap::new(),
            main_queue: PriorityQueue::new(),
            pool,
            swarm_contexts: HashMap::new(),
            fallback_handler: None,
            rr_index: 0,
            submission_seq: 0,
            running: false,
            paused: false,
            stop_count: 0,
            plan_terminal_emitted: false,
            started_at: Utc::now(),
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        loop {
            tokio::select! {
                maybe_cmd = rx.recv() => {
                    match maybe_cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if self.running && !self.paused {
                        self.process_tick();
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Submit(task, reply) => {
                let id = self.register_and_enqueue(task);
                let _ = reply.send(id);
            }
            Command::SubmitBatch(tasks, reply) => {
                let ids = tasks.into_iter().map(|t| self.register_and_enqueue(t)).collect();
                let _ = reply.send(ids);
            }
            Command::Cancel(task_id, reply) => {
                let _ = reply.send(self.cancel(&task_id));
            }
            Command::Completion(task_id, result) => self.handle_completion(task_id, result),
            Command::Failure(task_id, err) => self.handle_failure(task_id, err),
            Command::Requeue(task_id) => self.requeue(&task_id),
            Command::Start => {
                self.running = true;
                self.events.emit(Event::PlanStart { plan_id: self.plan.id.clone() });
                self.process_tick();
            }
            Command::Stop(reply) => {
                self.stop();
                let _ = reply.send(());
            }
            Command::Pause => self.paused = true,
            Command::Resume => self.paused = false,
            Command::Stats(reply) => {
                let _ = reply.send(self.compute_stats());
            }
            Command::ActiveAgents(reply) => {
                let _ = reply.send(self.pool.active_instances());
            }
            Command::Results(reply) => {
                let results =
                    self.tasks.values().filter_map(|t| t.result.clone().map(|r| (t.id.clone(), r))).collect();
                let _ = reply.send(results);
            }
            Command::ScaleAgent(slot_id, target, reply) => {
                let _ = reply.send(self.pool.scale_agent(&slot_id, target));
            }
            Command::SetFallbackHandler(handler) => self.fallback_handler = Some(handler),
        }
    }

    // ---- submission / queueing --------------------------------------

    fn next_submission_seq(&mut self) -> u64 {
        self.submission_seq += 1;
        self.submission_seq
    }

    fn register_and_enqueue(&mut self, mut task: Task) -> String {
        task.status = TaskStatus::Pending;
        task.submission_seq = self.next_submission_seq();
        let id = task.id.clone();
        self.tasks.insert(id.clone(), task);
        self.push_to_main_queue(&id);
        id
    }

    fn push_to_main_queue(&mut self, task_id: &str) {
        let Some(task) = self.tasks.get(task_id) else { return };
        let key = PriorityKey {
            rank: task.priority.rank(),
            deadline_epoch_ms: task.deadline_epoch_ms,
            submission_seq: task.submission_seq,
        };
        self.main_queue.push(task_id.to_string(), key);
    }

    fn dependencies_satisfied(&self, task_id: &str) -> bool {
        let Some(task) = self.tasks.get(task_id) else { return false };
        task.dependencies
            .iter()
            .all(|dep| self.tasks.get(dep).is_some_and(|d| d.status == TaskStatus::Completed))
    }

    /// Drain the eligible prefix of the main queue (§4.1 "Processing
    /// loop"). Halts for this tick the moment the head is blocked on an
    /// unmet dependency — no leapfrogging.
    fn process_tick(&mut self) {
        loop {
            let Some(task_id) = self.main_queue.peek().cloned() else { break };
            let Some(task) = self.tasks.get(&task_id) else {
                self.main_queue.pop();
                continue;
            };
            if task.status.is_terminal() {
                self.main_queue.pop();
                continue;
            }
            if !self.dependencies_satisfied(&task_id) {
                break;
            }
            self.main_queue.pop();
            self.dispatch(task_id);
        }
    }

    // ---- strategy dispatch -------------------------------------------

    fn dispatch(&mut self, task_id: String) {
        if let Some(t) = self.tasks.get_mut(&task_id) {
            if t.status == TaskStatus::Pending {
                t.status = TaskStatus::Queued;
            }
        }
        match self.plan.strategy {
            Strategy::Competitive => self.dispatch_competitive(task_id),
            Strategy::Swarm => self.dispatch_swarm(task_id),
            Strategy::Hierarchical => self.dispatch_hierarchical(task_id),
            _ => match self.choose_slot(&task_id) {
                Some(slot_id) => self.assign_to_slot(task_id, slot_id),
                None => self.handle_failure(task_id, "no agent slot available for dispatch".to_string()),
            },
        }
    }

    fn choose_slot(&mut self, task_id: &str) -> Option<String> {
        let task = self.tasks.get(task_id)?.clone();
        if let Some(preferred) = &task.preferred_slot {
            if self.pool.slot(preferred).is_some() {
                return Some(preferred.clone());
            }
        }
        match self.plan.strategy {
            Strategy::RoundRobin => self.choose_round_robin(),
            Strategy::LeastLoaded => self.choose_least_loaded(),
            Strategy::Specialized => self.choose_specialized(&task),
            Strategy::Routed => self.choose_routed(&task),
            Strategy::Competitive | Strategy::Swarm | Strategy::Hierarchical => self.choose_least_loaded(),
        }
    }

    fn choose_round_robin(&mut self) -> Option<String> {
        let slots = &self.plan.slots;
        if slots.is_empty() {
            return None;
        }
        let idx = self.rr_index % slots.len();
        self.rr_index = self.rr_index.wrapping_add(1);
        Some(slots[idx].id.clone())
    }

    fn choose_least_loaded(&self) -> Option<String> {
        self.plan
            .slots
            .iter()
            .min_by(|a, b| {
                let load_a = self.pool.running_tasks(&a.id) + self.pool.queue_depth(&a.id);
                let load_b = self.pool.running_tasks(&b.id) + self.pool.queue_depth(&b.id);
                load_a.cmp(&load_b).then_with(|| self.pool.completed_tasks(&a.id).cmp(&self.pool.completed_tasks(&b.id)))
            })
            .map(|s| s.id.clone())
    }

    fn choose_specialized(&self, task: &Task) -> Option<String> {
        if let Some(exact) = self.plan.slots.iter().find(|s| s.capability_tags.iter().any(|t| t == &task.task_type)) {
            return Some(exact.id.clone());
        }
        self.plan
            .slots
            .iter()
            .max_by(|a, b| {
                let sa = a.tag_jaccard(std::slice::from_ref(&task.task_type));
                let sb = b.tag_jaccard(std::slice::from_ref(&task.task_type));
                sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|s| s.id.clone())
    }

    fn choose_routed(&self, task: &Task) -> Option<String> {
        self.plan.routing_rules.iter().find(|r| (r.predicate)(task)).map(|r| r.slot_id.clone())
    }

    fn assign_to_slot(&mut self, task_id: String, slot_id: String) {
        let (outcome, overloaded, spawned) = self.pool.assign(&slot_id, &task_id);
        if let Some(instance_id) = spawned {
            self.events.emit(Event::AgentSpawned { slot_id: slot_id.clone(), instance_id });
        }
        match outcome {
            AssignOutcome::Assigned { instance_id } => {
                if let Some(t) = self.tasks.get_mut(&task_id) {
                    t.status = TaskStatus::Assigned;
                }
                self.events.emit(Event::TaskAssigned {
                    task_id: task_id.clone(),
                    slot_id: slot_id.clone(),
                    instance_id: instance_id.clone(),
                });
                self.spawn_execution(task_id, instance_id);
            }
            AssignOutcome::Queued => {
                self.events.emit(Event::TaskQueued { task_id: task_id.clone(), slot_id: Some(slot_id.clone()) });
            }
        }
        if overloaded {
            self.events.emit(Event::AgentOverloaded {
                slot_id: slot_id.clone(),
                queue_depth: self.pool.queue_depth(&slot_id),
                instance_count: self.pool.instance_count(&slot_id),
            });
        }
    }

    fn spawn_execution(&mut self, task_id: String, instance_id: String) {
        if let Some(t) = self.tasks.get_mut(&task_id) {
            t.status = TaskStatus::Running;
        }
        let Some(instance) = self.pool.all_instances().into_iter().find(|i| i.id == instance_id) else { return };
        let Some(task) = self.tasks.get(&task_id).cloned() else { return };
        let executor = self.executor.clone();
        let tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            match executor.execute(&instance, &task).await {
                Ok(result) => {
                    let _ = tx.send(Command::Completion(task.id.clone(), result));
                }
                Err(err) => {
                    let _ = tx.send(Command::Failure(task.id.clone(), err.to_string()));
                }
            }
        });
    }

    // ---- competitive / swarm / hierarchical --------------------------

    fn dispatch_competitive(&mut self, parent_id: String) {
        let Some(parent) = self.tasks.get(&parent_id).cloned() else { return };
        for slot_id in self.pool.slot_ids() {
            let child_id = Task::child_id(&parent_id, "race", &slot_id);
            let mut child = parent.clone();
            child.id = child_id.clone();
            child.status = TaskStatus::Pending;
            child.retry_count = 0;
            child.result = None;
            child.metadata.insert(META_RACE_PARENT.to_string(), parent_id.clone());
            child.submission_seq = self.next_submission_seq();
            self.tasks.insert(child_id.clone(), child);
            self.assign_to_slot(child_id, slot_id);
        }
        if let Some(p) = self.tasks.get_mut(&parent_id) {
            p.status = TaskStatus::Running;
        }
    }

    fn dispatch_swarm(&mut self, parent_id: String) {
        let Some(parent) = self.tasks.get(&parent_id).cloned() else { return };
        let slot_ids = self.pool.slot_ids();
        self.swarm_contexts.insert(parent_id.clone(), SwarmContext { results: HashMap::new(), total: slot_ids.len() });
        for slot_id in slot_ids {
            let child_id = Task::child_id(&parent_id, "swarm", &slot_id);
            let mut child = parent.clone();
            child.id = child_id.clone();
            child.status = TaskStatus::Pending;
            child.retry_count = 0;
            child.result = None;
            child.metadata.insert(META_SWARM_PARENT.to_string(), parent_id.clone());
            child.submission_seq = self.next_submission_seq();
            self.tasks.insert(child_id.clone(), child);
            self.assign_to_slot(child_id, slot_id);
        }
        if let Some(p) = self.tasks.get_mut(&parent_id) {
            p.status = TaskStatus::Running;
        }
    }

    fn dispatch_hierarchical(&mut self, task_id: String) {
        let Some(task) = self.tasks.get(&task_id).cloned() else { return };
        if task.metadata.contains_key(META_HIERARCHICAL_DECOMPOSED) {
            match self.choose_slot(&task_id) {
                Some(slot_id) => self.assign_to_slot(task_id, slot_id),
                None => self.handle_failure(task_id, "no agent slot available for dispatch".to_string()),
            }
            return;
        }

        let subtasks = self.decomposer.decompose(&task);
        if subtasks.len() == 1 && subtasks[0].id == task_id {
            match self.choose_slot(&task_id) {
                Some(slot_id) => self.assign_to_slot(task_id, slot_id),
                None => self.handle_failure(task_id, "no agent slot available for dispatch".to_string()),
            }
            return;
        }

        let sub_ids: Vec<String> = subtasks.iter().map(|t| t.id.clone()).collect();
        for sub in subtasks {
            self.register_and_enqueue(sub);
        }
        if let Some(parent) = self.tasks.get_mut(&task_id) {
            parent.dependencies = sub_ids;
            parent.metadata.insert(META_HIERARCHICAL_DECOMPOSED.to_string(), "true".to_string());
            parent.status = TaskStatus::Pending;
        }
        self.push_to_main_queue(&task_id);
    }

    // ---- completion / failure -----------------------------------------

    fn set_terminal(&mut self, task_id: &str, status: TaskStatus, result: Option<TaskResult>) {
        if let Some(t) = self.tasks.get_mut(task_id) {
            t.status = status;
            if result.is_some() {
                t.result = result;
            }
        }
    }

    /// Release the agent bound to `task_id`, reassigning the next queued
    /// task on that slot if any (§4.2 "Free").
    fn complete_free(&mut self, task_id: &str) {
        let Some((slot_id, instance_id)) = self.pool.binding_of(task_id) else { return };
        let Some(outcome) = self.pool.free(task_id) else { return };
        self.events.emit(Event::AgentIdle { slot_id: slot_id.clone(), instance_id: instance_id.clone() });
        if let Some((next_task_id, next_instance_id)) = outcome.next_assignment {
            if let Some(t) = self.tasks.get_mut(&next_task_id) {
                t.status = TaskStatus::Assigned;
            }
            self.events.emit(Event::TaskAssigned {
                task_id: next_task_id.clone(),
                slot_id: slot_id.clone(),
                instance_id: next_instance_id.clone(),
            });
            self.spawn_execution(next_task_id, next_instance_id);
        }
    }

    fn handle_completion(&mut self, task_id: String, result: TaskResult) {
        if let Some(parent_id) = self.tasks.get(&task_id).and_then(|t| t.race_parent().map(str::to_string)) {
            self.resolve_race_win(&parent_id, &task_id, result);
            return;
        }
        if let Some(parent_id) = self.tasks.get(&task_id).and_then(|t| t.swarm_parent().map(str::to_string)) {
            self.set_terminal(&task_id, TaskStatus::Completed, Some(result.clone()));
            self.complete_free(&task_id);
            self.record_swarm_result(&parent_id, &task_id, result);
            self.maybe_finish_swarm(&parent_id);
            self.after_terminal(&task_id);
            return;
        }

        self.set_terminal(&task_id, TaskStatus::Completed, Some(result.clone()));
        self.complete_free(&task_id);
        self.events.emit(Event::TaskCompleted { task_id: task_id.clone(), result });
        self.after_terminal(&task_id);
    }

    fn handle_failure(&mut self, task_id: String, err: String) {
        if let Some(parent_id) = self.tasks.get(&task_id).and_then(|t| t.race_parent().map(str::to_string)) {
            self.set_terminal(&task_id, TaskStatus::Failed, Some(TaskResult::failure(err)));
            self.complete_free(&task_id);
            let any_completed =
                self.tasks.values().any(|t| t.race_parent() == Some(parent_id.as_str()) && t.status == TaskStatus::Completed);
            let all_terminal =
                self.tasks.values().filter(|t| t.race_parent() == Some(parent_id.as_str())).all(|t| t.status.is_terminal());
            if all_terminal && !any_completed {
                let reason = "all race siblings failed".to_string();
                self.set_terminal(&parent_id, TaskStatus::Failed, Some(TaskResult::failure(reason.clone())));
                self.events.emit(Event::TaskFailed { task_id: parent_id.clone(), error: reason, category: None });
                self.run_fallback(&parent_id);
                self.after_terminal(&parent_id);
            }
            return;
        }
        if let Some(parent_id) = self.tasks.get(&task_id).and_then(|t| t.swarm_parent().map(str::to_string)) {
            let result = TaskResult::failure(err);
            self.set_terminal(&task_id, TaskStatus::Failed, Some(result.clone()));
            self.complete_free(&task_id);
            self.record_swarm_result(&parent_id, &task_id, result);
            self.maybe_finish_swarm(&parent_id);
            self.after_terminal(&task_id);
            return;
        }

        let (retry_count, max_retries) = match self.tasks.get(&task_id) {
            Some(t) => (t.retry_count, t.max_retries),
            None => return,
        };

        if retry_count < max_retries {
            let delay_ms = (1_000u64.saturating_mul(1u64 << retry_count.min(20))).min(30_000);
            if let Some(t) = self.tasks.get_mut(&task_id) {
                t.retry_count += 1;
                t.status = TaskStatus::Retrying;
            }
            self.complete_free(&task_id);
            self.events.emit(Event::TaskRetry { task_id: task_id.clone(), retry_count: retry_count + 1, delay_ms });
            let tx = self.cmd_tx.clone();
            let id = task_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                let _ = tx.send(Command::Requeue(id));
            });
        } else {
            self.set_terminal(&task_id, TaskStatus::Failed, Some(TaskResult::failure(err.clone())));
            self.complete_free(&task_id);
            self.events.emit(Event::TaskFailed { task_id: task_id.clone(), error: err, category: None });
            self.run_fallback(&task_id);
            self.after_terminal(&task_id);
        }
    }

    fn requeue(&mut self, task_id: &str) {
        let should_requeue = self.tasks.get(task_id).is_some_and(|t| t.status == TaskStatus::Retrying);
        if should_requeue {
            if let Some(t) = self.tasks.get_mut(task_id) {
                t.status = TaskStatus::Queued;
            }
            self.push_to_main_queue(task_id);
        }
    }

    fn resolve_race_win(&mut self, parent_id: &str, winner_child_id: &str, result: TaskResult) {
        self.set_terminal(winner_child_id, TaskStatus::Completed, Some(result.clone()));
        self.complete_free(winner_child_id);

        let siblings: Vec<String> = self
            .tasks
            .values()
            .filter(|t| t.race_parent() == Some(parent_id) && t.id != winner_child_id && !t.status.is_terminal())
            .map(|t| t.id.clone())
            .collect();
        for sibling in siblings {
            self.cancel_internal(&sibling);
        }

        self.set_terminal(parent_id, TaskStatus::Completed, Some(result.clone()));
        self.events.emit(Event::TaskCompleted { task_id: parent_id.to_string(), result });
        self.after_terminal(parent_id);
    }

    fn record_swarm_result(&mut self, parent_id: &str, child_id: &str, result: TaskResult) {
        if let Some(ctx) = self.swarm_contexts.get_mut(parent_id) {
            ctx.results.insert(child_id.to_string(), result);
        }
    }

    /// §4.1.3: merge policy is a named parameter (`coordination.swarm_merge_policy`)
    /// rather than the source's unspecified `merged.success` flag (§9 open question).
    fn maybe_finish_swarm(&mut self, parent_id: &str) {
        let Some(ctx) = self.swarm_contexts.get(parent_id) else { return };
        if ctx.results.len() < ctx.total {
            return;
        }
        let ctx = self.swarm_contexts.remove(parent_id).expect("just checked present");

        let mut output = Vec::new();
        let mut successes = 0usize;
        for r in ctx.results.values() {
            output.extend_from_slice(&r.output);
            if r.success {
                successes += 1;
            }
        }
        let success = match self.plan.coordination.swarm_merge_policy {
            SwarmMergePolicy::AnySuccess => successes > 0,
            SwarmMergePolicy::AllSuccess => successes == ctx.total,
        };
        let merged = TaskResult {
            success,
            output,
            error: if success { None } else { Some("swarm merge: coordination policy not satisfied".to_string()) },
            metrics: None,
        };

        if success {
            self.set_terminal(parent_id, TaskStatus::Completed, Some(merged.clone()));
            self.events.emit(Event::TaskCompleted { task_id: parent_id.to_string(), result: merged });
        } else {
            let error = merged.error.clone().unwrap_or_default();
            self.set_terminal(parent_id, TaskStatus::Failed, Some(merged));
            self.events.emit(Event::TaskFailed { task_id: parent_id.to_string(), error, category: None });
            self.run_fallback(parent_id);
        }
        self.after_terminal(parent_id);
    }

    fn run_fallback(&mut self, task_id: &str) {
        if let Some(handler) = self.fallback_handler.clone() {
            if let Some(task) = self.tasks.get(task_id).cloned() {
                if let Some(replacement) = handler(&task) {
                    self.register_and_enqueue(replacement);
                    return;
                }
            }
        }
        if self.plan.fallback.escalate_to_human {
            let priority = self.tasks.get(task_id).map(|t| t.priority).unwrap_or_default();
            self.events.emit(Event::Escalation {
                task_id: task_id.to_string(),
                priority,
                reason: "task failed permanently with no fallback handler".to_string(),
            });
        }
    }

    /// §4.1.6 plan-level termination.
    fn after_terminal(&mut self, _task_id: &str) {
        if self.plan_terminal_emitted {
            return;
        }
        let top_level: Vec<&Task> = self.tasks.values().filter(|t| t.is_top_level()).collect();
        let failed_count = top_level.iter().filter(|t| t.status == TaskStatus::Failed).count() as u32;

        if let Some(max) = self.plan.coordination.max_failures {
            if failed_count >= max {
                self.plan_terminal_emitted = true;
                self.events
                    .emit(Event::PlanFailed { plan_id: self.plan.id.clone(), reason: format!("reached max_failures={max}") });
                self.stop();
                return;
            }
        }
        if !self.plan.coordination.tolerate_failures && failed_count >= 1 {
            self.plan_terminal_emitted = true;
            self.events.emit(Event::PlanFailed {
                plan_id: self.plan.id.clone(),
                reason: "first top-level failure, tolerateFailures=false".to_string(),
            });
            self.stop();
            return;
        }

        let all_terminal = !top_level.is_empty() && top_level.iter().all(|t| t.status.is_terminal());
        if all_terminal {
            self.plan_terminal_emitted = true;
            let results =
                top_level.iter().filter_map(|t| t.result.clone().map(|r| (t.id.clone(), r))).collect();
            self.events.emit(Event::PlanComplete { plan_id: self.plan.id.clone(), results });
        }
    }

    // ---- cancellation / lifecycle ---------------------------------------

    fn cancel(&mut self, task_id: &str) -> bool {
        let Some(task) = self.tasks.get(task_id) else { return false };
        if task.status.is_terminal() {
            return false;
        }
        let is_race_parent = self.tasks.values().any(|t| t.race_parent() == Some(task_id));
        if is_race_parent {
            let siblings: Vec<String> = self
                .tasks
                .values()
                .filter(|t| t.race_parent() == Some(task_id) && !t.status.is_terminal())
                .map(|t| t.id.clone())
                .collect();
            for sibling in siblings {
                self.cancel_internal(&sibling);
            }
        }
        self.cancel_internal(task_id);
        true
    }

    fn cancel_internal(&mut self, task_id: &str) {
        self.main_queue.remove_where(|id| id == task_id);
        self.pool.remove_from_queue(task_id);
        if self.pool.binding_of(task_id).is_some() {
            self.complete_free(task_id);
        }
        if let Some(t) = self.tasks.get_mut(task_id) {
            t.status = TaskStatus::Cancelled;
        }
    }

    /// Idempotent (R2): only the first call while `running` has any effect.
    fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.stop_count += 1;
        let ids: Vec<String> = self.tasks.values().filter(|t| !t.status.is_terminal()).map(|t| t.id.clone()).collect();
        for id in ids {
            self.cancel_internal(&id);
        }
    }

    fn compute_stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats { total_tasks: self.tasks.len() as u64, ..Default::default() };
        let mut latencies = Vec::new();
        for t in self.tasks.values() {
            match t.status {
                TaskStatus::Pending | TaskStatus::Queued | TaskStatus::Retrying => stats.pending += 1,
                TaskStatus::Assigned | TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => {}
            }
            if let Some(metrics) = t.result.as_ref().and_then(|r| r.metrics.as_ref()) {
                stats.total_cost += metrics.cost;
                stats.total_tokens += metrics.tokens;
                if let (Some(start), Some(end)) = (metrics.start_epoch_ms, metrics.end_epoch_ms) {
                    latencies.push((end - start).max(0) as f64);
                }
            }
        }
        stats.average_latency_ms = if latencies.is_empty() { 0.0 } else { latencies.iter().sum::<f64>() / latencies.len() as f64 };
        stats.active_agents = self.pool.active_instances().len() as u64;
        let elapsed_secs = (Utc::now() - self.started_at).num_milliseconds().max(1) as f64 / 1000.0;
        stats.throughput_per_sec = stats.completed as f64 / elapsed_secs;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AgentSlot, CoordinationPolicy, Priority, TaskMetrics};
    use crate::domain::ports::NoopDecomposer;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    struct ImmediateExecutor {
        fail_task_ids: Vec<String>,
    }

    #[async_trait]
    impl TaskExecutor for ImmediateExecutor {
        async fn execute(&self, _instance: &AgentInstance, task: &Task) -> Result<TaskResult, OrchestratorError> {
            if self.fail_task_ids.contains(&task.id) {
                Err(OrchestratorError::TaskFailed(task.id.clone(), "network timeout".to_string()))
            } else {
                Ok(TaskResult::success(task.id.clone().into_bytes())
                    .with_metrics(TaskMetrics { cost: 0.01, tokens: 10, start_epoch_ms: Some(0), end_epoch_ms: Some(5) }))
            }
        }
    }

    struct WinnerOnlyExecutor {
        winner_id: String,
    }

    #[async_trait]
    impl TaskExecutor for WinnerOnlyExecutor {
        async fn execute(&self, _instance: &AgentInstance, task: &Task) -> Result<TaskResult, OrchestratorError> {
            if task.id == self.winner_id {
                Ok(TaskResult::success(b"A".to_vec()))
            } else {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    fn recorder() -> (EventBus, Arc<Mutex<Vec<String>>>) {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        bus.on_event(move |event| {
            if let Event::TaskCompleted { task_id, .. } = event {
                log2.lock().unwrap().push(task_id.clone());
            }
        });
        (bus, log)
    }

    #[tokio::test]
    async fn seed_scenario_s1_priority_and_deadlines() {
        let plan = OrchestrationPlan::new("p1", vec![AgentSlot::new("s1", "coder").with_bounds(1, Some(1))], Strategy::RoundRobin);
        let (events, log) = recorder();
        let executor = Arc::new(ImmediateExecutor { fail_task_ids: vec![] });
        let scheduler = Scheduler::spawn(plan, executor, Arc::new(NoopDecomposer), events);

        scheduler.submit(Task::new("T1", "build", vec![]).with_priority(Priority::Low)).await;
        scheduler.submit(Task::new("T2", "build", vec![]).with_priority(Priority::Critical)).await;
        scheduler.submit(Task::new("T3", "build", vec![]).with_priority(Priority::Low).with_deadline(1000)).await;
        scheduler.submit(Task::new("T4", "build", vec![]).with_priority(Priority::Low).with_deadline(500)).await;
        scheduler.start();

        tokio::time::sleep(StdDuration::from_millis(300)).await;
        let order = log.lock().unwrap().clone();
        assert_eq!(order, vec!["T2", "T4", "T3", "T1"]);
    }

    #[tokio::test]
    async fn seed_scenario_s2_race_cancellation() {
        let plan = OrchestrationPlan::new(
            "p1",
            vec![AgentSlot::new("alpha", "coder"), AgentSlot::new("beta", "coder"), AgentSlot::new("gamma", "coder")],
            Strategy::Competitive,
        );
        let (events, log) = recorder();
        let executor = Arc::new(WinnerOnlyExecutor { winner_id: "R:race-alpha".to_string() });
        let scheduler = Scheduler::spawn(plan, executor, Arc::new(NoopDecomposer), events);

        scheduler.submit(Task::new("R", "build", vec![])).await;
        scheduler.start();
        tokio::time::sleep(StdDuration::from_millis(300)).await;

        let completed = log.lock().unwrap().clone();
        assert_eq!(completed, vec!["R"]);

        let results = scheduler.get_results().await;
        assert_eq!(results.get("R").unwrap().output, b"A".to_vec());
    }

    #[tokio::test]
    async fn seed_scenario_s3_retry_then_fallback() {
        let plan = OrchestrationPlan::new("p1", vec![AgentSlot::new("s1", "coder")], Strategy::RoundRobin);
        let (events, _log) = recorder();
        let executor = Arc::new(ImmediateExecutor { fail_task_ids: vec!["X".to_string()] });
        let scheduler = Scheduler::spawn(plan, executor, Arc::new(NoopDecomposer), events);

        scheduler.set_fallback_handler(|task| {
            if task.id == "X" {
                Some(Task::new("Y", &task.task_type, vec![]))
            } else {
                None
            }
        });

        scheduler.submit(Task::new("X", "build", vec![]).with_max_retries(2)).await;
        scheduler.start();

        // Two retries at 1000ms/2000ms plus dispatch overhead.
        tokio::time::sleep(StdDuration::from_millis(3500)).await;
        let results = scheduler.get_results().await;
        assert!(results.get("X").is_some_and(|r| !r.success));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_r1() {
        let plan = OrchestrationPlan::new("p1", vec![AgentSlot::new("s1", "coder")], Strategy::RoundRobin);
        let (events, _log) = recorder();
        let executor = Arc::new(ImmediateExecutor { fail_task_ids: vec![] });
        let scheduler = Scheduler::spawn(plan, executor, Arc::new(NoopDecomposer), events);

        scheduler.submit(Task::new("T1", "build", vec![]).with_max_retries(0)).await;
        let first = scheduler.cancel("T1").await;
        let second = scheduler.cancel("T1").await;
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn stop_is_idempotent_r2() {
        let plan = OrchestrationPlan::new("p1", vec![AgentSlot::new("s1", "coder")], Strategy::RoundRobin);
        let scheduler = Scheduler::spawn(plan, Arc::new(ImmediateExecutor { fail_task_ids: vec![] }), Arc::new(NoopDecomposer), EventBus::new());
        scheduler.start();
        scheduler.stop().await;
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn dependency_gating_holds_a_task_until_its_dependency_completes() {
        let plan = OrchestrationPlan::new("p1", vec![AgentSlot::new("s1", "coder").with_bounds(1, Some(1))], Strategy::RoundRobin);
        let (events, log) = recorder();
        let executor = Arc::new(ImmediateExecutor { fail_task_ids: vec![] });
        let scheduler = Scheduler::spawn(plan, executor, Arc::new(NoopDecomposer), events);

        scheduler.submit(Task::new("A", "build", vec![])).await;
        scheduler.submit(Task::new("B", "build", vec![]).with_dependencies(vec!["A".to_string()])).await;
        scheduler.start();

        tokio::time::sleep(StdDuration::from_millis(400)).await;
        let order = log.lock().unwrap().clone();
        assert_eq!(order, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn scale_agent_on_unknown_slot_returns_caller_error() {
        let plan = OrchestrationPlan::new("p1", vec![AgentSlot::new("s1", "coder")], Strategy::RoundRobin);
        let scheduler = Scheduler::spawn(plan, Arc::new(ImmediateExecutor { fail_task_ids: vec![] }), Arc::new(NoopDecomposer), EventBus::new());
        let err = scheduler.scale_agent("ghost", 2).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownAgentSlot(_)));
    }

    #[tokio::test]
    async fn plan_complete_fires_once_all_top_level_tasks_are_terminal() {
        let plan = OrchestrationPlan::new("p1", vec![AgentSlot::new("s1", "coder")], Strategy::RoundRobin);
        let bus = EventBus::new();
        let completes = Arc::new(Mutex::new(0u32));
        let completes2 = completes.clone();
        bus.on_event(move |event| {
            if matches!(event, Event::PlanComplete { .. }) {
                *completes2.lock().unwrap() += 1;
            }
        });
        let scheduler = Scheduler::spawn(plan, Arc::new(ImmediateExecutor { fail_task_ids: vec![] }), Arc::new(NoopDecomposer), bus);
        scheduler.submit(Task::new("A", "build", vec![])).await;
        scheduler.start();
        tokio::time::sleep(StdDuration::from_millis(300)).await;
        assert_eq!(*completes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn max_failures_triggers_plan_failed_and_stop() {
        let mut plan = OrchestrationPlan::new("p1", vec![AgentSlot::new("s1", "coder")], Strategy::RoundRobin);
        plan.coordination = CoordinationPolicy { tolerate_failures: true, max_failures: Some(1), ..CoordinationPolicy::default() };
        let bus = EventBus::new();
        let failed = Arc::new(Mutex::new(false));
        let failed2 = failed.clone();
        bus.on_event(move |event| {
            if matches!(event, Event::PlanFailed { .. }) {
                *failed2.lock().unwrap() = true;
            }
        });
        let executor = Arc::new(ImmediateExecutor { fail_task_ids: vec!["A".to_string()] });
        let scheduler = Scheduler::spawn(plan, executor, Arc::new(NoopDecomposer), bus);
        scheduler.submit(Task::new("A", "build", vec![]).with_max_retries(0)).await;
        scheduler.start();
        tokio::time::sleep(StdDuration::from_millis(300)).await;
        assert!(*failed.lock().unwrap());
    }
}
