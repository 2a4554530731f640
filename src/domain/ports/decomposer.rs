//! Hierarchical decomposition port (§4.1.1 `hierarchical` strategy).
//!
//! §9 flags the source's decomposer as a stub that returns the task
//! unchanged — decomposition is effectively a no-op there. The spec
//! permits that, so this is a pluggable seam rather than a hard-coded
//! behavior: a caller wanting real decomposition (e.g. an LLM-backed
//! planner) supplies one, and `NoopDecomposer` is the default.

use crate::domain::models::Task;

pub trait Decomposer: Send + Sync {
    /// Split `task` into sub-tasks. Returning a single-element vector whose
    /// task has the same id as the input is the "trivial decomposition"
    /// case (§4.1.1): the scheduler dispatches it directly instead of
    /// registering sub-tasks.
    fn decompose(&self, task: &Task) -> Vec<Task>;
}

/// The spec's permitted no-op: hands the task back unchanged.
pub struct NoopDecomposer;

impl Decomposer for NoopDecomposer {
    fn decompose(&self, task: &Task) -> Vec<Task> {
        vec![task.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_decomposer_returns_the_task_unchanged() {
        let task = Task::new("T1", "build", vec![]);
        let result = NoopDecomposer.decompose(&task);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "T1");
    }
}
