//! Execution result records.

use std::time::Duration;

use serde::Serialize;

use crate::agent::AgentId;
use crate::task::TaskId;

/// Result of a single task execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecutionResult {
    /// Task ID.
    pub task_id: TaskId,
    /// Whether the task succeeded.
    pub success: bool,
    /// False when the task was skipped because the executor was stopped.
    pub attempted: bool,
    /// Agent that executed the task.
    pub agent_id: Option<AgentId>,
    /// Agent output if successful.
    pub output: Option<String>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Execution duration.
    pub duration: Duration,
}

impl TaskExecutionResult {
    /// Successful execution.
    pub fn succeeded(
        task_id: TaskId,
        agent_id: AgentId,
        output: Option<String>,
        duration: Duration,
    ) -> Self {
        Self {
            task_id,
            success: true,
            attempted: true,
            agent_id: Some(agent_id),
            output,
            error: None,
            duration,
        }
    }

    /// Failed execution.
    pub fn failed(
        task_id: TaskId,
        agent_id: Option<AgentId>,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            task_id,
            success: false,
            attempted: true,
            agent_id,
            output: None,
            error: Some(error.into()),
            duration,
        }
    }

    /// Task skipped without spawning an agent.
    pub fn not_attempted(task_id: TaskId, reason: impl Into<String>) -> Self {
        Self {
            task_id,
            success: false,
            attempted: false,
            agent_id: None,
            output: None,
            error: Some(reason.into()),
            duration: Duration::ZERO,
        }
    }
}

/// Classification of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Nothing to run.
    NoTasks,
    /// Every task succeeded.
    AllSucceeded,
    /// Every failure is a task that was never attempted.
    NotAttempted,
    /// At least one attempted task failed.
    Failed,
    /// Nothing failed, but some tasks were blocked.
    Blocked,
}

/// Aggregate result of a parallel run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelExecutionResult {
    /// Per-task results, in dispatch order.
    pub results: Vec<TaskExecutionResult>,
    /// Dispatched plus blocked tasks.
    pub total_tasks: usize,
    /// Tasks that succeeded.
    pub successful_tasks: usize,
    /// Dispatched tasks that failed, including not-attempted ones.
    pub failed_tasks: usize,
    /// Tasks held back by unmet dependencies.
    pub blocked_tasks: Vec<TaskId>,
    /// No failures and no blocked tasks.
    pub all_success: bool,
    /// Wall-clock duration of the run.
    pub total_duration: Duration,
}

impl ParallelExecutionResult {
    /// Aggregate `results`.
    pub fn from_results(
        results: Vec<TaskExecutionResult>,
        blocked_tasks: Vec<TaskId>,
        total_duration: Duration,
    ) -> Self {
        let successful_tasks = results.iter().filter(|r| r.success).count();
        let failed_tasks = results.len() - successful_tasks;

        Self {
            total_tasks: results.len() + blocked_tasks.len(),
            successful_tasks,
            failed_tasks,
            all_success: failed_tasks == 0 && blocked_tasks.is_empty(),
            results,
            blocked_tasks,
            total_duration,
        }
    }

    /// Classify the run.
    pub fn outcome(&self) -> RunOutcome {
        if self.total_tasks == 0 {
            RunOutcome::NoTasks
        } else if self.failed_tasks > 0 {
            let any_attempted_failure = self.results.iter().any(|r| !r.success && r.attempted);
            if any_attempted_failure {
                RunOutcome::Failed
            } else {
                RunOutcome::NotAttempted
            }
        } else if !self.blocked_tasks.is_empty() {
            RunOutcome::Blocked
        } else {
            RunOutcome::AllSucceeded
        }
    }

    /// Result for `task_id`.
    pub fn result_for(&self, task_id: &TaskId) -> Option<&TaskExecutionResult> {
        self.results.iter().find(|r| &r.task_id == task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(id: &str) -> TaskExecutionResult {
        TaskExecutionResult::succeeded(
            TaskId::from(id),
            AgentId::from("agent"),
            Some("done".to_string()),
            Duration::from_millis(5),
        )
    }

    #[test]
    fn test_empty_run() {
        let result = ParallelExecutionResult::from_results(vec![], vec![], Duration::ZERO);
        assert_eq!(result.outcome(), RunOutcome::NoTasks);
        assert!(result.all_success);
    }

    #[test]
    fn test_all_succeeded() {
        let result =
            ParallelExecutionResult::from_results(vec![ok("a"), ok("b")], vec![], Duration::ZERO);
        assert_eq!(result.total_tasks, 2);
        assert_eq!(result.successful_tasks, 2);
        assert_eq!(result.outcome(), RunOutcome::AllSucceeded);
    }

    #[test]
    fn test_failed_beats_not_attempted() {
        let result = ParallelExecutionResult::from_results(
            vec![
                ok("a"),
                TaskExecutionResult::failed(TaskId::from("b"), None, "boom", Duration::ZERO),
                TaskExecutionResult::not_attempted(TaskId::from("c"), "stopped"),
            ],
            vec![],
            Duration::ZERO,
        );
        assert_eq!(result.failed_tasks, 2);
        assert!(!result.all_success);
        assert_eq!(result.outcome(), RunOutcome::Failed);
    }

    #[test]
    fn test_only_not_attempted() {
        let result = ParallelExecutionResult::from_results(
            vec![TaskExecutionResult::not_attempted(TaskId::from("c"), "stopped")],
            vec![],
            Duration::ZERO,
        );
        assert_eq!(result.outcome(), RunOutcome::NotAttempted);
    }

    #[test]
    fn test_blocked() {
        let result = ParallelExecutionResult::from_results(
            vec![ok("a")],
            vec![TaskId::from("b")],
            Duration::ZERO,
        );
        assert_eq!(result.total_tasks, 2);
        assert!(!result.all_success);
        assert_eq!(result.outcome(), RunOutcome::Blocked);
    }
}
