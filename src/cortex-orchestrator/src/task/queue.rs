//! In-memory task queue with dependency tracking.
//!
//! The queue owns every task of one orchestration session. Tasks are kept in
//! insertion order, are mutated only through [`TaskQueue::update`], and are
//! never removed during a run so finished tasks keep satisfying dependencies.
//!
//! # Example
//!
//! ```rust
//! use cortex_orchestrator::task::{Task, TaskPatch, TaskQueue, TaskStatus};
//!
//! let mut queue = TaskQueue::new();
//! queue.create(Task::new("setup", "Initialize project")).unwrap();
//! queue
//!     .create(Task::new("build", "Compile code").depends_on("setup"))
//!     .unwrap();
//!
//! // Only setup can run until it completes.
//! let ready: Vec<_> = queue.ready_tasks().iter().map(|t| t.id.as_str()).collect();
//! assert_eq!(ready, vec!["setup"]);
//!
//! queue
//!     .update(&"setup".into(), TaskPatch::status(TaskStatus::Completed))
//!     .unwrap();
//! assert!(queue.are_dependencies_satisfied(&"build".into()));
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::AgentId;

/// Default number of tasks a queue allows in flight.
pub const DEFAULT_MAX_PARALLEL: usize = 3;

/// Unique identifier for a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a task ID from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting to be scheduled.
    #[default]
    Pending,
    /// An agent is working on the task.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully.
    Failed,
    /// Cannot run because dependencies are unmet.
    Blocked,
}

impl TaskStatus {
    /// Completed or failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Only completed tasks satisfy dependencies.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Blocked => write!(f, "blocked"),
        }
    }
}

/// A unit of work executed by one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Task ID.
    pub id: TaskId,
    /// What the agent should do.
    pub description: String,
    /// Tasks that must complete before this one can run.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// Current status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Which kind of agent should execute the task.
    #[serde(default)]
    pub assigned_agent_type: Option<String>,
    /// Output of a completed task.
    #[serde(default)]
    pub output: Option<String>,
    /// Error of a failed or blocked task.
    #[serde(default)]
    pub error: Option<String>,
    /// Agent that completed the task.
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new pending task.
    pub fn new(id: impl Into<TaskId>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            description: description.into(),
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            assigned_agent_type: None,
            output: None,
            error: None,
            agent_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a dependency. Duplicates are ignored.
    pub fn depends_on(mut self, id: impl Into<TaskId>) -> Self {
        let id = id.into();
        if !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
        self
    }

    /// Add several dependencies.
    pub fn depends_on_all(mut self, ids: impl IntoIterator<Item = impl Into<TaskId>>) -> Self {
        for id in ids {
            self = self.depends_on(id);
        }
        self
    }

    /// Set the agent type hint.
    pub fn with_agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.assigned_agent_type = Some(agent_type.into());
        self
    }

    /// Set the initial status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Whether this task lists `id` as a dependency.
    pub fn has_dependency(&self, id: &TaskId) -> bool {
        self.dependencies.contains(id)
    }
}

/// Partial update applied by [`TaskQueue::update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    /// New status.
    pub status: Option<TaskStatus>,
    /// New output; `Some(None)` clears it.
    pub output: Option<Option<String>>,
    /// New error; `Some(None)` clears it.
    pub error: Option<Option<String>>,
    /// Agent that handled the task.
    pub agent_id: Option<AgentId>,
}

impl TaskPatch {
    /// Patch that only changes the status.
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Set the output.
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(Some(output.into()));
        self
    }

    /// Clear the output.
    pub fn clear_output(mut self) -> Self {
        self.output = Some(None);
        self
    }

    /// Set the error.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(Some(error.into()));
        self
    }

    /// Clear the error.
    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    /// Set the agent reference.
    pub fn with_agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    fn apply(self, task: &mut Task) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(output) = self.output {
            task.output = output;
        }
        if let Some(error) = self.error {
            task.error = error;
        }
        if let Some(agent_id) = self.agent_id {
            task.agent_id = Some(agent_id);
        }
        task.updated_at = Utc::now();
    }
}

/// Errors for queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Task not found.
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// A task with this ID already exists.
    #[error("Task already exists: {0}")]
    DuplicateTask(TaskId),

    /// A task cannot depend on itself.
    #[error("Task {0} depends on itself")]
    SelfDependency(TaskId),
}

/// Result type for queue operations.
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Snapshot of queue progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueProgress {
    /// Total number of tasks.
    pub total: usize,
    /// Tasks waiting to run.
    pub pending: usize,
    /// Tasks being executed.
    pub running: usize,
    /// Tasks that finished successfully.
    pub completed: usize,
    /// Tasks that failed.
    pub failed: usize,
    /// Tasks blocked by unmet dependencies.
    pub blocked: usize,
}

impl QueueProgress {
    /// Percentage of tasks in a terminal state.
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            ((self.completed + self.failed) as f64 / self.total as f64) * 100.0
        }
    }

    /// Whether every task reached a terminal state.
    pub fn is_complete(&self) -> bool {
        self.completed + self.failed >= self.total
    }
}

/// The task list of one orchestration session.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    /// All tasks in insertion order.
    tasks: Vec<Task>,
    /// Position of each task in `tasks`.
    index: HashMap<TaskId, usize>,
    /// Maximum number of tasks allowed in flight.
    max_parallel: usize,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::with_max_parallel(DEFAULT_MAX_PARALLEL)
    }

    /// Create an empty queue with a parallelism hint (minimum 1).
    pub fn with_max_parallel(max_parallel: usize) -> Self {
        Self {
            tasks: Vec::new(),
            index: HashMap::new(),
            max_parallel: max_parallel.max(1),
        }
    }

    /// Maximum number of tasks allowed in flight.
    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Change the parallelism hint (minimum 1).
    pub fn set_max_parallel(&mut self, max_parallel: usize) {
        self.max_parallel = max_parallel.max(1);
    }

    /// Add a task to the queue.
    ///
    /// Dependencies on tasks that do not exist yet are allowed; they stay
    /// unmet until such a task is created and completed.
    pub fn create(&mut self, task: Task) -> QueueResult<&Task> {
        if self.index.contains_key(&task.id) {
            return Err(QueueError::DuplicateTask(task.id));
        }
        if task.has_dependency(&task.id) {
            return Err(QueueError::SelfDependency(task.id));
        }

        tracing::debug!(
            task_id = %task.id,
            dependencies = task.dependencies.len(),
            "Task created"
        );

        let position = self.tasks.len();
        self.index.insert(task.id.clone(), position);
        self.tasks.push(task);
        Ok(&self.tasks[position])
    }

    /// Get a task by ID.
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    /// Merge `patch` into a task and stamp its update time.
    pub fn update(&mut self, id: &TaskId, patch: TaskPatch) -> QueueResult<&Task> {
        let position = *self
            .index
            .get(id)
            .ok_or_else(|| QueueError::TaskNotFound(id.clone()))?;

        let task = &mut self.tasks[position];
        let previous = task.status;
        patch.apply(task);

        if previous != task.status {
            tracing::debug!(task_id = %id, from = %previous, to = %task.status, "Task status changed");
        }

        Ok(&self.tasks[position])
    }

    /// All tasks in insertion order.
    pub fn all_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Tasks that are neither completed nor failed, in insertion order.
    pub fn pending_tasks(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| !t.status.is_terminal())
            .collect()
    }

    /// Pending tasks whose dependencies are all completed.
    pub fn ready_tasks(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && self.dependencies_met(t))
            .collect()
    }

    /// IDs of every completed task.
    pub fn completed_ids(&self) -> HashSet<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.status.is_success())
            .map(|t| t.id.clone())
            .collect()
    }

    /// Whether every dependency of the task is completed.
    ///
    /// Unknown tasks have no satisfied dependencies.
    pub fn are_dependencies_satisfied(&self, id: &TaskId) -> bool {
        self.get(id).is_some_and(|t| self.dependencies_met(t))
    }

    /// Dependencies of the task that are not completed, in declaration order.
    pub fn unmet_dependencies(&self, id: &TaskId) -> QueueResult<Vec<TaskId>> {
        let task = self
            .get(id)
            .ok_or_else(|| QueueError::TaskNotFound(id.clone()))?;

        Ok(task
            .dependencies
            .iter()
            .filter(|dep| !self.is_completed(dep))
            .cloned()
            .collect())
    }

    fn dependencies_met(&self, task: &Task) -> bool {
        task.dependencies.iter().all(|dep| self.is_completed(dep))
    }

    fn is_completed(&self, id: &TaskId) -> bool {
        self.get(id).is_some_and(|t| t.status.is_success())
    }

    /// Count of tasks per status.
    pub fn status_counts(&self) -> HashMap<TaskStatus, usize> {
        let mut counts = HashMap::new();
        for task in &self.tasks {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        counts
    }

    /// Progress snapshot.
    pub fn progress(&self) -> QueueProgress {
        let counts = self.status_counts();
        let count = |status: TaskStatus| counts.get(&status).copied().unwrap_or(0);

        QueueProgress {
            total: self.tasks.len(),
            pending: count(TaskStatus::Pending),
            running: count(TaskStatus::Running),
            completed: count(TaskStatus::Completed),
            failed: count(TaskStatus::Failed),
            blocked: count(TaskStatus::Blocked),
        }
    }

    /// Whether every task completed successfully.
    pub fn all_succeeded(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_success())
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
