//! Task queue with dependency tracking and grouping.
//!
//! # Features
//!
//! - **Dependency Tracking**: a task only becomes runnable once every task it
//!   depends on has completed
//! - **Status Management**: pending, running, completed, failed, blocked
//! - **Grouping**: split tasks into groups that can run concurrently while
//!   respecting dependencies, isolating unschedulable tasks instead of
//!   dropping them
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashSet;
//! use cortex_orchestrator::task::{group_independent_tasks, Task};
//!
//! let tasks = vec![
//!     Task::new("A", "Scaffold project"),
//!     Task::new("B", "Add API routes").depends_on("A"),
//!     Task::new("C", "Write README"),
//! ];
//!
//! let groups = group_independent_tasks(&tasks, &HashSet::new());
//! assert_eq!(groups.len(), 2);
//! assert_eq!(groups[0].tasks.len(), 2);
//! ```
//!
//! # Workflow
//!
//! 1. Create tasks with dependencies
//! 2. Group pending tasks
//! 3. Run each group, writing results back through `TaskQueue::update`
//! 4. Dependent tasks become ready once their dependencies complete

pub mod grouping;
pub mod queue;

pub use grouping::{are_tasks_independent, group_independent_tasks, IndependentTaskGroup};
pub use queue::{
    QueueError, QueueProgress, QueueResult, Task, TaskId, TaskPatch, TaskQueue, TaskStatus,
    DEFAULT_MAX_PARALLEL,
};
