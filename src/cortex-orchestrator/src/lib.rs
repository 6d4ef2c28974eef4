//! Task orchestration for Cortex coding agents.
//!
//! Coordinates many agent runs that together implement a project:
//!
//! - **task**: dependency-aware task queue and grouping of tasks into
//!   batches that may run concurrently
//! - **executor**: bounded parallel execution of tasks as agents
//! - **healing**: analyze, plan and apply fixes for failing tests
//! - **semaphore**: FIFO counting semaphore capping agents in flight
//! - **agent**: the [`AgentRunner`] capability everything above delegates to
//!
//! # Task Queue
//!
//! ```rust
//! use std::collections::HashSet;
//! use cortex_orchestrator::task::{group_independent_tasks, Task, TaskQueue};
//!
//! let mut queue = TaskQueue::new();
//! queue.create(Task::new("A", "Set up schema")).unwrap();
//! queue.create(Task::new("B", "Write API").depends_on("A")).unwrap();
//! queue.create(Task::new("C", "Write docs")).unwrap();
//!
//! let groups = group_independent_tasks(queue.pending_tasks(), &HashSet::new());
//! assert_eq!(groups.len(), 2);
//! assert_eq!(groups[0].len(), 2);
//! ```
//!
//! # Parallel Execution
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cortex_orchestrator::{ExecutorConfig, LocalAgentRunner, ParallelExecutor};
//!
//! let runner = Arc::new(LocalAgentRunner::new(|options, _ctx| async move {
//!     Ok(format!("done: {}", options.prompt))
//! }));
//! let executor = ParallelExecutor::new(runner, ExecutorConfig::default());
//! let result = executor
//!     .execute_from_queue(&mut queue, |task| task.description.clone())
//!     .await;
//! ```
//!
//! # Self-Healing
//!
//! ```rust,ignore
//! use cortex_orchestrator::healing::{SelfHealingRegistry, SelfHealingConfig, TestFailure};
//!
//! let registry = SelfHealingRegistry::new(runner, SelfHealingConfig::default());
//! let engine = registry.get_or_create("session-1").await;
//! let result = engine
//!     .process_failure(&TestFailure::new("login", "submit", "locator('#go') not found"))
//!     .await;
//! if result.escalate {
//!     // hand over to a human
//! }
//! ```

pub mod agent;
pub mod config;
pub mod executor;
pub mod healing;
pub mod logging;
pub mod semaphore;
pub mod task;

pub use agent::{
    AgentError, AgentEvent, AgentHandle, AgentId, AgentOutcome, AgentRunner, AgentSnapshot,
    AgentStatus, LocalAgentRunner, SpawnOptions,
};
pub use config::{ConfigError, ConfigLoader, OrchestratorConfig};
pub use executor::{
    ExecutorConfig, ParallelExecutionResult, ParallelExecutor, RunOutcome, TaskExecutionResult,
};
pub use healing::{
    FixResult, HealingError, HealingState, SelfHealingConfig, SelfHealingEngine,
    SelfHealingRegistry, TestFailure,
};
pub use semaphore::{AgentSemaphore, SemaphorePermit};
pub use task::{IndependentTaskGroup, QueueError, Task, TaskId, TaskPatch, TaskQueue, TaskStatus};

use thiserror::Error;

/// Crate-level error.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Healing(#[from] HealingError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
