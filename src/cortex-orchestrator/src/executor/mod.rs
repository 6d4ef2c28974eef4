//! Parallel executor.
//!
//! The executor turns tasks into agent runs. At most
//! [`ExecutorConfig::max_parallel`] agents are in flight at once; the rest
//! queue on a FIFO semaphore.
//!
//! - [`ParallelExecutor::execute_task`] runs one task
//! - [`ParallelExecutor::execute_parallel`] runs independent tasks together
//! - [`ParallelExecutor::execute_from_queue`] drives a [`TaskQueue`] group by
//!   group and writes results back
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cortex_orchestrator::executor::{ExecutorConfig, ParallelExecutor};
//! use cortex_orchestrator::task::{Task, TaskQueue};
//!
//! let executor = ParallelExecutor::new(runner, ExecutorConfig::default().with_max_parallel(2));
//!
//! let mut queue = TaskQueue::new();
//! queue.create(Task::new("schema", "Design the schema"))?;
//! queue.create(Task::new("api", "Build the API").depends_on("schema"))?;
//!
//! let result = executor
//!     .execute_from_queue(&mut queue, |task| format!("Implement: {}", task.description))
//!     .await;
//! println!("{:?}", result.outcome());
//! ```
//!
//! [`TaskQueue`]: crate::task::TaskQueue

pub mod config;
pub mod parallel;
pub mod result;

pub use config::ExecutorConfig;
pub use parallel::ParallelExecutor;
pub use result::{ParallelExecutionResult, RunOutcome, TaskExecutionResult};
