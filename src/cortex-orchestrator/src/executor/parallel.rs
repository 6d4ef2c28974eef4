//! Bounded parallel execution of tasks through an [`AgentRunner`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::config::ExecutorConfig;
use super::result::{ParallelExecutionResult, TaskExecutionResult};
use crate::agent::{wait_for_completion, AgentId, AgentOutcome, AgentRunner, SpawnOptions};
use crate::semaphore::AgentSemaphore;
use crate::task::{
    group_independent_tasks, IndependentTaskGroup, Task, TaskId, TaskPatch, TaskQueue, TaskStatus,
};

const STOPPED_REASON: &str = "Executor stopped";

struct ExecutorInner {
    runner: Arc<dyn AgentRunner>,
    config: ExecutorConfig,
    semaphore: AgentSemaphore,
    cancel: Mutex<CancellationToken>,
    active: RwLock<HashMap<AgentId, TaskId>>,
}

/// Runs tasks as agents, at most `max_parallel` at a time.
///
/// Cloning is cheap; clones share the semaphore, the stop token and the set
/// of active agents.
#[derive(Clone)]
pub struct ParallelExecutor {
    inner: Arc<ExecutorInner>,
}

impl ParallelExecutor {
    /// Create an executor that spawns agents through `runner`.
    pub fn new(runner: Arc<dyn AgentRunner>, config: ExecutorConfig) -> Self {
        let semaphore = AgentSemaphore::new(config.effective_max_parallel());
        Self {
            inner: Arc::new(ExecutorInner {
                runner,
                config,
                semaphore,
                cancel: Mutex::new(CancellationToken::new()),
                active: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Executor configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// Semaphore bounding the agents in flight.
    pub fn semaphore(&self) -> &AgentSemaphore {
        &self.inner.semaphore
    }

    fn token(&self) -> CancellationToken {
        self.inner
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Whether [`stop`](Self::stop) was called since the last reset.
    pub fn is_stopped(&self) -> bool {
        self.token().is_cancelled()
    }

    /// Agents currently being waited on.
    pub async fn active_agents(&self) -> Vec<AgentId> {
        self.inner.active.read().await.keys().cloned().collect()
    }

    /// Stop dispatching new tasks and ask running agents to stop.
    ///
    /// Agents that ignore the request keep running; their results are still
    /// collected.
    pub async fn stop(&self) {
        self.token().cancel();

        let active: Vec<AgentId> = self.active_agents().await;
        tracing::info!(active_agents = active.len(), "Stopping parallel executor");

        for agent_id in active {
            if let Err(e) = self.inner.runner.stop(&agent_id).await {
                tracing::warn!(agent_id = %agent_id, error = %e, "Failed to stop agent");
            }
        }
    }

    /// Clear a previous stop so the executor can be reused.
    pub fn reset(&self) {
        let mut token = self
            .inner
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }

    fn spawn_options(&self, task: &Task, prompt: String) -> SpawnOptions {
        let config = &self.inner.config;
        let agent_type = task
            .assigned_agent_type
            .clone()
            .unwrap_or_else(|| config.default_agent_type.clone());

        let mut options = SpawnOptions::new(prompt)
            .with_agent_type(agent_type)
            .with_working_dir(config.working_dir.clone())
            .with_task(task.id.clone())
            .autonomous(config.autonomous);
        if let Some(session_id) = &config.session_id {
            options = options.with_session(session_id.clone());
        }
        if let Some(max_turns) = config.max_turns {
            options = options.with_max_turns(max_turns);
        }
        if let Some(timeout) = config.agent_timeout() {
            options = options.with_timeout(timeout);
        }
        options
    }

    /// Execute one task as an agent, holding a semaphore permit while the
    /// agent runs.
    ///
    /// Never fails: every error becomes a failed result.
    pub async fn execute_task(&self, task: &Task, prompt: impl Into<String>) -> TaskExecutionResult {
        let token = self.token();
        if token.is_cancelled() {
            return TaskExecutionResult::not_attempted(task.id.clone(), STOPPED_REASON);
        }

        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return TaskExecutionResult::not_attempted(task.id.clone(), STOPPED_REASON);
            }
            permit = self.inner.semaphore.acquire() => permit,
        };
        if token.is_cancelled() {
            return TaskExecutionResult::not_attempted(task.id.clone(), STOPPED_REASON);
        }

        self.run_agent(task, prompt.into()).await
    }

    async fn run_agent(&self, task: &Task, prompt: String) -> TaskExecutionResult {
        let started = Instant::now();
        let runner = &self.inner.runner;
        let options = self.spawn_options(task, prompt);

        let handle = match runner.spawn(options).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "Failed to spawn agent");
                return TaskExecutionResult::failed(
                    task.id.clone(),
                    None,
                    e.to_string(),
                    started.elapsed(),
                );
            }
        };

        tracing::info!(
            task_id = %task.id,
            agent_id = %handle.id,
            agent_type = %handle.agent_type,
            "Task dispatched"
        );
        self.inner
            .active
            .write()
            .await
            .insert(handle.id.clone(), task.id.clone());

        let outcome = match self.inner.config.agent_timeout() {
            Some(timeout) => {
                match tokio::time::timeout(timeout, wait_for_completion(runner.as_ref(), &handle.id))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        if let Err(e) = runner.stop(&handle.id).await {
                            tracing::debug!(agent_id = %handle.id, error = %e, "Stop after timeout failed");
                        }
                        AgentOutcome::TimedOut(timeout)
                    }
                }
            }
            None => wait_for_completion(runner.as_ref(), &handle.id).await,
        };

        self.inner.active.write().await.remove(&handle.id);

        let duration = started.elapsed();
        match outcome {
            AgentOutcome::Completed { output } => {
                tracing::info!(task_id = %task.id, agent_id = %handle.id, ?duration, "Task completed");
                TaskExecutionResult::succeeded(task.id.clone(), handle.id, output, duration)
            }
            other => {
                let error = other
                    .error_message()
                    .unwrap_or_else(|| "Unknown error".to_string());
                tracing::warn!(task_id = %task.id, agent_id = %handle.id, error = %error, "Task failed");
                TaskExecutionResult::failed(task.id.clone(), Some(handle.id), error, duration)
            }
        }
    }

    /// Execute all `(task, prompt)` pairs concurrently, bounded by the
    /// semaphore. Results are in input order.
    pub async fn execute_parallel(&self, pairs: Vec<(Task, String)>) -> ParallelExecutionResult {
        let started = Instant::now();
        let stop_on_error = self.inner.config.stop_on_error;

        let (task_ids, handles): (Vec<TaskId>, Vec<_>) = pairs
            .into_iter()
            .map(|(task, prompt)| {
                let executor = self.clone();
                let task_id = task.id.clone();
                let handle = tokio::spawn(async move {
                    let result = executor.execute_task(&task, prompt).await;
                    if stop_on_error && !result.success && !executor.is_stopped() {
                        tracing::info!(task_id = %task.id, "Task failed with stop_on_error set");
                        executor.stop().await;
                    }
                    result
                });
                (task_id, handle)
            })
            .unzip();

        let mut results = Vec::with_capacity(task_ids.len());
        for (task_id, joined) in task_ids.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!(task_id = %task_id, error = %e, "Task execution panicked");
                    if stop_on_error {
                        self.stop().await;
                    }
                    results.push(TaskExecutionResult::failed(
                        task_id,
                        None,
                        format!("Task execution panicked: {e}"),
                        started.elapsed(),
                    ));
                }
            }
        }

        ParallelExecutionResult::from_results(results, Vec::new(), started.elapsed())
    }

    /// Execute the pending tasks of `queue` group by group, writing results
    /// back into the queue.
    ///
    /// A group starts only after the previous one finished. Tasks whose
    /// dependencies are not completed when their group comes up are marked
    /// [`TaskStatus::Blocked`].
    pub async fn execute_from_queue<F>(
        &self,
        queue: &mut TaskQueue,
        prompt_builder: F,
    ) -> ParallelExecutionResult
    where
        F: Fn(&Task) -> String,
    {
        let started = Instant::now();
        let pending: Vec<Task> = queue
            .pending_tasks()
            .into_iter()
            .filter(|t| t.status != TaskStatus::Running)
            .cloned()
            .collect();
        let groups = group_independent_tasks(&pending, &queue.completed_ids());

        let mut results = Vec::new();
        let mut blocked = Vec::new();

        let mut remaining = groups.into_iter().enumerate();
        for (index, group) in remaining.by_ref() {
            if self.is_stopped() {
                tracing::info!(group = index, "Executor stopped; remaining groups left pending");
                results.extend(skipped(group));
                break;
            }

            let mut dispatch = Vec::with_capacity(group.len());
            for task in group.tasks {
                let unmet = match queue.unmet_dependencies(&task.id) {
                    Ok(unmet) => unmet,
                    Err(e) => {
                        tracing::warn!(task_id = %task.id, error = %e, "Task vanished from queue");
                        continue;
                    }
                };

                if !unmet.is_empty() {
                    let names: Vec<&str> = unmet.iter().map(TaskId::as_str).collect();
                    let error = format!("Blocked by unmet dependencies: {}", names.join(", "));
                    tracing::warn!(task_id = %task.id, unmet = ?names, "Task blocked");
                    write_back(
                        queue,
                        &task.id,
                        TaskPatch::status(TaskStatus::Blocked).with_error(error),
                    );
                    blocked.push(task.id);
                    continue;
                }

                write_back(queue, &task.id, TaskPatch::status(TaskStatus::Running));
                let prompt = prompt_builder(&task);
                dispatch.push((task, prompt));
            }

            if dispatch.is_empty() {
                continue;
            }

            tracing::info!(group = index, tasks = dispatch.len(), "Executing task group");
            let group_result = self.execute_parallel(dispatch).await;
            let group_failed = group_result.failed_tasks > 0;

            for result in group_result.results {
                let patch = if result.success {
                    let mut patch = TaskPatch::status(TaskStatus::Completed).clear_error();
                    if let Some(output) = &result.output {
                        patch = patch.with_output(output.clone());
                    }
                    if let Some(agent_id) = &result.agent_id {
                        patch = patch.with_agent(agent_id.clone());
                    }
                    patch
                } else if !result.attempted {
                    // Never started; leave it for a later run.
                    TaskPatch::status(TaskStatus::Pending)
                } else {
                    let error = result
                        .error
                        .clone()
                        .unwrap_or_else(|| "Unknown error".to_string());
                    TaskPatch::status(TaskStatus::Failed)
                        .with_error(error)
                        .clear_output()
                };
                write_back(queue, &result.task_id, patch);
                results.push(result);
            }

            if group_failed && self.inner.config.stop_on_error {
                tracing::info!(group = index, "Group failed; not processing further groups");
                break;
            }
        }
        // Groups never reached stay pending in the queue.
        for (_, group) in remaining {
            results.extend(skipped(group));
        }

        ParallelExecutionResult::from_results(results, blocked, started.elapsed())
    }
}

fn skipped(group: IndependentTaskGroup) -> impl Iterator<Item = TaskExecutionResult> {
    group
        .tasks
        .into_iter()
        .map(|task| TaskExecutionResult::not_attempted(task.id, STOPPED_REASON))
}

fn write_back(queue: &mut TaskQueue, task_id: &TaskId, patch: TaskPatch) {
    if let Err(e) = queue.update(task_id, patch) {
        tracing::warn!(task_id = %task_id, error = %e, "Failed to update task");
    }
}
