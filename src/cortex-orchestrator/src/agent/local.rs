//! In-process agent runner.
//!
//! `LocalAgentRunner` runs each agent's work as a tokio task. The work itself
//! is supplied as a closure, which makes the runner usable both for embedding
//! simple agents and as a deterministic runner in tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::{broadcast, oneshot, RwLock};

use super::{
    AgentError, AgentEvent, AgentHandle, AgentId, AgentResult, AgentRunner, AgentSnapshot,
    AgentStatus, SpawnOptions,
};

/// Timeout applied when [`SpawnOptions::timeout`] is not set (30 minutes).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Capacity of the event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

type WorkFn = dyn Fn(SpawnOptions, AgentContext) -> BoxFuture<'static, Result<String, String>>
    + Send
    + Sync;

type AgentMap = Arc<RwLock<HashMap<AgentId, LocalAgent>>>;

struct LocalAgent {
    snapshot: AgentSnapshot,
    cancel_tx: Option<oneshot::Sender<()>>,
}

/// Handle given to agent work for reporting progress.
#[derive(Clone)]
pub struct AgentContext {
    id: AgentId,
    agents: AgentMap,
}

impl AgentContext {
    /// ID of the agent running this work.
    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// Record what the agent is currently doing.
    pub async fn set_action(&self, action: impl Into<String>) {
        if let Some(agent) = self.agents.write().await.get_mut(&self.id) {
            agent.snapshot.current_action = Some(action.into());
        }
    }
}

/// Runs agents as tokio tasks inside the current process.
///
/// Agent work returns `Ok(output)` on success and `Err(message)` on failure.
/// Panics in the work are reported as agent errors.
///
/// Finished agents stay queryable through [`AgentRunner::get`] until the
/// embedder removes them with [`cleanup_completed`](Self::cleanup_completed)
/// or [`forget`](Self::forget). Neither the executor nor the self-healing
/// engine removes records, so a long-lived runner should call
/// `cleanup_completed` between runs.
#[derive(Clone)]
pub struct LocalAgentRunner {
    work: Arc<WorkFn>,
    agents: AgentMap,
    event_tx: broadcast::Sender<AgentEvent>,
    max_agents: Option<usize>,
}

impl LocalAgentRunner {
    /// Create a runner that executes `work` for every spawned agent.
    pub fn new<F, Fut>(work: F) -> Self
    where
        F: Fn(SpawnOptions, AgentContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let work: Arc<WorkFn> = Arc::new(move |options, ctx| Box::pin(work(options, ctx)));

        Self {
            work,
            agents: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            max_agents: None,
        }
    }

    /// Refuse to spawn while `max` agents are active.
    pub fn with_max_agents(mut self, max: usize) -> Self {
        self.max_agents = Some(max);
        self
    }

    /// Snapshots of every known agent.
    pub async fn list(&self) -> Vec<AgentSnapshot> {
        let agents = self.agents.read().await;
        agents.values().map(|a| a.snapshot.clone()).collect()
    }

    /// Number of agents that have not finished.
    pub async fn active_count(&self) -> usize {
        let agents = self.agents.read().await;
        agents
            .values()
            .filter(|a| !a.snapshot.status.is_terminal())
            .count()
    }

    /// Drop an agent's record. A still running agent is cancelled.
    pub async fn forget(&self, id: &AgentId) -> bool {
        self.agents.write().await.remove(id).is_some()
    }

    /// Remove finished agents and return how many were removed.
    ///
    /// Only call this once nothing is waiting on those agents: a waiter that
    /// has not yet observed the final status sees the agent as gone.
    pub async fn cleanup_completed(&self) -> usize {
        let mut agents = self.agents.write().await;
        let before = agents.len();
        agents.retain(|_, a| !a.snapshot.status.is_terminal());
        let removed = before - agents.len();
        if removed > 0 {
            tracing::debug!(removed, "Removed finished agents");
        }
        removed
    }
}

#[async_trait]
impl AgentRunner for LocalAgentRunner {
    async fn spawn(&self, options: SpawnOptions) -> AgentResult<AgentHandle> {
        let id = AgentId::generate();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        {
            let mut agents = self.agents.write().await;
            if let Some(max) = self.max_agents {
                let active = agents
                    .values()
                    .filter(|a| !a.snapshot.status.is_terminal())
                    .count();
                if active >= max {
                    return Err(AgentError::SpawnFailed(format!(
                        "maximum concurrent agents ({max}) reached"
                    )));
                }
            }

            agents.insert(
                id.clone(),
                LocalAgent {
                    snapshot: AgentSnapshot::starting(id.clone(), options.agent_type.clone()),
                    cancel_tx: Some(cancel_tx),
                },
            );
        }

        tracing::debug!(
            agent_id = %id,
            agent_type = %options.agent_type,
            task_id = ?options.task_id,
            "Spawning local agent"
        );
        let _ = self.event_tx.send(AgentEvent::Started { id: id.clone() });

        let handle = AgentHandle {
            id: id.clone(),
            agent_type: options.agent_type.clone(),
        };

        tokio::spawn(run_local_agent(
            id,
            options,
            self.work.clone(),
            cancel_rx,
            self.agents.clone(),
            self.event_tx.clone(),
        ));

        Ok(handle)
    }

    async fn get(&self, id: &AgentId) -> Option<AgentSnapshot> {
        let agents = self.agents.read().await;
        agents.get(id).map(|a| a.snapshot.clone())
    }

    async fn stop(&self, id: &AgentId) -> AgentResult<()> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| AgentError::NotFound(id.clone()))?;

        if agent.snapshot.status.is_terminal() {
            return Ok(());
        }
        if let Some(tx) = agent.cancel_tx.take() {
            let _ = tx.send(());
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }
}

async fn run_local_agent(
    id: AgentId,
    options: SpawnOptions,
    work: Arc<WorkFn>,
    cancel_rx: oneshot::Receiver<()>,
    agents: AgentMap,
    event_tx: broadcast::Sender<AgentEvent>,
) {
    if let Some(agent) = agents.write().await.get_mut(&id) {
        agent.snapshot.status = AgentStatus::Running;
    }

    let timeout = options.timeout.unwrap_or(DEFAULT_TIMEOUT);
    let ctx = AgentContext {
        id: id.clone(),
        agents: agents.clone(),
    };
    let mut job = tokio::spawn(work(options, ctx));

    let outcome = tokio::select! {
        joined = &mut job => match joined {
            Ok(result) => result,
            Err(e) => Err(format!("Agent task panicked: {e}")),
        },
        _ = cancel_rx => {
            job.abort();
            Err("Agent was stopped".to_string())
        }
        _ = tokio::time::sleep(timeout) => {
            job.abort();
            Err(format!("Timed out after {timeout:?}"))
        }
    };

    // The snapshot is final before the event goes out.
    let event = {
        let mut agents = agents.write().await;
        let snapshot = agents.get_mut(&id).map(|a| &mut a.snapshot);
        match outcome {
            Ok(output) => {
                if let Some(snapshot) = snapshot {
                    snapshot.status = AgentStatus::Completed;
                    snapshot.output = Some(output.clone());
                }
                AgentEvent::Completed {
                    id: id.clone(),
                    output: Some(output),
                }
            }
            Err(error) => {
                if let Some(snapshot) = snapshot {
                    snapshot.status = AgentStatus::Error;
                    snapshot.error_message = Some(error.clone());
                }
                AgentEvent::Error {
                    id: id.clone(),
                    error,
                }
            }
        }
    };

    tracing::debug!(agent_id = %id, "Local agent finished");
    let _ = event_tx.send(event);
}
