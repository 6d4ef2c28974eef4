//! Agent capability used by the executor and the self-healing engine.
//!
//! Spawning and supervising an individual agent process is not this crate's
//! job. Everything here talks to agents through the [`AgentRunner`] trait:
//! start an agent, look up its status, stop it, and subscribe to its
//! terminal events.
//!
//! Two ways of waiting for an agent are provided in [`wait`]:
//!
//! - [`wait_for_completion`]: event driven, used by the parallel executor
//! - [`poll_for_completion`]: fixed-interval polling with a hard deadline,
//!   used by the self-healing engine
//!
//! [`LocalAgentRunner`] runs agent work in-process as tokio tasks.
//!
//! # Example
//!
//! ```rust,ignore
//! use cortex_orchestrator::agent::{LocalAgentRunner, SpawnOptions, wait_for_completion};
//!
//! let runner = LocalAgentRunner::new(|options, _ctx| async move {
//!     Ok(format!("did: {}", options.prompt))
//! });
//!
//! let handle = runner.spawn(SpawnOptions::new("Write tests")).await?;
//! let outcome = wait_for_completion(&runner, &handle.id).await;
//! assert!(outcome.is_success());
//! ```

pub mod local;
pub mod wait;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::task::TaskId;

pub use local::{AgentContext, LocalAgentRunner};
pub use wait::{poll_for_completion, wait_for_completion, AgentOutcome};

/// Agent type used when a task does not name one.
pub const DEFAULT_AGENT_TYPE: &str = "general";

/// Unique identifier for a running agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Wrap an ID issued by an agent runner.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random ID.
    pub fn generate() -> Self {
        Self(format!("agent-{}", uuid::Uuid::new_v4()))
    }

    /// Borrow the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Agent is being started.
    #[default]
    Starting,
    /// Agent is working.
    Running,
    /// Agent finished successfully.
    Completed,
    /// Agent failed or was stopped.
    Error,
}

impl AgentStatus {
    /// Completed or errored.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Completed | AgentStatus::Error)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Starting => write!(f, "starting"),
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Completed => write!(f, "completed"),
            AgentStatus::Error => write!(f, "error"),
        }
    }
}

/// Parameters for starting an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnOptions {
    /// Prompt given to the agent.
    pub prompt: String,
    /// Kind of agent to start.
    pub agent_type: String,
    /// Directory the agent works in.
    pub working_dir: PathBuf,
    /// Orchestration session the agent belongs to.
    pub session_id: Option<String>,
    /// Task the agent is executing, if any.
    pub task_id: Option<TaskId>,
    /// Run without asking for confirmations.
    pub autonomous: bool,
    /// Maximum number of turns.
    pub max_turns: Option<u32>,
    /// Maximum run time.
    pub timeout: Option<Duration>,
}

impl SpawnOptions {
    /// Options for `prompt` with default settings.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            agent_type: DEFAULT_AGENT_TYPE.to_string(),
            working_dir: PathBuf::from("."),
            session_id: None,
            task_id: None,
            autonomous: false,
            max_turns: None,
            timeout: None,
        }
    }

    /// Set the agent type.
    pub fn with_agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = agent_type.into();
        self
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Set the session ID.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the task ID.
    pub fn with_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Skip confirmations.
    pub fn autonomous(mut self, autonomous: bool) -> Self {
        self.autonomous = autonomous;
        self
    }

    /// Set the turn budget.
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    /// Set the run timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Handle returned when an agent is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentHandle {
    /// Agent ID.
    pub id: AgentId,
    /// Agent type.
    pub agent_type: String,
}

/// Point-in-time view of an agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSnapshot {
    /// Agent ID.
    pub id: AgentId,
    /// Agent type.
    pub agent_type: String,
    /// Current status.
    pub status: AgentStatus,
    /// Error of a failed agent.
    pub error_message: Option<String>,
    /// What the agent is doing right now.
    pub current_action: Option<String>,
    /// Final text output of a completed agent.
    pub output: Option<String>,
    /// When the agent was started.
    pub started_at: DateTime<Utc>,
}

impl AgentSnapshot {
    /// Snapshot of an agent that was just started.
    pub fn starting(id: AgentId, agent_type: impl Into<String>) -> Self {
        Self {
            id,
            agent_type: agent_type.into(),
            status: AgentStatus::Starting,
            error_message: None,
            current_action: None,
            output: None,
            started_at: Utc::now(),
        }
    }
}

/// Lifecycle events published by an agent runner.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Agent was started.
    Started {
        /// Agent ID.
        id: AgentId,
    },
    /// Agent finished successfully.
    Completed {
        /// Agent ID.
        id: AgentId,
        /// Final output.
        output: Option<String>,
    },
    /// Agent failed.
    Error {
        /// Agent ID.
        id: AgentId,
        /// Error message.
        error: String,
    },
}

impl AgentEvent {
    /// ID of the agent the event is about.
    pub fn agent_id(&self) -> &AgentId {
        match self {
            AgentEvent::Started { id }
            | AgentEvent::Completed { id, .. }
            | AgentEvent::Error { id, .. } => id,
        }
    }
}

/// Errors from agent runner operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent could not be started.
    #[error("Failed to spawn agent: {0}")]
    SpawnFailed(String),

    /// Agent not found.
    #[error("Agent not found: {0}")]
    NotFound(AgentId),

    /// The agent could not be stopped.
    #[error("Failed to stop agent {id}: {message}")]
    StopFailed { id: AgentId, message: String },

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for agent operations.
pub type AgentResult<T> = std::result::Result<T, AgentError>;

/// Capability to start, observe and stop agents.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Start an agent. Returns once the agent is registered, not when it
    /// finishes.
    async fn spawn(&self, options: SpawnOptions) -> AgentResult<AgentHandle>;

    /// Look up an agent. `None` if the runner no longer knows it.
    async fn get(&self, id: &AgentId) -> Option<AgentSnapshot>;

    /// Ask an agent to stop. Best effort.
    async fn stop(&self, id: &AgentId) -> AgentResult<()>;

    /// Subscribe to lifecycle events of every agent.
    fn subscribe(&self) -> broadcast::Receiver<AgentEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_options_builder() {
        let options = SpawnOptions::new("Fix bug")
            .with_agent_type("coder")
            .with_working_dir("/tmp/project")
            .with_session("session-1")
            .with_task(TaskId::from("t1"))
            .autonomous(true)
            .with_max_turns(20)
            .with_timeout(Duration::from_secs(60));

        assert_eq!(options.prompt, "Fix bug");
        assert_eq!(options.agent_type, "coder");
        assert_eq!(options.working_dir, PathBuf::from("/tmp/project"));
        assert_eq!(options.session_id.as_deref(), Some("session-1"));
        assert_eq!(options.task_id, Some(TaskId::from("t1")));
        assert!(options.autonomous);
        assert_eq!(options.max_turns, Some(20));
        assert_eq!(options.timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_default_agent_type() {
        assert_eq!(SpawnOptions::new("x").agent_type, DEFAULT_AGENT_TYPE);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = AgentId::generate();
        let b = AgentId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("agent-"));
    }

    #[test]
    fn test_event_agent_id() {
        let id = AgentId::from("a1");
        let event = AgentEvent::Error {
            id: id.clone(),
            error: "boom".to_string(),
        };
        assert_eq!(event.agent_id(), &id);
    }

    #[test]
    fn test_status_terminal() {
        assert!(!AgentStatus::Starting.is_terminal());
        assert!(!AgentStatus::Running.is_terminal());
        assert!(AgentStatus::Completed.is_terminal());
        assert!(AgentStatus::Error.is_terminal());
    }
}
