//! Executor configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::DEFAULT_AGENT_TYPE;
use crate::task::DEFAULT_MAX_PARALLEL;

/// Configuration for the parallel executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum number of agents in flight.
    pub max_parallel: usize,
    /// Directory agents work in.
    pub working_dir: PathBuf,
    /// Session the agents belong to.
    pub session_id: Option<String>,
    /// Run agents without confirmations.
    pub autonomous: bool,
    /// Turn budget per agent.
    pub max_turns: Option<u32>,
    /// Time limit per agent, in seconds.
    pub agent_timeout_secs: Option<u64>,
    /// Stop dispatching after the first failure.
    pub stop_on_error: bool,
    /// Agent type for tasks that do not name one.
    pub default_agent_type: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            working_dir: PathBuf::from("."),
            session_id: None,
            autonomous: false,
            max_turns: None,
            agent_timeout_secs: None,
            stop_on_error: false,
            default_agent_type: DEFAULT_AGENT_TYPE.to_string(),
        }
    }
}

impl ExecutorConfig {
    /// Create a new config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set max parallel agents.
    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max.max(1);
        self
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Set the session ID.
    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Skip confirmations.
    pub fn with_autonomous(mut self, autonomous: bool) -> Self {
        self.autonomous = autonomous;
        self
    }

    /// Set the per-agent turn budget.
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    /// Set the per-agent timeout.
    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    /// Enable stop-on-error.
    pub fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    /// Set the fallback agent type.
    pub fn with_default_agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.default_agent_type = agent_type.into();
        self
    }

    /// Per-agent timeout as a duration.
    pub fn agent_timeout(&self) -> Option<Duration> {
        self.agent_timeout_secs.map(Duration::from_secs)
    }

    /// Effective concurrency cap (never below 1).
    pub fn effective_max_parallel(&self) -> usize {
        self.max_parallel.max(1)
    }
}
