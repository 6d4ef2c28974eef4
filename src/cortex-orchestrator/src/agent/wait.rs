//! Waiting for an agent to reach a terminal status.

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;

use super::{AgentEvent, AgentId, AgentRunner, AgentStatus};

/// How an agent run ended, as seen by a waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutcome {
    /// Agent completed.
    Completed {
        /// Final output, if any.
        output: Option<String>,
    },
    /// Agent ended in error.
    Failed {
        /// Error message.
        error: String,
    },
    /// The runner no longer knows the agent.
    Disappeared,
    /// The agent did not finish in time.
    TimedOut(Duration),
}

impl AgentOutcome {
    /// Whether the agent completed.
    pub fn is_success(&self) -> bool {
        matches!(self, AgentOutcome::Completed { .. })
    }

    /// Output of a completed agent.
    pub fn output(&self) -> Option<&str> {
        match self {
            AgentOutcome::Completed { output } => output.as_deref(),
            _ => None,
        }
    }

    /// Error message of an unsuccessful outcome.
    pub fn error_message(&self) -> Option<String> {
        match self {
            AgentOutcome::Completed { .. } => None,
            AgentOutcome::Failed { error } => Some(error.clone()),
            AgentOutcome::Disappeared => Some("Agent disappeared".to_string()),
            AgentOutcome::TimedOut(after) => Some(format!("Agent timed out after {after:?}")),
        }
    }
}

/// Current outcome of `id`, or `None` while it is still running.
async fn check_status<R>(runner: &R, id: &AgentId) -> Option<AgentOutcome>
where
    R: AgentRunner + ?Sized,
{
    let Some(snapshot) = runner.get(id).await else {
        return Some(AgentOutcome::Disappeared);
    };

    match snapshot.status {
        AgentStatus::Completed => Some(AgentOutcome::Completed {
            output: snapshot.output,
        }),
        AgentStatus::Error => Some(AgentOutcome::Failed {
            error: snapshot
                .error_message
                .unwrap_or_else(|| "Agent failed".to_string()),
        }),
        AgentStatus::Starting | AgentStatus::Running => None,
    }
}

/// Wait for agent `id` using the runner's event stream.
///
/// The subscription is taken before the status check, so a terminal event
/// published between the two is not lost. Only events for `id` resolve the
/// wait. The receiver is dropped on return.
pub async fn wait_for_completion<R>(runner: &R, id: &AgentId) -> AgentOutcome
where
    R: AgentRunner + ?Sized,
{
    let mut events = runner.subscribe();

    if let Some(outcome) = check_status(runner, id).await {
        return outcome;
    }

    loop {
        match events.recv().await {
            Ok(AgentEvent::Completed { id: event_id, output }) if &event_id == id => {
                return AgentOutcome::Completed { output };
            }
            Ok(AgentEvent::Error { id: event_id, error }) if &event_id == id => {
                return AgentOutcome::Failed { error };
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(agent_id = %id, skipped, "Agent event stream lagged");
                if let Some(outcome) = check_status(runner, id).await {
                    return outcome;
                }
            }
            Err(RecvError::Closed) => {
                return check_status(runner, id)
                    .await
                    .unwrap_or_else(|| AgentOutcome::Failed {
                        error: "Agent event stream closed".to_string(),
                    });
            }
        }
    }
}

/// Wait for agent `id` by polling its status every `interval`.
///
/// Resolves to [`AgentOutcome::TimedOut`] once `timeout` elapses.
pub async fn poll_for_completion<R>(
    runner: &R,
    id: &AgentId,
    interval: Duration,
    timeout: Duration,
) -> AgentOutcome
where
    R: AgentRunner + ?Sized,
{
    let poll = async {
        loop {
            if let Some(outcome) = check_status(runner, id).await {
                return outcome;
            }
            tokio::time::sleep(interval).await;
        }
    };

    match tokio::time::timeout(timeout, poll).await {
        Ok(outcome) => outcome,
        Err(_) => AgentOutcome::TimedOut(timeout),
    }
}
