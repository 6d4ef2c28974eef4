//! Data types for the self-healing engine.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::DEFAULT_AGENT_TYPE;

/// A failing test handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestFailure {
    /// Test suite.
    pub suite_id: String,
    /// Scenario inside the suite.
    pub scenario_id: String,
    /// Human readable test name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_name: Option<String>,
    /// Error reported by the test runner.
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// Relevant log lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    /// Source file under test.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl TestFailure {
    /// Create a failure for `suite_id:scenario_id`.
    pub fn new(
        suite_id: impl Into<String>,
        scenario_id: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            suite_id: suite_id.into(),
            scenario_id: scenario_id.into(),
            test_name: None,
            error_message: error_message.into(),
            stack_trace: None,
            logs: None,
            file: None,
        }
    }

    pub fn with_test_name(mut self, name: impl Into<String>) -> Self {
        self.test_name = Some(name.into());
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    pub fn with_logs(mut self, logs: impl Into<String>) -> Self {
        self.logs = Some(logs.into());
        self
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Stable key identifying this failure across attempts.
    pub fn key(&self) -> String {
        format!("{}:{}", self.suite_id, self.scenario_id)
    }
}

/// Category of a failure's root cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootCause {
    SelectorChanged,
    TimingIssue,
    NetworkError,
    TypeError,
    BuildError,
    DependencyIssue,
    AssertionFailure,
    LogicError,
    #[serde(other)]
    Unknown,
}

impl RootCause {
    /// Wire name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            RootCause::SelectorChanged => "selector_changed",
            RootCause::TimingIssue => "timing_issue",
            RootCause::NetworkError => "network_error",
            RootCause::TypeError => "type_error",
            RootCause::BuildError => "build_error",
            RootCause::DependencyIssue => "dependency_issue",
            RootCause::AssertionFailure => "assertion_failure",
            RootCause::LogicError => "logic_error",
            RootCause::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RootCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnosis of a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorAnalysis {
    pub root_cause: RootCause,
    /// Between 0 and 1.
    pub confidence: f64,
    pub explanation: String,
    #[serde(default)]
    pub suggested_fix: String,
    #[serde(default)]
    pub affected_files: Vec<String>,
    #[serde(default)]
    pub can_auto_fix: bool,
}

/// Kind of a fix step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixStepType {
    Read,
    Edit,
    Write,
    Delete,
    Command,
    Analysis,
}

/// One step of a fix plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixStep {
    #[serde(rename = "type")]
    pub step_type: FixStepType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_outcome: Option<String>,
}

/// Ordered steps to fix a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixPlan {
    pub steps: Vec<FixStep>,
}

/// Outcome of one healing attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixResult {
    pub success: bool,
    /// `suite:scenario` key of the failure.
    pub failure_key: String,
    /// 1-based attempt number for this key.
    pub attempt: u32,
    /// Agent type that applied the fix.
    pub agent_used: Option<String>,
    /// Files the fix agent reported touching.
    pub files_modified: Vec<String>,
    pub analysis: Option<ErrorAnalysis>,
    pub plan: Option<FixPlan>,
    pub error: Option<String>,
    /// Set when attempts are exhausted and the caller should escalate.
    pub escalate: bool,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

impl FixResult {
    /// A failed attempt with no artifacts.
    pub fn failure(failure_key: impl Into<String>, attempt: u32, error: impl Into<String>) -> Self {
        Self {
            success: false,
            failure_key: failure_key.into(),
            attempt,
            agent_used: None,
            files_modified: Vec::new(),
            analysis: None,
            plan: None,
            error: Some(error.into()),
            escalate: false,
            duration: Duration::ZERO,
            timestamp: Utc::now(),
        }
    }
}

/// State of a healing session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealingState {
    #[default]
    Idle,
    Analyzing,
    Fixing,
    Verifying,
    Completed,
    Failed,
}

impl fmt::Display for HealingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealingState::Idle => "idle",
            HealingState::Analyzing => "analyzing",
            HealingState::Fixing => "fixing",
            HealingState::Verifying => "verifying",
            HealingState::Completed => "completed",
            HealingState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Statistics derived from a session's history and attempt counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealingStats {
    pub total_attempts: usize,
    pub successful_fixes: usize,
    pub failed_fixes: usize,
    /// Failure keys with at least one attempt and no successful fix.
    pub active_failures: usize,
    /// Successful fixes over total attempts, 0 when nothing was attempted.
    pub success_rate: f64,
}

/// Configuration of a healing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfHealingConfig {
    /// Whether failures are processed at all.
    pub enabled: bool,
    /// Attempts per failure key.
    pub max_attempts: u32,
    /// Agent type for the analysis and planning phases.
    pub analysis_agent_type: String,
    /// Agent type for the apply phase.
    pub fix_agent_type: String,
    /// Time limit per phase, in seconds.
    pub phase_timeout_secs: u64,
    /// Status poll interval, in milliseconds.
    pub poll_interval_ms: u64,
    /// Flag exhausted failures for escalation.
    pub escalate_after_max_attempts: bool,
    /// Turn budget of the analysis and planning agents.
    pub analysis_max_turns: u32,
    /// Turn budget of the fix agent.
    pub fix_max_turns: u32,
}

impl Default for SelfHealingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            analysis_agent_type: DEFAULT_AGENT_TYPE.to_string(),
            fix_agent_type: DEFAULT_AGENT_TYPE.to_string(),
            phase_timeout_secs: 300,
            poll_interval_ms: 2_000,
            escalate_after_max_attempts: true,
            analysis_max_turns: 10,
            fix_max_turns: 30,
        }
    }
}

impl SelfHealingConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_escalation(mut self, escalate: bool) -> Self {
        self.escalate_after_max_attempts = escalate;
        self
    }

    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX).max(1);
        self
    }

    pub fn with_agent_types(
        mut self,
        analysis: impl Into<String>,
        fix: impl Into<String>,
    ) -> Self {
        self.analysis_agent_type = analysis.into();
        self.fix_agent_type = fix.into();
        self
    }

    /// Phase time limit as a duration.
    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_secs)
    }

    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
