//! Per-session self-healing state machine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::RwLock;

use super::heuristics::{
    extract_modified_files, fallback_plan, heuristic_analysis, parse_analysis, parse_plan,
};
use super::notify::{HealingEvent, NoopNotificationSink, NotificationSink, StatusEnvelope};
use super::prompts::{analysis_prompt, apply_prompt, plan_prompt};
use super::types::{
    ErrorAnalysis, FixPlan, FixResult, HealingState, HealingStats, SelfHealingConfig, TestFailure,
};
use crate::agent::{poll_for_completion, AgentError, AgentOutcome, AgentRunner, SpawnOptions};

/// Errors that abort a healing attempt.
#[derive(Debug, Error)]
pub enum HealingError {
    /// The agent runner failed.
    #[error("Agent error during {phase}: {source}")]
    Agent {
        phase: &'static str,
        #[source]
        source: AgentError,
    },
}

#[derive(Debug, Default)]
struct SessionData {
    attempts: HashMap<String, u32>,
    history: Vec<FixResult>,
    state: HealingState,
}

/// Diagnoses and repairs test failures for one session by delegating to
/// agents.
///
/// Every failure key gets at most `max_attempts` attempts. Each attempt runs
/// three agents in turn (analyze, plan, apply) and is recorded in the
/// session history whatever its outcome.
pub struct SelfHealingEngine {
    session_id: String,
    config: SelfHealingConfig,
    runner: Arc<dyn AgentRunner>,
    notifier: Arc<dyn NotificationSink>,
    working_dir: PathBuf,
    data: RwLock<SessionData>,
}

impl std::fmt::Debug for SelfHealingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfHealingEngine")
            .field("session_id", &self.session_id)
            .field("config", &self.config)
            .field("working_dir", &self.working_dir)
            .finish_non_exhaustive()
    }
}

impl SelfHealingEngine {
    /// Create an engine for `session_id`.
    pub fn new(
        session_id: impl Into<String>,
        config: SelfHealingConfig,
        runner: Arc<dyn AgentRunner>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            config,
            runner,
            notifier: Arc::new(NoopNotificationSink),
            working_dir: PathBuf::from("."),
            data: RwLock::new(SessionData::default()),
        }
    }

    /// Send status notifications to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Directory the healing agents work in.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &SelfHealingConfig {
        &self.config
    }

    pub async fn state(&self) -> HealingState {
        self.data.read().await.state
    }

    /// Attempts recorded for `failure_key`.
    pub async fn attempts_for(&self, failure_key: &str) -> u32 {
        self.data
            .read()
            .await
            .attempts
            .get(failure_key)
            .copied()
            .unwrap_or(0)
    }

    /// Every recorded attempt, oldest first.
    pub async fn history(&self) -> Vec<FixResult> {
        self.data.read().await.history.clone()
    }

    /// Forget attempts, history and state.
    pub async fn reset(&self) {
        let mut data = self.data.write().await;
        *data = SessionData::default();
        tracing::info!(session_id = %self.session_id, "Self-healing session reset");
    }

    /// Forget the attempt counter of one failure key.
    pub async fn clear_attempts(&self, failure_key: &str) {
        self.data.write().await.attempts.remove(failure_key);
    }

    /// Mark the session as verifying a fix. Re-running the tests is up to the
    /// caller.
    pub async fn verify_fix(&self, failure_key: &str) -> bool {
        self.set_state(HealingState::Verifying).await;
        tracing::debug!(session_id = %self.session_id, failure_key, "Verifying fix");
        true
    }

    /// Statistics derived from history and attempt counters.
    pub async fn stats(&self) -> HealingStats {
        let data = self.data.read().await;
        let total_attempts = data.history.len();
        let successful_fixes = data.history.iter().filter(|r| r.success).count();
        let active_failures = data
            .attempts
            .iter()
            .filter(|(key, count)| {
                **count > 0
                    && !data
                        .history
                        .iter()
                        .any(|r| r.success && &r.failure_key == *key)
            })
            .count();
        let success_rate = if total_attempts == 0 {
            0.0
        } else {
            successful_fixes as f64 / total_attempts as f64
        };

        HealingStats {
            total_attempts,
            successful_fixes,
            failed_fixes: total_attempts - successful_fixes,
            active_failures,
            success_rate,
        }
    }

    async fn set_state(&self, state: HealingState) {
        let mut data = self.data.write().await;
        if data.state != state {
            tracing::debug!(session_id = %self.session_id, from = %data.state, to = %state, "Self-healing state change");
            data.state = state;
        }
    }

    fn notify(&self, event: HealingEvent, payload: Value) {
        self.notifier
            .notify(&self.session_id, StatusEnvelope::new(event, payload));
    }

    /// Try to fix `failure`.
    ///
    /// Never returns an error: disabled sessions, exhausted failures and
    /// pipeline errors all come back as unsuccessful results.
    pub async fn process_failure(&self, failure: &TestFailure) -> FixResult {
        let key = failure.key();

        if !self.config.enabled {
            return FixResult::failure(key, 0, "Self-healing is disabled");
        }

        let attempts = self.attempts_for(&key).await;
        if attempts >= self.config.max_attempts {
            tracing::warn!(
                session_id = %self.session_id,
                failure_key = %key,
                attempts,
                "Max self-healing attempts reached"
            );
            self.notify(
                HealingEvent::MaxAttemptsReached,
                json!({
                    "failureKey": key,
                    "attempts": attempts,
                    "maxAttempts": self.config.max_attempts,
                    "escalate": self.config.escalate_after_max_attempts,
                }),
            );
            let mut result = FixResult::failure(
                key.clone(),
                attempts,
                format!(
                    "Max attempts ({}) reached for {key}",
                    self.config.max_attempts
                ),
            );
            result.escalate = self.config.escalate_after_max_attempts;
            return result;
        }

        let attempt = attempts + 1;
        let started = Instant::now();
        tracing::info!(session_id = %self.session_id, failure_key = %key, attempt, "Self-healing attempt started");

        let mut result = match self.run_pipeline(failure, &key, attempt).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, failure_key = %key, error = %e, "Self-healing attempt failed");
                self.notify(
                    HealingEvent::Failed,
                    json!({ "failureKey": key, "error": e.to_string() }),
                );
                FixResult::failure(key.clone(), attempt, e.to_string())
            }
        };
        result.duration = started.elapsed();

        let mut data = self.data.write().await;
        *data.attempts.entry(key).or_insert(0) += 1;
        data.state = if result.success {
            HealingState::Completed
        } else {
            HealingState::Failed
        };
        data.history.push(result.clone());

        result
    }

    async fn run_pipeline(
        &self,
        failure: &TestFailure,
        key: &str,
        attempt: u32,
    ) -> Result<FixResult, HealingError> {
        self.set_state(HealingState::Analyzing).await;
        self.notify(
            HealingEvent::AnalysisStarted,
            json!({ "failureKey": key, "attempt": attempt }),
        );
        let analysis = self.analyze(failure).await?;
        self.notify(
            HealingEvent::AnalysisComplete,
            json!({
                "failureKey": key,
                "rootCause": analysis.root_cause,
                "confidence": analysis.confidence,
            }),
        );

        let plan = self.plan(failure, &analysis).await?;
        self.notify(
            HealingEvent::FixPlanGenerated,
            json!({ "failureKey": key, "steps": plan.steps.len() }),
        );

        self.set_state(HealingState::Fixing).await;
        self.notify(HealingEvent::FixStarted, json!({ "failureKey": key }));
        let outcome = self
            .run_phase(
                "apply",
                apply_prompt(failure, &analysis, &plan),
                &self.config.fix_agent_type,
                self.config.fix_max_turns,
            )
            .await?;

        let files_modified = outcome
            .output()
            .map(extract_modified_files)
            .unwrap_or_default();
        let success = outcome.is_success();
        let error = outcome.error_message();

        if success {
            self.notify(
                HealingEvent::FixSuccess,
                json!({ "failureKey": key, "filesModified": files_modified }),
            );
        } else {
            self.notify(
                HealingEvent::FixFailed,
                json!({ "failureKey": key, "error": error }),
            );
        }

        Ok(FixResult {
            success,
            failure_key: key.to_string(),
            attempt,
            agent_used: Some(self.config.fix_agent_type.clone()),
            files_modified,
            analysis: Some(analysis),
            plan: Some(plan),
            error,
            escalate: false,
            duration: std::time::Duration::ZERO,
            timestamp: Utc::now(),
        })
    }

    async fn analyze(&self, failure: &TestFailure) -> Result<ErrorAnalysis, HealingError> {
        let outcome = self
            .run_phase(
                "analysis",
                analysis_prompt(failure),
                &self.config.analysis_agent_type,
                self.config.analysis_max_turns,
            )
            .await?;

        Ok(match outcome.output().and_then(parse_analysis) {
            Some(analysis) => analysis,
            None => {
                tracing::debug!(failure_key = %failure.key(), "Using heuristic analysis");
                heuristic_analysis(failure)
            }
        })
    }

    async fn plan(
        &self,
        failure: &TestFailure,
        analysis: &ErrorAnalysis,
    ) -> Result<FixPlan, HealingError> {
        let outcome = self
            .run_phase(
                "plan",
                plan_prompt(failure, analysis),
                &self.config.analysis_agent_type,
                self.config.analysis_max_turns,
            )
            .await?;

        Ok(match outcome.output().and_then(parse_plan) {
            Some(plan) => plan,
            None => {
                tracing::debug!(failure_key = %failure.key(), "Using fallback fix plan");
                fallback_plan(failure, analysis)
            }
        })
    }

    /// Spawn one agent and poll it to a terminal status.
    async fn run_phase(
        &self,
        phase: &'static str,
        prompt: String,
        agent_type: &str,
        max_turns: u32,
    ) -> Result<AgentOutcome, HealingError> {
        let timeout = self.config.phase_timeout();
        let options = SpawnOptions::new(prompt)
            .with_agent_type(agent_type)
            .with_working_dir(self.working_dir.clone())
            .with_session(self.session_id.clone())
            .autonomous(true)
            .with_max_turns(max_turns)
            .with_timeout(timeout);

        let handle = self
            .runner
            .spawn(options)
            .await
            .map_err(|source| HealingError::Agent { phase, source })?;

        let outcome = poll_for_completion(
            self.runner.as_ref(),
            &handle.id,
            self.config.poll_interval(),
            timeout,
        )
        .await;

        if matches!(outcome, AgentOutcome::TimedOut(_)) {
            if let Err(e) = self.runner.stop(&handle.id).await {
                tracing::debug!(agent_id = %handle.id, error = %e, "Stop after timeout failed");
            }
        }
        tracing::debug!(phase, agent_id = %handle.id, success = outcome.is_success(), "Healing phase finished");

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentError, LocalAgentRunner};
    use crate::healing::notify::BroadcastNotificationSink;
    use crate::healing::types::RootCause;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const ANALYSIS_JSON: &str = r#"```json
{"rootCause": "selector_changed", "confidence": 0.9, "explanation": "Button id changed", "suggestedFix": "Use data-testid", "affectedFiles": ["src/Login.tsx"], "canAutoFix": true}
```"#;

    const PLAN_JSON: &str = r#"{"steps": [{"type": "edit", "file": "src/Login.tsx", "description": "Update selector"}]}"#;

    fn fast_config() -> SelfHealingConfig {
        SelfHealingConfig::default()
            .with_poll_interval(Duration::from_millis(2))
            .with_phase_timeout(Duration::from_secs(5))
    }

    /// Runner answering each phase from its prompt; counts spawns.
    fn scripted_runner(spawns: Arc<AtomicUsize>, apply_ok: bool) -> Arc<LocalAgentRunner> {
        Arc::new(LocalAgentRunner::new(move |options, _ctx| {
            spawns.fetch_add(1, Ordering::SeqCst);
            async move {
                if options.prompt.starts_with("# Test Failure Analysis") {
                    Ok(ANALYSIS_JSON.to_string())
                } else if options.prompt.starts_with("# Fix Plan") {
                    Ok(PLAN_JSON.to_string())
                } else if apply_ok {
                    Ok("Edited: src/Login.tsx\nAll done.".to_string())
                } else {
                    Err("could not apply fix".to_string())
                }
            }
        }))
    }

    fn failure() -> TestFailure {
        TestFailure::new("suite1", "scenario1", "locator('#login') not found")
    }

    #[tokio::test]
    async fn test_successful_attempt() {
        let spawns = Arc::new(AtomicUsize::new(0));
        let engine = SelfHealingEngine::new("s1", fast_config(), scripted_runner(spawns.clone(), true));

        let result = engine.process_failure(&failure()).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.attempt, 1);
        assert_eq!(result.files_modified, vec!["src/Login.tsx"]);
        let analysis = result.analysis.unwrap();
        assert_eq!(analysis.root_cause, RootCause::SelectorChanged);
        assert_eq!(analysis.confidence, 0.9);
        assert_eq!(result.plan.unwrap().steps.len(), 1);
        assert_eq!(spawns.load(Ordering::SeqCst), 3);
        assert_eq!(engine.state().await, HealingState::Completed);
        assert_eq!(engine.attempts_for("suite1:scenario1").await, 1);
    }

    #[tokio::test]
    async fn test_max_attempts_short_circuits() {
        let spawns = Arc::new(AtomicUsize::new(0));
        let engine = SelfHealingEngine::new("s1", fast_config(), scripted_runner(spawns.clone(), false));

        for expected_attempt in 1..=3 {
            let result = engine.process_failure(&failure()).await;
            assert!(!result.success);
            assert_eq!(result.attempt, expected_attempt);
        }
        assert_eq!(spawns.load(Ordering::SeqCst), 9);

        let result = engine.process_failure(&failure()).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("Max attempts"));
        assert!(result.escalate);
        assert_eq!(spawns.load(Ordering::SeqCst), 9);
        assert_eq!(engine.history().await.len(), 3);
    }

    #[tokio::test]
    async fn test_max_attempts_without_escalation() {
        let spawns = Arc::new(AtomicUsize::new(0));
        let config = fast_config().with_max_attempts(1).with_escalation(false);
        let engine = SelfHealingEngine::new("s1", config, scripted_runner(spawns, true));

        engine.process_failure(&failure()).await;
        let result = engine.process_failure(&failure()).await;

        assert!(result.error.unwrap().contains("Max attempts"));
        assert!(!result.escalate);
    }

    #[tokio::test]
    async fn test_unparseable_output_uses_heuristics() {
        let runner = Arc::new(LocalAgentRunner::new(|options, _ctx| async move {
            if options.prompt.starts_with("# Apply Fix") {
                Ok("Modified: src/net.ts".to_string())
            } else {
                Ok("I am not sure what happened.".to_string())
            }
        }));
        let engine = SelfHealingEngine::new("s1", fast_config(), runner);
        let failure = TestFailure::new("api", "health", "fetch failed: ECONNREFUSED");

        let result = engine.process_failure(&failure).await;

        let analysis = result.analysis.unwrap();
        assert_eq!(analysis.confidence, 0.5);
        assert_eq!(analysis.root_cause, RootCause::NetworkError);
        let plan = result.plan.unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert!(plan.steps[0].description.starts_with("Investigate and fix"));
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_disabled() {
        let spawns = Arc::new(AtomicUsize::new(0));
        let engine = SelfHealingEngine::new(
            "s1",
            fast_config().with_enabled(false),
            scripted_runner(spawns.clone(), true),
        );

        let result = engine.process_failure(&failure()).await;

        assert_eq!(result.error.as_deref(), Some("Self-healing is disabled"));
        assert_eq!(spawns.load(Ordering::SeqCst), 0);
        assert!(engine.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_error_recorded() {
        let runner = Arc::new(
            LocalAgentRunner::new(|_options, _ctx| async move { Ok(String::new()) })
                .with_max_agents(0),
        );
        let sink = Arc::new(BroadcastNotificationSink::new(16));
        let mut notifications = sink.subscribe();
        let engine = SelfHealingEngine::new("s1", fast_config(), runner).with_notifier(sink);

        let result = engine.process_failure(&failure()).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("analysis"));
        assert_eq!(engine.attempts_for("suite1:scenario1").await, 1);
        assert_eq!(engine.history().await.len(), 1);
        assert_eq!(engine.state().await, HealingState::Failed);

        let mut events = Vec::new();
        while let Ok(n) = notifications.try_recv() {
            events.push(n.envelope.event);
        }
        assert_eq!(
            events,
            vec!["self-healing:analysis_started", "self-healing:failed"]
        );
    }

    #[tokio::test]
    async fn test_notification_sequence() {
        let spawns = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(BroadcastNotificationSink::new(16));
        let mut notifications = sink.subscribe();
        let engine = SelfHealingEngine::new("s1", fast_config(), scripted_runner(spawns, false))
            .with_notifier(sink);

        engine.process_failure(&failure()).await;

        let mut events = Vec::new();
        while let Ok(n) = notifications.try_recv() {
            assert_eq!(n.session_id, "s1");
            events.push(n.envelope.event);
        }
        assert_eq!(
            events,
            vec![
                "self-healing:analysis_started",
                "self-healing:analysis_complete",
                "self-healing:fix_plan_generated",
                "self-healing:fix_started",
                "self-healing:fix_failed",
            ]
        );
    }

    #[tokio::test]
    async fn test_clear_attempts_reset_and_stats() {
        let spawns = Arc::new(AtomicUsize::new(0));
        let engine = SelfHealingEngine::new("s1", fast_config(), scripted_runner(spawns, false));
        let other = TestFailure::new("suite2", "scenario9", "boom");

        engine.process_failure(&failure()).await;
        engine.process_failure(&other).await;

        let stats = engine.stats().await;
        assert_eq!(stats.total_attempts, 2);
        assert_eq!(stats.failed_fixes, 2);
        assert_eq!(stats.active_failures, 2);
        assert_eq!(stats.success_rate, 0.0);

        engine.clear_attempts("suite1:scenario1").await;
        assert_eq!(engine.attempts_for("suite1:scenario1").await, 0);
        assert_eq!(engine.attempts_for("suite2:scenario9").await, 1);

        assert!(engine.verify_fix("suite2:scenario9").await);
        assert_eq!(engine.state().await, HealingState::Verifying);

        engine.reset().await;
        assert_eq!(engine.state().await, HealingState::Idle);
        assert!(engine.history().await.is_empty());
        assert_eq!(engine.stats().await.total_attempts, 0);
    }

    #[test]
    fn test_error_display_names_phase() {
        let error = HealingError::Agent {
            phase: "plan",
            source: AgentError::SpawnFailed("busy".to_string()),
        };
        assert_eq!(
            error.to_string(),
            "Agent error during plan: Failed to spawn agent: busy"
        );
    }
}
