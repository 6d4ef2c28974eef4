//! Registry of healing engines keyed by session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::engine::SelfHealingEngine;
use super::notify::{NoopNotificationSink, NotificationSink};
use super::types::SelfHealingConfig;
use crate::agent::AgentRunner;

/// Owns one [`SelfHealingEngine`] per session.
///
/// Engines are created on first use with the registry's default config.
/// Reconfiguring a session replaces its engine, dropping its attempts and
/// history.
pub struct SelfHealingRegistry {
    runner: Arc<dyn AgentRunner>,
    notifier: Arc<dyn NotificationSink>,
    default_config: SelfHealingConfig,
    working_dir: PathBuf,
    engines: RwLock<HashMap<String, Arc<SelfHealingEngine>>>,
}

impl SelfHealingRegistry {
    /// Create a registry whose engines spawn agents through `runner`.
    pub fn new(runner: Arc<dyn AgentRunner>, default_config: SelfHealingConfig) -> Self {
        Self {
            runner,
            notifier: Arc::new(NoopNotificationSink),
            default_config,
            working_dir: PathBuf::from("."),
            engines: RwLock::new(HashMap::new()),
        }
    }

    /// Notification sink shared by every engine.
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Working directory of every engine.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    fn build(&self, session_id: &str, config: SelfHealingConfig) -> Arc<SelfHealingEngine> {
        Arc::new(
            SelfHealingEngine::new(session_id, config, self.runner.clone())
                .with_notifier(self.notifier.clone())
                .with_working_dir(self.working_dir.clone()),
        )
    }

    /// Engine for `session_id`, created with the default config if missing.
    pub async fn get_or_create(&self, session_id: &str) -> Arc<SelfHealingEngine> {
        if let Some(engine) = self.engines.read().await.get(session_id) {
            return engine.clone();
        }

        let mut engines = self.engines.write().await;
        engines
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session_id, "Creating self-healing engine");
                self.build(session_id, self.default_config.clone())
            })
            .clone()
    }

    /// Engine for `session_id`, if one exists.
    pub async fn get(&self, session_id: &str) -> Option<Arc<SelfHealingEngine>> {
        self.engines.read().await.get(session_id).cloned()
    }

    /// Replace the engine of `session_id` with a fresh one using `config`.
    pub async fn configure(
        &self,
        session_id: &str,
        config: SelfHealingConfig,
    ) -> Arc<SelfHealingEngine> {
        let engine = self.build(session_id, config);
        let previous = self
            .engines
            .write()
            .await
            .insert(session_id.to_string(), engine.clone());
        tracing::info!(
            session_id,
            replaced = previous.is_some(),
            "Self-healing engine configured"
        );
        engine
    }

    /// Drop the engine of `session_id`.
    pub async fn remove(&self, session_id: &str) -> bool {
        let removed = self.engines.write().await.remove(session_id).is_some();
        if removed {
            tracing::debug!(session_id, "Self-healing engine removed");
        }
        removed
    }

    /// IDs of sessions with an engine.
    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.engines.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.engines.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.engines.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::LocalAgentRunner;
    use crate::healing::types::{HealingState, TestFailure};
    use std::time::Duration;

    fn registry() -> SelfHealingRegistry {
        let runner = Arc::new(LocalAgentRunner::new(|_options, _ctx| async move {
            Err::<String, _>("no luck".to_string())
        }));
        SelfHealingRegistry::new(
            runner,
            SelfHealingConfig::default().with_poll_interval(Duration::from_millis(2)),
        )
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_engine() {
        let registry = registry();
        let a = registry.get_or_create("s1").await;
        let b = registry.get_or_create("s1").await;

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len().await, 1);
        assert!(registry.get("s2").await.is_none());
    }

    #[tokio::test]
    async fn test_configure_replaces_engine() {
        let registry = registry();
        let engine = registry.get_or_create("s1").await;
        engine
            .process_failure(&TestFailure::new("suite", "scn", "boom"))
            .await;
        assert_eq!(engine.history().await.len(), 1);

        let replaced = registry
            .configure("s1", SelfHealingConfig::default().with_max_attempts(5))
            .await;

        assert!(!Arc::ptr_eq(&engine, &replaced));
        assert_eq!(replaced.config().max_attempts, 5);
        assert!(replaced.history().await.is_empty());
        assert_eq!(replaced.state().await, HealingState::Idle);
        let current = registry.get("s1").await.unwrap();
        assert!(Arc::ptr_eq(&current, &replaced));
    }

    #[tokio::test]
    async fn test_remove_and_session_ids() {
        let registry = registry();
        registry.get_or_create("b").await;
        registry.get_or_create("a").await;

        assert_eq!(registry.session_ids().await, vec!["a", "b"]);
        assert!(registry.remove("a").await);
        assert!(!registry.remove("a").await);
        assert_eq!(registry.session_ids().await, vec!["b"]);
        assert!(!registry.is_empty().await);
    }
}
