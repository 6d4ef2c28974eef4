//! TOML configuration for the orchestrator.
//!
//! Configuration is read from a global file and a project file. The files
//! are merged key by key: a value set in the project file overrides the same
//! key of the global one, and keys it leaves out keep their global value.
//!
//! ```text
//! ~/.cortex/orchestrator/orchestrator.toml       # global
//! <project>/.cortex/orchestrator/orchestrator.toml  # project
//! ```
//!
//! # Example
//!
//! ```toml
//! [executor]
//! max_parallel = 4
//! stop_on_error = true
//! agent_timeout_secs = 900
//!
//! [healing]
//! max_attempts = 2
//! escalate_after_max_attempts = false
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::executor::ExecutorConfig;
use crate::healing::SelfHealingConfig;

/// Name of the configuration file.
pub const CONFIG_FILE_NAME: &str = "orchestrator.toml";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML content.
    #[error("Failed to parse TOML in '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Configuration validation failed.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Complete orchestrator configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Parallel executor settings.
    pub executor: ExecutorConfig,
    /// Self-healing settings.
    pub healing: SelfHealingConfig,
}

impl OrchestratorConfig {
    /// Parse from a TOML string and validate.
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<string>"),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Check value ranges.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.executor.max_parallel == 0 {
            return Err(ConfigError::ValidationError(
                "executor.max_parallel must be at least 1".to_string(),
            ));
        }
        if self.executor.agent_timeout_secs == Some(0) {
            return Err(ConfigError::ValidationError(
                "executor.agent_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.healing.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "healing.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.healing.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "healing.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.healing.phase_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "healing.phase_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Overlay `overlay` onto `base`, descending into nested tables.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(incoming) => {
                if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                    merge_tables(existing, incoming);
                    continue;
                }
                base.insert(key, toml::Value::Table(incoming));
            }
            value => {
                base.insert(key, value);
            }
        }
    }
}

/// Configuration loader that searches the global and project locations.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    project_config_dir: Option<PathBuf>,
    global_config_dir: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a loader with the default global directory.
    pub fn new() -> Self {
        let global_config_dir = dirs::home_dir().map(|h| h.join(".cortex").join("orchestrator"));

        Self {
            project_config_dir: None,
            global_config_dir,
        }
    }

    /// Look for `.cortex/orchestrator/` under `root`.
    pub fn with_project_root(mut self, root: impl AsRef<Path>) -> Self {
        self.project_config_dir = Some(root.as_ref().join(".cortex").join("orchestrator"));
        self
    }

    /// Set a custom project config directory.
    pub fn with_project_config_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.project_config_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set a custom global config directory.
    pub fn with_global_config_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.global_config_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Skip the global configuration.
    pub fn without_global(mut self) -> Self {
        self.global_config_dir = None;
        self
    }

    /// Load, merge and validate configuration.
    ///
    /// Missing files are not an error; defaults fill the gaps.
    pub async fn load(&self) -> ConfigResult<OrchestratorConfig> {
        let mut merged = toml::Table::new();

        for dir in [&self.global_config_dir, &self.project_config_dir]
            .into_iter()
            .flatten()
        {
            if let Some(table) = self.load_from_dir(dir).await? {
                tracing::debug!(dir = %dir.display(), "Loaded orchestrator config");
                merge_tables(&mut merged, table);
            }
        }

        let config: OrchestratorConfig =
            toml::Value::Table(merged)
                .try_into()
                .map_err(|e| ConfigError::ParseError {
                    path: PathBuf::from("<merged>"),
                    source: e,
                })?;
        config.validate()?;
        Ok(config)
    }

    async fn load_from_dir(&self, dir: &Path) -> ConfigResult<Option<toml::Table>> {
        let config_file = dir.join(CONFIG_FILE_NAME);

        if !config_file.exists() {
            return Ok(None);
        }

        let content =
            tokio::fs::read_to_string(&config_file)
                .await
                .map_err(|e| ConfigError::ReadError {
                    path: config_file.clone(),
                    source: e,
                })?;

        let table: toml::Table = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: config_file.clone(),
            source: e,
        })?;

        // Reject wrongly typed values here, while the path is still known.
        toml::Value::Table(table.clone())
            .try_into::<OrchestratorConfig>()
            .map_err(|e| ConfigError::ParseError {
                path: config_file,
                source: e,
            })?;

        Ok(Some(table))
    }

    /// Whether any configuration file exists.
    pub fn config_exists(&self) -> bool {
        [&self.global_config_dir, &self.project_config_dir]
            .into_iter()
            .flatten()
            .any(|d| d.join(CONFIG_FILE_NAME).exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    async fn write_config(dir: &Path, content: &str) {
        tokio::fs::create_dir_all(dir).await.unwrap();
        tokio::fs::write(dir.join(CONFIG_FILE_NAME), content)
            .await
            .unwrap();
    }

    #[test]
    fn test_from_toml() {
        let config = OrchestratorConfig::from_toml(
            r#"
[executor]
max_parallel = 5
stop_on_error = true

[healing]
max_attempts = 2
"#,
        )
        .unwrap();

        assert_eq!(config.executor.max_parallel, 5);
        assert!(config.executor.stop_on_error);
        assert_eq!(config.healing.max_attempts, 2);
        assert!(config.healing.enabled);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = OrchestratorConfig::from_toml("").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
    }

    #[test]
    fn test_validation() {
        let err = OrchestratorConfig::from_toml("[executor]\nmax_parallel = 0").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let err = OrchestratorConfig::from_toml("[healing]\npoll_interval_ms = 0").unwrap_err();
        assert!(err.to_string().contains("poll_interval_ms"));

        let err = OrchestratorConfig::from_toml("[healing]\nmax_attempts = 0").unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn test_parse_error() {
        let err = OrchestratorConfig::from_toml("[executor\nmax_parallel = 2").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_round_trip() {
        let config = OrchestratorConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(OrchestratorConfig::from_toml(&text).unwrap(), config);
    }

    #[tokio::test]
    async fn test_load_missing_files_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let loader = ConfigLoader::new()
            .with_global_config_dir(temp.path().join("global"))
            .with_project_root(temp.path());

        assert!(!loader.config_exists());
        let config = loader.load().await.unwrap();
        assert_eq!(config, OrchestratorConfig::default());
    }

    #[tokio::test]
    async fn test_project_sections_override_global() {
        let temp = TempDir::new().unwrap();
        let global = temp.path().join("global");
        write_config(
            &global,
            "[executor]\nmax_parallel = 8\n\n[healing]\nmax_attempts = 5\n",
        )
        .await;
        write_config(
            &temp.path().join(".cortex").join("orchestrator"),
            "[executor]\nmax_parallel = 2\n",
        )
        .await;

        let loader = ConfigLoader::new()
            .with_global_config_dir(&global)
            .with_project_root(temp.path());
        let config = loader.load().await.unwrap();

        assert!(loader.config_exists());
        assert_eq!(config.executor.max_parallel, 2);
        assert_eq!(config.healing.max_attempts, 5);
    }

    #[tokio::test]
    async fn test_project_keys_keep_unset_global_values() {
        let temp = TempDir::new().unwrap();
        let global = temp.path().join("global");
        write_config(
            &global,
            "[executor]\nmax_parallel = 8\nstop_on_error = true\n",
        )
        .await;
        write_config(
            &temp.path().join(".cortex").join("orchestrator"),
            "[executor]\nmax_parallel = 2\n",
        )
        .await;

        let config = ConfigLoader::new()
            .with_global_config_dir(&global)
            .with_project_root(temp.path())
            .load()
            .await
            .unwrap();

        assert_eq!(config.executor.max_parallel, 2);
        assert!(config.executor.stop_on_error);
    }

    #[tokio::test]
    async fn test_load_reports_path_on_type_error() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), "[executor]\nmax_parallel = \"many\"\n").await;

        let err = ConfigLoader::new()
            .without_global()
            .with_project_config_dir(temp.path())
            .load()
            .await
            .unwrap_err();

        assert!(
            matches!(err, ConfigError::ParseError { ref path, .. } if path == &temp.path().join(CONFIG_FILE_NAME))
        );
    }

    #[tokio::test]
    async fn test_load_reports_path_on_parse_error() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), "max_parallel = [").await;

        let loader = ConfigLoader::new()
            .without_global()
            .with_project_config_dir(temp.path());
        let err = loader.load().await.unwrap_err();

        match err {
            ConfigError::ParseError { path, .. } => {
                assert_eq!(path, temp.path().join(CONFIG_FILE_NAME));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_load_validates() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), "[healing]\nphase_timeout_secs = 0\n").await;

        let loader = ConfigLoader::new()
            .without_global()
            .with_project_config_dir(temp.path());

        assert!(matches!(
            loader.load().await,
            Err(ConfigError::ValidationError(_))
        ));
    }
}
