//! Application configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cadence_api::ApiConfig;
use cadence_engine::{Capabilities, CommandGenerator, WebhookExecutor};
use cadence_registry::ExecutionSettings;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Executor name every strategy uses unless it names another.
pub const DEFAULT_EXECUTOR: &str = "webhook";

/// External command generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Program and arguments.
    pub command: Vec<String>,
}

/// Webhook executor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Fallback URL for signals that carry no `webhook_url`.
    #[serde(default)]
    pub url: Option<String>,
}

/// Process configuration.
///
/// Usually lives in the same file as the scheduling document; keys the
/// document does not use are ignored by both parsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Scheduling document. Defaults to the configuration file itself.
    #[serde(default)]
    pub schedule_path: Option<PathBuf>,
    /// Seconds between checks of the scheduling document. 0 disables reload.
    #[serde(default = "default_reload_interval_secs")]
    pub reload_interval_secs: u64,
    /// Signal journal directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub generators: BTreeMap<String, GeneratorConfig>,
    #[serde(default)]
    pub executors: BTreeMap<String, ExecutorConfig>,
    /// HTTP control API, automated mode only.
    #[serde(default)]
    pub api: ApiConfig,
}

fn default_reload_interval_secs() -> u64 {
    30
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/signals")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schedule_path: None,
            reload_interval_secs: default_reload_interval_secs(),
            data_dir: default_data_dir(),
            generators: BTreeMap::new(),
            executors: BTreeMap::new(),
            api: ApiConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Scheduling document path. Relative paths resolve against the
    /// directory of `config_path`.
    #[must_use]
    pub fn schedule_path(&self, config_path: &Path) -> PathBuf {
        match &self.schedule_path {
            Some(path) if path.is_relative() => config_path
                .parent()
                .map_or_else(|| path.clone(), |dir| dir.join(path)),
            Some(path) => path.clone(),
            None => config_path.to_path_buf(),
        }
    }

    /// Build the capability table.
    ///
    /// A `webhook` executor without a fallback URL is registered unless one
    /// is configured.
    pub fn build_capabilities(&self, settings: &ExecutionSettings) -> AppResult<Capabilities> {
        let mut capabilities = Capabilities::new();

        for (name, generator) in &self.generators {
            let command = CommandGenerator::new(generator.command.clone())
                .map_err(|e| AppError::Capability(format!("generator '{name}': {e}")))?;
            capabilities = capabilities.with_generator(name.clone(), Arc::new(command));
        }

        let mut executors = self.executors.clone();
        executors
            .entry(DEFAULT_EXECUTOR.to_string())
            .or_default();
        for (name, executor) in executors {
            let webhook = WebhookExecutor::new(executor.url, settings.webhook_timeout())
                .map_err(|e| AppError::Capability(format!("executor '{name}': {e}")))?;
            capabilities = capabilities.with_executor(name, Arc::new(webhook));
        }

        Ok(capabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_registry::CapabilityCatalog;

    const CONFIG: &str = r#"
reload_interval_secs = 10
data_dir = "/var/lib/cadence"

[generators.rotation_etf]
command = ["python3", "-m", "strategies.rotation_etf"]

[executors.broker]
url = "http://localhost:8080/signals"

[api]
enabled = true
port = 9090

[trading_calendar]
weekend_days = [5, 6]
"#;

    #[test]
    fn test_parse_config() {
        let config: AppConfig = toml::from_str(CONFIG).unwrap();
        assert_eq!(config.reload_interval_secs, 10);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/cadence"));
        assert_eq!(config.generators["rotation_etf"].command[0], "python3");
        assert_eq!(
            config.executors["broker"].url.as_deref(),
            Some("http://localhost:8080/signals")
        );
        assert!(config.api.enabled);
        assert_eq!(config.api.port, 9090);
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.reload_interval_secs, 30);
    }

    #[test]
    fn test_schedule_path_resolution() {
        let config_path = Path::new("/etc/cadence/bot.toml");
        let mut config = AppConfig::default();
        assert_eq!(config.schedule_path(config_path), config_path);

        config.schedule_path = Some(PathBuf::from("scheduler_config.json"));
        assert_eq!(
            config.schedule_path(config_path),
            PathBuf::from("/etc/cadence/scheduler_config.json")
        );

        config.schedule_path = Some(PathBuf::from("/srv/schedule.toml"));
        assert_eq!(
            config.schedule_path(config_path),
            PathBuf::from("/srv/schedule.toml")
        );
    }

    #[test]
    fn test_build_capabilities_registers_default_webhook() {
        let config: AppConfig = toml::from_str(CONFIG).unwrap();
        let caps = config
            .build_capabilities(&ExecutionSettings::default())
            .unwrap();

        assert!(caps.has_generator("rotation_etf"));
        assert!(caps.has_executor("broker"));
        assert!(caps.has_executor(DEFAULT_EXECUTOR));
    }

    #[test]
    fn test_empty_generator_command_rejected() {
        let mut config = AppConfig::default();
        config.generators.insert(
            "broken".to_string(),
            GeneratorConfig {
                command: Vec::new(),
            },
        );
        assert!(matches!(
            config.build_capabilities(&ExecutionSettings::default()),
            Err(AppError::Capability(_))
        ));
    }
}
