//! Configuration Loader
//!
//! Builds a [`TaskEventsConfig`] from an optional TOML file and environment
//! variables. Environment always wins over the file.

use std::env;
use std::path::PathBuf;

use config::{Config, Environment, File, FileFormat};
use tracing::debug;

use super::error::ConfigResult;
use super::TaskEventsConfig;

const DEFAULT_CONFIG_PATH: &str = "config/task-events.toml";
const CONFIG_PATH_VAR: &str = "TASK_EVENTS_CONFIG";
const ENV_PREFIX: &str = "TASK_EVENTS";

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    file_required: bool,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader for the default locations: `$TASK_EVENTS_CONFIG` (must exist) or
    /// `config/task-events.toml` (optional), plus `TASK_EVENTS__*` variables
    pub fn new() -> Self {
        match env::var(CONFIG_PATH_VAR) {
            Ok(path) if !path.is_empty() => Self {
                file: Some(PathBuf::from(path)),
                file_required: true,
                env_prefix: ENV_PREFIX.to_string(),
            },
            _ => Self {
                file: Some(PathBuf::from(DEFAULT_CONFIG_PATH)),
                file_required: false,
                env_prefix: ENV_PREFIX.to_string(),
            },
        }
    }

    /// Use an explicit file, which must exist
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self.file_required = true;
        self
    }

    pub fn without_file(mut self) -> Self {
        self.file = None;
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn load(&self) -> ConfigResult<TaskEventsConfig> {
        let mut builder = Config::builder();

        if let Some(path) = &self.file {
            debug!(
                path = %path.display(),
                required = self.file_required,
                "Adding configuration file source"
            );
            builder = builder.add_source(
                File::from(path.clone())
                    .format(FileFormat::Toml)
                    .required(self.file_required),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator("__")
                .separator("__"),
        );

        let config: TaskEventsConfig = builder.build()?.try_deserialize()?;

        debug!(
            config = %sanitize_for_logging(&config),
            "Configuration loaded"
        );

        Ok(config)
    }
}

/// JSON view of the configuration with secrets masked
pub fn sanitize_for_logging(config: &TaskEventsConfig) -> serde_json::Value {
    let mut value = serde_json::json!(config);
    sanitize_json_recursive(&mut value, &["password", "secret", "token"]);
    value
}

fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let key_lower = key.to_lowercase();
                let is_sensitive = sensitive_patterns
                    .iter()
                    .any(|pattern| key_lower.contains(pattern));

                if is_sensitive && !val.is_null() {
                    *val = serde_json::Value::String("[MASKED]".to_string());
                } else {
                    sanitize_json_recursive(val, sensitive_patterns);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                sanitize_json_recursive(item, sensitive_patterns);
            }
        }
        _ => {}
    }
}
