use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;

use crate::errors::ConfigError;

// Environment variable overrides
const ENV_PREFLIGHT: &str = "REQWIRE_PREFLIGHT";
const ENV_MAX_BODY_BYTES: &str = "REQWIRE_MAX_BODY_BYTES";
const ENV_LOG_LEVEL: &str = "REQWIRE_LOG_LEVEL";
const ENV_LOG_FORMAT: &str = "REQWIRE_LOG_FORMAT";

/// Dispatcher options
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Run the eager startup self-check before accepting traffic
    pub preflight: bool,
    /// Reject request bodies larger than this many serialized bytes
    pub max_body_bytes: Option<usize>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            preflight: true,
            max_body_bytes: None,
        }
    }
}

/// Logging options (parsed further by the logging module)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub dispatcher: DispatcherConfig,
    pub logging: LoggingSettings,
}

impl AppConfig {
    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(display.clone(), e))?;
        let mut config: Self =
            toml::from_str(&raw).map_err(|e| ConfigError::TomlParse(display, e))?;
        config.apply_env_overrides(&collect_env())?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for deployments without a config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides(&collect_env())?;
        Ok(config)
    }

    fn apply_env_overrides(
        &mut self,
        env_map: &HashMap<String, String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = env_map.get(ENV_PREFLIGHT) {
            self.dispatcher.preflight = parse_bool(value)
                .ok_or_else(|| ConfigError::FieldInvalid(ENV_PREFLIGHT.to_string()))?;
        }
        if let Some(value) = env_map.get(ENV_MAX_BODY_BYTES) {
            let bytes: usize = value
                .parse()
                .map_err(|_| ConfigError::FieldInvalid(ENV_MAX_BODY_BYTES.to_string()))?;
            self.dispatcher.max_body_bytes = Some(bytes);
        }
        if let Some(value) = env_map.get(ENV_LOG_LEVEL) {
            self.logging.level = value.clone();
        }
        if let Some(value) = env_map.get(ENV_LOG_FORMAT) {
            self.logging.format = value.clone();
        }
        Ok(())
    }
}

fn collect_env() -> HashMap<String, String> {
    [ENV_PREFLIGHT, ENV_MAX_BODY_BYTES, ENV_LOG_LEVEL, ENV_LOG_FORMAT]
        .iter()
        .filter_map(|key| env::var(key).ok().map(|value| (key.to_string(), value)))
        .collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
