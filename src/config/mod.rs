pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;

use self::validation::validate_config;
use crate::protocol::canonical::GenerationParams;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Dialect named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DialectSelection {
    #[default]
    Tag,
    Bracket,
    Channel,
    /// Text-dialect detection off.
    None,
}

impl fmt::Display for DialectSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialectSelection::Tag => write!(f, "tag"),
            DialectSelection::Bracket => write!(f, "bracket"),
            DialectSelection::Channel => write!(f, "channel"),
            DialectSelection::None => write!(f, "none"),
        }
    }
}

/// llama-server compatible backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_max_tokens() -> u64 {
    4096
}
fn default_temperature() -> f64 {
    0.7
}
fn default_top_p() -> f64 {
    0.9
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
        }
    }
}

/// Substring rule mapping model names to a dialect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialectRuleConfig {
    pub contains: String,
    pub dialect: DialectSelection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialectConfig {
    /// Used when neither a rule nor a built-in family matches.
    #[serde(default)]
    pub default: DialectSelection,
    #[serde(default)]
    pub rules: Vec<DialectRuleConfig>,
}

/// Context budget advisory settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBudgetConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_context_limit")]
    pub context_limit: u64,
    /// Percent of the available window at which the advisory is shown.
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: u64,
}

fn default_context_limit() -> u64 {
    32768
}
fn default_warning_threshold() -> u64 {
    75
}

impl Default for ContextBudgetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            context_limit: default_context_limit(),
            warning_threshold: default_warning_threshold(),
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub dialects: DialectConfig,
    #[serde(default)]
    pub context_budget: ContextBudgetConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl AppConfig {
    /// Sampling values sent when a request leaves them unset.
    #[must_use]
    pub fn generation_defaults(&self) -> GenerationParams {
        GenerationParams {
            max_tokens: Some(self.backend.max_tokens),
            temperature: Some(self.backend.temperature),
            top_p: Some(self.backend.top_p),
        }
    }
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_example_config() {
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.backend.base_url, "http://127.0.0.1:8080");
        assert_eq!(config.dialects.default, DialectSelection::Tag);
        assert_eq!(config.dialects.rules.len(), 2);
        assert_eq!(config.context_budget.context_limit, 32768);
        assert_eq!(config.features.log_level, "INFO");
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config.backend.max_tokens, 4096);
        assert!(config.context_budget.enabled);
        assert_eq!(config.context_budget.warning_threshold, 75);
        assert!(config.dialects.rules.is_empty());
    }

    #[test]
    fn test_dialect_selection_serde() {
        let json = serde_json::to_string(&DialectSelection::Channel).unwrap();
        assert_eq!(json, "\"channel\"");
        let selection: DialectSelection = serde_yaml::from_str("none").unwrap();
        assert_eq!(selection, DialectSelection::None);
        assert_eq!(DialectSelection::Bracket.to_string(), "bracket");
    }

    #[test]
    fn test_generation_defaults() {
        let config = AppConfig::default();
        let defaults = config.generation_defaults();
        assert_eq!(defaults.max_tokens, Some(4096));
        assert_eq!(defaults.temperature, Some(0.7));
        assert_eq!(defaults.top_p, Some(0.9));
    }

    #[test]
    fn test_invalid_yaml_is_reported() {
        let err = parse_config("backend: [").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }
}
