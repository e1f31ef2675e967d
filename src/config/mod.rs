pub mod validation;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;
use crate::protocol::Dialect;

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

/// Settings for converting a directory of captured streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Regex matched against file names (not paths).
    #[serde(default = "default_input_pattern")]
    pub input_pattern: String,
    /// Appended to the input file stem to name the output file.
    #[serde(default = "default_output_suffix")]
    pub output_suffix: String,
    #[serde(default)]
    pub include_meta: bool,
    #[serde(default = "default_dialect")]
    pub dialect: Dialect,
    /// Files converted at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_input_pattern() -> String {
    r"^response.*\.ndjson$".to_string()
}
fn default_output_suffix() -> String {
    "-parsed.jsonc".to_string()
}
fn default_dialect() -> Dialect {
    Dialect::OpenAiResponses
}
fn default_concurrency() -> usize {
    4
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            input_pattern: default_input_pattern(),
            output_suffix: default_output_suffix(),
            include_meta: false,
            dialect: default_dialect(),
            concurrency: default_concurrency(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `text` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default)]
    pub batch: BatchConfig,
}

fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            batch: BatchConfig::default(),
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
    let config: AppConfig = serde_yaml::from_str(&contents)?;
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
        assert_eq!(config.log_level, "INFO");
        assert_eq!(config.batch.dialect, Dialect::OpenAiResponses);
        assert_eq!(config.batch.output_suffix, "-parsed.jsonc");
        assert!(!config.batch.include_meta);
        assert_eq!(config.batch.concurrency, 4);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.log_level, "INFO");
        assert_eq!(config.log_format, "text");
        assert_eq!(config.batch.input_pattern, r"^response.*\.ndjson$");
        assert_eq!(config.batch.dialect, Dialect::OpenAiResponses);
        validate_config(&config).unwrap();
    }

    #[test]
    fn test_dialect_aliases_in_yaml() {
        let config: AppConfig = serde_yaml::from_str("batch:\n  dialect: claude\n").unwrap();
        assert_eq!(config.batch.dialect, Dialect::Anthropic);
        let config: AppConfig = serde_yaml::from_str("batch:\n  dialect: openai-chat\n").unwrap();
        assert_eq!(config.batch.dialect, Dialect::OpenAiChat);
        assert!(serde_yaml::from_str::<AppConfig>("batch:\n  dialect: cohere\n").is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_config("does-not-exist.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
