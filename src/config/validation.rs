use regex_lite::Regex;

use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_log_level(config)?;
    validate_log_format(config)?;
    validate_batch(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

fn validate_log_format(config: &AppConfig) -> Result<(), ConfigError> {
    match config.log_format.to_lowercase().as_str() {
        "text" | "json" => Ok(()),
        _ => Err(validation_err("log_format must be 'text' or 'json'")),
    }
}

fn validate_batch(config: &AppConfig) -> Result<(), ConfigError> {
    let batch = &config.batch;
    let pattern = Regex::new(&batch.input_pattern).map_err(|e| {
        validation_err(format!("batch.input_pattern is not a valid regex: {e}"))
    })?;
    if batch.output_suffix.is_empty() {
        return Err(validation_err("batch.output_suffix must not be empty"));
    }
    // Outputs landing next to inputs must not be picked up by the next run.
    let sample_output = format!("response{}", batch.output_suffix);
    if pattern.is_match(&sample_output) {
        return Err(validation_err(format!(
            "batch.output_suffix produces names matching batch.input_pattern (e.g. '{sample_output}')"
        )));
    }
    if batch.concurrency == 0 {
        return Err(validation_err("batch.concurrency must be greater than 0"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;

    fn make_valid_config() -> AppConfig {
        AppConfig::default()
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&make_valid_config()).is_ok());
    }

    #[test]
    fn test_log_level_case_insensitive() {
        let mut config = make_valid_config();
        config.log_level = "warning".to_string();
        assert!(validate_config(&config).is_ok());
        config.log_level = "disabled".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = make_valid_config();
        config.log_level = "VERBOSE".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn test_invalid_log_format() {
        let mut config = make_valid_config();
        config.log_format = "xml".to_string();
        assert!(validate_config(&config).is_err());
        config.log_format = "JSON".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_input_pattern() {
        let mut config = make_valid_config();
        config.batch.input_pattern = "(unclosed".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("input_pattern"));
    }

    #[test]
    fn test_empty_output_suffix() {
        let mut config = make_valid_config();
        config.batch.output_suffix = String::new();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_output_suffix_matching_input_pattern() {
        let mut config = make_valid_config();
        config.batch.output_suffix = "-parsed.ndjson".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("output_suffix"));
    }

    #[test]
    fn test_zero_concurrency() {
        let mut config = make_valid_config();
        config.batch.concurrency = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }
}
