use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_backend(config)?;
    validate_dialect_rules(config)?;
    validate_context_budget(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_backend(config: &AppConfig) -> Result<(), ConfigError> {
    let backend = &config.backend;
    if backend.base_url.trim().is_empty() {
        return Err(validation_err("backend.base_url cannot be empty"));
    }
    if !backend.base_url.starts_with("http://") && !backend.base_url.starts_with("https://") {
        return Err(validation_err(
            "backend.base_url must start with http:// or https://",
        ));
    }
    if backend.max_tokens == 0 {
        return Err(validation_err("backend.max_tokens must be greater than 0"));
    }
    if !(0.0..=2.0).contains(&backend.temperature) {
        return Err(validation_err(
            "backend.temperature must be between 0 and 2",
        ));
    }
    if !(backend.top_p > 0.0 && backend.top_p <= 1.0) {
        return Err(validation_err("backend.top_p must be in (0, 1]"));
    }
    Ok(())
}

fn validate_dialect_rules(config: &AppConfig) -> Result<(), ConfigError> {
    for (i, rule) in config.dialects.rules.iter().enumerate() {
        if rule.contains.trim().is_empty() {
            return Err(validation_err(format!(
                "dialects.rules[{i}].contains cannot be empty"
            )));
        }
    }
    Ok(())
}

fn validate_context_budget(config: &AppConfig) -> Result<(), ConfigError> {
    let budget = &config.context_budget;
    if budget.context_limit == 0 {
        return Err(validation_err(
            "context_budget.context_limit must be greater than 0",
        ));
    }
    if !(1..=100).contains(&budget.warning_threshold) {
        return Err(validation_err(
            "context_budget.warning_threshold must be between 1 and 100",
        ));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
