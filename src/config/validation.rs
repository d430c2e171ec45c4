use crate::config::types::{
    AreaEntry, BreakerConfig, Config, DelayRange, FetchConfig, OutputConfig, PacingConfig,
    RiskConfig, SlotEntry, TargetConfig,
};
use crate::ConfigError;
use chrono::NaiveTime;
use std::collections::HashSet;
use url::Url;

/// Delay multipliers outside this range would stall or break the pacing
const MULTIPLIER_RANGE: std::ops::RangeInclusive<f64> = 1.0..=10.0;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_target_config(&config.target)?;
    validate_breaker_config(&config.breaker)?;
    validate_risk_config(&config.risk)?;
    validate_pacing_config(&config.pacing)?;
    validate_fetch_config(&config.fetch)?;
    validate_output_config(&config.output)?;
    validate_slots(&config.slots)?;
    validate_areas(&config.areas)?;
    validate_paths(config)?;
    Ok(())
}

fn validate_target_config(config: &TargetConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(
            "base-url must include a host".to_string(),
        ));
    }

    Ok(())
}

fn validate_breaker_config(config: &BreakerConfig) -> Result<(), ConfigError> {
    if config.failure_threshold < 1 {
        return Err(ConfigError::Validation(
            "failure-threshold must be >= 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_risk_config(config: &RiskConfig) -> Result<(), ConfigError> {
    if config.window_size < 3 {
        return Err(ConfigError::Validation(format!(
            "window-size must be >= 3, got {}",
            config.window_size
        )));
    }

    if config.min_samples > config.window_size {
        return Err(ConfigError::Validation(format!(
            "min-samples ({}) cannot exceed window-size ({})",
            config.min_samples, config.window_size
        )));
    }

    for (name, rate) in [
        ("high-error-rate", config.high_error_rate),
        ("medium-error-rate", config.medium_error_rate),
    ] {
        if !(rate > 0.0 && rate <= 1.0) {
            return Err(ConfigError::Validation(format!(
                "{} must be within (0, 1], got {}",
                name, rate
            )));
        }
    }

    if config.medium_error_rate > config.high_error_rate {
        return Err(ConfigError::Validation(format!(
            "medium-error-rate ({}) cannot exceed high-error-rate ({})",
            config.medium_error_rate, config.high_error_rate
        )));
    }

    if !(config.trend_ratio > 1.0 && config.trend_ratio.is_finite()) {
        return Err(ConfigError::Validation(format!(
            "trend-ratio must be > 1.0, got {}",
            config.trend_ratio
        )));
    }

    for (name, multiplier) in [
        ("medium-delay-multiplier", config.medium_delay_multiplier),
        ("high-delay-multiplier", config.high_delay_multiplier),
    ] {
        if !MULTIPLIER_RANGE.contains(&multiplier) {
            return Err(ConfigError::Validation(format!(
                "{} must be within [{}, {}], got {}",
                name,
                MULTIPLIER_RANGE.start(),
                MULTIPLIER_RANGE.end(),
                multiplier
            )));
        }
    }

    Ok(())
}

fn validate_pacing_config(config: &PacingConfig) -> Result<(), ConfigError> {
    validate_delay_range("between-items", &config.between_items)?;
    validate_delay_range("between-areas", &config.between_areas)?;
    validate_delay_range("after-navigation", &config.after_navigation)?;
    Ok(())
}

fn validate_delay_range(name: &str, range: &DelayRange) -> Result<(), ConfigError> {
    if range.min_ms > range.max_ms {
        return Err(ConfigError::Validation(format!(
            "{}: min-ms ({}) cannot exceed max-ms ({})",
            name, range.min_ms, range.max_ms
        )));
    }
    Ok(())
}

fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.request_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "request-timeout-ms must be > 0".to_string(),
        ));
    }

    if config.max_retries > 5 {
        return Err(ConfigError::Validation(format!(
            "max-retries must be <= 5, got {}",
            config.max_retries
        )));
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.records_dir.is_empty() {
        return Err(ConfigError::Validation(
            "records-dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_slots(slots: &[SlotEntry]) -> Result<(), ConfigError> {
    if slots.is_empty() {
        return Err(ConfigError::Validation(
            "At least one [[slot]] is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for slot in slots {
        validate_name("slot name", &slot.name)?;

        if !seen.insert(slot.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate slot name '{}'",
                slot.name
            )));
        }

        NaiveTime::parse_from_str(&slot.time, "%H:%M").map_err(|_| {
            ConfigError::Validation(format!(
                "Slot '{}' has invalid time '{}', expected HH:MM",
                slot.name, slot.time
            ))
        })?;
    }

    Ok(())
}

fn validate_areas(areas: &[AreaEntry]) -> Result<(), ConfigError> {
    if areas.is_empty() {
        return Err(ConfigError::Validation(
            "At least one [[area]] is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for area in areas {
        validate_name("area id", &area.id)?;

        if !seen.insert(area.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate area id '{}'",
                area.id
            )));
        }

        if area.pages < 1 {
            return Err(ConfigError::Validation(format!(
                "Area '{}' must have at least one page",
                area.id
            )));
        }
    }

    Ok(())
}

/// Area and entry-point paths must be joinable onto the base URL
fn validate_paths(config: &Config) -> Result<(), ConfigError> {
    let base = Url::parse(&config.target.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    let paths = config
        .areas
        .iter()
        .map(|a| a.path.as_str())
        .chain(config.entry_points.iter().map(|e| e.path.as_str()));

    for path in paths {
        if !path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "Path '{}' must start with '/'",
                path
            )));
        }
        base.join(path)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid path '{}': {}", path, e)))?;
    }

    Ok(())
}

/// Session ids name the record and summary files under `records-dir`
pub fn validate_session_id(session_id: &str) -> Result<(), ConfigError> {
    validate_name("session id", session_id)
}

/// Slot names and area ids become file names and log fields
fn validate_name(what: &str, name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation(format!("{} cannot be empty", what)));
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "{} must contain only alphanumeric characters, '-' and '_', got '{}'",
            what, name
        )));
    }

    Ok(())
}
