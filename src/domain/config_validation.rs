//! Configuration validation.
//!
//! Every key is checked against its raw string before a run is built, so a
//! typo never silently falls back to a default.

use std::str::FromStr;

use crate::domain::error::ForecastError;
use crate::domain::groups::parse_symbols;
use crate::ports::config_port::ConfigPort;

pub fn validate_run_config(config: &dyn ConfigPort) -> Result<(), ForecastError> {
    validate_thresholds(config)?;
    validate_windows(config)?;
    validate_limits(config)?;
    validate_price_field(config)?;
    validate_bool(config, "run", "anchored")?;
    validate_sources(config)?;
    validate_symbol_lists(config)?;
    Ok(())
}

/// Parses `[section] key` if present; a present but malformed value is an error.
pub fn parse_key<T: FromStr>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<T>, ForecastError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            ForecastError::config_invalid(section, key, format!("cannot parse {raw:?}"))
        }),
    }
}

/// Task timeout in seconds; `timeout_per_task_secs` is accepted as an alias.
pub const TIMEOUT_KEYS: [&str; 2] = ["timeout_per_task", "timeout_per_task_secs"];

/// The first timeout key the config sets, with its parsed value.
pub fn timeout_secs(config: &dyn ConfigPort) -> Result<Option<(&'static str, f64)>, ForecastError> {
    for key in TIMEOUT_KEYS {
        if let Some(secs) = parse_key::<f64>(config, "run", key)? {
            return Ok(Some((key, secs)));
        }
    }
    Ok(None)
}

pub fn require_string(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<String, ForecastError> {
    match config.get_string(section, key) {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(ForecastError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }),
    }
}

fn validate_thresholds(config: &dyn ConfigPort) -> Result<(), ForecastError> {
    for key in ["neutral_threshold", "neutral_threshold_down"] {
        if let Some(value) = parse_key::<f64>(config, "run", key)? {
            if !value.is_finite() || value < 0.0 {
                return Err(ForecastError::config_invalid(
                    "run",
                    key,
                    format!("{key} must be a non-negative percentage"),
                ));
            }
        }
    }
    Ok(())
}

fn validate_windows(config: &dyn ConfigPort) -> Result<(), ForecastError> {
    let min_train = parse_key::<i64>(config, "run", "min_train_bars")?.unwrap_or(240);
    if min_train < 2 {
        return Err(ForecastError::config_invalid(
            "run",
            "min_train_bars",
            "min_train_bars must be at least 2",
        ));
    }
    let eval = parse_key::<i64>(config, "run", "eval_window_bars")?.unwrap_or(20);
    if eval < 1 {
        return Err(ForecastError::config_invalid(
            "run",
            "eval_window_bars",
            "eval_window_bars must be positive",
        ));
    }
    if let Some(step) = parse_key::<i64>(config, "run", "step_bars")? {
        if step < eval {
            return Err(ForecastError::config_invalid(
                "run",
                "step_bars",
                "step_bars must be at least eval_window_bars",
            ));
        }
    }
    Ok(())
}

fn validate_limits(config: &dyn ConfigPort) -> Result<(), ForecastError> {
    for key in ["min_group_sample_count", "max_model_retries"] {
        if let Some(value) = parse_key::<i64>(config, "run", key)? {
            if value < 0 {
                return Err(ForecastError::config_invalid(
                    "run",
                    key,
                    format!("{key} must be non-negative"),
                ));
            }
        }
    }
    if let Some((key, secs)) = timeout_secs(config)? {
        if !secs.is_finite() || secs < 0.0 {
            return Err(ForecastError::config_invalid(
                "run",
                key,
                format!("{key} must be non-negative (0 disables it)"),
            ));
        }
    }
    if let Some(days) = parse_key::<i64>(config, "run", "max_gap_days")? {
        if days < 1 {
            return Err(ForecastError::config_invalid(
                "run",
                "max_gap_days",
                "max_gap_days must be at least 1",
            ));
        }
    }
    Ok(())
}

fn validate_price_field(config: &dyn ConfigPort) -> Result<(), ForecastError> {
    match config.get_string("run", "price_field") {
        None => Ok(()),
        Some(s) => match s.trim().to_lowercase().as_str() {
            "auto" | "close" | "adj_close" => Ok(()),
            other => Err(ForecastError::config_invalid(
                "run",
                "price_field",
                format!("unknown price field {other:?} (expected auto, close or adj_close)"),
            )),
        },
    }
}

fn validate_bool(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), ForecastError> {
    match config.get_string(section, key) {
        None => Ok(()),
        Some(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" | "false" | "no" | "0" => Ok(()),
            _ => Err(ForecastError::config_invalid(
                section,
                key,
                format!("expected a boolean, got {s:?}"),
            )),
        },
    }
}

fn validate_sources(config: &dyn ConfigPort) -> Result<(), ForecastError> {
    require_string(config, "data", "path")?;
    require_string(config, "model", "path")?;
    if let Some(exchange) = config.get_string("calendar", "exchange") {
        if exchange.trim().is_empty() {
            return Err(ForecastError::ConfigMissing {
                section: "calendar".to_string(),
                key: "exchange".to_string(),
            });
        }
    }
    Ok(())
}

fn validate_symbol_lists(config: &dyn ConfigPort) -> Result<(), ForecastError> {
    if let Some(list) = config.get_string("data", "symbols") {
        parse_symbols(&list)
            .map_err(|e| ForecastError::config_invalid("data", "symbols", e.to_string()))?;
    }
    for group in config.keys("groups") {
        let list = config.get_string("groups", &group).unwrap_or_default();
        parse_symbols(&list)
            .map_err(|e| ForecastError::config_invalid("groups", &group, e.to_string()))?;
    }
    Ok(())
}
