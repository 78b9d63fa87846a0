//! Domain error types.

use chrono::{DateTime, Utc};

/// First integrity problem found while validating a symbol's bar sequence.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IntegrityViolation {
    #[error("bar {index}: timestamp {current} is earlier than previous {previous}")]
    OutOfOrder {
        index: usize,
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    #[error("bar {index}: duplicate timestamp {timestamp}")]
    Duplicate {
        index: usize,
        timestamp: DateTime<Utc>,
    },

    #[error("bar {index}: gap of {gap_days} days exceeds tolerance of {tolerance_days} days")]
    GapExceeded {
        index: usize,
        gap_days: i64,
        tolerance_days: i64,
    },

    #[error("bar {index}: non-finite {field}")]
    NonFinite { index: usize, field: &'static str },

    #[error("bar {index}: non-positive {field} ({value})")]
    NonPositivePrice {
        index: usize,
        field: &'static str,
        value: f64,
    },
}

/// Failure reported by a fitted classifier.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("transient model failure: {0}")]
    Transient(String),

    #[error("invalid model output: {0}")]
    InvalidOutput(String),

    #[error("model unavailable: {0}")]
    Unavailable(String),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::Transient(_))
    }
}

/// Top-level error type for trendcast.
#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    #[error("data integrity error for {symbol}: {violation}")]
    DataIntegrity {
        symbol: String,
        violation: IntegrityViolation,
    },

    #[error("missing feature {feature}")]
    MissingFeature { feature: String },

    #[error("cannot build a fold for {symbol}: {labelable} labelable bars, need {required}")]
    FoldConstruction {
        symbol: String,
        labelable: usize,
        required: usize,
    },

    #[error("task {symbol}/fold {fold} timed out after {elapsed_ms} ms (limit {limit_ms} ms)")]
    TaskTimeout {
        symbol: String,
        fold: usize,
        elapsed_ms: u128,
        limit_ms: u128,
    },

    #[error("model failed for {symbol}/fold {fold} after {attempts} attempts: {reason}")]
    ModelFailure {
        symbol: String,
        fold: usize,
        attempts: u32,
        reason: ModelError,
    },

    #[error("look-ahead rejected for {symbol}/fold {fold}: {reason}")]
    LookAhead {
        symbol: String,
        fold: usize,
        reason: String,
    },

    #[error("group {group} references unknown symbol {symbol}")]
    UnknownGroupSymbol { group: String, symbol: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data source error: {reason}")]
    Data { reason: String },

    #[error("no symbol produced a valid fold")]
    NoUsableSymbols,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ForecastError {
    pub fn config_invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        ForecastError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<&ForecastError> for std::process::ExitCode {
    fn from(err: &ForecastError) -> Self {
        let code: u8 = match err {
            ForecastError::Io(_) => 1,
            ForecastError::ConfigParse { .. }
            | ForecastError::ConfigMissing { .. }
            | ForecastError::ConfigInvalid { .. }
            | ForecastError::UnknownGroupSymbol { .. } => 2,
            ForecastError::Data { .. } => 3,
            ForecastError::ModelFailure { .. }
            | ForecastError::LookAhead { .. }
            | ForecastError::TaskTimeout { .. } => 4,
            ForecastError::DataIntegrity { .. }
            | ForecastError::MissingFeature { .. }
            | ForecastError::FoldConstruction { .. }
            | ForecastError::NoUsableSymbols => 5,
        };
        std::process::ExitCode::from(code)
    }
}
