//! Fitted classifier port.
//!
//! The engine never fits or inspects a model; it only asks for class
//! probabilities over the ordered classes Down, Neutral, Up.

use crate::domain::error::{ForecastError, ModelError};
use crate::domain::walk_forward::Fold;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub trait Classifier: Send + Sync {
    fn version(&self) -> &str;

    /// Feature names in the order `predict_proba` expects them.
    fn feature_names(&self) -> &[String];

    /// Timestamp of the last bar whose information went into fitting.
    fn trained_through(&self) -> DateTime<Utc>;

    fn predict_proba(&self, features: &[f64]) -> Result<[f64; 3], ModelError>;
}

/// Supplies the model snapshot used inside a fold.
pub trait ModelProvider: Sync {
    /// Fails with `LookAhead` when only snapshots fitted past the fold's
    /// boundary exist.
    fn model_for(&self, symbol: &str, fold: &Fold) -> Result<Arc<dyn Classifier>, ForecastError>;
}
