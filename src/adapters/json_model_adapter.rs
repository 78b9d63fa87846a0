//! Fitted model snapshots loaded from JSON.
//!
//! A snapshot is a multinomial logistic model over the three ordered classes.
//! The provider hands each fold the newest snapshot whose training data ends
//! at or before the fold's fit boundary.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

use crate::domain::error::{ForecastError, ModelError};
use crate::domain::walk_forward::Fold;
use crate::ports::model_port::{Classifier, ModelProvider};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LinearSoftmaxModel {
    pub version: String,
    pub trained_through: DateTime<Utc>,
    pub features: Vec<String>,
    pub intercepts: [f64; 3],
    pub coefficients: [Vec<f64>; 3],
    /// Symbols this snapshot was fitted for; empty means any.
    #[serde(default)]
    pub symbols: Vec<String>,
}

impl LinearSoftmaxModel {
    fn check_shape(&self) -> Result<(), String> {
        let n = self.features.len();
        if let Some(row) = self.coefficients.iter().find(|row| row.len() != n) {
            return Err(format!(
                "snapshot {}: coefficient row has {} entries for {} features",
                self.version,
                row.len(),
                n
            ));
        }
        let all_finite = self
            .intercepts
            .iter()
            .chain(self.coefficients.iter().flatten())
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(format!("snapshot {}: non-finite parameter", self.version));
        }
        Ok(())
    }

    fn applies_to(&self, symbol: &str) -> bool {
        self.symbols.is_empty() || self.symbols.iter().any(|s| s == symbol)
    }
}

impl Classifier for LinearSoftmaxModel {
    fn version(&self) -> &str {
        &self.version
    }

    fn feature_names(&self) -> &[String] {
        &self.features
    }

    fn trained_through(&self) -> DateTime<Utc> {
        self.trained_through
    }

    fn predict_proba(&self, features: &[f64]) -> Result<[f64; 3], ModelError> {
        if features.len() != self.features.len() {
            return Err(ModelError::InvalidOutput(format!(
                "expected {} features, got {}",
                self.features.len(),
                features.len()
            )));
        }
        let mut logits = [0.0; 3];
        for (k, logit) in logits.iter_mut().enumerate() {
            *logit = self.intercepts[k]
                + self.coefficients[k]
                    .iter()
                    .zip(features)
                    .map(|(w, x)| w * x)
                    .sum::<f64>();
        }
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exp = logits.map(|z| (z - max).exp());
        let total: f64 = exp.iter().sum();
        Ok(exp.map(|e| e / total))
    }
}

pub struct SnapshotModelProvider {
    snapshots: Vec<Arc<LinearSoftmaxModel>>,
}

impl SnapshotModelProvider {
    pub fn new(mut snapshots: Vec<LinearSoftmaxModel>) -> Result<Self, ForecastError> {
        for snapshot in &snapshots {
            snapshot
                .check_shape()
                .map_err(|reason| ForecastError::config_invalid("model", "path", reason))?;
        }
        snapshots.sort_by(|a, b| {
            a.trained_through
                .cmp(&b.trained_through)
                .then_with(|| a.version.cmp(&b.version))
        });
        Ok(Self {
            snapshots: snapshots.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn from_json(json: &str) -> Result<Self, ForecastError> {
        let snapshots: Vec<LinearSoftmaxModel> = serde_json::from_str(json)
            .map_err(|e| ForecastError::config_invalid("model", "path", e.to_string()))?;
        Self::new(snapshots)
    }

    pub fn from_file(path: &Path) -> Result<Self, ForecastError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn versions(&self) -> Vec<&str> {
        self.snapshots.iter().map(|s| s.version.as_str()).collect()
    }
}

impl ModelProvider for SnapshotModelProvider {
    fn model_for(&self, symbol: &str, fold: &Fold) -> Result<Arc<dyn Classifier>, ForecastError> {
        let mut candidates = self.snapshots.iter().filter(|s| s.applies_to(symbol)).peekable();
        if candidates.peek().is_none() {
            return Err(ForecastError::ModelFailure {
                symbol: symbol.to_string(),
                fold: fold.index,
                attempts: 0,
                reason: ModelError::Unavailable(format!("no snapshot covers {symbol}")),
            });
        }
        match candidates
            .filter(|s| s.trained_through <= fold.fit_boundary)
            .last()
        {
            Some(snapshot) => {
                let model: Arc<dyn Classifier> = snapshot.clone();
                Ok(model)
            }
            None => Err(ForecastError::LookAhead {
                symbol: symbol.to_string(),
                fold: fold.index,
                reason: format!(
                    "every snapshot was trained after the fit boundary {}",
                    fold.fit_boundary
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    const SNAPSHOTS: &str = r#"[
        {
            "version": "v2",
            "trained_through": "2024-03-01T00:00:00Z",
            "features": ["rsi", "macd"],
            "intercepts": [0.0, 0.0, 0.0],
            "coefficients": [[-0.1, 0.0], [0.0, 0.0], [0.1, 0.0]]
        },
        {
            "version": "v1",
            "trained_through": "2024-01-01T00:00:00Z",
            "features": ["rsi", "macd"],
            "intercepts": [0.0, 1.0, 0.0],
            "coefficients": [[0.0, 0.0], [0.0, 0.0], [0.0, 0.0]]
        }
    ]"#;

    fn fold_with_boundary(y: i32, m: u32, d: u32) -> Fold {
        let boundary = Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap();
        Fold {
            index: 0,
            fit: 0..10,
            eval: 10..15,
            fit_boundary: boundary,
            eval_start: boundary + chrono::Duration::days(1),
            eval_end: boundary + chrono::Duration::days(5),
        }
    }

    #[test]
    fn probabilities_sum_to_one() {
        let provider = SnapshotModelProvider::from_json(SNAPSHOTS).unwrap();
        let model = provider
            .model_for("SPY", &fold_with_boundary(2024, 6, 1))
            .unwrap();
        let p = model.predict_proba(&[10.0, 0.0]).unwrap();
        assert_relative_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(p[2] > p[1] && p[1] > p[0]);
    }

    #[test]
    fn picks_latest_snapshot_before_boundary() {
        let provider = SnapshotModelProvider::from_json(SNAPSHOTS).unwrap();
        assert_eq!(provider.versions(), vec!["v1", "v2"]);
        let early = provider
            .model_for("SPY", &fold_with_boundary(2024, 2, 1))
            .unwrap();
        assert_eq!(early.version(), "v1");
        let late = provider
            .model_for("SPY", &fold_with_boundary(2024, 3, 1))
            .unwrap();
        assert_eq!(late.version(), "v2");
    }

    #[test]
    fn boundary_before_every_snapshot_is_look_ahead() {
        let provider = SnapshotModelProvider::from_json(SNAPSHOTS).unwrap();
        let err = provider
            .model_for("SPY", &fold_with_boundary(2023, 6, 1))
            .err()
            .unwrap();
        assert!(matches!(err, ForecastError::LookAhead { .. }));
    }

    #[test]
    fn symbol_restricted_snapshot() {
        let json = r#"[{
            "version": "btc-only",
            "trained_through": "2024-01-01T00:00:00Z",
            "features": ["rsi"],
            "intercepts": [0.0, 0.0, 0.0],
            "coefficients": [[0.0], [0.0], [0.0]],
            "symbols": ["BTC-USD"]
        }]"#;
        let provider = SnapshotModelProvider::from_json(json).unwrap();
        let fold = fold_with_boundary(2024, 6, 1);
        assert!(provider.model_for("BTC-USD", &fold).is_ok());
        assert!(matches!(
            provider.model_for("SPY", &fold).err().unwrap(),
            ForecastError::ModelFailure { attempts: 0, .. }
        ));
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let json = r#"[{
            "version": "bad",
            "trained_through": "2024-01-01T00:00:00Z",
            "features": ["rsi", "macd"],
            "intercepts": [0.0, 0.0, 0.0],
            "coefficients": [[0.0], [0.0, 1.0], [0.0, 0.0]]
        }]"#;
        assert!(matches!(
            SnapshotModelProvider::from_json(json),
            Err(ForecastError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn wrong_feature_count_is_invalid() {
        let provider = SnapshotModelProvider::from_json(SNAPSHOTS).unwrap();
        let model = provider
            .model_for("SPY", &fold_with_boundary(2024, 6, 1))
            .unwrap();
        assert!(matches!(
            model.predict_proba(&[1.0]),
            Err(ModelError::InvalidOutput(_))
        ));
    }
}
