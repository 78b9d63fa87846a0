#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use trendcast::domain::backtest::RunConfig;
pub use trendcast::domain::bar::Bar;
use trendcast::domain::error::{ForecastError, ModelError};
use trendcast::domain::label::LabelThresholds;
use trendcast::domain::walk_forward::{Fold, WalkForward};
use trendcast::ports::data_port::DataPort;
use trendcast::ports::model_port::{Classifier, ModelProvider};

pub const SCENARIO_CLOSES: [f64; 10] = [
    100.0, 101.0, 99.0, 102.0, 103.0, 101.0, 104.0, 103.0, 106.0, 105.0,
];

pub struct MockDataPort {
    pub data: HashMap<String, Vec<Bar>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_bars(&self, symbol: &str) -> Result<Vec<Bar>, ForecastError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(ForecastError::Data {
                reason: reason.clone(),
            });
        }
        self.data
            .get(symbol)
            .cloned()
            .ok_or_else(|| ForecastError::Data {
                reason: format!("no data for {symbol}"),
            })
    }

    fn list_symbols(&self) -> Result<Vec<String>, ForecastError> {
        let mut symbols: Vec<String> = self.data.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }
}

/// Predicts Up when `signal` is positive, Down when negative, Neutral at zero.
pub struct SignalClassifier {
    pub version: String,
    pub features: Vec<String>,
    pub trained_through: DateTime<Utc>,
}

impl SignalClassifier {
    pub fn new(trained_through: DateTime<Utc>) -> Self {
        Self {
            version: "signal-v1".to_string(),
            features: vec!["signal".to_string()],
            trained_through,
        }
    }
}

impl Classifier for SignalClassifier {
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
        let s = features[0];
        Ok(if s > 0.0 {
            [0.1, 0.2, 0.7]
        } else if s < 0.0 {
            [0.7, 0.2, 0.1]
        } else {
            [0.2, 0.6, 0.2]
        })
    }
}

/// Always fails with a transient error.
pub struct BrokenClassifier;

impl Classifier for BrokenClassifier {
    fn version(&self) -> &str {
        "broken"
    }

    fn feature_names(&self) -> &[String] {
        &[]
    }

    fn trained_through(&self) -> DateTime<Utc> {
        epoch()
    }

    fn predict_proba(&self, _features: &[f64]) -> Result<[f64; 3], ModelError> {
        Err(ModelError::Transient("backend busy".into()))
    }
}

/// Signal classifier that sleeps on every call.
pub struct SlowClassifier {
    pub delay: StdDuration,
    pub features: Vec<String>,
}

impl SlowClassifier {
    pub fn new(delay: StdDuration) -> Self {
        Self {
            delay,
            features: vec!["signal".to_string()],
        }
    }
}

impl Classifier for SlowClassifier {
    fn version(&self) -> &str {
        "slow"
    }

    fn feature_names(&self) -> &[String] {
        &self.features
    }

    fn trained_through(&self) -> DateTime<Utc> {
        epoch()
    }

    fn predict_proba(&self, _features: &[f64]) -> Result<[f64; 3], ModelError> {
        std::thread::sleep(self.delay);
        Ok([0.2, 0.6, 0.2])
    }
}

/// Hands every fold a model trained through its fit boundary, unless a
/// model is registered for the (symbol, fold) pair or for the symbol.
pub struct BoundaryProvider {
    pub overrides: HashMap<String, Arc<dyn Classifier>>,
    pub fold_overrides: HashMap<(String, usize), Arc<dyn Classifier>>,
}

impl BoundaryProvider {
    pub fn new() -> Self {
        Self {
            overrides: HashMap::new(),
            fold_overrides: HashMap::new(),
        }
    }

    pub fn with_model(mut self, symbol: &str, model: Arc<dyn Classifier>) -> Self {
        self.overrides.insert(symbol.to_string(), model);
        self
    }

    pub fn with_fold_model(mut self, symbol: &str, fold: usize, model: Arc<dyn Classifier>) -> Self {
        self.fold_overrides.insert((symbol.to_string(), fold), model);
        self
    }
}

impl ModelProvider for BoundaryProvider {
    fn model_for(&self, symbol: &str, fold: &Fold) -> Result<Arc<dyn Classifier>, ForecastError> {
        if let Some(model) = self.fold_overrides.get(&(symbol.to_string(), fold.index)) {
            return Ok(model.clone());
        }
        if let Some(model) = self.overrides.get(symbol) {
            return Ok(model.clone());
        }
        let model: Arc<dyn Classifier> = Arc::new(SignalClassifier::new(fold.fit_boundary));
        Ok(model)
    }
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 15, 0, 0).unwrap()
}

pub fn make_bar(timestamp: DateTime<Utc>, close: f64, signal: f64) -> Bar {
    let mut features = BTreeMap::new();
    features.insert("signal".to_string(), signal);
    Bar {
        timestamp,
        open: close,
        high: close + 1.0,
        low: close - 1.0,
        close,
        adj_close: None,
        volume: 1_000.0,
        features,
    }
}

/// Daily bars whose `signal` feature is the sign of the next move, so the
/// signal classifier is a perfect oracle on non-neutral bars.
pub fn oracle_bars(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let signal = match closes.get(i + 1) {
                Some(&next) if next > c => 1.0,
                Some(&next) if next < c => -1.0,
                _ => 0.0,
            };
            make_bar(start() + Duration::days(i as i64), c, signal)
        })
        .collect()
}

/// Daily bars whose signal is always the opposite of the next move.
pub fn contrarian_bars(closes: &[f64]) -> Vec<Bar> {
    oracle_bars(closes)
        .into_iter()
        .map(|mut b| {
            if let Some(s) = b.features.get_mut("signal") {
                *s = -*s;
            }
            b
        })
        .collect()
}

/// Deterministic zig-zag price path of `n` bars.
pub fn zigzag(n: usize, base: f64) -> Vec<f64> {
    (0..n)
        .map(|i| base + ((i * 7) % 5) as f64 - 2.0 + i as f64 * 0.1)
        .collect()
}

pub fn scenario_config() -> RunConfig {
    RunConfig {
        thresholds: LabelThresholds::symmetric_percent(0.01),
        walk_forward: WalkForward::new(5, 4),
        min_group_sample_count: 1,
        max_gap_days: 5,
        ..RunConfig::default()
    }
}

pub fn symbols(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
