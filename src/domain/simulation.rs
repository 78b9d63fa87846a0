//! Bar-by-bar simulation of one fold.
//!
//! Bars are visited in timestamp order. The feature vector for a bar is read
//! from that bar only, in the model's declared order; forward-looking columns
//! are refused up front. A missing feature skips the bar, never the fold.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use super::bar::{is_forward_looking, Bar};
use super::decision::{Decision, Outcome, SkippedBar};
use super::error::{ForecastError, ModelError};
use super::label::LabeledSeries;
use super::walk_forward::Fold;
use crate::ports::model_port::Classifier;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimulationSettings {
    pub max_model_retries: u32,
    #[serde(with = "optional_millis")]
    pub timeout: Option<Duration>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        SimulationSettings {
            max_model_retries: 3,
            timeout: None,
        }
    }
}

/// Completed simulation of one (symbol, fold) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoldRun {
    pub symbol: String,
    pub fold: Fold,
    pub model_version: String,
    pub outcomes: Vec<Outcome>,
    pub skipped: Vec<SkippedBar>,
    pub unlabeled: usize,
}

pub fn run(
    labeled: &LabeledSeries,
    fold: &Fold,
    model: &dyn Classifier,
    settings: &SimulationSettings,
) -> Result<FoldRun, ForecastError> {
    let symbol = labeled.symbol();
    check_causality(symbol, fold, model)?;

    let started = Instant::now();
    let bars = labeled.series.bars();
    let feature_names = model.feature_names();
    let mut outcomes = Vec::with_capacity(fold.eval_len());
    let mut skipped = Vec::new();
    let mut unlabeled = 0usize;
    let mut features = Vec::with_capacity(feature_names.len());

    for index in fold.eval.clone() {
        check_deadline(symbol, fold, started, settings)?;

        let Some(bar) = bars.get(index) else {
            break;
        };
        let Some(realized) = labeled.label_at(index) else {
            unlabeled += 1;
            continue;
        };

        match feature_vector(bar, feature_names, &mut features) {
            Ok(()) => {}
            Err(ForecastError::MissingFeature { feature }) => {
                debug!(symbol, fold = fold.index, timestamp = %bar.timestamp, %feature, "skipping bar");
                skipped.push(SkippedBar {
                    timestamp: bar.timestamp,
                    feature,
                });
                continue;
            }
            Err(e) => return Err(e),
        }

        let probabilities = predict_with_retry(symbol, fold, model, &features, settings)?;
        let decision = Decision::from_probabilities(bar.timestamp, probabilities);
        outcomes.push(Outcome::new(decision, realized));
    }

    check_deadline(symbol, fold, started, settings)?;

    Ok(FoldRun {
        symbol: symbol.to_string(),
        fold: fold.clone(),
        model_version: model.version().to_string(),
        outcomes,
        skipped,
        unlabeled,
    })
}

/// Fills `out` with the bar's values for `names`, in order.
fn feature_vector(bar: &Bar, names: &[String], out: &mut Vec<f64>) -> Result<(), ForecastError> {
    out.clear();
    for name in names {
        let value = bar.feature(name).ok_or_else(|| ForecastError::MissingFeature {
            feature: name.clone(),
        })?;
        out.push(value);
    }
    Ok(())
}

fn check_causality(symbol: &str, fold: &Fold, model: &dyn Classifier) -> Result<(), ForecastError> {
    if model.trained_through() > fold.fit_boundary {
        return Err(ForecastError::LookAhead {
            symbol: symbol.to_string(),
            fold: fold.index,
            reason: format!(
                "model {} trained through {} but fit boundary is {}",
                model.version(),
                model.trained_through(),
                fold.fit_boundary
            ),
        });
    }
    if let Some(name) = model.feature_names().iter().find(|n| is_forward_looking(n)) {
        return Err(ForecastError::LookAhead {
            symbol: symbol.to_string(),
            fold: fold.index,
            reason: format!("feature {name} is only known after the bar closes"),
        });
    }
    Ok(())
}

fn check_deadline(
    symbol: &str,
    fold: &Fold,
    started: Instant,
    settings: &SimulationSettings,
) -> Result<(), ForecastError> {
    let Some(limit) = settings.timeout else {
        return Ok(());
    };
    let elapsed = started.elapsed();
    if elapsed > limit {
        return Err(ForecastError::TaskTimeout {
            symbol: symbol.to_string(),
            fold: fold.index,
            elapsed_ms: elapsed.as_millis(),
            limit_ms: limit.as_millis(),
        });
    }
    Ok(())
}

fn predict_with_retry(
    symbol: &str,
    fold: &Fold,
    model: &dyn Classifier,
    features: &[f64],
    settings: &SimulationSettings,
) -> Result<[f64; 3], ForecastError> {
    let max_attempts = settings.max_model_retries + 1;
    let mut attempts = 0;
    loop {
        attempts += 1;
        let failure = match model.predict_proba(features) {
            Ok(probs) => match check_probabilities(probs) {
                Ok(()) => return Ok(probs),
                Err(e) => e,
            },
            Err(e) => e,
        };
        if !failure.is_retryable() || attempts >= max_attempts {
            return Err(ForecastError::ModelFailure {
                symbol: symbol.to_string(),
                fold: fold.index,
                attempts,
                reason: failure,
            });
        }
        debug!(symbol, fold = fold.index, attempts, %failure, "retrying model call");
    }
}

fn check_probabilities(probs: [f64; 3]) -> Result<(), ModelError> {
    if probs.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return Err(ModelError::InvalidOutput(format!(
            "probabilities must be finite and non-negative, got {probs:?}"
        )));
    }
    Ok(())
}

mod optional_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::exchange_calendar::ExchangeCalendar;
    use crate::domain::bar::Bar;
    use crate::domain::label::{Label, LabelThresholds, PricePreference};
    use crate::domain::series::validate_series;
    use crate::domain::walk_forward::WalkForward;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct SignalModel {
        features: Vec<String>,
        trained_through: DateTime<Utc>,
    }

    impl Classifier for SignalModel {
        fn version(&self) -> &str {
            "signal-v1"
        }
        fn feature_names(&self) -> &[String] {
            &self.features
        }
        fn trained_through(&self) -> DateTime<Utc> {
            self.trained_through
        }
        fn predict_proba(&self, features: &[f64]) -> Result<[f64; 3], ModelError> {
            if features[0] > 0.0 {
                Ok([0.1, 0.1, 0.8])
            } else {
                Ok([0.8, 0.1, 0.1])
            }
        }
    }

    struct FlakyModel {
        features: Vec<String>,
        failures_left: AtomicU32,
    }

    impl Classifier for FlakyModel {
        fn version(&self) -> &str {
            "flaky"
        }
        fn feature_names(&self) -> &[String] {
            &self.features
        }
        fn trained_through(&self) -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
        }
        fn predict_proba(&self, _features: &[f64]) -> Result<[f64; 3], ModelError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(ModelError::Transient("busy".into()));
            }
            Ok([0.2, 0.6, 0.2])
        }
    }

    fn labeled(closes: &[f64]) -> LabeledSeries {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let mut features = BTreeMap::new();
                features.insert("signal".to_string(), if i % 2 == 0 { 1.0 } else { -1.0 });
                Bar {
                    timestamp: start + chrono::Duration::days(i as i64),
                    open: c,
                    high: c,
                    low: c,
                    close: c,
                    adj_close: None,
                    volume: 1.0,
                    features,
                }
            })
            .collect();
        let series = validate_series(
            "ETH-USD",
            bars,
            &ExchangeCalendar::crypto(),
            chrono::Duration::days(5),
        )
        .unwrap();
        LabeledSeries::new(
            series,
            &LabelThresholds::symmetric_percent(0.01),
            PricePreference::Auto,
            None,
        )
    }

    fn early() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap()
    }

    fn signal_model() -> SignalModel {
        SignalModel {
            features: vec!["signal".into()],
            trained_through: early(),
        }
    }

    #[test]
    fn produces_one_outcome_per_labeled_bar() {
        let ls = labeled(&[100.0, 101.0, 99.0, 102.0, 103.0, 101.0, 104.0, 103.0, 106.0, 105.0]);
        let fold = WalkForward::new(5, 4).plan(&ls.series).unwrap().remove(0);
        let run = run(&ls, &fold, &signal_model(), &SimulationSettings::default()).unwrap();
        assert_eq!(run.outcomes.len(), 4);
        assert!(run.skipped.is_empty());
        assert_eq!(run.model_version, "signal-v1");
        // odd bars carry a negative signal
        assert_eq!(run.outcomes[0].decision.predicted, Label::Down);
        assert_eq!(run.outcomes[1].decision.predicted, Label::Up);
    }

    #[test]
    fn missing_feature_skips_bar() {
        let mut ls = labeled(&[100.0, 101.0, 99.0, 102.0, 103.0, 101.0, 104.0, 103.0, 106.0, 105.0]);
        let mut bars = ls.series.bars().to_vec();
        bars[6].features.clear();
        let series = validate_series(
            "ETH-USD",
            bars,
            &ExchangeCalendar::crypto(),
            chrono::Duration::days(5),
        )
        .unwrap();
        ls = LabeledSeries::new(
            series,
            &LabelThresholds::symmetric_percent(0.01),
            PricePreference::Auto,
            None,
        );
        let fold = WalkForward::new(5, 4).plan(&ls.series).unwrap().remove(0);
        let run = run(&ls, &fold, &signal_model(), &SimulationSettings::default()).unwrap();
        assert_eq!(run.outcomes.len(), 3);
        assert_eq!(run.skipped.len(), 1);
        assert_eq!(run.skipped[0].feature, "signal");
    }

    #[test]
    fn feature_vector_follows_model_order() {
        let ls = labeled(&[100.0, 101.0, 99.0]);
        let mut bar = ls.series.bars()[0].clone();
        bar.features.insert("rsi".into(), 40.0);
        let mut out = Vec::new();
        feature_vector(&bar, &["rsi".into(), "signal".into()], &mut out).unwrap();
        assert_eq!(out, vec![40.0, 1.0]);

        bar.features.insert("rsi".into(), f64::NAN);
        let err = feature_vector(&bar, &["signal".into(), "rsi".into()], &mut out).unwrap_err();
        assert!(matches!(err, ForecastError::MissingFeature { ref feature } if feature == "rsi"));
    }

    #[test]
    fn model_trained_past_boundary_is_rejected() {
        let ls = labeled(&[100.0, 101.0, 99.0, 102.0, 103.0, 101.0, 104.0, 103.0, 106.0, 105.0]);
        let fold = WalkForward::new(5, 4).plan(&ls.series).unwrap().remove(0);
        let model = SignalModel {
            features: vec!["signal".into()],
            trained_through: fold.eval_start,
        };
        let err = run(&ls, &fold, &model, &SimulationSettings::default()).unwrap_err();
        assert!(matches!(err, ForecastError::LookAhead { fold: 0, .. }));
    }

    #[test]
    fn forward_looking_feature_is_rejected() {
        let ls = labeled(&[100.0, 101.0, 99.0, 102.0, 103.0, 101.0, 104.0, 103.0, 106.0, 105.0]);
        let fold = WalkForward::new(5, 4).plan(&ls.series).unwrap().remove(0);
        let model = SignalModel {
            features: vec!["signal".into(), "forward_return".into()],
            trained_through: early(),
        };
        let err = run(&ls, &fold, &model, &SimulationSettings::default()).unwrap_err();
        assert!(matches!(err, ForecastError::LookAhead { .. }));
    }

    #[test]
    fn transient_failures_are_retried_within_budget() {
        let ls = labeled(&[100.0, 101.0, 99.0, 102.0, 103.0, 101.0, 104.0, 103.0, 106.0, 105.0]);
        let fold = WalkForward::new(5, 4).plan(&ls.series).unwrap().remove(0);
        let model = FlakyModel {
            features: vec!["signal".into()],
            failures_left: AtomicU32::new(2),
        };
        let run = run(&ls, &fold, &model, &SimulationSettings::default()).unwrap();
        assert_eq!(run.outcomes.len(), 4);
    }

    #[test]
    fn exhausted_retries_fail_the_fold() {
        let ls = labeled(&[100.0, 101.0, 99.0, 102.0, 103.0, 101.0, 104.0, 103.0, 106.0, 105.0]);
        let fold = WalkForward::new(5, 4).plan(&ls.series).unwrap().remove(0);
        let model = FlakyModel {
            features: vec!["signal".into()],
            failures_left: AtomicU32::new(10),
        };
        let settings = SimulationSettings {
            max_model_retries: 2,
            timeout: None,
        };
        let err = run(&ls, &fold, &model, &settings).unwrap_err();
        assert!(matches!(err, ForecastError::ModelFailure { attempts: 3, .. }));
    }

    struct SlowModel {
        features: Vec<String>,
    }

    impl Classifier for SlowModel {
        fn version(&self) -> &str {
            "slow"
        }
        fn feature_names(&self) -> &[String] {
            &self.features
        }
        fn trained_through(&self) -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
        }
        fn predict_proba(&self, _features: &[f64]) -> Result<[f64; 3], ModelError> {
            std::thread::sleep(Duration::from_millis(20));
            Ok([0.3, 0.4, 0.3])
        }
    }

    #[test]
    fn slow_task_times_out() {
        let ls = labeled(&[100.0, 101.0, 99.0, 102.0, 103.0, 101.0, 104.0, 103.0, 106.0, 105.0]);
        let fold = WalkForward::new(5, 4).plan(&ls.series).unwrap().remove(0);
        let settings = SimulationSettings {
            max_model_retries: 0,
            timeout: Some(Duration::from_millis(5)),
        };
        let model = SlowModel {
            features: vec!["signal".into()],
        };
        let err = run(&ls, &fold, &model, &settings).unwrap_err();
        assert!(matches!(err, ForecastError::TaskTimeout { fold: 0, .. }));
    }

    #[test]
    fn reruns_are_identical() {
        let ls = labeled(&[100.0, 101.0, 99.0, 102.0, 103.0, 101.0, 104.0, 103.0, 106.0, 105.0]);
        let fold = WalkForward::new(5, 4).plan(&ls.series).unwrap().remove(0);
        let model = signal_model();
        let a = run(&ls, &fold, &model, &SimulationSettings::default()).unwrap();
        let b = run(&ls, &fold, &model, &SimulationSettings::default()).unwrap();
        assert_eq!(a, b);
    }
}
