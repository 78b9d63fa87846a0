//! Walk-forward fold generation.
//!
//! Folds are built over the labelable prefix of a validated series (every bar
//! but the last). Each evaluation window starts right after its fit boundary,
//! windows never overlap, and a tail shorter than one window is dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ops::Range;

use super::error::ForecastError;
use super::series::ValidatedSeries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WalkForward {
    pub min_train_bars: usize,
    pub eval_window_bars: usize,
    pub step_bars: usize,
    /// Expanding fit window from the first bar when true, rolling otherwise.
    pub anchored: bool,
}

impl WalkForward {
    pub fn new(min_train_bars: usize, eval_window_bars: usize) -> Self {
        WalkForward {
            min_train_bars,
            eval_window_bars,
            step_bars: eval_window_bars,
            anchored: true,
        }
    }

    pub fn with_step(mut self, step_bars: usize) -> Self {
        self.step_bars = step_bars;
        self
    }

    pub fn with_anchored(mut self, anchored: bool) -> Self {
        self.anchored = anchored;
        self
    }

    pub fn required_bars(&self) -> usize {
        self.min_train_bars + self.eval_window_bars
    }

    pub fn validate(&self) -> Result<(), ForecastError> {
        if self.min_train_bars < 2 {
            return Err(ForecastError::config_invalid(
                "run",
                "min_train_bars",
                "min_train_bars must be at least 2",
            ));
        }
        if self.eval_window_bars == 0 {
            return Err(ForecastError::config_invalid(
                "run",
                "eval_window_bars",
                "eval_window_bars must be positive",
            ));
        }
        if self.step_bars < self.eval_window_bars {
            return Err(ForecastError::config_invalid(
                "run",
                "step_bars",
                "step_bars must be at least eval_window_bars so evaluation windows never overlap",
            ));
        }
        Ok(())
    }

    /// A fresh, lazy pass over the folds of `series`. Call again to restart.
    pub fn folds<'a>(&self, series: &'a ValidatedSeries) -> Folds<'a> {
        Folds {
            plan: *self,
            series,
            next_index: 0,
            next_eval_start: self.min_train_bars,
        }
    }

    /// Fails with `FoldConstruction` if not even one fold fits.
    pub fn plan(&self, series: &ValidatedSeries) -> Result<Vec<Fold>, ForecastError> {
        let folds: Vec<Fold> = self.folds(series).collect();
        if folds.is_empty() {
            return Err(ForecastError::FoldConstruction {
                symbol: series.symbol().to_string(),
                labelable: series.labelable_len(),
                required: self.required_bars(),
            });
        }
        Ok(folds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fold {
    pub index: usize,
    /// Bars whose features the model may have seen.
    pub fit: Range<usize>,
    pub eval: Range<usize>,
    /// Timestamp of the last bar inside the fit window.
    pub fit_boundary: DateTime<Utc>,
    pub eval_start: DateTime<Utc>,
    pub eval_end: DateTime<Utc>,
}

impl Fold {
    /// Fit bars whose labels are known at the boundary. The last fit bar's
    /// label needs the first evaluation close, so it is embargoed.
    pub fn trainable(&self) -> Range<usize> {
        self.fit.start..self.fit.end.saturating_sub(1)
    }

    pub fn eval_len(&self) -> usize {
        self.eval.len()
    }
}

#[derive(Debug, Clone)]
pub struct Folds<'a> {
    plan: WalkForward,
    series: &'a ValidatedSeries,
    next_index: usize,
    next_eval_start: usize,
}

impl Iterator for Folds<'_> {
    type Item = Fold;

    fn next(&mut self) -> Option<Fold> {
        let plan = &self.plan;
        if plan.eval_window_bars == 0 || plan.step_bars == 0 {
            return None;
        }
        let eval_start = self.next_eval_start;
        let eval_end = eval_start.checked_add(plan.eval_window_bars)?;
        if eval_end > self.series.labelable_len() {
            return None;
        }

        let fit_start = if plan.anchored {
            0
        } else {
            eval_start - plan.min_train_bars
        };
        let fold = Fold {
            index: self.next_index,
            fit: fit_start..eval_start,
            eval: eval_start..eval_end,
            fit_boundary: self.series.timestamp(eval_start.checked_sub(1)?)?,
            eval_start: self.series.timestamp(eval_start)?,
            eval_end: self.series.timestamp(eval_end - 1)?,
        };

        self.next_index += 1;
        self.next_eval_start = eval_start + plan.step_bars;
        Some(fold)
    }
}
