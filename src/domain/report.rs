//! Versioned result record.
//!
//! Built from a finished run without further computation. Only ordered
//! containers are used so the serialized form is byte-stable between
//! identical runs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ops::Range;

use super::backtest::{BacktestRun, Exclusion, FailedFold, RunConfig, SymbolRun};
use super::groups::PredictionGroups;
use super::label::PriceField;
use super::scoring::{GroupResult, SymbolResult};
use super::series::CalendarSummary;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub schema_version: u32,
    pub model_versions: Vec<String>,
    pub config: ConfigSnapshot,
    pub symbols: Vec<SymbolReport>,
    pub groups: Vec<GroupResult>,
    pub best_symbol: Option<String>,
    pub best_group: Option<String>,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigSnapshot {
    #[serde(flatten)]
    pub run: RunConfig,
    pub calendar: String,
    pub groups: PredictionGroups,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoldSummary {
    pub index: usize,
    pub fit: Range<usize>,
    pub eval: Range<usize>,
    pub fit_boundary: DateTime<Utc>,
    pub eval_start: DateTime<Utc>,
    pub eval_end: DateTime<Utc>,
    pub model_version: String,
    pub scored: usize,
    pub skipped: usize,
    pub unlabeled: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolReport {
    pub price_field: PriceField,
    pub bars: usize,
    pub labeled: usize,
    pub calendar: CalendarSummary,
    pub fold_runs: Vec<FoldSummary>,
    #[serde(flatten)]
    pub result: SymbolResult,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub excluded_symbols: Vec<Exclusion>,
    pub failed_folds: Vec<FailedFold>,
}

fn symbol_report(run: &SymbolRun) -> SymbolReport {
    let fold_runs = run
        .folds
        .iter()
        .map(|f| FoldSummary {
            index: f.fold.index,
            fit: f.fold.fit.clone(),
            eval: f.fold.eval.clone(),
            fit_boundary: f.fold.fit_boundary,
            eval_start: f.fold.eval_start,
            eval_end: f.fold.eval_end,
            model_version: f.model_version.clone(),
            scored: f.outcomes.len(),
            skipped: f.skipped.len(),
            unlabeled: f.unlabeled,
        })
        .collect();
    SymbolReport {
        price_field: run.price_field,
        bars: run.bars,
        labeled: run.labeled,
        calendar: run.calendar.clone(),
        fold_runs,
        result: run.result.clone(),
    }
}

pub fn build_report(
    run: &BacktestRun,
    config: &RunConfig,
    calendar: &str,
    groups: &PredictionGroups,
) -> RunReport {
    RunReport {
        schema_version: SCHEMA_VERSION,
        model_versions: run.model_versions(),
        config: ConfigSnapshot {
            run: config.clone(),
            calendar: calendar.to_string(),
            groups: groups.clone(),
        },
        symbols: run.symbols.iter().map(symbol_report).collect(),
        groups: run.groups.clone(),
        best_symbol: run.best_symbol.clone(),
        best_group: run.best_group.clone(),
        diagnostics: Diagnostics {
            excluded_symbols: run.excluded.clone(),
            failed_folds: run.failed_folds.clone(),
        },
    }
}
