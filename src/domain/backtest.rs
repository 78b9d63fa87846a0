//! Walk-forward backtest orchestration.
//!
//! Each symbol is loaded, guarded, labeled and split into folds once, up
//! front. Every (symbol, fold) pair then runs as an independent task on the
//! rayon pool; collecting the tasks is the barrier before any aggregation.
//! A symbol that fails before producing a fold is excluded with a reason, a
//! failed fold is dropped from its symbol's aggregate, and neither aborts
//! the run.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::error::ForecastError;
use super::groups::PredictionGroups;
use super::label::{LabelThresholds, LabeledSeries, PriceField, PricePreference};
use super::scoring::{
    aggregate_folds, aggregate_group, select_best_group, select_best_symbol, GroupResult,
    SymbolResult,
};
use super::series::{validate_series, CalendarSummary};
use super::simulation::{self, FoldRun, SimulationSettings};
use super::walk_forward::{Fold, WalkForward};
use crate::ports::calendar_port::TradingCalendar;
use crate::ports::data_port::DataPort;
use crate::ports::model_port::ModelProvider;

/// Everything a run needs, passed in explicitly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunConfig {
    pub thresholds: LabelThresholds,
    pub walk_forward: WalkForward,
    pub min_group_sample_count: u64,
    pub simulation: SimulationSettings,
    pub max_gap_days: i64,
    pub price_preference: PricePreference,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            thresholds: LabelThresholds::symmetric_percent(0.4),
            walk_forward: WalkForward::new(240, 20),
            min_group_sample_count: 30,
            simulation: SimulationSettings::default(),
            max_gap_days: 7,
            price_preference: PricePreference::Auto,
        }
    }
}

impl RunConfig {
    pub fn max_gap(&self) -> chrono::Duration {
        chrono::Duration::days(self.max_gap_days)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionStage {
    Load,
    Integrity,
    FoldConstruction,
    AllFoldsFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exclusion {
    pub symbol: String,
    pub stage: ExclusionStage,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldFailureKind {
    Timeout,
    Model,
    LookAhead,
    Other,
}

impl FoldFailureKind {
    fn of(err: &ForecastError) -> Self {
        match err {
            ForecastError::TaskTimeout { .. } => FoldFailureKind::Timeout,
            ForecastError::ModelFailure { .. } => FoldFailureKind::Model,
            ForecastError::LookAhead { .. } => FoldFailureKind::LookAhead,
            _ => FoldFailureKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFold {
    pub symbol: String,
    pub fold: usize,
    pub kind: FoldFailureKind,
    pub reason: String,
}

/// A symbol that passed the guard and has at least one fold.
#[derive(Debug, Clone)]
pub struct PreparedSymbol {
    pub labeled: LabeledSeries,
    pub folds: Vec<Fold>,
}

impl PreparedSymbol {
    pub fn symbol(&self) -> &str {
        self.labeled.symbol()
    }
}

#[derive(Debug, Clone)]
pub struct RunPlan {
    pub prepared: Vec<PreparedSymbol>,
    pub excluded: Vec<Exclusion>,
}

impl RunPlan {
    pub fn task_count(&self) -> usize {
        self.prepared.iter().map(|p| p.folds.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolRun {
    pub symbol: String,
    pub price_field: PriceField,
    pub bars: usize,
    pub labeled: usize,
    pub calendar: CalendarSummary,
    pub folds: Vec<FoldRun>,
    pub result: SymbolResult,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestRun {
    pub symbols: Vec<SymbolRun>,
    pub groups: Vec<GroupResult>,
    pub best_symbol: Option<String>,
    pub best_group: Option<String>,
    pub excluded: Vec<Exclusion>,
    pub failed_folds: Vec<FailedFold>,
}

impl BacktestRun {
    /// Distinct model versions in first-use order.
    pub fn model_versions(&self) -> Vec<String> {
        let mut versions: Vec<String> = Vec::new();
        for fold in self.symbols.iter().flat_map(|s| s.folds.iter()) {
            if !versions.contains(&fold.model_version) {
                versions.push(fold.model_version.clone());
            }
        }
        versions
    }
}

/// Loads, guards, labels and splits every symbol. Per-symbol failures become
/// exclusions; only a bad configuration fails the plan.
pub fn plan_run(
    config: &RunConfig,
    symbols: &[String],
    data: &dyn DataPort,
    calendar: &dyn TradingCalendar,
) -> Result<RunPlan, ForecastError> {
    config.walk_forward.validate()?;

    let mut prepared = Vec::new();
    let mut excluded = Vec::new();
    for symbol in symbols {
        match prepare_symbol(config, symbol, data, calendar) {
            Ok(p) => {
                info!(
                    symbol = %symbol,
                    bars = p.labeled.series.len(),
                    folds = p.folds.len(),
                    price_field = ?p.labeled.price_field,
                    "symbol prepared"
                );
                prepared.push(p);
            }
            Err((stage, err)) => {
                warn!(symbol = %symbol, ?stage, "excluding symbol: {err}");
                excluded.push(Exclusion {
                    symbol: symbol.clone(),
                    stage,
                    reason: err.to_string(),
                });
            }
        }
    }

    Ok(RunPlan { prepared, excluded })
}

fn prepare_symbol(
    config: &RunConfig,
    symbol: &str,
    data: &dyn DataPort,
    calendar: &dyn TradingCalendar,
) -> Result<PreparedSymbol, (ExclusionStage, ForecastError)> {
    let bars = data
        .fetch_bars(symbol)
        .map_err(|e| (ExclusionStage::Load, e))?;
    let series = validate_series(symbol, bars, calendar, config.max_gap())
        .map_err(|e| (ExclusionStage::Integrity, e))?;
    let labeled = LabeledSeries::new(
        series,
        &config.thresholds,
        config.price_preference,
        Some(config.max_gap()),
    );
    let folds = config
        .walk_forward
        .plan(&labeled.series)
        .map_err(|e| (ExclusionStage::FoldConstruction, e))?;
    Ok(PreparedSymbol { labeled, folds })
}

/// Runs every fold of an already prepared plan and scores the result.
pub fn execute_plan(
    config: &RunConfig,
    plan: RunPlan,
    groups: &PredictionGroups,
    models: &dyn ModelProvider,
) -> Result<BacktestRun, ForecastError> {
    let tasks: Vec<(usize, &Fold)> = plan
        .prepared
        .iter()
        .enumerate()
        .flat_map(|(i, p)| p.folds.iter().map(move |f| (i, f)))
        .collect();
    info!(tasks = tasks.len(), "running folds");

    let finished: Vec<(usize, usize, Result<FoldRun, ForecastError>)> = tasks
        .into_par_iter()
        .map(|(i, fold)| {
            let labeled = &plan.prepared[i].labeled;
            let result = models
                .model_for(labeled.symbol(), fold)
                .and_then(|model| {
                    simulation::run(labeled, fold, model.as_ref(), &config.simulation)
                });
            (i, fold.index, result)
        })
        .collect();

    let mut runs: Vec<Vec<FoldRun>> = vec![Vec::new(); plan.prepared.len()];
    let mut failed_folds = Vec::new();
    for (i, fold, result) in finished {
        match result {
            Ok(run) => {
                debug!(symbol = %run.symbol, fold, scored = run.outcomes.len(), "fold complete");
                runs[i].push(run);
            }
            Err(err) => {
                let symbol = plan.prepared[i].symbol().to_string();
                warn!(symbol = %symbol, fold, "fold failed: {err}");
                failed_folds.push(FailedFold {
                    symbol,
                    fold,
                    kind: FoldFailureKind::of(&err),
                    reason: err.to_string(),
                });
            }
        }
    }

    let mut excluded = plan.excluded;
    let mut symbols = Vec::new();
    for (prepared, folds) in plan.prepared.into_iter().zip(runs) {
        let symbol = prepared.symbol().to_string();
        if folds.is_empty() {
            warn!(symbol = %symbol, "excluding symbol: every fold failed");
            excluded.push(Exclusion {
                symbol,
                stage: ExclusionStage::AllFoldsFailed,
                reason: format!("all {} folds failed", prepared.folds.len()),
            });
            continue;
        }
        let result = aggregate_folds(&symbol, &folds);
        symbols.push(SymbolRun {
            symbol,
            price_field: prepared.labeled.price_field,
            bars: prepared.labeled.series.len(),
            labeled: prepared.labeled.labeled_count(),
            calendar: prepared.labeled.series.calendar_summary(),
            folds,
            result,
        });
    }

    if symbols.is_empty() {
        return Err(ForecastError::NoUsableSymbols);
    }

    let symbol_results: Vec<SymbolResult> = symbols.iter().map(|s| s.result.clone()).collect();
    let group_results: Vec<GroupResult> = groups
        .iter()
        .map(|(name, members)| aggregate_group(name, &symbol_results, members))
        .collect();

    let floor = config.min_group_sample_count;
    let best_symbol = select_best_symbol(&symbol_results, floor).map(|r| r.symbol.clone());
    let best_group = select_best_group(&group_results, floor).map(|g| g.group.clone());
    info!(
        symbols = symbols.len(),
        excluded = excluded.len(),
        failed_folds = failed_folds.len(),
        best_symbol = best_symbol.as_deref().unwrap_or("-"),
        best_group = best_group.as_deref().unwrap_or("-"),
        "backtest complete"
    );

    Ok(BacktestRun {
        symbols,
        groups: group_results,
        best_symbol,
        best_group,
        excluded,
        failed_folds,
    })
}

/// Full pipeline: group validation, planning, execution, scoring.
pub fn run_backtest(
    config: &RunConfig,
    symbols: &[String],
    groups: &PredictionGroups,
    data: &dyn DataPort,
    calendar: &dyn TradingCalendar,
    models: &dyn ModelProvider,
) -> Result<BacktestRun, ForecastError> {
    groups.validate(symbols)?;
    let plan = plan_run(config, symbols, data, calendar)?;
    execute_plan(config, plan, groups, models)
}
