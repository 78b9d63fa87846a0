//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::exchange_calendar::ExchangeCalendar;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_model_adapter::SnapshotModelProvider;
use crate::adapters::json_report_adapter::JsonReportAdapter;
use crate::domain::backtest::{execute_plan, plan_run, BacktestRun, RunConfig, RunPlan};
use crate::domain::config_validation::{
    parse_key, require_string, timeout_secs, validate_run_config,
};
use crate::domain::error::ForecastError;
use crate::domain::groups::{parse_symbols, PredictionGroups};
use crate::domain::label::{LabelThresholds, PricePreference};
use crate::domain::report::build_report;
use crate::domain::simulation::SimulationSettings;
use crate::domain::walk_forward::WalkForward;
use crate::ports::calendar_port::TradingCalendar;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(name = "trendcast", about = "Walk-forward backtester for direction classifiers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a walk-forward backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Comma-separated symbols, overriding [data] symbols
        #[arg(long)]
        symbols: Option<String>,
        /// Load and plan folds without running the model
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a run configuration and its referenced files
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List symbols available in the data directory
    ListSymbols {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Backtest {
            config,
            output,
            symbols,
            dry_run,
        } => {
            if dry_run {
                run_dry_run(&config, symbols.as_deref())
            } else {
                run_backtest(&config, output.as_deref(), symbols.as_deref())
            }
        }
        Command::Validate { config } => run_validate(&config),
        Command::ListSymbols { config } => run_list_symbols(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            ExitCode::from(&e)
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ForecastError> {
    FileConfigAdapter::from_file(path).map_err(|e| ForecastError::ConfigParse {
        file: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn count(config: &dyn ConfigPort, key: &str, default: usize) -> Result<usize, ForecastError> {
    match parse_key::<i64>(config, "run", key)? {
        None => Ok(default),
        Some(v) => usize::try_from(v)
            .map_err(|_| ForecastError::config_invalid("run", key, "must be non-negative")),
    }
}

pub fn build_run_config(config: &dyn ConfigPort) -> Result<RunConfig, ForecastError> {
    let up = parse_key::<f64>(config, "run", "neutral_threshold")?.unwrap_or(0.4);
    let down = parse_key::<f64>(config, "run", "neutral_threshold_down")?.unwrap_or(up);

    let min_train_bars = count(config, "min_train_bars", 240)?;
    let eval_window_bars = count(config, "eval_window_bars", 20)?;
    let step_bars = count(config, "step_bars", eval_window_bars)?;
    let walk_forward = WalkForward::new(min_train_bars, eval_window_bars)
        .with_step(step_bars)
        .with_anchored(config.get_bool("run", "anchored", true));
    walk_forward.validate()?;

    let secs = timeout_secs(config)?.map_or(0.0, |(_, secs)| secs);
    let timeout = (secs > 0.0)
        .then(|| Duration::try_from_secs_f64(secs).ok())
        .flatten();
    let max_model_retries = u32::try_from(count(config, "max_model_retries", 3)?)
        .map_err(|_| ForecastError::config_invalid("run", "max_model_retries", "too large"))?;

    let price_preference = match config
        .get_string("run", "price_field")
        .map(|s| s.trim().to_lowercase())
        .as_deref()
    {
        None | Some("auto") => PricePreference::Auto,
        Some("close") => PricePreference::Close,
        Some("adj_close") => PricePreference::AdjClose,
        Some(other) => {
            return Err(ForecastError::config_invalid(
                "run",
                "price_field",
                format!("unknown price field {other:?}"),
            ));
        }
    };

    Ok(RunConfig {
        thresholds: LabelThresholds::from_percent(up, down),
        walk_forward,
        min_group_sample_count: count(config, "min_group_sample_count", 30)? as u64,
        simulation: SimulationSettings {
            max_model_retries,
            timeout,
        },
        max_gap_days: parse_key::<i64>(config, "run", "max_gap_days")?.unwrap_or(7),
        price_preference,
    })
}

pub fn build_groups(config: &dyn ConfigPort) -> Result<PredictionGroups, ForecastError> {
    let mut groups = PredictionGroups::new();
    for name in config.keys("groups") {
        let list = config.get_string("groups", &name).unwrap_or_default();
        let members = parse_symbols(&list)
            .map_err(|e| ForecastError::config_invalid("groups", &name, e.to_string()))?;
        groups.insert(&name, members);
    }
    Ok(groups)
}

pub fn build_calendar(config: &dyn ConfigPort) -> Result<ExchangeCalendar, ForecastError> {
    let code = config
        .get_string("calendar", "exchange")
        .unwrap_or_else(|| "NYSE".to_string());
    let calendar = ExchangeCalendar::from_code(&code)?;
    match config.get_string("calendar", "events_path") {
        Some(path) if !path.trim().is_empty() => calendar.with_events_file(Path::new(path.trim())),
        _ => Ok(calendar),
    }
}

/// CSV reader whose naive timestamps are local to the calendar's market zone.
pub fn data_adapter(
    config: &dyn ConfigPort,
    calendar: &dyn TradingCalendar,
) -> Result<CsvAdapter, ForecastError> {
    let path = PathBuf::from(require_string(config, "data", "path")?);
    Ok(CsvAdapter::new(path).with_timezone(calendar.timezone()))
}

/// Command-line list, then `[data] symbols`, then every file in the data directory.
pub fn resolve_symbols(
    symbols_override: Option<&str>,
    config: &dyn ConfigPort,
    data: &dyn DataPort,
) -> Result<Vec<String>, ForecastError> {
    let configured = symbols_override
        .map(str::to_string)
        .or_else(|| config.get_string("data", "symbols"))
        .filter(|s| !s.trim().is_empty());
    let symbols = match configured {
        Some(list) => parse_symbols(&list)
            .map_err(|e| ForecastError::config_invalid("data", "symbols", e.to_string()))?,
        None => data.list_symbols()?,
    };
    if symbols.is_empty() {
        return Err(ForecastError::ConfigMissing {
            section: "data".into(),
            key: "symbols".into(),
        });
    }
    Ok(symbols)
}

struct Setup {
    run_config: RunConfig,
    calendar: ExchangeCalendar,
    groups: PredictionGroups,
    data: CsvAdapter,
    symbols: Vec<String>,
    model_path: PathBuf,
    report_path: PathBuf,
}

fn setup(config_path: &Path, symbols_override: Option<&str>) -> Result<Setup, ForecastError> {
    // Stage 1: Load and validate config
    info!(path = %config_path.display(), "loading config");
    let adapter = load_config(config_path)?;
    validate_run_config(&adapter)?;

    // Stage 2: Build run parameters and collaborators
    let run_config = build_run_config(&adapter)?;
    let calendar = build_calendar(&adapter)?;
    let groups = build_groups(&adapter)?;
    let data = data_adapter(&adapter, &calendar)?;
    let model_path = PathBuf::from(require_string(&adapter, "model", "path")?);
    let report_path = adapter
        .get_string("report", "output")
        .filter(|s| !s.trim().is_empty())
        .map(|s| PathBuf::from(s.trim()))
        .unwrap_or_else(|| PathBuf::from("report.json"));

    // Stage 3: Resolve symbols and check group membership
    let symbols = resolve_symbols(symbols_override, &adapter, &data)?;
    groups.validate(&symbols)?;

    Ok(Setup {
        run_config,
        calendar,
        groups,
        data,
        symbols,
        model_path,
        report_path,
    })
}

fn run_backtest(
    config_path: &Path,
    output: Option<&Path>,
    symbols_override: Option<&str>,
) -> Result<(), ForecastError> {
    let setup = setup(config_path, symbols_override)?;

    // Stage 4: Load model snapshots
    let models = SnapshotModelProvider::from_file(&setup.model_path)?;
    info!(snapshots = models.len(), "model snapshots loaded");

    // Stage 5: Guard, label and split every symbol
    eprintln!(
        "Backtesting {} symbols on {}",
        setup.symbols.len(),
        setup.calendar.name()
    );
    let plan = plan_run(&setup.run_config, &setup.symbols, &setup.data, &setup.calendar)?;

    // Stage 6: Run folds and score
    let run = execute_plan(&setup.run_config, plan, &setup.groups, &models)?;
    print_summary(&run);

    // Stage 7: Write report
    let report = build_report(
        &run,
        &setup.run_config,
        setup.calendar.name(),
        &setup.groups,
    );
    let output = output.map(Path::to_path_buf).unwrap_or(setup.report_path);
    JsonReportAdapter::new().write(&report, &output)?;
    eprintln!("\nReport written to: {}", output.display());
    Ok(())
}

fn print_summary(run: &BacktestRun) {
    eprintln!("\n=== Per-Symbol Results ===");
    for s in &run.symbols {
        let score = &s.result.score;
        eprintln!(
            "  {}:  {} bars scored over {} folds, hit rate {:.1}%, expected return {:+.4}%, macro F1 {:.3}, {} skipped",
            s.symbol,
            score.samples,
            s.result.folds,
            score.hit_rate * 100.0,
            score.expected_return * 100.0,
            score.macro_f1,
            s.result.skipped,
        );
    }

    if !run.groups.is_empty() {
        eprintln!("\n=== Groups ===");
        for g in &run.groups {
            eprintln!(
                "  {}:  {} members, hit rate {:.1}%, expected return {:+.4}%",
                g.group,
                g.members.len(),
                g.score.hit_rate * 100.0,
                g.score.expected_return * 100.0,
            );
        }
    }

    eprintln!(
        "\nBest symbol: {}",
        run.best_symbol.as_deref().unwrap_or("none (sample floor not met)")
    );
    if !run.groups.is_empty() {
        eprintln!(
            "Best group:  {}",
            run.best_group.as_deref().unwrap_or("none (sample floor not met)")
        );
    }

    if !run.excluded.is_empty() || !run.failed_folds.is_empty() {
        eprintln!("\n=== Diagnostics ===");
        for e in &run.excluded {
            eprintln!("  excluded {}: {}", e.symbol, e.reason);
        }
        for f in &run.failed_folds {
            eprintln!("  failed {} fold {}: {}", f.symbol, f.fold, f.reason);
        }
    }
}

fn print_plan(plan: &RunPlan) {
    eprintln!("\nPlanned folds:");
    for p in &plan.prepared {
        let first = p.folds.first().map(|f| f.eval_start.to_rfc3339());
        let last = p.folds.last().map(|f| f.eval_end.to_rfc3339());
        eprintln!(
            "  {}: {} bars, {} folds, evaluating {} to {}",
            p.symbol(),
            p.labeled.series.len(),
            p.folds.len(),
            first.as_deref().unwrap_or("-"),
            last.as_deref().unwrap_or("-"),
        );
    }
    for e in &plan.excluded {
        eprintln!("  excluded {}: {}", e.symbol, e.reason);
    }
}

pub fn run_dry_run(config_path: &Path, symbols_override: Option<&str>) -> Result<(), ForecastError> {
    let setup = setup(config_path, symbols_override)?;
    let models = SnapshotModelProvider::from_file(&setup.model_path)?;
    eprintln!("Config validated successfully");
    eprintln!("  calendar: {}", setup.calendar.name());
    eprintln!("  symbols:  {}", setup.symbols.join(", "));
    eprintln!("  models:   {}", models.versions().join(", "));

    let plan = plan_run(&setup.run_config, &setup.symbols, &setup.data, &setup.calendar)?;
    print_plan(&plan);
    eprintln!(
        "\nDry run complete: {} tasks across {} symbols",
        plan.task_count(),
        plan.prepared.len()
    );
    Ok(())
}

fn run_validate(config_path: &Path) -> Result<(), ForecastError> {
    eprintln!("Validating config: {}", config_path.display());
    let setup = setup(config_path, None)?;
    let models = SnapshotModelProvider::from_file(&setup.model_path)?;
    if models.is_empty() {
        return Err(ForecastError::config_invalid(
            "model",
            "path",
            "model file contains no snapshots",
        ));
    }
    eprintln!("  calendar:  {}", setup.calendar.name());
    eprintln!("  symbols:   {}", setup.symbols.len());
    eprintln!("  groups:    {}", setup.groups.len());
    eprintln!("  snapshots: {}", models.len());
    eprintln!("Configuration is valid");
    Ok(())
}

fn run_list_symbols(config_path: &Path) -> Result<(), ForecastError> {
    let config = load_config(config_path)?;
    let calendar = build_calendar(&config)?;
    let symbols = data_adapter(&config, &calendar)?.list_symbols()?;
    if symbols.is_empty() {
        eprintln!("No symbols found");
    } else {
        for symbol in &symbols {
            println!("{}", symbol);
        }
        eprintln!("{} symbols found", symbols.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    #[test]
    fn build_run_config_defaults() {
        let c = build_run_config(&adapter("[data]\npath = /d\n")).unwrap();
        assert_eq!(c, RunConfig::default());
    }

    #[test]
    fn build_run_config_reads_every_key() {
        let c = build_run_config(&adapter(
            "[run]\n\
             neutral_threshold = 1.0\n\
             neutral_threshold_down = 0.5\n\
             min_train_bars = 60\n\
             eval_window_bars = 10\n\
             step_bars = 15\n\
             anchored = false\n\
             min_group_sample_count = 12\n\
             timeout_per_task_secs = 2.5\n\
             max_model_retries = 1\n\
             max_gap_days = 4\n\
             price_field = close\n",
        ))
        .unwrap();
        assert!((c.thresholds.up - 0.01).abs() < 1e-12);
        assert!((c.thresholds.down - 0.005).abs() < 1e-12);
        assert_eq!(c.walk_forward, WalkForward::new(60, 10).with_step(15).with_anchored(false));
        assert_eq!(c.min_group_sample_count, 12);
        assert_eq!(c.simulation.timeout, Some(Duration::from_millis(2500)));
        assert_eq!(c.simulation.max_model_retries, 1);
        assert_eq!(c.max_gap_days, 4);
        assert_eq!(c.price_preference, PricePreference::Close);
    }

    #[test]
    fn timeout_per_task_sets_deadline() {
        let c = build_run_config(&adapter("[run]\ntimeout_per_task = 0.25\n")).unwrap();
        assert_eq!(c.simulation.timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn data_adapter_reads_in_calendar_zone() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("SPY.csv"),
            "datetime,open,high,low,close,volume\n2024-01-15,1,1,1,1,1\n",
        )
        .unwrap();
        let config = adapter(&format!("[data]\npath = {}\n", dir.path().display()));
        let calendar = ExchangeCalendar::nyse();
        let bars = data_adapter(&config, &calendar)
            .unwrap()
            .fetch_bars("SPY")
            .unwrap();
        assert_eq!(
            calendar.local_date(bars[0].timestamp),
            chrono::NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
    }

    #[test]
    fn zero_timeout_disables_deadline() {
        let c = build_run_config(&adapter("[run]\ntimeout_per_task_secs = 0\n")).unwrap();
        assert_eq!(c.simulation.timeout, None);
    }

    #[test]
    fn build_groups_from_section() {
        let groups = build_groups(&adapter("[groups]\ncrypto = BTC-USD, ETH-USD\n")).unwrap();
        assert_eq!(
            groups.get("crypto").unwrap(),
            &["BTC-USD".to_string(), "ETH-USD".to_string()]
        );
    }

    #[test]
    fn unknown_exchange_is_config_error() {
        let err = build_calendar(&adapter("[calendar]\nexchange = LSE\n")).unwrap_err();
        assert!(matches!(err, ForecastError::ConfigInvalid { .. }));
    }

    #[test]
    fn symbols_override_wins() {
        struct NoData;
        impl DataPort for NoData {
            fn fetch_bars(&self, _: &str) -> Result<Vec<crate::domain::bar::Bar>, ForecastError> {
                Ok(Vec::new())
            }
            fn list_symbols(&self) -> Result<Vec<String>, ForecastError> {
                Ok(vec!["ZZZ".into()])
            }
        }
        let config = adapter("[data]\nsymbols = SPY,QQQ\n");
        assert_eq!(
            resolve_symbols(Some("IWM"), &config, &NoData).unwrap(),
            vec!["IWM"]
        );
        assert_eq!(
            resolve_symbols(None, &config, &NoData).unwrap(),
            vec!["SPY", "QQQ"]
        );
        assert_eq!(
            resolve_symbols(None, &adapter("[data]\n"), &NoData).unwrap(),
            vec!["ZZZ"]
        );
    }
}
