//! Forecast backtest CLI.
//!
//! # Usage
//!
//! ```bash
//! # Run every model in a config
//! forecast-backtest run --config config/backtest.toml
//!
//! # Show the task grid and resolved predictors without running
//! forecast-backtest grid --config config/backtest.toml
//!
//! # Error summary of a cached result file
//! forecast-backtest summary --results results/ridge.json
//! ```

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use forecast_backtest::cache::ResultCache;
use forecast_backtest::config::BacktestConfig;
use forecast_backtest::data::{DataLoader, PreparedDataset};
use forecast_backtest::metrics::MetricsCalculator;
use forecast_backtest::walkforward::{Evaluation, WalkForwardBacktest, WorkerPool};

const SEPARATOR: &str = "============================================================";

#[derive(Parser)]
#[command(name = "forecast-backtest")]
#[command(about = "Walk-forward backtesting for hourly day-ahead forecasts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every model in a configuration file
    Run {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Write all results, keyed by model name, to this JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Hide the progress bar
        #[arg(long)]
        quiet: bool,
    },

    /// Show the task grid each model would run
    Grid {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Print error metrics for a cached result file
    Summary {
        /// Path to a result cache artifact
        #[arg(short, long)]
        results: PathBuf,
    },
}

fn load_prepared(config: &BacktestConfig) -> Result<PreparedDataset> {
    let dataset = DataLoader::new(&config.timestamp_column)
        .load(&config.data)
        .with_context(|| format!("Failed to load {}", config.data.display()))?;
    println!(
        "Loaded {} rows x {} columns from {}",
        dataset.nrows(),
        dataset.ncols(),
        config.data.display()
    );
    config
        .preparer()
        .prepare(dataset)
        .context("Failed to prepare dataset")
}

fn backtest(config: &BacktestConfig, show_progress: bool) -> Result<WalkForwardBacktest> {
    let pool = WorkerPool::new(config.workers, config.threads_per_task, config.failure_policy)
        .context("Failed to build worker pool")?
        .with_progress(show_progress);
    Ok(WalkForwardBacktest::new(config.period(), pool))
}

fn cmd_run(config_path: PathBuf, output: Option<PathBuf>, quiet: bool) -> Result<()> {
    let config = BacktestConfig::from_file(&config_path)?;
    let prepared = load_prepared(&config)?;
    let backtest = backtest(&config, !quiet)?;

    println!("{}", SEPARATOR);
    println!(
        "Test period {} to {}, horizons 1..={}, {} model(s), {} worker(s)",
        config.test_start,
        config.test_end,
        config.horizon,
        config.models.len(),
        backtest.pool().workers()
    );
    println!("{}", SEPARATOR);

    let evaluation = config
        .model_specs()?
        .into_iter()
        .fold(Evaluation::new(backtest), Evaluation::with_model);

    let started = Instant::now();
    let report = evaluation.run(&prepared)?;
    println!("\nCompleted in {:.1}s", started.elapsed().as_secs_f64());

    for (name, results) in &report.results {
        println!("\n{}\nModel: {}\n{}", SEPARATOR, name, SEPARATOR);
        println!("{}", MetricsCalculator::calculate(results).summary());
        if let Some(failures) = report.failures.get(name) {
            println!("Skipped {} failed task(s):", failures.len());
            for failure in failures.iter().take(10) {
                println!("  {}", failure);
            }
        }
    }

    if let Some(path) = output {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&report.results)?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("\nResults written to {}", path.display());
    }

    Ok(())
}

fn cmd_grid(config_path: PathBuf) -> Result<()> {
    let config = BacktestConfig::from_file(&config_path)?;
    let prepared = load_prepared(&config)?;
    let backtest = backtest(&config, false)?;

    for model in config.model_specs()? {
        let grid = backtest
            .grid(&model, &prepared)
            .with_context(|| format!("Invalid grid for model '{}'", model.name))?;
        let first = grid.contexts().first();

        println!(
            "\n{}\nModel: {} ({})\n{}",
            SEPARATOR,
            model.name,
            model.strategy.name(),
            SEPARATOR
        );
        println!("Tasks:            {}", grid.len());
        println!("Issue days:       {}", grid.days());
        println!("Dataset offset:   day {}", grid.dataset_offset());
        println!("Training window:  {} day(s)", model.training_window);
        println!("Scaler:           {:?}", model.scaler_kind());
        if let Some(ctx) = first {
            println!("Target (d+1):     {}", ctx.target);
            println!("Predictors (hour 0, d+1):");
            for name in &ctx.predictors {
                println!("  {}", name);
            }
        }
        if let Some(days) = model.strategy.calibration_days() {
            println!("Calibration:      {} day(s) before the test period", days);
        }
    }

    Ok(())
}

fn cmd_summary(path: PathBuf) -> Result<()> {
    let results = ResultCache::new(&path)
        .load()?
        .with_context(|| format!("No result file at {}", path.display()))?;
    println!("{}", SEPARATOR);
    println!("{}", path.display());
    println!("{}", SEPARATOR);
    println!("{}", MetricsCalculator::calculate(&results).summary());

    let daily = MetricsCalculator::daily_mae(&results);
    if !daily.is_empty() {
        println!("Daily MAE:");
        for (day, mae) in daily {
            println!("  day {:<4} {:.4}", day, mae);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("forecast_backtest=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            output,
            quiet,
        } => cmd_run(config, output, quiet),
        Commands::Grid { config } => cmd_grid(config),
        Commands::Summary { results } => cmd_summary(results),
    }
}
