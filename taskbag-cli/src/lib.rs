#![warn(missing_docs)]
//! Taskbag CLI Library
//!
//! Command surface, configuration and process supervision for the `taskbag`
//! binary. `main` only has to call [`run`]; the same binary re-executes
//! itself with `--taskbag-worker` to host isolated worker processes.
//!
//! # Example
//!
//! ```text
//! taskbag distance 4 2000 2        # 4 workers, 2000 2D vectors
//! taskbag bmi 0 10 5000            # bootstrap estimate over 10M people
//! taskbag --isolated=false bmi 8 10
//! ```

mod config;
mod executor;
mod sample;
mod store;
mod supervisor;

pub use config::*;
pub use executor::{
    BmiMode, IsolatedExecutor, PREVIEW_LEN, RunContext, RunSettings, build_report_meta, num_cpus,
    report_from_estimate, report_from_outcome, run_bmi, run_distance,
};
pub use sample::{DEFAULT_SEED, HEIGHT_CM, WEIGHT_KG, draw_population, draw_vectors, population_size};
pub use store::{SampleStore, StoreError, sample_name};
pub use supervisor::*;

use clap::{Parser, Subcommand};
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use taskbag_core::{Calibration, EstimatorConfig, WorkerMain};
use taskbag_report::{OutputFormat, RunReport};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;

/// Timestamp layout of every log line
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Taskbag CLI arguments
#[derive(Parser, Debug)]
#[command(name = "taskbag")]
#[command(author, version, about = "Taskbag - static bag-of-tasks parallel executor")]
pub struct Cli {
    /// Case to run
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Output format: human, json, csv
    #[arg(long, global = true)]
    pub format: Option<String>,

    /// Output file (stdout if not specified)
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// Run parallel partitions in worker processes (true) or pool threads (false)
    #[arg(long, global = true)]
    pub isolated: Option<bool>,

    /// Timeout of one worker process, e.g. "60s"
    #[arg(long, global = true)]
    pub worker_timeout: Option<String>,

    /// Overall deadline of a thread-parallel run, e.g. "10m"
    #[arg(long, global = true)]
    pub deadline: Option<String>,

    /// Per-worker partition size adjustments, e.g. "-2,1,1"
    #[arg(long, global = true, allow_hyphen_values = true)]
    pub calibration: Option<String>,

    /// Times a failed partition is re-executed (thread mode)
    #[arg(long, global = true)]
    pub retries: Option<u32>,

    /// Seed of the sample generator
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Internal: Run as worker process (used by supervisor)
    #[arg(long, hide = true)]
    pub taskbag_worker: bool,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pairwise Euclidean distance matrix of a sample of vectors
    Distance {
        /// Worker count: 1 sequential, more than 1 parallel
        #[arg(allow_negative_numbers = true)]
        cores: i64,
        /// Number of vectors
        size: usize,
        /// Dimensionality of each vector (defaults to the configured value)
        dims: Option<usize>,
    },
    /// Mean body-mass index of a population
    Bmi {
        /// Worker count: negative stores the sample, 0 estimates, 1 sequential, more parallel
        #[arg(allow_negative_numbers = true)]
        cores: i64,
        /// Population size, in millions
        millions: f64,
        /// Resample size of the approximate estimator
        resample: Option<usize>,
        /// Load the persisted sample instead of drawing a new one
        #[arg(long)]
        stored: bool,
    },
    /// Print a default taskbag.toml
    Init,
}

/// Run the Taskbag CLI with the process arguments.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_with_cli(cli)
}

/// Run the Taskbag CLI with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    // Handle worker mode first (before any other initialization)
    if cli.taskbag_worker {
        init_tracing("taskbag=warn");
        return run_worker_mode();
    }

    init_tracing(if cli.verbose {
        "taskbag=debug"
    } else {
        "taskbag=info"
    });

    // Discover taskbag.toml configuration (CLI flags override)
    let config = TaskbagConfig::discover().unwrap_or_default();

    let Some(command) = &cli.command else {
        anyhow::bail!("no case given; run `taskbag --help` for usage");
    };

    if let Commands::Init = command {
        print!("{}", TaskbagConfig::default_toml());
        return Ok(());
    }

    let format: OutputFormat = cli
        .format
        .as_deref()
        .unwrap_or(&config.output.format)
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let report = match command {
        Commands::Init => None,
        Commands::Distance { cores, size, dims } => {
            let settings = build_settings(&cli, &config)?;
            let dims = dims.unwrap_or(config.sample.dimensions);
            Some(run_distance(&settings, *cores, *size, dims)?)
        }
        Commands::Bmi {
            cores,
            millions,
            resample,
            stored,
        } => {
            let settings = build_settings(&cli, &config)?;
            let store = SampleStore::new(&config.sample.store_directory);
            run_bmi(&settings, &store, *cores, *millions, *resample, *stored)?
        }
    };

    if let Some(report) = report {
        emit_report(&cli, &config, format, &report)?;
    }
    Ok(())
}

/// Install the global subscriber; log lines go to stderr so stdout carries
/// only the report.
fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Run as a worker process (IPC mode)
fn run_worker_mode() -> anyhow::Result<()> {
    let mut worker = WorkerMain::new();
    worker
        .run()
        .map_err(|e| anyhow::anyhow!("Worker error: {}", e))
}

/// Merge command-line flags over the configuration file
fn build_settings(cli: &Cli, config: &TaskbagConfig) -> anyhow::Result<RunSettings> {
    let isolation = match cli.isolated {
        Some(true) => IsolationMode::Process,
        Some(false) => IsolationMode::Thread,
        None => config.runner.isolation,
    };

    let worker_timeout = match &cli.worker_timeout {
        Some(s) => TaskbagConfig::parse_duration(s)?,
        None => config.worker_timeout()?,
    };

    let deadline = match &cli.deadline {
        Some(s) => Some(TaskbagConfig::parse_duration(s)?),
        None => config.deadline()?,
    };

    let calibration = match &cli.calibration {
        Some(s) => s.parse::<Calibration>()?,
        None => Calibration::new(config.runner.calibration.clone()),
    };

    let method = config
        .estimator
        .method
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    Ok(RunSettings {
        isolation,
        worker_timeout,
        deadline,
        max_retries: cli.retries.unwrap_or(config.runner.max_retries),
        calibration,
        seed: cli.seed.unwrap_or(config.sample.seed),
        estimator: EstimatorConfig {
            resample_size: config.estimator.resample_size,
            alpha: config.estimator.alpha,
            cap: config.estimator.cap,
            bootstrap_iterations: config.estimator.bootstrap_iterations,
            method,
            seed: None,
        },
        progress: std::io::stderr().is_terminal(),
    })
}

/// Render the report and write it to `--output` or stdout
fn emit_report(
    cli: &Cli,
    config: &TaskbagConfig,
    format: OutputFormat,
    report: &RunReport,
) -> anyhow::Result<()> {
    let output = format.render(report)?;

    if let Some(path) = &cli.output {
        let path = match &config.output.directory {
            Some(dir) if path.is_relative() => PathBuf::from(dir).join(path),
            _ => path.clone(),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&path)?;
        file.write_all(output.as_bytes())?;
        tracing::info!("Report written to: {}", path.display());
    } else {
        print!("{}", output);
    }
    Ok(())
}
