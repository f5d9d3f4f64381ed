//! Case orchestration
//!
//! The two workloads the command surface exposes:
//!
//! - **distance**: every pairwise Euclidean distance of a sample of vectors,
//!   aggregated in identity mode (the full matrix).
//! - **bmi**: the mean body-mass index of a population, either exact
//!   (sequential or parallel, mean mode) or approximate (bootstrap).
//!
//! The worker count picks the strategy: `1` runs sequentially, more than one
//! runs in parallel, threads or processes depending on the isolation mode.

use super::isolated::IsolatedExecutor;
use super::report::{RunContext, report_from_estimate, report_from_outcome};
use crate::config::IsolationMode;
use crate::sample::{draw_population, draw_vectors, population_size};
use crate::store::{SampleStore, sample_name};
use crate::supervisor::Supervisor;
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use taskbag_core::{
    AggregationMode, Calibration, EstimatorConfig, ParallelExecutor, RunOutcome, Runner, Sample,
    SequentialExecutor, TaskKind, TaskSequence, estimate_bootstrap, worker_count,
};
use taskbag_report::RunReport;

/// Execution settings shared by every case
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Where parallel partitions run
    pub isolation: IsolationMode,
    /// Timeout of one worker process
    pub worker_timeout: Duration,
    /// Overall deadline of a thread-parallel run
    pub deadline: Option<Duration>,
    /// Re-executions of a failed partition in a thread-parallel run
    pub max_retries: u32,
    /// Per-worker partition size adjustments
    pub calibration: Calibration,
    /// Seed of the sample generator and of the estimator draws
    pub seed: u64,
    /// Approximate estimator settings
    pub estimator: EstimatorConfig,
    /// Show a progress bar while worker processes run
    pub progress: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            isolation: IsolationMode::default(),
            worker_timeout: Duration::from_secs(60),
            deadline: None,
            max_retries: 0,
            calibration: Calibration::zero(),
            seed: crate::sample::DEFAULT_SEED,
            estimator: EstimatorConfig::default(),
            progress: false,
        }
    }
}

/// How the bmi case treats its core count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BmiMode {
    /// Draw and persist the sample, compute nothing
    Store,
    /// Bootstrap estimate from a bounded resample
    Approximate,
    /// Exact mean over `workers` workers
    Exact { workers: usize },
}

impl BmiMode {
    /// Negative counts store, zero approximates, positive counts run exactly
    pub fn from_cores(cores: i64) -> Self {
        match cores {
            c if c < 0 => BmiMode::Store,
            0 => BmiMode::Approximate,
            c => BmiMode::Exact {
                workers: c as usize,
            },
        }
    }
}

/// Pairwise distance matrix over `size` vectors of `dims` components
pub fn run_distance(
    settings: &RunSettings,
    cores: i64,
    size: usize,
    dims: usize,
) -> anyhow::Result<RunReport> {
    let workers = worker_count(cores)?;
    let mut rng = StdRng::seed_from_u64(settings.seed);

    tracing::info!("Drawing a sample with {size} {dims}D-vectors.");
    let sample = draw_vectors(size, dims, &mut rng);

    run_exact(
        settings,
        "distance",
        sample,
        TaskKind::EuclideanDistance,
        AggregationMode::Identity,
        workers,
    )
}

/// Mean body-mass index of a population of `millions` million individuals.
///
/// Returns `None` when the run only stored the sample.
pub fn run_bmi(
    settings: &RunSettings,
    store: &SampleStore,
    cores: i64,
    millions: f64,
    resample_size: Option<usize>,
    stored: bool,
) -> anyhow::Result<Option<RunReport>> {
    let mode = BmiMode::from_cores(cores);
    let name = sample_name(millions);
    let mut rng = StdRng::seed_from_u64(settings.seed);

    let sample = if stored && mode != BmiMode::Store {
        tracing::info!("Recovering a sample with {millions} million individuals.");
        store.load(&name)?
    } else {
        tracing::info!("Drawing a sample with {millions} million individuals.");
        draw_population(population_size(millions), &mut rng)
    };

    match mode {
        BmiMode::Store => {
            tracing::info!("Saving the sample.");
            let path = store.save(&name, &sample)?;
            tracing::info!(path = %path.display(), "sample stored");
            Ok(None)
        }
        BmiMode::Approximate => {
            let config = EstimatorConfig {
                resample_size: resample_size.unwrap_or(settings.estimator.resample_size),
                seed: settings.estimator.seed.or(Some(settings.seed)),
                ..settings.estimator.clone()
            };
            let tasks = TaskSequence::from_sample(&sample);
            tracing::info!(
                "Sequential execution started (using an approximate solver with {} points).",
                config.resample_size.min(config.cap)
            );
            let estimate = estimate_bootstrap(&tasks, &TaskKind::BodyMassIndex, &config, &mut rng)?;
            tracing::info!("Sequential execution completed.");

            let context = RunContext {
                case: "bmi",
                isolation: "none",
                tasks: tasks.len(),
            };
            Ok(Some(report_from_estimate(context, &estimate)))
        }
        BmiMode::Exact { workers } => run_exact(
            settings,
            "bmi",
            sample,
            TaskKind::BodyMassIndex,
            AggregationMode::Mean,
            workers,
        )
        .map(Some),
    }
}

/// Run `kind` over every task of `sample` with the strategy `workers` selects
fn run_exact(
    settings: &RunSettings,
    case: &'static str,
    sample: Sample,
    kind: TaskKind,
    mode: AggregationMode,
    workers: usize,
) -> anyhow::Result<RunReport> {
    let tasks = TaskSequence::from_sample(&sample);
    let pid = std::process::id();

    let (outcome, isolation): (RunOutcome<f64>, &'static str) = if workers == 1 {
        tracing::info!("Sequential execution started (process {pid}).");
        let outcome = Runner::new(SequentialExecutor, mode).run(&tasks, &kind)?;
        (outcome, "none")
    } else if settings.isolation.is_isolated() {
        tracing::info!("Parallel execution started with {workers} processes spawned from {pid}.");
        let bar = progress_bar(settings.progress, tasks.len());
        let mut supervisor = Supervisor::new(settings.worker_timeout, workers);
        if let Some(bar) = &bar {
            supervisor = supervisor.with_progress(bar.clone());
        }
        let strategy = IsolatedExecutor::new(Arc::new(sample), workers, supervisor)
            .with_calibration(settings.calibration.clone());
        let outcome = Runner::new(strategy, mode).run(&tasks, &kind);
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
        (outcome?, IsolationMode::Process.as_str())
    } else {
        tracing::info!("Parallel execution started with {workers} threads in process {pid}.");
        let strategy = ParallelExecutor::new(workers)
            .with_calibration(settings.calibration.clone())
            .with_max_retries(settings.max_retries)
            .with_deadline(settings.deadline);
        let outcome = Runner::new(strategy, mode).run(&tasks, &kind)?;
        (outcome, IsolationMode::Thread.as_str())
    };

    if workers == 1 {
        tracing::info!("Sequential execution completed.");
    } else {
        tracing::info!("Parallel execution completed.");
    }

    let context = RunContext {
        case,
        isolation,
        tasks: tasks.len(),
    };
    Ok(report_from_outcome(context, &outcome))
}

fn progress_bar(enabled: bool, len: usize) -> Option<ProgressBar> {
    if !enabled {
        return None;
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_message("tasks");
    Some(pb)
}
