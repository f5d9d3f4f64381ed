//! Approximate estimator
//!
//! Instead of visiting every task, draw a bounded random subset, evaluate the
//! task function on it and bootstrap a confidence interval for the mean. The
//! result depends on the RNG handle passed in; no worker pool is involved.

use crate::function::{TaskError, TaskFunction};
use crate::task::TaskSequence;
use rand::Rng;
use std::time::{Duration, Instant};
use taskbag_stats::{
    BootstrapConfig, BootstrapError, BootstrapMethod, IntervalMethod, compute_bootstrap,
};
use thiserror::Error;

/// Upper bound on the number of tasks drawn, whatever the requested size
pub const RESAMPLE_CAP: usize = 10_000;

/// Estimator settings
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorConfig {
    /// Number of tasks to draw (before capping)
    pub resample_size: usize,
    /// Significance level; the interval has confidence `1 - alpha`
    pub alpha: f64,
    /// Hard limit on the number of tasks drawn
    pub cap: usize,
    /// Bootstrap iterations over the drawn subset
    pub bootstrap_iterations: usize,
    /// Interval construction
    pub method: IntervalMethod,
    /// Seed for the bootstrap resampling
    pub seed: Option<u64>,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            resample_size: RESAMPLE_CAP,
            alpha: 0.05,
            cap: RESAMPLE_CAP,
            bootstrap_iterations: taskbag_stats::DEFAULT_BOOTSTRAP_ITERATIONS,
            method: IntervalMethod::Pivotal,
            seed: None,
        }
    }
}

/// Point estimate with its confidence interval
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    /// Lower bound of the interval
    pub lower: f64,
    /// Mean of the drawn subset
    pub point: f64,
    /// Upper bound of the interval
    pub upper: f64,
    /// Confidence level of the interval
    pub confidence: f64,
    /// Number of tasks actually drawn
    pub drawn: usize,
    /// Interval construction used
    pub method: BootstrapMethod,
    /// Time spent drawing, evaluating and bootstrapping
    pub elapsed: Duration,
}

/// Errors raised by [`estimate_bootstrap`]
#[derive(Debug, Error)]
pub enum EstimateError {
    #[error("nothing to estimate: the task sequence or the resample is empty")]
    EmptyInput,

    #[error("alpha must lie strictly between 0 and 1, got {0}")]
    InvalidAlpha(f64),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
}

/// Estimate the mean of `f` over `tasks` from a random subset.
///
/// Draws `min(resample_size, cap)` tasks uniformly with replacement.
pub fn estimate_bootstrap<P, F, R>(
    tasks: &TaskSequence<P>,
    f: &F,
    config: &EstimatorConfig,
    rng: &mut R,
) -> Result<Estimate, EstimateError>
where
    F: TaskFunction<P> + ?Sized,
    F::Output: Into<f64>,
    R: Rng + ?Sized,
{
    if !(config.alpha > 0.0 && config.alpha < 1.0) {
        return Err(EstimateError::InvalidAlpha(config.alpha));
    }
    let drawn = config.resample_size.min(config.cap);
    if tasks.is_empty() || drawn == 0 {
        return Err(EstimateError::EmptyInput);
    }

    let start = Instant::now();
    let mut values = Vec::with_capacity(drawn);
    for _ in 0..drawn {
        let task = &tasks.as_slice()[rng.gen_range(0..tasks.len())];
        let value = f.apply(task.payload()).map_err(|e| e.at(task.id()))?;
        values.push(value.into());
    }
    tracing::debug!(drawn, function = f.name(), "resample evaluated");

    let bootstrap = compute_bootstrap(
        &values,
        &BootstrapConfig {
            iterations: config.bootstrap_iterations,
            confidence_level: 1.0 - config.alpha,
            parallel: false,
            method: config.method,
            seed: config.seed,
        },
    )?;

    Ok(Estimate {
        lower: bootstrap.confidence_interval.lower,
        point: bootstrap.point_estimate,
        upper: bootstrap.confidence_interval.upper,
        confidence: bootstrap.confidence_interval.level,
        drawn,
        method: bootstrap.method,
        elapsed: start.elapsed(),
    })
}
