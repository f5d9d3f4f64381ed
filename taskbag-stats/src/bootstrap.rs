//! Bootstrap Resampling
//!
//! Confidence intervals for the mean of a drawn subset. Supports the
//! percentile, pivotal (basic) and BCa (Bias-Corrected and Accelerated)
//! intervals. Resampling is either driven by the thread-local RNG or, when a
//! seed is supplied, by one derived generator per iteration so parallel and
//! serial runs produce the same interval.

use crate::summary::mean;
use crate::{BCA_THRESHOLD, DEFAULT_BOOTSTRAP_ITERATIONS, DEFAULT_CONFIDENCE_LEVEL};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng, thread_rng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Minimum number of values a bootstrap is computed over
pub const MIN_BOOTSTRAP_SAMPLES: usize = 3;

/// Interval construction requested by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IntervalMethod {
    /// BCa below [`BCA_THRESHOLD`] values, percentile above
    #[default]
    Auto,
    /// Quantiles of the bootstrap distribution
    Percentile,
    /// Reflect the bootstrap quantiles around the point estimate
    Pivotal,
    /// Bias-corrected and accelerated
    Bca,
}

impl std::str::FromStr for IntervalMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(IntervalMethod::Auto),
            "percentile" => Ok(IntervalMethod::Percentile),
            "pivotal" | "basic" => Ok(IntervalMethod::Pivotal),
            "bca" => Ok(IntervalMethod::Bca),
            other => Err(format!("Unknown interval method: {}", other)),
        }
    }
}

/// Bootstrap configuration
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Number of bootstrap iterations (default: 10,000)
    pub iterations: usize,
    /// Confidence level (default: 0.95 for 95% CI)
    pub confidence_level: f64,
    /// Whether to use parallel computation
    pub parallel: bool,
    /// Interval construction
    pub method: IntervalMethod,
    /// Seed for reproducible resampling; `None` uses the thread-local RNG
    pub seed: Option<u64>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_BOOTSTRAP_ITERATIONS,
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
            parallel: true,
            method: IntervalMethod::Auto,
            seed: None,
        }
    }
}

/// Which bootstrap method was used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootstrapMethod {
    /// Standard percentile method
    Percentile,
    /// Basic (pivotal) method
    Pivotal,
    /// BCa method
    Bca,
}

impl fmt::Display for BootstrapMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapMethod::Percentile => write!(f, "percentile"),
            BootstrapMethod::Pivotal => write!(f, "pivotal"),
            BootstrapMethod::Bca => write!(f, "bca"),
        }
    }
}

/// Confidence interval bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceInterval {
    /// Lower bound
    pub lower: f64,
    /// Upper bound
    pub upper: f64,
    /// Confidence level the bounds were computed at
    pub level: f64,
}

impl ConfidenceInterval {
    /// Whether `value` lies within the bounds (inclusive)
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// Result of bootstrap analysis
#[derive(Debug, Clone)]
pub struct BootstrapResult {
    /// Point estimate (sample mean)
    pub point_estimate: f64,
    /// Confidence interval
    pub confidence_interval: ConfidenceInterval,
    /// Standard error of the mean
    pub standard_error: f64,
    /// Which method was used
    pub method: BootstrapMethod,
    /// Warning message if any
    pub warning: Option<String>,
}

/// Errors that can occur during bootstrap
#[derive(Debug, Error, PartialEq)]
pub enum BootstrapError {
    #[error("Not enough samples: got {got}, need at least {min}")]
    NotEnoughSamples { got: usize, min: usize },

    #[error("Invalid confidence level: {0} (must be between 0 and 1)")]
    InvalidConfidenceLevel(f64),

    #[error("Bootstrap needs at least one iteration")]
    NoIterations,
}

/// Compute a bootstrap confidence interval for the mean of `samples`
pub fn compute_bootstrap(
    samples: &[f64],
    config: &BootstrapConfig,
) -> Result<BootstrapResult, BootstrapError> {
    if samples.len() < MIN_BOOTSTRAP_SAMPLES {
        return Err(BootstrapError::NotEnoughSamples {
            got: samples.len(),
            min: MIN_BOOTSTRAP_SAMPLES,
        });
    }

    if config.confidence_level <= 0.0 || config.confidence_level >= 1.0 {
        return Err(BootstrapError::InvalidConfidenceLevel(
            config.confidence_level,
        ));
    }

    if config.iterations == 0 {
        return Err(BootstrapError::NoIterations);
    }

    let n = samples.len();
    let point_estimate = mean(samples).unwrap_or(0.0);

    let method = match config.method {
        IntervalMethod::Auto if n < BCA_THRESHOLD => BootstrapMethod::Bca,
        IntervalMethod::Auto | IntervalMethod::Percentile => BootstrapMethod::Percentile,
        IntervalMethod::Pivotal => BootstrapMethod::Pivotal,
        IntervalMethod::Bca => BootstrapMethod::Bca,
    };

    // A constant sample has a degenerate bootstrap distribution
    if samples.iter().all(|&x| x == samples[0]) {
        return Ok(BootstrapResult {
            point_estimate,
            confidence_interval: ConfidenceInterval {
                lower: point_estimate,
                upper: point_estimate,
                level: config.confidence_level,
            },
            standard_error: 0.0,
            method,
            warning: Some("All samples have identical values".to_string()),
        });
    }

    let mut bootstrap_means = match (config.parallel, config.seed) {
        (true, Some(seed)) => seeded_means_parallel(samples, config.iterations, seed),
        (false, Some(seed)) => seeded_means_serial(samples, config.iterations, seed),
        (true, None) => unseeded_means_parallel(samples, config.iterations),
        (false, None) => {
            let mut rng = thread_rng();
            (0..config.iterations)
                .map(|_| resample_mean(samples, &mut rng))
                .collect()
        }
    };

    let bootstrap_mean = mean(&bootstrap_means).unwrap_or(point_estimate);
    let standard_error = (bootstrap_means
        .iter()
        .map(|x| (x - bootstrap_mean).powi(2))
        .sum::<f64>()
        / bootstrap_means.len() as f64)
        .sqrt();

    bootstrap_means.sort_by(f64::total_cmp);

    let (lower, upper) = match method {
        BootstrapMethod::Percentile => percentile_interval(&bootstrap_means, config.confidence_level),
        BootstrapMethod::Pivotal => {
            let (lo, hi) = percentile_interval(&bootstrap_means, config.confidence_level);
            (2.0 * point_estimate - hi, 2.0 * point_estimate - lo)
        }
        BootstrapMethod::Bca => bca_interval(samples, &bootstrap_means, config.confidence_level),
    };

    let warning = if n < 10 {
        Some("Very small sample size may lead to unreliable estimates".to_string())
    } else {
        None
    };

    Ok(BootstrapResult {
        point_estimate,
        confidence_interval: ConfidenceInterval {
            lower,
            upper,
            level: config.confidence_level,
        },
        standard_error,
        method,
        warning,
    })
}

/// Mean of one resample drawn with replacement
fn resample_mean<R: Rng + ?Sized>(samples: &[f64], rng: &mut R) -> f64 {
    let n = samples.len();
    let mut sum = 0.0;
    for _ in 0..n {
        sum += samples[rng.gen_range(0..n)];
    }
    sum / n as f64
}

/// Seed of iteration `i`, spread with the SplitMix64 finalizer
fn iteration_seed(seed: u64, i: usize) -> u64 {
    let mut z = seed.wrapping_add((i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn seeded_means_parallel(samples: &[f64], iterations: usize, seed: u64) -> Vec<f64> {
    (0..iterations)
        .into_par_iter()
        .map(|i| resample_mean(samples, &mut StdRng::seed_from_u64(iteration_seed(seed, i))))
        .collect()
}

fn seeded_means_serial(samples: &[f64], iterations: usize, seed: u64) -> Vec<f64> {
    (0..iterations)
        .map(|i| resample_mean(samples, &mut StdRng::seed_from_u64(iteration_seed(seed, i))))
        .collect()
}

fn unseeded_means_parallel(samples: &[f64], iterations: usize) -> Vec<f64> {
    (0..iterations)
        .into_par_iter()
        .map_init(thread_rng, |rng, _| resample_mean(samples, rng))
        .collect()
}

/// Percentile interval over an already sorted bootstrap distribution
fn percentile_interval(sorted: &[f64], confidence: f64) -> (f64, f64) {
    let n = sorted.len();
    let alpha = (1.0 - confidence) / 2.0;

    let lower_idx = ((alpha * n as f64).floor() as usize).min(n - 1);
    let upper_idx = (((1.0 - alpha) * n as f64).floor() as usize).min(n - 1);

    (sorted[lower_idx], sorted[upper_idx])
}

/// BCa interval over an already sorted bootstrap distribution
fn bca_interval(samples: &[f64], sorted: &[f64], confidence: f64) -> (f64, f64) {
    let n = samples.len();
    let b = sorted.len();
    let theta_hat = mean(samples).unwrap_or(0.0);

    // Bias correction
    let below = sorted.partition_point(|&x| x < theta_hat);
    let z0 = normal_quantile((below as f64 / b as f64).clamp(0.0001, 0.9999));

    // Acceleration via jackknife; leave-one-out means come from the total
    let total: f64 = samples.iter().sum();
    let jackknife: Vec<f64> = samples
        .iter()
        .map(|&x| (total - x) / (n - 1) as f64)
        .collect();
    let jack_mean = mean(&jackknife).unwrap_or(0.0);
    let num: f64 = jackknife.iter().map(|x| (jack_mean - x).powi(3)).sum();
    let den: f64 = jackknife.iter().map(|x| (jack_mean - x).powi(2)).sum();
    let a = if den.abs() < 1e-12 {
        0.0
    } else {
        num / (6.0 * den.powf(1.5))
    };

    let alpha = (1.0 - confidence) / 2.0;
    let adjusted = |z: f64| normal_cdf(z0 + (z0 + z) / (1.0 - a * (z0 + z)));
    let alpha1 = adjusted(normal_quantile(alpha));
    let alpha2 = adjusted(normal_quantile(1.0 - alpha));

    let lower_idx = ((alpha1 * b as f64).floor() as usize).min(b - 1);
    let upper_idx = ((alpha2 * b as f64).floor() as usize).min(b - 1);

    (sorted[lower_idx], sorted[upper_idx])
}

/// Standard normal quantile (Abramowitz and Stegun 26.2.23)
pub(crate) fn normal_quantile(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let (sign, q) = if p < 0.5 { (-1.0, p) } else { (1.0, 1.0 - p) };
    let t = (-2.0 * q.max(1e-300).ln()).sqrt();

    const C: [f64; 3] = [2.515517, 0.802853, 0.010328];
    const D: [f64; 3] = [1.432788, 0.189269, 0.001308];

    let x = t - (C[0] + C[1] * t + C[2] * t * t) / (1.0 + D[0] * t + D[1] * t * t + D[2] * t * t * t);
    sign * x
}

/// Standard normal CDF
pub(crate) fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Error function (Abramowitz and Stegun 7.1.26)
fn erf(x: f64) -> f64 {
    const A: [f64; 5] = [
        0.254829592,
        -0.284496736,
        1.421413741,
        -1.453152027,
        1.061405429,
    ];
    const P: f64 = 0.3275911;

    let sign = x.signum();
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let poly = A.iter().rev().fold(0.0, |acc, &c| acc * t + c) * t;

    sign * (1.0 - poly * (-x * x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<f64> {
        (0..n).map(|x| x as f64).collect()
    }

    #[test]
    fn test_interval_method_parsing() {
        assert_eq!("Pivotal".parse(), Ok(IntervalMethod::Pivotal));
        assert_eq!("bca".parse(), Ok(IntervalMethod::Bca));
        assert!("jackknife".parse::<IntervalMethod>().is_err());
    }

    #[test]
    fn test_interval_brackets_mean() {
        let samples = ramp(200);
        let config = BootstrapConfig {
            iterations: 1000,
            seed: Some(7),
            ..Default::default()
        };

        let result = compute_bootstrap(&samples, &config).unwrap();

        assert!((result.point_estimate - 99.5).abs() < 1e-12);
        assert!(result.confidence_interval.contains(result.point_estimate));
        assert!(result.confidence_interval.lower < result.point_estimate);
        assert_eq!(result.method, BootstrapMethod::Percentile);
    }

    #[test]
    fn test_auto_selects_bca_for_small_samples() {
        let samples = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let config = BootstrapConfig {
            iterations: 1000,
            seed: Some(1),
            ..Default::default()
        };

        let result = compute_bootstrap(&samples, &config).unwrap();
        assert_eq!(result.method, BootstrapMethod::Bca);
        assert!(result.warning.is_some());
    }

    #[test]
    fn test_pivotal_interval_reflects_percentiles() {
        let samples = ramp(150);
        let base = BootstrapConfig {
            iterations: 2000,
            seed: Some(99),
            parallel: false,
            ..Default::default()
        };
        let pct = compute_bootstrap(
            &samples,
            &BootstrapConfig {
                method: IntervalMethod::Percentile,
                ..base.clone()
            },
        )
        .unwrap();
        let piv = compute_bootstrap(
            &samples,
            &BootstrapConfig {
                method: IntervalMethod::Pivotal,
                ..base
            },
        )
        .unwrap();

        let theta = pct.point_estimate;
        let ci = pct.confidence_interval;
        assert_eq!(piv.method, BootstrapMethod::Pivotal);
        assert!((piv.confidence_interval.lower - (2.0 * theta - ci.upper)).abs() < 1e-9);
        assert!((piv.confidence_interval.upper - (2.0 * theta - ci.lower)).abs() < 1e-9);
    }

    #[test]
    fn test_seeded_parallel_matches_serial() {
        let samples = ramp(120);
        let parallel = BootstrapConfig {
            iterations: 500,
            seed: Some(23),
            parallel: true,
            ..Default::default()
        };
        let serial = BootstrapConfig {
            parallel: false,
            ..parallel.clone()
        };

        let a = compute_bootstrap(&samples, &parallel).unwrap();
        let b = compute_bootstrap(&samples, &serial).unwrap();
        assert_eq!(a.confidence_interval, b.confidence_interval);
        assert_eq!(a.standard_error, b.standard_error);
    }

    #[test]
    fn test_identical_values_collapse_interval() {
        let samples = vec![10.0; 50];
        let result = compute_bootstrap(&samples, &BootstrapConfig::default()).unwrap();
        assert_eq!(result.confidence_interval.lower, 10.0);
        assert_eq!(result.confidence_interval.upper, 10.0);
        assert_eq!(result.standard_error, 0.0);
    }

    #[test]
    fn test_not_enough_samples() {
        let result = compute_bootstrap(&[1.0, 2.0], &BootstrapConfig::default());
        assert_eq!(
            result.unwrap_err(),
            BootstrapError::NotEnoughSamples { got: 2, min: 3 }
        );
    }

    #[test]
    fn test_invalid_confidence_level() {
        let config = BootstrapConfig {
            confidence_level: 1.0,
            ..Default::default()
        };
        assert!(matches!(
            compute_bootstrap(&ramp(10), &config),
            Err(BootstrapError::InvalidConfidenceLevel(_))
        ));
    }

    #[test]
    fn test_normal_quantile() {
        assert!(normal_quantile(0.5).abs() < 0.01);
        assert!((normal_quantile(0.975) - 1.96).abs() < 0.01);
        assert!((normal_quantile(0.025) + 1.96).abs() < 0.01);
    }

    #[test]
    fn test_normal_cdf() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 0.01);
        assert!((normal_cdf(1.96) - 0.975).abs() < 0.01);
        assert!((normal_cdf(-1.96) - 0.025).abs() < 0.01);
    }
}
