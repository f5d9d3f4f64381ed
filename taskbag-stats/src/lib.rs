#![warn(missing_docs)]
//! Taskbag Statistical Engine
//!
//! Statistics over task results:
//! - Arithmetic mean with a fixed summation order (reduction mode)
//! - Summary statistics and percentiles for reports
//! - Bootstrap confidence intervals (percentile, pivotal, BCa) with an
//!   optional seed for reproducible resampling

mod bootstrap;
mod percentiles;
mod summary;

pub use bootstrap::{
    BootstrapConfig, BootstrapError, BootstrapMethod, BootstrapResult, ConfidenceInterval,
    IntervalMethod, MIN_BOOTSTRAP_SAMPLES, compute_bootstrap,
};
pub use percentiles::{Percentiles, compute_percentile, compute_percentiles, percentile_of_sorted};
pub use summary::{SummaryStatistics, compute_summary, mean};

/// Threshold below which BCa method is used instead of percentile
pub const BCA_THRESHOLD: usize = 100;

/// Default number of bootstrap iterations
pub const DEFAULT_BOOTSTRAP_ITERATIONS: usize = 10_000;

/// Default confidence level (95%)
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(BCA_THRESHOLD, 100);
        assert_eq!(DEFAULT_BOOTSTRAP_ITERATIONS, 10_000);
        assert!((DEFAULT_CONFIDENCE_LEVEL - 0.95).abs() < f64::EPSILON);
    }
}
