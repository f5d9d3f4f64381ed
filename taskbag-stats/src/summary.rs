//! Summary Statistics
//!
//! Arithmetic mean and a compact description of a result distribution.

use crate::percentiles::percentile_of_sorted;
use serde::{Deserialize, Serialize};

/// Arithmetic mean with a plain left-to-right sum.
///
/// The summation order is fixed so a flattened parallel result reduces to the
/// same bits as the sequential one. `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sum = 0.0;
    for &v in values {
        sum += v;
    }
    Some(sum / values.len() as f64)
}

/// Summary of a set of task results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    /// Number of values
    pub count: usize,
    /// Arithmetic mean
    pub mean: f64,
    /// Sample standard deviation (n - 1)
    pub std_dev: f64,
    /// Smallest value
    pub min: f64,
    /// Largest value
    pub max: f64,
    /// Median
    pub p50: f64,
    /// 95th percentile
    pub p95: f64,
}

impl SummaryStatistics {
    /// Coefficient of variation in percent
    pub fn coefficient_of_variation(&self) -> f64 {
        if self.mean == 0.0 {
            0.0
        } else {
            (self.std_dev / self.mean).abs() * 100.0
        }
    }
}

/// Compute summary statistics; `None` for an empty slice
pub fn compute_summary(values: &[f64]) -> Option<SummaryStatistics> {
    let mean = mean(values)?;

    let std_dev = if values.len() < 2 {
        0.0
    } else {
        let ss: f64 = values.iter().map(|x| (x - mean).powi(2)).sum();
        (ss / (values.len() - 1) as f64).sqrt()
    };

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    Some(SummaryStatistics {
        count: values.len(),
        mean,
        std_dev,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        p50: percentile_of_sorted(&sorted, 50.0),
        p95: percentile_of_sorted(&sorted, 95.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[1.0, 2.0, 3.0, 4.0]), Some(2.5));
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn test_mean_of_constant_values_is_exact() {
        assert_eq!(mean(&vec![10.0; 1000]), Some(10.0));
    }

    #[test]
    fn test_basic_summary() {
        let summary = compute_summary(&[5.0, 1.0, 3.0, 2.0, 4.0]).unwrap();

        assert_eq!(summary.count, 5);
        assert!((summary.mean - 3.0).abs() < 1e-12);
        assert!((summary.p50 - 3.0).abs() < 1e-12);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 5.0);
        assert!((summary.std_dev - 2.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_single_value_has_no_spread() {
        let summary = compute_summary(&[7.0]).unwrap();
        assert_eq!(summary.std_dev, 0.0);
        assert_eq!(summary.coefficient_of_variation(), 0.0);
    }

    #[test]
    fn test_empty_values() {
        assert!(compute_summary(&[]).is_none());
    }
}
