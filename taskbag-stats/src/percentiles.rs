//! Percentile Computation
//!
//! Linear interpolation between nearest ranks. Result sets can hold millions
//! of values (a full distance matrix), so callers that need several
//! percentiles sort once and use [`percentile_of_sorted`].

/// Quartiles plus the tails reported for a result distribution
#[derive(Debug, Clone, PartialEq)]
pub struct Percentiles {
    /// 5th percentile
    pub p5: f64,
    /// 25th percentile
    pub p25: f64,
    /// 50th percentile (median)
    pub p50: f64,
    /// 75th percentile
    pub p75: f64,
    /// 95th percentile
    pub p95: f64,
}

/// Compute a single percentile from unsorted values
///
/// # Examples
///
/// ```
/// # use taskbag_stats::compute_percentile;
/// let values = vec![5.0, 1.0, 3.0, 2.0, 4.0];
/// assert_eq!(compute_percentile(&values, 50.0), 3.0);
/// ```
pub fn compute_percentile(values: &[f64], percentile: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_of_sorted(&sorted, percentile)
}

/// Percentile of values already sorted ascending; 0.0 when empty
pub fn percentile_of_sorted(sorted: &[f64], percentile: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (percentile / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = (lower + 1).min(n - 1);
            let fraction = rank - lower as f64;
            sorted[lower] + fraction * (sorted[upper] - sorted[lower])
        }
    }
}

/// Compute the standard percentile set with a single sort
pub fn compute_percentiles(values: &[f64]) -> Percentiles {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Percentiles {
        p5: percentile_of_sorted(&sorted, 5.0),
        p25: percentile_of_sorted(&sorted, 25.0),
        p50: percentile_of_sorted(&sorted, 50.0),
        p75: percentile_of_sorted(&sorted, 75.0),
        p95: percentile_of_sorted(&sorted, 95.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median() {
        assert!((compute_percentile(&[3.0, 1.0, 2.0, 5.0, 4.0], 50.0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_interpolates_between_ranks() {
        // rank = 0.25 * 3 = 0.75 -> 1 + 0.75 * (2 - 1)
        assert!((compute_percentile(&[1.0, 2.0, 3.0, 4.0], 25.0) - 1.75).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_range_percentile_is_clamped() {
        let values = [1.0, 2.0, 3.0];
        assert_eq!(compute_percentile(&values, 150.0), 3.0);
        assert_eq!(compute_percentile(&values, -5.0), 1.0);
    }

    #[test]
    fn test_single_and_empty() {
        assert_eq!(compute_percentile(&[42.0], 95.0), 42.0);
        assert_eq!(compute_percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_compute_all_percentiles() {
        let values: Vec<f64> = (1..=101).map(|x| x as f64).collect();
        let p = compute_percentiles(&values);
        assert_eq!(p.p5, 6.0);
        assert_eq!(p.p50, 51.0);
        assert_eq!(p.p95, 96.0);
        assert!(p.p25 < p.p75);
    }
}
