//! Static partitioning of a task sequence
//!
//! A sequence of `len` tasks is cut into exactly `worker_count` contiguous
//! partitions. The first `len % worker_count` partitions get one extra task,
//! and a per-worker [`Calibration`] offset shifts each boundary before the
//! next partition starts. Boundaries never pass `len` and never move
//! backwards. The last partition always ends at `len`, so every task is
//! covered exactly once whatever the calibration.

use std::fmt;
use std::iter::FusedIterator;
use std::ops::Range;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised before any work is dispatched
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
    #[error("invalid worker count {0}: at least one worker is required")]
    InvalidWorkerCount(i64),

    #[error("calibration has {entries} entries but only {workers} workers were requested")]
    CalibrationMismatch { entries: usize, workers: usize },

    #[error("invalid calibration entry {0:?}")]
    InvalidCalibration(String),
}

/// Contiguous range of task indices assigned to one worker
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    /// Position of the partition (and of its worker)
    pub index: usize,
    /// Task indices `[lo, hi)`
    pub range: Range<usize>,
}

impl Partition {
    /// Create a partition
    pub fn new(index: usize, range: Range<usize>) -> Self {
        Self { index, range }
    }

    /// First task index
    pub fn lo(&self) -> usize {
        self.range.start
    }

    /// One past the last task index
    pub fn hi(&self) -> usize {
        self.range.end
    }

    /// Number of tasks in the partition
    pub fn len(&self) -> usize {
        self.range.len()
    }

    /// Whether the partition holds no tasks
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} [{}, {})", self.index, self.range.start, self.range.end)
    }
}

/// Per-worker size adjustments; workers without an entry get 0
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Calibration(Vec<isize>);

impl Calibration {
    /// No adjustment for any worker
    pub fn zero() -> Self {
        Self(Vec::new())
    }

    /// Adjustments for workers `0..offsets.len()`
    pub fn new(offsets: Vec<isize>) -> Self {
        Self(offsets)
    }

    /// Adjustment for worker `index`
    pub fn get(&self, index: usize) -> isize {
        self.0.get(index).copied().unwrap_or(0)
    }

    /// Number of explicit entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no entry is set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every adjustment is zero
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&o| o == 0)
    }

    /// Explicit entries
    pub fn offsets(&self) -> &[isize] {
        &self.0
    }
}

impl From<Vec<isize>> for Calibration {
    fn from(offsets: Vec<isize>) -> Self {
        Self(offsets)
    }
}

impl FromStr for Calibration {
    type Err = PartitionError;

    /// Parse a comma-separated list such as `-2,1,1`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::zero());
        }
        s.split(',')
            .map(|part| {
                part.trim()
                    .parse::<isize>()
                    .map_err(|_| PartitionError::InvalidCalibration(part.trim().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

/// Split `len` tasks across `worker_count` workers.
///
/// Returns a lazy iterator that yields exactly `worker_count` partitions in
/// index order. Workers past the end of the sequence receive empty
/// partitions.
///
/// # Examples
///
/// ```
/// # use taskbag_core::{Calibration, partition};
/// let sizes: Vec<usize> = partition(10, 3, &Calibration::zero())
///     .unwrap()
///     .map(|p| p.len())
///     .collect();
/// assert_eq!(sizes, vec![4, 3, 3]);
/// ```
pub fn partition(
    len: usize,
    worker_count: usize,
    calibration: &Calibration,
) -> Result<Partitions, PartitionError> {
    if worker_count == 0 {
        return Err(PartitionError::InvalidWorkerCount(0));
    }
    if calibration.len() > worker_count {
        return Err(PartitionError::CalibrationMismatch {
            entries: calibration.len(),
            workers: worker_count,
        });
    }

    Ok(Partitions {
        len,
        workers: worker_count,
        base: len / worker_count,
        remainder: len % worker_count,
        calibration: calibration.clone(),
        next: 0,
        lo: 0,
    })
}

/// Validate a signed worker count coming from the command surface
pub fn worker_count(requested: i64) -> Result<usize, PartitionError> {
    usize::try_from(requested)
        .ok()
        .filter(|&n| n > 0)
        .ok_or(PartitionError::InvalidWorkerCount(requested))
}

/// Lazy sequence of partitions produced by [`partition`]
#[derive(Debug, Clone)]
pub struct Partitions {
    len: usize,
    workers: usize,
    base: usize,
    remainder: usize,
    calibration: Calibration,
    next: usize,
    lo: usize,
}

impl Iterator for Partitions {
    type Item = Partition;

    fn next(&mut self) -> Option<Partition> {
        if self.next >= self.workers {
            return None;
        }

        let index = self.next;
        let lo = self.lo;
        let hi = if index + 1 == self.workers {
            self.len
        } else {
            let extra = usize::from(index < self.remainder);
            let target = (lo + self.base + extra) as i128 + self.calibration.get(index) as i128;
            target.clamp(lo as i128, self.len as i128) as usize
        };

        self.next += 1;
        self.lo = hi;
        Some(Partition::new(index, lo..hi))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.workers - self.next;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Partitions {}

impl FusedIterator for Partitions {}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(len: usize, workers: usize, cal: &[isize]) -> Vec<Range<usize>> {
        partition(len, workers, &Calibration::new(cal.to_vec()))
            .unwrap()
            .map(|p| p.range)
            .collect()
    }

    #[test]
    fn test_remainder_goes_to_leading_partitions() {
        assert_eq!(ranges(10, 4, &[]), vec![0..3, 3..6, 6..8, 8..10]);
    }

    #[test]
    fn test_exact_division() {
        assert_eq!(ranges(9, 3, &[]), vec![0..3, 3..6, 6..9]);
    }

    #[test]
    fn test_more_workers_than_tasks() {
        assert_eq!(ranges(2, 4, &[]), vec![0..1, 1..2, 2..2, 2..2]);
    }

    #[test]
    fn test_empty_sequence() {
        let parts = ranges(0, 3, &[]);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|r| r.is_empty()));
    }

    #[test]
    fn test_negative_calibration_shifts_work_forward() {
        // worker 0 is slow: shrink it by 2; worker 1 picks up the slack
        assert_eq!(ranges(12, 3, &[-2, 2]), vec![0..2, 2..8, 8..12]);
    }

    #[test]
    fn test_calibration_is_clamped() {
        assert_eq!(ranges(6, 3, &[-10]), vec![0..0, 0..2, 2..6]);
        assert_eq!(ranges(6, 3, &[10]), vec![0..6, 6..6, 6..6]);
    }

    #[test]
    fn test_last_partition_absorbs_leftover() {
        assert_eq!(ranges(9, 3, &[-1, -1, 0]), vec![0..2, 2..4, 4..9]);
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert_eq!(
            partition(5, 0, &Calibration::zero()).unwrap_err(),
            PartitionError::InvalidWorkerCount(0)
        );
    }

    #[test]
    fn test_calibration_longer_than_workers_rejected() {
        assert!(matches!(
            partition(5, 2, &Calibration::new(vec![1, 0, -1])),
            Err(PartitionError::CalibrationMismatch { entries: 3, workers: 2 })
        ));
    }

    #[test]
    fn test_exact_size_and_fused() {
        let mut parts = partition(7, 3, &Calibration::zero()).unwrap();
        assert_eq!(parts.len(), 3);
        parts.next();
        assert_eq!(parts.len(), 2);
        parts.next();
        parts.next();
        assert!(parts.next().is_none());
        assert!(parts.next().is_none());
    }

    #[test]
    fn test_calibration_parsing() {
        let cal: Calibration = "-2, 1,1".parse().unwrap();
        assert_eq!(cal.offsets(), &[-2, 1, 1]);
        assert_eq!(cal.get(7), 0);
        assert!("".parse::<Calibration>().unwrap().is_zero());
        assert!(matches!(
            "1,x".parse::<Calibration>(),
            Err(PartitionError::InvalidCalibration(_))
        ));
    }

    #[test]
    fn test_worker_count_validation() {
        assert_eq!(worker_count(4), Ok(4));
        assert_eq!(worker_count(0), Err(PartitionError::InvalidWorkerCount(0)));
        assert_eq!(worker_count(-3), Err(PartitionError::InvalidWorkerCount(-3)));
    }
}
