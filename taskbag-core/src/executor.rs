//! Bag-of-tasks executor
//!
//! Applies a task function to every task of one partition, in order. The
//! first failing task fails the whole partition.

use crate::function::{TaskError, TaskFunction};
use crate::partition::Partition;
use crate::task::TaskSequence;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use taskbag_ipc::TaskId;

/// Number of tasks between two progress reports
pub const CHECK_INTERVAL: usize = 4096;

/// Shared flag telling running partitions to stop
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that has not been cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of the token to stop
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Ordered results of one partition
#[derive(Debug, Clone, PartialEq)]
pub struct PartialResult<O> {
    /// Index of the partition that produced the results
    pub partition: usize,
    /// Task indices the partition covered
    pub range: Range<usize>,
    /// `(identity, result)` in task order
    pub results: Vec<(TaskId, O)>,
    /// Time spent executing the partition
    pub elapsed: Duration,
}

impl<O> PartialResult<O> {
    /// Number of results
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the partition produced no results
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Execute one partition to completion
pub fn execute_partition<P, F>(
    partition: &Partition,
    tasks: &TaskSequence<P>,
    f: &F,
) -> Result<PartialResult<F::Output>, TaskError>
where
    F: TaskFunction<P> + ?Sized,
{
    execute_partition_with(partition, tasks, f, &CancelToken::new(), |_, _| {})
}

/// Execute one partition, checking `cancel` before every task and reporting
/// progress as `(completed, total)` every [`CHECK_INTERVAL`] tasks.
pub fn execute_partition_with<P, F, G>(
    partition: &Partition,
    tasks: &TaskSequence<P>,
    f: &F,
    cancel: &CancelToken,
    mut on_progress: G,
) -> Result<PartialResult<F::Output>, TaskError>
where
    F: TaskFunction<P> + ?Sized,
    G: FnMut(usize, usize),
{
    let slice = tasks.slice(partition);
    let total = slice.len();
    tracing::debug!(
        partition = partition.index,
        lo = partition.lo(),
        hi = partition.hi(),
        function = f.name(),
        "worker started"
    );

    let start = Instant::now();
    let mut results = Vec::with_capacity(total);

    for (done, task) in slice.iter().enumerate() {
        if done > 0 && done % CHECK_INTERVAL == 0 {
            on_progress(done, total);
        }
        if cancel.is_cancelled() {
            tracing::debug!(partition = partition.index, completed = done, "worker cancelled");
            return Err(TaskError::Cancelled {
                partition: partition.index,
                completed: done,
            });
        }
        let value = f.apply(task.payload()).map_err(|e| e.at(task.id()))?;
        results.push((task.id(), value));
    }

    let elapsed = start.elapsed();
    on_progress(total, total);
    tracing::debug!(
        partition = partition.index,
        tasks = total,
        elapsed_ms = elapsed.as_millis() as u64,
        "worker finished"
    );

    Ok(PartialResult {
        partition: partition.index,
        range: partition.range.clone(),
        results,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::task_fn;

    #[test]
    fn test_preserves_task_order() {
        let tasks = TaskSequence::indexed((0..10).map(|i| i as f64));
        let double = task_fn(|x: &f64| Ok(2.0 * x));

        let partial = execute_partition(&Partition::new(3, 4..8), &tasks, &double).unwrap();

        assert_eq!(partial.partition, 3);
        assert_eq!(partial.range, 4..8);
        assert_eq!(
            partial.results,
            vec![
                (TaskId::Index(4), 8.0),
                (TaskId::Index(5), 10.0),
                (TaskId::Index(6), 12.0),
                (TaskId::Index(7), 14.0),
            ]
        );
    }

    #[test]
    fn test_empty_partition() {
        let tasks = TaskSequence::indexed(vec![1.0f64]);
        let id = task_fn(|x: &f64| Ok(*x));
        let partial = execute_partition(&Partition::new(1, 1..1), &tasks, &id).unwrap();
        assert!(partial.is_empty());
    }

    #[test]
    fn test_first_failure_fails_partition() {
        let tasks = TaskSequence::indexed(vec![1.0, -1.0, 2.0]);
        let sqrt = task_fn(|x: &f64| {
            if *x < 0.0 {
                Err(TaskError::Invalid("negative".into()))
            } else {
                Ok(x.sqrt())
            }
        });

        let err = execute_partition(&Partition::new(0, 0..3), &tasks, &sqrt).unwrap_err();
        assert_eq!(err.task_id(), Some(TaskId::Index(1)));
    }

    #[test]
    fn test_cancelled_token_stops_partition() {
        let tasks = TaskSequence::indexed(vec![0.0f64; 5]);
        let id = task_fn(|x: &f64| Ok(*x));
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = execute_partition_with(&Partition::new(2, 0..5), &tasks, &id, &cancel, |_, _| {})
            .unwrap_err();
        assert_eq!(
            err,
            TaskError::Cancelled {
                partition: 2,
                completed: 0
            }
        );
    }

    #[test]
    fn test_progress_reaches_total() {
        let n = CHECK_INTERVAL * 2 + 5;
        let tasks = TaskSequence::indexed(vec![1.0f64; n]);
        let id = task_fn(|x: &f64| Ok(*x));
        let mut seen = Vec::new();

        execute_partition_with(
            &Partition::new(0, 0..n),
            &tasks,
            &id,
            &CancelToken::new(),
            |done, total| seen.push((done, total)),
        )
        .unwrap();

        assert_eq!(
            seen,
            vec![(CHECK_INTERVAL, n), (2 * CHECK_INTERVAL, n), (n, n)]
        );
    }
}
