//! Execution strategies
//!
//! A strategy plans the partitions of a run and dispatches them to workers,
//! returning one [`PartialResult`] per partition in partition order.
//!
//! - [`SequentialExecutor`]: one partition holding the whole sequence, run on
//!   the calling thread.
//! - [`ParallelExecutor`]: one partition per worker on a fixed-size thread
//!   pool built for the run and dropped afterwards. The call returns only
//!   once every worker has reported.

use crate::executor::{CancelToken, PartialResult, execute_partition_with};
use crate::function::{TaskError, TaskFunction};
use crate::partition::{Calibration, Partition, PartitionError, partition};
use crate::task::TaskSequence;
use rayon::prelude::*;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use thiserror::Error;

/// Errors that abort a run
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error("worker for partition {partition} failed: {source}")]
    WorkerFailed {
        partition: usize,
        #[source]
        source: TaskError,
    },

    #[error("worker for partition {partition} panicked: {message}")]
    WorkerPanicked { partition: usize, message: String },

    #[error("partition {partition} was cancelled")]
    Cancelled { partition: usize },

    #[error("run exceeded its deadline of {deadline:?}")]
    DeadlineExceeded { deadline: Duration },

    #[error("failed to build worker pool: {0}")]
    Pool(String),

    #[error("worker process error: {0}")]
    Isolation(String),
}

impl ExecutionError {
    /// Index of the partition the error belongs to, if any
    pub fn partition(&self) -> Option<usize> {
        match self {
            ExecutionError::WorkerFailed { partition, .. }
            | ExecutionError::WorkerPanicked { partition, .. }
            | ExecutionError::Cancelled { partition } => Some(*partition),
            _ => None,
        }
    }
}

/// Planning half of a strategy, independent of the task type
pub trait Strategy {
    /// Short name used in logs and reports
    fn name(&self) -> &'static str;

    /// Number of workers the strategy dispatches to
    fn worker_count(&self) -> usize;

    /// Partitions for a sequence of `len` tasks
    fn plan(&self, len: usize) -> Result<Vec<Partition>, ExecutionError>;
}

/// Dispatching half of a strategy
pub trait ExecutionStrategy<P, F: TaskFunction<P>>: Strategy {
    /// Run every planned partition and return the partials in partition order
    fn dispatch(
        &self,
        tasks: &TaskSequence<P>,
        partitions: &[Partition],
        f: &F,
    ) -> Result<Vec<PartialResult<F::Output>>, ExecutionError>;

    /// Plan and dispatch in one step
    fn execute(
        &self,
        tasks: &TaskSequence<P>,
        f: &F,
    ) -> Result<Vec<PartialResult<F::Output>>, ExecutionError> {
        let partitions = self.plan(tasks.len())?;
        self.dispatch(tasks, &partitions, f)
    }
}

/// Extract the message of a caught panic
pub fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Single-threaded baseline
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialExecutor;

impl Strategy for SequentialExecutor {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn worker_count(&self) -> usize {
        1
    }

    fn plan(&self, len: usize) -> Result<Vec<Partition>, ExecutionError> {
        Ok(vec![Partition::new(0, 0..len)])
    }
}

impl<P, F: TaskFunction<P>> ExecutionStrategy<P, F> for SequentialExecutor {
    fn dispatch(
        &self,
        tasks: &TaskSequence<P>,
        partitions: &[Partition],
        f: &F,
    ) -> Result<Vec<PartialResult<F::Output>>, ExecutionError> {
        let cancel = CancelToken::new();
        partitions
            .iter()
            .map(|p| run_guarded(p, tasks, f, &cancel))
            .collect()
    }
}

/// Fixed-size worker pool, one partition per worker
#[derive(Debug, Clone)]
pub struct ParallelExecutor {
    workers: usize,
    calibration: Calibration,
    max_retries: u32,
    deadline: Option<Duration>,
}

impl ParallelExecutor {
    /// Pool of `workers` threads with no calibration, retries or deadline
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            calibration: Calibration::zero(),
            max_retries: 0,
            deadline: None,
        }
    }

    /// Per-worker partition size adjustments
    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = calibration;
        self
    }

    /// Re-execute a failed partition up to `max_retries` times
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Cancel every worker once the run takes longer than `deadline`
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Configured calibration
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    fn run_with_retries<P, F>(
        &self,
        partition: &Partition,
        tasks: &TaskSequence<P>,
        f: &F,
        cancel: &CancelToken,
    ) -> Result<PartialResult<F::Output>, ExecutionError>
    where
        F: TaskFunction<P>,
    {
        let mut attempt = 0;
        loop {
            match run_guarded(partition, tasks, f, cancel) {
                Ok(partial) => return Ok(partial),
                Err(e @ ExecutionError::Cancelled { .. }) => return Err(e),
                Err(e) if attempt < self.max_retries && !cancel.is_cancelled() => {
                    attempt += 1;
                    tracing::warn!(
                        partition = partition.index,
                        attempt,
                        error = %e,
                        "retrying partition"
                    );
                }
                Err(e) => {
                    cancel.cancel();
                    return Err(e);
                }
            }
        }
    }
}

impl Strategy for ParallelExecutor {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn worker_count(&self) -> usize {
        self.workers
    }

    fn plan(&self, len: usize) -> Result<Vec<Partition>, ExecutionError> {
        Ok(partition(len, self.workers, &self.calibration)?.collect())
    }
}

impl<P, F> ExecutionStrategy<P, F> for ParallelExecutor
where
    P: Sync,
    F: TaskFunction<P>,
{
    fn dispatch(
        &self,
        tasks: &TaskSequence<P>,
        partitions: &[Partition],
        f: &F,
    ) -> Result<Vec<PartialResult<F::Output>>, ExecutionError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers.max(1))
            .thread_name(|i| format!("taskbag-worker-{i}"))
            .build()
            .map_err(|e| ExecutionError::Pool(e.to_string()))?;

        let cancel = CancelToken::new();
        let expired = AtomicBool::new(false);
        let (done_tx, done_rx) = mpsc::channel::<()>();

        tracing::debug!(workers = self.workers, partitions = partitions.len(), "dispatching");

        let outcomes: Vec<Result<PartialResult<F::Output>, ExecutionError>> =
            std::thread::scope(|scope| {
                if let Some(deadline) = self.deadline {
                    let cancel = cancel.clone();
                    let expired = &expired;
                    scope.spawn(move || {
                        if let Err(mpsc::RecvTimeoutError::Timeout) =
                            done_rx.recv_timeout(deadline)
                        {
                            expired.store(true, Ordering::Release);
                            cancel.cancel();
                        }
                    });
                }

                // Collecting barrier: install returns once every partition is back
                let outcomes: Vec<_> = pool.install(|| {
                    partitions
                        .par_iter()
                        .with_max_len(1)
                        .map(|p| self.run_with_retries(p, tasks, f, &cancel))
                        .collect()
                });
                let _ = done_tx.send(());
                outcomes
            });
        drop(pool);

        settle(outcomes, expired.load(Ordering::Acquire), self.deadline)
    }
}

/// Merge the partition outcomes of one dispatch.
///
/// A task failure wins over cancellation. An expired deadline only counts
/// when it actually cancelled a partition; a watcher firing after the last
/// partition finished leaves the run successful.
fn settle<O>(
    outcomes: Vec<Result<PartialResult<O>, ExecutionError>>,
    expired: bool,
    deadline: Option<Duration>,
) -> Result<Vec<PartialResult<O>>, ExecutionError> {
    let mut partials = Vec::with_capacity(outcomes.len());
    let mut failure = None;
    let mut cancelled = None;
    for outcome in outcomes {
        match outcome {
            Ok(partial) => partials.push(partial),
            Err(ExecutionError::Cancelled { partition }) => {
                cancelled.get_or_insert(partition);
            }
            Err(e) => {
                failure.get_or_insert(e);
            }
        }
    }

    if let Some(e) = failure {
        return Err(e);
    }
    match cancelled {
        Some(_) if expired => Err(ExecutionError::DeadlineExceeded {
            deadline: deadline.unwrap_or_default(),
        }),
        Some(partition) => Err(ExecutionError::Cancelled { partition }),
        None => Ok(partials),
    }
}

/// Run one partition, turning task errors and panics into execution errors
fn run_guarded<P, F>(
    partition: &Partition,
    tasks: &TaskSequence<P>,
    f: &F,
    cancel: &CancelToken,
) -> Result<PartialResult<F::Output>, ExecutionError>
where
    F: TaskFunction<P>,
{
    let result = catch_unwind(AssertUnwindSafe(|| {
        execute_partition_with(partition, tasks, f, cancel, |_, _| {})
    }));

    match result {
        Ok(Ok(partial)) => Ok(partial),
        Ok(Err(TaskError::Cancelled { partition, .. })) => {
            Err(ExecutionError::Cancelled { partition })
        }
        Ok(Err(source)) => Err(ExecutionError::WorkerFailed {
            partition: partition.index,
            source,
        }),
        Err(panic) => Err(ExecutionError::WorkerPanicked {
            partition: partition.index,
            message: panic_message(panic.as_ref()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::task_fn;
    use std::sync::atomic::AtomicUsize;
    use taskbag_ipc::TaskId;

    fn flatten(partials: &[PartialResult<f64>]) -> Vec<(TaskId, f64)> {
        partials.iter().flat_map(|p| p.results.clone()).collect()
    }

    #[test]
    fn test_sequential_single_partition() {
        let tasks = TaskSequence::indexed(vec![1.0, 2.0, 3.0]);
        let id = task_fn(|x: &f64| Ok(*x));
        let partials = SequentialExecutor.execute(&tasks, &id).unwrap();
        assert_eq!(partials.len(), 1);
        assert_eq!(partials[0].range, 0..3);
    }

    #[test]
    fn test_parallel_matches_sequential_order() {
        let tasks = TaskSequence::indexed((0..1000).map(|i| i as f64));
        let square = task_fn(|x: &f64| Ok(x * x));

        let seq = SequentialExecutor.execute(&tasks, &square).unwrap();
        for workers in [1, 2, 3, 7, 16] {
            let par = ParallelExecutor::new(workers).execute(&tasks, &square).unwrap();
            assert_eq!(par.len(), workers);
            assert!(par.iter().enumerate().all(|(i, p)| p.partition == i));
            assert_eq!(flatten(&par), flatten(&seq), "workers = {workers}");
        }
    }

    #[test]
    fn test_parallel_uses_named_threads() {
        let tasks = TaskSequence::indexed(vec![0.0f64; 4]);
        let named = task_fn(|_: &f64| {
            let name = std::thread::current().name().unwrap_or_default().to_string();
            Ok(name.starts_with("taskbag-worker-"))
        });
        let partials = ParallelExecutor::new(2).execute(&tasks, &named).unwrap();
        assert!(partials.iter().flat_map(|p| &p.results).all(|(_, ok)| *ok));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let tasks = TaskSequence::indexed(vec![1.0f64]);
        let id = task_fn(|x: &f64| Ok(*x));
        let err = ParallelExecutor::new(0).execute(&tasks, &id).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Partition(PartitionError::InvalidWorkerCount(0))
        ));
    }

    #[test]
    fn test_worker_failure_aborts_run() {
        let tasks = TaskSequence::indexed((0..100).map(|i| i as f64));
        let picky = task_fn(|x: &f64| {
            if *x == 42.0 {
                Err(TaskError::Invalid("unlucky".into()))
            } else {
                Ok(*x)
            }
        });

        let err = ParallelExecutor::new(4).execute(&tasks, &picky).unwrap_err();
        match err {
            ExecutionError::WorkerFailed { partition, source } => {
                assert_eq!(partition, 1);
                assert_eq!(source.task_id(), Some(TaskId::Index(42)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_panic_is_reported() {
        let tasks = TaskSequence::indexed(vec![1.0f64, 2.0]);
        let boom = task_fn(|x: &f64| -> Result<f64, TaskError> {
            if *x > 1.5 {
                panic!("task exploded");
            }
            Ok(*x)
        });

        let err = ParallelExecutor::new(2).execute(&tasks, &boom).unwrap_err();
        match err {
            ExecutionError::WorkerPanicked { partition, message } => {
                assert_eq!(partition, 1);
                assert_eq!(message, "task exploded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_retry_recovers_transient_failure() {
        let calls = AtomicUsize::new(0);
        let tasks = TaskSequence::indexed(vec![1.0f64, 2.0, 3.0]);
        let flaky = task_fn(|x: &f64| {
            if *x == 2.0 && calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TaskError::Invalid("transient".into()))
            } else {
                Ok(*x)
            }
        });

        assert!(ParallelExecutor::new(3).execute(&tasks, &flaky).is_err());
        calls.store(0, Ordering::SeqCst);
        let partials = ParallelExecutor::new(3)
            .with_max_retries(1)
            .execute(&tasks, &flaky)
            .unwrap();
        assert_eq!(flatten(&partials).len(), 3);
    }

    #[test]
    fn test_deadline_cancels_workers() {
        let tasks = TaskSequence::indexed(vec![0.0f64; 400]);
        let slow = task_fn(|x: &f64| {
            std::thread::sleep(Duration::from_millis(1));
            Ok(*x)
        });

        let err = ParallelExecutor::new(2)
            .with_deadline(Some(Duration::from_millis(20)))
            .execute(&tasks, &slow)
            .unwrap_err();
        assert!(matches!(err, ExecutionError::DeadlineExceeded { .. }));
    }

    #[test]
    fn test_late_deadline_keeps_completed_run() {
        let done = |index: usize| {
            Ok(PartialResult {
                partition: index,
                range: index..index + 1,
                results: vec![(TaskId::Index(index), 1.0)],
                elapsed: Duration::ZERO,
            })
        };
        let deadline = Some(Duration::from_millis(5));

        let partials = settle(vec![done(0), done(1)], true, deadline).unwrap();
        assert_eq!(partials.len(), 2);

        let err = settle(
            vec![done(0), Err(ExecutionError::Cancelled { partition: 1 })],
            true,
            deadline,
        )
        .unwrap_err();
        assert!(matches!(err, ExecutionError::DeadlineExceeded { .. }));

        let err = settle::<f64>(
            vec![Err(ExecutionError::Cancelled { partition: 1 })],
            false,
            deadline,
        )
        .unwrap_err();
        assert!(matches!(err, ExecutionError::Cancelled { partition: 1 }));
    }
}
