//! Run lifecycle
//!
//! A [`Runner`] drives one strategy through the phases of a run:
//!
//! ```text
//! Idle -> Partitioning -> Dispatching -> Collecting -> Aggregating -> Done
//!                              |              |
//!                              +--> Failed <--+
//! ```
//!
//! Every transition goes through [`RunState::advance`], which rejects any
//! move the diagram does not show.

use crate::aggregate::{AggregateError, AggregateResult, AggregationMode, aggregate};
use crate::executor::PartialResult;
use crate::function::TaskFunction;
use crate::partition::Partition;
use crate::strategy::{ExecutionError, ExecutionStrategy};
use crate::task::TaskSequence;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunPhase {
    /// Not started
    Idle,
    /// Computing partition boundaries
    Partitioning,
    /// Handing partitions to workers
    Dispatching,
    /// Waiting on and ordering partial results
    Collecting,
    /// Combining partials into the final value
    Aggregating,
    /// Finished successfully
    Done,
    /// Aborted by a worker or collection failure
    Failed,
}

impl RunPhase {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_advance_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Idle, Partitioning)
                | (Partitioning, Dispatching)
                | (Dispatching, Collecting)
                | (Collecting, Aggregating)
                | (Aggregating, Done)
                | (Dispatching, Failed)
                | (Collecting, Failed)
        )
    }

    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Failed)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::Partitioning => "partitioning",
            RunPhase::Dispatching => "dispatching",
            RunPhase::Collecting => "collecting",
            RunPhase::Aggregating => "aggregating",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Errors returned by [`Runner::run`]
#[derive(Debug, Error)]
pub enum RunError {
    #[error("illegal run transition {from} -> {to}")]
    IllegalTransition { from: RunPhase, to: RunPhase },

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("partition {partition} missing from collected results")]
    MissingPartition { partition: usize },

    #[error("collected partition {partition} covers {got:?}, planned {expected:?}")]
    RangeMismatch {
        partition: usize,
        expected: std::ops::Range<usize>,
        got: std::ops::Range<usize>,
    },

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

/// Current phase plus the time each phase was entered
#[derive(Debug, Clone)]
pub struct RunState {
    phase: RunPhase,
    history: Vec<(RunPhase, Instant)>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    /// A run that has not started
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Idle,
            history: vec![(RunPhase::Idle, Instant::now())],
        }
    }

    /// Current phase
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Phases visited so far, in order
    pub fn phases(&self) -> impl Iterator<Item = RunPhase> + '_ {
        self.history.iter().map(|(phase, _)| *phase)
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub fn advance(&mut self, next: RunPhase) -> Result<(), RunError> {
        if !self.phase.can_advance_to(next) {
            return Err(RunError::IllegalTransition {
                from: self.phase,
                to: next,
            });
        }
        tracing::trace!(from = %self.phase, to = %next, "run phase");
        self.phase = next;
        self.history.push((next, Instant::now()));
        Ok(())
    }

    /// Move to `Failed` and hand back `error`
    fn fail<E: Into<RunError>>(&mut self, error: E) -> RunError {
        let error = error.into();
        if let Err(illegal) = self.advance(RunPhase::Failed) {
            return illegal;
        }
        error
    }
}

/// Timing and bounds of one executed partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionStats {
    /// Partition index
    pub index: usize,
    /// First task index
    pub lo: usize,
    /// One past the last task index
    pub hi: usize,
    /// Time the worker spent on the partition
    pub elapsed: Duration,
}

/// What a completed run hands back
#[derive(Debug, Clone)]
pub struct RunOutcome<O> {
    /// Aggregated value
    pub value: AggregateResult<O>,
    /// Wall-clock time from partitioning to aggregation
    pub elapsed: Duration,
    /// Per-partition statistics in partition order
    pub partitions: Vec<PartitionStats>,
    /// Name of the strategy that produced the outcome
    pub strategy: &'static str,
    /// Workers the strategy dispatched to
    pub workers: usize,
}

/// Drives a strategy and an aggregation mode through one run
#[derive(Debug, Clone)]
pub struct Runner<S> {
    strategy: S,
    mode: AggregationMode,
}

impl<S> Runner<S> {
    /// Runner combining `strategy` with `mode`
    pub fn new(strategy: S, mode: AggregationMode) -> Self {
        Self { strategy, mode }
    }

    /// The wrapped strategy
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Execute `f` over `tasks`
    pub fn run<P, F>(
        &self,
        tasks: &TaskSequence<P>,
        f: &F,
    ) -> Result<RunOutcome<F::Output>, RunError>
    where
        S: ExecutionStrategy<P, F>,
        F: TaskFunction<P>,
        F::Output: Copy + Into<f64>,
    {
        let mut state = RunState::new();
        self.run_with_state(tasks, f, &mut state)
    }

    /// Like [`Runner::run`], recording the phases in `state`
    pub fn run_with_state<P, F>(
        &self,
        tasks: &TaskSequence<P>,
        f: &F,
        state: &mut RunState,
    ) -> Result<RunOutcome<F::Output>, RunError>
    where
        S: ExecutionStrategy<P, F>,
        F: TaskFunction<P>,
        F::Output: Copy + Into<f64>,
    {
        let start = Instant::now();

        state.advance(RunPhase::Partitioning)?;
        let plan = self.strategy.plan(tasks.len())?;
        tracing::debug!(
            strategy = self.strategy.name(),
            tasks = tasks.len(),
            partitions = plan.len(),
            "partitioned"
        );

        state.advance(RunPhase::Dispatching)?;
        let partials = match self.strategy.dispatch(tasks, &plan, f) {
            Ok(partials) => partials,
            Err(e) => return Err(state.fail(e)),
        };

        state.advance(RunPhase::Collecting)?;
        let partials = match collect(&plan, partials) {
            Ok(partials) => partials,
            Err(e) => return Err(state.fail(e)),
        };
        let partitions = partials
            .iter()
            .map(|p| PartitionStats {
                index: p.partition,
                lo: p.range.start,
                hi: p.range.end,
                elapsed: p.elapsed,
            })
            .collect();

        // Aggregation errors leave the run in Aggregating; Failed is only
        // reachable while workers are involved.
        state.advance(RunPhase::Aggregating)?;
        let value = aggregate(partials, self.mode)?;

        state.advance(RunPhase::Done)?;
        let elapsed = start.elapsed();
        tracing::debug!(
            strategy = self.strategy.name(),
            elapsed_ms = elapsed.as_millis() as u64,
            "run complete"
        );

        Ok(RunOutcome {
            value,
            elapsed,
            partitions,
            strategy: self.strategy.name(),
            workers: self.strategy.worker_count(),
        })
    }
}

/// Put partials in partition order and check them against the plan
fn collect<O>(
    plan: &[Partition],
    mut partials: Vec<PartialResult<O>>,
) -> Result<Vec<PartialResult<O>>, RunError> {
    partials.sort_by_key(|p| p.partition);
    for (planned, partial) in plan.iter().zip(partials.iter()) {
        if planned.index != partial.partition {
            return Err(RunError::MissingPartition {
                partition: planned.index,
            });
        }
        if planned.range != partial.range {
            return Err(RunError::RangeMismatch {
                partition: planned.index,
                expected: planned.range.clone(),
                got: partial.range.clone(),
            });
        }
    }
    if partials.len() < plan.len() {
        return Err(RunError::MissingPartition {
            partition: plan[partials.len()].index,
        });
    }
    Ok(partials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{TaskError, task_fn};
    use crate::strategy::{ParallelExecutor, SequentialExecutor};

    #[test]
    fn test_transition_table() {
        assert!(RunPhase::Idle.can_advance_to(RunPhase::Partitioning));
        assert!(RunPhase::Collecting.can_advance_to(RunPhase::Failed));
        assert!(!RunPhase::Idle.can_advance_to(RunPhase::Failed));
        assert!(!RunPhase::Aggregating.can_advance_to(RunPhase::Failed));
        assert!(!RunPhase::Done.can_advance_to(RunPhase::Idle));
        assert!(RunPhase::Failed.is_terminal());
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut state = RunState::new();
        let err = state.advance(RunPhase::Collecting).unwrap_err();
        assert!(matches!(
            err,
            RunError::IllegalTransition {
                from: RunPhase::Idle,
                to: RunPhase::Collecting
            }
        ));
        assert_eq!(state.phase(), RunPhase::Idle);
    }

    #[test]
    fn test_successful_run_visits_every_phase() {
        let tasks = TaskSequence::indexed(vec![2.0f64; 9]);
        let id = task_fn(|x: &f64| Ok(*x));
        let runner = Runner::new(ParallelExecutor::new(3), AggregationMode::Mean);
        let mut state = RunState::new();

        let outcome = runner.run_with_state(&tasks, &id, &mut state).unwrap();

        assert_eq!(outcome.value.mean(), Some(2.0));
        assert_eq!(outcome.workers, 3);
        assert_eq!(
            outcome.partitions.iter().map(|p| (p.lo, p.hi)).collect::<Vec<_>>(),
            vec![(0, 3), (3, 6), (6, 9)]
        );
        assert_eq!(
            state.phases().collect::<Vec<_>>(),
            vec![
                RunPhase::Idle,
                RunPhase::Partitioning,
                RunPhase::Dispatching,
                RunPhase::Collecting,
                RunPhase::Aggregating,
                RunPhase::Done,
            ]
        );
    }

    #[test]
    fn test_worker_failure_ends_in_failed() {
        let tasks = TaskSequence::indexed(vec![1.0f64, 2.0]);
        let fail = task_fn(|_: &f64| -> Result<f64, TaskError> {
            Err(TaskError::Invalid("nope".into()))
        });
        let runner = Runner::new(SequentialExecutor, AggregationMode::Mean);
        let mut state = RunState::new();

        let err = runner.run_with_state(&tasks, &fail, &mut state).unwrap_err();

        assert!(matches!(
            err,
            RunError::Execution(ExecutionError::WorkerFailed { partition: 0, .. })
        ));
        assert_eq!(state.phase(), RunPhase::Failed);
    }

    #[test]
    fn test_empty_mean_stops_in_aggregating() {
        let tasks = TaskSequence::<f64>::indexed(Vec::new());
        let id = task_fn(|x: &f64| Ok(*x));
        let runner = Runner::new(SequentialExecutor, AggregationMode::Mean);
        let mut state = RunState::new();

        let err = runner.run_with_state(&tasks, &id, &mut state).unwrap_err();

        assert!(matches!(err, RunError::Aggregate(AggregateError::EmptyInput)));
        assert_eq!(state.phase(), RunPhase::Aggregating);
    }

    #[test]
    fn test_collect_detects_missing_partition() {
        let plan = vec![Partition::new(0, 0..2), Partition::new(1, 2..4)];
        let partials = vec![PartialResult::<f64> {
            partition: 0,
            range: 0..2,
            results: Vec::new(),
            elapsed: Duration::ZERO,
        }];
        assert!(matches!(
            collect(&plan, partials),
            Err(RunError::MissingPartition { partition: 1 })
        ));
    }
}
