#![warn(missing_docs)]
//! Taskbag Core - Static Bag-of-Tasks Executor
//!
//! This crate provides the execution engine:
//! - `TaskSequence` of identity-bearing tasks built from a sample
//! - `partition` for near-equal contiguous partitions with per-worker calibration
//! - `execute_partition`, the per-partition bag-of-tasks executor
//! - `SequentialExecutor` / `ParallelExecutor` strategies and the `Runner`
//!   state machine that drives them
//! - `aggregate` in identity or mean mode, and the approximate
//!   `estimate_bootstrap` strategy
//! - `WorkerMain`, the loop run by isolated worker processes

mod aggregate;
mod estimate;
mod executor;
mod function;
mod partition;
mod run;
mod strategy;
mod task;
mod worker;

pub use aggregate::{
    AggregateError, AggregateResult, AggregationMode, IdentityMap, aggregate, aggregate_identity,
    aggregate_mean, in_partition_order,
};
pub use estimate::{Estimate, EstimateError, EstimatorConfig, RESAMPLE_CAP, estimate_bootstrap};
pub use executor::{
    CHECK_INTERVAL, CancelToken, PartialResult, execute_partition, execute_partition_with,
};
pub use function::{
    BodyMassIndex, EuclideanDistance, FnTask, Identity, TaskError, TaskFunction, task_fn,
};
pub use partition::{Calibration, Partition, PartitionError, Partitions, partition, worker_count};
pub use run::{PartitionStats, RunError, RunOutcome, RunPhase, RunState, Runner};
pub use strategy::{
    ExecutionError, ExecutionStrategy, ParallelExecutor, SequentialExecutor, Strategy,
    panic_message,
};
pub use task::{Task, TaskSequence, pair_count};
pub use worker::{IPC_FD_ENV, WorkerMain, shutdown_requested};

pub use taskbag_ipc::{BodyMeasurement, Payload, Sample, TaskId, TaskKind, VectorPair};

/// Command-line flag that turns the binary into a worker process
pub const WORKER_FLAG: &str = "--taskbag-worker";
