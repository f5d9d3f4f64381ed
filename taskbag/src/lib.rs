#![warn(missing_docs)]
//! # Taskbag
//!
//! Static bag-of-tasks parallel executor.
//!
//! A finite sequence of independent tasks is split into contiguous
//! partitions, one per worker, each partition is run to completion and the
//! partial results are merged back in partition order:
//! - **Partitioning**: balanced contiguous ranges with per-worker calibration
//! - **Strategies**: sequential, thread-parallel, or one worker process per partition
//! - **Aggregation**: full identity map or an arithmetic mean identical across strategies
//! - **Estimation**: bootstrap confidence interval over a bounded random resample
//!
//! ## Quick Start
//!
//! ```
//! use taskbag::{AggregationMode, ParallelExecutor, Runner, TaskSequence, task_fn};
//!
//! let tasks = TaskSequence::indexed(vec![10.0f64; 1000]);
//! let id = task_fn(|x: &f64| Ok(*x));
//! let outcome = Runner::new(ParallelExecutor::new(4), AggregationMode::Mean)
//!     .run(&tasks, &id)
//!     .unwrap();
//! assert_eq!(outcome.value.mean(), Some(10.0));
//! ```

pub use taskbag_core::*;

pub use taskbag_ipc::{FrameError, PROTOCOL_VERSION, WorkerCapabilities};

pub use taskbag_report::{
    Outcome, OutputFormat, PartitionReport, RunReport, RunSummary, format_human_output,
    generate_json_report, parse_json_report,
};

pub use taskbag_stats::{
    BootstrapConfig, BootstrapMethod, BootstrapResult, IntervalMethod, SummaryStatistics,
    compute_bootstrap, compute_summary,
};

pub use taskbag_cli::{IsolatedExecutor, SampleStore, Supervisor, TaskbagConfig};

/// Run the Taskbag CLI.
///
/// The `taskbag` binary is a thin wrapper around this:
/// ```ignore
/// fn main() {
///     taskbag::run().unwrap();
/// }
/// ```
pub use taskbag_cli::run;
