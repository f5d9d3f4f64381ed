//! Run Executor
//!
//! Runs the two cases and turns their results into reports. Exact runs go
//! through the shared `Runner`, with the strategy chosen from the worker
//! count and isolation mode.
//!
//! ## Pipeline Overview
//!
//! ```text
//! sample (drawn or loaded)
//!       │
//!       ▼
//! ┌─────────────┐
//! │    cases    │  Pick strategy, run or estimate
//! └──────┬──────┘
//!        │           ┌──────────┐
//!        ├──────────►│ isolated │  One worker process per partition
//!        │           └──────────┘
//!        ▼
//! ┌─────────────┐
//! │   report    │  RunReport with partition stats and outcome
//! └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`cases`] - distance and bmi orchestration
//! - [`isolated`] - process-isolated strategy over the supervisor
//! - [`report`] - report building
//! - [`metadata`] - system metadata collection

mod cases;
mod isolated;
mod metadata;
mod report;

pub use cases::{BmiMode, RunSettings, run_bmi, run_distance};
pub use isolated::IsolatedExecutor;
pub use metadata::{build_report_meta, num_cpus};
pub use report::{PREVIEW_LEN, RunContext, report_from_estimate, report_from_outcome};
