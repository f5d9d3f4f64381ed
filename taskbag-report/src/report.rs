//! Report Data Structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskbag_stats::{BootstrapMethod, SummaryStatistics};

/// Version of the JSON layout below
pub const SCHEMA_VERSION: u32 = 1;

/// Complete run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub meta: ReportMeta,
    pub run: RunSummary,
    pub outcome: Outcome,
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMeta {
    pub schema_version: u32,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub system: SystemInfo,
}

/// System information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    pub cpu: String,
    pub cpu_cores: u32,
    pub memory_gb: f64,
}

/// How the run was executed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// `distance` or `bmi`
    pub case: String,
    /// Strategy name (`sequential`, `parallel`, `isolated`, `bootstrap`)
    pub strategy: String,
    pub workers: usize,
    /// `none`, `thread` or `process`
    pub isolation: String,
    /// Size of the task sequence
    pub tasks: usize,
    pub elapsed_ms: f64,
    /// Per-partition bounds and timing, in partition order
    pub partitions: Vec<PartitionReport>,
}

/// One executed partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionReport {
    pub index: usize,
    pub lo: usize,
    pub hi: usize,
    pub elapsed_ms: f64,
}

impl PartitionReport {
    /// Number of tasks in the partition
    pub fn tasks(&self) -> usize {
        self.hi - self.lo
    }
}

/// A single entry of an identity-mode result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixEntry {
    /// Display form of the task identity, e.g. `(0, 3)`
    pub task: String,
    pub value: f64,
}

/// What the run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Outcome {
    /// Mean-mode aggregate
    Mean {
        value: f64,
        summary: Option<SummaryStatistics>,
    },
    /// Identity-mode aggregate; `preview` holds the first few entries in task order
    Matrix {
        entries: usize,
        summary: Option<SummaryStatistics>,
        preview: Vec<MatrixEntry>,
    },
    /// Approximate estimator result
    Estimate {
        lower: f64,
        point: f64,
        upper: f64,
        confidence: f64,
        drawn: usize,
        method: BootstrapMethod,
    },
}

impl Outcome {
    /// Central value of the outcome, if it has one
    pub fn point(&self) -> Option<f64> {
        match self {
            Outcome::Mean { value, .. } => Some(*value),
            Outcome::Estimate { point, .. } => Some(*point),
            Outcome::Matrix { summary, .. } => summary.as_ref().map(|s| s.mean),
        }
    }
}
