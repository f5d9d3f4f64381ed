//! IPC Message Types
//!
//! Everything that crosses the supervisor/worker boundary: task identities,
//! typed payloads, whole samples and the command/reply protocol. All types are
//! archived with rkyv and validated on read.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use std::fmt;
use std::ops::Range;

/// Identity of a single task.
///
/// Unary tasks are identified by their position in the sequence; binary tasks
/// over a shared sample carry the index pair of their two operands.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Archive, RkyvSerialize, RkyvDeserialize,
)]
#[archive(check_bytes)]
pub enum TaskId {
    /// Position in the task sequence
    Index(usize),
    /// Composite key `(i, j)` with `i < j`
    Pair(usize, usize),
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Index(i) => write!(f, "{}", i),
            TaskId::Pair(i, j) => write!(f, "({}, {})", i, j),
        }
    }
}

/// Height and weight of one individual.
#[derive(Debug, Clone, Copy, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct BodyMeasurement {
    /// Height in centimetres
    pub height_cm: f64,
    /// Weight in kilograms
    pub weight_kg: f64,
}

impl BodyMeasurement {
    /// Create a measurement
    pub fn new(height_cm: f64, weight_kg: f64) -> Self {
        Self {
            height_cm,
            weight_kg,
        }
    }
}

/// Two dense vectors taken from a shared sample.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct VectorPair {
    /// Left operand
    pub left: Vec<f64>,
    /// Right operand
    pub right: Vec<f64>,
}

/// Typed task payload.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum Payload {
    /// A single number
    Scalar(f64),
    /// One individual of a population
    Body(BodyMeasurement),
    /// A pair of vectors
    Vectors(VectorPair),
}

/// Sample data a task sequence is built from.
///
/// Workers rebuild the task sequence themselves, so only a [`Sample::shard`]
/// and an index range cross the process boundary.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum Sample {
    /// Plain numbers, one task each
    Values(Vec<f64>),
    /// Individuals, one task each
    Population(Vec<BodyMeasurement>),
    /// Vectors, one task per unordered pair
    Vectors(Vec<Vec<f64>>),
}

impl Sample {
    /// Number of points in the sample (not the number of tasks)
    pub fn len(&self) -> usize {
        match self {
            Sample::Values(v) => v.len(),
            Sample::Population(p) => p.len(),
            Sample::Vectors(v) => v.len(),
        }
    }

    /// Whether the sample has no points
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tasks this sample expands into
    pub fn task_count(&self) -> usize {
        match self {
            Sample::Vectors(v) => v.len() * v.len().saturating_sub(1) / 2,
            other => other.len(),
        }
    }

    /// The part of the sample tasks `range` are built from, with the task
    /// index of its first element.
    ///
    /// One-task-per-point samples are cut down to `range`. Pair tasks can
    /// reach any later point, so vector samples are returned whole at offset 0.
    pub fn shard(&self, range: Range<usize>) -> (Sample, usize) {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        match self {
            Sample::Values(v) => (Sample::Values(v[start..end].to_vec()), start),
            Sample::Population(p) => (Sample::Population(p[start..end].to_vec()), start),
            Sample::Vectors(_) => (self.clone(), 0),
        }
    }
}

/// Built-in task functions a worker process can resolve by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum TaskKind {
    /// Euclidean distance between the two vectors of a pair
    EuclideanDistance,
    /// Body-mass index of one individual
    BodyMassIndex,
    /// The scalar payload itself
    Identity,
}

impl TaskKind {
    /// Stable lowercase name used in logs and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::EuclideanDistance => "euclidean-distance",
            TaskKind::BodyMassIndex => "body-mass-index",
            TaskKind::Identity => "identity",
        }
    }
}

/// One computed result
#[derive(Debug, Clone, Copy, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct TaskOutput {
    /// Identity of the task that produced the value
    pub id: TaskId,
    /// Result of the task function
    pub value: f64,
}

/// Worker capabilities advertised during handshake
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct WorkerCapabilities {
    /// Protocol version for compatibility
    pub protocol_version: u32,
    /// Worker process id
    pub pid: u32,
    /// Number of logical CPUs available
    pub cpu_count: u32,
}

impl Default for WorkerCapabilities {
    fn default() -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION,
            pid: std::process::id(),
            cpu_count: num_cpus(),
        }
    }
}

/// Messages sent from Worker to Supervisor
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkerMessage {
    /// Initial handshake with worker capabilities
    Hello(WorkerCapabilities),

    /// Progress update for long partitions
    Progress {
        /// Partition being executed
        partition: u32,
        /// Tasks completed so far
        completed: u64,
        /// Tasks in the partition
        total: u64,
    },

    /// Partition executed successfully
    PartitionComplete {
        /// Partition index
        partition: u32,
        /// Results in task order
        results: Vec<TaskOutput>,
        /// Time spent executing, in nanoseconds
        duration_nanos: u64,
    },

    /// Partition failed
    Failure {
        /// Error category
        kind: FailureKind,
        /// Human-readable error message
        message: String,
    },
}

/// Categories of worker failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum FailureKind {
    /// Rust panic (caught)
    Panic,
    /// The task function returned an error
    Task,
    /// The command could not be honoured (bad range, wrong payload)
    InvalidCommand,
}

/// Commands sent from Supervisor to Worker
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum SupervisorCommand {
    /// Execute tasks `lo..hi` of the sequence built from `sample`
    Run {
        /// Partition index, echoed back in the reply
        partition: u32,
        /// Task function to apply
        kind: TaskKind,
        /// Shard of the sample the tasks are rebuilt from
        sample: Sample,
        /// Task index of the shard's first element (0 for a whole sample)
        offset: u64,
        /// First task to run
        lo: u64,
        /// One past the last task to run
        hi: u64,
    },

    /// Request graceful shutdown
    Shutdown,

    /// Ping for health check
    Ping,
}

fn num_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|p| p.get() as u32)
        .unwrap_or(1)
}
