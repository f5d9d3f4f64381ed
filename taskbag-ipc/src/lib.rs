#![warn(missing_docs)]
//! Taskbag IPC Protocol
//!
//! Serialization protocol for supervisor-worker communication.
//! Uses rkyv with validation so a worker never trusts bytes it did not check.
//! Carries the typed task data model (identities, payloads, samples) together
//! with the partition commands and replies exchanged over the pipes.

mod framing;
mod messages;

pub use framing::{FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE, decode, encode};
pub use messages::{
    BodyMeasurement, FailureKind, Payload, Sample, SupervisorCommand, TaskId, TaskKind, TaskOutput,
    VectorPair, WorkerCapabilities, WorkerMessage,
};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Minimum number of tasks between two progress messages from a worker
pub const PROGRESS_INTERVAL: u64 = 100_000;

/// Most tasks a single `Run` command covers; longer partitions are sent in
/// several commands so neither the command nor its reply nears
/// [`MAX_FRAME_SIZE`]
pub const RUN_CHUNK_TASKS: usize = 1_000_000;
