//! Worker Process Entry Point
//!
//! Handles the worker side of the supervisor-worker architecture. Each `Run`
//! command carries a shard of the sample plus a `[lo, hi)` task range; the
//! worker rebuilds just those tasks and runs them with the built-in function
//! named by the command.
//!
//! On Unix, uses the fds named by `TASKBAG_IPC_FD` for IPC and installs a
//! SIGTERM handler that cancels the running partition. On non-Unix, falls
//! back to stdin/stdout and skips signal handling.

use crate::executor::{CancelToken, execute_partition_with};
use crate::partition::Partition;
use crate::strategy::panic_message;
use crate::task::TaskSequence;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use taskbag_ipc::{
    FailureKind, FrameError, FrameReader, FrameWriter, PROGRESS_INTERVAL, Sample,
    SupervisorCommand, TaskKind, TaskOutput, WorkerCapabilities, WorkerMessage,
};

#[cfg(unix)]
use std::os::unix::io::FromRawFd;

/// Environment variable carrying `<read_fd>,<write_fd>` for the worker
pub const IPC_FD_ENV: &str = "TASKBAG_IPC_FD";

/// Global flag set by SIGTERM handler to request graceful shutdown.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Check if a graceful shutdown has been requested via SIGTERM.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// Install a SIGTERM handler that sets the `SHUTDOWN_REQUESTED` flag.
/// The handler only stores to an atomic, which is async-signal-safe.
#[cfg(unix)]
fn install_sigterm_handler() {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigterm_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
    }
}

#[cfg(unix)]
extern "C" fn sigterm_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

#[cfg(not(unix))]
fn install_sigterm_handler() {}

/// IPC transport: either inherited fd pair or stdin/stdout fallback.
enum IpcTransport {
    #[cfg(unix)]
    Fds { read_fd: i32, write_fd: i32 },
    Stdio,
}

fn detect_transport() -> IpcTransport {
    #[cfg(unix)]
    if let Ok(val) = std::env::var(IPC_FD_ENV) {
        if let Some((r, w)) = val.split_once(',') {
            if let (Ok(read_fd), Ok(write_fd)) = (r.trim().parse(), w.trim().parse()) {
                return IpcTransport::Fds { read_fd, write_fd };
            }
        }
        tracing::warn!(
            value = %val,
            "invalid {IPC_FD_ENV} (expected <read_fd>,<write_fd>), falling back to stdio"
        );
    }
    IpcTransport::Stdio
}

/// Worker main loop
pub struct WorkerMain {
    reader: FrameReader<Box<dyn std::io::Read>>,
    writer: FrameWriter<Box<dyn std::io::Write>>,
}

impl WorkerMain {
    /// Create a worker on the fds named by `TASKBAG_IPC_FD`, or stdin/stdout.
    pub fn new() -> Self {
        match detect_transport() {
            #[cfg(unix)]
            IpcTransport::Fds { read_fd, write_fd } => {
                // SAFETY: the supervisor hands these fds to exactly this process
                let read_file = unsafe { std::fs::File::from_raw_fd(read_fd) };
                let write_file = unsafe { std::fs::File::from_raw_fd(write_fd) };
                Self::with_io(Box::new(read_file), Box::new(write_file))
            }
            IpcTransport::Stdio => Self::with_io(Box::new(std::io::stdin()), Box::new(std::io::stdout())),
        }
    }

    /// Create a worker over arbitrary streams
    pub fn with_io(reader: Box<dyn std::io::Read>, writer: Box<dyn std::io::Write>) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        }
    }

    /// Run the worker main loop until `Shutdown`, SIGTERM or end of stream
    pub fn run(&mut self) -> Result<(), FrameError> {
        install_sigterm_handler();

        self.writer
            .write(&WorkerMessage::Hello(WorkerCapabilities::default()))?;

        loop {
            if shutdown_requested() {
                break;
            }

            let command: SupervisorCommand = match self.reader.read() {
                Ok(command) => command,
                Err(FrameError::EndOfStream) => break,
                Err(e) => return Err(e),
            };

            match command {
                SupervisorCommand::Run {
                    partition,
                    kind,
                    sample,
                    offset,
                    lo,
                    hi,
                } => {
                    let reply = self.run_partition(partition, kind, &sample, offset, lo, hi);
                    self.writer.write(&reply)?;
                }
                SupervisorCommand::Shutdown => break,
                SupervisorCommand::Ping => {}
            }
        }

        Ok(())
    }

    /// Execute one partition and build the reply
    fn run_partition(
        &mut self,
        partition: u32,
        kind: TaskKind,
        shard: &Sample,
        offset: u64,
        lo: u64,
        hi: u64,
    ) -> WorkerMessage {
        let first = match shard {
            Sample::Vectors(_) => 0,
            _ => offset,
        };
        let end = first + shard.task_count() as u64;
        if lo > hi || lo < first || hi > end {
            return WorkerMessage::Failure {
                kind: FailureKind::InvalidCommand,
                message: format!("range [{lo}, {hi}) outside the shard's tasks [{first}, {end})"),
            };
        }

        let tasks = TaskSequence::from_shard(shard, first as usize, lo as usize..hi as usize);
        let local = Partition::new(partition as usize, 0..tasks.len());
        let cancel = CancelToken::new();
        let writer = &mut self.writer;
        let mut last_report = 0u64;

        let result = catch_unwind(AssertUnwindSafe(|| {
            execute_partition_with(&local, &tasks, &kind, &cancel, |done, total| {
                if shutdown_requested() {
                    cancel.cancel();
                }
                let done = done as u64;
                if done - last_report >= PROGRESS_INTERVAL || done == total as u64 {
                    last_report = done;
                    // Progress is advisory; a failed write surfaces on the reply
                    let _ = writer.write(&WorkerMessage::Progress {
                        partition,
                        completed: done,
                        total: total as u64,
                    });
                }
            })
        }));

        match result {
            Ok(Ok(partial)) => WorkerMessage::PartitionComplete {
                partition,
                results: partial
                    .results
                    .into_iter()
                    .map(|(id, value)| TaskOutput { id, value })
                    .collect(),
                duration_nanos: partial.elapsed.as_nanos() as u64,
            },
            Ok(Err(e)) => WorkerMessage::Failure {
                kind: FailureKind::Task,
                message: e.to_string(),
            },
            Err(panic) => WorkerMessage::Failure {
                kind: FailureKind::Panic,
                message: panic_message(panic.as_ref()),
            },
        }
    }
}

impl Default for WorkerMain {
    fn default() -> Self {
        Self::new()
    }
}
