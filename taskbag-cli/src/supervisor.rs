//! Supervisor Process
//!
//! Spawns one worker process per partition, hands each its `[lo, hi)` range
//! over IPC in bounded chunks and collects the partial results. Every worker of a run is torn
//! down before the run returns, whether it succeeded or not.

use indicatif::ProgressBar;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use std::env;
use std::ops::Range;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use taskbag_core::{CancelToken, IPC_FD_ENV, PartialResult, Partition, WORKER_FLAG};
use taskbag_ipc::{
    FailureKind, FrameError, FrameReader, FrameWriter, PROTOCOL_VERSION, RUN_CHUNK_TASKS, Sample,
    SupervisorCommand, TaskKind, TaskOutput, WorkerCapabilities, WorkerMessage,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Worker for partition {partition} crashed: {message}")]
    WorkerCrashed { partition: usize, message: String },

    #[error("Worker for partition {partition} failed ({kind:?}): {message}")]
    WorkerFailed {
        partition: usize,
        kind: FailureKind,
        message: String,
    },

    #[error("Worker for partition {partition} timed out after {timeout:?}")]
    Timeout { partition: usize, timeout: Duration },

    #[error("Worker for partition {partition} stopped because another worker failed")]
    Aborted { partition: usize },

    #[error("Worker protocol error: expected {expected}, got {got}")]
    ProtocolError { expected: String, got: String },

    #[error("Failed to build worker pool: {0}")]
    Pool(String),
}

impl From<FrameError> for SupervisorError {
    fn from(e: FrameError) -> Self {
        SupervisorError::IpcError(e.to_string())
    }
}

impl SupervisorError {
    /// Partition the error belongs to, if any
    pub fn partition(&self) -> Option<usize> {
        match self {
            SupervisorError::WorkerCrashed { partition, .. }
            | SupervisorError::WorkerFailed { partition, .. }
            | SupervisorError::Timeout { partition, .. }
            | SupervisorError::Aborted { partition } => Some(*partition),
            _ => None,
        }
    }
}

/// Result of polling for data
#[derive(Debug)]
enum PollResult {
    DataAvailable,
    Timeout,
    PipeClosed,
    Error(std::io::Error),
}

/// Wait for data to be available on a file descriptor with timeout
fn wait_for_data(fd: i32, timeout_ms: i32) -> PollResult {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };

    if result < 0 {
        PollResult::Error(std::io::Error::last_os_error())
    } else if result == 0 {
        PollResult::Timeout
    } else if pollfd.revents & libc::POLLIN != 0 {
        // Data first: a closing pipe can still hold the final reply
        PollResult::DataAvailable
    } else if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        PollResult::PipeClosed
    } else {
        PollResult::Timeout
    }
}

/// Create a pipe pair with close-on-exec set, returning (read_fd, write_fd).
///
/// Workers are spawned from several threads at once, so on Linux the flag is
/// set atomically and a concurrent fork can never inherit the pipe.
fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];

    #[cfg(target_os = "linux")]
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    #[cfg(not(target_os = "linux"))]
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };

    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    #[cfg(not(target_os = "linux"))]
    for &fd in &fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Send SIGTERM to a process. Returns `Err` if the signal could not be delivered.
fn send_sigterm(pid: u32) -> Result<(), std::io::Error> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Worker process handle
pub struct WorkerHandle {
    child: Child,
    reader: FrameReader<std::fs::File>,
    writer: FrameWriter<std::fs::File>,
    capabilities: Option<WorkerCapabilities>,
    timeout: Duration,
    msg_read_fd: RawFd,
    chunk_tasks: usize,
}

impl WorkerHandle {
    /// Spawn a worker by re-executing the current binary, using fd 3/4 for IPC.
    pub fn spawn(timeout: Duration) -> Result<Self, SupervisorError> {
        let binary = env::current_exe().map_err(SupervisorError::SpawnFailed)?;
        Self::spawn_binary(&binary, timeout)
    }

    /// Spawn a worker from a specific binary
    pub fn spawn_binary(binary: &Path, timeout: Duration) -> Result<Self, SupervisorError> {
        // cmd_pipe: supervisor writes commands → worker reads from fd 3
        let (cmd_read, cmd_write) = create_pipe()?;
        // msg_pipe: worker writes messages from fd 4 → supervisor reads
        let (msg_read, msg_write) = match create_pipe() {
            Ok(fds) => fds,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                return Err(SupervisorError::SpawnFailed(e));
            }
        };

        let mut command = Command::new(binary);
        command
            .arg(WORKER_FLAG)
            .env(IPC_FD_ENV, "3,4")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        // In the child: cmd_read becomes fd 3 and msg_write fd 4. Any of the
        // four pipe fds may already sit on 3 or 4, so the two child ends are
        // first lifted to fds >= 10 and every original is closed before
        // dup2 writes the targets. dup'd fds never carry FD_CLOEXEC.
        unsafe {
            command.pre_exec(move || {
                let read = libc::fcntl(cmd_read, libc::F_DUPFD, 10);
                if read < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                let write = libc::fcntl(msg_write, libc::F_DUPFD, 10);
                if write < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                for fd in [cmd_read, cmd_write, msg_read, msg_write] {
                    libc::close(fd);
                }

                if libc::dup2(read, 3) < 0 || libc::dup2(write, 4) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                libc::close(read);
                libc::close(write);

                Ok(())
            });
        }

        let child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                close_fd(msg_read);
                close_fd(msg_write);
                return Err(SupervisorError::SpawnFailed(e));
            }
        };

        // Child-side ends are not ours to keep
        close_fd(cmd_read);
        close_fd(msg_write);

        let writer_file = unsafe { std::fs::File::from_raw_fd(cmd_write) };
        let reader_file = unsafe { std::fs::File::from_raw_fd(msg_read) };

        let mut handle = Self {
            child,
            reader: FrameReader::new(reader_file),
            writer: FrameWriter::new(writer_file),
            capabilities: None,
            timeout,
            msg_read_fd: msg_read,
            chunk_tasks: RUN_CHUNK_TASKS,
        };

        handle.wait_for_hello()?;
        Ok(handle)
    }

    /// Wait for Hello message from worker and validate protocol version
    fn wait_for_hello(&mut self) -> Result<(), SupervisorError> {
        match wait_for_data(self.msg_read_fd, self.timeout.as_millis().min(i32::MAX as u128) as i32)
        {
            PollResult::DataAvailable => {}
            PollResult::Timeout => {
                return Err(SupervisorError::ProtocolError {
                    expected: "Hello".to_string(),
                    got: format!("nothing within {:?}", self.timeout),
                });
            }
            PollResult::PipeClosed => {
                return Err(SupervisorError::ProtocolError {
                    expected: "Hello".to_string(),
                    got: "closed pipe".to_string(),
                });
            }
            PollResult::Error(e) => return Err(SupervisorError::SpawnFailed(e)),
        }

        let msg: WorkerMessage = self.reader.read()?;
        match msg {
            WorkerMessage::Hello(caps) => {
                if caps.protocol_version != PROTOCOL_VERSION {
                    return Err(SupervisorError::ProtocolError {
                        expected: format!("protocol version {}", PROTOCOL_VERSION),
                        got: format!("protocol version {}", caps.protocol_version),
                    });
                }
                tracing::debug!(pid = caps.pid, cpus = caps.cpu_count, "worker ready");
                self.capabilities = Some(caps);
                Ok(())
            }
            other => Err(SupervisorError::ProtocolError {
                expected: "Hello".to_string(),
                got: format!("{:?}", other),
            }),
        }
    }

    /// Worker capabilities from the handshake
    pub fn capabilities(&self) -> Option<&WorkerCapabilities> {
        self.capabilities.as_ref()
    }

    /// Operating-system id of the worker process
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Run one partition on this worker.
    ///
    /// The partition is sent as `Run` commands of at most `chunk_tasks` tasks,
    /// each carrying only the shard of the sample it needs. `on_progress`
    /// receives the number of newly completed tasks. The call returns
    /// `Aborted` as soon as `cancel` is set; the timeout covers the whole
    /// partition.
    pub fn run_partition(
        &mut self,
        partition: &Partition,
        kind: TaskKind,
        sample: &Sample,
        cancel: &CancelToken,
        on_progress: &(dyn Fn(u64) + Sync),
    ) -> Result<PartialResult<f64>, SupervisorError> {
        let index = partition.index;
        let start = Instant::now();
        let mut results = Vec::with_capacity(partition.len());
        let mut busy = Duration::ZERO;

        for range in chunk_ranges(partition.range.clone(), self.chunk_tasks) {
            self.writer.write(&run_command(index, kind, sample, range))?;
            let (outputs, elapsed) = self.await_chunk(index, start, cancel, on_progress)?;
            results.extend(outputs.into_iter().map(|out| (out.id, out.value)));
            busy += elapsed;
        }

        Ok(PartialResult {
            partition: index,
            range: partition.range.clone(),
            results,
            elapsed: busy,
        })
    }

    /// Wait for the reply to the last `Run` command
    fn await_chunk(
        &mut self,
        index: usize,
        start: Instant,
        cancel: &CancelToken,
        on_progress: &(dyn Fn(u64) + Sync),
    ) -> Result<(Vec<TaskOutput>, Duration), SupervisorError> {
        let mut reported = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Err(SupervisorError::Aborted { partition: index });
            }

            let remaining = self.timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(self.handle_timeout(index));
            }

            // Even with buffered data we verify the worker is alive; the buffer
            // might hold an incomplete frame that will never be completed.
            if self.reader.has_buffered_data() {
                if !self.is_alive() {
                    return Err(crashed(index, "worker exited with partial data buffered"));
                }
            } else {
                let poll_timeout = remaining.min(Duration::from_millis(100));
                match wait_for_data(self.msg_read_fd, poll_timeout.as_millis() as i32) {
                    PollResult::DataAvailable => {}
                    PollResult::Timeout => {
                        if !self.is_alive() {
                            return Err(crashed(index, "worker exited unexpectedly"));
                        }
                        continue;
                    }
                    PollResult::PipeClosed => {
                        return Err(crashed(index, "worker pipe closed unexpectedly"));
                    }
                    PollResult::Error(e) => {
                        return Err(crashed(index, &format!("pipe error: {}", e)));
                    }
                }
            }

            let msg: WorkerMessage = match self.reader.read() {
                Ok(msg) => msg,
                Err(FrameError::EndOfStream) => {
                    return Err(crashed(index, "worker closed connection unexpectedly"));
                }
                Err(e) => {
                    if !self.is_alive() {
                        return Err(crashed(index, "worker crashed during read"));
                    }
                    return Err(SupervisorError::IpcError(e.to_string()));
                }
            };

            match msg {
                WorkerMessage::Progress { completed, .. } => {
                    on_progress(completed.saturating_sub(reported));
                    reported = reported.max(completed);
                }
                WorkerMessage::PartitionComplete {
                    partition: echoed,
                    results,
                    duration_nanos,
                } => {
                    if echoed as usize != index {
                        return Err(SupervisorError::ProtocolError {
                            expected: format!("results for partition {index}"),
                            got: format!("results for partition {echoed}"),
                        });
                    }
                    on_progress((results.len() as u64).saturating_sub(reported));
                    return Ok((results, Duration::from_nanos(duration_nanos)));
                }
                WorkerMessage::Failure { kind, message } => {
                    return Err(SupervisorError::WorkerFailed {
                        partition: index,
                        kind,
                        message,
                    });
                }
                WorkerMessage::Hello(_) => {
                    return Err(SupervisorError::ProtocolError {
                        expected: "Progress/PartitionComplete/Failure".to_string(),
                        got: "Hello".to_string(),
                    });
                }
            }
        }
    }

    /// SIGTERM, a short grace period, then SIGKILL
    fn handle_timeout(&mut self, partition: usize) -> SupervisorError {
        tracing::warn!(partition, timeout = ?self.timeout, "worker timed out");
        let _ = send_sigterm(self.child.id());

        let grace = Instant::now() + Duration::from_millis(500);
        while Instant::now() < grace && self.is_alive() {
            std::thread::sleep(Duration::from_millis(10));
        }
        if self.is_alive() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();

        SupervisorError::Timeout {
            partition,
            timeout: self.timeout,
        }
    }

    /// Ping the worker
    pub fn ping(&mut self) -> Result<(), SupervisorError> {
        self.writer.write(&SupervisorCommand::Ping)?;
        Ok(())
    }

    /// Shutdown the worker gracefully
    pub fn shutdown(mut self) -> Result<(), SupervisorError> {
        self.writer.write(&SupervisorCommand::Shutdown)?;
        let _ = self.child.wait();
        Ok(())
    }

    /// Check if worker process is still running
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the worker process forcefully
    pub fn kill(&mut self) -> Result<(), SupervisorError> {
        self.child.kill().map_err(SupervisorError::SpawnFailed)?;
        let _ = self.child.wait();
        Ok(())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.is_alive() {
            // Graceful: SIGTERM first, brief wait, then SIGKILL
            let _ = send_sigterm(self.child.id());
            std::thread::sleep(Duration::from_millis(50));
            if self.is_alive() {
                let _ = self.child.kill();
            }
            let _ = self.child.wait();
        }
    }
}

fn crashed(partition: usize, message: &str) -> SupervisorError {
    SupervisorError::WorkerCrashed {
        partition,
        message: message.to_string(),
    }
}

/// `range` cut into consecutive pieces of at most `chunk` tasks. An empty
/// range still yields itself once, so every partition gets a reply.
fn chunk_ranges(range: Range<usize>, chunk: usize) -> impl Iterator<Item = Range<usize>> {
    let chunk = chunk.max(1);
    let pieces = range.len().div_ceil(chunk).max(1);
    (0..pieces).map(move |k| {
        let lo = range.start + k * chunk;
        lo..(lo + chunk).min(range.end)
    })
}

/// `Run` command for tasks `range`, carrying only the shard they need
fn run_command(
    partition: usize,
    kind: TaskKind,
    sample: &Sample,
    range: Range<usize>,
) -> SupervisorCommand {
    let (shard, offset) = sample.shard(range.clone());
    SupervisorCommand::Run {
        partition: partition as u32,
        kind,
        sample: shard,
        offset: offset as u64,
        lo: range.start as u64,
        hi: range.end as u64,
    }
}

/// Runs the partitions of one run in worker processes
pub struct Supervisor {
    timeout: Duration,
    workers: usize,
    binary: Option<PathBuf>,
    progress: Option<ProgressBar>,
    chunk_tasks: usize,
}

impl Supervisor {
    /// Supervisor for `workers` processes, each allowed `timeout` per partition
    pub fn new(timeout: Duration, workers: usize) -> Self {
        Self {
            timeout,
            workers: workers.max(1),
            binary: None,
            progress: None,
            chunk_tasks: RUN_CHUNK_TASKS,
        }
    }

    /// Spawn workers from `binary` instead of the current executable
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    /// Advance `bar` by the number of tasks workers report as done
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Cap the tasks of a single `Run` command (at least 1)
    pub fn with_chunk_tasks(mut self, chunk_tasks: usize) -> Self {
        self.chunk_tasks = chunk_tasks.max(1);
        self
    }

    /// Number of worker processes per run
    pub fn workers(&self) -> usize {
        self.workers
    }

    fn spawn(&self) -> Result<WorkerHandle, SupervisorError> {
        let mut worker = match &self.binary {
            Some(binary) => WorkerHandle::spawn_binary(binary, self.timeout)?,
            None => WorkerHandle::spawn(self.timeout)?,
        };
        worker.chunk_tasks = self.chunk_tasks;
        Ok(worker)
    }

    /// Execute every partition in its own worker process.
    ///
    /// Fails the whole run on the first worker failure; the remaining workers
    /// are told to stop and are torn down.
    pub fn run(
        &self,
        kind: TaskKind,
        sample: &Sample,
        partitions: &[Partition],
    ) -> Result<Vec<PartialResult<f64>>, SupervisorError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("taskbag-supervisor-{i}"))
            .build()
            .map_err(|e| SupervisorError::Pool(e.to_string()))?;

        let cancel = CancelToken::new();
        let on_progress = |done: u64| {
            if let Some(bar) = &self.progress {
                bar.inc(done);
            }
        };

        let outcomes: Vec<Result<PartialResult<f64>, SupervisorError>> = pool.install(|| {
            partitions
                .par_iter()
                .with_max_len(1)
                .map(|p| {
                    let outcome = self.run_isolated(p, kind, sample, &cancel, &on_progress);
                    if outcome.is_err() {
                        cancel.cancel();
                    }
                    outcome
                })
                .collect()
        });
        drop(pool);

        // Report the root cause rather than the aborts it triggered
        let mut partials = Vec::with_capacity(outcomes.len());
        let mut aborted = None;
        for outcome in outcomes {
            match outcome {
                Ok(partial) => partials.push(partial),
                Err(e @ SupervisorError::Aborted { .. }) => {
                    aborted.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        if let Some(e) = aborted {
            return Err(e);
        }
        Ok(partials)
    }

    /// Run a single partition in a fresh worker process
    fn run_isolated(
        &self,
        partition: &Partition,
        kind: TaskKind,
        sample: &Sample,
        cancel: &CancelToken,
        on_progress: &(dyn Fn(u64) + Sync),
    ) -> Result<PartialResult<f64>, SupervisorError> {
        if cancel.is_cancelled() {
            return Err(SupervisorError::Aborted {
                partition: partition.index,
            });
        }
        let mut worker = self.spawn()?;
        tracing::debug!(
            partition = partition.index,
            pid = worker.pid(),
            lo = partition.lo(),
            hi = partition.hi(),
            "partition dispatched to worker process"
        );
        let result = worker.run_partition(partition, kind, sample, cancel, on_progress);
        if result.is_ok() {
            let _ = worker.shutdown();
        }
        result
    }
}
