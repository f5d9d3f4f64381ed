//! Process-isolated strategy
//!
//! Presents the [`Supervisor`] through the same strategy contract as the
//! in-process executors, so the runner and aggregator are shared. Only
//! built-in task functions can cross the process boundary, which is why the
//! strategy is implemented for `TaskKind` alone.

use crate::supervisor::{Supervisor, SupervisorError};
use std::sync::Arc;
use taskbag_core::{
    Calibration, ExecutionError, ExecutionStrategy, PartialResult, Partition, Payload, Sample,
    Strategy, TaskError, TaskKind, TaskSequence, partition,
};
use taskbag_ipc::FailureKind;

/// One worker process per partition
pub struct IsolatedExecutor {
    sample: Arc<Sample>,
    workers: usize,
    calibration: Calibration,
    supervisor: Supervisor,
}

impl IsolatedExecutor {
    /// Strategy over `sample` with `workers` processes supervised by `supervisor`
    pub fn new(sample: Arc<Sample>, workers: usize, supervisor: Supervisor) -> Self {
        Self {
            sample,
            workers,
            calibration: Calibration::zero(),
            supervisor,
        }
    }

    /// Per-worker partition size adjustments
    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = calibration;
        self
    }
}

impl Strategy for IsolatedExecutor {
    fn name(&self) -> &'static str {
        "isolated"
    }

    fn worker_count(&self) -> usize {
        self.workers
    }

    fn plan(&self, len: usize) -> Result<Vec<Partition>, ExecutionError> {
        Ok(partition(len, self.workers, &self.calibration)?.collect())
    }
}

impl ExecutionStrategy<Payload, TaskKind> for IsolatedExecutor {
    fn dispatch(
        &self,
        tasks: &TaskSequence<Payload>,
        partitions: &[Partition],
        f: &TaskKind,
    ) -> Result<Vec<PartialResult<f64>>, ExecutionError> {
        // Workers rebuild the sequence from the sample, so both must agree
        let expected = self.sample.task_count();
        if tasks.len() != expected {
            return Err(ExecutionError::Isolation(format!(
                "task sequence has {} tasks but the sample expands to {}",
                tasks.len(),
                expected
            )));
        }

        self.supervisor
            .run(*f, &self.sample, partitions)
            .map_err(into_execution_error)
    }
}

fn into_execution_error(error: SupervisorError) -> ExecutionError {
    match error {
        SupervisorError::WorkerFailed {
            partition,
            kind: FailureKind::Panic,
            message,
        } => ExecutionError::WorkerPanicked { partition, message },
        SupervisorError::WorkerFailed {
            partition, message, ..
        } => ExecutionError::WorkerFailed {
            partition,
            source: TaskError::Invalid(message),
        },
        SupervisorError::Aborted { partition } => ExecutionError::Cancelled { partition },
        other => ExecutionError::Isolation(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_plan_matches_parallel_executor() {
        let sample = Arc::new(Sample::Values(vec![0.0; 10]));
        let isolated = IsolatedExecutor::new(sample, 3, Supervisor::new(Duration::from_secs(1), 3))
            .with_calibration(Calibration::new(vec![1, 0, -1]));
        let parallel =
            taskbag_core::ParallelExecutor::new(3).with_calibration(Calibration::new(vec![1, 0, -1]));
        assert_eq!(isolated.plan(10).unwrap(), parallel.plan(10).unwrap());
    }

    #[test]
    fn test_sequence_must_match_sample() {
        let sample = Arc::new(Sample::Values(vec![1.0, 2.0, 3.0]));
        let isolated =
            IsolatedExecutor::new(sample, 2, Supervisor::new(Duration::from_secs(1), 2));
        let tasks = TaskSequence::from_sample(&Sample::Values(vec![1.0]));
        assert!(matches!(
            isolated.execute(&tasks, &TaskKind::Identity),
            Err(ExecutionError::Isolation(_))
        ));
    }

    #[test]
    fn test_failure_mapping() {
        let panicked = into_execution_error(SupervisorError::WorkerFailed {
            partition: 1,
            kind: FailureKind::Panic,
            message: "boom".into(),
        });
        assert!(matches!(
            panicked,
            ExecutionError::WorkerPanicked { partition: 1, .. }
        ));

        let failed = into_execution_error(SupervisorError::WorkerFailed {
            partition: 2,
            kind: FailureKind::Task,
            message: "bad height".into(),
        });
        assert_eq!(failed.partition(), Some(2));
    }
}
