//! Task functions
//!
//! A [`TaskFunction`] maps one payload to one result. It must be pure: it may
//! run on any worker thread or inside a separate worker process, so nothing
//! it does can be observed outside its return value.

use std::marker::PhantomData;
use taskbag_ipc::{Payload, TaskId, TaskKind};
use thiserror::Error;

/// Failure of a task function or of the executor running it
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    /// The payload was well-typed but the function rejected it
    #[error("{0}")]
    Invalid(String),

    /// The payload variant does not fit the function
    #[error("{function} cannot be applied to a {found} payload")]
    PayloadMismatch {
        function: &'static str,
        found: &'static str,
    },

    /// A failure located at a specific task
    #[error("task {id}: {source}")]
    At {
        id: TaskId,
        #[source]
        source: Box<TaskError>,
    },

    /// The partition was cancelled before all tasks ran
    #[error("partition {partition} cancelled after {completed} tasks")]
    Cancelled { partition: usize, completed: usize },
}

impl TaskError {
    /// Attach the identity of the failing task
    pub fn at(self, id: TaskId) -> Self {
        match self {
            already @ (TaskError::At { .. } | TaskError::Cancelled { .. }) => already,
            other => TaskError::At {
                id,
                source: Box::new(other),
            },
        }
    }

    /// Identity of the failing task, if known
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            TaskError::At { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// A pure mapping from one payload to one result
pub trait TaskFunction<P>: Sync {
    /// Result of one task
    type Output: Send;

    /// Apply the function to one payload
    fn apply(&self, payload: &P) -> Result<Self::Output, TaskError>;

    /// Name used in logs and reports
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<P, T: TaskFunction<P> + ?Sized> TaskFunction<P> for &T {
    type Output = T::Output;

    fn apply(&self, payload: &P) -> Result<Self::Output, TaskError> {
        (**self).apply(payload)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Closure adapter returned by [`task_fn`]
pub struct FnTask<F, P, O> {
    f: F,
    name: &'static str,
    _signature: PhantomData<fn(&P) -> O>,
}

impl<F, P, O> FnTask<F, P, O> {
    /// Rename the function for logs and reports
    pub fn named(self, name: &'static str) -> Self {
        Self { name, ..self }
    }
}

/// Turn a closure into a [`TaskFunction`]
///
/// # Examples
///
/// ```
/// # use taskbag_core::{TaskFunction, task_fn};
/// let square = task_fn(|x: &f64| Ok(x * x)).named("square");
/// assert_eq!(square.apply(&3.0), Ok(9.0));
/// assert_eq!(square.name(), "square");
/// ```
pub fn task_fn<P, O, F>(f: F) -> FnTask<F, P, O>
where
    F: Fn(&P) -> Result<O, TaskError> + Sync,
{
    FnTask {
        f,
        name: "closure",
        _signature: PhantomData,
    }
}

impl<P, O, F> TaskFunction<P> for FnTask<F, P, O>
where
    F: Fn(&P) -> Result<O, TaskError> + Sync,
    O: Send,
{
    type Output = O;

    fn apply(&self, payload: &P) -> Result<O, TaskError> {
        (self.f)(payload)
    }

    fn name(&self) -> &str {
        self.name
    }
}

fn payload_kind(payload: &Payload) -> &'static str {
    match payload {
        Payload::Scalar(_) => "scalar",
        Payload::Body(_) => "body",
        Payload::Vectors(_) => "vector-pair",
    }
}

/// Euclidean distance between the two vectors of a pair
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanDistance;

impl TaskFunction<Payload> for EuclideanDistance {
    type Output = f64;

    fn apply(&self, payload: &Payload) -> Result<f64, TaskError> {
        let Payload::Vectors(pair) = payload else {
            return Err(TaskError::PayloadMismatch {
                function: TaskKind::EuclideanDistance.as_str(),
                found: payload_kind(payload),
            });
        };
        if pair.left.len() != pair.right.len() {
            return Err(TaskError::Invalid(format!(
                "dimension mismatch: {} vs {}",
                pair.left.len(),
                pair.right.len()
            )));
        }
        let squared: f64 = pair
            .left
            .iter()
            .zip(&pair.right)
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        Ok(squared.sqrt())
    }

    fn name(&self) -> &str {
        TaskKind::EuclideanDistance.as_str()
    }
}

/// Body-mass index, `weight / (height / 100)^2`
#[derive(Debug, Clone, Copy, Default)]
pub struct BodyMassIndex;

impl TaskFunction<Payload> for BodyMassIndex {
    type Output = f64;

    fn apply(&self, payload: &Payload) -> Result<f64, TaskError> {
        let Payload::Body(body) = payload else {
            return Err(TaskError::PayloadMismatch {
                function: TaskKind::BodyMassIndex.as_str(),
                found: payload_kind(payload),
            });
        };
        if body.height_cm.is_nan() || body.height_cm <= 0.0 {
            return Err(TaskError::Invalid(format!(
                "non-positive height {} cm",
                body.height_cm
            )));
        }
        let metres = body.height_cm / 100.0;
        Ok(body.weight_kg / (metres * metres))
    }

    fn name(&self) -> &str {
        TaskKind::BodyMassIndex.as_str()
    }
}

/// The scalar payload itself
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl TaskFunction<Payload> for Identity {
    type Output = f64;

    fn apply(&self, payload: &Payload) -> Result<f64, TaskError> {
        match payload {
            Payload::Scalar(x) => Ok(*x),
            other => Err(TaskError::PayloadMismatch {
                function: TaskKind::Identity.as_str(),
                found: payload_kind(other),
            }),
        }
    }

    fn name(&self) -> &str {
        TaskKind::Identity.as_str()
    }
}

/// Built-in functions are resolvable by kind, which is how worker processes
/// find the function a `Run` command names.
impl TaskFunction<Payload> for TaskKind {
    type Output = f64;

    fn apply(&self, payload: &Payload) -> Result<f64, TaskError> {
        match self {
            TaskKind::EuclideanDistance => EuclideanDistance.apply(payload),
            TaskKind::BodyMassIndex => BodyMassIndex.apply(payload),
            TaskKind::Identity => Identity.apply(payload),
        }
    }

    fn name(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskbag_ipc::{BodyMeasurement, VectorPair};

    fn pair(left: Vec<f64>, right: Vec<f64>) -> Payload {
        Payload::Vectors(VectorPair { left, right })
    }

    #[test]
    fn test_euclidean_distance() {
        let d = EuclideanDistance
            .apply(&pair(vec![0.0, 0.0], vec![1.0, 1.0]))
            .unwrap();
        assert_eq!(d, std::f64::consts::SQRT_2);
        assert_eq!(
            EuclideanDistance.apply(&pair(vec![3.0], vec![0.0])).unwrap(),
            3.0
        );
    }

    #[test]
    fn test_euclidean_dimension_mismatch() {
        let err = EuclideanDistance
            .apply(&pair(vec![0.0, 0.0], vec![1.0]))
            .unwrap_err();
        assert!(matches!(err, TaskError::Invalid(_)));
    }

    #[test]
    fn test_body_mass_index() {
        let bmi = BodyMassIndex
            .apply(&Payload::Body(BodyMeasurement::new(200.0, 80.0)))
            .unwrap();
        assert!((bmi - 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_body_mass_index_rejects_bad_height() {
        for height in [0.0, -170.0, f64::NAN] {
            assert!(
                BodyMassIndex
                    .apply(&Payload::Body(BodyMeasurement::new(height, 70.0)))
                    .is_err()
            );
        }
    }

    #[test]
    fn test_payload_mismatch() {
        let err = Identity
            .apply(&Payload::Body(BodyMeasurement::new(170.0, 60.0)))
            .unwrap_err();
        assert_eq!(
            err,
            TaskError::PayloadMismatch {
                function: "identity",
                found: "body"
            }
        );
    }

    #[test]
    fn test_task_kind_dispatch() {
        assert_eq!(TaskKind::Identity.apply(&Payload::Scalar(4.5)), Ok(4.5));
        assert_eq!(TaskKind::BodyMassIndex.name(), "body-mass-index");
    }

    #[test]
    fn test_error_location() {
        let err = TaskError::Invalid("boom".into()).at(TaskId::Pair(1, 2));
        assert_eq!(err.task_id(), Some(TaskId::Pair(1, 2)));
        assert_eq!(err.to_string(), "task (1, 2): boom");
        // already located errors keep their first location
        assert_eq!(err.clone().at(TaskId::Index(9)), err);
    }

    #[test]
    fn test_closure_adapter() {
        let halve = task_fn(|x: &f64| {
            if *x < 0.0 {
                Err(TaskError::Invalid("negative".into()))
            } else {
                Ok(x / 2.0)
            }
        });
        assert_eq!(halve.apply(&8.0), Ok(4.0));
        assert!(halve.apply(&-1.0).is_err());
        assert_eq!(halve.name(), "closure");
    }
}
