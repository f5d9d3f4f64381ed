//! Tasks and task sequences
//!
//! A [`Task`] pairs an explicit [`TaskId`] with a typed payload. A
//! [`TaskSequence`] is built once per run and only ever read afterwards.

use crate::partition::Partition;
use std::ops::Range;
use taskbag_ipc::{BodyMeasurement, Payload, Sample, TaskId, VectorPair};

/// One unit of independent work
#[derive(Debug, Clone, PartialEq)]
pub struct Task<P = Payload> {
    id: TaskId,
    payload: P,
}

impl<P> Task<P> {
    /// Create a task
    pub fn new(id: TaskId, payload: P) -> Self {
        Self { id, payload }
    }

    /// Identity of the task
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Payload the task function is applied to
    pub fn payload(&self) -> &P {
        &self.payload
    }
}

/// Ordered, immutable collection of tasks
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSequence<P = Payload> {
    tasks: Vec<Task<P>>,
}

impl<P> TaskSequence<P> {
    /// Wrap tasks that already carry their identities
    pub fn from_tasks(tasks: Vec<Task<P>>) -> Self {
        Self { tasks }
    }

    /// One task per payload, identified by position
    pub fn indexed<I>(payloads: I) -> Self
    where
        I: IntoIterator<Item = P>,
    {
        let tasks = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| Task::new(TaskId::Index(i), payload))
            .collect();
        Self { tasks }
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the sequence holds no tasks
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// All tasks in order
    pub fn as_slice(&self) -> &[Task<P>] {
        &self.tasks
    }

    /// Iterate over the tasks in order
    pub fn iter(&self) -> std::slice::Iter<'_, Task<P>> {
        self.tasks.iter()
    }

    /// Task at `index`
    pub fn get(&self, index: usize) -> Option<&Task<P>> {
        self.tasks.get(index)
    }

    /// Materialize a partition as a borrowed slice.
    ///
    /// Ranges reaching past the end are cut at the sequence length.
    pub fn slice(&self, partition: &Partition) -> &[Task<P>] {
        let len = self.tasks.len();
        let lo = partition.lo().min(len);
        let hi = partition.hi().clamp(lo, len);
        &self.tasks[lo..hi]
    }
}

impl<'a, P> IntoIterator for &'a TaskSequence<P> {
    type Item = &'a Task<P>;
    type IntoIter = std::slice::Iter<'a, Task<P>>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.iter()
    }
}

impl TaskSequence<Payload> {
    /// Every unordered pair `(i, j)`, `i < j`, of `points` in row-major order.
    ///
    /// Each task owns copies of both vectors, so `n` points expand into
    /// `n * (n - 1) / 2` tasks.
    pub fn pairwise(points: &[Vec<f64>]) -> Self {
        Self::pairs_in(points, 0..pair_count(points.len()))
    }

    /// Rebuild the full task sequence a sample expands into
    pub fn from_sample(sample: &Sample) -> Self {
        Self::from_sample_range(sample, 0..sample.task_count())
    }

    /// Rebuild only tasks `range` of the sequence a sample expands into.
    ///
    /// Identities are those of the full sequence, so a worker process holding
    /// the whole sample can execute its partition without materializing the
    /// rest.
    pub fn from_sample_range(sample: &Sample, range: Range<usize>) -> Self {
        Self::from_shard(sample, 0, range)
    }

    /// Rebuild tasks `range` from a shard whose first element is task
    /// `offset` of the full sequence (see [`Sample::shard`]).
    ///
    /// `range` is in full-sequence indices and is clipped to the shard.
    /// Vector shards are always whole samples, so their offset is ignored.
    pub fn from_shard(shard: &Sample, offset: usize, range: Range<usize>) -> Self {
        let (offset, count) = match shard {
            Sample::Vectors(_) => (0, shard.task_count()),
            other => (offset, other.len()),
        };
        let end = range.end.saturating_sub(offset).min(count);
        let local = range.start.saturating_sub(offset).min(end)..end;
        match shard {
            Sample::Values(values) => {
                Self::indexed_range(values, local, offset, |&v| Payload::Scalar(v))
            }
            Sample::Population(people) => {
                Self::indexed_range(people, local, offset, |&b: &BodyMeasurement| Payload::Body(b))
            }
            Sample::Vectors(points) => Self::pairs_in(points, local),
        }
    }

    fn indexed_range<T>(
        items: &[T],
        range: Range<usize>,
        offset: usize,
        to_payload: impl Fn(&T) -> Payload,
    ) -> Self {
        let tasks = items[range.clone()]
            .iter()
            .zip(range)
            .map(|(item, i)| Task::new(TaskId::Index(offset + i), to_payload(item)))
            .collect();
        Self { tasks }
    }

    fn pairs_in(points: &[Vec<f64>], range: Range<usize>) -> Self {
        let n = points.len();
        let mut tasks = Vec::with_capacity(range.len());
        if range.is_empty() {
            return Self { tasks };
        }

        // Locate the row holding the first pair of the range
        let mut row = 0;
        let mut row_start = 0;
        while row_start + (n - 1 - row) <= range.start {
            row_start += n - 1 - row;
            row += 1;
        }

        let mut position = row_start;
        'rows: for i in row..n {
            for j in (i + 1)..n {
                if position >= range.end {
                    break 'rows;
                }
                if position >= range.start {
                    tasks.push(Task::new(
                        TaskId::Pair(i, j),
                        Payload::Vectors(VectorPair {
                            left: points[i].clone(),
                            right: points[j].clone(),
                        }),
                    ));
                }
                position += 1;
            }
        }

        Self { tasks }
    }
}

/// Number of unordered pairs over `n` points
pub fn pair_count(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}
