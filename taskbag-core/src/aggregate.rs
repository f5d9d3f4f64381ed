//! Aggregation of partial results
//!
//! Partials are put back into partition order before anything else happens,
//! so the order in which workers finished never reaches the result.

use crate::executor::PartialResult;
use fxhash::FxHashMap;
use taskbag_ipc::TaskId;
use thiserror::Error;

/// Result of every task keyed by its identity
pub type IdentityMap<O> = FxHashMap<TaskId, O>;

/// Errors raised while combining partials
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("no results to aggregate")]
    EmptyInput,

    #[error("task {0} produced more than one result")]
    DuplicateIdentity(TaskId),
}

/// How partials are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationMode {
    /// Keep every result, keyed by task identity
    Identity,
    /// Reduce all results to their arithmetic mean
    Mean,
}

/// Final answer of a run
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateResult<O> {
    /// One entry per task
    Identity(IdentityMap<O>),
    /// Arithmetic mean over `count` results
    Mean { value: f64, count: usize },
}

impl<O> AggregateResult<O> {
    /// The mean, when aggregated in mean mode
    pub fn mean(&self) -> Option<f64> {
        match self {
            AggregateResult::Mean { value, .. } => Some(*value),
            AggregateResult::Identity(_) => None,
        }
    }

    /// The identity map, when aggregated in identity mode
    pub fn as_map(&self) -> Option<&IdentityMap<O>> {
        match self {
            AggregateResult::Identity(map) => Some(map),
            AggregateResult::Mean { .. } => None,
        }
    }

    /// Number of task results the aggregate was built from
    pub fn count(&self) -> usize {
        match self {
            AggregateResult::Identity(map) => map.len(),
            AggregateResult::Mean { count, .. } => *count,
        }
    }
}

/// Sort partials by partition index
pub fn in_partition_order<O>(mut partials: Vec<PartialResult<O>>) -> Vec<PartialResult<O>> {
    partials.sort_by_key(|p| p.partition);
    partials
}

/// Combine partials in the requested mode
pub fn aggregate<O>(
    partials: Vec<PartialResult<O>>,
    mode: AggregationMode,
) -> Result<AggregateResult<O>, AggregateError>
where
    O: Copy + Into<f64>,
{
    match mode {
        AggregationMode::Identity => aggregate_identity(partials).map(AggregateResult::Identity),
        AggregationMode::Mean => {
            let count = partials.iter().map(PartialResult::len).sum();
            aggregate_mean(&in_partition_order(partials))
                .map(|value| AggregateResult::Mean { value, count })
        }
    }
}

/// Build the identity map; any repeated identity is an error
pub fn aggregate_identity<O>(
    partials: Vec<PartialResult<O>>,
) -> Result<IdentityMap<O>, AggregateError> {
    let partials = in_partition_order(partials);
    let total = partials.iter().map(PartialResult::len).sum();
    let mut map = IdentityMap::with_capacity_and_hasher(total, Default::default());

    for partial in partials {
        for (id, value) in partial.results {
            if map.insert(id, value).is_some() {
                return Err(AggregateError::DuplicateIdentity(id));
            }
        }
    }
    Ok(map)
}

/// Mean of all results, summed left to right in partition then task order.
///
/// The summation order matches [`taskbag_stats::mean`] over the flattened
/// sequence, so a sequential run and a parallel run agree bit for bit.
pub fn aggregate_mean<O>(partials: &[PartialResult<O>]) -> Result<f64, AggregateError>
where
    O: Copy + Into<f64>,
{
    let mut sum = 0.0;
    let mut count = 0usize;
    for partial in partials {
        for &(_, value) in &partial.results {
            sum += value.into();
            count += 1;
        }
    }
    if count == 0 {
        return Err(AggregateError::EmptyInput);
    }
    Ok(sum / count as f64)
}
