//! Report Building
//!
//! Turns a finished run (or an estimate) into a [`RunReport`] ready for
//! JSON, CSV or human output.

use super::metadata::build_report_meta;
use taskbag_core::{AggregateResult, Estimate, RunOutcome, TaskId};
use taskbag_report::{MatrixEntry, Outcome, PartitionReport, RunReport, RunSummary};
use taskbag_stats::compute_summary;

/// Entries of an identity-mode result shown in the report
pub const PREVIEW_LEN: usize = 5;

/// Run-level facts the outcome does not carry
#[derive(Debug, Clone, Copy)]
pub struct RunContext {
    /// `distance` or `bmi`
    pub case: &'static str,
    /// `none`, `thread` or `process`
    pub isolation: &'static str,
    /// Size of the task sequence
    pub tasks: usize,
}

/// Build a report from an exact run
pub fn report_from_outcome(context: RunContext, outcome: &RunOutcome<f64>) -> RunReport {
    let partitions = outcome
        .partitions
        .iter()
        .map(|p| PartitionReport {
            index: p.index,
            lo: p.lo,
            hi: p.hi,
            elapsed_ms: p.elapsed.as_secs_f64() * 1000.0,
        })
        .collect();

    let result = match &outcome.value {
        AggregateResult::Mean { value, .. } => Outcome::Mean {
            value: *value,
            summary: None,
        },
        AggregateResult::Identity(map) => {
            let mut entries: Vec<(TaskId, f64)> = map.iter().map(|(id, v)| (*id, *v)).collect();
            entries.sort_by_key(|(id, _)| *id);
            let values: Vec<f64> = entries.iter().map(|(_, v)| *v).collect();
            Outcome::Matrix {
                entries: entries.len(),
                summary: compute_summary(&values),
                preview: entries
                    .iter()
                    .take(PREVIEW_LEN)
                    .map(|(id, value)| MatrixEntry {
                        task: id.to_string(),
                        value: *value,
                    })
                    .collect(),
            }
        }
    };

    RunReport {
        meta: build_report_meta(),
        run: RunSummary {
            case: context.case.to_string(),
            strategy: outcome.strategy.to_string(),
            workers: outcome.workers,
            isolation: context.isolation.to_string(),
            tasks: context.tasks,
            elapsed_ms: outcome.elapsed.as_secs_f64() * 1000.0,
            partitions,
        },
        outcome: result,
    }
}

/// Build a report from an approximate estimate
pub fn report_from_estimate(context: RunContext, estimate: &Estimate) -> RunReport {
    RunReport {
        meta: build_report_meta(),
        run: RunSummary {
            case: context.case.to_string(),
            strategy: "bootstrap".to_string(),
            workers: 1,
            isolation: context.isolation.to_string(),
            tasks: context.tasks,
            elapsed_ms: estimate.elapsed.as_secs_f64() * 1000.0,
            partitions: Vec::new(),
        },
        outcome: Outcome::Estimate {
            lower: estimate.lower,
            point: estimate.point,
            upper: estimate.upper,
            confidence: estimate.confidence,
            drawn: estimate.drawn,
            method: estimate.method,
        },
    }
}
