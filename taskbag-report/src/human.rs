//! Human-readable output

use crate::report::{Outcome, RunReport};
use std::fmt::Write;

/// Format a run report for terminal display
pub fn format_human_output(report: &RunReport) -> String {
    let mut output = String::new();
    let run = &report.run;

    let _ = writeln!(
        output,
        "{} run: {} strategy, {} worker(s), isolation {}, {} tasks",
        run.case, run.strategy, run.workers, run.isolation, run.tasks
    );

    if run.partitions.len() > 1 {
        output.push_str(&"-".repeat(48));
        output.push('\n');
        let _ = writeln!(
            output,
            "  {:>9}  {:>12}  {:>12}  {:>9}",
            "partition", "lo", "hi", "ms"
        );
        for p in &run.partitions {
            let _ = writeln!(
                output,
                "  {:>9}  {:>12}  {:>12}  {:>9.1}",
                p.index, p.lo, p.hi, p.elapsed_ms
            );
        }
        output.push_str(&"-".repeat(48));
        output.push('\n');
    }

    match &report.outcome {
        Outcome::Mean { value, .. } => {
            let _ = writeln!(
                output,
                "-- the point estimate for the center of the distribution is {value:4.1}."
            );
        }
        Outcome::Matrix {
            entries, preview, ..
        } => {
            let _ = writeln!(output, "-- the distance matrix has {entries} elements.");
            for entry in preview {
                let _ = writeln!(output, "     {} = {:.6}", entry.task, entry.value);
            }
        }
        Outcome::Estimate {
            lower,
            point,
            upper,
            confidence,
            ..
        } => {
            let _ = writeln!(
                output,
                "-- the point estimate for the center of the distribution is {point:4.1}."
            );
            let _ = writeln!(
                output,
                "-- we are {:4.1}% confident that the real value is between {lower:4.1} and {upper:4.1}.",
                100.0 * confidence
            );
        }
    }

    let _ = writeln!(
        output,
        "-- the process took about {} seconds to complete.",
        format_seconds(run.elapsed_ms)
    );
    output
}

/// Render milliseconds as seconds with millisecond precision
pub fn format_seconds(elapsed_ms: f64) -> String {
    format!("{:.3}", elapsed_ms / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{PartitionReport, ReportMeta, RunSummary, SCHEMA_VERSION, SystemInfo};
    use taskbag_stats::BootstrapMethod;

    fn report(outcome: Outcome, partitions: Vec<PartitionReport>) -> RunReport {
        RunReport {
            meta: ReportMeta {
                schema_version: SCHEMA_VERSION,
                version: "0.1.0".into(),
                timestamp: chrono::Utc::now(),
                system: SystemInfo {
                    os: "linux".into(),
                    arch: "x86_64".into(),
                    cpu: "test".into(),
                    cpu_cores: 4,
                    memory_gb: 8.0,
                },
            },
            run: RunSummary {
                case: "bmi".into(),
                strategy: "bootstrap".into(),
                workers: 1,
                isolation: "none".into(),
                tasks: 1_000_000,
                elapsed_ms: 1250.0,
                partitions,
            },
            outcome,
        }
    }

    #[test]
    fn test_estimate_lines() {
        let text = format_human_output(&report(
            Outcome::Estimate {
                lower: 21.94,
                point: 21.97,
                upper: 22.01,
                confidence: 0.95,
                drawn: 10_000,
                method: BootstrapMethod::Pivotal,
            },
            Vec::new(),
        ));
        assert!(text.contains("center of the distribution is 22.0."));
        assert!(text.contains("we are 95.0% confident that the real value is between 21.9 and 22.0."));
        assert!(text.contains("the process took about 1.250 seconds to complete."));
    }

    #[test]
    fn test_partition_table_only_for_multiple_partitions() {
        let single = format_human_output(&report(
            Outcome::Mean {
                value: 10.0,
                summary: None,
            },
            vec![PartitionReport {
                index: 0,
                lo: 0,
                hi: 10,
                elapsed_ms: 1.0,
            }],
        ));
        assert!(!single.contains("partition"));

        let many = format_human_output(&report(
            Outcome::Mean {
                value: 10.0,
                summary: None,
            },
            vec![
                PartitionReport {
                    index: 0,
                    lo: 0,
                    hi: 5,
                    elapsed_ms: 1.0,
                },
                PartitionReport {
                    index: 1,
                    lo: 5,
                    hi: 10,
                    elapsed_ms: 1.0,
                },
            ],
        ));
        assert!(many.contains("partition"));
        assert!(many.contains("center of the distribution is 10.0."));
    }
}
