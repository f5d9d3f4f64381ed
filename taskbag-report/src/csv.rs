//! CSV Output
//!
//! One row per partition, with the run-level columns repeated so the file can
//! be concatenated across runs.

use crate::report::RunReport;

const HEADER: &str = "case,strategy,workers,isolation,partition,lo,hi,tasks,elapsed_ms,run_elapsed_ms,point";

/// Generate a CSV report
pub fn generate_csv_report(report: &RunReport) -> String {
    let run = &report.run;
    let point = report
        .outcome
        .point()
        .map(|p| p.to_string())
        .unwrap_or_default();

    let mut out = String::with_capacity(64 * (run.partitions.len() + 1));
    out.push_str(HEADER);
    out.push('\n');

    for p in &run.partitions {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{:.3},{:.3},{}\n",
            escape(&run.case),
            escape(&run.strategy),
            run.workers,
            escape(&run.isolation),
            p.index,
            p.lo,
            p.hi,
            p.tasks(),
            p.elapsed_ms,
            run.elapsed_ms,
            point,
        ));
    }
    out
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
