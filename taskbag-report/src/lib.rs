//! Taskbag Report - Run Reports
//!
//! Generates output formats for a finished run:
//! - JSON (machine-readable)
//! - CSV (one row per partition)
//! - Human (terminal output)

mod csv;
mod human;
mod json;
mod report;

pub use csv::generate_csv_report;
pub use human::{format_human_output, format_seconds};
pub use json::{generate_json_report, parse_json_report};
pub use report::{
    MatrixEntry, Outcome, PartitionReport, ReportMeta, RunReport, RunSummary, SCHEMA_VERSION,
    SystemInfo,
};

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// JSON with full schema
    Json,
    /// CSV for spreadsheets
    Csv,
    /// Human-readable terminal output
    #[default]
    Human,
}

impl OutputFormat {
    /// Render `report` in this format
    pub fn render(self, report: &RunReport) -> Result<String, serde_json::Error> {
        match self {
            OutputFormat::Json => generate_json_report(report),
            OutputFormat::Csv => Ok(generate_csv_report(report)),
            OutputFormat::Human => Ok(format_human_output(report)),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            "human" | "text" => Ok(OutputFormat::Human),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}
