//! Configuration loading from taskbag.toml
//!
//! Taskbag configuration can be specified in a `taskbag.toml` file in the project root.
//! The configuration is automatically discovered by walking up from the current directory.
//! Command-line flags override anything set here.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// File name searched for by [`TaskbagConfig::discover`]
pub const CONFIG_FILE: &str = "taskbag.toml";

/// Taskbag configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskbagConfig {
    /// Runner configuration
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Sample generation and persistence
    #[serde(default)]
    pub sample: SampleConfig,
    /// Approximate estimator settings
    #[serde(default)]
    pub estimator: EstimatorSection,
    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
}

/// Where parallel partitions run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationMode {
    /// One worker process per partition (default)
    #[default]
    Process,
    /// One pool thread per partition, in this process
    Thread,
}

impl IsolationMode {
    /// Whether this mode provides process isolation
    pub fn is_isolated(self) -> bool {
        matches!(self, IsolationMode::Process)
    }

    /// Name used in reports
    pub fn as_str(self) -> &'static str {
        match self {
            IsolationMode::Process => "process",
            IsolationMode::Thread => "thread",
        }
    }
}

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Default worker count when the command line does not give one
    #[serde(default)]
    pub workers: Option<usize>,
    /// Isolation mode: "process" or "thread"
    #[serde(default)]
    pub isolation: IsolationMode,
    /// Timeout for a single worker process (e.g., "60s", "5m")
    #[serde(default = "default_worker_timeout")]
    pub worker_timeout: String,
    /// Overall run deadline; unset means no deadline
    #[serde(default)]
    pub deadline: Option<String>,
    /// Times a failed partition is re-executed
    #[serde(default)]
    pub max_retries: u32,
    /// Per-worker partition size adjustments
    #[serde(default)]
    pub calibration: Vec<isize>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: None,
            isolation: IsolationMode::default(),
            worker_timeout: default_worker_timeout(),
            deadline: None,
            max_retries: 0,
            calibration: Vec::new(),
        }
    }
}

fn default_worker_timeout() -> String {
    "60s".to_string()
}

/// Sample generation and persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleConfig {
    /// Seed of the generator every sample is drawn from
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Dimensionality of the vectors of the distance case
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// Directory persisted samples are written to
    #[serde(default = "default_store_directory")]
    pub store_directory: String,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            dimensions: default_dimensions(),
            store_directory: default_store_directory(),
        }
    }
}

fn default_seed() -> u64 {
    23
}
fn default_dimensions() -> usize {
    2
}
fn default_store_directory() -> String {
    "target/taskbag/samples".to_string()
}

/// Approximate estimator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorSection {
    /// Tasks drawn when the command line does not give a size
    #[serde(default = "default_resample_size")]
    pub resample_size: usize,
    /// Significance level of the interval
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Hard limit on tasks drawn
    #[serde(default = "default_resample_size")]
    pub cap: usize,
    /// Bootstrap iterations over the drawn subset
    #[serde(default = "default_bootstrap_iterations")]
    pub bootstrap_iterations: usize,
    /// Interval method: "pivotal", "percentile", "bca" or "auto"
    #[serde(default = "default_method")]
    pub method: String,
}

impl Default for EstimatorSection {
    fn default() -> Self {
        Self {
            resample_size: default_resample_size(),
            alpha: default_alpha(),
            cap: default_resample_size(),
            bootstrap_iterations: default_bootstrap_iterations(),
            method: default_method(),
        }
    }
}

fn default_resample_size() -> usize {
    taskbag_core::RESAMPLE_CAP
}
fn default_alpha() -> f64 {
    0.05
}
fn default_bootstrap_iterations() -> usize {
    taskbag_stats::DEFAULT_BOOTSTRAP_ITERATIONS
}
fn default_method() -> String {
    "pivotal".to_string()
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Default output format: "human", "json", "csv"
    #[serde(default = "default_format")]
    pub format: String,
    /// Directory reports are written to when `--output` names a bare file
    #[serde(default)]
    pub directory: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            directory: None,
        }
    }
}

fn default_format() -> String {
    "human".to_string()
}

impl TaskbagConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Try to discover and load configuration by walking up from current directory
    pub fn discover() -> Option<Self> {
        let mut dir = std::env::current_dir().ok()?;
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return match Self::load(&config_path) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        tracing::warn!(path = %config_path.display(), "ignoring {CONFIG_FILE}: {e}");
                        None
                    }
                };
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        r#"# Taskbag Configuration

[runner]
# Worker count used when the command line does not give one (uncomment to enable)
# workers = 4
# Isolation mode for parallel runs: "process" or "thread"
isolation = "process"
# Timeout for a single worker process
worker_timeout = "60s"
# Overall run deadline (uncomment to enable)
# deadline = "10m"
# Times a failed partition is re-executed
max_retries = 0
# Per-worker partition size adjustments, e.g. [-2, 1, 1]
calibration = []

[sample]
# Seed of the sample generator
seed = 23
# Dimensionality of the distance case vectors
dimensions = 2
# Where persisted samples live
store_directory = "target/taskbag/samples"

[estimator]
# Tasks drawn by the approximate estimator
resample_size = 10000
# Significance level (interval confidence is 1 - alpha)
alpha = 0.05
# Hard limit on tasks drawn
cap = 10000
# Bootstrap iterations
bootstrap_iterations = 10000
# Interval method: pivotal, percentile, bca, auto
method = "pivotal"

[output]
# Default output format: human, json, csv
format = "human"
# Directory for report files (uncomment to enable)
# directory = "target/taskbag"
"#
        .to_string()
    }

    /// Parse duration string (e.g., "3s", "500ms", "2m")
    pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Empty duration string"));
        }

        // Find where the number ends and unit begins
        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
        if !value.is_finite() || value < 0.0 {
            return Err(anyhow::anyhow!("Duration must be non-negative: {}", s));
        }

        let multiplier: f64 = match unit_part.to_lowercase().as_str() {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" | "" => 1e9,
            "m" | "min" => 60e9,
            _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
        };

        Ok(Duration::from_nanos((value * multiplier) as u64))
    }

    /// Worker timeout as a duration
    pub fn worker_timeout(&self) -> anyhow::Result<Duration> {
        Self::parse_duration(&self.runner.worker_timeout)
    }

    /// Run deadline, if configured
    pub fn deadline(&self) -> anyhow::Result<Option<Duration>> {
        self.runner
            .deadline
            .as_deref()
            .map(Self::parse_duration)
            .transpose()
    }
}
