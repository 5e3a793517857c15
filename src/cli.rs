//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// sitestats - multi-site, multi-vendor statistics for spinal cord metrics
///
/// Aggregates per-subject metric tables by acquisition site, computes
/// site and vendor variability, tests for vendor differences and fits the
/// T1w/T2w cross-sectional area agreement. Markdown/JSON reports.
///
/// Examples:
///   sitestats --path-results ./results
///   sitestats --path-results ./results --exclude exclude.yml
///   sitestats --path-results ./results --format json --output stats.json
///   sitestats --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Directory holding the metric CSV files and the participants table
    #[arg(
        short = 'r',
        long,
        value_name = "DIR",
        required_unless_present = "init_config",
        env = "SITESTATS_RESULTS"
    )]
    pub path_results: Option<PathBuf>,

    /// Participants table (TSV)
    ///
    /// Relative paths are resolved against --path-results.
    /// Default: participants.tsv, or the value in .sitestats.toml.
    #[arg(long, value_name = "FILE")]
    pub participants: Option<PathBuf>,

    /// Exclusion file (YAML) listing subjects or sites per metric
    ///
    /// Relative paths are resolved against --path-results.
    #[arg(short, long, value_name = "FILE")]
    pub exclude: Option<PathBuf>,

    /// Output file path for the report
    #[arg(
        short,
        long,
        default_value = "sitestats_report.md",
        value_name = "FILE"
    )]
    pub output: PathBuf,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .sitestats.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Significance level for the Tukey HSD test
    #[arg(long, value_name = "ALPHA")]
    pub alpha: Option<f64>,

    /// Vendors to report (comma-separated)
    ///
    /// Example: --vendors GE,Philips,Siemens
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    pub vendors: Option<Vec<String>>,

    /// Skip the cross-contrast regression
    #[arg(long)]
    pub no_regression: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Fail when any statistic could not be computed
    ///
    /// Useful for CI pipelines. Exit code 2 when the report carries diagnostics.
    #[arg(long)]
    pub strict: bool,

    /// Generate a default .sitestats.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        match self.path_results {
            Some(ref dir) if !dir.exists() => {
                return Err(format!("Results directory does not exist: {}", dir.display()));
            }
            Some(ref dir) if !dir.is_dir() => {
                return Err(format!("Results path is not a directory: {}", dir.display()));
            }
            Some(_) => {}
            None => return Err("--path-results is required".to_string()),
        }

        if let Some(alpha) = self.alpha {
            if !(alpha > 0.0 && alpha < 1.0) {
                return Err("Alpha must be between 0.0 and 1.0 (exclusive)".to_string());
            }
        }

        if let Some(ref vendors) = self.vendors {
            if vendors.iter().all(|v| v.trim().is_empty()) {
                return Err("At least one vendor must be given".to_string());
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Results directory, empty when unset (validated first).
    pub fn results_dir(&self) -> PathBuf {
        self.path_results.clone().unwrap_or_default()
    }
}
