//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.sitestats.toml` files. The metric catalog, vendor set and regression pair
//! live here instead of being hard-wired into the statistics.

use crate::error::{ConfigError, DataError};
use crate::exclusion::DEFAULT_SUBJECT_PREFIX;
use crate::models::MetricField;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".sitestats.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Input file names and columns.
    #[serde(default)]
    pub input: InputConfig,

    /// Statistics settings.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Cross-contrast regression pair.
    #[serde(default)]
    pub regression: RegressionConfig,

    /// Known metrics and the file/column each is read from.
    #[serde(default = "default_metrics")]
    pub metrics: Vec<MetricConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: InputConfig::default(),
            analysis: AnalysisConfig::default(),
            regression: RegressionConfig::default(),
            metrics: default_metrics(),
        }
    }
}

/// Input settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Participants table, relative to the results directory.
    #[serde(default = "default_participants")]
    pub participants: String,

    /// Column of the metric files holding the image path.
    #[serde(default = "default_filename_column")]
    pub filename_column: String,

    /// Exclusion file (YAML), relative to the results directory.
    #[serde(default)]
    pub exclude: Option<String>,
}

impl InputConfig {
    /// Participants table path for a results directory.
    pub fn participants_path(&self, results_dir: &Path) -> PathBuf {
        resolve_path(results_dir, &self.participants)
    }

    /// Exclusion file path for a results directory, if one is configured.
    pub fn exclude_path(&self, results_dir: &Path) -> Option<PathBuf> {
        self.exclude
            .as_deref()
            .map(|exclude| resolve_path(results_dir, exclude))
    }
}

/// Resolve a configured path against the results directory. Absolute paths
/// are kept as they are.
pub fn resolve_path(results_dir: &Path, configured: &str) -> PathBuf {
    let path = PathBuf::from(configured);
    if path.is_absolute() {
        path
    } else {
        results_dir.join(path)
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            participants: default_participants(),
            filename_column: default_filename_column(),
            exclude: None,
        }
    }
}

fn default_participants() -> String {
    "participants.tsv".to_string()
}

fn default_filename_column() -> String {
    "Filename".to_string()
}

/// Statistics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Closed set of recognized vendors, in report order.
    #[serde(default = "default_vendors")]
    pub vendors: Vec<String>,

    /// Significance level of the Tukey HSD test.
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    /// Marker starting every subject id.
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            vendors: default_vendors(),
            alpha: default_alpha(),
            subject_prefix: default_subject_prefix(),
        }
    }
}

fn default_vendors() -> Vec<String> {
    vec!["GE", "Philips", "Siemens"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_alpha() -> f64 {
    0.05
}

fn default_subject_prefix() -> String {
    DEFAULT_SUBJECT_PREFIX.to_string()
}

/// Regression between two metrics of the same quantity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Predictor metric.
    #[serde(default = "default_x_metric")]
    pub x_metric: String,

    /// Response metric.
    #[serde(default = "default_y_metric")]
    pub y_metric: String,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            x_metric: default_x_metric(),
            y_metric: default_y_metric(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_x_metric() -> String {
    "csa_t2".to_string()
}

fn default_y_metric() -> String {
    "csa_t1".to_string()
}

/// One entry of the metric catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricConfig {
    /// Metric name, also the key of the exclusion file.
    pub name: String,
    /// CSV file the metric is read from.
    pub file: String,
    /// Column carrying the value.
    pub field: MetricField,
}

fn default_metrics() -> Vec<MetricConfig> {
    use MetricField::{MeanArea, WeightedAverage};

    [
        ("csa_t1", "csa-SC_T1w.csv", MeanArea),
        ("csa_t2", "csa-SC_T2w.csv", MeanArea),
        ("csa_gm", "csa-GM_T2s.csv", MeanArea),
        ("dti_fa", "DWI_FA.csv", WeightedAverage),
        ("dti_md", "DWI_MD.csv", WeightedAverage),
        ("dti_rd", "DWI_RD.csv", WeightedAverage),
        ("mtr", "MTR.csv", WeightedAverage),
        ("mtsat", "MTsat.csv", WeightedAverage),
        ("t1", "T1.csv", WeightedAverage),
    ]
    .into_iter()
    .map(|(name, file, field)| MetricConfig {
        name: name.to_string(),
        file: file.to_string(),
        field,
    })
    .collect()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref participants) = args.participants {
            self.input.participants = participants.display().to_string();
        }
        if let Some(ref exclude) = args.exclude {
            self.input.exclude = Some(exclude.display().to_string());
        }
        if let Some(alpha) = args.alpha {
            self.analysis.alpha = alpha;
        }
        if let Some(ref vendors) = args.vendors {
            self.analysis.vendors = vendors.clone();
        }
        if args.no_regression {
            self.regression.enabled = false;
        }
    }

    /// Check the catalog and statistics settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.analysis.vendors.is_empty() {
            return Err(ConfigError::Invalid("at least one vendor is required".to_string()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.analysis.vendors.iter().find(|v| !seen.insert(v.as_str())) {
            return Err(ConfigError::Invalid(format!("vendor '{}' is listed twice", dup)));
        }

        if !(self.analysis.alpha > 0.0 && self.analysis.alpha < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "alpha must be between 0 and 1, got {}",
                self.analysis.alpha
            )));
        }

        if self.analysis.subject_prefix.is_empty() {
            return Err(ConfigError::Invalid("subject prefix must not be empty".to_string()));
        }

        let mut names = HashSet::new();
        let mut files = HashSet::new();
        for metric in &self.metrics {
            if !names.insert(metric.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "metric '{}' is listed twice",
                    metric.name
                )));
            }
            if !files.insert(metric.file.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "file '{}' is mapped to more than one metric",
                    metric.file
                )));
            }
        }

        if self.regression.enabled {
            for name in [&self.regression.x_metric, &self.regression.y_metric] {
                if self.metric(name).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "regression metric '{}' is not in the metric catalog",
                        name
                    )));
                }
            }
            if self.regression.x_metric == self.regression.y_metric {
                return Err(ConfigError::Invalid(
                    "regression needs two different metrics".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Look up a metric by name.
    pub fn metric(&self, name: &str) -> Option<&MetricConfig> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// Look up the metric read from a file name.
    pub fn metric_for_file(&self, file_name: &str) -> Result<&MetricConfig, DataError> {
        self.metrics
            .iter()
            .find(|m| m.file == file_name)
            .ok_or_else(|| DataError::UnknownMetric(file_name.to_string()))
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> Result<String> {
        toml::to_string_pretty(&Config::default()).context("Failed to serialize default config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.analysis.vendors, vec!["GE", "Philips", "Siemens"]);
        assert_eq!(config.analysis.alpha, 0.05);
        assert_eq!(config.metrics.len(), 9);
        assert_eq!(config.metric("csa_t1").unwrap().field, MetricField::MeanArea);
        assert_eq!(config.metric("mtr").unwrap().field, MetricField::WeightedAverage);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[input]
exclude = "exclude.yml"

[analysis]
vendors = ["GE", "Siemens"]
alpha = 0.01

[regression]
x_metric = "t2"
y_metric = "t1"

[[metrics]]
name = "t1"
file = "a.csv"
field = "mean_area"

[[metrics]]
name = "t2"
file = "b.csv"
field = "weighted_average"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.input.exclude.as_deref(), Some("exclude.yml"));
        assert_eq!(config.analysis.vendors, vec!["GE", "Siemens"]);
        assert_eq!(config.analysis.alpha, 0.01);
        assert_eq!(config.analysis.subject_prefix, "sub-");
        assert_eq!(config.input.participants, "participants.tsv");
        assert_eq!(config.metrics.len(), 2);
        assert_eq!(config.metric_for_file("b.csv").unwrap().name, "t2");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_metric_file() {
        let config = Config::default();
        assert!(matches!(
            config.metric_for_file("unknown.csv"),
            Err(DataError::UnknownMetric(_))
        ));
        assert_eq!(config.metric_for_file("MTsat.csv").unwrap().name, "mtsat");
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let toml_content = r#"
[[metrics]]
name = "t1"
file = "a.csv"
field = "median"
"#;
        assert!(toml::from_str::<Config>(toml_content).is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.analysis.alpha = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.analysis.vendors.push("GE".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.regression.y_metric = "missing".to_string();
        assert!(config.validate().is_err());
        config.regression.enabled = false;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.metrics.push(config.metrics[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_with_args() {
        let mut config = Config::default();
        let mut args = crate::cli::tests::make_args();
        config.merge_with_args(&args);
        assert_eq!(config.analysis.alpha, 0.05);
        assert!(config.regression.enabled);
        assert!(config.input.exclude.is_none());

        args.alpha = Some(0.01);
        args.vendors = Some(vec!["GE".to_string(), "Siemens".to_string()]);
        args.exclude = Some(std::path::PathBuf::from("exclude.yml"));
        args.no_regression = true;
        config.merge_with_args(&args);

        assert_eq!(config.analysis.alpha, 0.01);
        assert_eq!(config.analysis.vendors, vec!["GE", "Siemens"]);
        assert_eq!(config.input.exclude.as_deref(), Some("exclude.yml"));
        assert!(!config.regression.enabled);
    }

    #[test]
    fn test_input_paths_resolve_against_results_dir() {
        let results = Path::new("/data/results");
        let mut input = InputConfig::default();
        assert_eq!(
            input.participants_path(results),
            PathBuf::from("/data/results/participants.tsv")
        );
        assert!(input.exclude_path(results).is_none());

        input.exclude = Some("exclude.yml".to_string());
        assert_eq!(
            input.exclude_path(results),
            Some(PathBuf::from("/data/results/exclude.yml"))
        );

        input.exclude = Some("/etc/sitestats/exclude.yml".to_string());
        assert_eq!(
            input.exclude_path(results),
            Some(PathBuf::from("/etc/sitestats/exclude.yml"))
        );
    }

    #[test]
    fn test_general_section_is_gone() {
        let toml_str = Config::default_toml().unwrap();
        assert!(!toml_str.contains("[general]"));
        assert!(!toml_str.contains("output ="));
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml().unwrap();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[input]"));
        assert!(toml_str.contains("[analysis]"));
        assert!(toml_str.contains("[[metrics]]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.metrics, Config::default().metrics);
    }
}
