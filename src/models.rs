//! Data models for the statistics pipeline.
//!
//! This module contains the input rows handed over by the loader, the
//! per-site aggregates, and the derived statistics that are passed on to the
//! report renderer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

/// Raw text used by the processing scripts for a missing reading.
pub const MISSING_VALUE: &str = "None";

/// Column of a metric file that carries the measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    /// Cross-sectional area averaged over slices.
    MeanArea,
    /// Weighted average within a label.
    WeightedAverage,
}

impl MetricField {
    /// Column header as written by the processing scripts.
    pub fn column(&self) -> &'static str {
        match self {
            MetricField::MeanArea => "MEAN(area)",
            MetricField::WeightedAverage => "WA()",
        }
    }
}

impl fmt::Display for MetricField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.column())
    }
}

/// One row of a metric file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Path of the processed image the value was measured on.
    pub filename: String,
    /// Raw textual value; [`MISSING_VALUE`] marks a missing reading.
    pub value: String,
}

impl MetricRecord {
    pub fn new(filename: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            value: value.into(),
        }
    }

    /// Subject id encoded as the directory two levels above the file.
    ///
    /// `data/sub-amu01/anat/sub-amu01_T1w.nii.gz` gives `sub-amu01`.
    pub fn subject_id(&self) -> Option<String> {
        Path::new(&self.filename)
            .parent()?
            .parent()?
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
    }

    /// Whether the raw value is the missing-reading marker.
    pub fn is_missing(&self) -> bool {
        self.value.trim() == MISSING_VALUE
    }
}

/// One row of `participants.tsv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectMeta {
    pub participant_id: String,
    /// Site.
    pub institution_id: String,
    /// Vendor.
    pub manufacturer: String,
    /// Scanner model.
    pub manufacturers_model_name: String,
}

/// Participant metadata indexed by `participant_id`.
#[derive(Debug, Clone, Default)]
pub struct MetadataTable {
    rows: HashMap<String, SubjectMeta>,
}

impl MetadataTable {
    /// Build the table; a repeated id keeps its first row.
    pub fn from_rows(rows: impl IntoIterator<Item = SubjectMeta>) -> Self {
        let mut table = HashMap::new();
        for row in rows {
            table.entry(row.participant_id.clone()).or_insert(row);
        }
        Self { rows: table }
    }

    pub fn get(&self, participant_id: &str) -> Option<&SubjectMeta> {
        self.rows.get(participant_id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Values of one metric gathered for one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteAggregate {
    pub site: String,
    pub vendor: String,
    pub model: String,
    /// Accepted values in record order.
    pub values: Vec<f64>,
    /// Subject that produced the value at the same index.
    pub subjects: Vec<String>,
    /// Site withheld from vendor statistics (still reported).
    pub excluded: bool,
}

impl SiteAggregate {
    pub fn new(site: impl Into<String>, vendor: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            vendor: vendor.into(),
            model: model.into(),
            values: Vec::new(),
            subjects: Vec::new(),
            excluded: false,
        }
    }

    pub fn push(&mut self, subject: impl Into<String>, value: f64) {
        self.subjects.push(subject.into());
        self.values.push(value);
    }

    /// Iterate `(subject, value)` pairs.
    pub fn samples(&self) -> impl Iterator<Item = (&str, f64)> {
        self.subjects
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }
}

/// Per-site row of the output table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteStatistic {
    pub site: String,
    pub vendor: String,
    pub model: String,
    pub n: usize,
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    /// Coefficient of variation, `std / mean`.
    pub cov: f64,
    pub excluded: bool,
    pub values: Vec<f64>,
}

/// One-way ANOVA outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnovaResult {
    pub f_statistic: f64,
    pub p_value: f64,
    pub df_between: usize,
    pub df_within: usize,
}

/// One pair of a Tukey HSD test. `mean_diff` is `mean(group2) - mean(group1)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TukeyComparison {
    pub group1: String,
    pub group2: String,
    pub mean_diff: f64,
    pub p_adj: f64,
    pub lower: f64,
    pub upper: f64,
    pub reject: bool,
}

/// Tukey Honestly-Significant-Difference test across vendors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TukeyHsd {
    pub alpha: f64,
    pub df: usize,
    /// Pooled within-group mean square.
    pub mse: f64,
    pub comparisons: Vec<TukeyComparison>,
}

impl TukeyHsd {
    /// Decision for a pair, in either order.
    pub fn reject(&self, a: &str, b: &str) -> Option<bool> {
        self.comparisons
            .iter()
            .find(|c| (c.group1 == a && c.group2 == b) || (c.group1 == b && c.group2 == a))
            .map(|c| c.reject)
    }

    /// Square decision matrix in `groups` order; `None` on the diagonal and
    /// for untested pairs.
    pub fn significance_matrix(&self, groups: &[String]) -> Vec<Vec<Option<bool>>> {
        groups
            .iter()
            .map(|a| {
                groups
                    .iter()
                    .map(|b| if a == b { None } else { self.reject(a, b) })
                    .collect()
            })
            .collect()
    }
}

/// Summary of one vendor over its non-excluded sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorStatistic {
    pub vendor: String,
    /// Sites contributing to the statistics.
    pub n_sites: usize,
    /// Mean of the per-site means.
    pub mean: f64,
    /// Population std of the per-site means.
    pub std: f64,
    /// Between-site variability, `std / mean`.
    pub cov_inter: f64,
    /// Average within-site variability.
    pub cov_intra: f64,
    /// ANOVA across this vendor's sites on per-subject values.
    pub site_anova: Option<AnovaResult>,
}

/// Vendor-level statistics of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorStatistics {
    /// In configured vendor order.
    pub vendors: Vec<VendorStatistic>,
    pub anova: Option<AnovaResult>,
    pub tukey: Option<TukeyHsd>,
}

impl VendorStatistics {
    pub fn get(&self, vendor: &str) -> Option<&VendorStatistic> {
        self.vendors.iter().find(|v| v.vendor == vendor)
    }
}

/// Contiguous block of one vendor in the sorted site table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorSpan {
    pub vendor: String,
    pub first: usize,
    pub last: usize,
}

/// Linear fit `y = slope * x + intercept` for one vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionResult {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub n: usize,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub fitted_values: Vec<f64>,
}

/// What a diagnostic refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum DiagnosticScope {
    Site(String),
    Vendor(String),
    Anova,
    Tukey,
    Regression(String),
}

impl fmt::Display for DiagnosticScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticScope::Site(name) => write!(f, "site {}", name),
            DiagnosticScope::Vendor(name) => write!(f, "vendor {}", name),
            DiagnosticScope::Anova => write!(f, "vendor ANOVA"),
            DiagnosticScope::Tukey => write!(f, "Tukey HSD"),
            DiagnosticScope::Regression(vendor) => write!(f, "regression for {}", vendor),
        }
    }
}

/// A statistic that could not be computed. Reported, never coerced to zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub metric: String,
    pub scope: DiagnosticScope,
    pub reason: String,
}

impl Diagnostic {
    pub fn new(metric: impl Into<String>, scope: DiagnosticScope, reason: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            scope,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.metric, self.scope, self.reason)
    }
}

/// Everything computed for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub metric: String,
    /// Sorted by vendor, model, site.
    pub sites: Vec<SiteStatistic>,
    pub statistics: VendorStatistics,
    pub spans: Vec<VendorSpan>,
    pub subjects_removed: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Cross-contrast regression between two metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionReport {
    pub x_metric: String,
    pub y_metric: String,
    pub fits: BTreeMap<String, RegressionResult>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Metadata about a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub results_dir: String,
    pub analysis_date: DateTime<Utc>,
    pub participants: usize,
    pub metrics_processed: usize,
    pub alpha: f64,
    pub duration_seconds: f64,
}

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub metrics: Vec<MetricReport>,
    pub regression: Option<RegressionReport>,
}

impl RunReport {
    pub fn metric(&self, name: &str) -> Option<&MetricReport> {
        self.metrics.iter().find(|m| m.metric == name)
    }

    /// All diagnostics, metric order first, regression last.
    pub fn diagnostics(&self) -> Vec<&Diagnostic> {
        self.metrics
            .iter()
            .flat_map(|m| m.diagnostics.iter())
            .chain(self.regression.iter().flat_map(|r| r.diagnostics.iter()))
            .collect()
    }
}

/// Final document handed to the renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub run: RunReport,
}
