//! One statistics run over every metric, then the cross-contrast regression.

use crate::analysis::{aggregate, fit, pair_by_subject, SiteAggregation, VendorStatisticsEngine};
use crate::config::Config;
use crate::error::DataError;
use crate::exclusion::ExclusionPolicy;
use crate::models::{
    Diagnostic, DiagnosticScope, MetadataTable, MetricRecord, MetricReport, RegressionReport,
    RunReport,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Records of one metric, already read from disk.
#[derive(Debug, Clone)]
pub struct MetricInput {
    pub metric: String,
    pub records: Vec<MetricRecord>,
}

impl MetricInput {
    pub fn new(metric: impl Into<String>, records: Vec<MetricRecord>) -> Self {
        Self {
            metric: metric.into(),
            records,
        }
    }
}

/// The two metrics regressed against each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegressionPair {
    pub x_metric: String,
    pub y_metric: String,
}

/// Aggregation, statistics and regression for one results directory.
#[derive(Debug, Clone)]
pub struct Pipeline {
    engine: VendorStatisticsEngine,
    metadata: MetadataTable,
    policy: ExclusionPolicy,
    regression: Option<RegressionPair>,
}

impl Pipeline {
    pub fn new(engine: VendorStatisticsEngine, metadata: MetadataTable, policy: ExclusionPolicy) -> Self {
        Self {
            engine,
            metadata,
            policy,
            regression: None,
        }
    }

    /// Build a pipeline from the analysis and regression settings.
    pub fn from_config(config: &Config, metadata: MetadataTable, policy: ExclusionPolicy) -> Self {
        let engine = VendorStatisticsEngine::new(config.analysis.vendors.clone(), config.analysis.alpha);
        let pipeline = Self::new(engine, metadata, policy);

        if config.regression.enabled {
            pipeline.with_regression(&config.regression.x_metric, &config.regression.y_metric)
        } else {
            pipeline
        }
    }

    pub fn with_regression(mut self, x_metric: &str, y_metric: &str) -> Self {
        self.regression = Some(RegressionPair {
            x_metric: x_metric.to_string(),
            y_metric: y_metric.to_string(),
        });
        self
    }

    pub fn metadata(&self) -> &MetadataTable {
        &self.metadata
    }

    /// Aggregate one metric and compute its site and vendor statistics.
    pub fn run_metric(
        &self,
        metric: &str,
        records: &[MetricRecord],
    ) -> Result<(MetricReport, SiteAggregation), DataError> {
        let aggregation = aggregate(records, &self.metadata, metric, &self.policy)?;
        let outcome = self.engine.compute(&aggregation)?;

        debug!(
            "[{}] {} sites, {} values",
            metric,
            aggregation.sites.len(),
            aggregation.value_count()
        );

        let report = MetricReport {
            metric: metric.to_string(),
            sites: outcome.sites,
            statistics: outcome.statistics,
            spans: outcome.spans,
            subjects_removed: aggregation.subjects_removed.clone(),
            diagnostics: outcome.diagnostics,
        };
        Ok((report, aggregation))
    }

    /// Process every metric in the order given, then the regression pair.
    pub fn run(&self, inputs: &[MetricInput]) -> Result<RunReport, DataError> {
        self.run_with(inputs, |_| {})
    }

    /// Like [`Pipeline::run`], calling `on_metric` after each metric completes.
    pub fn run_with<F>(&self, inputs: &[MetricInput], mut on_metric: F) -> Result<RunReport, DataError>
    where
        F: FnMut(&str),
    {
        let mut metrics = Vec::with_capacity(inputs.len());
        let mut aggregations: HashMap<String, SiteAggregation> = HashMap::new();

        for input in inputs {
            info!("Processing metric: {}", input.metric);
            let (report, aggregation) = self.run_metric(&input.metric, &input.records)?;
            metrics.push(report);
            aggregations.insert(input.metric.clone(), aggregation);
            on_metric(&input.metric);
        }

        let regression = self.regression.as_ref().and_then(|pair| {
            match (aggregations.get(&pair.x_metric), aggregations.get(&pair.y_metric)) {
                (Some(x), Some(y)) => Some(self.regress(pair, x, y)),
                _ => {
                    info!(
                        "Skipping regression: {} and {} are not both present",
                        pair.x_metric, pair.y_metric
                    );
                    None
                }
            }
        });

        Ok(RunReport {
            metrics,
            regression,
        })
    }

    fn regress(
        &self,
        pair: &RegressionPair,
        x: &SiteAggregation,
        y: &SiteAggregation,
    ) -> RegressionReport {
        let label = format!("{}~{}", pair.y_metric, pair.x_metric);
        let paired = pair_by_subject(x, y, self.engine.vendors());

        let mut fits = BTreeMap::new();
        let mut diagnostics = Vec::new();
        for (vendor, result) in fit(&paired) {
            match result {
                Ok(line) => {
                    info!(
                        "[{}] {}: slope={:.4} intercept={:.4} R2={:.4} (n={})",
                        label, vendor, line.slope, line.intercept, line.r_squared, line.n
                    );
                    fits.insert(vendor, line);
                }
                Err(e) => {
                    warn!("[{}] {}", label, e);
                    diagnostics.push(Diagnostic::new(
                        label.as_str(),
                        DiagnosticScope::Regression(vendor),
                        e.to_string(),
                    ));
                }
            }
        }

        RegressionReport {
            x_metric: pair.x_metric.clone(),
            y_metric: pair.y_metric.clone(),
            fits,
            diagnostics,
        }
    }
}
