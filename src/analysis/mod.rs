//! Statistical core.
//!
//! Aggregation per site, site and vendor statistics, and the cross-contrast
//! regression. Nothing in here touches the filesystem.

pub mod aggregator;
pub mod distributions;
pub mod regression;
pub mod statistics;

pub use aggregator::{aggregate, SiteAggregation};
pub use regression::{fit, fit_line, pair_by_subject, PairedValues};
pub use statistics::{StatisticsOutcome, VendorStatisticsEngine};
