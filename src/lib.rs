//! sitestats - multi-site, multi-vendor statistics for quantitative imaging
//! metrics.
//!
//! Per-subject metric records are grouped by acquisition site, summarised per
//! site and per vendor, tested for vendor differences (one-way ANOVA and Tukey
//! HSD), and two contrasts of the same quantity are compared by per-vendor
//! linear regression.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod error;
pub mod exclusion;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod scanner;
