//! Markdown report generation.
//!
//! This module generates Markdown statistics reports from the pipeline
//! results. Undefined statistics are printed as `n/a`, never as zero.

use crate::models::{
    AnovaResult, Diagnostic, MetricReport, RegressionReport, Report, ReportMetadata,
    SiteStatistic, TukeyHsd, VendorStatistic,
};
use anyhow::Result;
use std::io::Write;
use std::path::Path;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# Multi-Site Statistics Report\n\n");

    // Metadata section
    output.push_str(&generate_metadata_section(&report.metadata));

    // Table of contents
    output.push_str(&generate_table_of_contents(report));

    // One section per metric
    for metric in &report.run.metrics {
        output.push_str(&generate_metric_section(metric));
    }

    // Cross-contrast regression
    if let Some(ref regression) = report.run.regression {
        output.push_str(&generate_regression_section(regression));
    }

    // Diagnostics
    output.push_str(&generate_diagnostics_section(&report.run.diagnostics()));

    // Footer
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Results:** `{}`\n", metadata.results_dir));
    section.push_str(&format!(
        "- **Analysis Date:** {}\n",
        metadata.analysis_date.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Participants:** {}\n", metadata.participants));
    section.push_str(&format!(
        "- **Metrics Processed:** {}\n",
        metadata.metrics_processed
    ));
    section.push_str(&format!("- **Tukey HSD alpha:** {}\n", metadata.alpha));
    section.push_str(&format!(
        "- **Analysis Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// Generate the table of contents.
fn generate_table_of_contents(report: &Report) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");

    for metric in &report.run.metrics {
        toc.push_str(&format!(
            "- [{}](#{})\n",
            metric.metric,
            anchor(&metric.metric)
        ));
    }

    if report.run.regression.is_some() {
        toc.push_str("- [Cross-Contrast Regression](#cross-contrast-regression)\n");
    }
    toc.push_str("- [Diagnostics](#diagnostics)\n");

    toc.push('\n');

    toc
}

/// Generate the section for one metric.
fn generate_metric_section(metric: &MetricReport) -> String {
    let mut section = String::new();

    section.push_str(&format!(
        "## {} {{#{}}}\n\n",
        metric.metric,
        anchor(&metric.metric)
    ));

    if !metric.subjects_removed.is_empty() {
        section.push_str(&format!(
            "*Subjects removed: {}*\n\n",
            metric.subjects_removed.join(", ")
        ));
    }

    section.push_str(&generate_site_table(&metric.sites));
    section.push_str(&generate_vendor_table(&metric.statistics.vendors));

    section.push_str("### Vendor ANOVA\n\n");
    match metric.statistics.anova {
        Some(ref anova) => section.push_str(&format!("{}\n\n", format_anova(anova))),
        None => section.push_str("Not computed, see [Diagnostics](#diagnostics).\n\n"),
    }

    if let Some(ref tukey) = metric.statistics.tukey {
        let vendors: Vec<String> = metric
            .statistics
            .vendors
            .iter()
            .map(|v| v.vendor.clone())
            .collect();
        section.push_str(&generate_tukey_section(tukey, &vendors));
    }

    section
}

/// Generate the per-site table, one row per site in report order.
fn generate_site_table(sites: &[SiteStatistic]) -> String {
    let mut table = String::new();

    table.push_str("### Sites\n\n");
    if sites.is_empty() {
        table.push_str("No sites.\n\n");
        return table;
    }

    table.push_str("| Site | Vendor | Model | N | Mean | SD | COV (%) |\n");
    table.push_str("|:---|:---|:---|:---:|---:|---:|---:|\n");

    for site in sites {
        let name = if site.excluded {
            format!("~~{}~~ (excluded)", site.site)
        } else {
            site.site.clone()
        };
        table.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n",
            name,
            site.vendor,
            site.model,
            site.n,
            format_value(site.mean),
            format_value(site.std),
            format_percent(site.cov),
        ));
    }
    table.push('\n');

    table
}

/// Generate the per-vendor table.
fn generate_vendor_table(vendors: &[VendorStatistic]) -> String {
    let mut table = String::new();

    table.push_str("### Vendors\n\n");
    table.push_str(
        "| Vendor | Sites | Mean | SD | Inter-site COV (%) | Intra-site COV (%) | Site ANOVA p |\n",
    );
    table.push_str("|:---|:---:|---:|---:|---:|---:|---:|\n");

    for vendor in vendors {
        let site_p = vendor
            .site_anova
            .as_ref()
            .map(|a| format_p(a.p_value))
            .unwrap_or_else(|| "n/a".to_string());
        table.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n",
            vendor.vendor,
            vendor.n_sites,
            format_value(vendor.mean),
            format_value(vendor.std),
            format_percent(vendor.cov_inter),
            format_percent(vendor.cov_intra),
            site_p,
        ));
    }
    table.push('\n');

    table
}

fn format_anova(anova: &AnovaResult) -> String {
    format!(
        "F({}, {}) = {:.3}, p = {}",
        anova.df_between,
        anova.df_within,
        anova.f_statistic,
        format_p(anova.p_value)
    )
}

/// Generate the Tukey HSD comparisons and the significance matrix.
fn generate_tukey_section(tukey: &TukeyHsd, vendors: &[String]) -> String {
    let mut section = String::new();

    section.push_str(&format!("### Tukey HSD (alpha = {})\n\n", tukey.alpha));
    section.push_str("| Group 1 | Group 2 | Mean diff | p-adj | Lower | Upper | Reject |\n");
    section.push_str("|:---|:---|---:|---:|---:|---:|:---:|\n");

    for c in &tukey.comparisons {
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n",
            c.group1,
            c.group2,
            format_value(c.mean_diff),
            format_p(c.p_adj),
            format_value(c.lower),
            format_value(c.upper),
            if c.reject { "yes" } else { "no" },
        ));
    }
    section.push('\n');

    let matrix = tukey.significance_matrix(vendors);
    section.push_str("| |");
    for vendor in vendors {
        section.push_str(&format!(" {} |", vendor));
    }
    section.push_str("\n|:---|");
    section.push_str(&":---:|".repeat(vendors.len()));
    section.push('\n');
    for (vendor, row) in vendors.iter().zip(&matrix) {
        section.push_str(&format!("| **{}** |", vendor));
        for cell in row {
            let mark = match cell {
                Some(true) => "*",
                Some(false) => "ns",
                None => "-",
            };
            section.push_str(&format!(" {} |", mark));
        }
        section.push('\n');
    }
    section.push_str("\n`*` significant difference, `ns` not significant.\n\n");

    section
}

/// Generate the cross-contrast regression section.
fn generate_regression_section(regression: &RegressionReport) -> String {
    let mut section = String::new();

    section.push_str("## Cross-Contrast Regression\n\n");
    section.push_str(&format!(
        "*{} = slope × {} + intercept*\n\n",
        regression.y_metric, regression.x_metric
    ));

    if regression.fits.is_empty() {
        section.push_str("No vendor could be fitted.\n\n");
        return section;
    }

    section.push_str("| Vendor | N | Slope | Intercept | R² |\n");
    section.push_str("|:---|:---:|---:|---:|---:|\n");
    for (vendor, fit) in &regression.fits {
        section.push_str(&format!(
            "| {} | {} | {:.4} | {:.4} | {:.4} |\n",
            vendor, fit.n, fit.slope, fit.intercept, fit.r_squared
        ));
    }
    section.push('\n');

    section
}

/// Generate the diagnostics section.
fn generate_diagnostics_section(diagnostics: &[&Diagnostic]) -> String {
    let mut section = String::new();

    section.push_str("## Diagnostics\n\n");

    if diagnostics.is_empty() {
        section.push_str("Every statistic was computed.\n\n");
        return section;
    }

    section.push_str("| Metric | Scope | Reason |\n");
    section.push_str("|:---|:---|:---|\n");
    for d in diagnostics {
        section.push_str(&format!("| {} | {} | {} |\n", d.metric, d.scope, d.reason));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by sitestats v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

fn anchor(name: &str) -> String {
    name.replace(['/', '.', ' ', '_'], "-").to_lowercase()
}

fn format_value(value: f64) -> String {
    if value.is_finite() {
        format!("{:.3}", value)
    } else {
        "n/a".to_string()
    }
}

fn format_percent(ratio: f64) -> String {
    if ratio.is_finite() {
        format!("{:.2}", ratio * 100.0)
    } else {
        "n/a".to_string()
    }
}

fn format_p(p: f64) -> String {
    if !p.is_finite() {
        "n/a".to_string()
    } else if p < 0.001 {
        "<0.001".to_string()
    } else {
        format!("{:.3}", p)
    }
}

/// Write the Markdown report to a file.
pub fn write_report(report: &Report, path: &Path) -> Result<()> {
    let content = generate_markdown_report(report);

    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

/// Generate a JSON report. Undefined statistics become `null`.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write a JSON report to a file.
pub fn write_json_report(report: &Report, path: &Path) -> Result<()> {
    let content = generate_json_report(report)?;

    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
