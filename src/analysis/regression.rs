//! Cross-contrast agreement by ordinary least squares.
//!
//! Two metrics measuring the same quantity (cord CSA from T1w and from T2w
//! images) are paired per subject and fitted per vendor.

use super::aggregator::SiteAggregation;
use crate::error::RegressionError;
use crate::models::RegressionResult;
use std::collections::{BTreeMap, HashMap};

/// Per-vendor `(x, y)` sequences, paired by subject.
pub type PairedValues = BTreeMap<String, (Vec<f64>, Vec<f64>)>;

/// Fit `y = slope * x + intercept` and the in-sample R².
pub fn fit_line(vendor: &str, x: &[f64], y: &[f64]) -> Result<RegressionResult, RegressionError> {
    if x.len() != y.len() {
        return Err(RegressionError::LengthMismatch {
            vendor: vendor.to_string(),
            x_len: x.len(),
            y_len: y.len(),
        });
    }
    let n = x.len();
    if n < 2 {
        return Err(RegressionError::InsufficientPairs {
            vendor: vendor.to_string(),
            pairs: n,
        });
    }

    let x_mean = x.iter().sum::<f64>() / n as f64;
    let y_mean = y.iter().sum::<f64>() / n as f64;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (xi, yi) in x.iter().zip(y) {
        sxx += (xi - x_mean).powi(2);
        sxy += (xi - x_mean) * (yi - y_mean);
    }
    if sxx == 0.0 {
        return Err(RegressionError::ConstantPredictor {
            vendor: vendor.to_string(),
        });
    }

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;
    let fitted_values: Vec<f64> = x.iter().map(|xi| slope * xi + intercept).collect();

    let ss_res: f64 = y
        .iter()
        .zip(&fitted_values)
        .map(|(yi, fi)| (yi - fi).powi(2))
        .sum();
    let ss_tot: f64 = y.iter().map(|yi| (yi - y_mean).powi(2)).sum();
    let r_squared = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };

    Ok(RegressionResult {
        slope,
        intercept,
        r_squared,
        n,
        x: x.to_vec(),
        y: y.to_vec(),
        fitted_values,
    })
}

/// Fit every vendor independently; a failure affects only its vendor.
pub fn fit(paired: &PairedValues) -> BTreeMap<String, Result<RegressionResult, RegressionError>> {
    paired
        .iter()
        .map(|(vendor, (x, y))| (vendor.clone(), fit_line(vendor, x, y)))
        .collect()
}

/// Pair two metrics per subject, grouped by vendor.
///
/// Subjects missing from either metric, and sites flagged excluded in either
/// metric, are left out. Every vendor in `vendors` gets an entry, possibly
/// empty. Pairs are ordered by model, site, then subject.
pub fn pair_by_subject(
    x_metric: &SiteAggregation,
    y_metric: &SiteAggregation,
    vendors: &[String],
) -> PairedValues {
    let y_values: HashMap<&str, (f64, bool)> = y_metric
        .sites
        .iter()
        .flat_map(|site| site.samples().map(move |(subject, value)| (subject, (value, site.excluded))))
        .collect();

    let mut rows: Vec<(&str, &str, &str, &str, f64, f64)> = Vec::new();
    for site in &x_metric.sites {
        if site.excluded {
            continue;
        }
        for (subject, x) in site.samples() {
            if let Some(&(y, y_excluded)) = y_values.get(subject) {
                if !y_excluded {
                    rows.push((
                        site.vendor.as_str(),
                        site.model.as_str(),
                        site.site.as_str(),
                        subject,
                        x,
                        y,
                    ));
                }
            }
        }
    }
    rows.sort_by(|a, b| (a.0, a.1, a.2, a.3).cmp(&(b.0, b.1, b.2, b.3)));

    let mut paired: PairedValues = vendors
        .iter()
        .map(|v| (v.clone(), (Vec::new(), Vec::new())))
        .collect();
    for (vendor, _, _, _, x, y) in rows {
        let entry = paired.entry(vendor.to_string()).or_default();
        entry.0.push(x);
        entry.1.push(y);
    }
    paired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SiteAggregate;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_noiseless_line_is_recovered() {
        let x: Vec<f64> = (0..10).map(|i| i as f64 * 1.5 + 40.0).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 3.0).collect();

        let fit = fit_line("GE", &x, &y).unwrap();
        assert_abs_diff_eq!(fit.slope, 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.intercept, 3.0, epsilon = 1e-7);
        assert_abs_diff_eq!(fit.r_squared, 1.0, epsilon = 1e-12);
        assert_eq!(fit.n, 10);
        for (fitted, observed) in fit.fitted_values.iter().zip(&y) {
            assert_abs_diff_eq!(*fitted, *observed, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_noisy_fit_quality() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [2.0, 4.0, 5.0, 4.0];
        let fit = fit_line("GE", &x, &y).unwrap();
        // Sxy = 3.5, Sxx = 5, SS_tot = 4.75, SS_res = 2.3
        assert_abs_diff_eq!(fit.slope, 0.7, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.intercept, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.r_squared, 1.0 - 2.3 / 4.75, epsilon = 1e-12);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let x = [70.1, 72.4, 68.9, 75.3, 71.0];
        let y = [71.5, 73.0, 69.2, 77.1, 70.4];
        let a = fit_line("Siemens", &x, &y).unwrap();
        let b = fit_line("Siemens", &x, &y).unwrap();
        assert_eq!(a.slope.to_bits(), b.slope.to_bits());
        assert_eq!(a.intercept.to_bits(), b.intercept.to_bits());
        assert_eq!(a.r_squared.to_bits(), b.r_squared.to_bits());
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(
            fit_line("GE", &[1.0], &[2.0]),
            Err(RegressionError::InsufficientPairs {
                vendor: "GE".to_string(),
                pairs: 1
            })
        );
        assert!(matches!(
            fit_line("GE", &[1.0, 2.0], &[2.0]),
            Err(RegressionError::LengthMismatch { .. })
        ));
        assert!(matches!(
            fit_line("GE", &[3.0, 3.0], &[1.0, 2.0]),
            Err(RegressionError::ConstantPredictor { .. })
        ));
    }

    #[test]
    fn test_constant_response_is_a_perfect_fit() {
        let fit = fit_line("GE", &[1.0, 2.0, 3.0], &[5.0, 5.0, 5.0]).unwrap();
        assert_abs_diff_eq!(fit.slope, 0.0);
        assert_abs_diff_eq!(fit.r_squared, 1.0);
    }

    #[test]
    fn test_one_failing_vendor_does_not_block_others() {
        let mut paired = PairedValues::new();
        paired.insert("GE".to_string(), (vec![1.0], vec![1.0]));
        paired.insert("Siemens".to_string(), (vec![1.0, 2.0, 3.0], vec![5.0, 7.0, 9.0]));

        let fits = fit(&paired);
        assert!(fits["GE"].is_err());
        assert_abs_diff_eq!(fits["Siemens"].as_ref().unwrap().slope, 2.0, epsilon = 1e-12);
    }

    fn aggregation(metric: &str, sites: Vec<SiteAggregate>) -> SiteAggregation {
        SiteAggregation {
            metric: metric.to_string(),
            sites,
            subjects_removed: Vec::new(),
        }
    }

    #[test]
    fn test_pair_by_subject() {
        let mut t2_amu = SiteAggregate::new("amu", "Siemens", "Verio");
        t2_amu.push("sub-amu02", 80.0);
        t2_amu.push("sub-amu01", 70.0);
        t2_amu.push("sub-amu03", 75.0);
        let mut t2_ucl = SiteAggregate::new("ucl", "Philips", "Achieva");
        t2_ucl.push("sub-ucl01", 60.0);
        let mut t2_mgh = SiteAggregate::new("mgh", "Siemens", "Prisma");
        t2_mgh.push("sub-mgh01", 90.0);
        t2_mgh.excluded = true;

        let mut t1_amu = SiteAggregate::new("amu", "Siemens", "Verio");
        t1_amu.push("sub-amu01", 71.0);
        t1_amu.push("sub-amu02", 81.0);
        let mut t1_ucl = SiteAggregate::new("ucl", "Philips", "Achieva");
        t1_ucl.push("sub-ucl01", 61.0);
        let mut t1_mgh = SiteAggregate::new("mgh", "Siemens", "Prisma");
        t1_mgh.push("sub-mgh01", 91.0);

        let x = aggregation("csa_t2", vec![t2_amu, t2_ucl, t2_mgh]);
        let y = aggregation("csa_t1", vec![t1_mgh, t1_ucl, t1_amu]);
        let vendors = vec!["GE".to_string(), "Philips".to_string(), "Siemens".to_string()];

        let paired = pair_by_subject(&x, &y, &vendors);

        assert_eq!(paired["GE"], (vec![], vec![]));
        assert_eq!(paired["Philips"], (vec![60.0], vec![61.0]));
        // sub-amu03 has no T1w value, mgh is excluded.
        assert_eq!(paired["Siemens"], (vec![70.0, 80.0], vec![71.0, 81.0]));
    }
}
