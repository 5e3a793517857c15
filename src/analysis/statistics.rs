//! Within-site and across-site statistics.
//!
//! Site statistics use every accepted value of the site. Vendor statistics
//! use only sites that are not flagged `excluded` and have a defined mean;
//! the ANOVA and Tukey HSD tests run on the same per-site means.

use super::aggregator::SiteAggregation;
use super::distributions::{f_sf, ptukey, qtukey};
use crate::error::DataError;
use crate::models::{
    AnovaResult, Diagnostic, DiagnosticScope, SiteAggregate, SiteStatistic, TukeyComparison,
    TukeyHsd, VendorSpan, VendorStatistic, VendorStatistics,
};
use tracing::{debug, warn};

/// Arithmetic mean; NaN for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by N); NaN for an empty slice.
pub fn population_std(values: &[f64]) -> f64 {
    let m = mean(values);
    if m.is_nan() {
        return f64::NAN;
    }
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// `std / mean`; NaN when the mean is zero or undefined.
pub fn coefficient_of_variation(std: f64, mean: f64) -> f64 {
    if mean == 0.0 || !mean.is_finite() || !std.is_finite() {
        return f64::NAN;
    }
    std / mean
}

/// Summary row for one site.
pub fn site_statistic(site: &SiteAggregate) -> SiteStatistic {
    let mean = mean(&site.values);
    let std = population_std(&site.values);
    SiteStatistic {
        site: site.site.clone(),
        vendor: site.vendor.clone(),
        model: site.model.clone(),
        n: site.values.len(),
        mean,
        std,
        cov: coefficient_of_variation(std, mean),
        excluded: site.excluded,
        values: site.values.clone(),
    }
}

/// Sort site rows by vendor, then model, then site.
pub fn sort_sites(sites: &mut [SiteStatistic]) {
    sites.sort_by(|a, b| {
        a.vendor
            .cmp(&b.vendor)
            .then_with(|| a.model.cmp(&b.model))
            .then_with(|| a.site.cmp(&b.site))
    });
}

/// Index range of each vendor in a sorted site table.
pub fn vendor_spans(sites: &[SiteStatistic]) -> Vec<VendorSpan> {
    let mut spans: Vec<VendorSpan> = Vec::new();
    for (i, site) in sites.iter().enumerate() {
        match spans.last_mut() {
            Some(span) if span.vendor == site.vendor => span.last = i,
            _ => spans.push(VendorSpan {
                vendor: site.vendor.clone(),
                first: i,
                last: i,
            }),
        }
    }
    spans
}

/// One-way ANOVA. Empty groups are ignored.
///
/// Needs at least two non-empty groups and more observations than groups.
pub fn one_way_anova(groups: &[&[f64]]) -> Result<AnovaResult, String> {
    let groups: Vec<&[f64]> = groups.iter().copied().filter(|g| !g.is_empty()).collect();
    let k = groups.len();
    let n: usize = groups.iter().map(|g| g.len()).sum();

    if k < 2 {
        return Err(format!("{} non-empty group(s), at least 2 are required", k));
    }
    if n <= k {
        return Err(format!("{} observations for {} groups, no within-group variance", n, k));
    }

    let grand_mean = groups.iter().flat_map(|g| g.iter()).sum::<f64>() / n as f64;
    let mut ss_between = 0.0;
    let mut ss_within = 0.0;
    for group in &groups {
        let m = mean(group);
        ss_between += group.len() as f64 * (m - grand_mean).powi(2);
        ss_within += group.iter().map(|v| (v - m).powi(2)).sum::<f64>();
    }

    let df_between = k - 1;
    let df_within = n - k;
    let ms_between = ss_between / df_between as f64;
    let ms_within = ss_within / df_within as f64;

    let f_statistic = if ms_within > 0.0 {
        ms_between / ms_within
    } else if ms_between > 0.0 {
        f64::INFINITY
    } else {
        f64::NAN
    };

    Ok(AnovaResult {
        f_statistic,
        p_value: f_sf(f_statistic, df_between as f64, df_within as f64),
        df_between,
        df_within,
    })
}

/// Tukey HSD over labelled groups, pairs in the given group order.
///
/// Empty groups are ignored. Needs at least two groups and two error degrees
/// of freedom.
pub fn tukey_hsd(groups: &[(String, Vec<f64>)], alpha: f64) -> Result<TukeyHsd, String> {
    let groups: Vec<&(String, Vec<f64>)> = groups.iter().filter(|(_, g)| !g.is_empty()).collect();
    let k = groups.len();
    let n: usize = groups.iter().map(|(_, g)| g.len()).sum();

    if k < 2 {
        return Err(format!("{} non-empty group(s), at least 2 are required", k));
    }
    if n < k + 2 {
        return Err(format!(
            "{} observations for {} groups, at least 2 error degrees of freedom are required",
            n, k
        ));
    }

    let df = n - k;
    let ss_within: f64 = groups
        .iter()
        .map(|(_, g)| {
            let m = mean(g);
            g.iter().map(|v| (v - m).powi(2)).sum::<f64>()
        })
        .sum();
    let mse = ss_within / df as f64;
    let q_crit = qtukey(1.0 - alpha, k as f64, df as f64);

    let mut comparisons = Vec::new();
    for i in 0..k {
        for j in (i + 1)..k {
            let (name_i, values_i) = groups[i];
            let (name_j, values_j) = groups[j];
            let mean_diff = mean(values_j) - mean(values_i);
            let se = (mse / 2.0 * (1.0 / values_i.len() as f64 + 1.0 / values_j.len() as f64)).sqrt();

            let q = if se > 0.0 {
                mean_diff.abs() / se
            } else if mean_diff == 0.0 {
                0.0
            } else {
                f64::INFINITY
            };
            let p_adj = (1.0 - ptukey(q, k as f64, df as f64)).clamp(0.0, 1.0);
            let half_width = q_crit * se;

            comparisons.push(TukeyComparison {
                group1: name_i.clone(),
                group2: name_j.clone(),
                mean_diff,
                p_adj,
                lower: mean_diff - half_width,
                upper: mean_diff + half_width,
                reject: q > q_crit,
            });
        }
    }

    Ok(TukeyHsd {
        alpha,
        df,
        mse,
        comparisons,
    })
}

/// Output of [`VendorStatisticsEngine::compute`].
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsOutcome {
    /// Sorted by vendor, model, site.
    pub sites: Vec<SiteStatistic>,
    pub statistics: VendorStatistics,
    pub spans: Vec<VendorSpan>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Computes site and vendor statistics for a closed vendor set.
#[derive(Debug, Clone)]
pub struct VendorStatisticsEngine {
    vendors: Vec<String>,
    alpha: f64,
}

impl VendorStatisticsEngine {
    pub fn new(vendors: Vec<String>, alpha: f64) -> Self {
        Self { vendors, alpha }
    }

    pub fn vendors(&self) -> &[String] {
        &self.vendors
    }

    pub fn compute(&self, aggregation: &SiteAggregation) -> Result<StatisticsOutcome, DataError> {
        let metric = aggregation.metric.as_str();

        if let Some(site) = aggregation
            .sites
            .iter()
            .find(|s| !self.vendors.contains(&s.vendor))
        {
            return Err(DataError::UnknownVendor {
                metric: metric.to_string(),
                site: site.site.clone(),
                vendor: site.vendor.clone(),
                expected: self.vendors.clone(),
            });
        }

        let mut diagnostics = Vec::new();
        let mut sites: Vec<SiteStatistic> = aggregation.sites.iter().map(site_statistic).collect();
        sort_sites(&mut sites);

        for site in &sites {
            let reason = if site.n == 0 {
                "no eligible values, mean and std are undefined"
            } else if !site.cov.is_finite() {
                "mean is zero, coefficient of variation is undefined"
            } else {
                continue;
            };
            warn!("[{}] Site {}: {}", metric, site.site, reason);
            diagnostics.push(Diagnostic::new(
                metric,
                DiagnosticScope::Site(site.site.clone()),
                reason,
            ));
        }

        let mut vendors = Vec::with_capacity(self.vendors.len());
        let mut groups: Vec<(String, Vec<f64>)> = Vec::with_capacity(self.vendors.len());

        for vendor in &self.vendors {
            let eligible: Vec<&SiteStatistic> = sites
                .iter()
                .filter(|s| &s.vendor == vendor && !s.excluded && s.mean.is_finite())
                .collect();

            if eligible.is_empty() {
                let reason = "no eligible sites, vendor statistics are undefined";
                warn!("[{}] Vendor {}: {}", metric, vendor, reason);
                diagnostics.push(Diagnostic::new(
                    metric,
                    DiagnosticScope::Vendor(vendor.clone()),
                    reason,
                ));
            }

            let site_means: Vec<f64> = eligible.iter().map(|s| s.mean).collect();
            let site_covs: Vec<f64> = eligible
                .iter()
                .map(|s| s.cov)
                .filter(|c| c.is_finite())
                .collect();
            let site_values: Vec<&[f64]> = eligible.iter().map(|s| s.values.as_slice()).collect();

            let vendor_mean = mean(&site_means);
            let vendor_std = population_std(&site_means);
            let site_anova = match one_way_anova(&site_values) {
                Ok(result) => Some(result),
                Err(reason) => {
                    debug!("[{}] No site ANOVA for {}: {}", metric, vendor, reason);
                    None
                }
            };

            vendors.push(VendorStatistic {
                vendor: vendor.clone(),
                n_sites: eligible.len(),
                mean: vendor_mean,
                std: vendor_std,
                cov_inter: coefficient_of_variation(vendor_std, vendor_mean),
                cov_intra: mean(&site_covs),
                site_anova,
            });
            groups.push((vendor.clone(), site_means));
        }

        let group_slices: Vec<&[f64]> = groups.iter().map(|(_, g)| g.as_slice()).collect();
        let anova = match one_way_anova(&group_slices) {
            Ok(result) => Some(result),
            Err(reason) => {
                warn!("[{}] Vendor ANOVA not computed: {}", metric, reason);
                diagnostics.push(Diagnostic::new(metric, DiagnosticScope::Anova, reason));
                None
            }
        };

        let tukey = match tukey_hsd(&groups, self.alpha) {
            Ok(result) => Some(result),
            Err(reason) => {
                warn!("[{}] Tukey HSD not computed: {}", metric, reason);
                diagnostics.push(Diagnostic::new(metric, DiagnosticScope::Tukey, reason));
                None
            }
        };

        let spans = vendor_spans(&sites);

        Ok(StatisticsOutcome {
            sites,
            statistics: VendorStatistics {
                vendors,
                anova,
                tukey,
            },
            spans,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn site(name: &str, vendor: &str, model: &str, values: &[f64]) -> SiteAggregate {
        let mut agg = SiteAggregate::new(name, vendor, model);
        for (i, v) in values.iter().enumerate() {
            agg.push(format!("sub-{}{:02}", name, i + 1), *v);
        }
        agg
    }

    fn aggregation(sites: Vec<SiteAggregate>) -> SiteAggregation {
        SiteAggregation {
            metric: "m".to_string(),
            sites,
            subjects_removed: Vec::new(),
        }
    }

    fn engine() -> VendorStatisticsEngine {
        VendorStatisticsEngine::new(vec!["X".to_string(), "Y".to_string(), "Z".to_string()], 0.05)
    }

    fn scenario() -> Vec<SiteAggregate> {
        vec![
            site("A", "X", "m1", &[10.0, 12.0]),
            site("B", "X", "m1", &[20.0]),
            site("C", "Y", "m2", &[15.0, 15.0]),
        ]
    }

    #[test]
    fn test_population_std_and_cov() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_abs_diff_eq!(mean(&values), 5.0);
        assert_abs_diff_eq!(population_std(&values), 2.0);
        assert_abs_diff_eq!(coefficient_of_variation(2.0, 5.0), 0.4);
        assert!(mean(&[]).is_nan());
        assert!(population_std(&[]).is_nan());
        assert!(coefficient_of_variation(1.0, 0.0).is_nan());
    }

    proptest! {
        #[test]
        fn prop_site_std_is_non_negative_and_cov_is_std_over_mean(
            values in prop::collection::vec(-1000.0f64..1000.0, 1..32),
        ) {
            let row = site_statistic(&site("A", "X", "m1", &values));
            prop_assert_eq!(row.n, values.len());
            prop_assert!(row.std >= 0.0);
            if row.mean == 0.0 {
                prop_assert!(row.cov.is_nan());
            } else {
                prop_assert_eq!(row.cov, row.std / row.mean);
            }
            if values.len() == 1 {
                prop_assert_eq!(row.std, 0.0);
            }
        }
    }

    #[test]
    fn test_scenario_site_and_vendor_statistics() {
        let outcome = engine().compute(&aggregation(scenario())).unwrap();

        let a = &outcome.sites[0];
        assert_eq!(a.site, "A");
        assert_abs_diff_eq!(a.mean, 11.0);
        assert_abs_diff_eq!(a.std, 1.0);

        let x = outcome.statistics.get("X").unwrap();
        assert_eq!(x.n_sites, 2);
        assert_abs_diff_eq!(x.mean, 15.5);
        assert_abs_diff_eq!(x.std, 4.5);
        assert_abs_diff_eq!(x.cov_inter, 4.5 / 15.5, epsilon = 1e-12);
        assert_abs_diff_eq!(x.cov_intra, (1.0 / 11.0) / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x.cov_intra, 0.0455, epsilon = 1e-4);

        let y = outcome.statistics.get("Y").unwrap();
        assert_abs_diff_eq!(y.mean, 15.0);
        assert_abs_diff_eq!(y.std, 0.0);
        assert_abs_diff_eq!(y.cov_inter, 0.0);
    }

    #[test]
    fn test_excluded_site_is_reported_but_not_aggregated() {
        let mut sites = scenario();
        sites[1].excluded = true;
        let outcome = engine().compute(&aggregation(sites)).unwrap();

        let b = outcome.sites.iter().find(|s| s.site == "B").unwrap();
        assert!(b.excluded);
        assert_abs_diff_eq!(b.mean, 20.0);

        let x = outcome.statistics.get("X").unwrap();
        assert_eq!(x.n_sites, 1);
        assert_abs_diff_eq!(x.mean, 11.0);
    }

    #[test]
    fn test_single_site_vendor_matches_its_site() {
        let sites = vec![site("A", "X", "m1", &[10.0, 12.0, 14.0])];
        let outcome = engine().compute(&aggregation(sites)).unwrap();

        let row = &outcome.sites[0];
        let x = outcome.statistics.get("X").unwrap();
        assert_abs_diff_eq!(x.mean, row.mean);
        assert_abs_diff_eq!(x.cov_inter, 0.0);
        assert_abs_diff_eq!(x.cov_intra, row.cov);
    }

    #[test]
    fn test_empty_site_and_vendor_are_reported() {
        let sites = vec![site("A", "X", "m1", &[1.0, 2.0]), site("E", "Y", "m2", &[])];
        let outcome = engine().compute(&aggregation(sites)).unwrap();

        let empty = outcome.sites.iter().find(|s| s.site == "E").unwrap();
        assert!(empty.mean.is_nan());
        assert!(empty.std.is_nan());

        let y = outcome.statistics.get("Y").unwrap();
        assert_eq!(y.n_sites, 0);
        assert!(y.mean.is_nan());

        let scopes: Vec<&DiagnosticScope> = outcome.diagnostics.iter().map(|d| &d.scope).collect();
        assert!(scopes.contains(&&DiagnosticScope::Site("E".to_string())));
        assert!(scopes.contains(&&DiagnosticScope::Vendor("Y".to_string())));
        assert!(scopes.contains(&&DiagnosticScope::Vendor("Z".to_string())));
    }

    #[test]
    fn test_zero_mean_site() {
        let sites = vec![site("A", "X", "m1", &[-1.0, 1.0])];
        let outcome = engine().compute(&aggregation(sites)).unwrap();
        assert_abs_diff_eq!(outcome.sites[0].mean, 0.0);
        assert_abs_diff_eq!(outcome.sites[0].std, 1.0);
        assert!(outcome.sites[0].cov.is_nan());
        assert_eq!(
            outcome.diagnostics[0].scope,
            DiagnosticScope::Site("A".to_string())
        );
    }

    #[test]
    fn test_unknown_vendor_is_fatal() {
        let sites = vec![site("A", "Toshiba", "m1", &[1.0])];
        match engine().compute(&aggregation(sites)) {
            Err(DataError::UnknownVendor { vendor, site, .. }) => {
                assert_eq!(vendor, "Toshiba");
                assert_eq!(site, "A");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_sites_sorted_and_spanned() {
        let sites = vec![
            site("zeta", "Y", "b", &[1.0]),
            site("beta", "X", "b", &[1.0]),
            site("alpha", "Y", "a", &[1.0]),
            site("gamma", "X", "a", &[1.0]),
        ];
        let outcome = engine().compute(&aggregation(sites)).unwrap();
        let order: Vec<&str> = outcome.sites.iter().map(|s| s.site.as_str()).collect();
        assert_eq!(order, vec!["gamma", "beta", "alpha", "zeta"]);
        assert_eq!(
            outcome.spans,
            vec![
                VendorSpan { vendor: "X".to_string(), first: 0, last: 1 },
                VendorSpan { vendor: "Y".to_string(), first: 2, last: 3 },
            ]
        );
    }

    #[test]
    fn test_anova_known_values() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, 5.0, 6.0];
        let result = one_way_anova(&[&a, &b]).unwrap();
        assert_abs_diff_eq!(result.f_statistic, 13.5, epsilon = 1e-12);
        assert_eq!(result.df_between, 1);
        assert_eq!(result.df_within, 4);
        assert!(result.p_value > 0.01 && result.p_value < 0.05);
    }

    #[test]
    fn test_anova_needs_two_groups_with_variance() {
        assert!(one_way_anova(&[&[1.0, 2.0]]).is_err());
        assert!(one_way_anova(&[&[1.0], &[2.0]]).is_err());
        assert!(one_way_anova(&[&[1.0, 2.0], &[]]).is_err());
    }

    #[test]
    fn test_tukey_two_groups_agrees_with_anova() {
        let groups = vec![
            ("GE".to_string(), vec![1.0, 2.0, 3.0]),
            ("Siemens".to_string(), vec![4.0, 5.0, 6.0]),
        ];
        let tukey = tukey_hsd(&groups, 0.05).unwrap();
        let anova = one_way_anova(&[&groups[0].1, &groups[1].1]).unwrap();

        assert_eq!(tukey.comparisons.len(), 1);
        let pair = &tukey.comparisons[0];
        assert_abs_diff_eq!(pair.mean_diff, 3.0);
        assert_abs_diff_eq!(pair.p_adj, anova.p_value, epsilon = 1e-4);
        assert!(pair.reject);
        assert!(pair.lower > 0.0 && pair.upper > pair.lower);
        assert_eq!(tukey.reject("Siemens", "GE"), Some(true));
    }

    #[test]
    fn test_tukey_identical_groups_not_rejected() {
        let groups = vec![
            ("GE".to_string(), vec![1.0, 2.0, 3.0]),
            ("Philips".to_string(), vec![1.0, 2.0, 3.0]),
            ("Siemens".to_string(), vec![1.5, 2.0, 2.5]),
        ];
        let tukey = tukey_hsd(&groups, 0.05).unwrap();
        assert_eq!(tukey.comparisons.len(), 3);
        assert!(tukey.comparisons.iter().all(|c| !c.reject));
        assert_abs_diff_eq!(tukey.comparisons[0].p_adj, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_tukey_needs_error_degrees_of_freedom() {
        let groups = vec![
            ("GE".to_string(), vec![1.0, 2.0]),
            ("Siemens".to_string(), vec![4.0]),
        ];
        assert!(tukey_hsd(&groups, 0.05).is_err());
    }
}
