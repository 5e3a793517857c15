//! Per-site aggregation of metric records.
//!
//! Records are joined with the participants table and grouped by site. The
//! result keeps first-seen site order; consumers sort explicitly.

use crate::error::DataError;
use crate::exclusion::ExclusionPolicy;
use crate::models::{MetadataTable, MetricRecord, SiteAggregate};
use std::collections::HashMap;
use tracing::{debug, info};

/// Sites of one metric in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteAggregation {
    pub metric: String,
    pub sites: Vec<SiteAggregate>,
    /// Subjects dropped by a subject exclusion, in record order.
    pub subjects_removed: Vec<String>,
}

impl SiteAggregation {
    pub fn get(&self, site: &str) -> Option<&SiteAggregate> {
        self.sites.iter().find(|s| s.site == site)
    }

    /// Total number of accepted values.
    pub fn value_count(&self) -> usize {
        self.sites.iter().map(|s| s.values.len()).sum()
    }

    pub fn site_names(&self) -> Vec<&str> {
        self.sites.iter().map(|s| s.site.as_str()).collect()
    }
}

/// Group the records of one metric by site.
///
/// A subject listed for this metric is dropped and counted as removed. A
/// `"None"` reading is skipped without counting. A site listed for this metric,
/// or holding a listed subject, keeps its values but is flagged `excluded`, so
/// it can still be reported.
pub fn aggregate(
    records: &[MetricRecord],
    metadata: &MetadataTable,
    metric: &str,
    policy: &ExclusionPolicy,
) -> Result<SiteAggregation, DataError> {
    let mut sites: Vec<SiteAggregate> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut subjects_removed = Vec::new();

    for record in records {
        debug!("Filename: {}", record.filename);

        let subject = record
            .subject_id()
            .ok_or_else(|| DataError::MalformedFilename {
                metric: metric.to_string(),
                filename: record.filename.clone(),
            })?;

        if policy.excludes_subject(&subject, metric) {
            subjects_removed.push(subject);
            continue;
        }

        let meta = metadata
            .get(&subject)
            .ok_or_else(|| DataError::MissingSubject {
                metric: metric.to_string(),
                subject: subject.clone(),
                filename: record.filename.clone(),
            })?;

        // Vendor and model are taken from the first subject seen at a site.
        let slot = *index.entry(meta.institution_id.clone()).or_insert_with(|| {
            sites.push(SiteAggregate::new(
                meta.institution_id.clone(),
                meta.manufacturer.clone(),
                meta.manufacturers_model_name.clone(),
            ));
            sites.len() - 1
        });

        if record.is_missing() {
            debug!("No value for {} ({})", subject, metric);
            continue;
        }

        let value = parse_value(&record.value).ok_or_else(|| DataError::InvalidValue {
            metric: metric.to_string(),
            subject: subject.clone(),
            value: record.value.clone(),
        })?;

        sites[slot].push(subject, value);
    }

    // A listed subject flags its site as well as dropping its own value.
    let listed: Vec<&str> = policy.subjects(metric).collect();
    for site in &mut sites {
        let has_listed_subject = listed.iter().any(|subject| match metadata.get(subject) {
            Some(meta) => meta.institution_id == site.site,
            None => policy.subject_belongs_to(subject, &site.site),
        });
        site.excluded = policy.excludes_site(&site.site, metric) || has_listed_subject;
        if site.excluded {
            info!("[{}] Site {} excluded from vendor statistics", metric, site.site);
        }
    }

    info!("[{}] Subjects removed: {:?}", metric, subjects_removed);

    Ok(SiteAggregation {
        metric: metric.to_string(),
        sites,
        subjects_removed,
    })
}

fn parse_value(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
