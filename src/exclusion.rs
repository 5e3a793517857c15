//! Subject and site exclusions per metric.
//!
//! The exclusion file maps a metric name to a list of tokens. A token is
//! either tagged explicitly:
//!
//! ```yaml
//! csa_t2:
//!   - subject: sub-mountSinai03
//!   - site: oxfordFmrib
//! ```
//!
//! or given as a bare string, in which case the subject prefix (`sub-` by
//! default) decides: `sub-oxfordFmrib04` is a subject, `oxfordFmrib` a site.

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::debug;

/// Default marker that starts every subject id.
pub const DEFAULT_SUBJECT_PREFIX: &str = "sub-";

/// A classified exclusion token.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExclusionToken {
    Subject(String),
    Site(String),
}

/// Token as written in the exclusion file.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawToken {
    Tagged(ExclusionToken),
    Bare(String),
}

/// Raw exclusion mapping. `csa_t1:` with no list is allowed and means nothing.
type RawExclusions = HashMap<String, Option<Vec<RawToken>>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct MetricExclusions {
    subjects: BTreeSet<String>,
    sites: BTreeSet<String>,
}

/// Decides which subjects and sites are excluded for each metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionPolicy {
    subject_prefix: String,
    by_metric: HashMap<String, MetricExclusions>,
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self::empty(DEFAULT_SUBJECT_PREFIX)
    }
}

impl ExclusionPolicy {
    /// A policy that excludes nothing.
    pub fn empty(subject_prefix: &str) -> Self {
        Self {
            subject_prefix: subject_prefix.to_string(),
            by_metric: HashMap::new(),
        }
    }

    /// Build from already classified tokens.
    pub fn from_tokens<I, T>(subject_prefix: &str, tokens: I) -> Self
    where
        I: IntoIterator<Item = (String, T)>,
        T: IntoIterator<Item = ExclusionToken>,
    {
        let mut policy = Self::empty(subject_prefix);
        for (metric, metric_tokens) in tokens {
            let entry = policy.by_metric.entry(metric).or_default();
            for token in metric_tokens {
                match token {
                    ExclusionToken::Subject(id) => entry.subjects.insert(id),
                    ExclusionToken::Site(site) => entry.sites.insert(site),
                };
            }
        }
        policy
    }

    /// Build from bare string tokens, classified by the subject prefix.
    pub fn from_strings<I, T, S>(subject_prefix: &str, tokens: I) -> Self
    where
        I: IntoIterator<Item = (String, T)>,
        T: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let classified = tokens.into_iter().map(|(metric, list)| {
            let list: Vec<ExclusionToken> = list
                .into_iter()
                .map(|s| classify(subject_prefix, s.into()))
                .collect();
            (metric, list)
        });
        Self::from_tokens(subject_prefix, classified)
    }

    /// Parse an exclusion document. Blank content excludes nothing.
    pub fn from_yaml_str(content: &str, subject_prefix: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::empty(subject_prefix));
        }

        let raw: Option<RawExclusions> = serde_yaml::from_str(content)?;
        let tokens = raw.unwrap_or_default().into_iter().map(|(metric, list)| {
            let list: Vec<ExclusionToken> = list
                .unwrap_or_default()
                .into_iter()
                .map(|token| match token {
                    RawToken::Tagged(token) => token,
                    RawToken::Bare(text) => classify(subject_prefix, text),
                })
                .collect();
            (metric, list)
        });

        Ok(Self::from_tokens(subject_prefix, tokens))
    }

    /// Load an exclusion file.
    pub fn load(path: &Path, subject_prefix: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml_str(&content, subject_prefix).map_err(|source| ConfigError::Exclusion {
            path: path.to_path_buf(),
            source,
        })
    }

    /// True if the subject is listed for the metric, or its site is.
    pub fn is_excluded(&self, subject_id: &str, metric: &str) -> bool {
        if self.excludes_subject(subject_id, metric) {
            return true;
        }
        self.by_metric.get(metric).is_some_and(|e| {
            e.sites
                .iter()
                .any(|site| self.subject_belongs_to(subject_id, site))
        })
    }

    /// True only if the subject itself is listed for the metric.
    pub fn excludes_subject(&self, subject_id: &str, metric: &str) -> bool {
        self.by_metric
            .get(metric)
            .is_some_and(|e| e.subjects.contains(subject_id))
    }

    /// True only if the site is listed as a bare site for the metric.
    pub fn excludes_site(&self, site: &str, metric: &str) -> bool {
        self.by_metric
            .get(metric)
            .is_some_and(|e| e.sites.contains(site))
    }

    /// Subjects listed for a metric, in sorted order.
    pub fn subjects(&self, metric: &str) -> impl Iterator<Item = &str> {
        self.by_metric
            .get(metric)
            .into_iter()
            .flat_map(|e| e.subjects.iter().map(String::as_str))
    }

    /// Whether a subject id encodes the site: `sub-` + site + subject number.
    ///
    /// Site names may end in digits (`beijing750`), so the site is matched
    /// as a prefix rather than recovered by stripping digits.
    pub fn subject_belongs_to(&self, subject_id: &str, site: &str) -> bool {
        subject_id
            .strip_prefix(self.subject_prefix.as_str())
            .and_then(|stem| stem.strip_prefix(site))
            .is_some_and(|number| !number.is_empty() && number.chars().all(|c| c.is_ascii_digit()))
    }

    /// Every token listed for a metric, subjects first.
    pub fn tokens(&self, metric: &str) -> Vec<ExclusionToken> {
        self.by_metric
            .get(metric)
            .map(|e| {
                e.subjects
                    .iter()
                    .cloned()
                    .map(ExclusionToken::Subject)
                    .chain(e.sites.iter().cloned().map(ExclusionToken::Site))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn subject_prefix(&self) -> &str {
        &self.subject_prefix
    }

    /// Number of metrics with at least one token.
    pub fn metric_count(&self) -> usize {
        self.by_metric
            .values()
            .filter(|e| !e.subjects.is_empty() || !e.sites.is_empty())
            .count()
    }
}

fn classify(subject_prefix: &str, text: String) -> ExclusionToken {
    let text = text.trim().to_string();
    if text.starts_with(subject_prefix) {
        ExclusionToken::Subject(text)
    } else {
        debug!("Treating untagged exclusion token '{}' as a site", text);
        ExclusionToken::Site(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(yaml: &str) -> ExclusionPolicy {
        ExclusionPolicy::from_yaml_str(yaml, DEFAULT_SUBJECT_PREFIX).unwrap()
    }

    #[test]
    fn test_bare_tokens_follow_prefix() {
        let p = policy(
            r#"
csa_t1:
  - sub-oxfordFmrib04
  - sub-mountSinai03
csa_t2:
  - oxfordFmrib
"#,
        );

        assert!(p.is_excluded("sub-oxfordFmrib04", "csa_t1"));
        assert!(!p.is_excluded("sub-oxfordFmrib01", "csa_t1"));
        assert!(p.is_excluded("sub-oxfordFmrib01", "csa_t2"));
        assert!(p.excludes_site("oxfordFmrib", "csa_t2"));
        assert!(!p.excludes_subject("sub-oxfordFmrib01", "csa_t2"));
        assert_eq!(
            p.subjects("csa_t1").collect::<Vec<_>>(),
            vec!["sub-mountSinai03", "sub-oxfordFmrib04"]
        );
        assert_eq!(p.subjects("csa_t2").count(), 0);
    }

    #[test]
    fn test_tagged_tokens() {
        let p = policy(
            r#"
dti_fa:
  - subject: sub-beijingPrisma03
  - site: sub-weirdSite
"#,
        );

        assert!(p.excludes_subject("sub-beijingPrisma03", "dti_fa"));
        // Tag wins over the prefix convention.
        assert!(p.excludes_site("sub-weirdSite", "dti_fa"));
        assert!(!p.excludes_subject("sub-weirdSite", "dti_fa"));
    }

    #[test]
    fn test_unknown_metric_excludes_nothing() {
        let p = policy("mtsat:\n  - sub-geneva02\n");
        assert!(!p.is_excluded("sub-geneva02", "t1"));
    }

    #[test]
    fn test_empty_documents() {
        assert_eq!(policy(""), ExclusionPolicy::default());
        assert_eq!(policy("   \n"), ExclusionPolicy::default());
        assert_eq!(policy("~"), ExclusionPolicy::default());

        let p = policy("csa_t1:\n");
        assert_eq!(p.metric_count(), 0);
        assert!(!p.is_excluded("sub-amu01", "csa_t1"));
    }

    #[test]
    fn test_malformed_document() {
        assert!(ExclusionPolicy::from_yaml_str("- just\n- a list\n", "sub-").is_err());
        assert!(ExclusionPolicy::from_yaml_str("csa_t1: [unterminated", "sub-").is_err());
    }

    #[test]
    fn test_subject_belongs_to_site() {
        let p = ExclusionPolicy::default();
        assert!(p.subject_belongs_to("sub-oxfordFmrib04", "oxfordFmrib"));
        assert!(p.subject_belongs_to("sub-beijing75001", "beijing750"));
        assert!(!p.subject_belongs_to("sub-beijingPrisma01", "beijing"));
        assert!(!p.subject_belongs_to("amu01", "amu"));
        assert!(!p.subject_belongs_to("sub-amu", "amu"));
    }

    #[test]
    fn test_site_token_excludes_its_subjects() {
        let p = policy("t1:\n  - beijing750\n");
        assert!(p.is_excluded("sub-beijing75003", "t1"));
        assert!(!p.is_excluded("sub-beijingVerio03", "t1"));
    }

    #[test]
    fn test_repeated_tokens_are_idempotent() {
        let once = ExclusionPolicy::from_strings("sub-", vec![("m".to_string(), vec!["sub-a01"])]);
        let twice = ExclusionPolicy::from_strings(
            "sub-",
            vec![("m".to_string(), vec!["sub-a01", "sub-a01"])],
        );
        assert_eq!(once, twice);
        assert_eq!(twice.tokens("m").len(), 1);
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exclude.yml");
        std::fs::write(&path, "csa_t1: {").unwrap();

        let err = ExclusionPolicy::load(&path, "sub-").unwrap_err();
        assert!(err.to_string().contains("exclude.yml"));

        let missing = ExclusionPolicy::load(&dir.path().join("nope.yml"), "sub-");
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
