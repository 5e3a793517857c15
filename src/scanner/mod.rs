//! Metric file discovery.
//!
//! This module finds the metric tables in a results directory and maps each
//! one to its entry in the metric catalog.

use crate::config::{Config, MetricConfig};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Extension of metric tables.
const METRIC_EXTENSION: &str = "csv";

/// A metric table found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricFile {
    /// Full path to the table.
    pub path: PathBuf,
    /// File name, the key into the metric catalog.
    pub file_name: String,
}

/// Scanner for metric tables directly inside a results directory.
pub struct MetricScanner {
    results_dir: PathBuf,
}

impl MetricScanner {
    /// Create a new scanner.
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    /// Every `.csv` file in the results directory, sorted by file name.
    pub fn scan(&self) -> Result<Vec<MetricFile>> {
        let mut files = Vec::new();

        let walker = WalkDir::new(&self.results_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()));

        for entry in walker {
            let entry = entry.with_context(|| {
                format!("Failed to read directory {}", self.results_dir.display())
            })?;
            let path = entry.path();

            if !entry.file_type().is_file() || !self.matches(path) {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy().to_string();
            debug!("Found metric file: {}", file_name);
            files.push(MetricFile {
                path: path.to_path_buf(),
                file_name,
            });
        }

        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(files)
    }

    /// Scan and pair every file with its catalog entry.
    ///
    /// A table with no catalog entry is an error.
    pub fn resolve<'c>(&self, config: &'c Config) -> Result<Vec<(MetricFile, &'c MetricConfig)>> {
        self.scan()?
            .into_iter()
            .map(|file| -> Result<_> {
                let metric = config.metric_for_file(&file.file_name)?;
                Ok((file, metric))
            })
            .collect()
    }

    /// Check if a path looks like a metric table.
    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(METRIC_EXTENSION))
            .unwrap_or(false)
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DataError;
    use std::fs;
    use tempfile::TempDir;

    fn results_dir(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for name in files {
            fs::write(dir.path().join(name), "Filename\n").unwrap();
        }
        dir
    }

    #[test]
    fn test_scan_sorted_csv_only() {
        let dir = results_dir(&["MTR.csv", "DWI_FA.csv", "participants.tsv", ".hidden.csv"]);
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("T1.csv"), "").unwrap();

        let files = MetricScanner::new(dir.path()).scan().unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["DWI_FA.csv", "MTR.csv"]);
    }

    #[test]
    fn test_resolve_catalog() {
        let dir = results_dir(&["csa-SC_T2w.csv", "csa-SC_T1w.csv"]);
        let config = Config::default();

        let resolved = MetricScanner::new(dir.path()).resolve(&config).unwrap();
        let metrics: Vec<&str> = resolved.iter().map(|(_, m)| m.name.as_str()).collect();
        assert_eq!(metrics, vec!["csa_t1", "csa_t2"]);
    }

    #[test]
    fn test_unknown_metric_file_fails() {
        let dir = results_dir(&["T1.csv", "extra.csv"]);
        let err = MetricScanner::new(dir.path())
            .resolve(&Config::default())
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::UnknownMetric(name)) if name == "extra.csv"
        ));
    }

    #[test]
    fn test_missing_directory() {
        assert!(MetricScanner::new("/no/such/results").scan().is_err());
    }
}
