//! Error types for the statistics core.
//!
//! Fatal conditions are typed here so the driver can report the offending
//! metric, site, vendor or subject. Degenerate statistics are not errors;
//! they travel with the results as [`crate::models::Diagnostic`] entries.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid exclusion file or settings. Raised before any aggregation starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed exclusion file {path}: {source}")]
    Exclusion {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Data misalignment between records, metadata and the configured catalog.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("[{metric}] subject '{subject}' (from {filename}) has no row in the participants table")]
    MissingSubject {
        metric: String,
        subject: String,
        filename: String,
    },

    #[error("[{metric}] site '{site}' reports vendor '{vendor}', expected one of {expected:?}")]
    UnknownVendor {
        metric: String,
        site: String,
        vendor: String,
        expected: Vec<String>,
    },

    #[error("[{metric}] cannot derive a subject id from filename '{filename}'")]
    MalformedFilename { metric: String, filename: String },

    #[error("[{metric}] subject '{subject}' has non-numeric value '{value}'")]
    InvalidValue {
        metric: String,
        subject: String,
        value: String,
    },

    #[error("no metric is configured for '{0}'")]
    UnknownMetric(String),

    #[error("{source_name} is missing required column '{column}'")]
    MissingColumn { source_name: String, column: String },

    #[error("{source_name}, line {line}: {message}")]
    Parse {
        source_name: String,
        line: usize,
        message: String,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A regression that cannot be fitted for one vendor. Other vendors proceed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegressionError {
    #[error("vendor '{vendor}' has {pairs} paired observation(s), at least 2 are required")]
    InsufficientPairs { vendor: String, pairs: usize },

    #[error("vendor '{vendor}' has {x_len} x values but {y_len} y values")]
    LengthMismatch {
        vendor: String,
        x_len: usize,
        y_len: usize,
    },

    #[error("vendor '{vendor}' has a constant predictor, slope is undefined")]
    ConstantPredictor { vendor: String },
}
