//! Error taxonomy for the scoring engine
//!
//! Only [`DataError`] aborts a batch. Detector and persistence failures are
//! recovered where they happen and surface as warnings plus report fields.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Input problems that make a batch unscorable
#[derive(Error, Debug)]
pub enum DataError {
    #[error("input table is empty")]
    Empty,

    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("at least {min} rows are required for analysis, found {found}")]
    TooFewRows { min: usize, found: usize },

    #[error("every numeric column contains unparseable data")]
    Unparseable,

    #[error("feature matrix is degenerate: {0}")]
    Degenerate(String),

    #[error("contamination must be in (0, 0.5], got {0}")]
    InvalidContamination(f64),

    #[error("unknown detector technique '{0}' (expected isolation_forest, autoencoder or sequence)")]
    UnknownDetector(String),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV input: {0}")]
    Csv(#[from] csv::Error),
}

/// A single detector could not produce scores
///
/// The engine records these and leaves the detector out of fusion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    #[error("{detector} needs more than {required} rows, batch has {found}")]
    InsufficientRows {
        detector: &'static str,
        required: usize,
        found: usize,
    },

    #[error("{detector} exceeded its {budget:?} budget")]
    BudgetExceeded {
        detector: &'static str,
        budget: Duration,
    },

    #[error("{detector} produced non-finite scores")]
    NonFinite { detector: &'static str },

    #[error("{detector} failed: {message}")]
    Failed {
        detector: &'static str,
        message: String,
    },

    #[error("{detector} panicked: {message}")]
    Panicked { detector: String, message: String },
}

/// Learning state could not be read or written
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("learning state (de)serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("learning state schema version {found} is not supported (expected {expected})")]
    Version { found: u32, expected: u32 },

    #[error("store has no backing file")]
    NoPath,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_columns_message_lists_all() {
        let err = DataError::MissingColumns(vec!["amount".into(), "step".into()]);
        assert_eq!(err.to_string(), "missing required columns: amount, step");
    }

    #[test]
    fn test_detector_error_names_detector() {
        let err = DetectorError::InsufficientRows {
            detector: "autoencoder",
            required: 50,
            found: 10,
        };
        assert!(err.to_string().starts_with("autoencoder"));
    }
}
