//! fraudscope - Ensemble fraud scoring with pattern learning
//!
//! Scores batches of financial transactions by fusing independent anomaly
//! detectors with a deterministic rule engine, then mines the flagged subset
//! for recurring fraud shapes and keeps them as persistent learning state.

pub mod cli;
pub mod config;
pub mod detectors;
pub mod error;
pub mod features;
pub mod ingest;
pub mod learning;
pub mod models;
pub mod pipeline;
pub mod rules;
pub mod scoring;
pub mod stats;

pub use config::EngineConfig;
pub use error::{DataError, DetectorError, StoreError};
pub use pipeline::{BatchReport, FraudPipeline};
