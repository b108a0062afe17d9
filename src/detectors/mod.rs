//! Anomaly detectors
//!
//! This module provides the detector framework and the scoring techniques
//! that make up the ensemble.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     DetectorEngine                          │
//! │  - Registers detectors                                      │
//! │  - Runs detectors in parallel (rayon)                       │
//! │  - Captures panics, errors and budget overruns              │
//! │  - Reconciles outputs to the batch length                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Detector Trait                         │
//! │  - name(): Unique identifier                                │
//! │  - weight(): Ensemble weight                                │
//! │  - fit_score(ctx): Fit on the batch, score every row        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              ┌───────────────┼───────────────┐
//!              ▼               ▼               ▼
//! ┌──────────────────┐ ┌──────────────┐ ┌──────────────────┐
//! │ isolation_forest │ │ autoencoder  │ │ sequence         │
//! │ (forest + LOF    │ │ (dense       │ │ (per-origin      │
//! │  votes)          │ │  recon error)│ │  windows)        │
//! └──────────────────┘ └──────────────┘ └──────────────────┘
//! ```

pub mod autoencoder;
pub mod base;
pub mod engine;
pub mod isolation;
pub mod reconcile;
pub mod registry;
pub mod sequence;

pub use base::{
    Deadline, DetectionSummary, Detector, DetectorContext, DetectorResult, DetectorRun,
    ProgressCallback,
};
pub use engine::DetectorEngine;
pub use registry::{DetectorKind, DetectorRegistry, DetectorSpec, DetectorsConfig};
