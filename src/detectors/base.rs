//! Base detector trait and types
//!
//! This module defines the core abstractions for anomaly scoring:
//! - `Detector` trait that every scoring technique implements
//! - `DetectorResult` for one technique's per-row scores
//! - `DetectorRun` for capturing execution outcome and timing
//! - `Deadline` for per-detector wall-clock budgets

use crate::detectors::reconcile;
use crate::detectors::registry::DetectorKind;
use crate::error::DetectorError;
use crate::features::FeatureMatrix;
use crate::models::TransactionBatch;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::time::{Duration, Instant};

/// Scores produced by one detector
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorResult {
    /// Name of the detector that produced these scores
    pub detector_name: String,
    /// Raw anomaly scores, higher = more anomalous
    pub scores: Vec<f64>,
    /// Per-row anomaly votes
    pub anomalies: Vec<bool>,
    /// Ensemble weight before normalization
    pub weight: f64,
    /// Execution time in milliseconds
    pub duration_ms: u64,
}

impl DetectorResult {
    pub fn new(
        detector_name: impl Into<String>,
        scores: Vec<f64>,
        anomalies: Vec<bool>,
        weight: f64,
    ) -> Self {
        Self {
            detector_name: detector_name.into(),
            scores,
            anomalies,
            weight,
            duration_ms: 0,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn anomaly_count(&self) -> usize {
        self.anomalies.iter().filter(|&&a| a).count()
    }

    pub fn is_finite(&self) -> bool {
        self.scores.iter().all(|s| s.is_finite())
    }

    /// Pad or truncate both vectors to exactly `n` entries
    pub fn reconciled(mut self, n: usize) -> Self {
        self.scores = reconcile::reconcile(&self.scores, n);
        self.anomalies = reconcile::reconcile_flags(&self.anomalies, n);
        self
    }
}

/// Outcome of running one detector inside the engine
#[derive(Debug, Clone)]
pub struct DetectorRun {
    pub detector_name: String,
    pub duration_ms: u64,
    pub outcome: Result<DetectorResult, DetectorError>,
}

impl DetectorRun {
    /// Create a successful run
    pub fn success(result: DetectorResult, duration_ms: u64) -> Self {
        Self {
            detector_name: result.detector_name.clone(),
            duration_ms,
            outcome: Ok(result.with_duration(duration_ms)),
        }
    }

    /// Create a failed run
    pub fn failure(detector_name: String, error: DetectorError, duration_ms: u64) -> Self {
        Self {
            detector_name,
            duration_ms,
            outcome: Err(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&DetectorError> {
        self.outcome.as_ref().err()
    }
}

/// Wall-clock budget for one detector invocation
#[derive(Debug, Clone)]
pub struct Deadline {
    detector: &'static str,
    started: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    pub fn new(detector: &'static str, budget: Option<Duration>) -> Self {
        Self {
            detector,
            started: Instant::now(),
            budget,
        }
    }

    pub fn unbounded(detector: &'static str) -> Self {
        Self::new(detector, None)
    }

    pub fn is_expired(&self) -> bool {
        self.budget
            .map(|budget| self.started.elapsed() >= budget)
            .unwrap_or(false)
    }

    /// Fail with `BudgetExceeded` once the budget is spent
    pub fn check(&self) -> Result<(), DetectorError> {
        match self.budget {
            Some(budget) if self.is_expired() => Err(DetectorError::BudgetExceeded {
                detector: self.detector,
                budget,
            }),
            _ => Ok(()),
        }
    }
}

/// Everything a detector reads while scoring one batch
pub struct DetectorContext<'a> {
    pub matrix: &'a FeatureMatrix,
    /// Cleaned batch, for techniques that group by entity
    pub batch: &'a TransactionBatch,
    /// Expected anomaly fraction in (0, 0.5]
    pub contamination: f64,
    pub seed: u64,
    pub deadline: Deadline,
}

impl<'a> DetectorContext<'a> {
    pub fn n_rows(&self) -> usize {
        self.matrix.nrows()
    }

    /// Fresh deterministic RNG for this invocation
    pub fn rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed)
    }
}

/// Trait for all anomaly-scoring techniques
///
/// Implementations fit on the batch they score; nothing carries over
/// between batches.
///
/// # Example Implementation
///
/// ```ignore
/// pub struct MyDetector;
///
/// impl Detector for MyDetector {
///     fn name(&self) -> &'static str { "my_detector" }
///     fn description(&self) -> &'static str { "Scores rows by distance to the median" }
///     fn kind(&self) -> DetectorKind { DetectorKind::IsolationForest }
///     fn weight(&self) -> f64 { 0.5 }
///
///     fn fit_score(&self, ctx: &DetectorContext<'_>) -> Result<DetectorResult, DetectorError> {
///         let scores = vec![0.0; ctx.n_rows()];
///         let anomalies = vec![false; ctx.n_rows()];
///         Ok(DetectorResult::new(self.name(), scores, anomalies, self.weight()))
///     }
/// }
/// ```
pub trait Detector: Send + Sync {
    /// Unique identifier, also used as the `model_details` key
    fn name(&self) -> &'static str;

    /// Human-readable description of the technique
    fn description(&self) -> &'static str;

    fn kind(&self) -> DetectorKind;

    /// Ensemble weight before normalization
    fn weight(&self) -> f64;

    /// Wall-clock budget; `None` means unbounded
    fn budget(&self) -> Option<Duration> {
        None
    }

    /// Fit on the batch and return one score per row
    ///
    /// Output may be shorter or longer than the batch; the engine
    /// reconciles it before fusion.
    fn fit_score(&self, ctx: &DetectorContext<'_>) -> Result<DetectorResult, DetectorError>;
}

/// Progress callback for detector execution
pub type ProgressCallback = Box<dyn Fn(&str, usize, usize) + Send + Sync>;

/// Summary statistics from running all detectors
#[derive(Debug, Clone, Default)]
pub struct DetectionSummary {
    /// Total number of detectors run
    pub detectors_run: usize,
    /// Number of detectors that succeeded
    pub detectors_succeeded: usize,
    /// Number of detectors that failed
    pub detectors_failed: usize,
    /// Anomaly votes across all successful detectors
    pub total_anomalies: usize,
    /// Total execution time in milliseconds
    pub total_duration_ms: u64,
}

impl DetectionSummary {
    /// Update summary with a detector run
    pub fn add_run(&mut self, run: &DetectorRun) {
        self.detectors_run += 1;
        self.total_duration_ms += run.duration_ms;

        match &run.outcome {
            Ok(result) => {
                self.detectors_succeeded += 1;
                self.total_anomalies += result.anomaly_count();
            }
            Err(_) => self.detectors_failed += 1,
        }
    }
}
