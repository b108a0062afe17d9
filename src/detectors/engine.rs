//! Detector execution engine with parallel support
//!
//! The DetectorEngine orchestrates the execution of all registered detectors:
//! - Runs detectors in parallel using rayon
//! - Gives each detector its own deadline and seed
//! - Catches panics and errors, turning them into failed runs
//! - Reconciles every successful output to the batch length
//! - Reports progress through callbacks
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    DetectorEngine                       │
//! ├─────────────────────────────────────────────────────────┤
//! │  1. Register detectors                                  │
//! │  2. Run all in parallel (rayon), each under catch_unwind│
//! │  3. Validate + reconcile outputs to batch length        │
//! │  4. Return per-detector runs and a summary              │
//! └─────────────────────────────────────────────────────────┘
//! ```

use crate::detectors::base::{
    Deadline, DetectionSummary, Detector, DetectorContext, DetectorRun, ProgressCallback,
};
use crate::error::DetectorError;
use crate::features::FeatureMatrix;
use crate::models::TransactionBatch;
use anyhow::Result;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Orchestrates anomaly scoring across all registered detectors
pub struct DetectorEngine {
    /// Registered detectors
    detectors: Vec<Arc<dyn Detector>>,
    /// Number of worker threads for parallel execution
    workers: usize,
    /// Progress callback for reporting execution status
    progress_callback: Option<ProgressCallback>,
}

impl DetectorEngine {
    /// Create a new detector engine
    ///
    /// # Arguments
    /// * `workers` - Number of worker threads (0 = auto-detect)
    pub fn new(workers: usize) -> Self {
        let actual_workers = if workers == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
                .min(16) // Cap at 16 threads
        } else {
            workers
        };

        Self {
            detectors: Vec::new(),
            workers: actual_workers,
            progress_callback: None,
        }
    }

    /// Set a progress callback
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Register a detector
    pub fn register(&mut self, detector: Arc<dyn Detector>) {
        debug!("Registering detector: {}", detector.name());
        self.detectors.push(detector);
    }

    /// Register multiple detectors at once
    pub fn register_all(&mut self, detectors: impl IntoIterator<Item = Arc<dyn Detector>>) {
        for detector in detectors {
            self.register(detector);
        }
    }

    /// Run every detector against the batch
    ///
    /// Runs come back in registration order. Successful outputs are
    /// reconciled to `matrix.nrows()`; failures carry their error.
    pub fn run(
        &self,
        matrix: &FeatureMatrix,
        batch: &TransactionBatch,
        contamination: f64,
        seed: u64,
    ) -> Result<(Vec<DetectorRun>, DetectionSummary)> {
        let start = Instant::now();
        info!(
            "Starting detection with {} detectors on {} workers",
            self.detectors.len(),
            self.workers
        );

        let completed = Arc::new(AtomicUsize::new(0));
        let total = self.detectors.len();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()?;

        let runs: Vec<DetectorRun> = pool.install(|| {
            self.detectors
                .par_iter()
                .map(|detector| {
                    let run = self.run_single_detector(detector, matrix, batch, contamination, seed);

                    // Update progress
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(ref callback) = self.progress_callback {
                        callback(detector.name(), done, total);
                    }

                    run
                })
                .collect()
        });

        let mut summary = DetectionSummary::default();
        for run in &runs {
            summary.add_run(run);
            if let Some(err) = run.error() {
                warn!("Detector {} omitted from ensemble: {}", run.detector_name, err);
            }
        }
        summary.total_duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Detection complete: {}/{} detectors succeeded in {:?}",
            summary.detectors_succeeded,
            summary.detectors_run,
            start.elapsed()
        );

        Ok((runs, summary))
    }

    /// Run a single detector with error handling and timing
    fn run_single_detector(
        &self,
        detector: &Arc<dyn Detector>,
        matrix: &FeatureMatrix,
        batch: &TransactionBatch,
        contamination: f64,
        seed: u64,
    ) -> DetectorRun {
        let name = detector.name();
        let start = Instant::now();
        let n = matrix.nrows();

        debug!("Running detector: {}", name);

        let ctx = DetectorContext {
            matrix,
            batch,
            contamination,
            seed: seed.wrapping_add(detector.kind().seed_offset()),
            deadline: Deadline::new(name, detector.budget()),
        };

        // Wrap in catch_unwind to handle panics
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            detector.fit_score(&ctx)
        }));
        let duration = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(result)) => {
                if !result.is_finite() {
                    return DetectorRun::failure(
                        name.to_string(),
                        DetectorError::NonFinite { detector: name },
                        duration,
                    );
                }
                if result.len() != n {
                    debug!(
                        "Detector {} returned {} scores for {} rows, reconciling",
                        name,
                        result.len(),
                        n
                    );
                }
                let result = result.reconciled(n);
                debug!(
                    "Detector {} flagged {} rows in {}ms",
                    name,
                    result.anomaly_count(),
                    duration
                );
                DetectorRun::success(result, duration)
            }
            Ok(Err(e)) => DetectorRun::failure(name.to_string(), e, duration),
            Err(panic_info) => {
                let panic_msg = panic_message(panic_info.as_ref());
                error!("Detector {} panicked: {}", name, panic_msg);
                DetectorRun::failure(
                    name.to_string(),
                    DetectorError::Panicked {
                        detector: name.to_string(),
                        message: panic_msg,
                    },
                    duration,
                )
            }
        }
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

impl Default for DetectorEngine {
    fn default() -> Self {
        Self::new(0)
    }
}
