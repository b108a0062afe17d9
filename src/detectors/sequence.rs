//! Per-entity sequence reconstruction
//!
//! Each origin account's transactions, ordered by step, are cut into
//! windows of `k` consecutive records. Windows are flattened, scaled and
//! reconstructed by a dense autoencoder; the window reconstruction errors
//! are then stretched back over the batch.

use crate::detectors::autoencoder::{
    default_anomaly_percentile, default_batch_size, default_epochs_small, default_hidden,
    default_large_batch_rows, default_latent, default_learning_rate, DenseAutoencoder,
    TrainSchedule,
};
use crate::detectors::base::{Detector, DetectorContext, DetectorResult};
use crate::detectors::reconcile::{interpolate_to, repeat_to};
use crate::detectors::registry::DetectorKind;
use crate::error::DetectorError;
use crate::features::MinMaxScaler;
use crate::models::{Transaction, TransactionBatch};
use crate::stats::percentile;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const NAME: &str = "sequence";

/// Hyperparameters for the sequence technique
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SequenceParams {
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "super::isolation::default_budget_ms")]
    pub budget_ms: u64,
    /// Batches must have more rows than this
    #[serde(default = "default_min_rows")]
    pub min_rows: usize,
    #[serde(default = "default_max_window")]
    pub max_window: usize,
    /// One window step per this many batch rows
    #[serde(default = "default_rows_per_step")]
    pub rows_per_step: usize,
    /// Above this many distinct origins, entities are sampled
    #[serde(default = "default_entity_threshold")]
    pub entity_threshold: usize,
    #[serde(default = "default_entity_sample_ratio")]
    pub entity_sample_ratio: f64,
    /// Entities taken in first-appearance order when not sampling
    #[serde(default = "default_first_entities")]
    pub first_entities: usize,
    #[serde(default = "default_windows_per_entity")]
    pub max_windows_per_entity: usize,
    #[serde(default = "default_max_windows")]
    pub max_windows: usize,
    #[serde(default = "default_hidden")]
    pub hidden: usize,
    #[serde(default = "default_latent")]
    pub latent: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_epochs_large")]
    pub epochs_large: usize,
    #[serde(default = "default_epochs_small")]
    pub epochs_small: usize,
    #[serde(default = "default_large_batch_rows")]
    pub large_batch_rows: usize,
    #[serde(default = "default_anomaly_percentile")]
    pub anomaly_percentile: f64,
    /// Upper bound of the noise emitted when no sequence is usable
    #[serde(default = "default_noise_scale")]
    pub noise_scale: f64,
}

impl Default for SequenceParams {
    fn default() -> Self {
        Self {
            weight: default_weight(),
            budget_ms: super::isolation::default_budget_ms(),
            min_rows: default_min_rows(),
            max_window: default_max_window(),
            rows_per_step: default_rows_per_step(),
            entity_threshold: default_entity_threshold(),
            entity_sample_ratio: default_entity_sample_ratio(),
            first_entities: default_first_entities(),
            max_windows_per_entity: default_windows_per_entity(),
            max_windows: default_max_windows(),
            hidden: default_hidden(),
            latent: default_latent(),
            learning_rate: default_learning_rate(),
            batch_size: default_batch_size(),
            epochs_large: default_epochs_large(),
            epochs_small: default_epochs_small(),
            large_batch_rows: default_large_batch_rows(),
            anomaly_percentile: default_anomaly_percentile(),
            noise_scale: default_noise_scale(),
        }
    }
}

fn default_weight() -> f64 {
    0.3
}
fn default_min_rows() -> usize {
    100
}
fn default_max_window() -> usize {
    3
}
fn default_rows_per_step() -> usize {
    50
}
fn default_entity_threshold() -> usize {
    100
}
fn default_entity_sample_ratio() -> f64 {
    0.3
}
fn default_first_entities() -> usize {
    50
}
fn default_windows_per_entity() -> usize {
    5
}
fn default_max_windows() -> usize {
    100
}
fn default_epochs_large() -> usize {
    8
}
fn default_noise_scale() -> f64 {
    0.1
}

/// Numeric fields of one record inside a window
fn window_fields(t: &Transaction) -> [f64; 5] {
    [
        t.amount,
        t.old_balance_orig,
        t.new_balance_orig,
        t.old_balance_dest,
        t.new_balance_dest,
    ]
}

/// Ensemble member scoring per-origin transaction sequences
pub struct SequenceDetector {
    params: SequenceParams,
}

impl SequenceDetector {
    pub fn new(params: SequenceParams) -> Self {
        Self { params }
    }

    /// Window length for a batch of `n` rows
    pub fn window_len(&self, n: usize) -> usize {
        self.params
            .max_window
            .min((n / self.params.rows_per_step.max(1)).max(1))
    }

    /// Origin ids to build sequences from
    fn select_entities<'b>(&self, batch: &'b TransactionBatch, rng: &mut ChaCha8Rng) -> Vec<&'b str> {
        let mut seen: FxHashMap<&str, ()> = FxHashMap::default();
        let mut unique: Vec<&str> = Vec::new();
        for t in batch.iter() {
            if seen.insert(t.name_orig.as_str(), ()).is_none() {
                unique.push(t.name_orig.as_str());
            }
        }

        if unique.len() > self.params.entity_threshold {
            let take = ((unique.len() as f64) * self.params.entity_sample_ratio) as usize;
            rand::seq::index::sample(rng, unique.len(), take.min(unique.len()))
                .into_iter()
                .map(|i| unique[i])
                .collect()
        } else {
            unique.truncate(self.params.first_entities);
            unique
        }
    }

    /// Flattened windows of `k` step-ordered records per entity
    pub fn build_windows(
        &self,
        batch: &TransactionBatch,
        k: usize,
        rng: &mut ChaCha8Rng,
    ) -> Vec<Vec<f64>> {
        let mut by_entity: FxHashMap<&str, Vec<&Transaction>> = FxHashMap::default();
        for t in batch.iter() {
            by_entity.entry(t.name_orig.as_str()).or_default().push(t);
        }

        let mut windows = Vec::new();
        for entity in self.select_entities(batch, rng) {
            let Some(records) = by_entity.get_mut(entity) else {
                continue;
            };
            if records.len() < k {
                continue;
            }
            records.sort_by(|a, b| a.step.partial_cmp(&b.step).unwrap_or(std::cmp::Ordering::Equal));

            let available = records.len() - k + 1;
            for start in 0..available.min(self.params.max_windows_per_entity) {
                let flat: Vec<f64> = records[start..start + k]
                    .iter()
                    .flat_map(|t| window_fields(t))
                    .collect();
                windows.push(flat);
                if windows.len() >= self.params.max_windows {
                    return windows;
                }
            }
        }
        windows
    }

    fn noise_fallback(&self, n: usize, rng: &mut ChaCha8Rng) -> DetectorResult {
        let scores: Vec<f64> = (0..n)
            .map(|_| rng.random::<f64>() * self.params.noise_scale)
            .collect();
        let threshold = percentile(&scores, self.params.anomaly_percentile);
        let anomalies = scores.iter().map(|&s| s > threshold).collect();
        DetectorResult::new(NAME, scores, anomalies, self.params.weight)
    }
}

impl Detector for SequenceDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Reconstruction error of per-origin transaction sequences"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Sequence
    }

    fn weight(&self) -> f64 {
        self.params.weight
    }

    fn budget(&self) -> Option<Duration> {
        Some(Duration::from_millis(self.params.budget_ms))
    }

    fn fit_score(&self, ctx: &DetectorContext<'_>) -> Result<DetectorResult, DetectorError> {
        let n = ctx.n_rows();
        if n <= self.params.min_rows {
            return Err(DetectorError::InsufficientRows {
                detector: NAME,
                required: self.params.min_rows,
                found: n,
            });
        }

        let mut rng = ctx.rng();
        let k = self.window_len(n);
        let windows = self.build_windows(ctx.batch, k, &mut rng);
        ctx.deadline.check()?;

        if windows.is_empty() {
            warn!(
                "{}: no origin has {} or more transactions, emitting noise scores",
                NAME, k
            );
            return Ok(self.noise_fallback(n, &mut rng));
        }

        let scaled = MinMaxScaler::fit(&windows).transform_all(&windows);
        let width = scaled[0].len();
        let schedule = TrainSchedule {
            epochs: if n > self.params.large_batch_rows {
                self.params.epochs_large
            } else {
                self.params.epochs_small
            },
            batch_size: self.params.batch_size,
            learning_rate: self.params.learning_rate,
        };
        let mut model = DenseAutoencoder::new(width, self.params.hidden, self.params.latent, &mut rng);
        model.fit(&scaled, schedule, &mut rng, &ctx.deadline)?;

        let window_scores: Vec<f64> = scaled.iter().map(|w| model.reconstruction_error(w)).collect();
        let threshold = percentile(&window_scores, self.params.anomaly_percentile);

        let m = window_scores.len();
        let factor = n / m;
        let scores = if factor > 1 {
            repeat_to(&window_scores, factor, n)
        } else {
            interpolate_to(&window_scores, n)
        };
        let anomalies = scores.iter().map(|&s| s > threshold).collect();
        debug!("{}: {} windows of length {} expanded to {} rows", NAME, m, k, scores.len());

        Ok(DetectorResult::new(NAME, scores, anomalies, self.params.weight))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::base::Deadline;
    use crate::features::build_matrix;
    use rand::SeedableRng;

    fn batch(n: usize, entities: usize) -> TransactionBatch {
        TransactionBatch::new(
            (0..n)
                .map(|i| Transaction {
                    step: (n - i) as f64,
                    kind: "TRANSFER".into(),
                    amount: 100.0 + (i % 17) as f64 * 10.0,
                    name_orig: format!("C{}", i % entities),
                    old_balance_orig: 1000.0 + i as f64,
                    new_balance_orig: 900.0,
                    name_dest: format!("M{i}"),
                    old_balance_dest: (i % 3) as f64,
                    new_balance_dest: 50.0,
                    ..Default::default()
                })
                .collect(),
        )
    }

    #[test]
    fn test_window_len() {
        let d = SequenceDetector::new(SequenceParams::default());
        assert_eq!(d.window_len(101), 2);
        assert_eq!(d.window_len(49), 1);
        assert_eq!(d.window_len(10_000), 3);
    }

    #[test]
    fn test_windows_respect_caps() {
        let d = SequenceDetector::new(SequenceParams::default());
        let b = batch(300, 10);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let windows = d.build_windows(&b, 3, &mut rng);
        // 10 entities x 5 windows
        assert_eq!(windows.len(), 50);
        assert!(windows.iter().all(|w| w.len() == 15));
    }

    #[test]
    fn test_short_entities_skipped() {
        let d = SequenceDetector::new(SequenceParams::default());
        let b = batch(40, 40);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(d.build_windows(&b, 2, &mut rng).is_empty());
    }

    fn run(b: &TransactionBatch) -> DetectorResult {
        let matrix = build_matrix(b);
        let ctx = DetectorContext {
            matrix: &matrix,
            batch: b,
            contamination: 0.1,
            seed: 42,
            deadline: Deadline::unbounded(NAME),
        };
        SequenceDetector::new(SequenceParams::default())
            .fit_score(&ctx)
            .unwrap()
    }

    #[test]
    fn test_scores_repeat_over_batch() {
        let b = batch(200, 10);
        let result = run(&b);
        // 200 rows / 50 windows => each window score repeated 4 times
        assert_eq!(result.len(), 200);
        assert_eq!(result.scores[0], result.scores[3]);
        assert!(result.is_finite());
    }

    #[test]
    fn test_noise_fallback_when_every_entity_is_unique() {
        let b = batch(150, 150);
        let result = run(&b);
        assert_eq!(result.len(), 150);
        assert!(result.scores.iter().all(|&s| (0.0..0.1).contains(&s)));
        assert_eq!(result.scores, run(&b).scores);
    }
}
