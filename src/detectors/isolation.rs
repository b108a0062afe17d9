//! Isolation forest + local outlier factor
//!
//! Both estimators vote {+1 normal, -1 anomaly} and the votes are averaged.
//! The row score is the negated average, so higher means more anomalous, and
//! a row is an anomaly when the average is negative.
//!
//! Cost control: the forest sees at most `sample_limit` rows and LOF at most
//! `lof_sample_limit` rows of that sample. Rows LOF never saw vote 0. The
//! sample's scores are tiled back over the full batch.

use crate::detectors::base::{Deadline, Detector, DetectorContext, DetectorResult};
use crate::detectors::reconcile::tile_to;
use crate::detectors::registry::DetectorKind;
use crate::error::DetectorError;
use crate::stats::percentile;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const NAME: &str = "isolation_forest";
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Hyperparameters for the isolation + LOF technique
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IsolationParams {
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_budget_ms")]
    pub budget_ms: u64,
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,
    /// Rows drawn per tree
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    /// Rows the forest is fitted on
    #[serde(default = "default_sample_limit")]
    pub sample_limit: usize,
    #[serde(default = "default_lof_neighbors")]
    pub lof_neighbors: usize,
    #[serde(default = "default_lof_sample_limit")]
    pub lof_sample_limit: usize,
}

impl Default for IsolationParams {
    fn default() -> Self {
        Self {
            weight: default_weight(),
            budget_ms: default_budget_ms(),
            n_estimators: default_n_estimators(),
            max_samples: default_max_samples(),
            sample_limit: default_sample_limit(),
            lof_neighbors: default_lof_neighbors(),
            lof_sample_limit: default_lof_sample_limit(),
        }
    }
}

fn default_weight() -> f64 {
    0.4
}
pub(crate) fn default_budget_ms() -> u64 {
    30_000
}
fn default_n_estimators() -> usize {
    30
}
fn default_max_samples() -> usize {
    256
}
fn default_sample_limit() -> usize {
    5_000
}
fn default_lof_neighbors() -> usize {
    5
}
fn default_lof_sample_limit() -> usize {
    1_000
}

/// Average path length of an unsuccessful BST search over `n` points
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn path_length(&self, row: &[f64], depth: usize) -> f64 {
        match self {
            Node::Leaf { size } => depth as f64 + average_path_length(*size),
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if row[*feature] < *threshold {
                    left.path_length(row, depth + 1)
                } else {
                    right.path_length(row, depth + 1)
                }
            }
        }
    }
}

fn build_tree(
    rows: &[Vec<f64>],
    indices: Vec<usize>,
    depth: usize,
    max_depth: usize,
    rng: &mut ChaCha8Rng,
) -> Node {
    if depth >= max_depth || indices.len() <= 1 {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    let width = rows[indices[0]].len();
    let mut features: Vec<usize> = (0..width).collect();
    features.shuffle(rng);

    // First feature (in random order) that still varies within this node
    let split = features.into_iter().find_map(|f| {
        let (lo, hi) = indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
            (lo.min(rows[i][f]), hi.max(rows[i][f]))
        });
        (lo < hi).then_some((f, lo, hi))
    });

    let Some((feature, lo, hi)) = split else {
        return Node::Leaf {
            size: indices.len(),
        };
    };

    // Spreads wider than f64::MAX are drawn on halved bounds
    let threshold = if (hi - lo).is_finite() {
        rng.random_range(lo..hi)
    } else {
        (lo + rng.random::<f64>() * (hi / 2.0 - lo / 2.0) * 2.0).clamp(lo, hi)
    };
    let (left, right): (Vec<usize>, Vec<usize>) =
        indices.into_iter().partition(|&i| rows[i][feature] < threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(build_tree(rows, left, depth + 1, max_depth, rng)),
        right: Box::new(build_tree(rows, right, depth + 1, max_depth, rng)),
    }
}

/// Isolation forest estimator
///
/// Votes follow the usual convention: the offset is the `contamination`
/// percentile of training scores and rows scoring below it are anomalies.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    n_estimators: usize,
    max_samples: usize,
    contamination: f64,
    random_state: u64,
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self::new()
    }
}

impl IsolationForest {
    pub fn new() -> Self {
        Self {
            n_estimators: default_n_estimators(),
            max_samples: default_max_samples(),
            contamination: 0.1,
            random_state: 42,
        }
    }

    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n.max(1);
        self
    }

    pub fn with_max_samples(mut self, n: usize) -> Self {
        self.max_samples = n.max(2);
        self
    }

    pub fn with_contamination(mut self, contamination: f64) -> Self {
        self.contamination = contamination;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn fit(&self, rows: &[Vec<f64>], deadline: &Deadline) -> Result<FittedForest, DetectorError> {
        if rows.is_empty() {
            return Err(DetectorError::Failed {
                detector: NAME,
                message: "cannot fit on zero rows".into(),
            });
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.random_state);
        let sample_size = self.max_samples.min(rows.len());
        let max_depth = (sample_size.max(2) as f64).log2().ceil() as usize;

        let mut trees = Vec::with_capacity(self.n_estimators);
        for _ in 0..self.n_estimators {
            deadline.check()?;
            let indices = rand::seq::index::sample(&mut rng, rows.len(), sample_size).into_vec();
            trees.push(build_tree(rows, indices, 0, max_depth, &mut rng));
        }

        let mut forest = FittedForest {
            trees,
            sample_size,
            offset: 0.0,
        };
        let training_scores = forest.score_samples(rows);
        forest.offset = percentile(&training_scores, 100.0 * self.contamination);
        Ok(forest)
    }
}

/// A fitted forest and its contamination offset
#[derive(Debug, Clone)]
pub struct FittedForest {
    trees: Vec<Node>,
    sample_size: usize,
    offset: f64,
}

impl FittedForest {
    /// Negated anomaly score in [-1, 0); lower = more anomalous
    pub fn score_samples(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        let norm = average_path_length(self.sample_size).max(f64::EPSILON);
        rows.iter()
            .map(|row| {
                let mean_depth = self
                    .trees
                    .iter()
                    .map(|t| t.path_length(row, 0))
                    .sum::<f64>()
                    / self.trees.len() as f64;
                -(2f64.powf(-mean_depth / norm))
            })
            .collect()
    }

    /// Score shifted by the offset; negative means anomaly
    pub fn decision_function(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        self.score_samples(rows)
            .into_iter()
            .map(|s| s - self.offset)
            .collect()
    }

    /// +1 normal, -1 anomaly
    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<i8> {
        self.decision_function(rows)
            .into_iter()
            .map(|d| if d < 0.0 { -1 } else { 1 })
            .collect()
    }
}

/// Local outlier factor estimator, fit and predicted on the same rows
#[derive(Debug, Clone)]
pub struct LocalOutlierFactor {
    n_neighbors: usize,
    contamination: f64,
}

/// LOF output for the fitted rows
#[derive(Debug, Clone, PartialEq)]
pub struct LofFit {
    /// Negated outlier factor; lower = more anomalous
    pub negative_outlier_factor: Vec<f64>,
    /// +1 normal, -1 anomaly
    pub labels: Vec<i8>,
}

impl LocalOutlierFactor {
    pub fn new(n_neighbors: usize, contamination: f64) -> Self {
        Self {
            n_neighbors,
            contamination,
        }
    }

    pub fn fit_predict(&self, rows: &[Vec<f64>], deadline: &Deadline) -> Result<LofFit, DetectorError> {
        let n = rows.len();
        let k = self.n_neighbors.min(n.saturating_sub(1));
        if k == 0 {
            return Ok(LofFit {
                negative_outlier_factor: vec![-1.0; n],
                labels: vec![1; n],
            });
        }

        // k nearest neighbours of each row, self excluded
        let mut neighbors: Vec<Vec<(usize, f64)>> = Vec::with_capacity(n);
        for (i, row) in rows.iter().enumerate() {
            deadline.check()?;
            let mut dists: Vec<(usize, f64)> = rows
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(j, other)| (j, euclidean(row, other)))
                .collect();
            dists.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            dists.truncate(k);
            neighbors.push(dists);
        }

        let k_distance: Vec<f64> = neighbors.iter().map(|nb| nb[k - 1].1).collect();
        let lrd: Vec<f64> = neighbors
            .iter()
            .map(|nb| {
                let reach = nb
                    .iter()
                    .map(|&(j, d)| d.max(k_distance[j]))
                    .sum::<f64>()
                    / k as f64;
                1.0 / (reach + 1e-10)
            })
            .collect();

        let negative_outlier_factor: Vec<f64> = neighbors
            .iter()
            .enumerate()
            .map(|(i, nb)| {
                let ratio = nb.iter().map(|&(j, _)| lrd[j]).sum::<f64>() / k as f64 / lrd[i];
                -ratio
            })
            .collect();

        let offset = percentile(&negative_outlier_factor, 100.0 * self.contamination);
        let labels = negative_outlier_factor
            .iter()
            .map(|&v| if v < offset { -1 } else { 1 })
            .collect();

        Ok(LofFit {
            negative_outlier_factor,
            labels,
        })
    }
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Single-forest scoring over every row, used when the ensemble is empty
///
/// Returns `(scores, anomalies)` with scores = negated decision function.
pub fn forest_scores(
    rows: &[Vec<f64>],
    n_estimators: usize,
    contamination: f64,
    seed: u64,
    deadline: &Deadline,
) -> Result<(Vec<f64>, Vec<bool>), DetectorError> {
    let forest = IsolationForest::new()
        .with_n_estimators(n_estimators)
        .with_contamination(contamination)
        .with_random_state(seed)
        .fit(rows, deadline)?;
    let decision = forest.decision_function(rows);
    let anomalies = decision.iter().map(|&d| d < 0.0).collect();
    let scores = decision.into_iter().map(|d| -d).collect();
    Ok((scores, anomalies))
}

/// Ensemble member combining the forest and LOF votes
pub struct IsolationLofDetector {
    params: IsolationParams,
}

impl IsolationLofDetector {
    pub fn new(params: IsolationParams) -> Self {
        Self { params }
    }
}

impl Detector for IsolationLofDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Isolation forest and local outlier factor votes, averaged"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::IsolationForest
    }

    fn weight(&self) -> f64 {
        self.params.weight
    }

    fn budget(&self) -> Option<Duration> {
        Some(Duration::from_millis(self.params.budget_ms))
    }

    fn fit_score(&self, ctx: &DetectorContext<'_>) -> Result<DetectorResult, DetectorError> {
        let n = ctx.n_rows();
        let mut rng = ctx.rng();

        let sample_idx: Vec<usize> = if n > self.params.sample_limit {
            let mut idx =
                rand::seq::index::sample(&mut rng, n, self.params.sample_limit).into_vec();
            idx.sort_unstable();
            idx
        } else {
            (0..n).collect()
        };
        let sample = ctx.matrix.select_rows(&sample_idx).to_rows();
        let m = sample.len();

        let forest = IsolationForest::new()
            .with_n_estimators(self.params.n_estimators)
            .with_max_samples(self.params.max_samples)
            .with_contamination(ctx.contamination)
            .with_random_state(ctx.seed)
            .fit(&sample, &ctx.deadline)?;
        let iso_votes = forest.predict(&sample);
        ctx.deadline.check()?;

        let lof = LocalOutlierFactor::new(self.params.lof_neighbors, ctx.contamination);
        let mut lof_votes = vec![0i8; m];
        if m > self.params.lof_sample_limit {
            let lof_idx =
                rand::seq::index::sample(&mut rng, m, self.params.lof_sample_limit).into_vec();
            let lof_rows: Vec<Vec<f64>> = lof_idx.iter().map(|&i| sample[i].clone()).collect();
            let fit = lof.fit_predict(&lof_rows, &ctx.deadline)?;
            for (&i, &label) in lof_idx.iter().zip(&fit.labels) {
                lof_votes[i] = label;
            }
        } else {
            lof_votes = lof.fit_predict(&sample, &ctx.deadline)?.labels;
        }

        let combined: Vec<f64> = iso_votes
            .iter()
            .zip(&lof_votes)
            .map(|(&a, &b)| (a as f64 + b as f64) / 2.0)
            .collect();
        let mut scores: Vec<f64> = combined.iter().map(|c| -c).collect();
        let mut anomalies: Vec<bool> = combined.iter().map(|&c| c < 0.0).collect();

        if m < n {
            debug!("{}: tiling {} sampled scores over {} rows", NAME, m, n);
            scores = tile_to(&scores, n);
            anomalies = tile_to(&anomalies, n);
        }

        Ok(DetectorResult::new(NAME, scores, anomalies, self.params.weight))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureMatrix;
    use crate::models::TransactionBatch;

    fn clustered_rows(n: usize) -> Vec<Vec<f64>> {
        let mut rows: Vec<Vec<f64>> = (0..n)
            .map(|i| vec![1.0 + (i % 7) as f64 * 0.01, 2.0 + (i % 5) as f64 * 0.01])
            .collect();
        rows.push(vec![50.0, -40.0]);
        rows
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!(average_path_length(256) > 9.0 && average_path_length(256) < 11.0);
    }

    #[test]
    fn test_forest_isolates_outlier() {
        let rows = clustered_rows(60);
        let forest = IsolationForest::new()
            .with_n_estimators(50)
            .with_contamination(0.05)
            .with_random_state(7)
            .fit(&rows, &Deadline::unbounded("test"))
            .unwrap();
        let scores = forest.score_samples(&rows);
        let outlier = scores[rows.len() - 1];
        assert!(scores[..rows.len() - 1].iter().all(|&s| s > outlier));
        assert_eq!(forest.predict(&rows)[rows.len() - 1], -1);
    }

    #[test]
    fn test_forest_is_seeded() {
        let rows = clustered_rows(30);
        let fit = |seed| {
            IsolationForest::new()
                .with_random_state(seed)
                .fit(&rows, &Deadline::unbounded("test"))
                .unwrap()
                .score_samples(&rows)
        };
        assert_eq!(fit(3), fit(3));
    }

    #[test]
    fn test_lof_flags_outlier() {
        let rows = clustered_rows(40);
        let fit = LocalOutlierFactor::new(5, 0.05)
            .fit_predict(&rows, &Deadline::unbounded("test"))
            .unwrap();
        assert_eq!(fit.labels[rows.len() - 1], -1);
        let min = fit
            .negative_outlier_factor
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min);
        assert_eq!(min, fit.negative_outlier_factor[rows.len() - 1]);
    }

    #[test]
    fn test_forest_splits_spread_wider_than_f64_max() {
        let mut rows = clustered_rows(20);
        rows.push(vec![-1.7e308, 0.0]);
        rows.push(vec![1.7e308, 0.0]);
        let forest = IsolationForest::new()
            .with_random_state(11)
            .fit(&rows, &Deadline::unbounded("test"))
            .unwrap();
        assert!(forest.score_samples(&rows).iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_zero_budget_fails_fit() {
        let rows = clustered_rows(10);
        let result = IsolationForest::new().fit(&rows, &Deadline::new(NAME, Some(Duration::ZERO)));
        assert!(matches!(result, Err(DetectorError::BudgetExceeded { .. })));
    }

    #[test]
    fn test_detector_tiles_sample_to_full_length() {
        let rows = clustered_rows(99);
        let matrix = FeatureMatrix::from_rows(&rows, vec!["a".into(), "b".into()]);
        let batch = TransactionBatch::default();
        let params = IsolationParams {
            sample_limit: 40,
            lof_sample_limit: 20,
            ..IsolationParams::default()
        };
        let ctx = DetectorContext {
            matrix: &matrix,
            batch: &batch,
            contamination: 0.1,
            seed: 42,
            deadline: Deadline::unbounded(NAME),
        };
        let result = IsolationLofDetector::new(params).fit_score(&ctx).unwrap();
        assert_eq!(result.len(), 100);
        assert_eq!(result.anomalies.len(), 100);
        // tiled with period 40
        assert_eq!(result.scores[0], result.scores[40]);
        assert!(result
            .scores
            .iter()
            .all(|s| [-1.0, -0.5, 0.0, 0.5, 1.0].contains(s)));
        for (s, a) in result.scores.iter().zip(&result.anomalies) {
            assert_eq!(*a, *s > 0.0);
        }
    }
}
