//! Dense autoencoder scoring
//!
//! Pure-Rust fully connected autoencoder trained with mini-batch SGD on
//! min-max scaled features. A row's score is its mean squared
//! reconstruction error.
//!
//! Architecture: d → hidden → latent → hidden → d, ReLU inside, sigmoid out.

use crate::detectors::base::{Deadline, Detector, DetectorContext, DetectorResult};
use crate::detectors::registry::DetectorKind;
use crate::error::DetectorError;
use crate::features::MinMaxScaler;
use crate::stats::percentile;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const NAME: &str = "autoencoder";

/// Hyperparameters for the reconstruction-error technique
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoencoderParams {
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "super::isolation::default_budget_ms")]
    pub budget_ms: u64,
    /// Batches must have more rows than this
    #[serde(default = "default_min_rows")]
    pub min_rows: usize,
    #[serde(default = "default_hidden")]
    pub hidden: usize,
    #[serde(default = "default_latent")]
    pub latent: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_train_sample_limit")]
    pub train_sample_limit: usize,
    #[serde(default = "default_epochs_large")]
    pub epochs_large: usize,
    #[serde(default = "default_epochs_small")]
    pub epochs_small: usize,
    /// Batches above this many rows train for `epochs_large`
    #[serde(default = "default_large_batch_rows")]
    pub large_batch_rows: usize,
    #[serde(default = "default_anomaly_percentile")]
    pub anomaly_percentile: f64,
}

impl Default for AutoencoderParams {
    fn default() -> Self {
        Self {
            weight: default_weight(),
            budget_ms: super::isolation::default_budget_ms(),
            min_rows: default_min_rows(),
            hidden: default_hidden(),
            latent: default_latent(),
            learning_rate: default_learning_rate(),
            batch_size: default_batch_size(),
            train_sample_limit: default_train_sample_limit(),
            epochs_large: default_epochs_large(),
            epochs_small: default_epochs_small(),
            large_batch_rows: default_large_batch_rows(),
            anomaly_percentile: default_anomaly_percentile(),
        }
    }
}

fn default_weight() -> f64 {
    0.3
}
fn default_min_rows() -> usize {
    50
}
pub(crate) fn default_hidden() -> usize {
    16
}
pub(crate) fn default_latent() -> usize {
    8
}
pub(crate) fn default_learning_rate() -> f64 {
    0.01
}
pub(crate) fn default_batch_size() -> usize {
    128
}
fn default_train_sample_limit() -> usize {
    10_000
}
fn default_epochs_large() -> usize {
    10
}
pub(crate) fn default_epochs_small() -> usize {
    5
}
pub(crate) fn default_large_batch_rows() -> usize {
    1_000
}
pub(crate) fn default_anomaly_percentile() -> f64 {
    95.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Activation {
    Relu,
    Sigmoid,
}

impl Activation {
    fn apply(self, z: f64) -> f64 {
        match self {
            Activation::Relu => z.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + (-z).exp()),
        }
    }

    /// Derivative expressed through the activation output
    fn derivative(self, a: f64) -> f64 {
        match self {
            Activation::Relu => {
                if a > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Sigmoid => a * (1.0 - a),
        }
    }
}

#[derive(Debug, Clone)]
struct DenseLayer {
    /// [out x in]
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
    activation: Activation,
}

impl DenseLayer {
    fn new(input: usize, output: usize, activation: Activation, rng: &mut ChaCha8Rng) -> Self {
        // Xavier uniform
        let limit = (6.0 / (input + output) as f64).sqrt();
        let weights = (0..output)
            .map(|_| (0..input).map(|_| rng.random_range(-limit..limit)).collect())
            .collect();
        Self {
            weights,
            bias: vec![0.0; output],
            activation,
        }
    }

    fn forward(&self, x: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(w, b)| {
                let z = w.iter().zip(x).map(|(wi, xi)| wi * xi).sum::<f64>() + b;
                self.activation.apply(z)
            })
            .collect()
    }
}

/// Training schedule for [`DenseAutoencoder::fit`]
#[derive(Debug, Clone, Copy)]
pub struct TrainSchedule {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
}

/// Fully connected autoencoder
#[derive(Debug, Clone)]
pub struct DenseAutoencoder {
    layers: Vec<DenseLayer>,
}

impl DenseAutoencoder {
    pub fn new(input: usize, hidden: usize, latent: usize, rng: &mut ChaCha8Rng) -> Self {
        let sizes = [input, hidden, latent, hidden, input];
        let layers = sizes
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                let activation = if i == sizes.len() - 2 {
                    Activation::Sigmoid
                } else {
                    Activation::Relu
                };
                DenseLayer::new(pair[0], pair[1], activation, rng)
            })
            .collect();
        Self { layers }
    }

    /// Activations of every layer, input first
    fn forward_all(&self, x: &[f64]) -> Vec<Vec<f64>> {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(x.to_vec());
        for layer in &self.layers {
            let next = layer.forward(activations.last().map(Vec::as_slice).unwrap_or(&[]));
            activations.push(next);
        }
        activations
    }

    pub fn reconstruct(&self, x: &[f64]) -> Vec<f64> {
        self.forward_all(x).pop().unwrap_or_default()
    }

    /// Mean squared reconstruction error of one row
    pub fn reconstruction_error(&self, x: &[f64]) -> f64 {
        let out = self.reconstruct(x);
        if x.is_empty() {
            return 0.0;
        }
        out.iter().zip(x).map(|(y, t)| (y - t).powi(2)).sum::<f64>() / x.len() as f64
    }

    /// One SGD step on a mini-batch; returns the batch's mean loss
    pub fn train_batch(&mut self, batch: &[&[f64]], learning_rate: f64) -> f64 {
        if batch.is_empty() {
            return 0.0;
        }
        let mut grad_w: Vec<Vec<Vec<f64>>> = self
            .layers
            .iter()
            .map(|l| vec![vec![0.0; l.weights.first().map(Vec::len).unwrap_or(0)]; l.weights.len()])
            .collect();
        let mut grad_b: Vec<Vec<f64>> = self.layers.iter().map(|l| vec![0.0; l.bias.len()]).collect();
        let mut total_loss = 0.0;

        for &x in batch {
            let acts = self.forward_all(x);
            let output = &acts[acts.len() - 1];
            let d = x.len().max(1) as f64;
            total_loss += output.iter().zip(x).map(|(y, t)| (y - t).powi(2)).sum::<f64>() / d;

            // dL/dy for MSE
            let mut delta: Vec<f64> = output
                .iter()
                .zip(x)
                .map(|(y, t)| 2.0 * (y - t) / d)
                .collect();

            for li in (0..self.layers.len()).rev() {
                let layer = &self.layers[li];
                let out = &acts[li + 1];
                let input = &acts[li];
                for (o, dl) in delta.iter_mut().enumerate() {
                    *dl *= layer.activation.derivative(out[o]);
                }
                for (o, &dl) in delta.iter().enumerate() {
                    grad_b[li][o] += dl;
                    for (i, &a) in input.iter().enumerate() {
                        grad_w[li][o][i] += dl * a;
                    }
                }
                if li > 0 {
                    delta = (0..input.len())
                        .map(|i| {
                            layer
                                .weights
                                .iter()
                                .zip(&delta)
                                .map(|(w, dl)| w[i] * dl)
                                .sum()
                        })
                        .collect();
                }
            }
        }

        let scale = learning_rate / batch.len() as f64;
        for (li, layer) in self.layers.iter_mut().enumerate() {
            for (o, row) in layer.weights.iter_mut().enumerate() {
                for (i, w) in row.iter_mut().enumerate() {
                    *w -= scale * grad_w[li][o][i];
                }
                layer.bias[o] -= scale * grad_b[li][o];
            }
        }

        total_loss / batch.len() as f64
    }

    /// Train for the scheduled epochs, reshuffling each epoch
    ///
    /// Returns the mean loss of every epoch.
    pub fn fit(
        &mut self,
        rows: &[Vec<f64>],
        schedule: TrainSchedule,
        rng: &mut ChaCha8Rng,
        deadline: &Deadline,
    ) -> Result<Vec<f64>, DetectorError> {
        let mut order: Vec<usize> = (0..rows.len()).collect();
        let batch_size = schedule.batch_size.max(1);
        let mut history = Vec::with_capacity(schedule.epochs);

        for _ in 0..schedule.epochs {
            order.shuffle(rng);
            let mut epoch_loss = 0.0;
            let mut batches = 0;
            for chunk in order.chunks(batch_size) {
                deadline.check()?;
                let batch: Vec<&[f64]> = chunk.iter().map(|&i| rows[i].as_slice()).collect();
                epoch_loss += self.train_batch(&batch, schedule.learning_rate);
                batches += 1;
            }
            history.push(epoch_loss / batches.max(1) as f64);
        }
        Ok(history)
    }
}

/// Ensemble member scoring rows by reconstruction error
pub struct AutoencoderDetector {
    params: AutoencoderParams,
}

impl AutoencoderDetector {
    pub fn new(params: AutoencoderParams) -> Self {
        Self { params }
    }
}

impl Detector for AutoencoderDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Dense autoencoder reconstruction error"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Autoencoder
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

        let rows = ctx.matrix.to_rows();
        let scaled = MinMaxScaler::fit(&rows).transform_all(&rows);
        let mut rng = ctx.rng();

        let training: Vec<Vec<f64>> = if n > self.params.train_sample_limit {
            rand::seq::index::sample(&mut rng, n, self.params.train_sample_limit)
                .into_iter()
                .map(|i| scaled[i].clone())
                .collect()
        } else {
            scaled.clone()
        };

        let schedule = TrainSchedule {
            epochs: if n > self.params.large_batch_rows {
                self.params.epochs_large
            } else {
                self.params.epochs_small
            },
            batch_size: self.params.batch_size,
            learning_rate: self.params.learning_rate,
        };

        let mut model =
            DenseAutoencoder::new(ctx.matrix.ncols(), self.params.hidden, self.params.latent, &mut rng);
        let history = model.fit(&training, schedule, &mut rng, &ctx.deadline)?;
        debug!(
            "{}: trained {} epochs on {} rows, final loss {:.6}",
            NAME,
            history.len(),
            training.len(),
            history.last().copied().unwrap_or(0.0)
        );

        let scores: Vec<f64> = scaled.iter().map(|r| model.reconstruction_error(r)).collect();
        let threshold = percentile(&scores, self.params.anomaly_percentile);
        let anomalies = scores.iter().map(|&s| s > threshold).collect();

        Ok(DetectorResult::new(NAME, scores, anomalies, self.params.weight))
    }
}
