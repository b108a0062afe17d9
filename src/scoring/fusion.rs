//! Weighted fusion of detector and rule scores

use super::FusionConfig;
use crate::detectors::base::{Deadline, DetectorResult};
use crate::detectors::engine::panic_message;
use crate::detectors::isolation::forest_scores;
use crate::detectors::reconcile::reconcile;
use crate::error::DetectorError;
use crate::features::FeatureMatrix;
use crate::models::RiskLevel;
use crate::rules::RuleFlags;
use crate::stats::{mean, min_max_normalize, percentile};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// `model_details` key when the single fallback forest was used
pub const FALLBACK_DETECTOR_KEY: &str = "fallback_isolation_forest";
/// `model_details` key when scores are seeded random values
pub const RANDOM_FALLBACK_KEY: &str = "random_fallback";

/// Which path produced the ML component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionPath {
    Ensemble,
    FallbackDetector,
    RandomFallback,
}

impl FusionPath {
    pub fn is_fallback(&self) -> bool {
        !matches!(self, FusionPath::Ensemble)
    }
}

impl std::fmt::Display for FusionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FusionPath::Ensemble => write!(f, "ensemble"),
            FusionPath::FallbackDetector => write!(f, "{}", FALLBACK_DETECTOR_KEY),
            FusionPath::RandomFallback => write!(f, "{}", RANDOM_FALLBACK_KEY),
        }
    }
}

/// One detector's reconciled contribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDetail {
    pub scores: Vec<f64>,
    pub anomalies: Vec<bool>,
    pub weight: f64,
    pub execution_time_ms: u64,
}

impl ModelDetail {
    pub fn anomaly_count(&self) -> usize {
        self.anomalies.iter().filter(|&&a| a).count()
    }
}

/// Observability summary for one detector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelContribution {
    pub weight: f64,
    pub contribution_percentage: f64,
    pub anomaly_count: usize,
    pub mean_score: f64,
}

/// Row counts per risk band
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RiskDistribution {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

/// Fused per-row outputs for one batch
#[derive(Debug, Clone, PartialEq)]
pub struct FusedScores {
    /// Weighted ML score before normalization
    pub ml_scores: Vec<f64>,
    pub ml_anomalies: Vec<bool>,
    pub normalized_ml: Vec<f64>,
    /// Final fraud score in [0, 1]
    pub combined: Vec<f64>,
    pub suspicious: Vec<bool>,
    /// Percentile cut used for `suspicious`
    pub threshold: f64,
    pub model_details: BTreeMap<String, ModelDetail>,
    pub path: FusionPath,
}

impl FusedScores {
    pub fn len(&self) -> usize {
        self.combined.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combined.is_empty()
    }

    pub fn suspicious_count(&self) -> usize {
        self.suspicious.iter().filter(|&&s| s).count()
    }

    /// Per-detector weight share, anomaly count and mean score
    pub fn contributions(&self) -> BTreeMap<String, ModelContribution> {
        let total_weight: f64 = self.model_details.values().map(|d| d.weight).sum();
        self.model_details
            .iter()
            .map(|(name, detail)| {
                let share = if total_weight > 0.0 {
                    detail.weight / total_weight * 100.0
                } else {
                    0.0
                };
                (
                    name.clone(),
                    ModelContribution {
                        weight: detail.weight,
                        contribution_percentage: share,
                        anomaly_count: detail.anomaly_count(),
                        mean_score: mean(&detail.scores),
                    },
                )
            })
            .collect()
    }

    pub fn risk_levels(&self) -> Vec<RiskLevel> {
        self.combined.iter().map(|&s| RiskLevel::from_score(s)).collect()
    }

    pub fn risk_distribution(&self) -> RiskDistribution {
        let mut dist = RiskDistribution::default();
        for level in self.risk_levels() {
            match level {
                RiskLevel::High => dist.high += 1,
                RiskLevel::Medium => dist.medium += 1,
                RiskLevel::Low => dist.low += 1,
            }
        }
        dist
    }
}

/// Combines detector results and rule scores
#[derive(Debug, Clone)]
pub struct ScoreFusion {
    config: FusionConfig,
    seed: u64,
}

impl ScoreFusion {
    pub fn new(config: FusionConfig, seed: u64) -> Self {
        Self { config, seed }
    }

    /// Fuse successful detector outputs with the rule score
    ///
    /// `results` may be empty; the fallback paths then supply the ML
    /// component. The output always has one entry per matrix row.
    pub fn fuse(
        &self,
        results: &[DetectorResult],
        rules: &RuleFlags,
        matrix: &FeatureMatrix,
        contamination: f64,
    ) -> FusedScores {
        let n = matrix.nrows();
        let usable: Vec<&DetectorResult> = results.iter().filter(|r| !r.is_empty()).collect();

        let (ml_scores, ml_anomalies, model_details, path) = if usable.is_empty() {
            self.fallback(matrix, contamination)
        } else {
            self.weighted_ensemble(&usable, n)
        };

        let normalized_ml = min_max_normalize(&ml_scores, self.config.normalization_eps);

        let rule_scores = if rules.len() == n {
            rules.scores().to_vec()
        } else {
            warn!(
                "Rule scores cover {} of {} rows, reconciling",
                rules.len(),
                n
            );
            reconcile(rules.scores(), n)
        };

        let combined: Vec<f64> = normalized_ml
            .iter()
            .zip(&rule_scores)
            .map(|(ml, rule)| {
                (self.config.ml_weight * ml + self.config.rule_weight * rule).clamp(0.0, 1.0)
            })
            .collect();

        let threshold = percentile(&combined, self.config.suspicious_percentile);
        let suspicious: Vec<bool> = combined.iter().map(|&c| c > threshold).collect();

        info!(
            "Fusion ({}) flagged {} of {} rows above {:.4}",
            path,
            suspicious.iter().filter(|&&s| s).count(),
            n,
            threshold
        );

        FusedScores {
            ml_scores,
            ml_anomalies,
            normalized_ml,
            combined,
            suspicious,
            threshold,
            model_details,
            path,
        }
    }

    fn weighted_ensemble(
        &self,
        usable: &[&DetectorResult],
        n: usize,
    ) -> (Vec<f64>, Vec<bool>, BTreeMap<String, ModelDetail>, FusionPath) {
        // Truncate to the shortest output, then mean-pad back to the batch
        let common = usable.iter().map(|r| r.len()).min().unwrap_or(0);
        let aligned: Vec<DetectorResult> = usable
            .iter()
            .map(|r| {
                let mut r = (*r).clone();
                r.scores.truncate(common);
                r.anomalies.truncate(common);
                r.reconciled(n)
            })
            .collect();

        let total_weight: f64 = aligned.iter().map(|r| r.weight.max(0.0)).sum();
        let weights: Vec<f64> = if total_weight > 0.0 {
            aligned.iter().map(|r| r.weight.max(0.0) / total_weight).collect()
        } else {
            vec![1.0 / aligned.len() as f64; aligned.len()]
        };

        let ml_scores: Vec<f64> = (0..n)
            .map(|i| aligned.iter().zip(&weights).map(|(r, w)| w * r.scores[i]).sum())
            .collect();
        let ml_anomalies: Vec<bool> = (0..n)
            .map(|i| {
                let votes = aligned.iter().filter(|r| r.anomalies[i]).count();
                votes as f64 / aligned.len() as f64 > 0.5
            })
            .collect();

        let model_details = aligned
            .into_iter()
            .map(|r| {
                (
                    r.detector_name,
                    ModelDetail {
                        scores: r.scores,
                        anomalies: r.anomalies,
                        weight: r.weight,
                        execution_time_ms: r.duration_ms,
                    },
                )
            })
            .collect();

        debug!("Weighted {} detectors with normalized weights {:?}", weights.len(), weights);
        (ml_scores, ml_anomalies, model_details, FusionPath::Ensemble)
    }

    fn fallback(
        &self,
        matrix: &FeatureMatrix,
        contamination: f64,
    ) -> (Vec<f64>, Vec<bool>, BTreeMap<String, ModelDetail>, FusionPath) {
        let n = matrix.nrows();
        let start = Instant::now();
        let deadline = Deadline::new(
            FALLBACK_DETECTOR_KEY,
            Some(Duration::from_millis(self.config.fallback_budget_ms)),
        );
        warn!("No detector produced usable output, fitting fallback isolation forest");

        let rows = matrix.to_rows();
        let fitted = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            forest_scores(
                &rows,
                self.config.fallback_n_estimators,
                contamination,
                self.seed,
                &deadline,
            )
        }))
        .unwrap_or_else(|panic_info| {
            Err(DetectorError::Panicked {
                detector: FALLBACK_DETECTOR_KEY.to_string(),
                message: panic_message(panic_info.as_ref()),
            })
        })
        .and_then(|(scores, anomalies)| {
            if scores.iter().all(|s| s.is_finite()) {
                Ok((scores, anomalies))
            } else {
                Err(DetectorError::NonFinite {
                    detector: FALLBACK_DETECTOR_KEY,
                })
            }
        });

        let mut details = BTreeMap::new();
        match fitted {
            Ok((scores, anomalies)) => {
                details.insert(
                    FALLBACK_DETECTOR_KEY.to_string(),
                    ModelDetail {
                        scores: scores.clone(),
                        anomalies: anomalies.clone(),
                        weight: 1.0,
                        execution_time_ms: start.elapsed().as_millis() as u64,
                    },
                );
                (scores, anomalies, details, FusionPath::FallbackDetector)
            }
            Err(e) => {
                warn!("Fallback detector failed ({}), using random scores", e);
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
                let scores: Vec<f64> = (0..n).map(|_| rng.random::<f64>()).collect();
                let anomalies: Vec<bool> = scores.iter().map(|&s| s > 0.5).collect();
                details.insert(
                    RANDOM_FALLBACK_KEY.to_string(),
                    ModelDetail {
                        scores: scores.clone(),
                        anomalies: anomalies.clone(),
                        weight: 1.0,
                        execution_time_ms: 0,
                    },
                );
                (scores, anomalies, details, FusionPath::RandomFallback)
            }
        }
    }
}
