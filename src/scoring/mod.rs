//! Ensemble score fusion
//!
//! This module combines detector outputs and the rule score into one fraud
//! score per transaction, and flags the batch's top tail as suspicious.
//!
//! # Scoring Formula
//!
//! ```text
//! ml         = Σ (wᵢ / Σw) × scoreᵢ            (reconciled detector scores)
//! normalized = (ml - min) / (max - min + 1e-8)
//! combined   = clamp(0.7 × normalized + 0.3 × rule_score, 0, 1)
//! suspicious = combined > p95(combined)
//! ```
//!
//! # Degradation
//!
//! - No usable detector output: a single isolation forest is fitted on the
//!   full matrix (`fallback_isolation_forest`)
//! - That fails too: seeded uniform scores (`random_fallback`)
//!
//! Every row always receives a score.

mod fusion;

pub use fusion::{
    FusedScores, FusionPath, ModelContribution, ModelDetail, RiskDistribution, ScoreFusion,
    FALLBACK_DETECTOR_KEY, RANDOM_FALLBACK_KEY,
};

use serde::{Deserialize, Serialize};

/// Fusion weights and thresholds, read from `[fusion]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FusionConfig {
    #[serde(default = "default_ml_weight")]
    pub ml_weight: f64,
    #[serde(default = "default_rule_weight")]
    pub rule_weight: f64,
    #[serde(default = "default_suspicious_percentile")]
    pub suspicious_percentile: f64,
    #[serde(default = "default_normalization_eps")]
    pub normalization_eps: f64,
    /// Trees in the single fallback forest
    #[serde(default = "default_fallback_n_estimators")]
    pub fallback_n_estimators: usize,
    #[serde(default = "default_fallback_budget_ms")]
    pub fallback_budget_ms: u64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            ml_weight: default_ml_weight(),
            rule_weight: default_rule_weight(),
            suspicious_percentile: default_suspicious_percentile(),
            normalization_eps: default_normalization_eps(),
            fallback_n_estimators: default_fallback_n_estimators(),
            fallback_budget_ms: default_fallback_budget_ms(),
        }
    }
}

fn default_ml_weight() -> f64 {
    0.7
}
fn default_rule_weight() -> f64 {
    0.3
}
fn default_suspicious_percentile() -> f64 {
    95.0
}
fn default_normalization_eps() -> f64 {
    1e-8
}
fn default_fallback_n_estimators() -> usize {
    30
}
fn default_fallback_budget_ms() -> u64 {
    30_000
}
