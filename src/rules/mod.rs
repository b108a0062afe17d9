//! Deterministic fraud rules
//!
//! Six independent boolean signals per transaction. Their row-wise mean is
//! the rule score blended into the final fraud score. Rules are advisory:
//! when evaluation fails the evaluator logs a warning and returns all-zero
//! flags instead of propagating the error.

use crate::models::TransactionBatch;
use crate::stats::{mean, percentile};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

/// One deterministic rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    LargeAmount,
    NewDestination,
    BalanceDepletion,
    UnusualTime,
    VelocitySpike,
    RoundAmount,
}

impl RuleKind {
    pub const ALL: [RuleKind; 6] = [
        RuleKind::LargeAmount,
        RuleKind::NewDestination,
        RuleKind::BalanceDepletion,
        RuleKind::UnusualTime,
        RuleKind::VelocitySpike,
        RuleKind::RoundAmount,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Column name used in tabular output
    pub fn column_name(self) -> &'static str {
        match self {
            RuleKind::LargeAmount => "rule_large_amount",
            RuleKind::NewDestination => "rule_new_destination",
            RuleKind::BalanceDepletion => "rule_balance_depletion",
            RuleKind::UnusualTime => "rule_unusual_time",
            RuleKind::VelocitySpike => "rule_velocity_spike",
            RuleKind::RoundAmount => "rule_round_amount",
        }
    }

    /// Phrase used in per-row explanations
    pub fn label(self) -> &'static str {
        match self {
            RuleKind::LargeAmount => "large amount",
            RuleKind::NewDestination => "new destination account",
            RuleKind::BalanceDepletion => "balance depletion",
            RuleKind::UnusualTime => "unusual hour",
            RuleKind::VelocitySpike => "velocity spike",
            RuleKind::RoundAmount => "round amount",
        }
    }
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column_name())
    }
}

/// Rule thresholds, read from `[rules]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RulesConfig {
    #[serde(default = "default_large_amount_percentile")]
    pub large_amount_percentile: f64,
    /// Above this many rows the percentile is taken over a sample
    #[serde(default = "default_large_amount_sample_rows")]
    pub large_amount_sample_rows: usize,
    #[serde(default = "default_depletion_ratio")]
    pub depletion_ratio: f64,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_unusual_hour_start")]
    pub unusual_hour_start: f64,
    #[serde(default = "default_unusual_hour_end")]
    pub unusual_hour_end: f64,
    #[serde(default = "default_velocity_multiplier")]
    pub velocity_multiplier: f64,
    /// Above this many rows the global mean replaces per-origin means
    #[serde(default = "default_velocity_global_rows")]
    pub velocity_global_rows: usize,
    #[serde(default = "default_round_amount_unit")]
    pub round_amount_unit: f64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            large_amount_percentile: default_large_amount_percentile(),
            large_amount_sample_rows: default_large_amount_sample_rows(),
            depletion_ratio: default_depletion_ratio(),
            epsilon: default_epsilon(),
            unusual_hour_start: default_unusual_hour_start(),
            unusual_hour_end: default_unusual_hour_end(),
            velocity_multiplier: default_velocity_multiplier(),
            velocity_global_rows: default_velocity_global_rows(),
            round_amount_unit: default_round_amount_unit(),
        }
    }
}

fn default_large_amount_percentile() -> f64 {
    95.0
}
fn default_large_amount_sample_rows() -> usize {
    10_000
}
fn default_depletion_ratio() -> f64 {
    0.9
}
fn default_epsilon() -> f64 {
    1e-6
}
fn default_unusual_hour_start() -> f64 {
    22.0
}
fn default_unusual_hour_end() -> f64 {
    6.0
}
fn default_velocity_multiplier() -> f64 {
    3.0
}
fn default_velocity_global_rows() -> usize {
    5_000
}
fn default_round_amount_unit() -> f64 {
    1_000.0
}

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("cannot evaluate rules on an empty batch")]
    EmptyBatch,

    #[error("row {row} has a non-finite amount")]
    NonFinite { row: usize },
}

/// Boolean rule matrix plus its row-wise mean
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuleFlags {
    flags: Vec<[bool; 6]>,
    score: Vec<f64>,
}

impl RuleFlags {
    pub fn from_flags(flags: Vec<[bool; 6]>) -> Self {
        let score = flags
            .iter()
            .map(|row| row.iter().filter(|&&f| f).count() as f64 / RuleKind::ALL.len() as f64)
            .collect();
        Self { flags, score }
    }

    /// All rules off for `n` rows
    pub fn zeros(n: usize) -> Self {
        Self::from_flags(vec![[false; 6]; n])
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Rule score per row, in [0, 1]
    pub fn scores(&self) -> &[f64] {
        &self.score
    }

    pub fn get(&self, row: usize, rule: RuleKind) -> bool {
        self.flags
            .get(row)
            .map(|r| r[rule.index()])
            .unwrap_or(false)
    }

    pub fn column(&self, rule: RuleKind) -> Vec<bool> {
        self.flags.iter().map(|r| r[rule.index()]).collect()
    }

    pub fn triggered(&self, row: usize) -> Vec<RuleKind> {
        RuleKind::ALL
            .into_iter()
            .filter(|&rule| self.get(row, rule))
            .collect()
    }

    /// Rows each rule fired on
    pub fn counts(&self) -> BTreeMap<RuleKind, usize> {
        RuleKind::ALL
            .into_iter()
            .map(|rule| (rule, self.flags.iter().filter(|r| r[rule.index()]).count()))
            .collect()
    }

    pub fn explanation(&self, row: usize) -> String {
        let fired = self.triggered(row);
        if fired.is_empty() {
            "No suspicious indicators".to_string()
        } else {
            let labels: Vec<&str> = fired.iter().map(|r| r.label()).collect();
            format!("Suspicious due to: {}", labels.join(", "))
        }
    }

    pub fn explanations(&self) -> Vec<String> {
        (0..self.len()).map(|row| self.explanation(row)).collect()
    }
}

/// Computes [`RuleFlags`] for a cleaned batch
#[derive(Debug, Clone)]
pub struct RuleEvaluator {
    config: RulesConfig,
    seed: u64,
}

impl RuleEvaluator {
    pub fn new(config: RulesConfig, seed: u64) -> Self {
        Self { config, seed }
    }

    /// Evaluate all rules; failures yield all-zero flags
    pub fn evaluate(&self, batch: &TransactionBatch) -> RuleFlags {
        match self.try_evaluate(batch) {
            Ok(flags) => flags,
            Err(e) => {
                warn!("Rule evaluation failed, rule contribution zeroed: {}", e);
                RuleFlags::zeros(batch.len())
            }
        }
    }

    pub fn try_evaluate(&self, batch: &TransactionBatch) -> Result<RuleFlags, RuleError> {
        if batch.is_empty() {
            return Err(RuleError::EmptyBatch);
        }
        if let Some(row) = batch.iter().position(|t| !t.amount.is_finite()) {
            return Err(RuleError::NonFinite { row });
        }

        let cfg = &self.config;
        let large_threshold = self.large_amount_threshold(batch);
        let velocity_baseline = self.velocity_baselines(batch);

        let flags: Vec<[bool; 6]> = batch
            .iter()
            .zip(&velocity_baseline)
            .map(|(t, &baseline)| {
                let hour = t.hour();
                let unusual = if cfg.unusual_hour_start > cfg.unusual_hour_end {
                    hour >= cfg.unusual_hour_start || hour <= cfg.unusual_hour_end
                } else {
                    hour >= cfg.unusual_hour_start && hour <= cfg.unusual_hour_end
                };
                let depletion =
                    (t.old_balance_orig - t.new_balance_orig) / (t.old_balance_orig + cfg.epsilon);
                [
                    t.amount > large_threshold,
                    t.old_balance_dest == 0.0,
                    depletion > cfg.depletion_ratio,
                    unusual,
                    t.amount > cfg.velocity_multiplier * baseline,
                    cfg.round_amount_unit > 0.0 && t.amount % cfg.round_amount_unit == 0.0,
                ]
            })
            .collect();

        let result = RuleFlags::from_flags(flags);
        debug!("Rule trigger counts: {:?}", result.counts());
        Ok(result)
    }

    fn large_amount_threshold(&self, batch: &TransactionBatch) -> f64 {
        let amounts = batch.amounts();
        let limit = self.config.large_amount_sample_rows;
        if amounts.len() > limit {
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
            let sample: Vec<f64> = rand::seq::index::sample(&mut rng, amounts.len(), limit)
                .into_iter()
                .map(|i| amounts[i])
                .collect();
            percentile(&sample, self.config.large_amount_percentile)
        } else {
            percentile(&amounts, self.config.large_amount_percentile)
        }
    }

    /// Mean amount each row is compared against for the velocity rule
    fn velocity_baselines(&self, batch: &TransactionBatch) -> Vec<f64> {
        if batch.len() > self.config.velocity_global_rows {
            let global = mean(&batch.amounts());
            return vec![global; batch.len()];
        }
        let mut sums: FxHashMap<&str, (f64, usize)> = FxHashMap::default();
        for t in batch.iter() {
            let entry = sums.entry(t.name_orig.as_str()).or_insert((0.0, 0));
            entry.0 += t.amount;
            entry.1 += 1;
        }
        batch
            .iter()
            .map(|t| {
                sums.get(t.name_orig.as_str())
                    .map(|(sum, count)| sum / *count as f64)
                    .unwrap_or(0.0)
            })
            .collect()
    }
}
