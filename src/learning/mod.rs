//! Self-learning loop
//!
//! After each batch the flagged transactions are mined for patterns, the
//! patterns become advisory adaptive rules, labelled batches update the
//! detection metrics, and the state is persisted. Adaptive rules are never
//! fed back into rule evaluation.

pub mod miner;
pub mod store;

pub use miner::{DetectionMethod, Pattern, PatternMiner};
pub use store::{
    default_state_dir, AdaptationEvent, AdaptiveRule, LearningState, LearningStore,
    PatternInsights, PerformanceMetrics, PerformanceUpdate, SystemStatus, STATE_FILENAME,
};

use crate::models::TransactionBatch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// Pattern mining and persistence settings, read from `[learning]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearningConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Defaults to `<data dir>/fraudscope`
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default = "default_eps")]
    pub eps: f64,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    /// Score outliers need strictly more flagged rows than this
    #[serde(default = "default_score_outlier_min_rows")]
    pub score_outlier_min_rows: usize,
    /// Amount outliers need strictly more flagged rows than this
    #[serde(default = "default_amount_outlier_min_rows")]
    pub amount_outlier_min_rows: usize,
    #[serde(default = "default_min_group_size")]
    pub min_group_size: usize,
    #[serde(default)]
    pub max_pattern_history: Option<usize>,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            state_dir: None,
            eps: default_eps(),
            min_samples: default_min_samples(),
            min_cluster_size: default_min_cluster_size(),
            score_outlier_min_rows: default_score_outlier_min_rows(),
            amount_outlier_min_rows: default_amount_outlier_min_rows(),
            min_group_size: default_min_group_size(),
            max_pattern_history: None,
        }
    }
}

impl LearningConfig {
    pub fn resolved_state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(default_state_dir)
    }
}

fn default_enabled() -> bool {
    true
}
fn default_eps() -> f64 {
    0.5
}
fn default_min_samples() -> usize {
    3
}
fn default_min_cluster_size() -> usize {
    3
}
fn default_score_outlier_min_rows() -> usize {
    10
}
fn default_amount_outlier_min_rows() -> usize {
    5
}
fn default_min_group_size() -> usize {
    3
}

/// What one batch taught the system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningOutcome {
    pub new_patterns: Vec<Pattern>,
    pub adaptive_rules: Vec<AdaptiveRule>,
    pub performance: PerformanceUpdate,
    pub status: SystemStatus,
    pub persisted: bool,
    /// Reason learning was skipped for this batch
    pub skipped: Option<String>,
}

impl LearningOutcome {
    fn skipped(store: &LearningStore, reason: String) -> Self {
        Self {
            new_patterns: Vec::new(),
            adaptive_rules: Vec::new(),
            performance: PerformanceUpdate::default(),
            status: store.system_status(),
            persisted: false,
            skipped: Some(reason),
        }
    }
}

/// Mine the flagged rows, adapt, update metrics and persist
pub fn integrate(
    store: &mut LearningStore,
    miner: &PatternMiner,
    batch: &TransactionBatch,
    scores: &[f64],
    suspicious: &[bool],
    now: DateTime<Utc>,
) -> LearningOutcome {
    if batch.len() != scores.len() || batch.len() != suspicious.len() {
        let reason = format!(
            "length mismatch: {} rows, {} scores, {} flags",
            batch.len(),
            scores.len(),
            suspicious.len()
        );
        warn!("Learning skipped: {}", reason);
        return LearningOutcome::skipped(store, reason);
    }

    let flagged_idx: Vec<usize> = suspicious
        .iter()
        .enumerate()
        .filter_map(|(i, &f)| f.then_some(i))
        .collect();
    let flagged = batch.select(&flagged_idx);
    let flagged_scores: Vec<f64> = flagged_idx.iter().map(|&i| scores[i]).collect();

    let new_patterns = miner.mine(&flagged, &flagged_scores, now);
    store.record_patterns(&new_patterns);
    let adaptive_rules = store.adapt_rules(&new_patterns, now);

    let performance = match batch.labels() {
        Some(labels) => store.update_performance(&labels, suspicious),
        None => PerformanceUpdate::default(),
    };

    let persisted = store.persist(now);
    if !new_patterns.is_empty() {
        info!(
            "Learned {} new patterns from {} flagged transactions",
            new_patterns.len(),
            flagged.len()
        );
    }

    LearningOutcome {
        new_patterns,
        adaptive_rules,
        performance,
        status: store.system_status(),
        persisted,
        skipped: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Transaction;

    fn labelled(amount: f64, fraud: bool) -> Transaction {
        Transaction {
            amount,
            old_balance_orig: amount * 2.0,
            is_fraud: Some(fraud),
            ..Default::default()
        }
    }

    #[test]
    fn test_length_mismatch_skips() {
        let mut store = LearningStore::in_memory();
        let miner = PatternMiner::new(LearningConfig::default());
        let batch = TransactionBatch::new(vec![labelled(1.0, false); 3]);
        let outcome = integrate(&mut store, &miner, &batch, &[0.1, 0.2], &[false; 3], Utc::now());
        assert!(outcome.skipped.is_some());
        assert!(outcome.new_patterns.is_empty());
        assert!(store.state().performance_metrics.detection_rates.is_empty());
    }

    #[test]
    fn test_labels_update_metrics() {
        let mut store = LearningStore::in_memory();
        let miner = PatternMiner::new(LearningConfig::default());
        let batch = TransactionBatch::new(vec![
            labelled(10.0, true),
            labelled(20.0, true),
            labelled(30.0, false),
            labelled(40.0, false),
        ]);
        let outcome = integrate(
            &mut store,
            &miner,
            &batch,
            &[0.9, 0.1, 0.8, 0.2],
            &[true, false, true, false],
            Utc::now(),
        );
        assert_eq!(outcome.performance.detection_rate, Some(0.5));
        assert_eq!(outcome.performance.false_positive_rate, Some(0.5));
        assert!(!outcome.persisted);
        assert!(outcome.skipped.is_none());
    }

    #[test]
    fn test_unlabelled_batch_keeps_metrics() {
        let mut store = LearningStore::in_memory();
        let miner = PatternMiner::new(LearningConfig::default());
        let batch = TransactionBatch::new(vec![Transaction::default(); 4]);
        let outcome = integrate(&mut store, &miner, &batch, &[0.0; 4], &[false; 4], Utc::now());
        assert_eq!(outcome.performance, PerformanceUpdate::default());
        assert!(store.state().performance_metrics.false_positive_rates.is_empty());
    }
}
