//! Pattern mining over flagged transactions
//!
//! Two independent techniques whose outputs are concatenated:
//! - DBSCAN over standardized amount + balance features, scored by the
//!   silhouette coefficient
//! - statistical tails of the flagged scores (IQR fence) and flagged
//!   amounts (mean + 2·std)
//!
//! Each technique fails on its own; a failure is logged and skipped.

use super::LearningConfig;
use crate::models::{Transaction, TransactionBatch};
use crate::stats::{mean, percentile, std_dev};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, warn};

/// How a pattern was discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DetectionMethod {
    #[serde(rename = "DBSCAN")]
    Dbscan,
    #[serde(rename = "Statistical Outliers")]
    StatisticalOutliers,
    #[serde(rename = "Amount Analysis")]
    AmountAnalysis,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::Dbscan => "DBSCAN",
            DetectionMethod::StatisticalOutliers => "Statistical Outliers",
            DetectionMethod::AmountAnalysis => "Amount Analysis",
        }
    }
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An emergent fraud shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub pattern_id: String,
    pub discovered_at: DateTime<Utc>,
    pub member_count: usize,
    /// Human-readable description
    pub characteristics: String,
    /// member_count / flagged_count
    pub confidence: f64,
    pub detection_method: DetectionMethod,
    pub quality_score: f64,
    /// Centroid in standardized feature space, for clusters only
    #[serde(default)]
    pub cluster_center: Option<Vec<f64>>,
}

/// Discovers patterns among flagged transactions
#[derive(Debug, Clone)]
pub struct PatternMiner {
    config: LearningConfig,
}

impl PatternMiner {
    pub fn new(config: LearningConfig) -> Self {
        Self { config }
    }

    /// Mine every technique over the flagged rows and their scores
    pub fn mine(
        &self,
        flagged: &TransactionBatch,
        flagged_scores: &[f64],
        now: DateTime<Utc>,
    ) -> Vec<Pattern> {
        let mut patterns = Vec::new();

        match self.cluster_patterns(flagged, now) {
            Ok(found) => patterns.extend(found),
            Err(e) => warn!("Cluster pattern mining skipped: {}", e),
        }
        match self.score_outlier_pattern(flagged_scores, now) {
            Ok(found) => patterns.extend(found),
            Err(e) => warn!("Score outlier mining skipped: {}", e),
        }
        match self.amount_outlier_pattern(flagged, now) {
            Ok(found) => patterns.extend(found),
            Err(e) => warn!("Amount outlier mining skipped: {}", e),
        }

        debug!(
            "Mined {} patterns from {} flagged transactions",
            patterns.len(),
            flagged.len()
        );
        patterns
    }

    /// DBSCAN clusters of at least `min_cluster_size` members
    pub fn cluster_patterns(
        &self,
        flagged: &TransactionBatch,
        now: DateTime<Utc>,
    ) -> Result<Vec<Pattern>> {
        let n = flagged.len();
        if n < self.config.min_cluster_size {
            return Ok(Vec::new());
        }

        let points = standardize(&flagged.iter().map(pattern_features).collect::<Vec<_>>());
        if points.iter().flatten().any(|v| !v.is_finite()) {
            bail!("standardized features contain non-finite values");
        }

        let labels = dbscan(&points, self.config.eps, self.config.min_samples);
        let quality = silhouette_score(&points, &labels);

        let mut clusters: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, label) in labels.iter().enumerate() {
            if let Some(c) = label {
                clusters.entry(*c).or_default().push(i);
            }
        }

        let stamp = now.format("%Y%m%d_%H%M%S");
        let patterns = clusters
            .into_iter()
            .filter(|(_, members)| members.len() >= self.config.min_cluster_size)
            .map(|(cluster, members)| {
                let width = points[0].len();
                let center: Vec<f64> = (0..width)
                    .map(|j| members.iter().map(|&i| points[i][j]).sum::<f64>() / members.len() as f64)
                    .collect();
                let rows: Vec<&Transaction> =
                    members.iter().filter_map(|&i| flagged.get(i)).collect();
                Pattern {
                    pattern_id: format!("dbscan_{}_{}", stamp, cluster),
                    discovered_at: now,
                    member_count: members.len(),
                    characteristics: describe_cluster(&rows),
                    confidence: members.len() as f64 / n as f64,
                    detection_method: DetectionMethod::Dbscan,
                    quality_score: quality,
                    cluster_center: Some(center),
                }
            })
            .collect();
        Ok(patterns)
    }

    /// Flagged scores above the IQR upper fence
    pub fn score_outlier_pattern(
        &self,
        scores: &[f64],
        now: DateTime<Utc>,
    ) -> Result<Option<Pattern>> {
        if scores.len() <= self.config.score_outlier_min_rows {
            return Ok(None);
        }
        if scores.iter().any(|s| !s.is_finite()) {
            bail!("flagged scores contain non-finite values");
        }
        let q75 = percentile(scores, 75.0);
        let q25 = percentile(scores, 25.0);
        let fence = q75 + 1.5 * (q75 - q25);
        let count = scores.iter().filter(|&&s| s > fence).count();
        if count < self.config.min_group_size {
            return Ok(None);
        }
        Ok(Some(Pattern {
            pattern_id: format!("stat_outliers_{}", now.format("%Y%m%d_%H%M%S")),
            discovered_at: now,
            member_count: count,
            characteristics: format!("Very high confidence fraud scores (>{:.4})", fence),
            confidence: count as f64 / scores.len() as f64,
            detection_method: DetectionMethod::StatisticalOutliers,
            quality_score: 0.8,
            cluster_center: None,
        }))
    }

    /// Flagged amounts above mean + 2·std
    pub fn amount_outlier_pattern(
        &self,
        flagged: &TransactionBatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Pattern>> {
        if flagged.len() <= self.config.amount_outlier_min_rows {
            return Ok(None);
        }
        let amounts = flagged.amounts();
        if amounts.iter().any(|a| !a.is_finite()) {
            bail!("flagged amounts contain non-finite values");
        }
        let threshold = mean(&amounts) + 2.0 * std_dev(&amounts);
        let count = amounts.iter().filter(|&&a| a > threshold).count();
        if count < self.config.min_group_size {
            return Ok(None);
        }
        Ok(Some(Pattern {
            pattern_id: format!("amount_outliers_{}", now.format("%Y%m%d_%H%M%S")),
            discovered_at: now,
            member_count: count,
            characteristics: format!("Unusually large amounts (>{:.2})", threshold),
            confidence: count as f64 / amounts.len() as f64,
            detection_method: DetectionMethod::AmountAnalysis,
            quality_score: 0.7,
            cluster_center: None,
        }))
    }
}

fn pattern_features(t: &Transaction) -> Vec<f64> {
    vec![
        t.amount,
        t.old_balance_orig,
        t.new_balance_orig,
        t.old_balance_dest,
        t.new_balance_dest,
    ]
}

/// Column-wise z-scores with a population std floor of 1e-8
fn standardize(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let width = rows.first().map(Vec::len).unwrap_or(0);
    let stats: Vec<(f64, f64)> = (0..width)
        .map(|j| {
            let col: Vec<f64> = rows.iter().map(|r| r[j]).collect();
            (mean(&col), std_dev(&col) + 1e-8)
        })
        .collect();
    rows.iter()
        .map(|r| {
            r.iter()
                .zip(&stats)
                .map(|(v, (m, s))| (v - m) / s)
                .collect()
        })
        .collect()
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Density clustering; `None` marks noise
///
/// A point is core when at least `min_samples` points, itself included,
/// lie within `eps`.
pub fn dbscan(points: &[Vec<f64>], eps: f64, min_samples: usize) -> Vec<Option<usize>> {
    let n = points.len();
    let region = |i: usize| -> Vec<usize> {
        (0..n)
            .filter(|&j| euclidean(&points[i], &points[j]) <= eps)
            .collect()
    };

    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut cluster = 0;

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        let neighbors = region(i);
        if neighbors.len() < min_samples {
            continue;
        }

        labels[i] = Some(cluster);
        let mut queue: VecDeque<usize> = neighbors.into_iter().collect();
        while let Some(j) = queue.pop_front() {
            if !visited[j] {
                visited[j] = true;
                let expansion = region(j);
                if expansion.len() >= min_samples {
                    queue.extend(expansion);
                }
            }
            if labels[j].is_none() {
                labels[j] = Some(cluster);
            }
        }
        cluster += 1;
    }
    labels
}

/// Mean silhouette coefficient, noise treated as its own label
///
/// 0 when there are fewer than 2 labels or every point has its own label.
pub fn silhouette_score(points: &[Vec<f64>], labels: &[Option<usize>]) -> f64 {
    let n = points.len();
    let mut groups: BTreeMap<Option<usize>, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        groups.entry(*label).or_default().push(i);
    }
    if groups.len() < 2 || groups.len() >= n {
        return 0.0;
    }

    let mean_distance = |i: usize, members: &[usize]| -> f64 {
        let (sum, count) = members
            .iter()
            .filter(|&&j| j != i)
            .fold((0.0, 0usize), |(s, c), &j| (s + euclidean(&points[i], &points[j]), c + 1));
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    };

    let total: f64 = (0..n)
        .map(|i| {
            let own = &groups[&labels[i]];
            if own.len() <= 1 {
                return 0.0;
            }
            let a = mean_distance(i, own);
            let b = groups
                .iter()
                .filter(|(label, _)| **label != labels[i])
                .map(|(_, members)| mean_distance(i, members))
                .fold(f64::INFINITY, f64::min);
            let denom = a.max(b);
            if denom > 0.0 {
                (b - a) / denom
            } else {
                0.0
            }
        })
        .sum();
    total / n as f64
}

/// Natural-language summary of a cluster's amount and depletion
pub fn describe_cluster(rows: &[&Transaction]) -> String {
    let amounts: Vec<f64> = rows.iter().map(|t| t.amount).collect();
    let depletion: Vec<f64> = rows
        .iter()
        .map(|t| (t.old_balance_orig - t.new_balance_orig) / (t.old_balance_orig + 1e-8))
        .collect();
    let avg_amount = mean(&amounts);
    let avg_depletion = mean(&depletion);

    let amount_desc = if avg_amount > 10_000.0 {
        "very large"
    } else if avg_amount > 1_000.0 {
        "large"
    } else {
        "moderate"
    };
    let balance_desc = if avg_depletion > 0.9 {
        "near-complete account depletion"
    } else if avg_depletion > 0.5 {
        "significant account depletion"
    } else {
        "partial account usage"
    };
    format!(
        "{} transactions (avg {:.2}) with {}",
        capitalize(amount_desc),
        avg_amount,
        balance_desc
    )
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    fn tx(values: [f64; 5]) -> Transaction {
        Transaction {
            amount: values[0],
            old_balance_orig: values[1],
            new_balance_orig: values[2],
            old_balance_dest: values[3],
            new_balance_dest: values[4],
            ..Default::default()
        }
    }

    /// 5 near-identical rows plus 10 rows each spiking one feature
    fn clustered_batch() -> TransactionBatch {
        let base = [1000.0, 5000.0, 4000.0, 100.0, 1100.0];
        let mut rows = Vec::new();
        for i in 0..5 {
            let mut v = base;
            v[0] += i as f64 * 0.01;
            rows.push(tx(v));
        }
        for j in 0..10 {
            let mut v = base;
            v[j % 5] = 1_000_000.0 * (1 + j / 5) as f64;
            rows.push(tx(v));
        }
        TransactionBatch::new(rows)
    }

    #[test]
    fn test_single_dense_cluster_found() {
        let miner = PatternMiner::new(LearningConfig::default());
        let batch = clustered_batch();
        let patterns = miner.cluster_patterns(&batch, now()).unwrap();

        assert_eq!(patterns.len(), 1);
        let p = &patterns[0];
        assert_eq!(p.member_count, 5);
        assert!((p.confidence - 5.0 / 15.0).abs() < 1e-12);
        assert_eq!(p.detection_method, DetectionMethod::Dbscan);
        assert_eq!(p.pattern_id, "dbscan_20260314_092653_0");
        assert_eq!(p.cluster_center.as_ref().map(Vec::len), Some(5));
        assert!(p.characteristics.starts_with("Large transactions"));
        assert!(p.characteristics.ends_with("partial account usage"));
    }

    #[test]
    fn test_dbscan_noise_and_border() {
        let points = vec![
            vec![0.0],
            vec![0.3],
            vec![0.6],
            vec![0.9],
            vec![10.0],
        ];
        let labels = dbscan(&points, 0.5, 3);
        assert_eq!(labels[..4], [Some(0), Some(0), Some(0), Some(0)]);
        assert_eq!(labels[4], None);
    }

    #[test]
    fn test_silhouette_edge_cases() {
        let points = vec![vec![0.0], vec![1.0], vec![2.0]];
        assert_eq!(silhouette_score(&points, &[Some(0), Some(0), Some(0)]), 0.0);
        assert_eq!(silhouette_score(&points, &[Some(0), Some(1), None]), 0.0);
        let separated = vec![vec![0.0], vec![0.1], vec![9.0], vec![9.1]];
        let s = silhouette_score(&separated, &[Some(0), Some(0), Some(1), Some(1)]);
        assert!(s > 0.9);
    }

    #[test]
    fn test_score_outliers_pattern() {
        let miner = PatternMiner::new(LearningConfig::default());
        let mut scores: Vec<f64> = (0..17).map(|i| 0.5 + i as f64 * 0.001).collect();
        scores.extend([0.99, 0.99, 0.99]);
        let pattern = miner.score_outlier_pattern(&scores, now()).unwrap().unwrap();
        assert_eq!(pattern.member_count, 3);
        assert_eq!(pattern.detection_method, DetectionMethod::StatisticalOutliers);
        assert_eq!(pattern.quality_score, 0.8);
        assert!((pattern.confidence - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_small_inputs_skip_statistics() {
        let miner = PatternMiner::new(LearningConfig::default());
        assert!(miner.score_outlier_pattern(&[0.9; 10], now()).unwrap().is_none());
        let batch = TransactionBatch::new(vec![tx([1.0; 5]); 5]);
        assert!(miner.amount_outlier_pattern(&batch, now()).unwrap().is_none());
    }

    #[test]
    fn test_amount_outliers_pattern() {
        let miner = PatternMiner::new(LearningConfig::default());
        let mut rows: Vec<Transaction> = (0..27).map(|_| tx([100.0, 200.0, 100.0, 0.0, 0.0])).collect();
        rows.extend((0..3).map(|_| tx([10_000.0, 20_000.0, 0.0, 0.0, 0.0])));
        let pattern = miner
            .amount_outlier_pattern(&TransactionBatch::new(rows), now())
            .unwrap()
            .unwrap();
        assert_eq!(pattern.member_count, 3);
        assert_eq!(pattern.detection_method, DetectionMethod::AmountAnalysis);
        assert_eq!(pattern.quality_score, 0.7);
    }

    #[test]
    fn test_describe_cluster() {
        let a = tx([50_000.0, 60_000.0, 0.0, 0.0, 0.0]);
        let b = tx([20_000.0, 20_000.0, 500.0, 0.0, 0.0]);
        let text = describe_cluster(&[&a, &b]);
        assert!(text.starts_with("Very large transactions"));
        assert!(text.ends_with("near-complete account depletion"));
    }

    #[test]
    fn test_mine_concatenates_techniques() {
        let miner = PatternMiner::new(LearningConfig::default());
        let batch = clustered_batch();
        let scores: Vec<f64> = (0..15).map(|i| 0.5 + i as f64 * 0.001).collect();
        let patterns = miner.mine(&batch, &scores, now());
        assert!(patterns
            .iter()
            .any(|p| p.detection_method == DetectionMethod::Dbscan));
    }
}
