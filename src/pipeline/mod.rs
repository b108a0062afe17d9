//! Batch scoring pipeline
//!
//! Orchestrates one analysis:
//! 1. Validate contamination and the input table
//! 2. Sample oversized tables down to `max_rows`
//! 3. Project features
//! 4. Run detectors (rayon pool) alongside the rule evaluator
//! 5. Fuse scores and flag the top tail
//! 6. Mine flagged rows and persist learning state

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{validate_contamination, EngineConfig};
use crate::detectors::{DetectorEngine, DetectorRegistry};
use crate::features::FeatureProjector;
use crate::ingest::RawTable;
use crate::learning::{integrate, LearningOutcome, LearningStore, PatternMiner};
use crate::models::{RiskLevel, TransactionBatch};
use crate::rules::RuleEvaluator;
use crate::scoring::{FusionPath, ModelContribution, ModelDetail, RiskDistribution, ScoreFusion};

type SharedProgress = Arc<dyn Fn(&str, usize, usize) + Send + Sync>;

/// A detector that was left out of fusion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorFailure {
    pub detector: String,
    pub error: String,
    pub duration_ms: u64,
}

/// One row of the suspicious ranking
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuspiciousTransaction {
    pub index: usize,
    pub name_orig: String,
    pub name_dest: String,
    pub kind: String,
    pub amount: f64,
    pub score: f64,
    pub risk: RiskLevel,
    pub explanation: String,
}

/// Everything one batch produced
///
/// Per-row vectors are sized to `rows` and follow `batch`. When the input
/// exceeded `max_rows` those are the sampled rows, not `input_rows`; set
/// `max_rows = 0` to score every input row.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub analyzed_at: DateTime<Utc>,
    pub rows: usize,
    /// Rows in the input before sampling
    pub input_rows: usize,
    pub combined_scores: Vec<f64>,
    pub suspicious: Vec<bool>,
    pub suspicious_count: usize,
    pub threshold: f64,
    pub risk_levels: Vec<RiskLevel>,
    pub risk_distribution: RiskDistribution,
    pub rule_scores: Vec<f64>,
    /// Rows triggering each rule, keyed by rule column name
    pub rule_counts: BTreeMap<String, usize>,
    pub explanations: Vec<String>,
    pub model_details: BTreeMap<String, ModelDetail>,
    pub contributions: BTreeMap<String, ModelContribution>,
    pub fusion_path: FusionPath,
    pub detector_failures: Vec<DetectorFailure>,
    pub learning: Option<LearningOutcome>,
    pub elapsed_ms: u64,
    #[serde(skip)]
    pub batch: TransactionBatch,
}

impl BatchReport {
    /// Highest-scoring suspicious rows, best first
    pub fn top_suspicious(&self, k: usize) -> Vec<SuspiciousTransaction> {
        let mut idx: Vec<usize> = (0..self.rows).filter(|&i| self.suspicious[i]).collect();
        idx.sort_by(|&a, &b| {
            self.combined_scores[b]
                .partial_cmp(&self.combined_scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        idx.into_iter()
            .take(k)
            .filter_map(|i| {
                let t = self.batch.get(i)?;
                Some(SuspiciousTransaction {
                    index: i,
                    name_orig: t.name_orig.clone(),
                    name_dest: t.name_dest.clone(),
                    kind: t.kind.clone(),
                    amount: t.amount,
                    score: self.combined_scores[i],
                    risk: self.risk_levels[i],
                    explanation: self.explanations[i].clone(),
                })
            })
            .collect()
    }
}

/// Scores batches and feeds the learning loop
pub struct FraudPipeline {
    config: EngineConfig,
    store: LearningStore,
    progress: Option<SharedProgress>,
}

impl FraudPipeline {
    pub fn new(config: EngineConfig, store: LearningStore) -> Self {
        Self {
            config,
            store,
            progress: None,
        }
    }

    /// Report detector completion as `(name, done, total)`
    pub fn with_progress(
        mut self,
        callback: impl Fn(&str, usize, usize) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &LearningStore {
        &self.store
    }

    /// Score one table
    ///
    /// Only input problems (`DataError`) and a failed worker pool abort the
    /// batch; detector, rule and persistence failures degrade instead.
    pub fn analyze(&mut self, table: &RawTable) -> Result<BatchReport> {
        let start = Instant::now();
        let analysis = &self.config.analysis;
        let seed = analysis.seed;
        let contamination = analysis.contamination;

        validate_contamination(contamination)?;
        table.validate()?;

        let input_rows = table.len();
        let sampled;
        let table = if analysis.max_rows > 0 && table.len() > analysis.max_rows {
            sampled = table.sample_rows(analysis.max_rows, seed);
            &sampled
        } else {
            table
        };

        let projected = FeatureProjector::new().project(table)?;
        let batch = &projected.batch;
        let matrix = &projected.matrix;
        info!("Projected {} transactions", batch.len());

        let registry = DetectorRegistry::new(self.config.detectors.clone());
        let mut engine = DetectorEngine::new(analysis.workers);
        if let Some(progress) = &self.progress {
            let progress = Arc::clone(progress);
            engine = engine.with_progress_callback(Box::new(move |name, done, total| {
                progress(name, done, total)
            }));
        }
        engine.register_all(registry.select(&analysis.detectors));

        let rules = RuleEvaluator::new(self.config.rules.clone(), seed);
        let (detection, rule_flags) = rayon::join(
            || engine.run(matrix, batch, contamination, seed),
            || rules.evaluate(batch),
        );
        let (runs, summary) = detection.context("Detector execution failed")?;

        let mut results = Vec::with_capacity(runs.len());
        let mut detector_failures = Vec::new();
        for run in runs {
            match run.outcome {
                Ok(result) => results.push(result),
                Err(e) => detector_failures.push(DetectorFailure {
                    detector: run.detector_name,
                    error: e.to_string(),
                    duration_ms: run.duration_ms,
                }),
            }
        }

        let fused = ScoreFusion::new(self.config.fusion.clone(), seed).fuse(
            &results,
            &rule_flags,
            matrix,
            contamination,
        );
        if fused.path.is_fallback() {
            warn!(
                "No detector succeeded ({} failed), scores come from {}",
                summary.detectors_failed, fused.path
            );
        }

        let analyzed_at = Utc::now();
        let learning = if self.config.learning.enabled {
            let miner = PatternMiner::new(self.config.learning.clone());
            Some(integrate(
                &mut self.store,
                &miner,
                batch,
                &fused.combined,
                &fused.suspicious,
                analyzed_at,
            ))
        } else {
            None
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            "Scored {} transactions in {}ms, {} suspicious",
            batch.len(),
            elapsed_ms,
            fused.suspicious_count()
        );

        Ok(BatchReport {
            batch_id: Uuid::new_v4(),
            analyzed_at,
            rows: batch.len(),
            input_rows,
            suspicious_count: fused.suspicious_count(),
            threshold: fused.threshold,
            risk_levels: fused.risk_levels(),
            risk_distribution: fused.risk_distribution(),
            rule_scores: rule_flags.scores().to_vec(),
            rule_counts: rule_flags
                .counts()
                .into_iter()
                .map(|(rule, count)| (rule.column_name().to_string(), count))
                .collect(),
            explanations: rule_flags.explanations(),
            contributions: fused.contributions(),
            fusion_path: fused.path,
            detector_failures,
            learning,
            elapsed_ms,
            combined_scores: fused.combined,
            suspicious: fused.suspicious,
            model_details: fused.model_details,
            batch: projected.batch,
        })
    }
}
