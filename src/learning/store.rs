//! Persistent learning state
//!
//! Pattern history, detection metrics and adaptation events survive across
//! runs in a single JSON document (`learning_state.json`). A missing or
//! unreadable document starts a fresh state; nothing here aborts a batch.

use super::miner::{DetectionMethod, Pattern};
use crate::error::StoreError;
use crate::stats::mean;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const STATE_FILENAME: &str = "learning_state.json";

/// Number of trailing metric samples averaged by `system_status`
const RECENT_WINDOW: usize = 10;

/// Default state directory under the platform data dir
pub fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fraudscope")
}

/// Record of one adaptive rule being created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationEvent {
    pub timestamp: DateTime<Utc>,
    pub pattern_id: String,
    pub rule_created: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    #[serde(default)]
    pub detection_rates: Vec<f64>,
    #[serde(default)]
    pub false_positive_rates: Vec<f64>,
    #[serde(default)]
    pub adaptation_events: Vec<AdaptationEvent>,
}

/// The persisted document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningState {
    pub version: u32,
    #[serde(default)]
    pub pattern_history: Vec<Pattern>,
    #[serde(default)]
    pub performance_metrics: PerformanceMetrics,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl LearningState {
    pub const VERSION: u32 = 1;
}

impl Default for LearningState {
    fn default() -> Self {
        Self {
            version: Self::VERSION,
            pattern_history: Vec::new(),
            performance_metrics: PerformanceMetrics::default(),
            last_updated: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConditions {
    pub min_confidence: f64,
    pub pattern_match_required: bool,
}

/// A rule derived from a discovered pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveRule {
    pub rule_id: String,
    pub description: String,
    pub conditions: RuleConditions,
    pub confidence: f64,
    /// Candidates start inactive; scoring never reads this rule
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Rates computed from one labelled batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceUpdate {
    pub detection_rate: Option<f64>,
    pub false_positive_rate: Option<f64>,
}

/// Snapshot of what the system has learned so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub patterns_learned: usize,
    pub recent_detection_rate: f64,
    pub recent_false_positive_rate: f64,
    pub adaptations_made: usize,
    pub last_adaptation: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl std::fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Patterns learned:        {}", self.patterns_learned)?;
        writeln!(f, "Recent detection rate:   {:.1}%", self.recent_detection_rate * 100.0)?;
        writeln!(
            f,
            "Recent false positives:  {:.1}%",
            self.recent_false_positive_rate * 100.0
        )?;
        writeln!(f, "Adaptations made:        {}", self.adaptations_made)?;
        match self.last_updated {
            Some(ts) => write!(f, "Last updated:            {}", ts.to_rfc3339()),
            None => write!(f, "Last updated:            never"),
        }
    }
}

/// Aggregates over pattern history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternInsights {
    pub total_patterns: usize,
    /// Patterns discovered within the last 7 days
    pub recent_patterns: usize,
    pub average_quality: f64,
    pub by_method: BTreeMap<DetectionMethod, usize>,
}

/// Owns the learning state and its backing file
#[derive(Debug)]
pub struct LearningStore {
    path: Option<PathBuf>,
    state: LearningState,
    max_history: Option<usize>,
}

impl LearningStore {
    /// Open the store in `dir`, starting fresh if the file is missing or unusable
    pub fn open(dir: &Path) -> Self {
        let path = dir.join(STATE_FILENAME);
        let state = if path.exists() {
            match Self::load(&path) {
                Ok(state) => {
                    debug!(
                        "Loaded learning state with {} patterns from {}",
                        state.pattern_history.len(),
                        path.display()
                    );
                    state
                }
                Err(e) => {
                    warn!("Failed to load {}: {}", path.display(), e);
                    LearningState::default()
                }
            }
        } else {
            LearningState::default()
        };
        Self {
            path: Some(path),
            state,
            max_history: None,
        }
    }

    /// A store that never touches disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: LearningState::default(),
            max_history: None,
        }
    }

    /// Cap pattern history, dropping the oldest entries first
    pub fn with_max_history(mut self, max: Option<usize>) -> Self {
        self.max_history = max;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn state(&self) -> &LearningState {
        &self.state
    }

    pub fn load(path: &Path) -> Result<LearningState, StoreError> {
        let data = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let state: LearningState = serde_json::from_str(&data)?;
        if state.version != LearningState::VERSION {
            return Err(StoreError::Version {
                found: state.version,
                expected: LearningState::VERSION,
            });
        }
        Ok(state)
    }

    /// Write the state through a sibling temp file and rename it into place
    pub fn save(&mut self, now: DateTime<Utc>) -> Result<(), StoreError> {
        let path = self.path.clone().ok_or(StoreError::NoPath)?;
        let io_err = |p: &Path| {
            let p = p.to_path_buf();
            move |source| StoreError::Io { path: p, source }
        };

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(io_err(dir))?;
        }
        self.state.last_updated = Some(now);
        let json = serde_json::to_string_pretty(&self.state)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err(&tmp))?;
        std::fs::rename(&tmp, &path).map_err(io_err(&path))?;
        Ok(())
    }

    /// Save, logging instead of failing. Returns whether the state was written.
    pub fn persist(&mut self, now: DateTime<Utc>) -> bool {
        if self.path.is_none() {
            return false;
        }
        match self.save(now) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to persist learning state: {}", e);
                false
            }
        }
    }

    pub fn record_patterns(&mut self, patterns: &[Pattern]) {
        self.state.pattern_history.extend_from_slice(patterns);
        if let Some(max) = self.max_history {
            let len = self.state.pattern_history.len();
            if len > max {
                self.state.pattern_history.drain(..len - max);
            }
        }
    }

    /// Derive one adaptive rule per pattern and log the adaptation
    pub fn adapt_rules(&mut self, patterns: &[Pattern], now: DateTime<Utc>) -> Vec<AdaptiveRule> {
        let rules: Vec<AdaptiveRule> = patterns
            .iter()
            .map(|p| AdaptiveRule {
                rule_id: format!("adaptive_{}", p.pattern_id),
                description: format!("Adaptive rule for {}", p.characteristics),
                conditions: RuleConditions {
                    min_confidence: p.confidence,
                    pattern_match_required: true,
                },
                confidence: p.confidence,
                active: false,
                created_at: now,
            })
            .collect();

        self.state
            .performance_metrics
            .adaptation_events
            .extend(rules.iter().zip(patterns).map(|(rule, p)| AdaptationEvent {
                timestamp: now,
                pattern_id: p.pattern_id.clone(),
                rule_created: rule.rule_id.clone(),
                confidence: p.confidence,
            }));

        if !rules.is_empty() {
            info!("Created {} adaptive rules", rules.len());
        }
        rules
    }

    /// Append detection and false-positive rates from a labelled batch
    ///
    /// A rate is only recorded when its denominator is positive.
    pub fn update_performance(&mut self, labels: &[bool], suspicious: &[bool]) -> PerformanceUpdate {
        let n = labels.len().min(suspicious.len());
        let (mut tp, mut fp, mut positives, mut negatives) = (0usize, 0usize, 0usize, 0usize);
        for i in 0..n {
            match (labels[i], suspicious[i]) {
                (true, flagged) => {
                    positives += 1;
                    tp += flagged as usize;
                }
                (false, flagged) => {
                    negatives += 1;
                    fp += flagged as usize;
                }
            }
        }

        let metrics = &mut self.state.performance_metrics;
        let mut update = PerformanceUpdate::default();
        if positives > 0 {
            let rate = tp as f64 / positives as f64;
            metrics.detection_rates.push(rate);
            update.detection_rate = Some(rate);
        }
        if negatives > 0 {
            let rate = fp as f64 / negatives as f64;
            metrics.false_positive_rates.push(rate);
            update.false_positive_rate = Some(rate);
        }
        update
    }

    pub fn system_status(&self) -> SystemStatus {
        let metrics = &self.state.performance_metrics;
        let recent = |values: &[f64]| -> f64 {
            let start = values.len().saturating_sub(RECENT_WINDOW);
            mean(&values[start..])
        };
        SystemStatus {
            patterns_learned: self.state.pattern_history.len(),
            recent_detection_rate: recent(&metrics.detection_rates),
            recent_false_positive_rate: recent(&metrics.false_positive_rates),
            adaptations_made: metrics.adaptation_events.len(),
            last_adaptation: metrics.adaptation_events.last().map(|e| e.timestamp),
            last_updated: self.state.last_updated,
        }
    }

    pub fn pattern_insights(&self, now: DateTime<Utc>) -> PatternInsights {
        let history = &self.state.pattern_history;
        if history.is_empty() {
            return PatternInsights::default();
        }
        let cutoff = now - Duration::days(7);
        let mut by_method = BTreeMap::new();
        for p in history {
            *by_method.entry(p.detection_method).or_insert(0) += 1;
        }
        let qualities: Vec<f64> = history.iter().map(|p| p.quality_score).collect();
        PatternInsights {
            total_patterns: history.len(),
            recent_patterns: history.iter().filter(|p| p.discovered_at > cutoff).count(),
            average_quality: mean(&qualities),
            by_method,
        }
    }
}
