//! Configuration for the scoring engine
//!
//! This module handles:
//! - Project-level configuration (`fraudscope.toml`)
//! - Detector weights, budgets and hyperparameters
//! - Fusion and rule thresholds
//! - Learning state location

use crate::detectors::{DetectorKind, DetectorsConfig};
use crate::error::DataError;
use crate::learning::LearningConfig;
use crate::rules::RulesConfig;
use crate::scoring::FusionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

pub const CONFIG_FILENAME: &str = "fraudscope.toml";

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub detectors: DetectorsConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub learning: LearningConfig,
}

/// Batch-level settings, read from `[analysis]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisConfig {
    /// Expected fraud share, in (0, 0.5]
    #[serde(default = "default_contamination")]
    pub contamination: f64,
    #[serde(default = "default_detectors")]
    pub detectors: Vec<DetectorKind>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// 0 = auto-detect
    #[serde(default)]
    pub workers: usize,
    /// Larger tables are sampled down before scoring; 0 disables sampling
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            contamination: default_contamination(),
            detectors: default_detectors(),
            seed: default_seed(),
            workers: 0,
            max_rows: default_max_rows(),
        }
    }
}

fn default_contamination() -> f64 {
    0.1
}
fn default_detectors() -> Vec<DetectorKind> {
    DetectorKind::ALL.to_vec()
}
fn default_seed() -> u64 {
    42
}
fn default_max_rows() -> usize {
    50_000
}

/// Reject contamination outside (0, 0.5]
pub fn validate_contamination(contamination: f64) -> Result<(), DataError> {
    if contamination.is_finite() && contamination > 0.0 && contamination <= 0.5 {
        Ok(())
    } else {
        Err(DataError::InvalidContamination(contamination))
    }
}

impl EngineConfig {
    /// Check values that would otherwise fail mid-batch
    pub fn validate(&self) -> Result<(), DataError> {
        validate_contamination(self.analysis.contamination)
    }
}

/// Load `fraudscope.toml` from a directory, or defaults
pub fn load_engine_config(dir: &Path) -> EngineConfig {
    load_engine_config_file(&dir.join(CONFIG_FILENAME))
}

/// Load an explicit config file, or defaults if it is missing or malformed
pub fn load_engine_config_file(path: &Path) -> EngineConfig {
    if !path.exists() {
        debug!("No config at {}, using defaults", path.display());
        return EngineConfig::default();
    }
    match load_toml_config(path) {
        Ok(config) => {
            debug!("Loaded engine config from {}", path.display());
            config
        }
        Err(e) => {
            warn!("Failed to load {}: {}", path.display(), e);
            EngineConfig::default()
        }
    }
}

fn load_toml_config(path: &Path) -> anyhow::Result<EngineConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: EngineConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Commented starting point written by `fraudscope init`
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# fraudscope configuration
# Every key is optional; omitted keys use the values shown here.

[analysis]
# Expected share of fraudulent transactions, in (0, 0.5]
contamination = 0.1
# Techniques in the ensemble: isolation_forest, autoencoder, sequence
detectors = ["isolation_forest", "autoencoder", "sequence"]
# Seed for every sampling and model-initialization step
seed = 42
# Detector worker threads (0 = auto)
workers = 0
# Larger inputs are sampled down to this many rows (0 = never sample)
max_rows = 50000

[detectors.isolation_forest]
weight = 0.4
budget_ms = 30000
n_estimators = 30

[detectors.autoencoder]
weight = 0.3
budget_ms = 30000

[detectors.sequence]
weight = 0.3
budget_ms = 30000

[fusion]
ml_weight = 0.7
rule_weight = 0.3
# Rows above this percentile of the combined score are suspicious
suspicious_percentile = 95.0

[rules]
# Amounts above this percentile of a sample are large
large_amount_percentile = 95.0
# Origin balance drained beyond this share
depletion_ratio = 0.9
# Unusual hours: >= start or <= end
unusual_hour_start = 22.0
unusual_hour_end = 6.0
# Amount above this multiple of the origin's mean
velocity_multiplier = 3.0
round_amount_unit = 1000.0

[learning]
# state_dir = "/var/lib/fraudscope"
eps = 0.5
min_cluster_size = 3
# Keep only the newest N patterns (unbounded when unset)
# max_pattern_history = 10000
"#;
