//! Detector registry
//!
//! Maps technique identifiers to typed hyperparameters and builds the
//! matching [`Detector`] implementations.

use crate::detectors::autoencoder::{AutoencoderDetector, AutoencoderParams};
use crate::detectors::base::Detector;
use crate::detectors::isolation::{IsolationLofDetector, IsolationParams};
use crate::detectors::sequence::{SequenceDetector, SequenceParams};
use crate::error::DataError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Available scoring techniques
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    IsolationForest,
    Autoencoder,
    Sequence,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 3] = [
        DetectorKind::IsolationForest,
        DetectorKind::Autoencoder,
        DetectorKind::Sequence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::IsolationForest => "isolation_forest",
            DetectorKind::Autoencoder => "autoencoder",
            DetectorKind::Sequence => "sequence",
        }
    }

    /// Offset mixed into the batch seed so techniques draw independent streams
    pub fn seed_offset(&self) -> u64 {
        match self {
            DetectorKind::IsolationForest => 0,
            DetectorKind::Autoencoder => 1,
            DetectorKind::Sequence => 2,
        }
    }
}

impl std::fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectorKind {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "isolation_forest" | "iforest" => Ok(DetectorKind::IsolationForest),
            "autoencoder" | "ae" => Ok(DetectorKind::Autoencoder),
            "sequence" | "lstm" => Ok(DetectorKind::Sequence),
            _ => Err(DataError::UnknownDetector(s.to_string())),
        }
    }
}

/// Typed hyperparameters for every technique, as read from `[detectors.*]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DetectorsConfig {
    #[serde(default)]
    pub isolation_forest: IsolationParams,
    #[serde(default)]
    pub autoencoder: AutoencoderParams,
    #[serde(default)]
    pub sequence: SequenceParams,
}

/// One configured technique
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorSpec {
    IsolationForest(IsolationParams),
    Autoencoder(AutoencoderParams),
    Sequence(SequenceParams),
}

impl DetectorSpec {
    pub fn build(&self) -> Arc<dyn Detector> {
        match self {
            DetectorSpec::IsolationForest(p) => Arc::new(IsolationLofDetector::new(p.clone())),
            DetectorSpec::Autoencoder(p) => Arc::new(AutoencoderDetector::new(p.clone())),
            DetectorSpec::Sequence(p) => Arc::new(SequenceDetector::new(p.clone())),
        }
    }
}

/// Technique identifiers mapped to their configured implementations
#[derive(Debug, Clone, Default)]
pub struct DetectorRegistry {
    config: DetectorsConfig,
}

impl DetectorRegistry {
    pub fn new(config: DetectorsConfig) -> Self {
        Self { config }
    }

    pub fn spec(&self, kind: DetectorKind) -> DetectorSpec {
        match kind {
            DetectorKind::IsolationForest => {
                DetectorSpec::IsolationForest(self.config.isolation_forest.clone())
            }
            DetectorKind::Autoencoder => DetectorSpec::Autoencoder(self.config.autoencoder.clone()),
            DetectorKind::Sequence => DetectorSpec::Sequence(self.config.sequence.clone()),
        }
    }

    /// Build the selected detectors, deduplicated, in selection order
    ///
    /// An empty selection falls back to the fast isolation technique.
    pub fn select(&self, kinds: &[DetectorKind]) -> Vec<Arc<dyn Detector>> {
        let mut chosen: Vec<DetectorKind> = Vec::new();
        for kind in kinds {
            if !chosen.contains(kind) {
                chosen.push(*kind);
            }
        }
        if chosen.is_empty() {
            debug!("No detectors selected, defaulting to isolation_forest");
            chosen.push(DetectorKind::IsolationForest);
        }
        chosen.into_iter().map(|k| self.spec(k).build()).collect()
    }

    /// Parse technique names, rejecting unknown ones
    pub fn parse_names<S: AsRef<str>>(names: &[S]) -> Result<Vec<DetectorKind>, DataError> {
        names.iter().map(|n| n.as_ref().parse()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        let kinds = DetectorRegistry::parse_names(&["isolation_forest", "LSTM", "autoencoder"]).unwrap();
        assert_eq!(
            kinds,
            vec![
                DetectorKind::IsolationForest,
                DetectorKind::Sequence,
                DetectorKind::Autoencoder
            ]
        );
        assert!(matches!(
            DetectorRegistry::parse_names(&["svm"]),
            Err(DataError::UnknownDetector(name)) if name == "svm"
        ));
    }

    #[test]
    fn test_empty_selection_defaults_to_isolation() {
        let registry = DetectorRegistry::default();
        let detectors = registry.select(&[]);
        assert_eq!(detectors.len(), 1);
        assert_eq!(detectors[0].kind(), DetectorKind::IsolationForest);
    }

    #[test]
    fn test_selection_deduplicates() {
        let registry = DetectorRegistry::default();
        let detectors = registry.select(&[
            DetectorKind::Autoencoder,
            DetectorKind::Autoencoder,
            DetectorKind::Sequence,
        ]);
        let names: Vec<&str> = detectors.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["autoencoder", "sequence"]);
    }

    #[test]
    fn test_default_weights() {
        let registry = DetectorRegistry::default();
        let weights: Vec<f64> = registry
            .select(&DetectorKind::ALL)
            .iter()
            .map(|d| d.weight())
            .collect();
        assert_eq!(weights, vec![0.4, 0.3, 0.3]);
    }
}
