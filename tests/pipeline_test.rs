//! End-to-end pipeline tests
//!
//! Drives `FraudPipeline` over CSV fixtures written to temp dirs and checks
//! scoring invariants, degradation paths and learning-state persistence.

use fraudscope::detectors::DetectorKind;
use fraudscope::ingest::{load_csv, RawTable};
use fraudscope::learning::{LearningStore, STATE_FILENAME};
use fraudscope::scoring::{FusionPath, RANDOM_FALLBACK_KEY};
use fraudscope::{DataError, EngineConfig, FraudPipeline};
use std::path::Path;

const HEADER: &str = "step,type,amount,nameOrig,oldbalanceOrg,newbalanceOrig,nameDest,oldbalanceDest,newbalanceDest,isFraud,isFlaggedFraud";

/// Mostly small payments from a handful of repeat customers, with every
/// 15th row draining a large balance into a fresh account
fn write_fixture(dir: &Path, rows: usize) -> std::path::PathBuf {
    let mut csv = String::from(HEADER);
    csv.push('\n');
    for i in 0..rows {
        let step = i / 4 + 1;
        let line = if i % 15 == 7 {
            let amount = 180_000.0 + (i as f64) * 1_000.0;
            format!(
                "{step},TRANSFER,{amount},C{orig},{amount},0,C9{i:04},0,0,1,0",
                orig = 900 + i
            )
        } else {
            let amount = 40.0 + (i % 11) as f64 * 17.5;
            let old = 2_000.0 + (i % 5) as f64 * 150.0;
            format!(
                "{step},PAYMENT,{amount},C{orig},{old},{new},M{dest},0,0,0,0",
                orig = i % 6,
                new = old - amount,
                dest = i % 20
            )
        };
        csv.push_str(&line);
        csv.push('\n');
    }
    let path = dir.join("transactions.csv");
    std::fs::write(&path, csv).unwrap();
    path
}

fn small_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.analysis.workers = 2;
    config
}

#[test]
fn full_ensemble_scores_every_row() {
    let dir = tempfile::tempdir().unwrap();
    let table = load_csv(&write_fixture(dir.path(), 150)).unwrap();

    let mut pipeline = FraudPipeline::new(small_config(), LearningStore::in_memory());
    let report = pipeline.analyze(&table).unwrap();

    assert_eq!(report.rows, 150);
    assert_eq!(report.combined_scores.len(), 150);
    assert_eq!(report.suspicious.len(), 150);
    assert_eq!(report.risk_levels.len(), 150);
    assert!(report
        .combined_scores
        .iter()
        .all(|s| s.is_finite() && (0.0..=1.0).contains(s)));

    assert_eq!(report.fusion_path, FusionPath::Ensemble);
    assert!(report.detector_failures.is_empty(), "{:?}", report.detector_failures);
    for name in ["isolation_forest", "autoencoder", "sequence"] {
        let detail = &report.model_details[name];
        assert_eq!(detail.scores.len(), 150);
        assert_eq!(detail.anomalies.len(), 150);
    }
    let share: f64 = report
        .contributions
        .values()
        .map(|c| c.contribution_percentage)
        .sum();
    assert!((share - 100.0).abs() < 1e-6);

    let threshold = report.threshold;
    for (score, flagged) in report.combined_scores.iter().zip(&report.suspicious) {
        assert_eq!(*flagged, *score > threshold);
    }
}

#[test]
fn same_seed_gives_same_scores() {
    let dir = tempfile::tempdir().unwrap();
    let table = load_csv(&write_fixture(dir.path(), 120)).unwrap();

    let first = FraudPipeline::new(small_config(), LearningStore::in_memory())
        .analyze(&table)
        .unwrap();
    let second = FraudPipeline::new(small_config(), LearningStore::in_memory())
        .analyze(&table)
        .unwrap();
    assert_eq!(first.combined_scores, second.combined_scores);
    assert_eq!(first.suspicious, second.suspicious);
}

#[test]
fn exhausted_budgets_fall_back_to_random_scores() {
    let dir = tempfile::tempdir().unwrap();
    let table = load_csv(&write_fixture(dir.path(), 120)).unwrap();

    let mut config = small_config();
    config.detectors.isolation_forest.budget_ms = 0;
    config.detectors.autoencoder.budget_ms = 0;
    config.detectors.sequence.budget_ms = 0;
    config.fusion.fallback_budget_ms = 0;

    let report = FraudPipeline::new(config, LearningStore::in_memory())
        .analyze(&table)
        .unwrap();
    assert_eq!(report.detector_failures.len(), 3);
    assert_eq!(report.fusion_path, FusionPath::RandomFallback);
    assert_eq!(report.model_details.len(), 1);
    assert!(report.model_details.contains_key(RANDOM_FALLBACK_KEY));
    assert_eq!(report.combined_scores.len(), 120);
}

#[test]
fn extreme_balance_errors_still_score() {
    let mut csv = String::from(HEADER);
    csv.push('\n');
    for i in 0..10 {
        let amount = 50.0 + i as f64 * 10.0;
        csv.push_str(&format!(
            "{},PAYMENT,{amount},C{i},1000,{},M{i},0,0,0,0\n",
            i + 1,
            1000.0 - amount
        ));
    }
    csv.push_str("11,TRANSFER,7e307,C20,0,1e308,C21,0,0,1,0\n");
    csv.push_str("12,TRANSFER,10,C22,1.7e308,0,C23,0,0,1,0\n");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("extreme.csv");
    std::fs::write(&path, csv).unwrap();
    let table = load_csv(&path).unwrap();

    let report = FraudPipeline::new(small_config(), LearningStore::in_memory())
        .analyze(&table)
        .unwrap();
    assert_eq!(report.combined_scores.len(), 12);
    assert!(report.combined_scores.iter().all(|s| s.is_finite()));
}

#[test]
fn constant_numerics_are_rejected_even_when_type_varies() {
    let mut csv = String::from(HEADER);
    csv.push('\n');
    for i in 0..20 {
        let kind = if i % 2 == 0 { "PAYMENT" } else { "TRANSFER" };
        csv.push_str(&format!("5,{kind},100,C{i},500,400,M{i},0,100,0,0\n"));
    }
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("constant.csv");
    std::fs::write(&path, csv).unwrap();
    let table = load_csv(&path).unwrap();

    let err = FraudPipeline::new(small_config(), LearningStore::in_memory())
        .analyze(&table)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DataError>(),
        Some(DataError::Degenerate(_))
    ));
}

#[test]
fn input_errors_abort_the_batch() {
    let mut pipeline = FraudPipeline::new(small_config(), LearningStore::in_memory());

    let missing = RawTable::from_rows(
        vec!["step".into(), "amount".into()],
        vec![vec!["1".into(), "10".into()], vec!["2".into(), "20".into()]],
    );
    let err = pipeline.analyze(&missing).unwrap_err();
    match err.downcast_ref::<DataError>() {
        Some(DataError::MissingColumns(cols)) => {
            assert!(cols.contains(&"nameOrig".to_string()));
            assert!(!cols.contains(&"amount".to_string()));
        }
        other => panic!("expected MissingColumns, got {:?}", other),
    }

    let dir = tempfile::tempdir().unwrap();
    let one_row = load_csv(&write_fixture(dir.path(), 1)).unwrap();
    assert!(matches!(
        pipeline.analyze(&one_row).unwrap_err().downcast_ref::<DataError>(),
        Some(DataError::TooFewRows { min: 2, found: 1 })
    ));

    let mut config = small_config();
    config.analysis.contamination = 0.0;
    let table = load_csv(&write_fixture(dir.path(), 30)).unwrap();
    assert!(matches!(
        FraudPipeline::new(config, LearningStore::in_memory())
            .analyze(&table)
            .unwrap_err()
            .downcast_ref::<DataError>(),
        Some(DataError::InvalidContamination(_))
    ));
}

#[test]
fn learning_state_survives_reopen() {
    let data = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let table = load_csv(&write_fixture(data.path(), 120)).unwrap();

    let mut config = small_config();
    config.analysis.detectors = vec![DetectorKind::IsolationForest];

    let mut pipeline = FraudPipeline::new(config.clone(), LearningStore::open(state.path()));
    let report = pipeline.analyze(&table).unwrap();
    let learning = report.learning.as_ref().unwrap();
    assert!(learning.persisted);
    assert!(learning.skipped.is_none());
    // The fixture is labelled with both classes
    assert!(learning.performance.detection_rate.is_some());
    assert!(learning.performance.false_positive_rate.is_some());
    assert!(state.path().join(STATE_FILENAME).exists());

    let reopened = LearningStore::open(state.path());
    assert_eq!(reopened.state(), pipeline.store().state());

    let mut again = FraudPipeline::new(config, reopened);
    again.analyze(&table).unwrap();
    let metrics = &again.store().state().performance_metrics;
    assert_eq!(metrics.detection_rates.len(), 2);
    assert_eq!(metrics.false_positive_rates.len(), 2);
    assert!(
        again.store().state().pattern_history.len()
            >= pipeline.store().state().pattern_history.len()
    );
}

#[test]
fn disabled_learning_leaves_state_alone() {
    let data = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let table = load_csv(&write_fixture(data.path(), 40)).unwrap();

    let mut config = small_config();
    config.analysis.detectors = vec![DetectorKind::IsolationForest];
    config.learning.enabled = false;

    let report = FraudPipeline::new(config, LearningStore::open(state.path()))
        .analyze(&table)
        .unwrap();
    assert!(report.learning.is_none());
    assert!(!state.path().join(STATE_FILENAME).exists());
}
