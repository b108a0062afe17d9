//! CLI contract tests
//!
//! Runs the built binary against temp fixtures and checks exit codes and
//! the JSON shapes scripts depend on.

use std::path::Path;
use std::process::{Command, Output};

fn fraudscope_bin() -> &'static str {
    env!("CARGO_BIN_EXE_fraudscope")
}

fn write_fixture(dir: &Path) -> std::path::PathBuf {
    let mut csv = String::from(
        "step,type,amount,nameOrig,oldbalanceOrg,newbalanceOrig,nameDest,oldbalanceDest,newbalanceDest\n",
    );
    for i in 0..60 {
        let amount = if i % 12 == 5 { 250_000.0 } else { 75.0 + (i % 9) as f64 * 12.0 };
        let old = if i % 12 == 5 { amount } else { 3_000.0 };
        csv.push_str(&format!(
            "{},{},{},C{},{},{},M{},0,0\n",
            i + 1,
            if i % 12 == 5 { "TRANSFER" } else { "PAYMENT" },
            amount,
            i % 4,
            old,
            old - amount,
            i
        ));
    }
    let path = dir.join("batch.csv");
    std::fs::write(&path, csv).unwrap();
    path
}

fn run(dir: &Path, args: &[&str]) -> Output {
    Command::new(fraudscope_bin())
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn analyze_json_report() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_fixture(dir.path());
    let state = dir.path().join("state");

    let out = run(
        dir.path(),
        &[
            "analyze",
            input.to_str().unwrap(),
            "--format",
            "json",
            "--detector",
            "isolation_forest",
            "--state-dir",
            state.to_str().unwrap(),
            "--log-level",
            "error",
        ],
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["rows"], 60);
    assert_eq!(report["combined_scores"].as_array().unwrap().len(), 60);
    assert_eq!(report["fusion_path"], "ensemble");
    assert!(report["model_details"]["isolation_forest"].is_object());
    assert!(state.join("learning_state.json").exists());
}

#[test]
fn analyze_writes_text_to_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_fixture(dir.path());
    let report = dir.path().join("report.txt");

    let out = run(
        dir.path(),
        &[
            "analyze",
            input.to_str().unwrap(),
            "--no-learn",
            "-d",
            "iforest",
            "-o",
            report.to_str().unwrap(),
        ],
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let text = std::fs::read_to_string(&report).unwrap();
    assert!(text.contains("Fraud Analysis"));
    assert!(text.contains("rule_large_amount"));
}

#[test]
fn analyze_rejects_bad_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_fixture(dir.path());

    let out = run(
        dir.path(),
        &["analyze", input.to_str().unwrap(), "--contamination", "0.9"],
    );
    assert!(!out.status.success());

    let out = run(
        dir.path(),
        &["analyze", input.to_str().unwrap(), "--detector", "lasso", "--no-learn"],
    );
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("unknown detector"));

    let out = run(dir.path(), &["analyze", "missing.csv", "--no-learn"]);
    assert!(!out.status.success());
}

#[test]
fn status_reports_learned_state() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_fixture(dir.path());
    let state = dir.path().join("state");

    let out = run(
        dir.path(),
        &[
            "analyze",
            input.to_str().unwrap(),
            "-d",
            "isolation_forest",
            "--state-dir",
            state.to_str().unwrap(),
        ],
    );
    assert!(out.status.success());

    let out = run(
        dir.path(),
        &["status", "--state-dir", state.to_str().unwrap(), "--format", "json"],
    );
    assert!(out.status.success());
    let doc: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert!(doc["status"]["patterns_learned"].is_u64());
    assert!(doc["insights"]["total_patterns"].is_u64());
}

#[test]
fn init_writes_config_once() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), &["init"]);
    assert!(out.status.success());

    let path = dir.path().join("fraudscope.toml");
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("[analysis]"));

    std::fs::write(&path, "[analysis]\nseed = 7\n").unwrap();
    assert!(run(dir.path(), &["init"]).status.success());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "[analysis]\nseed = 7\n");
}
