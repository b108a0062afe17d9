//! Analyze command - score a CSV batch

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt::Write as _;
use std::path::PathBuf;

use crate::config::EngineConfig;
use crate::detectors::DetectorRegistry;
use crate::ingest::load_csv;
use crate::learning::LearningStore;
use crate::pipeline::{BatchReport, FraudPipeline};

#[derive(Debug)]
pub(super) struct AnalyzeArgs {
    pub input: PathBuf,
    pub contamination: Option<f64>,
    pub detectors: Vec<String>,
    pub format: String,
    pub output: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub seed: Option<u64>,
    pub top: usize,
    pub no_learn: bool,
}

fn create_bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓▒░  ")
}

/// Run the analyze command
pub(super) fn run(mut config: EngineConfig, args: AnalyzeArgs) -> Result<()> {
    if let Some(c) = args.contamination {
        config.analysis.contamination = c;
    }
    if let Some(seed) = args.seed {
        config.analysis.seed = seed;
    }
    if !args.detectors.is_empty() {
        config.analysis.detectors = DetectorRegistry::parse_names(&args.detectors)?;
    }
    if let Some(dir) = args.state_dir {
        config.learning.state_dir = Some(dir);
    }
    if args.no_learn {
        config.learning.enabled = false;
    }
    config.validate()?;

    let store = if config.learning.enabled {
        LearningStore::open(&config.learning.resolved_state_dir())
            .with_max_history(config.learning.max_pattern_history)
    } else {
        LearningStore::in_memory()
    };

    let table = load_csv(&args.input)
        .with_context(|| format!("Failed to load {}", args.input.display()))?;

    let bar = ProgressBar::new(config.analysis.detectors.len() as u64);
    bar.set_style(create_bar_style());
    bar.set_message("Running detectors...");
    let progress = bar.clone();

    let mut pipeline = FraudPipeline::new(config, store).with_progress(move |name, done, _| {
        progress.set_position(done as u64);
        progress.set_message(format!("{} done", name));
    });
    let report = pipeline.analyze(&table);
    bar.finish_and_clear();
    let report = report?;

    let rendered = match args.format.as_str() {
        "json" => serde_json::to_string_pretty(&report)?,
        _ => render_text(&report, args.top),
    };

    match &args.output {
        Some(path) => {
            std::fs::write(path, &rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "{} Report written to {}",
                style("✓").green(),
                style(path.display()).cyan()
            );
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

/// Human-readable batch summary
pub(super) fn render_text(report: &BatchReport, top: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}\n", style("Fraud Analysis").bold());
    let _ = writeln!(out, "  Batch:       {}", style(report.batch_id).dim());
    if report.input_rows != report.rows {
        let _ = writeln!(
            out,
            "  Rows:        {} (sampled from {})",
            report.rows, report.input_rows
        );
    } else {
        let _ = writeln!(out, "  Rows:        {}", report.rows);
    }
    let _ = writeln!(
        out,
        "  Suspicious:  {} (score > {:.4})",
        style(report.suspicious_count).red().bold(),
        report.threshold
    );
    let _ = writeln!(
        out,
        "  Risk:        {} high, {} medium, {} low",
        style(report.risk_distribution.high).red(),
        style(report.risk_distribution.medium).yellow(),
        style(report.risk_distribution.low).green()
    );
    let _ = writeln!(out, "  Elapsed:     {}ms", report.elapsed_ms);

    let _ = writeln!(out, "\n{}", style("Models").bold());
    if report.fusion_path.is_fallback() {
        let _ = writeln!(
            out,
            "  {} ensemble unavailable, scores from {}",
            style("[!!]").yellow(),
            report.fusion_path
        );
    }
    for (name, c) in &report.contributions {
        let _ = writeln!(
            out,
            "  {:<28} weight {:.2} ({:>5.1}%)  anomalies {:>5}  mean score {:.4}",
            style(name).cyan(),
            c.weight,
            c.contribution_percentage,
            c.anomaly_count,
            c.mean_score
        );
    }
    for failure in &report.detector_failures {
        let _ = writeln!(
            out,
            "  {:<28} {} {}",
            style(&failure.detector).dim(),
            style("failed:").yellow(),
            failure.error
        );
    }

    let _ = writeln!(out, "\n{}", style("Rules").bold());
    for (rule, count) in &report.rule_counts {
        let _ = writeln!(out, "  {:<28} {:>6} rows", rule, count);
    }

    let suspicious = report.top_suspicious(top);
    if !suspicious.is_empty() {
        let _ = writeln!(out, "\n{}", style(format!("Top {} suspicious", suspicious.len())).bold());
        for s in &suspicious {
            let _ = writeln!(
                out,
                "  #{:<6} {:.4} {:<6} {:<9} {:>14.2}  {} -> {}",
                s.index,
                s.score,
                s.risk.to_string(),
                s.kind,
                s.amount,
                s.name_orig,
                s.name_dest
            );
            let _ = writeln!(out, "          {}", style(&s.explanation).dim());
        }
    }

    if let Some(learning) = &report.learning {
        let _ = writeln!(out, "\n{}", style("Learning").bold());
        match &learning.skipped {
            Some(reason) => {
                let _ = writeln!(out, "  {} skipped: {}", style("[--]").dim(), reason);
            }
            None => {
                let _ = writeln!(
                    out,
                    "  {} new patterns, {} adaptive rules",
                    learning.new_patterns.len(),
                    learning.adaptive_rules.len()
                );
                for p in &learning.new_patterns {
                    let _ = writeln!(
                        out,
                        "    {} [{}] {} (confidence {:.2})",
                        style(&p.pattern_id).cyan(),
                        p.detection_method,
                        p.characteristics,
                        p.confidence
                    );
                }
                if let Some(rate) = learning.performance.detection_rate {
                    let _ = writeln!(out, "  Detection rate:       {:.1}%", rate * 100.0);
                }
                if let Some(rate) = learning.performance.false_positive_rate {
                    let _ = writeln!(out, "  False positive rate:  {:.1}%", rate * 100.0);
                }
                if !learning.persisted {
                    let _ = writeln!(out, "  {} state not persisted", style("[!!]").yellow());
                }
            }
        }
    }
    out
}
