//! Status command - show what the learning loop has accumulated

use anyhow::Result;
use chrono::Utc;
use console::style;
use serde_json::json;
use std::path::PathBuf;

use crate::config::EngineConfig;
use crate::learning::LearningStore;

/// Run the status command
pub(super) fn run(config: &EngineConfig, state_dir: Option<PathBuf>, format: &str) -> Result<()> {
    let dir = state_dir.unwrap_or_else(|| config.learning.resolved_state_dir());
    let store = LearningStore::open(&dir);
    let status = store.system_status();
    let insights = store.pattern_insights(Utc::now());

    if format == "json" {
        let doc = json!({
            "state_dir": dir,
            "status": status,
            "insights": insights,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("\n{}\n", style("fraudscope Status").bold());
    println!("  State: {}", style(dir.display()).cyan());
    if store.path().is_some_and(|p| p.exists()) {
        println!("  {} Learning state found", style("[OK]").green());
    } else {
        println!(
            "  {} No learning state yet. Run {}",
            style("[--]").dim(),
            style("fraudscope analyze <file.csv>").cyan()
        );
    }
    println!();
    for line in status.to_string().lines() {
        println!("  {}", line);
    }

    if insights.total_patterns > 0 {
        println!("\n{}", style("Patterns").bold());
        println!(
            "  {} total, {} in the last 7 days, average quality {:.3}",
            style(insights.total_patterns).cyan(),
            style(insights.recent_patterns).cyan(),
            insights.average_quality
        );
        for (method, count) in &insights.by_method {
            println!("    {:<22} {}", method.as_str(), count);
        }
    }
    println!();
    Ok(())
}
