//! Init command - write a starter fraudscope.toml

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use crate::config::{CONFIG_FILENAME, DEFAULT_CONFIG_TEMPLATE};

/// Run the init command
pub(super) fn run(dir: &Path, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);
    if config_path.exists() && !force {
        println!(
            "{} Config already exists at {} (use --force to overwrite)",
            style("✓").green(),
            style(config_path.display()).cyan()
        );
        return Ok(());
    }

    std::fs::write(&config_path, DEFAULT_CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!(
        "{} Created {}",
        style("✓").green(),
        style(config_path.display()).cyan()
    );
    Ok(())
}
