//! CLI command definitions and handlers

mod analyze;
mod init;
mod status;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::{load_engine_config, load_engine_config_file, EngineConfig};

/// Parse and validate workers count (1-64)
fn parse_workers(s: &str) -> Result<usize, String> {
    let n: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    if n == 0 {
        Err("workers must be at least 1".to_string())
    } else if n > 64 {
        Err("workers cannot exceed 64".to_string())
    } else {
        Ok(n)
    }
}

/// Parse contamination, accepting only (0, 0.5]
fn parse_contamination(s: &str) -> Result<f64, String> {
    let c: f64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    crate::config::validate_contamination(c).map_err(|e| e.to_string())?;
    Ok(c)
}

/// fraudscope - Ensemble fraud scoring for transaction batches
#[derive(Parser, Debug)]
#[command(name = "fraudscope")]
#[command(
    version,
    about = "Ensemble fraud scoring for transaction batches with pattern learning",
    after_help = "\
Examples:
  fraudscope analyze transactions.csv                  Score a batch
  fraudscope analyze tx.csv --format json -o out.json  JSON report for scripting
  fraudscope analyze tx.csv --detector isolation_forest --contamination 0.05
  fraudscope status                                    Show what has been learned
  fraudscope init                                      Write a fraudscope.toml"
)]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn", value_parser = ["error", "warn", "info", "debug", "trace"])]
    pub log_level: String,

    /// Number of parallel detector workers (1-64, default: auto)
    #[arg(long, global = true, value_parser = parse_workers)]
    pub workers: Option<usize>,

    /// Config file (default: ./fraudscope.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Score a CSV batch of transactions
    #[command(after_help = "\
Required columns: step, type, amount, nameOrig, oldbalanceOrg, newbalanceOrig,
nameDest, oldbalanceDest, newbalanceDest. Optional: isFraud, isFlaggedFraud.")]
    Analyze {
        /// CSV file to score
        input: PathBuf,

        /// Expected share of fraudulent rows, in (0, 0.5]
        #[arg(long, value_parser = parse_contamination)]
        contamination: Option<f64>,

        /// Technique to include (repeatable): isolation_forest, autoencoder, sequence
        #[arg(long = "detector", short = 'd')]
        detectors: Vec<String>,

        /// Output format: text, json
        #[arg(long, short = 'f', default_value = "text", value_parser = ["text", "json"])]
        format: String,

        /// Output file path (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Learning state directory
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Seed for sampling and model initialization
        #[arg(long)]
        seed: Option<u64>,

        /// Suspicious transactions to list
        #[arg(long, default_value = "10")]
        top: usize,

        /// Score without mining patterns or touching learning state
        #[arg(long)]
        no_learn: bool,
    },

    /// Show learned patterns and detection metrics
    Status {
        /// Learning state directory
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Output format: text, json
        #[arg(long, short = 'f', default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// Write a commented fraudscope.toml in the current directory
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Config file values, with global flags applied on top
fn resolve_config(cli: &Cli) -> EngineConfig {
    let mut config = match &cli.config {
        Some(path) => load_engine_config_file(path),
        None => load_engine_config(Path::new(".")),
    };
    if let Some(workers) = cli.workers {
        config.analysis.workers = workers;
    }
    config
}

/// Run the CLI with parsed arguments
pub fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli);
    match cli.command {
        Commands::Analyze {
            input,
            contamination,
            detectors,
            format,
            output,
            state_dir,
            seed,
            top,
            no_learn,
        } => analyze::run(
            config,
            analyze::AnalyzeArgs {
                input,
                contamination,
                detectors,
                format,
                output,
                state_dir,
                seed,
                top,
                no_learn,
            },
        ),
        Commands::Status { state_dir, format } => status::run(&config, state_dir, &format),
        Commands::Init { force } => init::run(Path::new("."), force),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_workers_bounds() {
        assert_eq!(parse_workers("4"), Ok(4));
        assert!(parse_workers("0").is_err());
        assert!(parse_workers("65").is_err());
        assert!(parse_workers("many").is_err());
    }

    #[test]
    fn test_parse_contamination_bounds() {
        assert_eq!(parse_contamination("0.05"), Ok(0.05));
        assert!(parse_contamination("0").is_err());
        assert!(parse_contamination("0.6").is_err());
    }

    #[test]
    fn test_analyze_flags() {
        let cli = Cli::try_parse_from([
            "fraudscope",
            "analyze",
            "tx.csv",
            "-d",
            "iforest",
            "-d",
            "sequence",
            "--format",
            "json",
            "--workers",
            "2",
        ])
        .unwrap();
        assert_eq!(cli.workers, Some(2));
        match cli.command {
            Commands::Analyze {
                input,
                detectors,
                format,
                ..
            } => {
                assert_eq!(input, PathBuf::from("tx.csv"));
                assert_eq!(detectors, vec!["iforest", "sequence"]);
                assert_eq!(format, "json");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_format() {
        assert!(Cli::try_parse_from(["fraudscope", "analyze", "tx.csv", "-f", "xml"]).is_err());
    }
}
