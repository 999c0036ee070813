//! CLI argument parsing for cribar

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Operation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Generate synthetic test execution history
    GenerateHistory,
    /// Train the failure-prediction model
    Train,
    /// Select tests for the current change set
    Select,
    /// Generate a Markdown priority report
    Report,
}

#[derive(Parser, Debug)]
#[command(name = "cribar")]
#[command(version)]
#[command(about = "Change-impact-aware predictive test selection", long_about = None)]
pub struct Cli {
    /// Operation mode
    #[arg(long = "mode", value_enum)]
    pub mode: Mode,

    /// Number of test runs to generate (generate-history mode)
    #[arg(long = "num-runs", default_value = "100")]
    pub num_runs: usize,

    /// Path to the test history file (overrides the configured ledger)
    #[arg(long = "history-file", value_name = "FILE")]
    pub history_file: Option<PathBuf>,

    /// Impact threshold for reporting affected tests
    #[arg(long = "threshold", value_name = "SCORE")]
    pub threshold: Option<f64>,

    /// Explicit changed files (auto-detected from version control if omitted)
    #[arg(long = "changed-files", num_args = 0.., value_name = "FILE")]
    pub changed_files: Option<Vec<String>>,

    /// Output file for reports
    #[arg(long = "output", default_value = "test_selection_report.md")]
    pub output: PathBuf,

    /// Path to the configuration file
    #[arg(long = "config", default_value = "cribar.toml")]
    pub config: PathBuf,

    /// Seed for synthetic history generation
    #[arg(long = "seed", value_name = "SEED")]
    pub seed: Option<u64>,

    /// Enable debug tracing to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}
