//! Append-only ledger of historical test executions
//!
//! One row per test per run, persisted as CSV. Derived columns
//! (`historical_failure_rate`, `recent_failures`, `avg_execution_time`,
//! `test_coupling`) are appended before persistence and tolerated as absent
//! when loading ledgers produced by older tooling.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Errors raised by ledger I/O
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse ledger: {0}")]
    Csv(#[from] csv::Error),

    #[error("no historical data available")]
    NoHistoricalData,
}

/// A single historical test execution
///
/// Records are append-only and never mutated after the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub run_id: u64,
    /// ISO-8601 run timestamp
    pub timestamp: String,
    pub test_file: String,
    pub test_name: String,
    /// Qualified id: `<test_file>::<test_name>`
    pub full_test_name: String,
    pub source_file: String,
    pub passed: bool,
    /// Wall-clock execution time in seconds
    pub execution_time: f64,
    /// Coverage fraction in [0, 1]
    pub coverage: f64,
    pub lines_changed: u64,
    pub functions_changed: u64,
    /// Comma-delimited list of files changed in this run
    pub files_changed: String,
    pub is_flaky: bool,

    // Derived columns, appended before persistence
    #[serde(default)]
    pub historical_failure_rate: Option<f64>,
    #[serde(default)]
    pub recent_failures: Option<f64>,
    #[serde(default)]
    pub avg_execution_time: Option<f64>,
    #[serde(default)]
    pub test_coupling: Option<f64>,
}

impl ExecutionRecord {
    /// Qualified test id for a file/name pair
    pub fn qualified_id(test_file: &str, test_name: &str) -> String {
        format!("{test_file}::{test_name}")
    }

    /// Files changed in this run, split out of the delimited column
    pub fn changed_files(&self) -> Vec<&str> {
        self.files_changed
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .collect()
    }
}

/// In-memory snapshot of the execution ledger
///
/// Row order is preserved from the file, which is chronological per test; a
/// test's view of its own history is therefore oldest-to-newest.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    records: Vec<ExecutionRecord>,
}

impl Ledger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing record set
    pub fn from_records(records: Vec<ExecutionRecord>) -> Self {
        Self { records }
    }

    /// Load a ledger from a CSV file
    pub fn load(path: &Path) -> Result<Self, HistoryError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for row in reader.deserialize() {
            let record: ExecutionRecord = row?;
            records.push(record);
        }
        tracing::debug!(path = %path.display(), records = records.len(), "loaded ledger");
        Ok(Self { records })
    }

    /// Persist the ledger, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<(), HistoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Append one execution record
    pub fn push(&mut self, record: ExecutionRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[ExecutionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Qualified test ids in first-appearance (discovery) order
    pub fn test_ids(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut ids = Vec::new();
        for record in &self.records {
            if seen.insert(record.full_test_name.as_str()) {
                ids.push(record.full_test_name.clone());
            }
        }
        ids
    }

    /// All records for one test, in ledger (chronological) order
    pub fn records_for(&self, test_id: &str) -> Vec<&ExecutionRecord> {
        self.records
            .iter()
            .filter(|r| r.full_test_name == test_id)
            .collect()
    }

    /// Group records by qualified test id, preserving chronological order
    pub fn by_test(&self) -> HashMap<&str, Vec<&ExecutionRecord>> {
        let mut groups: HashMap<&str, Vec<&ExecutionRecord>> = HashMap::new();
        for record in &self.records {
            groups
                .entry(record.full_test_name.as_str())
                .or_default()
                .push(record);
        }
        groups
    }

    /// Overall pass rate across all records
    pub fn pass_rate(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let passed = self.records.iter().filter(|r| r.passed).count();
        passed as f64 / self.records.len() as f64
    }
}
