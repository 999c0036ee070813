//! Synthetic execution-history generation
//!
//! Produces a plausible ledger for bootstrapping and demos: a fixed
//! catalogue of test files and cases, per-run change sets, and failure
//! probabilities that rise when a test's mapped source file changed and for
//! flaky tests. Derived columns are appended before persistence, matching
//! the ledger schema.

use crate::history::{ExecutionRecord, HistoryError, Ledger};
use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::path::Path;

const TEST_FILES: [&str; 4] = [
    "tests/sample_project/test_auth.py",
    "tests/sample_project/test_database.py",
    "tests/sample_project/test_api.py",
    "tests/sample_project/test_utils.py",
];

const AUTH_CASES: [&str; 11] = [
    "test_register_user_success",
    "test_register_user_duplicate_username",
    "test_register_user_invalid_email",
    "test_register_user_weak_password",
    "test_login_success",
    "test_login_invalid_username",
    "test_login_wrong_password",
    "test_login_attempts_lockout",
    "test_logout_success",
    "test_validate_session_valid",
    "test_reset_password_success",
];

const DATABASE_CASES: [&str; 11] = [
    "test_create_table_success",
    "test_create_table_duplicate",
    "test_insert_record",
    "test_find_by_id_success",
    "test_find_all",
    "test_update_record",
    "test_delete_record",
    "test_query_with_filter",
    "test_count",
    "test_export_to_json",
    "test_import_from_json",
];

const API_CASES: [&str; 9] = [
    "test_client_initialization",
    "test_set_auth_token",
    "test_get_request",
    "test_post_request",
    "test_put_request",
    "test_delete_request",
    "test_limiter_initialization",
    "test_can_make_request_under_limit",
    "test_api_error_initialization",
];

const UTILS_CASES: [&str; 12] = [
    "test_valid_email",
    "test_sanitize_clean_string",
    "test_calculate_percentage_normal",
    "test_format_usd",
    "test_chunk_list_even",
    "test_flatten_nested_dict",
    "test_merge_two_dicts",
    "test_remove_duplicates_with_dupes",
    "test_is_palindrome_true",
    "test_truncate_long_string",
    "test_parse_query_string",
    "test_to_snake_case",
];

/// Metadata written alongside the generated ledger
#[derive(Debug, Serialize)]
struct GenerationMetadata {
    generation_date: String,
    num_runs: usize,
    num_tests: usize,
    num_test_files: usize,
    num_source_files: usize,
    total_records: usize,
    overall_pass_rate: f64,
    test_files: Vec<String>,
    source_files: Vec<String>,
}

/// Generates synthetic test execution history
#[derive(Debug)]
pub struct HistoryGenerator {
    rng: StdRng,
}

impl HistoryGenerator {
    /// Seeded generator; a fixed seed reproduces the ledger exactly
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generator seeded from the OS
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    fn cases_for(test_file: &str) -> &'static [&'static str] {
        match test_file {
            f if f.ends_with("test_auth.py") => &AUTH_CASES,
            f if f.ends_with("test_database.py") => &DATABASE_CASES,
            f if f.ends_with("test_api.py") => &API_CASES,
            _ => &UTILS_CASES,
        }
    }

    fn source_for(test_file: &str) -> String {
        test_file.replace("test_", "")
    }

    /// Generate `num_runs` runs over the fixed catalogue
    pub fn generate(&mut self, num_runs: usize) -> Ledger {
        let source_files: Vec<String> = TEST_FILES.iter().map(|f| Self::source_for(f)).collect();

        let all_cases: Vec<&str> = TEST_FILES.iter().flat_map(|f| Self::cases_for(f)).copied().collect();
        let num_flaky = (all_cases.len() / 10).max(1);
        let flaky: Vec<&str> = all_cases
            .choose_multiple(&mut self.rng, num_flaky)
            .copied()
            .collect();

        let start_date = Utc::now() - Duration::days(90);
        let mut ledger = Ledger::new();

        for run_id in 1..=num_runs as u64 {
            let run_date = start_date + Duration::milliseconds((run_id as f64 * 0.9 * 86_400_000.0) as i64);

            let num_changed = self.rng.gen_range(1..=3);
            let changed: Vec<String> = source_files
                .choose_multiple(&mut self.rng, num_changed)
                .cloned()
                .collect();
            let files_changed = changed.join(",");

            for test_file in TEST_FILES {
                let source_file = Self::source_for(test_file);
                let source_changed = changed.contains(&source_file);

                for test_name in Self::cases_for(test_file) {
                    let is_flaky = flaky.contains(test_name);
                    let failure_prob =
                        self.failure_probability(source_changed, is_flaky);
                    let passed = self.rng.gen::<f64>() > failure_prob;

                    let base_time = self.rng.gen_range(0.01..0.5);
                    let execution_time = if passed {
                        base_time
                    } else {
                        base_time * self.rng.gen_range(1.2..2.0)
                    };

                    let (lines_changed, functions_changed) = if source_changed {
                        (self.rng.gen_range(5..=100), self.rng.gen_range(1..=10))
                    } else {
                        (0, 0)
                    };

                    ledger.push(ExecutionRecord {
                        run_id,
                        timestamp: run_date.to_rfc3339(),
                        test_file: test_file.to_string(),
                        test_name: (*test_name).to_string(),
                        full_test_name: ExecutionRecord::qualified_id(test_file, test_name),
                        source_file: source_file.clone(),
                        passed,
                        execution_time: round3(execution_time),
                        coverage: round3(self.rng.gen_range(0.7..0.95)),
                        lines_changed,
                        functions_changed,
                        files_changed: files_changed.clone(),
                        is_flaky,
                        historical_failure_rate: None,
                        recent_failures: None,
                        avg_execution_time: None,
                        test_coupling: None,
                    });
                }
            }

            if run_id % 10 == 0 {
                tracing::debug!(run_id, num_runs, "generated runs");
            }
        }

        append_derived_columns(&mut ledger);
        ledger
    }

    fn failure_probability(&mut self, source_changed: bool, is_flaky: bool) -> f64 {
        let mut prob: f64 = 0.05;
        if source_changed {
            prob += 0.15;
        }
        if is_flaky {
            prob += 0.20;
        }
        prob += self.rng.gen_range(-0.02..0.02);
        prob.clamp(0.0, 1.0)
    }
}

impl Default for HistoryGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Fill the derived ledger columns from per-test aggregates
fn append_derived_columns(ledger: &mut Ledger) {
    use std::collections::HashMap;

    struct Aggregate {
        failure_rate: f64,
        recent_failures: f64,
        avg_execution_time: f64,
        test_coupling: f64,
    }

    let mut aggregates: HashMap<String, Aggregate> = HashMap::new();
    for (test_id, history) in ledger.by_test() {
        let n = history.len() as f64;
        let failures = history.iter().filter(|r| !r.passed).count() as f64;
        let recent = &history[history.len().saturating_sub(crate::features::RECENT_WINDOW)..];
        let recent_failures = recent.iter().filter(|r| !r.passed).count() as f64;
        let avg_time = history.iter().map(|r| r.execution_time).sum::<f64>() / n;
        let coupled = history
            .iter()
            .filter(|r| r.lines_changed > 0 && !r.passed)
            .count() as f64;

        aggregates.insert(
            test_id.to_string(),
            Aggregate {
                failure_rate: failures / n,
                recent_failures,
                avg_execution_time: avg_time,
                test_coupling: coupled / n,
            },
        );
    }

    let records = std::mem::take(ledger);
    let mut updated = Ledger::new();
    for mut record in records.records().iter().cloned() {
        if let Some(agg) = aggregates.get(&record.full_test_name) {
            record.historical_failure_rate = Some(agg.failure_rate);
            record.recent_failures = Some(agg.recent_failures);
            record.avg_execution_time = Some(agg.avg_execution_time);
            record.test_coupling = Some(agg.test_coupling);
        }
        updated.push(record);
    }
    *ledger = updated;
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Generate a ledger, persist it, and write the metadata JSON next to it
pub fn generate_history(
    num_runs: usize,
    history_file: &Path,
    seed: Option<u64>,
) -> Result<Ledger, HistoryError> {
    let mut generator = match seed {
        Some(seed) => HistoryGenerator::with_seed(seed),
        None => HistoryGenerator::new(),
    };
    let ledger = generator.generate(num_runs);
    ledger.save(history_file)?;

    let metadata = GenerationMetadata {
        generation_date: Utc::now().to_rfc3339(),
        num_runs,
        num_tests: ledger.test_ids().len(),
        num_test_files: TEST_FILES.len(),
        num_source_files: TEST_FILES.len(),
        total_records: ledger.len(),
        overall_pass_rate: ledger.pass_rate(),
        test_files: TEST_FILES.iter().map(|s| (*s).to_string()).collect(),
        source_files: TEST_FILES
            .iter()
            .map(|f| HistoryGenerator::source_for(f))
            .collect(),
    };
    let metadata_path = history_file.with_file_name("metadata.json");
    let json = serde_json::to_string_pretty(&metadata)
        .map_err(|e| HistoryError::Io(std::io::Error::other(e)))?;
    std::fs::write(&metadata_path, json)?;

    tracing::info!(
        records = ledger.len(),
        pass_rate = %format!("{:.2}%", ledger.pass_rate() * 100.0),
        path = %history_file.display(),
        "generated test history"
    );
    Ok(ledger)
}
