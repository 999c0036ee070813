//! Feature derivation from the execution ledger
//!
//! Produces a fixed-schema vector per test. The feature ordering is pinned:
//! training and inference must see identical schemas, and the persisted model
//! artifact carries the ordering for verification at load time.
//!
//! Windowed and ratio features use one definition everywhere: `recent`
//! aggregates look at the trailing [`RECENT_WINDOW`] runs by recency, and
//! `test_coupling` is the aggregate ratio of runs where the code changed and
//! the test failed.

use crate::history::ExecutionRecord;

/// Number of trailing runs considered "recent"
pub const RECENT_WINDOW: usize = 10;

/// Sentinel for tests that have never failed
pub const NEVER_FAILED: f64 = 999.0;

/// Pinned feature ordering shared by training and inference
pub const FEATURE_NAMES: [&str; 13] = [
    "historical_failure_rate",
    "recent_failures",
    "avg_execution_time",
    "execution_time_variance",
    "code_change_frequency",
    "lines_changed",
    "functions_changed",
    "test_coupling",
    "is_flaky",
    "test_age",
    "coverage",
    "failure_streak",
    "time_since_last_failure",
];

/// One test's derived feature vector
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub historical_failure_rate: f64,
    pub recent_failures: f64,
    pub avg_execution_time: f64,
    pub execution_time_variance: f64,
    pub code_change_frequency: f64,
    pub lines_changed: f64,
    pub functions_changed: f64,
    pub test_coupling: f64,
    pub is_flaky: f64,
    pub test_age: f64,
    pub coverage: f64,
    pub failure_streak: f64,
    pub time_since_last_failure: f64,
}

impl FeatureVector {
    /// Values in pinned [`FEATURE_NAMES`] order
    pub fn to_array(&self) -> [f64; 13] {
        [
            self.historical_failure_rate,
            self.recent_failures,
            self.avg_execution_time,
            self.execution_time_variance,
            self.code_change_frequency,
            self.lines_changed,
            self.functions_changed,
            self.test_coupling,
            self.is_flaky,
            self.test_age,
            self.coverage,
            self.failure_streak,
            self.time_since_last_failure,
        ]
    }

    /// Defaults for a test with no recorded history
    pub fn no_history(lines_changed: u64, functions_changed: u64) -> Self {
        Self {
            historical_failure_rate: 0.05,
            recent_failures: 0.0,
            avg_execution_time: 0.1,
            execution_time_variance: 0.0,
            code_change_frequency: 0.0,
            lines_changed: lines_changed as f64,
            functions_changed: functions_changed as f64,
            test_coupling: 0.0,
            is_flaky: 0.0,
            test_age: 0.0,
            coverage: 0.8,
            failure_streak: 0.0,
            time_since_last_failure: NEVER_FAILED,
        }
    }
}

/// Derives feature vectors from per-test ledger views
#[derive(Debug, Default)]
pub struct FeatureBuilder;

impl FeatureBuilder {
    /// Build the feature vector for one test
    ///
    /// `history` is the test's records in chronological order;
    /// `lines_changed` / `functions_changed` describe the current request
    /// (zero when unknown).
    pub fn for_test(
        history: &[&ExecutionRecord],
        lines_changed: u64,
        functions_changed: u64,
    ) -> FeatureVector {
        if history.is_empty() {
            return FeatureVector::no_history(lines_changed, functions_changed);
        }

        let n = history.len();
        let n_f = n as f64;

        let failures = history.iter().filter(|r| !r.passed).count();
        let historical_failure_rate = failures as f64 / n_f;

        let recent = &history[n.saturating_sub(RECENT_WINDOW)..];
        let recent_failures = recent.iter().filter(|r| !r.passed).count() as f64;

        let avg_execution_time =
            history.iter().map(|r| r.execution_time).sum::<f64>() / n_f;
        let execution_time_variance = sample_stddev(
            history.iter().map(|r| r.execution_time),
            n,
            avg_execution_time,
        );

        let changed_runs = history.iter().filter(|r| r.lines_changed > 0).count();
        let code_change_frequency = changed_runs as f64 / n_f;

        let coupled_runs = history
            .iter()
            .filter(|r| r.lines_changed > 0 && !r.passed)
            .count();
        let test_coupling = coupled_runs as f64 / n_f;

        let is_flaky = if history[n - 1].is_flaky { 1.0 } else { 0.0 };

        let coverage = history.iter().map(|r| r.coverage).sum::<f64>() / n_f;

        let failure_streak = recent
            .iter()
            .rev()
            .take_while(|r| !r.passed)
            .count() as f64;

        let time_since_last_failure = match history.iter().rposition(|r| !r.passed) {
            Some(last) => (n - last - 1) as f64,
            None => NEVER_FAILED,
        };

        FeatureVector {
            historical_failure_rate,
            recent_failures,
            avg_execution_time,
            execution_time_variance,
            code_change_frequency,
            lines_changed: lines_changed as f64,
            functions_changed: functions_changed as f64,
            test_coupling,
            is_flaky,
            test_age: n_f,
            coverage,
            failure_streak,
            time_since_last_failure,
        }
    }
}

/// Sample standard deviation; 0 with fewer than 2 samples
fn sample_stddev(values: impl Iterator<Item = f64>, n: usize, mean: f64) -> f64 {
    if n < 2 {
        return 0.0;
    }
    let sum_sq: f64 = values.map(|v| (v - mean).powi(2)).sum();
    (sum_sq / (n as f64 - 1.0)).sqrt()
}
