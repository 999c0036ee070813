//! Test prioritization and constrained suite selection
//!
//! Canonical priority score: 0.4·failure probability + 0.3·impact +
//! 0.15·historical failure rate + 0.15·recent-failure ratio. Tests with no
//! history score exactly 0.5 with reason "New test". The ranked list is a
//! total order by score descending; ties keep discovery order (stable sort).

use crate::features::RECENT_WINDOW;
use crate::history::Ledger;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Score floor for tests beyond the guaranteed minimum
const SCORE_FLOOR: f64 = 0.3;

/// A test with its computed selection priority
#[derive(Debug, Clone, Serialize)]
pub struct TestPriority {
    pub test_name: String,
    pub priority_score: f64,
    pub failure_probability: f64,
    /// Mean historical execution time in seconds
    pub execution_time: f64,
    pub recent_failures: u64,
    pub lines_changed: u64,
    pub reason: String,
}

/// Counts and timing for one selection decision
#[derive(Debug, Clone, Serialize)]
pub struct SelectionSummary {
    pub total_tests: usize,
    pub selected_tests: usize,
    pub reduction_percentage: f64,
    pub total_execution_time_all: f64,
    pub total_execution_time_selected: f64,
    pub time_saved: f64,
    pub time_reduction_percentage: f64,
    /// Selected tests with score > 0.7
    pub high_priority_count: usize,
    /// Selected tests with score in [0.3, 0.7]
    pub medium_priority_count: usize,
    /// Selected tests with score < 0.3
    pub low_priority_count: usize,
}

/// Ranks tests and selects a resource-bounded subset
#[derive(Debug, Clone)]
pub struct Prioritizer {
    min_tests: usize,
    max_tests: usize,
}

impl Prioritizer {
    pub fn new(min_tests: usize, max_tests: usize) -> Self {
        Self {
            min_tests,
            max_tests,
        }
    }

    /// Rank all tests by the canonical priority score
    pub fn prioritize(
        &self,
        test_ids: &[String],
        failure_probabilities: &HashMap<String, f64>,
        ledger: &Ledger,
        impact_scores: &BTreeMap<String, f64>,
    ) -> Vec<TestPriority> {
        let mut priorities: Vec<TestPriority> = test_ids
            .iter()
            .map(|test_id| {
                self.priority_for(test_id, failure_probabilities, ledger, impact_scores)
            })
            .collect();

        // Stable sort keeps discovery order for equal scores
        priorities.sort_by(|a, b| {
            b.priority_score
                .partial_cmp(&a.priority_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        priorities
    }

    fn priority_for(
        &self,
        test_id: &str,
        failure_probabilities: &HashMap<String, f64>,
        ledger: &Ledger,
        impact_scores: &BTreeMap<String, f64>,
    ) -> TestPriority {
        let history = ledger.records_for(test_id);

        if history.is_empty() {
            return TestPriority {
                test_name: test_id.to_string(),
                priority_score: 0.5,
                failure_probability: failure_probabilities
                    .get(test_id)
                    .copied()
                    .unwrap_or(0.5),
                execution_time: 0.1,
                recent_failures: 0,
                lines_changed: 0,
                reason: "New test".to_string(),
            };
        }

        let n = history.len();
        let failure_probability = failure_probabilities.get(test_id).copied().unwrap_or(0.0);

        // Impact is keyed by the owning test file
        let test_file = test_id.split("::").next().unwrap_or("");
        let impact = impact_scores.get(test_file).copied().unwrap_or(0.0);

        let failures = history.iter().filter(|r| !r.passed).count();
        let historical_failure_rate = failures as f64 / n as f64;

        let recent = &history[n.saturating_sub(RECENT_WINDOW)..];
        let recent_failures = recent.iter().filter(|r| !r.passed).count() as u64;
        let recent_ratio = (recent_failures as f64 / 5.0).min(1.0);

        let priority_score = failure_probability * 0.4
            + impact * 0.3
            + historical_failure_rate * 0.15
            + recent_ratio * 0.15;

        let execution_time =
            history.iter().map(|r| r.execution_time).sum::<f64>() / n as f64;
        let lines_changed = history[n - 1].lines_changed;

        TestPriority {
            test_name: test_id.to_string(),
            priority_score,
            failure_probability,
            execution_time,
            recent_failures,
            lines_changed,
            reason: priority_reason(
                failure_probability,
                impact,
                historical_failure_rate,
                recent_ratio,
            ),
        }
    }

    /// Select the suite under min/max and optional time-budget constraints
    ///
    /// The top `min_tests` are always included; afterwards tests are taken in
    /// rank order while the cap and budget allow, subject to the score floor.
    pub fn select_optimal_suite(
        &self,
        priorities: &[TestPriority],
        time_budget: Option<f64>,
    ) -> Vec<TestPriority> {
        let mut selected = Vec::new();
        let mut total_time = 0.0;

        for (rank, priority) in priorities.iter().enumerate() {
            if rank < self.min_tests {
                selected.push(priority.clone());
                total_time += priority.execution_time;
                continue;
            }

            if selected.len() >= self.max_tests {
                break;
            }

            if let Some(budget) = time_budget {
                if total_time + priority.execution_time > budget {
                    break;
                }
            }

            if priority.priority_score >= SCORE_FLOOR {
                selected.push(priority.clone());
                total_time += priority.execution_time;
            }
        }

        selected
    }

    /// Summarize a selection against the full ranked list
    pub fn selection_summary(
        &self,
        all_tests: &[TestPriority],
        selected: &[TestPriority],
    ) -> SelectionSummary {
        let total_time_all: f64 = all_tests.iter().map(|t| t.execution_time).sum();
        let total_time_selected: f64 = selected.iter().map(|t| t.execution_time).sum();
        let time_saved = total_time_all - total_time_selected;

        SelectionSummary {
            total_tests: all_tests.len(),
            selected_tests: selected.len(),
            reduction_percentage: if all_tests.is_empty() {
                0.0
            } else {
                (1.0 - selected.len() as f64 / all_tests.len() as f64) * 100.0
            },
            total_execution_time_all: total_time_all,
            total_execution_time_selected: total_time_selected,
            time_saved,
            time_reduction_percentage: if total_time_all > 0.0 {
                time_saved / total_time_all * 100.0
            } else {
                0.0
            },
            high_priority_count: selected.iter().filter(|t| t.priority_score > 0.7).count(),
            medium_priority_count: selected
                .iter()
                .filter(|t| (0.3..=0.7).contains(&t.priority_score))
                .count(),
            low_priority_count: selected.iter().filter(|t| t.priority_score < 0.3).count(),
        }
    }
}

/// Dominant unweighted factor, when it clears 0.5; first wins on ties
fn priority_reason(
    failure_probability: f64,
    impact: f64,
    historical_rate: f64,
    recent_ratio: f64,
) -> String {
    let factors = [
        ("High failure risk", failure_probability),
        ("Code changes", impact),
        ("Historical failures", historical_rate),
        ("Recent failures", recent_ratio),
    ];

    let mut best = factors[0];
    for factor in &factors[1..] {
        if factor.1 > best.1 {
            best = *factor;
        }
    }

    if best.1 > 0.5 {
        best.0.to_string()
    } else {
        "General testing".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ExecutionRecord;

    fn record(run_id: u64, test_file: &str, test: &str, passed: bool) -> ExecutionRecord {
        ExecutionRecord {
            run_id,
            timestamp: "2026-01-01T00:00:00+00:00".to_string(),
            test_file: test_file.to_string(),
            test_name: test.to_string(),
            full_test_name: format!("{test_file}::{test}"),
            source_file: test_file.replace("test_", "").to_string(),
            passed,
            execution_time: 0.2,
            coverage: 0.9,
            lines_changed: 0,
            functions_changed: 0,
            files_changed: String::new(),
            is_flaky: false,
            historical_failure_rate: None,
            recent_failures: None,
            avg_execution_time: None,
            test_coupling: None,
        }
    }

    fn priority(test: &str, score: f64, time: f64) -> TestPriority {
        TestPriority {
            test_name: test.to_string(),
            priority_score: score,
            failure_probability: score,
            execution_time: time,
            recent_failures: 0,
            lines_changed: 0,
            reason: "General testing".to_string(),
        }
    }

    #[test]
    fn test_impacted_test_outranks_unaffected() {
        // Two tests, same failure history; only one is impacted
        let mut ledger = Ledger::new();
        for run in 1..=3 {
            ledger.push(record(run, "tests/test_auth.py", "test_login", run != 2));
            ledger.push(record(run, "tests/test_api.py", "test_get", run != 2));
        }

        let mut impact = BTreeMap::new();
        impact.insert("tests/test_auth.py".to_string(), 1.0);

        let test_ids = ledger.test_ids();
        let prioritizer = Prioritizer::new(1, 100);
        let ranked = prioritizer.prioritize(&test_ids, &HashMap::new(), &ledger, &impact);

        assert_eq!(ranked[0].test_name, "tests/test_auth.py::test_login");
        // 0.3 * 1.0 + 0.15 * (1/3) + 0.15 * (1/5) = 0.38
        assert!((ranked[0].priority_score - 0.38).abs() < 1e-9);
        // Unaffected: 0.15 * (1/3) + 0.15 * (1/5) = 0.08
        assert!((ranked[1].priority_score - 0.08).abs() < 1e-9);
    }

    #[test]
    fn test_new_test_scores_half() {
        let ledger = Ledger::new();
        let prioritizer = Prioritizer::new(1, 100);
        let ranked = prioritizer.prioritize(
            &["tests/test_new.py::test_fresh".to_string()],
            &HashMap::new(),
            &ledger,
            &BTreeMap::new(),
        );

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].priority_score, 0.5);
        assert_eq!(ranked[0].reason, "New test");
        assert_eq!(ranked[0].execution_time, 0.1);
    }

    #[test]
    fn test_scores_bounded() {
        let mut ledger = Ledger::new();
        for run in 1..=10 {
            ledger.push(record(run, "tests/test_a.py", "test_x", false));
        }

        let mut probs = HashMap::new();
        probs.insert("tests/test_a.py::test_x".to_string(), 1.0);
        let mut impact = BTreeMap::new();
        impact.insert("tests/test_a.py".to_string(), 1.0);

        let prioritizer = Prioritizer::new(1, 100);
        let ranked =
            prioritizer.prioritize(&ledger.test_ids(), &probs, &ledger, &impact);

        // All factors maxed: 0.4 + 0.3 + 0.15 + 0.15 = 1.0
        assert!((ranked[0].priority_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_monotonic_in_failure_rate() {
        // Same probability/impact, increasing failure rate
        let prioritizer = Prioritizer::new(1, 100);
        let mut previous = -1.0;
        for failures in 0..=5u64 {
            let mut ledger = Ledger::new();
            for run in 1..=10 {
                ledger.push(record(run, "tests/test_a.py", "test_x", run > failures));
            }
            let ranked = prioritizer.prioritize(
                &ledger.test_ids(),
                &HashMap::new(),
                &ledger,
                &BTreeMap::new(),
            );
            assert!(ranked[0].priority_score >= previous);
            previous = ranked[0].priority_score;
        }
    }

    #[test]
    fn test_ties_keep_discovery_order() {
        let ledger = Ledger::new();
        let prioritizer = Prioritizer::new(1, 100);
        let ids = vec![
            "tests/test_a.py::first".to_string(),
            "tests/test_a.py::second".to_string(),
            "tests/test_a.py::third".to_string(),
        ];
        // All are new tests with identical 0.5 scores
        let ranked = prioritizer.prioritize(&ids, &HashMap::new(), &ledger, &BTreeMap::new());
        let names: Vec<&str> = ranked.iter().map(|p| p.test_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "tests/test_a.py::first",
                "tests/test_a.py::second",
                "tests/test_a.py::third"
            ]
        );
    }

    #[test]
    fn test_reason_dominant_factor() {
        assert_eq!(priority_reason(0.9, 0.2, 0.1, 0.0), "High failure risk");
        assert_eq!(priority_reason(0.2, 0.8, 0.1, 0.0), "Code changes");
        assert_eq!(priority_reason(0.1, 0.2, 0.9, 0.0), "Historical failures");
        assert_eq!(priority_reason(0.1, 0.2, 0.3, 0.8), "Recent failures");
        // Nothing clears 0.5
        assert_eq!(priority_reason(0.4, 0.3, 0.2, 0.1), "General testing");
        // First factor wins exact ties
        assert_eq!(priority_reason(0.8, 0.8, 0.1, 0.0), "High failure risk");
    }

    #[test]
    fn test_select_respects_min_tests() {
        let prioritizer = Prioritizer::new(3, 100);
        let priorities = vec![
            priority("a", 0.1, 1.0),
            priority("b", 0.05, 1.0),
            priority("c", 0.01, 1.0),
            priority("d", 0.01, 1.0),
        ];

        // Low scores: only the guaranteed minimum is taken
        let selected = prioritizer.select_optimal_suite(&priorities, None);
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn test_select_returns_all_when_fewer_than_min() {
        let prioritizer = Prioritizer::new(5, 100);
        let priorities = vec![priority("a", 0.1, 1.0), priority("b", 0.1, 1.0)];
        let selected = prioritizer.select_optimal_suite(&priorities, None);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_select_respects_max_tests() {
        let prioritizer = Prioritizer::new(1, 3);
        let priorities: Vec<TestPriority> =
            (0..10).map(|i| priority(&format!("t{i}"), 0.9, 0.1)).collect();
        let selected = prioritizer.select_optimal_suite(&priorities, None);
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn test_select_respects_time_budget() {
        let prioritizer = Prioritizer::new(1, 100);
        let priorities = vec![
            priority("a", 0.9, 1.0),
            priority("b", 0.9, 1.0),
            priority("c", 0.9, 1.0),
        ];
        // Budget covers the guaranteed first test plus one more
        let selected = prioritizer.select_optimal_suite(&priorities, Some(2.0));
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_select_applies_score_floor() {
        let prioritizer = Prioritizer::new(1, 100);
        let priorities = vec![
            priority("keep", 0.9, 0.1),
            priority("also-keep", 0.31, 0.1),
            priority("drop", 0.29, 0.1),
        ];
        let selected = prioritizer.select_optimal_suite(&priorities, None);
        let names: Vec<&str> = selected.iter().map(|p| p.test_name.as_str()).collect();
        assert_eq!(names, vec!["keep", "also-keep"]);
    }

    #[test]
    fn test_selection_summary() {
        let prioritizer = Prioritizer::new(1, 100);
        let all = vec![
            priority("a", 0.9, 2.0),
            priority("b", 0.5, 2.0),
            priority("c", 0.1, 2.0),
            priority("d", 0.1, 2.0),
        ];
        let selected = vec![all[0].clone(), all[1].clone()];

        let summary = prioritizer.selection_summary(&all, &selected);
        assert_eq!(summary.total_tests, 4);
        assert_eq!(summary.selected_tests, 2);
        assert!((summary.reduction_percentage - 50.0).abs() < 1e-9);
        assert!((summary.total_execution_time_all - 8.0).abs() < 1e-9);
        assert!((summary.total_execution_time_selected - 4.0).abs() < 1e-9);
        assert!((summary.time_saved - 4.0).abs() < 1e-9);
        assert_eq!(summary.high_priority_count, 1);
        assert_eq!(summary.medium_priority_count, 1);
        assert_eq!(summary.low_priority_count, 0);
    }

    #[test]
    fn test_summary_empty_is_well_defined() {
        let prioritizer = Prioritizer::new(1, 100);
        let summary = prioritizer.selection_summary(&[], &[]);
        assert_eq!(summary.total_tests, 0);
        assert_eq!(summary.reduction_percentage, 0.0);
        assert_eq!(summary.time_reduction_percentage, 0.0);
    }
}
