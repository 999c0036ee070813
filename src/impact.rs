//! Maps code changes to affected tests
//!
//! The test↔source mapping follows the naming convention `test_x.py` ↔ `x.py`
//! in the same directory. A test scores 1.0 when its mapped source file is in
//! the change set, 0.5 when its import set references a module derived from a
//! changed file, and is absent otherwise.

use crate::diff::DiffExtractor;
use crate::structural::{ParseResult, StructuralAnalyzer};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Aggregate description of one change set
#[derive(Debug, Clone)]
pub struct ChangeSummary {
    pub num_files_changed: usize,
    pub changed_files: Vec<String>,
    pub total_lines_added: u64,
    pub total_lines_removed: u64,
    pub affected_tests: Vec<String>,
    /// Tests with impact >= 0.7
    pub high_priority_tests: Vec<String>,
}

/// Analyzes the impact of changed files on the test suite
#[derive(Debug)]
pub struct ImpactAnalyzer {
    project_root: PathBuf,
    analyzer: StructuralAnalyzer,
    /// Test file -> mapped source file, both relative with `/` separators
    mapping: BTreeMap<String, String>,
}

impl ImpactAnalyzer {
    /// Build the analyzer, scanning `tests_dir` (relative to the project
    /// root) once for the test↔source mapping
    pub fn new(project_root: impl Into<PathBuf>, tests_dir: &Path) -> Self {
        let project_root = project_root.into();
        let mapping = build_test_mapping(&project_root, tests_dir);
        tracing::debug!(tests = mapping.len(), "built test-to-source mapping");
        Self {
            project_root,
            analyzer: StructuralAnalyzer::new(),
            mapping,
        }
    }

    /// The test file -> source file mapping
    pub fn test_mapping(&self) -> &BTreeMap<String, String> {
        &self.mapping
    }

    /// Impact score per test file for a change set
    ///
    /// Deterministic: identical changed-file lists produce identical maps.
    /// Absence of a test implies an impact of zero.
    pub fn impact(&self, changed_files: &[String]) -> BTreeMap<String, f64> {
        let changed: Vec<String> = changed_files.iter().map(|f| normalize(f)).collect();
        let mut scores = BTreeMap::new();

        for (test_file, source_file) in &self.mapping {
            let mut impact: f64 = 0.0;

            if changed.iter().any(|c| c == source_file) {
                impact = 1.0;
            } else {
                // Indirect impact through the test's import set
                match self.analyzer.analyze(&self.project_root.join(test_file)) {
                    ParseResult::Parsed(snapshot) => {
                        for changed_file in &changed {
                            let module = file_to_module(changed_file);
                            if snapshot.imports.iter().any(|imp| imp.contains(&module)) {
                                impact = impact.max(0.5);
                            }
                        }
                    }
                    // An unreadable test file was already logged by the
                    // analyzer; a missing one simply has no import evidence.
                    ParseResult::Unreadable(_) | ParseResult::Missing => {}
                }
            }

            if impact > 0.0 {
                scores.insert(test_file.clone(), impact);
            }
        }

        scores
    }

    /// Tests whose impact score meets the threshold
    pub fn affected_tests(&self, changed_files: &[String], threshold: f64) -> Vec<String> {
        self.impact(changed_files)
            .into_iter()
            .filter(|(_, score)| *score >= threshold)
            .map(|(test, _)| test)
            .collect()
    }

    /// Alternate 0.4/0.3/0.3 priority heuristic
    ///
    /// Kept distinct from the prioritizer's canonical 0.4/0.3/0.15/0.15
    /// formula; the selection engine does not use this scorer.
    pub fn heuristic_priority(
        &self,
        test_file: &str,
        changed_files: &[String],
        historical_failure_rate: f64,
        recent_failures: u64,
    ) -> f64 {
        let impact = self
            .impact(changed_files)
            .get(test_file)
            .copied()
            .unwrap_or(0.0);
        let recent_score = (recent_failures as f64 / 5.0).min(1.0);

        let priority = impact * 0.4 + historical_failure_rate * 0.3 + recent_score * 0.3;
        priority.clamp(0.0, 1.0)
    }

    /// Summarize a change set: line totals plus affected tests
    pub fn change_summary(&self, changed_files: &[String], diff: &DiffExtractor) -> ChangeSummary {
        let mut total_lines_added = 0;
        let mut total_lines_removed = 0;

        for file_path in changed_files {
            match diff.diff_stats(file_path, "HEAD~1", "HEAD") {
                Ok(Some(stats)) => {
                    total_lines_added += stats.lines_added;
                    total_lines_removed += stats.lines_removed;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(file = %file_path, error = %e, "diff stats unavailable");
                }
            }
        }

        let scores = self.impact(changed_files);
        let high_priority_tests = scores
            .iter()
            .filter(|(_, score)| **score >= 0.7)
            .map(|(test, _)| test.clone())
            .collect();

        ChangeSummary {
            num_files_changed: changed_files.len(),
            changed_files: changed_files.to_vec(),
            total_lines_added,
            total_lines_removed,
            affected_tests: scores.into_keys().collect(),
            high_priority_tests,
        }
    }

    /// Tests mapped to a given source file
    pub fn related_tests(&self, source_file: &str) -> Vec<String> {
        let source = normalize(source_file);
        self.mapping
            .iter()
            .filter(|(_, mapped)| **mapped == source)
            .map(|(test, _)| test.clone())
            .collect()
    }

    /// Estimated total execution time for a set of test files
    ///
    /// Uses the known average when present, otherwise a rough size-based
    /// estimate of 0.1 s per KB of test file.
    pub fn estimate_suite_time(
        &self,
        test_files: &[String],
        avg_times: &HashMap<String, f64>,
    ) -> f64 {
        let mut total = 0.0;
        for test_file in test_files {
            if let Some(avg) = avg_times.get(test_file) {
                total += avg;
            } else if let Ok(meta) = std::fs::metadata(self.project_root.join(test_file)) {
                total += 0.1 * (meta.len() as f64 / 1000.0);
            }
        }
        total
    }
}

/// Scan for `test_*.py` files whose stripped-name sibling exists
fn build_test_mapping(project_root: &Path, tests_dir: &Path) -> BTreeMap<String, String> {
    let mut mapping = BTreeMap::new();
    let root = project_root.join(tests_dir);
    collect_tests(project_root, &root, &mut mapping);
    mapping
}

fn collect_tests(project_root: &Path, dir: &Path, mapping: &mut BTreeMap<String, String>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_tests(project_root, &path, mapping);
            continue;
        }

        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !file_name.starts_with("test_") || !file_name.ends_with(".py") {
            continue;
        }

        let source_name = file_name.trim_start_matches("test_");
        let source_path = path.with_file_name(source_name);
        if !source_path.exists() {
            continue;
        }

        if let (Ok(test_rel), Ok(source_rel)) = (
            path.strip_prefix(project_root),
            source_path.strip_prefix(project_root),
        ) {
            mapping.insert(
                normalize(&test_rel.to_string_lossy()),
                normalize(&source_rel.to_string_lossy()),
            );
        }
    }
}

/// Convert a changed-file path to a dotted module name
fn file_to_module(file_path: &str) -> String {
    normalize(file_path)
        .trim_end_matches(".py")
        .replace('/', ".")
        .trim_start_matches('.')
        .to_string()
}

/// Normalize path separators to `/`
fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}
