//! Selection engine
//!
//! One engine instance exclusively owns its configuration, a ledger snapshot
//! loaded once per session, and one failure predictor (lazily loaded from the
//! persisted artifact, or trained on demand). There is no shared global
//! state; concurrent engines over the same persisted files require external
//! coordination.

use crate::config::Config;
use crate::diff::DiffExtractor;
use crate::history::{HistoryError, Ledger};
use crate::impact::ImpactAnalyzer;
use crate::predictor::{FailurePredictor, PredictorError, TrainReport};
use crate::prioritize::{Prioritizer, SelectionSummary, TestPriority};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors surfaced by the orchestration layer
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Predictor(#[from] PredictorError),
}

/// Result of one selection request
///
/// An empty change set is a distinct outcome, never an empty `Selected`
/// list: callers must not conflate "nothing to test" with "all tests
/// selected". A caller wanting a safety net falls back to the full suite
/// itself.
#[derive(Debug)]
pub enum SelectionOutcome {
    /// No explicit changed files and no uncommitted changes detected
    NoChanges,
    Selected {
        /// Selected tests in rank order
        tests: Vec<TestPriority>,
        summary: SelectionSummary,
    },
}

/// Orchestrates impact analysis, prediction, and prioritization
#[derive(Debug)]
pub struct SelectionEngine {
    config: Config,
    ledger: Ledger,
    impact: ImpactAnalyzer,
    diff: DiffExtractor,
    prioritizer: Prioritizer,
    predictor: FailurePredictor,
    project_root: PathBuf,
}

impl SelectionEngine {
    /// Build an engine rooted at a project directory
    ///
    /// The ledger snapshot is loaded once here; a missing history file yields
    /// an empty ledger (train/select will then report `NoHistoricalData`).
    pub fn new(config: Config, project_root: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let project_root = project_root.into();

        let history_path = project_root.join(&config.data.history_file);
        let ledger = if history_path.exists() {
            Ledger::load(&history_path)?
        } else {
            tracing::debug!(path = %history_path.display(), "no ledger on disk, starting empty");
            Ledger::new()
        };

        let impact = ImpactAnalyzer::new(&project_root, &config.data.tests_dir);
        let diff = DiffExtractor::new(&project_root);
        let prioritizer = Prioritizer::new(
            config.test_selection.min_tests,
            config.test_selection.max_tests,
        );
        let predictor = FailurePredictor::new(config.ml_model.clone());

        Ok(Self {
            config,
            ledger,
            impact,
            diff,
            prioritizer,
            predictor,
            project_root,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Train the model, persist the artifact, and keep the trained state
    ///
    /// `history_file` overrides the configured ledger for this training run.
    pub fn train(&mut self, history_file: Option<&Path>) -> Result<TrainReport, EngineError> {
        let override_ledger = match history_file {
            Some(path) => Some(Ledger::load(path)?),
            None => None,
        };
        let ledger = override_ledger.as_ref().unwrap_or(&self.ledger);

        if ledger.is_empty() {
            return Err(EngineError::History(HistoryError::NoHistoricalData));
        }

        let report = self.predictor.train(ledger)?;
        self.predictor.save(
            &self.project_root.join(&self.config.data.model_file),
            &self.project_root.join(&self.config.data.features_file),
        )?;
        Ok(report)
    }

    /// Load the persisted model if this engine has not trained yet
    fn ensure_model(&mut self) -> Result<(), EngineError> {
        if self.predictor.is_trained() {
            return Ok(());
        }
        self.predictor
            .load(&self.project_root.join(&self.config.data.model_file))?;
        Ok(())
    }

    /// Select tests to run for a change set
    ///
    /// When `changed_files` is omitted the engine derives the change set from
    /// uncommitted version-control changes; a VCS failure degrades to "no
    /// changes".
    pub fn select(
        &mut self,
        changed_files: Option<Vec<String>>,
        threshold: Option<f64>,
    ) -> Result<SelectionOutcome, EngineError> {
        let threshold = threshold.unwrap_or(self.config.test_selection.threshold);

        if self.ledger.is_empty() {
            return Err(EngineError::History(HistoryError::NoHistoricalData));
        }
        self.ensure_model()?;

        let changed = match changed_files {
            Some(files) => files,
            None => crate::diff::degrade_to_empty(self.diff.uncommitted_changes()),
        };
        if changed.is_empty() {
            tracing::info!("no code changes detected");
            return Ok(SelectionOutcome::NoChanges);
        }

        tracing::info!(files = changed.len(), "analyzing change set");
        for file in &changed {
            tracing::debug!(file = %file, "changed");
        }

        let impact_scores = self.impact.impact(&changed);
        let affected = self.impact.affected_tests(&changed, threshold);
        tracing::info!(
            impacted = impact_scores.len(),
            above_threshold = affected.len(),
            threshold,
            "impact analysis complete"
        );

        let all_tests = self.ledger.test_ids();
        let predictions =
            self.predictor
                .predict_many(&all_tests, &self.ledger, &HashMap::new())?;

        let priorities =
            self.prioritizer
                .prioritize(&all_tests, &predictions, &self.ledger, &impact_scores);
        let selected = self.prioritizer.select_optimal_suite(&priorities, None);
        let summary = self.prioritizer.selection_summary(&priorities, &selected);

        Ok(SelectionOutcome::Selected {
            tests: selected,
            summary,
        })
    }

    /// Full ranked priority list for reporting
    ///
    /// Unlike [`select`](Self::select), an empty change set still ranks every
    /// known test (with zero impact everywhere).
    pub fn test_priorities(
        &mut self,
        changed_files: Option<Vec<String>>,
    ) -> Result<Vec<TestPriority>, EngineError> {
        if self.ledger.is_empty() {
            return Err(EngineError::History(HistoryError::NoHistoricalData));
        }
        self.ensure_model()?;

        let changed = match changed_files {
            Some(files) => files,
            None => crate::diff::degrade_to_empty(self.diff.uncommitted_changes()),
        };
        let impact_scores = self.impact.impact(&changed);

        let all_tests = self.ledger.test_ids();
        let predictions =
            self.predictor
                .predict_many(&all_tests, &self.ledger, &HashMap::new())?;

        Ok(self
            .prioritizer
            .prioritize(&all_tests, &predictions, &self.ledger, &impact_scores))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::history::ExecutionRecord;
    use tempfile::TempDir;

    /// Project with two mapped tests and a ledger covering both classes
    fn project_with_history() -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        let tests = dir.path().join("tests");
        std::fs::create_dir_all(&tests).unwrap();
        std::fs::write(tests.join("auth.py"), "def login():\n    pass\n").unwrap();
        std::fs::write(
            tests.join("test_auth.py"),
            "from tests.auth import login\n\ndef test_login():\n    pass\n",
        )
        .unwrap();
        std::fs::write(tests.join("api.py"), "def get():\n    pass\n").unwrap();
        std::fs::write(tests.join("test_api.py"), "def test_get():\n    pass\n").unwrap();

        let mut ledger = Ledger::new();
        for run in 1..=15 {
            ledger.push(make_record(run, "tests/test_auth.py", "test_login", run % 3 != 0));
            ledger.push(make_record(run, "tests/test_api.py", "test_get", true));
            ledger.push(make_record(run, "tests/test_api.py", "test_put", run % 4 != 0));
        }

        let config = Config::default();
        ledger
            .save(&dir.path().join(&config.data.history_file))
            .unwrap();

        (dir, config)
    }

    fn make_record(run_id: u64, test_file: &str, test: &str, passed: bool) -> ExecutionRecord {
        ExecutionRecord {
            run_id,
            timestamp: "2026-01-01T00:00:00+00:00".to_string(),
            test_file: test_file.to_string(),
            test_name: test.to_string(),
            full_test_name: format!("{test_file}::{test}"),
            source_file: test_file.replace("test_", ""),
            passed,
            execution_time: 0.2,
            coverage: 0.9,
            lines_changed: if passed { 0 } else { 20 },
            functions_changed: u64::from(!passed),
            files_changed: String::new(),
            is_flaky: false,
            historical_failure_rate: None,
            recent_failures: None,
            avg_execution_time: None,
            test_coupling: None,
        }
    }

    #[test]
    fn test_select_without_history_fails() {
        let dir = TempDir::new().unwrap();
        let mut engine = SelectionEngine::new(Config::default(), dir.path()).unwrap();
        assert!(matches!(
            engine.select(Some(vec!["a.py".to_string()]), None),
            Err(EngineError::History(HistoryError::NoHistoricalData))
        ));
    }

    #[test]
    fn test_select_before_train_reports_missing_model() {
        let (dir, config) = project_with_history();
        let mut engine = SelectionEngine::new(config, dir.path()).unwrap();
        let result = engine.select(Some(vec!["tests/auth.py".to_string()]), None);
        assert!(matches!(result, Err(EngineError::Predictor(_))));
    }

    #[test]
    fn test_empty_changes_is_distinct_outcome() {
        let (dir, config) = project_with_history();
        let mut engine = SelectionEngine::new(config, dir.path()).unwrap();
        engine.train(None).unwrap();

        let outcome = engine.select(Some(Vec::new()), None).unwrap();
        assert!(matches!(outcome, SelectionOutcome::NoChanges));
    }

    #[test]
    fn test_select_with_changes_ranks_impacted_first() {
        let (dir, config) = project_with_history();
        let mut engine = SelectionEngine::new(config, dir.path()).unwrap();
        engine.train(None).unwrap();

        let outcome = engine
            .select(Some(vec!["tests/auth.py".to_string()]), None)
            .unwrap();
        let SelectionOutcome::Selected { tests, summary } = outcome else {
            panic!("expected a selected suite");
        };

        assert!(!tests.is_empty());
        assert_eq!(summary.total_tests, 3);
        assert_eq!(summary.selected_tests, tests.len());
        // The impacted failing test ranks first
        assert_eq!(tests[0].test_name, "tests/test_auth.py::test_login");
        for test in &tests {
            assert!((0.0..=1.0).contains(&test.priority_score));
        }
    }

    #[test]
    fn test_select_loads_persisted_model() {
        let (dir, config) = project_with_history();

        // Train with one engine, select with a fresh one
        let mut trainer = SelectionEngine::new(config.clone(), dir.path()).unwrap();
        trainer.train(None).unwrap();

        let mut engine = SelectionEngine::new(config, dir.path()).unwrap();
        let outcome = engine
            .select(Some(vec!["tests/auth.py".to_string()]), None)
            .unwrap();
        assert!(matches!(outcome, SelectionOutcome::Selected { .. }));
    }

    #[test]
    fn test_priorities_cover_all_known_tests() {
        let (dir, config) = project_with_history();
        let mut engine = SelectionEngine::new(config, dir.path()).unwrap();
        engine.train(None).unwrap();

        let priorities = engine.test_priorities(Some(Vec::new())).unwrap();
        assert_eq!(priorities.len(), 3);
        // Ranked descending
        for pair in priorities.windows(2) {
            assert!(pair[0].priority_score >= pair[1].priority_score);
        }
    }

    #[test]
    fn test_train_writes_artifacts() {
        let (dir, config) = project_with_history();
        let mut engine = SelectionEngine::new(config.clone(), dir.path()).unwrap();
        let report = engine.train(None).unwrap();

        assert!(report.train_samples > 0);
        assert!(dir.path().join(&config.data.model_file).exists());
        assert!(dir.path().join(&config.data.features_file).exists());
    }
}
