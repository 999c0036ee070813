//! Failure-probability prediction
//!
//! Trains a configurable binary classifier over ledger-derived feature
//! vectors (label: the test failed) and predicts per-test failure
//! probability. Features are standardized with a scaler fit on the training
//! partition only; the split is stratified by label and seeded. The trained
//! state is one atomic artifact: classifier, scaler parameters, and the
//! pinned feature ordering.

use crate::config::{Algorithm, MlModelConfig};
use crate::features::{FeatureBuilder, FEATURE_NAMES};
use crate::forest::{ClassifierModel, GradientBoosting, LogisticModel, RandomForest};
use crate::history::Ledger;
use crate::persistence::{self, ArtifactError, ModelArtifact, ModelMetadata};
use aprender::preprocessing::StandardScaler;
use aprender::primitives::Matrix;
use aprender::traits::Transformer;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Iteration cap for the linear classifier
const LOGISTIC_MAX_ITER: usize = 1000;

/// Errors raised by training and inference
#[derive(Error, Debug)]
pub enum PredictorError {
    #[error("model not trained; train or load a model first")]
    NotTrained,

    #[error("no training data available")]
    NoTrainingData,

    #[error("training failed: {0}")]
    TrainingFailed(String),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Classification metrics for one data partition
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SplitMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub roc_auc: f64,
}

/// Outcome of one training run
#[derive(Debug, Clone, Serialize)]
pub struct TrainReport {
    pub algorithm: String,
    pub train_samples: usize,
    pub test_samples: usize,
    /// Fraction of failing labels across the whole dataset
    pub failure_rate: f64,
    pub train: SplitMetrics,
    pub test: SplitMetrics,
    /// Per-feature importance, descending; absent for the linear model
    pub feature_importance: Option<Vec<(String, f32)>>,
}

/// Risk bucket of a prediction set
#[derive(Debug, Clone, Serialize)]
pub struct RiskBucket {
    pub count: usize,
    pub percentage: f64,
    /// (test id, failure probability), most likely to fail first
    pub tests: Vec<(String, f64)>,
}

/// Predictions grouped by risk level
#[derive(Debug, Clone, Serialize)]
pub struct RiskSummary {
    pub total_tests: usize,
    /// probability > 0.7
    pub high: RiskBucket,
    /// probability in (0.3, 0.7]
    pub medium: RiskBucket,
    /// probability <= 0.3
    pub low: RiskBucket,
}

/// Trains and serves the failure-probability model
///
/// One predictor instance is exclusively owned by one selection engine;
/// `train` and `predict` calls must be serialized by the owner.
#[derive(Debug)]
pub struct FailurePredictor {
    config: MlModelConfig,
    state: Option<ModelArtifact>,
}

impl FailurePredictor {
    pub fn new(config: MlModelConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.state.is_some()
    }

    /// Train using the configured split fraction and seed
    pub fn train(&mut self, ledger: &Ledger) -> Result<TrainReport, PredictorError> {
        self.train_with(ledger, self.config.test_size, self.config.random_state)
    }

    /// Train with an explicit split fraction and seed
    pub fn train_with(
        &mut self,
        ledger: &Ledger,
        test_size: f64,
        seed: u64,
    ) -> Result<TrainReport, PredictorError> {
        if ledger.is_empty() {
            return Err(PredictorError::NoTrainingData);
        }

        let (rows, labels) = build_training_rows(ledger);
        let failure_rate =
            labels.iter().map(|&l| f64::from(l)).sum::<f64>() / labels.len() as f64;

        let (train_idx, test_idx) = stratified_split(&labels, test_size, seed)?;
        tracing::info!(
            algorithm = self.config.algorithm.name(),
            train = train_idx.len(),
            test = test_idx.len(),
            failure_rate = %format!("{:.2}%", failure_rate * 100.0),
            "training failure predictor"
        );

        // Scaler parameters come from the training partition only
        let (means, stds) = fit_scaler(&rows, &train_idx)?;
        let x_train = standardize_rows(&rows, &train_idx, &means, &stds);
        let y_train: Vec<f32> = train_idx.iter().map(|&i| labels[i]).collect();
        let x_test = standardize_rows(&rows, &test_idx, &means, &stds);
        let y_test: Vec<f32> = test_idx.iter().map(|&i| labels[i]).collect();

        let model = match self.config.algorithm {
            Algorithm::RandomForest => ClassifierModel::RandomForest(RandomForest::fit(
                &x_train,
                &y_train,
                self.config.n_estimators,
                self.config.max_depth,
                seed,
            )),
            Algorithm::GradientBoosting => ClassifierModel::GradientBoosting(
                GradientBoosting::fit(
                    &x_train,
                    &y_train,
                    self.config.n_estimators,
                    self.config.max_depth,
                    seed,
                ),
            ),
            Algorithm::LogisticRegression => ClassifierModel::Logistic(LogisticModel::fit(
                &x_train,
                &y_train,
                LOGISTIC_MAX_ITER,
            )),
        };

        let train_metrics = evaluate(&model, &x_train, &y_train);
        let test_metrics = evaluate(&model, &x_test, &y_test);

        let feature_importance = model.feature_importance().map(|importance| {
            let mut ranked: Vec<(String, f32)> = FEATURE_NAMES
                .iter()
                .map(|name| (*name).to_string())
                .zip(importance.iter().copied())
                .collect();
            ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            ranked
        });

        let report = TrainReport {
            algorithm: self.config.algorithm.name().to_string(),
            train_samples: x_train.len(),
            test_samples: x_test.len(),
            failure_rate,
            train: train_metrics,
            test: test_metrics,
            feature_importance,
        };

        self.state = Some(ModelArtifact {
            model,
            feature_names: FEATURE_NAMES.iter().map(|n| (*n).to_string()).collect(),
            means,
            stds,
            metadata: ModelMetadata::new(x_train.len(), self.config.algorithm.name()),
        });

        Ok(report)
    }

    /// Predict the failure probability for one test
    pub fn predict_failure_probability(
        &self,
        test_id: &str,
        ledger: &Ledger,
        lines_changed: u64,
        functions_changed: u64,
    ) -> Result<f64, PredictorError> {
        let state = self.state.as_ref().ok_or(PredictorError::NotTrained)?;

        let history = ledger.records_for(test_id);
        let features = FeatureBuilder::for_test(&history, lines_changed, functions_changed);
        let row: Vec<f32> = features.to_array().iter().map(|&v| v as f32).collect();
        let standardized = standardize(&row, &state.means, &state.stds);

        Ok(f64::from(state.model.predict_proba(&standardized)).clamp(0.0, 1.0))
    }

    /// Predict failure probabilities for many tests
    ///
    /// `changed_map` carries current (lines, functions) change counts per
    /// test file; tests without an entry predict with zero change counts.
    pub fn predict_many(
        &self,
        test_ids: &[String],
        ledger: &Ledger,
        changed_map: &HashMap<String, (u64, u64)>,
    ) -> Result<HashMap<String, f64>, PredictorError> {
        let mut predictions = HashMap::with_capacity(test_ids.len());
        for test_id in test_ids {
            let test_file = test_id.split("::").next().unwrap_or("");
            let (lines, functions) = changed_map.get(test_file).copied().unwrap_or((0, 0));
            let probability =
                self.predict_failure_probability(test_id, ledger, lines, functions)?;
            predictions.insert(test_id.clone(), probability);
        }
        Ok(predictions)
    }

    /// Rank tests by failure probability, highest risk first
    pub fn rank_by_failure_risk(predictions: &HashMap<String, f64>) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> =
            predictions.iter().map(|(k, v)| (k.clone(), *v)).collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked
    }

    /// Tests whose failure probability meets the threshold
    pub fn select_high_risk(
        predictions: &HashMap<String, f64>,
        threshold: f64,
    ) -> Vec<String> {
        Self::rank_by_failure_risk(predictions)
            .into_iter()
            .filter(|(_, p)| *p >= threshold)
            .map(|(test, _)| test)
            .collect()
    }

    /// Bucket predictions into high/medium/low risk
    pub fn risk_summary(predictions: &HashMap<String, f64>) -> RiskSummary {
        let total = predictions.len();
        let mut high = Vec::new();
        let mut medium = Vec::new();
        let mut low = Vec::new();

        for (test, probability) in Self::rank_by_failure_risk(predictions) {
            if probability > 0.7 {
                high.push((test, probability));
            } else if probability > 0.3 {
                medium.push((test, probability));
            } else {
                low.push((test, probability));
            }
        }

        let bucket = |tests: Vec<(String, f64)>| {
            let count = tests.len();
            RiskBucket {
                count,
                percentage: if total > 0 {
                    count as f64 / total as f64 * 100.0
                } else {
                    0.0
                },
                tests,
            }
        };

        RiskSummary {
            total_tests: total,
            high: bucket(high),
            medium: bucket(medium),
            low: bucket(low),
        }
    }

    /// Persist the trained state: `.apr` artifact plus JSON scaler companion
    pub fn save(&self, model_path: &Path, features_path: &Path) -> Result<(), PredictorError> {
        let state = self.state.as_ref().ok_or(PredictorError::NotTrained)?;
        persistence::save_artifact(state, model_path)?;
        persistence::save_companion(state, features_path)?;
        tracing::info!(model = %model_path.display(), "saved model artifact");
        Ok(())
    }

    /// Restore trained state from a persisted artifact
    pub fn load(&mut self, model_path: &Path) -> Result<(), PredictorError> {
        let artifact = persistence::load_artifact(model_path)?;

        // The pinned schema must match this build's feature ordering
        if artifact.feature_names != FEATURE_NAMES {
            return Err(PredictorError::Artifact(ArtifactError::LoadError(format!(
                "feature schema mismatch: artifact has {} features",
                artifact.feature_names.len()
            ))));
        }

        tracing::info!(
            "{}",
            persistence::model_status_line(&artifact.metadata)
        );
        self.state = Some(artifact);
        Ok(())
    }
}

/// One training row per ledger record; label 1.0 = failed
fn build_training_rows(ledger: &Ledger) -> (Vec<Vec<f32>>, Vec<f32>) {
    let groups = ledger.by_test();
    let mut rows = Vec::with_capacity(ledger.len());
    let mut labels = Vec::with_capacity(ledger.len());

    for record in ledger.records() {
        let history = groups
            .get(record.full_test_name.as_str())
            .map_or(&[][..], Vec::as_slice);
        let features =
            FeatureBuilder::for_test(history, record.lines_changed, record.functions_changed);
        rows.push(features.to_array().iter().map(|&v| v as f32).collect());
        labels.push(if record.passed { 0.0 } else { 1.0 });
    }

    (rows, labels)
}

/// Seeded stratified split into (train, test) index sets
fn stratified_split(
    labels: &[f32],
    test_size: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>), PredictorError> {
    let mut positives: Vec<usize> = Vec::new();
    let mut negatives: Vec<usize> = Vec::new();
    for (i, &label) in labels.iter().enumerate() {
        if label > 0.5 {
            positives.push(i);
        } else {
            negatives.push(i);
        }
    }

    if positives.is_empty() || negatives.is_empty() {
        return Err(PredictorError::TrainingFailed(
            "training labels contain a single class".to_string(),
        ));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();

    for class in [&mut positives, &mut negatives] {
        class.shuffle(&mut rng);
        let n = class.len();
        let n_test = if n >= 2 {
            ((n as f64 * test_size).round() as usize).clamp(1, n - 1)
        } else {
            0
        };
        test.extend_from_slice(&class[..n_test]);
        train.extend_from_slice(&class[n_test..]);
    }

    Ok((train, test))
}

/// Fit the scaler on the training rows and extract its parameters
fn fit_scaler(
    rows: &[Vec<f32>],
    train_idx: &[usize],
) -> Result<(Vec<f32>, Vec<f32>), PredictorError> {
    let n_features = rows.first().map_or(0, Vec::len);
    let mut flat = Vec::with_capacity(train_idx.len() * n_features);
    for &i in train_idx {
        flat.extend_from_slice(&rows[i]);
    }

    let matrix = Matrix::from_vec(train_idx.len(), n_features, flat)
        .map_err(|e| PredictorError::TrainingFailed(e.to_string()))?;

    let mut scaler = StandardScaler::new().with_mean(true).with_std(true);
    scaler
        .fit(&matrix)
        .map_err(|e| PredictorError::TrainingFailed(e.to_string()))?;

    Ok((scaler.mean().to_vec(), scaler.std().to_vec()))
}

/// Standardize one row with the fitted parameters
///
/// A near-zero deviation marks a constant feature; its centered value is 0.
fn standardize(row: &[f32], means: &[f32], stds: &[f32]) -> Vec<f32> {
    row.iter()
        .zip(means.iter().zip(stds))
        .map(|(&v, (&m, &s))| if s > 1e-8 { (v - m) / s } else { 0.0 })
        .collect()
}

fn standardize_rows(
    rows: &[Vec<f32>],
    indices: &[usize],
    means: &[f32],
    stds: &[f32],
) -> Vec<Vec<f32>> {
    indices
        .iter()
        .map(|&i| standardize(&rows[i], means, stds))
        .collect()
}

/// Metrics over one partition, binarizing probabilities at 0.5
fn evaluate(model: &ClassifierModel, x: &[Vec<f32>], y: &[f32]) -> SplitMetrics {
    let scores: Vec<f32> = x.iter().map(|row| model.predict_proba(row)).collect();
    let truth: Vec<bool> = y.iter().map(|&v| v > 0.5).collect();
    let predicted: Vec<bool> = scores.iter().map(|&p| p >= 0.5).collect();

    let precision = precision(&truth, &predicted);
    let recall = recall(&truth, &predicted);
    SplitMetrics {
        accuracy: accuracy(&truth, &predicted),
        precision,
        recall,
        f1: f1_score(precision, recall),
        roc_auc: roc_auc(&truth, &scores),
    }
}

fn accuracy(truth: &[bool], predicted: &[bool]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let correct = truth
        .iter()
        .zip(predicted)
        .filter(|(t, p)| t == p)
        .count();
    correct as f64 / truth.len() as f64
}

fn precision(truth: &[bool], predicted: &[bool]) -> f64 {
    let tp = truth
        .iter()
        .zip(predicted)
        .filter(|(t, p)| **t && **p)
        .count();
    let fp = truth
        .iter()
        .zip(predicted)
        .filter(|(t, p)| !**t && **p)
        .count();
    if tp + fp == 0 {
        return 0.0;
    }
    tp as f64 / (tp + fp) as f64
}

fn recall(truth: &[bool], predicted: &[bool]) -> f64 {
    let tp = truth
        .iter()
        .zip(predicted)
        .filter(|(t, p)| **t && **p)
        .count();
    let fn_ = truth
        .iter()
        .zip(predicted)
        .filter(|(t, p)| **t && !**p)
        .count();
    if tp + fn_ == 0 {
        return 0.0;
    }
    tp as f64 / (tp + fn_) as f64
}

fn f1_score(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        return 0.0;
    }
    2.0 * precision * recall / (precision + recall)
}

/// Rank-based ROC-AUC with average ranks for ties; 0.5 when degenerate
fn roc_auc(truth: &[bool], scores: &[f32]) -> f64 {
    let n_pos = truth.iter().filter(|&&t| t).count();
    let n_neg = truth.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[a]
            .partial_cmp(&scores[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Average ranks across tied scores
    let mut ranks = vec![0.0f64; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg_rank;
        }
        i = j + 1;
    }

    let rank_sum: f64 = truth
        .iter()
        .zip(&ranks)
        .filter(|(t, _)| **t)
        .map(|(_, r)| *r)
        .sum();

    let u = rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0;
    u / (n_pos as f64 * n_neg as f64)
}
