//! Model artifact persistence
//!
//! The trained classifier, the scaler parameters, and the pinned feature
//! ordering travel together in one `.apr` artifact so inference can never see
//! a schema the model was not trained on. The artifact is written to a
//! temporary path and renamed into place, replacing any previous model
//! wholesale. A JSON companion with the scaler parameters is written next to
//! it for external tooling.

use crate::forest::ClassifierModel;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during model persistence operations
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("failed to save model: {0}")]
    SaveError(String),

    #[error("failed to load model: {0}")]
    LoadError(String),

    #[error("model file not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Metadata for a persisted model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Crate version that created this model
    pub cribar_version: String,
    /// When the model was trained (ISO 8601)
    pub trained_at: String,
    /// Number of samples used for training
    pub training_samples: usize,
    /// Algorithm name, e.g. `random_forest`
    pub algorithm: String,
}

impl ModelMetadata {
    pub fn new(training_samples: usize, algorithm: &str) -> Self {
        Self {
            cribar_version: env!("CARGO_PKG_VERSION").to_string(),
            trained_at: chrono::Utc::now().to_rfc3339(),
            training_samples,
            algorithm: algorithm.to_string(),
        }
    }
}

/// Everything needed to restore inference without retraining
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model: ClassifierModel,
    /// Pinned feature ordering the model was trained against
    pub feature_names: Vec<String>,
    /// Per-feature means from the training-partition scaler
    pub means: Vec<f32>,
    /// Per-feature standard deviations from the training-partition scaler
    pub stds: Vec<f32>,
    pub metadata: ModelMetadata,
}

/// Scaler companion written alongside the artifact for external tooling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCompanion {
    pub feature_names: Vec<String>,
    pub means: Vec<f32>,
    pub stds: Vec<f32>,
}

/// Save the artifact atomically to `.apr` format
pub fn save_artifact(artifact: &ModelArtifact, path: &Path) -> Result<(), ArtifactError> {
    use aprender::format::{save, Compression, ModelType, SaveOptions};

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SaveOptions::new()
        .with_compression(Compression::ZstdDefault)
        .with_name("cribar-failure-predictor")
        .with_description(format!(
            "{} over {} features",
            artifact.metadata.algorithm,
            artifact.feature_names.len()
        ));

    // Write-then-rename so a crash never leaves a truncated artifact
    let tmp_path = path.with_extension("apr.tmp");
    save(artifact, ModelType::Custom, &tmp_path, options)
        .map_err(|e| ArtifactError::SaveError(e.to_string()))?;
    std::fs::rename(&tmp_path, path)?;

    tracing::debug!(path = %path.display(), "saved model artifact");
    Ok(())
}

/// Load an artifact previously written by [`save_artifact`]
pub fn load_artifact(path: &Path) -> Result<ModelArtifact, ArtifactError> {
    use aprender::format::{load, ModelType};

    if !path.exists() {
        return Err(ArtifactError::FileNotFound(path.display().to_string()));
    }

    load::<ModelArtifact>(path, ModelType::Custom)
        .map_err(|e| ArtifactError::LoadError(e.to_string()))
}

/// Write the JSON scaler companion
pub fn save_companion(artifact: &ModelArtifact, path: &Path) -> Result<(), ArtifactError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let companion = FeatureCompanion {
        feature_names: artifact.feature_names.clone(),
        means: artifact.means.clone(),
        stds: artifact.stds.clone(),
    };
    let json = serde_json::to_string_pretty(&companion)
        .map_err(|e| ArtifactError::SaveError(e.to_string()))?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Status line describing a loaded model
pub fn model_status_line(metadata: &ModelMetadata) -> String {
    format!(
        "model: cribar v{}, {} trained with {} samples",
        metadata.cribar_version, metadata.algorithm, metadata.training_samples
    )
}
