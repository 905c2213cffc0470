use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::policy::PolicyRunner;
use crate::core::compare::ResultArtifact;
use crate::core::config::{RunConfig, VariantPreset};
use crate::core::error::ArtifactError;
use crate::core::history::TrainingHistory;

/// Shape of the environment a policy was trained against.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EnvironmentConfig {
    pub num_locations: usize,
    pub batch_size: usize,
    pub variant_preset: VariantPreset,
}

impl From<&RunConfig> for EnvironmentConfig {
    fn from(config: &RunConfig) -> Self {
        Self {
            num_locations: config.num_locations,
            batch_size: config.batch_size,
            variant_preset: config.variant_preset,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModelArtifact {
    pub policy_parameters: Value,
    pub config: RunConfig,
    pub training_history: TrainingHistory,
    pub environment_config: EnvironmentConfig,
}

/// `<model>.json` -> `<model>_history.json` in the same directory.
pub fn history_path(model_path: &Path) -> PathBuf {
    let stem = model_path.file_stem().and_then(|s| s.to_str()).unwrap_or("model");
    model_path.with_file_name(format!("{}_history.json", stem))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ArtifactError> {
    let io_err = |source| ArtifactError::Io { path: path.display().to_string(), source };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|source| ArtifactError::Json {
        path: path.display().to_string(),
        source,
    })?;
    writer.flush().map_err(io_err)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let content = fs::read_to_string(path).map_err(|source| ArtifactError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ArtifactError::Json { path: path.display().to_string(), source })
}

/// Writes the model bundle and, next to it, the training history.
pub fn save_model<R: PolicyRunner + ?Sized>(
    path: &Path,
    runner: &R,
    config: &RunConfig,
    history: &TrainingHistory,
) -> Result<(), ArtifactError> {
    let artifact = ModelArtifact {
        policy_parameters: runner.parameters(),
        config: config.clone(),
        training_history: history.clone(),
        environment_config: EnvironmentConfig::from(config),
    };
    write_json(path, &artifact)?;
    let history_file = history_path(path);
    write_json(&history_file, history)?;
    info!("Model saved: {}", path.display());
    info!("Training history saved: {}", history_file.display());
    Ok(())
}

/// Restores policy parameters and returns the stored history so the caller can keep appending to it.
pub fn load_model<R: PolicyRunner + ?Sized>(
    path: &Path,
    runner: &mut R,
    config: &RunConfig,
) -> Result<TrainingHistory, ArtifactError> {
    let artifact: ModelArtifact = read_json(path)?;
    let expected = EnvironmentConfig::from(config);
    let found = &artifact.environment_config;
    if found.num_locations != expected.num_locations || found.variant_preset != expected.variant_preset {
        return Err(ArtifactError::Incompatible {
            expected: format!("{} locations, {}", expected.num_locations, expected.variant_preset),
            found: format!("{} locations, {}", found.num_locations, found.variant_preset),
        });
    }
    runner.load_parameters(artifact.policy_parameters)?;
    info!("Model loaded from: {}", path.display());
    Ok(artifact.training_history)
}

pub fn write_results(path: &Path, artifact: &ResultArtifact) -> Result<(), ArtifactError> {
    write_json(path, artifact)?;
    info!("Results saved to: {}", path.display());
    Ok(())
}
