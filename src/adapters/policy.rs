use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::instance::ProblemInstanceBatch;

#[cfg(test)]
use mockall::automock;

/// Keys a reset environment state must carry before it can be decoded.
pub const REQUIRED_STATE_KEYS: &[&str] = &["locs", "demand", "capacity", "action_mask"];

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Accelerator,
    Cpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Accelerator => f.write_str("accelerator"),
            Device::Cpu => f.write_str("cpu"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMethod {
    Greedy,
    Sampling,
}

/// Environment state produced by a reset and consumed by a single decode pass.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvState {
    pub device: Device,
    pub batch: ProblemInstanceBatch,
    pub keys: BTreeSet<String>,
}

impl EnvState {
    pub fn new(device: Device, batch: ProblemInstanceBatch) -> Self {
        let keys = REQUIRED_STATE_KEYS.iter().map(|k| k.to_string()).collect();
        Self { device, batch, keys }
    }

    pub fn missing_key(&self) -> Option<&'static str> {
        REQUIRED_STATE_KEYS.iter().copied().find(|k| !self.keys.contains(*k))
    }
}

/// Raw decoder output. Rewards are negative route lengths.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOutput {
    pub actions: Vec<Vec<usize>>,
    pub rewards: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingPlan {
    pub max_epochs: usize,
    pub early_stopping_patience: usize,
    pub log_to_experiment_tracker: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrainingOutcome {
    pub epochs_run: usize,
    pub best_validation_cost: f64,
    pub stopped_early: bool,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunnerError {
    #[error("device mismatch: {0}")]
    DeviceMismatch(String),

    #[error("accelerator unavailable: {0}")]
    AcceleratorUnavailable(String),

    #[error("environment state is missing key '{0}'")]
    MissingStateKey(String),

    #[error("incompatible parameters: {0}")]
    IncompatibleParameters(String),

    #[error("{0}")]
    Other(String),
}

/// The learned policy together with its environment handle.
///
/// Implementations keep mutable placement state, so a runner must not be shared between concurrent solves.
#[cfg_attr(test, automock)]
pub trait PolicyRunner {
    fn device(&self) -> Device;

    /// Moves parameters (and any cached state) to `device`.
    fn to_device(&mut self, device: Device) -> Result<(), RunnerError>;

    fn reset(&mut self, batch: &ProblemInstanceBatch) -> Result<EnvState, RunnerError>;

    fn decode(&mut self, state: &EnvState, method: DecodeMethod) -> Result<DecodeOutput, RunnerError>;

    fn train(
        &mut self,
        train: &ProblemInstanceBatch,
        validation: &ProblemInstanceBatch,
        plan: &TrainingPlan,
    ) -> Result<TrainingOutcome, RunnerError>;

    fn parameters(&self) -> Value;

    fn load_parameters(&mut self, parameters: Value) -> Result<(), RunnerError>;
}
