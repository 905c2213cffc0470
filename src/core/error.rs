use thiserror::Error;

use crate::adapters::policy::RunnerError;

/// Invalid or missing run configuration. Never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),

    #[error("missing required configuration key: {0}")]
    Missing(&'static str),

    #[error("'{key}' must be {expected}, got {value}")]
    InvalidValue {
        key: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("'{0}' must be greater than zero")]
    NonPositive(&'static str),

    #[error("path '{0}' must not be empty")]
    EmptyPath(&'static str),

    #[error("unknown variant preset: {0}")]
    UnknownVariantPreset(String),
}

/// The remote platform rejected a submission. The caller has to fix the cause out of band.
#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("permission denied by the training platform: {0}")]
    PermissionDenied(String),

    #[error("execution role '{0}' not found; provision it with the platform setup step before submitting")]
    MissingExecutionRole(String),

    #[error("training job rejected: {0}")]
    Rejected(String),

    #[error("failed to upload code bundle: {0}")]
    Upload(String),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Raw failures talking to the training platform.
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("platform returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unrecognised job status: {0}")]
    UnknownStatus(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// A status query that did not reach the platform. Retried on the next poll tick.
#[derive(Error, Debug)]
#[error("transient poll error for job {job_name}: {source}")]
pub struct TransientPollError {
    pub job_name: String,
    #[source]
    pub source: PlatformError,
}

/// A problem instance whose shape cannot be routed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InstanceError {
    #[error("instance has no depot location")]
    NoLocations,

    #[error("{locations} locations but {demands} demands")]
    LengthMismatch { locations: usize, demands: usize },

    #[error("depot demand must be zero, got {0}")]
    DepotDemand(u32),

    #[error("demand {demand} of customer {customer} exceeds vehicle capacity {capacity}")]
    DemandExceedsCapacity { customer: usize, demand: u32, capacity: u32 },

    #[error("location {0} has a non-finite coordinate")]
    NonFiniteLocation(usize),
}

/// The solve pipeline gave up on a batch.
#[derive(Error, Debug)]
pub enum SolveFailure {
    #[error("cannot solve an empty batch")]
    EmptyBatch,

    #[error("instance {index} is malformed: {source}")]
    InvalidInstance {
        index: usize,
        #[source]
        source: InstanceError,
    },

    #[error("decode returned {got} results for a batch of {expected}")]
    ShapeMismatch { expected: usize, got: usize },

    #[error("recovery chain exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: RunnerError },
}

/// A model or result artifact could not be written or read back.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed artifact {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("artifact environment {found} is incompatible with the run ({expected})")]
    Incompatible { expected: String, found: String },

    #[error(transparent)]
    Runner(#[from] RunnerError),
}
