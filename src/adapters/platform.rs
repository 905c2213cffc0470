use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::PlatformError;
use crate::core::job::JobDescription;

#[cfg(test)]
use mockall::automock;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct MetricDefinition {
    pub name: String,
    pub regex: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceConfig {
    pub instance_type: String,
    pub instance_count: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct StoppingCondition {
    pub max_runtime_in_seconds: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct OutputDataConfig {
    pub s3_output_path: String,
}

/// Body of a create-training-job call.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TrainingJobRequest {
    pub training_job_name: String,
    pub entry_point: String,
    pub role_arn: String,
    pub resource_config: ResourceConfig,
    pub hyper_parameters: BTreeMap<String, String>,
    pub stopping_condition: StoppingCondition,
    pub output_data_config: OutputDataConfig,
    pub code_location: String,
    pub metric_definitions: Vec<MetricDefinition>,
}

/// Managed training platform as seen by the submitter and the monitor.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TrainingPlatform: Send + Sync {
    /// Fails with a 401/403 status when the caller may not manage training jobs.
    async fn check_permissions(&self) -> Result<(), PlatformError>;

    /// Identifier of the named execution role, `None` if it does not exist.
    async fn resolve_role(&self, role_name: &str) -> Result<Option<String>, PlatformError>;

    /// Stores one artifact under `destination` and returns its full location.
    async fn upload_artifact(&self, destination: &str, file_name: &str, content: Vec<u8>) -> Result<String, PlatformError>;

    async fn create_training_job(&self, request: &TrainingJobRequest) -> Result<(), PlatformError>;

    async fn describe_training_job(&self, job_name: &str) -> Result<JobDescription, PlatformError>;
}
