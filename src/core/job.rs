use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::adapters::platform::*;
use crate::core::config::RunConfig;
use crate::core::error::{PlatformError, SubmissionError};

pub const DEFAULT_INSTANCE_TYPE: &str = "ml.g4dn.xlarge";
pub const DEFAULT_BASE_JOB_NAME: &str = "mtvrp-training";
pub const DEFAULT_ROLE_NAME: &str = "SageMakerExecutionRole-MTVRP";
pub const DEFAULT_ENTRY_POINT: &str = "routeforge train";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Submitted,
    InProgress,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Stopped)
    }

    /// Next state given what the platform reports. Terminal states never change.
    pub fn transition(self, observed: JobStatus) -> JobStatus {
        if self.is_terminal() {
            self
        } else {
            observed
        }
    }

    /// Maps a platform status string. `Stopping` is still running from our point of view.
    pub fn from_platform(status: &str) -> Option<JobStatus> {
        match status {
            "Submitted" | "Pending" => Some(JobStatus::Submitted),
            "InProgress" | "Stopping" => Some(JobStatus::InProgress),
            "Completed" => Some(JobStatus::Completed),
            "Failed" => Some(JobStatus::Failed),
            "Stopped" => Some(JobStatus::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Submitted => "Submitted",
            JobStatus::InProgress => "InProgress",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
            JobStatus::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

/// One answer to a status query.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobDescription {
    pub status: JobStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub model_artifacts: Option<String>,
    pub failure_reason: Option<String>,
}

impl JobDescription {
    pub fn with_status(status: JobStatus) -> Self {
        Self { status, start_time: None, model_artifacts: None, failure_reason: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSpec {
    pub instance_type: String,
    pub instance_count: u32,
    pub max_runtime: Duration,
    pub output_location: String,
    pub code_location: String,
    pub code_dir: PathBuf,
    pub entry_point: String,
    pub base_job_name: String,
    pub role_name: String,
}

impl ResourceSpec {
    /// Reference deployment: one GPU instance, one hour, outputs and code under `bucket`.
    pub fn new(bucket: &str, code_dir: PathBuf) -> Self {
        let bucket = bucket.trim_end_matches('/');
        Self {
            instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
            instance_count: 1,
            max_runtime: Duration::from_secs(3600),
            output_location: format!("{}/mtvrp-outputs", bucket),
            code_location: format!("{}/mtvrp-code", bucket),
            code_dir,
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            base_job_name: DEFAULT_BASE_JOB_NAME.to_string(),
            role_name: DEFAULT_ROLE_NAME.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobHandle {
    pub job_name: String,
    pub output_location: String,
    /// Where the model bundle will appear once the job completes.
    pub model_artifact_location: String,
    pub code_location: String,
    pub submitted_at: DateTime<Utc>,
}

pub fn job_name(base: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}", base, at.format("%Y-%m-%d-%H-%M-%S"))
}

fn metric_definitions() -> Vec<MetricDefinition> {
    vec![
        MetricDefinition { name: "train:mean_cost".to_string(), regex: r"Mean cost: ([0-9\.]+)".to_string() },
        MetricDefinition { name: "train:best_cost".to_string(), regex: r"Best cost: ([0-9\.]+)".to_string() },
    ]
}

fn classify(error: PlatformError) -> SubmissionError {
    match error {
        PlatformError::Status { status: 401 | 403, body } => SubmissionError::PermissionDenied(body),
        PlatformError::Status { status: 400..=499, body } => SubmissionError::Rejected(body),
        other => SubmissionError::Platform(other),
    }
}

pub struct JobSubmitter<'a, P: TrainingPlatform + ?Sized> {
    platform: &'a P,
}

impl<'a, P: TrainingPlatform + ?Sized> JobSubmitter<'a, P> {
    pub fn new(platform: &'a P) -> Self {
        Self { platform }
    }

    /// Uploads code and config, starts the job and returns without waiting for it to run.
    pub async fn submit(&self, config: &RunConfig, resources: &ResourceSpec) -> Result<JobHandle, SubmissionError> {
        self.platform.check_permissions().await.map_err(classify)?;

        let role_arn = self
            .platform
            .resolve_role(&resources.role_name)
            .await
            .map_err(classify)?
            .ok_or_else(|| SubmissionError::MissingExecutionRole(resources.role_name.clone()))?;
        info!("Using execution role: {}", role_arn);

        let submitted_at = Utc::now();
        let name = job_name(&resources.base_job_name, submitted_at);
        let code_location = format!("{}/{}", resources.code_location, name);
        self.upload_code(config, resources, &code_location).await?;

        let request = TrainingJobRequest {
            training_job_name: name.clone(),
            entry_point: resources.entry_point.clone(),
            role_arn,
            resource_config: ResourceConfig {
                instance_type: resources.instance_type.clone(),
                instance_count: resources.instance_count,
            },
            hyper_parameters: config.to_hyperparameters(),
            stopping_condition: StoppingCondition { max_runtime_in_seconds: resources.max_runtime.as_secs() },
            output_data_config: OutputDataConfig { s3_output_path: resources.output_location.clone() },
            code_location: code_location.clone(),
            metric_definitions: metric_definitions(),
        };
        debug!("Training job request: {:?}", request);
        self.platform.create_training_job(&request).await.map_err(classify)?;

        let handle = JobHandle {
            model_artifact_location: format!("{}/{}/output/model.tar.gz", resources.output_location, name),
            job_name: name,
            output_location: resources.output_location.clone(),
            code_location,
            submitted_at,
        };
        info!("Training job submitted: {}", handle.job_name);
        info!("Model artifacts will be saved to: {}", handle.model_artifact_location);
        Ok(handle)
    }

    async fn upload_code(&self, config: &RunConfig, resources: &ResourceSpec, destination: &str) -> Result<(), SubmissionError> {
        let entries = fs::read_dir(&resources.code_dir)
            .map_err(|e| SubmissionError::Upload(format!("{}: {}", resources.code_dir.display(), e)))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        for path in files {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| SubmissionError::Upload(format!("invalid file name: {}", path.display())))?
                .to_string();
            let content = fs::read(&path).map_err(|e| SubmissionError::Upload(format!("{}: {}", path.display(), e)))?;
            let location = self
                .platform
                .upload_artifact(destination, &file_name, content)
                .await
                .map_err(|e| SubmissionError::Upload(e.to_string()))?;
            debug!("Uploaded {}", location);
        }

        let config_json = serde_json::to_vec_pretty(config).map_err(|e| SubmissionError::Upload(e.to_string()))?;
        self.platform
            .upload_artifact(destination, "run_config.json", config_json)
            .await
            .map_err(|e| SubmissionError::Upload(e.to_string()))?;
        info!("Uploaded code bundle to {}", destination);
        Ok(())
    }
}
