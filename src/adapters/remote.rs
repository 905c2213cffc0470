use std::env;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Duration;

use super::platform::{TrainingJobRequest, TrainingPlatform};
use crate::core::error::PlatformError;
use crate::core::job::{JobDescription, JobStatus};
use crate::utils::lib::retry;

pub const PLATFORM_URL_ENV: &str = "TRAINING_PLATFORM_URL";
pub const PLATFORM_TOKEN_ENV: &str = "TRAINING_PLATFORM_TOKEN";

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct ModelArtifacts {
    s3_model_artifacts: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct DescribeResponse {
    training_job_status: String,
    training_start_time: Option<DateTime<Utc>>,
    model_artifacts: Option<ModelArtifacts>,
    failure_reason: Option<String>,
}

impl TryFrom<DescribeResponse> for JobDescription {
    type Error = PlatformError;

    fn try_from(response: DescribeResponse) -> Result<Self, Self::Error> {
        let status = JobStatus::from_platform(&response.training_job_status)
            .ok_or_else(|| PlatformError::UnknownStatus(response.training_job_status.clone()))?;
        Ok(JobDescription {
            status,
            start_time: response.training_start_time,
            model_artifacts: response.model_artifacts.map(|m| m.s3_model_artifacts),
            failure_reason: response.failure_reason,
        })
    }
}

/// REST client for the managed training platform.
pub struct HttpPlatform {
    client: reqwest::Client,
    base_url: String,
    token: String,
    max_retries: u32,
    delay: Duration,
}

impl HttpPlatform {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            max_retries: 3,
            delay: Duration::from_secs(1),
        }
    }

    pub fn from_env() -> Result<Self> {
        let base_url = env::var(PLATFORM_URL_ENV).context("TRAINING_PLATFORM_URL must be set")?;
        let token = env::var(PLATFORM_TOKEN_ENV).context("TRAINING_PLATFORM_TOKEN must be set")?;
        Ok(Self::new(base_url, token))
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn generate_headers(&self) -> Result<HeaderMap, PlatformError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.token))
                .map_err(|e| PlatformError::Other(format!("invalid token header: {}", e)))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn check(response: Response, what: &str) -> Result<Response, PlatformError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await?;
        error!("{} failed with {}: {}", what, status, body);
        Err(PlatformError::Status { status, body })
    }
}

#[async_trait]
impl TrainingPlatform for HttpPlatform {
    async fn check_permissions(&self) -> Result<(), PlatformError> {
        let response = self
            .client
            .get(self.url("permissions/training-jobs"))
            .headers(self.generate_headers()?)
            .send()
            .await?;
        Self::check(response, "Permission check").await?;
        info!("Training platform permissions: OK");
        Ok(())
    }

    async fn resolve_role(&self, role_name: &str) -> Result<Option<String>, PlatformError> {
        let response = self
            .client
            .get(self.url(&format!("roles/{}", role_name)))
            .headers(self.generate_headers()?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let role: Value = Self::check(response, "Role lookup").await?.json().await?;
        let arn = role["Arn"]
            .as_str()
            .ok_or_else(|| PlatformError::Other("role response has no Arn".to_string()))?;
        Ok(Some(arn.to_string()))
    }

    async fn upload_artifact(&self, destination: &str, file_name: &str, content: Vec<u8>) -> Result<String, PlatformError> {
        retry(self.max_retries, self.delay, || async {
            let part = Part::bytes(content.clone())
                .file_name(file_name.to_string())
                .mime_str("application/octet-stream")?;
            let form = Form::new().part("file", part).text("destination", destination.to_string());

            let response = self
                .client
                .post(self.url("artifacts"))
                .header(AUTHORIZATION, format!("Bearer {}", self.token))
                .multipart(form)
                .send()
                .await?;
            let uploaded: Value = Self::check(response, "Artifact upload").await?.json().await?;
            debug!("Upload response: {:?}", uploaded);
            Ok::<String, PlatformError>(uploaded["Location"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}/{}", destination, file_name)))
        })
        .await
    }

    async fn create_training_job(&self, request: &TrainingJobRequest) -> Result<(), PlatformError> {
        let response = self
            .client
            .post(self.url("training-jobs"))
            .headers(self.generate_headers()?)
            .json(request)
            .send()
            .await?;
        let created: Value = Self::check(response, "Training job creation").await?.json().await?;
        info!("Training job created successfully");
        debug!("Response: {:?}", created);
        Ok(())
    }

    async fn describe_training_job(&self, job_name: &str) -> Result<JobDescription, PlatformError> {
        let response = self
            .client
            .get(self.url(&format!("training-jobs/{}", job_name)))
            .headers(self.generate_headers()?)
            .send()
            .await?;
        let described: DescribeResponse = Self::check(response, "Job status query").await?.json().await?;
        JobDescription::try_from(described)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn describe(value: Value) -> Result<JobDescription, PlatformError> {
        let response: DescribeResponse = serde_json::from_value(value)?;
        JobDescription::try_from(response)
    }

    #[test]
    fn parses_completed_description() {
        let description = describe(json!({
            "TrainingJobStatus": "Completed",
            "TrainingStartTime": "2025-07-09T19:46:00Z",
            "ModelArtifacts": {"S3ModelArtifacts": "s3://bucket/out/model.tar.gz"}
        }))
        .unwrap();
        assert_eq!(description.status, JobStatus::Completed);
        assert!(description.start_time.is_some());
        assert_eq!(description.model_artifacts.as_deref(), Some("s3://bucket/out/model.tar.gz"));
    }

    #[test]
    fn parses_failure_without_start_time() {
        let description = describe(json!({"TrainingJobStatus": "Failed", "FailureReason": "OOM"})).unwrap();
        assert_eq!(description.status, JobStatus::Failed);
        assert_eq!(description.start_time, None);
        assert_eq!(description.failure_reason.as_deref(), Some("OOM"));
    }

    #[test]
    fn unknown_status_is_an_error() {
        let err = describe(json!({"TrainingJobStatus": "Melting"})).unwrap_err();
        assert!(matches!(err, PlatformError::UnknownStatus(s) if s == "Melting"));
    }

    #[test]
    fn request_serializes_in_platform_casing() {
        let request = TrainingJobRequest {
            training_job_name: "mtvrp-training-1".to_string(),
            entry_point: "routeforge train".to_string(),
            role_arn: "arn".to_string(),
            resource_config: crate::adapters::platform::ResourceConfig {
                instance_type: "ml.g4dn.xlarge".to_string(),
                instance_count: 1,
            },
            hyper_parameters: [("batch-size".to_string(), "32".to_string())].into_iter().collect(),
            stopping_condition: crate::adapters::platform::StoppingCondition { max_runtime_in_seconds: 3600 },
            output_data_config: crate::adapters::platform::OutputDataConfig { s3_output_path: "s3://b/o".to_string() },
            code_location: "s3://b/c".to_string(),
            metric_definitions: vec![],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["TrainingJobName"], "mtvrp-training-1");
        assert_eq!(value["ResourceConfig"]["InstanceType"], "ml.g4dn.xlarge");
        assert_eq!(value["StoppingCondition"]["MaxRuntimeInSeconds"], 3600);
        assert_eq!(value["HyperParameters"]["batch-size"], "32");
        assert_eq!(value["OutputDataConfig"]["S3OutputPath"], "s3://b/o");
    }

    #[test]
    fn urls_are_joined_cleanly() {
        let platform = HttpPlatform::new("https://platform.example/".to_string(), "t".to_string());
        assert_eq!(platform.url("/training-jobs/x"), "https://platform.example/training-jobs/x");
    }
}
