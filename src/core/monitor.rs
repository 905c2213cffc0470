use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{Local, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::adapters::platform::TrainingPlatform;
use crate::core::error::TransientPollError;
use crate::core::job::JobStatus;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobReport {
    pub job_name: String,
    /// Last state the platform reported, `None` if no query has succeeded yet.
    pub status: Option<JobStatus>,
    /// Status queries issued, failed ones included.
    pub polls: usize,
    pub transient_errors: usize,
    /// State after each successful query, in order.
    pub observed: Vec<JobStatus>,
    pub elapsed_seconds: Option<i64>,
    pub model_artifacts: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum MonitorOutcome {
    /// The job reached a terminal state.
    Finished(JobReport),
    /// Local polling was interrupted; the remote job keeps running.
    Detached(JobReport),
}

impl MonitorOutcome {
    pub fn report(&self) -> &JobReport {
        match self {
            MonitorOutcome::Finished(report) | MonitorOutcome::Detached(report) => report,
        }
    }
}

/// Resolves once `signal` fires. If the signal source cannot be installed this never resolves,
/// so a broken handler does not end monitoring early.
pub async fn interrupt_from<F, E>(signal: F)
where
    F: Future<Output = Result<(), E>>,
    E: fmt::Display,
{
    if let Err(e) = signal.await {
        warn!("Cannot listen for interrupts ({}); monitoring until the job finishes", e);
        futures::future::pending::<()>().await;
    }
}

/// `H:MM:SS`, the same shape a timedelta prints.
pub fn format_elapsed(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!("{}:{:02}:{:02}", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}

pub struct JobMonitor<'a, P: TrainingPlatform + ?Sized> {
    platform: &'a P,
    poll_interval: Duration,
}

impl<'a, P: TrainingPlatform + ?Sized> JobMonitor<'a, P> {
    pub fn new(platform: &'a P) -> Self {
        Self { platform, poll_interval: DEFAULT_POLL_INTERVAL }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn watch(&self, job_name: &str) -> MonitorOutcome {
        self.watch_until(job_name, futures::future::pending::<()>()).await
    }

    /// Polls until the job is terminal or `shutdown` resolves. Shutdown only stops the local loop.
    pub async fn watch_until<F>(&self, job_name: &str, shutdown: F) -> MonitorOutcome
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Monitoring training job: {}", job_name);

        let mut report = JobReport {
            job_name: job_name.to_string(),
            status: None,
            polls: 0,
            transient_errors: 0,
            observed: Vec::new(),
            elapsed_seconds: None,
            model_artifacts: None,
            failure_reason: None,
        };

        loop {
            report.polls += 1;
            match self.platform.describe_training_job(job_name).await {
                Ok(description) => {
                    let next = match report.status {
                        Some(status) => status.transition(description.status),
                        None => description.status,
                    };
                    report.status = Some(next);
                    report.observed.push(next);
                    report.elapsed_seconds = description.start_time.map(|start| (Utc::now() - start).num_seconds());

                    let elapsed = report
                        .elapsed_seconds
                        .map(format_elapsed)
                        .unwrap_or_else(|| "Not started".to_string());
                    info!("{} - Status: {} - Elapsed: {}", Local::now().format("%H:%M:%S"), next, elapsed);

                    if next.is_terminal() {
                        match next {
                            JobStatus::Completed => {
                                report.model_artifacts = description.model_artifacts;
                                info!(
                                    "Training completed. Model artifacts: {}",
                                    report.model_artifacts.as_deref().unwrap_or("unknown")
                                );
                            }
                            _ => {
                                let reason = description.failure_reason.unwrap_or_else(|| "unknown".to_string());
                                warn!("Training {}. Failure reason: {}", next, reason);
                                report.failure_reason = Some(reason);
                            }
                        }
                        return MonitorOutcome::Finished(report);
                    }
                }
                Err(source) => {
                    let error = TransientPollError { job_name: job_name.to_string(), source };
                    warn!("{}; retrying in {:?}", error, self.poll_interval);
                    report.transient_errors += 1;
                }
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Monitoring stopped by user; job {} keeps running", job_name);
                    return MonitorOutcome::Detached(report);
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::platform::MockTrainingPlatform;
    use crate::core::error::PlatformError;
    use crate::core::job::JobDescription;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn scripted(script: Vec<Result<JobDescription, PlatformError>>) -> MockTrainingPlatform {
        let queue = Mutex::new(VecDeque::from(script));
        let mut platform = MockTrainingPlatform::new();
        platform.expect_describe_training_job().returning(move |_| {
            queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(PlatformError::Other("script exhausted".to_string())))
        });
        platform
    }

    fn completed_with(location: &str) -> JobDescription {
        JobDescription {
            status: JobStatus::Completed,
            start_time: Some(Utc::now()),
            model_artifacts: Some(location.to_string()),
            failure_reason: None,
        }
    }

    #[tokio::test]
    async fn completes_after_scripted_sequence() {
        let platform = scripted(vec![
            Ok(JobDescription::with_status(JobStatus::Submitted)),
            Ok(JobDescription::with_status(JobStatus::InProgress)),
            Ok(JobDescription::with_status(JobStatus::InProgress)),
            Ok(completed_with("X")),
        ]);

        let outcome = JobMonitor::new(&platform)
            .with_poll_interval(Duration::ZERO)
            .watch("mtvrp-training-test")
            .await;

        let MonitorOutcome::Finished(report) = outcome else {
            panic!("monitor should finish");
        };
        assert_eq!(report.polls, 4);
        assert_eq!(report.status, Some(JobStatus::Completed));
        assert_eq!(report.model_artifacts.as_deref(), Some("X"));
        assert_eq!(report.failure_reason, None);
    }

    #[tokio::test]
    async fn transient_errors_do_not_move_the_state_machine() {
        let platform = scripted(vec![
            Ok(JobDescription::with_status(JobStatus::InProgress)),
            Err(PlatformError::Other("connection reset".to_string())),
            Ok(JobDescription::with_status(JobStatus::InProgress)),
            Ok(completed_with("s3://out/model.tar.gz")),
        ]);

        let outcome = JobMonitor::new(&platform)
            .with_poll_interval(Duration::ZERO)
            .watch("job")
            .await;

        let MonitorOutcome::Finished(report) = outcome else {
            panic!("monitor should finish");
        };
        assert_eq!(report.polls, 4);
        assert_eq!(report.transient_errors, 1);
        assert_eq!(
            report.observed,
            vec![JobStatus::InProgress, JobStatus::InProgress, JobStatus::Completed]
        );
    }

    #[tokio::test]
    async fn failure_reason_defaults_to_unknown() {
        let platform = scripted(vec![
            Ok(JobDescription::with_status(JobStatus::InProgress)),
            Ok(JobDescription::with_status(JobStatus::Failed)),
        ]);

        let outcome = JobMonitor::new(&platform).with_poll_interval(Duration::ZERO).watch("job").await;
        let report = outcome.report();
        assert_eq!(report.status, Some(JobStatus::Failed));
        assert_eq!(report.failure_reason.as_deref(), Some("unknown"));
        assert_eq!(report.model_artifacts, None);
    }

    #[tokio::test]
    async fn stopped_job_surfaces_platform_reason() {
        let mut stopped = JobDescription::with_status(JobStatus::Stopped);
        stopped.failure_reason = Some("MaxRuntimeExceeded".to_string());
        let platform = scripted(vec![Ok(stopped)]);

        let outcome = JobMonitor::new(&platform).with_poll_interval(Duration::ZERO).watch("job").await;
        assert!(matches!(outcome, MonitorOutcome::Finished(_)));
        assert_eq!(outcome.report().failure_reason.as_deref(), Some("MaxRuntimeExceeded"));
        assert_eq!(outcome.report().polls, 1);
    }

    #[tokio::test]
    async fn interrupt_detaches_without_touching_the_job() {
        let mut platform = MockTrainingPlatform::new();
        platform
            .expect_describe_training_job()
            .times(1)
            .returning(|_| Ok(JobDescription::with_status(JobStatus::InProgress)));
        platform.expect_create_training_job().never();

        let outcome = JobMonitor::new(&platform)
            .with_poll_interval(Duration::from_secs(3600))
            .watch_until("job", async {})
            .await;

        let MonitorOutcome::Detached(report) = outcome else {
            panic!("monitor should detach");
        };
        assert_eq!(report.status, Some(JobStatus::InProgress));
        assert_eq!(report.polls, 1);
    }

    #[tokio::test]
    async fn detaching_before_any_answer_reports_no_status() {
        let platform = scripted(vec![Err(PlatformError::Other("connection refused".to_string()))]);

        let outcome = JobMonitor::new(&platform)
            .with_poll_interval(Duration::from_secs(3600))
            .watch_until("job", async {})
            .await;

        let MonitorOutcome::Detached(report) = outcome else {
            panic!("monitor should detach");
        };
        assert_eq!(report.status, None);
        assert!(report.observed.is_empty());
        assert_eq!(report.transient_errors, 1);
    }

    #[tokio::test]
    async fn failed_signal_handler_never_fires() {
        let fired = tokio::time::timeout(
            Duration::from_millis(50),
            interrupt_from(async { Err::<(), _>("signal handler unavailable") }),
        )
        .await;
        assert!(fired.is_err());

        let fired = tokio::time::timeout(Duration::from_millis(50), interrupt_from(async { Ok::<(), String>(()) })).await;
        assert!(fired.is_ok());
    }

    #[tokio::test]
    async fn failed_signal_handler_keeps_monitoring_to_the_end() {
        let platform = scripted(vec![
            Ok(JobDescription::with_status(JobStatus::InProgress)),
            Ok(JobDescription::with_status(JobStatus::InProgress)),
            Ok(completed_with("s3://out/model.tar.gz")),
        ]);

        let outcome = JobMonitor::new(&platform)
            .with_poll_interval(Duration::from_millis(1))
            .watch_until("job", interrupt_from(async { Err::<(), _>("signal handler unavailable") }))
            .await;

        assert!(matches!(outcome, MonitorOutcome::Finished(_)));
        assert_eq!(outcome.report().polls, 3);
    }

    #[test]
    fn elapsed_is_formatted_like_a_timedelta() {
        assert_eq!(format_elapsed(0), "0:00:00");
        assert_eq!(format_elapsed(3725), "1:02:05");
    }
}
