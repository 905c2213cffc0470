use std::fmt::Display;
use std::future::Future;
use std::io;
use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use serde_json::Value;
use tokio::time::{sleep, Duration};

use crate::adapters::policy::DecodeMethod;
use crate::core::config::ConfigMap;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Train a policy, evaluate it against the classical baseline and save the artifacts.
    Train(TrainArgs),
    /// Evaluate a saved policy on fresh or stored instances.
    Evaluate(EvaluateArgs),
    /// Submit a training run to the remote platform.
    Submit(SubmitArgs),
    /// Follow a remote training job until it finishes.
    Monitor(MonitorArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunOptions {
    /// Configuration override, e.g. `--set num_locations=20`. Repeatable.
    #[clap(long = "set", value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,

    #[clap(long, default_value = "0")]
    pub seed: u64,

    #[clap(flatten)]
    pub hyperparameters: HyperparameterArgs,
}

/// The hyperparameters a submitted job is started with, one flag per key.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct HyperparameterArgs {
    #[clap(long)]
    pub num_locations: Option<String>,
    #[clap(long)]
    pub batch_size: Option<String>,
    #[clap(long)]
    pub variant_preset: Option<String>,
    #[clap(long)]
    pub max_epochs: Option<String>,
    #[clap(long)]
    pub early_stopping_patience: Option<String>,
    #[clap(long)]
    pub use_accelerator: Option<String>,
    #[clap(long)]
    pub log_to_experiment_tracker: Option<String>,
    #[clap(long)]
    pub num_training_samples: Option<String>,
    #[clap(long)]
    pub num_test_samples: Option<String>,
    #[clap(long)]
    pub experiment_name: Option<String>,
    #[clap(long)]
    pub save_model: Option<String>,
}

impl HyperparameterArgs {
    pub fn to_config_map(&self) -> ConfigMap {
        [
            ("num_locations", &self.num_locations),
            ("batch_size", &self.batch_size),
            ("variant_preset", &self.variant_preset),
            ("max_epochs", &self.max_epochs),
            ("early_stopping_patience", &self.early_stopping_patience),
            ("use_accelerator", &self.use_accelerator),
            ("log_to_experiment_tracker", &self.log_to_experiment_tracker),
            ("num_training_samples", &self.num_training_samples),
            ("num_test_samples", &self.num_test_samples),
            ("experiment_name", &self.experiment_name),
            ("save_model", &self.save_model),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_ref().map(|v| (key.to_string(), Value::String(v.clone()))))
        .collect()
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct EvaluationOptions {
    /// Classical solvers to try, in order.
    #[clap(long, value_delimiter = ',', default_value = "savings,nearest-neighbour")]
    pub solvers: Vec<String>,

    /// Time budget per instance for each classical solver, in seconds.
    #[clap(long, default_value = "60")]
    pub max_runtime: u64,

    #[clap(long, value_enum, default_value = "greedy")]
    pub method: DecodeMethod,
}

#[derive(ClapArgs, Debug)]
pub struct TrainArgs {
    #[clap(flatten)]
    pub run: RunOptions,

    #[clap(flatten)]
    pub evaluation: EvaluationOptions,

    /// Continue from a saved model, appending to its training history.
    #[clap(long)]
    pub resume: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
pub struct EvaluateArgs {
    #[clap(long)]
    pub model: PathBuf,

    /// Folder of `*.json` instance batches; instances are generated when omitted.
    #[clap(short, long)]
    pub instances: Option<PathBuf>,

    #[clap(flatten)]
    pub run: RunOptions,

    #[clap(flatten)]
    pub evaluation: EvaluationOptions,
}

#[derive(ClapArgs, Debug)]
pub struct SubmitArgs {
    #[clap(flatten)]
    pub run: RunOptions,

    /// Storage prefix for code and outputs, e.g. `s3://my-bucket`.
    #[clap(long)]
    pub bucket: String,

    #[clap(long, default_value = "./dist")]
    pub code_dir: PathBuf,

    #[clap(long, default_value = "ml.g4dn.xlarge")]
    pub instance_type: String,

    /// Maximum wall-clock runtime in seconds.
    #[clap(long, default_value = "3600")]
    pub max_run: u64,

    #[clap(long)]
    pub role: Option<String>,

    /// Extra attempts for the code upload before giving up.
    #[clap(long, default_value = "3")]
    pub upload_retries: u32,

    /// Seconds before the first upload retry; doubles on each further attempt.
    #[clap(long, default_value = "1")]
    pub retry_delay: u64,

    /// Keep polling the job after submission.
    #[clap(long)]
    pub wait: bool,
}

#[derive(ClapArgs, Debug)]
pub struct MonitorArgs {
    pub job_name: String,

    /// Seconds between status queries.
    #[clap(long, default_value = "30")]
    pub interval: u64,
}

pub fn create_progress_bar(total: u64) -> Result<ProgressBar, io::Error> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

pub async fn retry<F, Fut, T, E>(max_retries: u32, initial_delay: Duration, mut task: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut retries = 0;
    let mut delay = initial_delay;

    loop {
        match task().await {
            Ok(result) => return Ok(result),
            Err(e) if retries >= max_retries => return Err(e),
            Err(e) => {
                warn!("Task failed ({}). Retrying in {:?}...", e, delay);
                sleep(delay).await;
                retries += 1;
                delay *= 2; // Exponential backoff
            }
        }
    }
}
