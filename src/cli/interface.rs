use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use crate::adapters::input::FileInputAdapter;
use crate::adapters::output::load_model;
use crate::adapters::policy::Device;
use crate::adapters::remote::HttpPlatform;
use crate::adapters::scoring_policy::ScoringPolicy;
use crate::adapters::solvers::build_solver_chain;
use crate::core::baseline::ClassicalBaseline;
use crate::core::config::{parse_override, ConfigResolver, RunConfig};
use crate::core::job::{JobSubmitter, ResourceSpec};
use crate::core::monitor::{interrupt_from, JobMonitor, MonitorOutcome, DEFAULT_POLL_INTERVAL};
use crate::core::train::{run_local, Trainer};
use crate::utils::lib::*;

pub async fn run_cli_interface() -> Result<()> {
    let args = Args::parse();
    match args.command {
        Command::Train(train) => run_train(train),
        Command::Evaluate(evaluate) => run_evaluate(evaluate),
        Command::Submit(submit) => run_submit(submit).await,
        Command::Monitor(monitor) => run_monitor(monitor).await,
    }
}

/// Hyperparameter flags first, then `--set` pairs, so `--set` wins on a clash.
fn resolve_config(run: &RunOptions) -> Result<RunConfig> {
    let mut overrides = run.hyperparameters.to_config_map();
    for raw in &run.overrides {
        let (key, value) = parse_override(raw).context("Invalid configuration override")?;
        overrides.insert(key, value);
    }
    let config = ConfigResolver::resolve_with_defaults(&overrides).context("Failed to resolve configuration")?;
    info!("Configuration: {}", serde_json::to_string(&config)?);
    Ok(config)
}

fn create_policy(config: &RunConfig, seed: u64) -> ScoringPolicy {
    let preferred = if config.use_accelerator { Device::Accelerator } else { Device::Cpu };
    ScoringPolicy::new(preferred, seed)
}

fn create_baseline(evaluation: &EvaluationOptions) -> ClassicalBaseline {
    ClassicalBaseline::new(build_solver_chain(&evaluation.solvers))
}

fn run_train(args: TrainArgs) -> Result<()> {
    let config = resolve_config(&args.run)?;
    let mut trainer = Trainer::new(create_policy(&config, args.run.seed), config, args.run.seed);
    if let Some(model) = &args.resume {
        trainer = trainer.resume(model)?;
    }

    let artifact = run_local(
        &mut trainer,
        &create_baseline(&args.evaluation),
        Duration::from_secs(args.evaluation.max_runtime),
        args.evaluation.method,
    )?;
    info!(
        "Training completed successfully in {:.2} seconds",
        artifact.training_time_seconds
    );
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    let config = resolve_config(&args.run)?;
    let mut policy = create_policy(&config, args.run.seed);
    let history = load_model(&args.model, &mut policy, &config)
        .with_context(|| format!("Failed to load model from {:?}", args.model))?;

    let test = match &args.instances {
        Some(folder) => Some(
            FileInputAdapter::new(folder.clone())
                .fetch_batch()
                .context("Failed to read test instances")?,
        ),
        None => None,
    };

    let mut trainer = Trainer::new(policy, config, args.run.seed).with_history(history);
    let evaluation = trainer.evaluate(
        test,
        &create_baseline(&args.evaluation),
        Duration::from_secs(args.evaluation.max_runtime),
        args.evaluation.method,
    )?;
    println!("{}", serde_json::to_string_pretty(&evaluation.report)?);
    Ok(())
}

async fn run_submit(args: SubmitArgs) -> Result<()> {
    let config = resolve_config(&args.run)?;
    let platform = HttpPlatform::from_env()?
        .with_retries(args.upload_retries)
        .with_delay(Duration::from_secs(args.retry_delay));

    let mut resources = ResourceSpec::new(&args.bucket, args.code_dir.clone());
    resources.instance_type = args.instance_type.clone();
    resources.max_runtime = Duration::from_secs(args.max_run);
    if let Some(role) = &args.role {
        resources.role_name = role.clone();
    }

    let handle = JobSubmitter::new(&platform)
        .submit(&config, &resources)
        .await
        .context("Failed to submit training job")?;
    println!("{}", serde_json::to_string_pretty(&handle)?);

    if args.wait {
        let outcome = watch(&platform, &handle.job_name, DEFAULT_POLL_INTERVAL).await;
        report(&outcome);
    } else {
        info!("Monitor with: routeforge monitor {}", handle.job_name);
    }
    Ok(())
}

async fn run_monitor(args: MonitorArgs) -> Result<()> {
    let platform = HttpPlatform::from_env()?;
    let outcome = watch(&platform, &args.job_name, Duration::from_secs(args.interval)).await;
    report(&outcome);
    Ok(())
}

async fn watch(platform: &HttpPlatform, job_name: &str, interval: Duration) -> MonitorOutcome {
    JobMonitor::new(platform)
        .with_poll_interval(interval)
        .watch_until(job_name, interrupt_from(tokio::signal::ctrl_c()))
        .await
}

fn report(outcome: &MonitorOutcome) {
    let job = outcome.report();
    let status = job.status.map_or_else(|| "never observed".to_string(), |s| s.to_string());
    match outcome {
        MonitorOutcome::Finished(_) => info!("Job {} finished with status {}", job.job_name, status),
        MonitorOutcome::Detached(_) => info!("Detached from job {} (last status {})", job.job_name, status),
    }
    if let Some(location) = &job.model_artifacts {
        println!("{}", location);
    }
}
