use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, info, warn};

use crate::adapters::input::UniformGenerator;
use crate::adapters::output::{load_model, save_model, write_results};
use crate::adapters::policy::*;
use crate::core::baseline::ClassicalBaseline;
use crate::core::compare::{ComparisonReport, ResultAggregator, ResultArtifact};
use crate::core::config::RunConfig;
use crate::core::history::{TrainingHistory, TrainingRecord};
use crate::core::instance::ProblemInstanceBatch;
use crate::core::pipeline::SolvePipeline;
use crate::core::result::SolveResult;

/// Everything one evaluation produced.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub learned: SolveResult,
    pub classical: Option<SolveResult>,
    pub report: ComparisonReport,
}

/// Drives the local path: train, evaluate against the baseline, persist.
pub struct Trainer<R: PolicyRunner> {
    runner: R,
    config: RunConfig,
    history: TrainingHistory,
    generator: UniformGenerator,
}

impl<R: PolicyRunner> Trainer<R> {
    pub fn new(runner: R, config: RunConfig, seed: u64) -> Self {
        let generator = UniformGenerator::new(config.num_locations, config.variant_preset, seed);
        Self { runner, config, history: TrainingHistory::new(), generator }
    }

    /// Continues an earlier history instead of starting an empty one.
    pub fn with_history(mut self, history: TrainingHistory) -> Self {
        self.history = history;
        self
    }

    /// Loads parameters and history from a saved model.
    pub fn resume(mut self, model_path: &Path) -> Result<Self> {
        let history = load_model(model_path, &mut self.runner, &self.config)
            .with_context(|| format!("Failed to load model from {:?}", model_path))?;
        match history.latest() {
            Some(last) => info!(
                "Resuming with {} previous training runs (last: {} epochs, finished {})",
                history.len(),
                last.epochs_run,
                last.end_time
            ),
            None => info!("Resuming from a model with no training history"),
        }
        self.history = history;
        Ok(self)
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn train(&mut self) -> Result<TrainingRecord> {
        let train_data = self.generator.generate(self.config.num_training_samples);
        let validation_data = self.generator.generate(self.config.num_test_samples);
        let plan = TrainingPlan {
            max_epochs: self.config.max_epochs,
            early_stopping_patience: self.config.early_stopping_patience,
            log_to_experiment_tracker: self.config.log_to_experiment_tracker,
        };

        info!(
            "Training on {} instances, validating on {}",
            train_data.len(),
            validation_data.len()
        );
        let start_time = Utc::now();
        let outcome = match self.runner.train(&train_data, &validation_data, &plan) {
            Err(error @ (RunnerError::AcceleratorUnavailable(_) | RunnerError::DeviceMismatch(_))) => {
                warn!("Training on {} failed ({}), falling back to cpu", self.runner.device(), error);
                self.runner.to_device(Device::Cpu).context("Failed to move policy to cpu")?;
                self.runner
                    .train(&train_data, &validation_data, &plan)
                    .context("Training failed on cpu")?
            }
            other => other.context("Training failed")?,
        };
        let end_time = Utc::now();

        let record = TrainingRecord::new(
            start_time,
            end_time,
            outcome.epochs_run,
            Some(outcome.best_validation_cost),
            &self.config,
        );
        info!(
            "Training completed in {:.2} seconds ({} epochs{})",
            record.duration_seconds,
            outcome.epochs_run,
            if outcome.stopped_early { ", stopped early" } else { "" }
        );
        self.history.append(record.clone());
        Ok(record)
    }

    /// Evaluates on `test`, or on freshly generated instances when `None`.
    pub fn evaluate(
        &mut self,
        test: Option<ProblemInstanceBatch>,
        baseline: &ClassicalBaseline,
        max_runtime: Duration,
        method: DecodeMethod,
    ) -> Result<Evaluation> {
        let test_data = match test {
            Some(batch) => batch,
            None => self.generator.generate(self.config.num_test_samples),
        };
        for (variant, count) in test_data.variant_counts().0 {
            info!("   - {}: {} instances", variant, count);
        }

        let learned = self.solve_in_chunks(&test_data, method)?;
        if let Some(recovery) = learned.recovery {
            warn!("Evaluation needed recovery: {}", recovery);
        }

        info!("Classical baseline chain: {}", baseline.solver_names().join(", "));
        let classical = baseline.solve_baseline(&test_data, max_runtime);
        let report = ResultAggregator::compare(&learned, classical.as_ref());
        Ok(Evaluation { learned, classical, report })
    }

    fn solve_in_chunks(&mut self, test_data: &ProblemInstanceBatch, method: DecodeMethod) -> Result<SolveResult> {
        let chunks = if test_data.is_empty() {
            vec![test_data.clone()]
        } else {
            test_data.chunks(self.config.batch_size)
        };
        let mut actions = Vec::with_capacity(test_data.len());
        let mut costs = Vec::with_capacity(test_data.len());
        let mut recovery = None;

        for (index, chunk) in chunks.iter().enumerate() {
            debug!("Solving chunk {}/{} ({} instances)", index + 1, chunks.len(), chunk.len());
            let result = SolvePipeline::new(&mut self.runner)
                .solve(chunk, method)
                .with_context(|| format!("Learned policy could not solve chunk {} of the test batch", index + 1))?;
            recovery = recovery.or(result.recovery);
            actions.extend(result.actions);
            costs.extend(result.costs);
        }

        let learned = SolveResult::new(actions, costs);
        Ok(match recovery {
            Some(strategy) => learned.with_recovery(strategy),
            None => learned,
        })
    }

    /// Writes the model bundle when the run asks for it.
    pub fn save(&self) -> Result<Option<PathBuf>> {
        if !self.config.save_model {
            info!("Model saving disabled");
            return Ok(None);
        }
        let path = self.config.model_path();
        save_model(&path, &self.runner, &self.config, &self.history).context("Failed to save model")?;
        Ok(Some(path))
    }
}

/// Train, evaluate, save and write `training_results.json`.
pub fn run_local<R: PolicyRunner>(
    trainer: &mut Trainer<R>,
    baseline: &ClassicalBaseline,
    max_runtime: Duration,
    method: DecodeMethod,
) -> Result<ResultArtifact> {
    info!("Starting MTVRP training: {}", trainer.config().experiment_name);
    let record = trainer.train()?;
    let evaluation = trainer.evaluate(None, baseline, max_runtime, method)?;
    trainer.save()?;

    let artifact = ResultAggregator::build_artifact(trainer.config(), &record, &evaluation.report);
    let results_path = trainer.config().results_path();
    write_results(&results_path, &artifact).context("Failed to write results")?;
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::output::history_path;
    use crate::adapters::scoring_policy::ScoringPolicy;
    use crate::adapters::solvers::default_solver_chain;
    use crate::core::baseline::{MockSolverAdapter, SolverError};
    use crate::core::config::{ConfigMap, ConfigResolver, DEFAULT_HYPERPARAMETERS};
    use serde_json::{json, Value};
    use uuid::Uuid;

    fn small_config(dir: &Path, save: bool) -> RunConfig {
        let overrides: ConfigMap = [
            ("num_locations", json!(6)),
            ("max_epochs", json!(3)),
            ("early_stopping_patience", json!(1)),
            ("num_training_samples", json!(8)),
            ("num_test_samples", json!(4)),
            ("save_model", json!(save)),
            ("model_dir", json!(dir.join("models").display().to_string())),
            ("output_dir", json!(dir.join("output").display().to_string())),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        ConfigResolver::resolve(&DEFAULT_HYPERPARAMETERS, &overrides, &ConfigMap::new()).unwrap()
    }

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("routeforge-train-{}", Uuid::new_v4()))
    }

    fn failing_baseline() -> ClassicalBaseline {
        let mut solver = MockSolverAdapter::new();
        solver.expect_name().return_const("pyvrp".to_string());
        solver
            .expect_solve()
            .returning(|_, _| Err(SolverError::from_message("incompatible constructor arguments")));
        ClassicalBaseline::new(vec![Box::new(solver)])
    }

    #[test]
    fn training_falls_back_to_cpu_without_accelerator() {
        let dir = scratch_dir();
        let policy = ScoringPolicy::new(Device::Accelerator, 3).with_accelerator(false);
        let mut trainer = Trainer::new(policy, small_config(&dir, false), 3);

        let record = trainer.train().unwrap();

        assert_eq!(trainer.runner().device(), Device::Cpu);
        assert!(record.epochs_run >= 1 && record.epochs_run <= 3);
        assert!(record.best_validation_cost.is_some());
        assert_eq!(trainer.history().len(), 1);
    }

    #[test]
    fn history_accumulates_across_runs() {
        let dir = scratch_dir();
        let mut trainer = Trainer::new(ScoringPolicy::new(Device::Cpu, 1), small_config(&dir, false), 1);
        let first = trainer.train().unwrap();
        let second = trainer.train().unwrap();

        let records = trainer.history().records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].run_id, first.run_id);
        assert_eq!(records[1].run_id, second.run_id);
    }

    #[test]
    fn evaluation_without_baseline_has_no_gap() {
        let dir = scratch_dir();
        let mut trainer = Trainer::new(ScoringPolicy::new(Device::Cpu, 2), small_config(&dir, false), 2);

        let evaluation = trainer
            .evaluate(None, &failing_baseline(), Duration::from_secs(1), DecodeMethod::Greedy)
            .unwrap();

        assert_eq!(evaluation.learned.len(), 4);
        assert!(evaluation.classical.is_none());
        assert_eq!(evaluation.report.gap_percent, None);
        assert!(evaluation.learned.summary.mean > 0.0);
    }

    #[test]
    fn evaluation_decodes_in_batch_size_chunks() {
        let dir = scratch_dir();
        let mut config = small_config(&dir, false);
        config.batch_size = 3;

        let mut runner = MockPolicyRunner::new();
        runner.expect_device().return_const(Device::Cpu);
        runner
            .expect_reset()
            .times(2)
            .returning(|b| Ok(EnvState::new(Device::Cpu, b.clone())));
        runner.expect_decode().times(2).returning(|state, _| {
            let n = state.batch.len();
            Ok(DecodeOutput { actions: vec![vec![1]; n], rewards: vec![-(n as f64); n] })
        });
        let mut trainer = Trainer::new(runner, config, 4);

        let evaluation = trainer
            .evaluate(None, &failing_baseline(), Duration::from_secs(1), DecodeMethod::Greedy)
            .unwrap();

        assert_eq!(evaluation.learned.len(), 4);
        assert_eq!(evaluation.learned.costs, vec![3.0, 3.0, 3.0, 1.0]);
        assert_eq!(evaluation.learned.summary.mean, 2.5);
        assert_eq!(evaluation.learned.recovery, None);
    }

    #[test]
    fn run_local_writes_model_history_and_results() {
        let dir = scratch_dir();
        let config = small_config(&dir, true);
        let mut trainer = Trainer::new(ScoringPolicy::new(Device::Cpu, 5), config.clone(), 5);
        let baseline = ClassicalBaseline::new(default_solver_chain());

        let artifact = run_local(&mut trainer, &baseline, Duration::from_secs(5), DecodeMethod::Greedy).unwrap();

        assert!(config.model_path().exists());
        assert!(history_path(&config.model_path()).exists());
        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(config.results_path()).unwrap()).unwrap();
        assert_eq!(written["training_config"]["num_locations"], 6);
        assert!(written["evaluation_results"]["mean_cost"].as_f64().unwrap() > 0.0);
        let comparison = artifact.classical_comparison.expect("built-in solvers should succeed");
        assert_eq!(comparison.solver.as_deref(), Some("savings"));

        let resumed = Trainer::new(ScoringPolicy::new(Device::Cpu, 6), config.clone(), 6)
            .resume(&config.model_path())
            .unwrap();
        assert_eq!(resumed.history().len(), 1);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn save_is_skipped_when_disabled() {
        let dir = scratch_dir();
        let trainer = Trainer::new(ScoringPolicy::new(Device::Cpu, 0), small_config(&dir, false), 0);
        assert_eq!(trainer.save().unwrap(), None);
        assert!(!dir.exists());
    }
}
