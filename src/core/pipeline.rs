use std::fmt;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::adapters::policy::*;
use crate::core::error::SolveFailure;
use crate::core::instance::ProblemInstanceBatch;
use crate::core::result::SolveResult;

/// One step of the bounded recovery chain. Each step runs at most once per solve.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Decode on whatever device the runner is currently placed on.
    Preferred,
    /// Move the runner to general-purpose compute, reset with the batch there and decode again.
    FallbackToCpu,
    /// Reset the environment again on the current device and decode again.
    ResetAndRetry,
}

impl RecoveryStrategy {
    pub const CHAIN: [RecoveryStrategy; 3] = [
        RecoveryStrategy::Preferred,
        RecoveryStrategy::FallbackToCpu,
        RecoveryStrategy::ResetAndRetry,
    ];

    /// Whether this step is a sensible response to `error`. `Preferred` only ever runs first.
    pub fn applies_to(&self, error: &RunnerError) -> bool {
        match self {
            RecoveryStrategy::Preferred => false,
            RecoveryStrategy::FallbackToCpu => matches!(
                error,
                RunnerError::DeviceMismatch(_) | RunnerError::AcceleratorUnavailable(_)
            ),
            RecoveryStrategy::ResetAndRetry => matches!(error, RunnerError::MissingStateKey(_)),
        }
    }

    fn attempt<R: PolicyRunner + ?Sized>(
        &self,
        runner: &mut R,
        batch: &ProblemInstanceBatch,
        method: DecodeMethod,
    ) -> Result<DecodeOutput, RunnerError> {
        if *self == RecoveryStrategy::FallbackToCpu {
            runner.to_device(Device::Cpu)?;
        }
        let state = runner.reset(batch)?;
        runner.decode(&state, method)
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryStrategy::Preferred => f.write_str("preferred device"),
            RecoveryStrategy::FallbackToCpu => f.write_str("cpu fallback"),
            RecoveryStrategy::ResetAndRetry => f.write_str("reset and retry"),
        }
    }
}

/// Runs a [`PolicyRunner`] over a batch. Holds the runner mutably, so solves are serialised by construction.
pub struct SolvePipeline<'a, R: PolicyRunner + ?Sized> {
    runner: &'a mut R,
}

impl<'a, R: PolicyRunner + ?Sized> SolvePipeline<'a, R> {
    pub fn new(runner: &'a mut R) -> Self {
        Self { runner }
    }

    pub fn solve(&mut self, batch: &ProblemInstanceBatch, method: DecodeMethod) -> Result<SolveResult, SolveFailure> {
        if batch.is_empty() {
            return Err(SolveFailure::EmptyBatch);
        }
        batch
            .validate()
            .map_err(|(index, source)| SolveFailure::InvalidInstance { index, source })?;
        info!("Solving {} instances using {:?} decoding on {}", batch.len(), method, self.runner.device());

        let mut attempts = 0;
        let mut last_error: Option<RunnerError> = None;

        for strategy in RecoveryStrategy::CHAIN {
            if let Some(error) = &last_error {
                if !strategy.applies_to(error) {
                    debug!("Skipping {}: does not apply to '{}'", strategy, error);
                    continue;
                }
                warn!("Solve failed ({}), trying {}", error, strategy);
            }

            attempts += 1;
            match strategy.attempt(&mut *self.runner, batch, method) {
                Ok(output) => {
                    let result = Self::into_result(output, batch.len())?;
                    info!(
                        "Solved {} instances via {}: mean cost {:.4}, best {:.4}",
                        result.len(),
                        strategy,
                        result.summary.mean,
                        result.summary.min
                    );
                    return Ok(match strategy {
                        RecoveryStrategy::Preferred => result,
                        recovered => result.with_recovery(recovered),
                    });
                }
                Err(error) => last_error = Some(error),
            }
        }

        let last = last_error.unwrap_or_else(|| RunnerError::Other("no recovery strategy configured".to_string()));
        Err(SolveFailure::Exhausted { attempts, last })
    }

    fn into_result(output: DecodeOutput, expected: usize) -> Result<SolveResult, SolveFailure> {
        let got = output.actions.len();
        if got != expected || output.rewards.len() != expected {
            return Err(SolveFailure::ShapeMismatch { expected, got: got.min(output.rewards.len()) });
        }
        let costs = output.rewards.iter().map(|r| -r).collect();
        Ok(SolveResult::new(output.actions, costs))
    }
}
