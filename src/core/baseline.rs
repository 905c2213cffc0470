use std::time::Duration;

use log::{info, warn};
use thiserror::Error;

use crate::core::instance::ProblemInstanceBatch;
use crate::core::result::SolveResult;

#[cfg(test)]
use mockall::automock;

/// Default per-instance budget for a classical solver.
pub const DEFAULT_MAX_RUNTIME: Duration = Duration::from_secs(60);

const INCOMPATIBLE_CONSTRUCTOR: &str = "incompatible constructor";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("solver version incompatible: {0}")]
    IncompatibleVersion(String),

    #[error("solver unavailable: {0}")]
    Unavailable(String),

    #[error("solver exceeded its time budget of {0:?}")]
    Timeout(Duration),

    #[error("solver failed: {0}")]
    Failed(String),
}

impl SolverError {
    /// Classifies an unstructured failure message. Only the known constructor signature counts as a version problem.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.to_lowercase().contains(INCOMPATIBLE_CONSTRUCTOR) {
            SolverError::IncompatibleVersion(message)
        } else {
            SolverError::Failed(message)
        }
    }
}

pub type SolverOutput = (Vec<Vec<usize>>, Vec<f64>);

/// A classical solver. Runs on general-purpose compute only.
#[cfg_attr(test, automock)]
pub trait SolverAdapter {
    fn name(&self) -> String;

    fn solve(&self, batch: &ProblemInstanceBatch, max_runtime: Duration) -> Result<SolverOutput, SolverError>;
}

/// Ordered solver chain producing an optional comparison baseline.
pub struct ClassicalBaseline {
    solvers: Vec<Box<dyn SolverAdapter>>,
}

impl ClassicalBaseline {
    pub fn new(solvers: Vec<Box<dyn SolverAdapter>>) -> Self {
        Self { solvers }
    }

    pub fn solver_names(&self) -> Vec<String> {
        self.solvers.iter().map(|s| s.name()).collect()
    }

    /// Tries each solver in order. Returns `None` once the chain is exhausted; never fails the caller.
    pub fn solve_baseline(&self, batch: &ProblemInstanceBatch, max_runtime_per_instance: Duration) -> Option<SolveResult> {
        if batch.is_empty() {
            warn!("Skipping classical baseline for an empty batch");
            return None;
        }

        for solver in &self.solvers {
            let name = solver.name();
            info!("Solving with classical solver: {} (max runtime {:?} per instance)", name, max_runtime_per_instance);

            let outcome = solver
                .solve(batch, max_runtime_per_instance)
                .and_then(|(actions, costs)| {
                    if actions.len() != batch.len() || costs.len() != batch.len() {
                        return Err(SolverError::Failed(format!(
                            "returned {} routes and {} costs for {} instances",
                            actions.len(),
                            costs.len(),
                            batch.len()
                        )));
                    }
                    Ok((actions, costs))
                });

            match outcome {
                Ok((actions, costs)) => {
                    let result = SolveResult::new(actions, costs).with_solver(&name);
                    info!(
                        "Classical solver {} results: mean cost {:.4}, best {:.4}",
                        name, result.summary.mean, result.summary.min
                    );
                    return Some(result);
                }
                Err(SolverError::IncompatibleVersion(reason)) => {
                    warn!("{} version incompatibility detected ({}), moving to next solver", name, reason);
                }
                Err(e) => {
                    warn!("Classical solver {} failed: {}", name, e);
                }
            }
        }

        warn!("All classical solvers failed; continuing without a baseline");
        None
    }
}
