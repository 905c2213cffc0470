use serde::{Deserialize, Serialize};

use crate::core::pipeline::RecoveryStrategy;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct CostSummary {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl CostSummary {
    /// Summary statistics over `costs`. `std` uses the sample (n - 1) estimator and is zero for a single cost.
    pub fn from_costs(costs: &[f64]) -> Self {
        if costs.is_empty() {
            return Self { mean: 0.0, std: 0.0, min: 0.0, max: 0.0 };
        }
        let n = costs.len() as f64;
        let mean = costs.iter().sum::<f64>() / n;
        let std = if costs.len() > 1 {
            (costs.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        let min = costs.iter().copied().fold(f64::INFINITY, f64::min);
        let max = costs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self { mean, std, min, max }
    }
}

/// Routes and costs for one batch, index-aligned with the batch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SolveResult {
    pub actions: Vec<Vec<usize>>,
    pub costs: Vec<f64>,
    pub summary: CostSummary,
    /// Fallback that produced this result, `None` for the preferred path and for baselines.
    pub recovery: Option<RecoveryStrategy>,
    /// Classical solver that produced this result, `None` for the learned policy.
    pub solver: Option<String>,
}

impl SolveResult {
    pub fn new(actions: Vec<Vec<usize>>, costs: Vec<f64>) -> Self {
        let summary = CostSummary::from_costs(&costs);
        Self { actions, costs, summary, recovery: None, solver: None }
    }

    pub fn with_recovery(mut self, recovery: RecoveryStrategy) -> Self {
        self.recovery = Some(recovery);
        self
    }

    pub fn with_solver(mut self, solver: &str) -> Self {
        self.solver = Some(solver.to_string());
        self
    }

    pub fn len(&self) -> usize {
        self.costs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }

    /// Index of the cheapest instance.
    pub fn best_index(&self) -> Option<usize> {
        self.costs
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
    }
}
