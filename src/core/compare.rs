use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::core::config::RunConfig;
use crate::core::history::TrainingRecord;
use crate::core::result::{CostSummary, SolveResult};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Baseline {
    Available,
    Unavailable,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapBand {
    Excellent,
    Good,
    RoomForImprovement,
}

impl GapBand {
    pub fn from_gap(gap: f64) -> Self {
        if gap < 5.0 {
            GapBand::Excellent
        } else if gap < 10.0 {
            GapBand::Good
        } else {
            GapBand::RoomForImprovement
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ComparisonReport {
    pub learned: CostSummary,
    pub classical: Option<CostSummary>,
    pub classical_solver: Option<String>,
    /// `None` when there is no baseline or its mean cost is exactly zero.
    pub gap_percent: Option<f64>,
    pub baseline: Baseline,
}

pub struct ResultAggregator;

impl ResultAggregator {
    pub fn compare(rl: &SolveResult, classical: Option<&SolveResult>) -> ComparisonReport {
        let Some(classical) = classical else {
            warn!("Cannot compare - classical solver unavailable");
            return ComparisonReport {
                learned: rl.summary,
                classical: None,
                classical_solver: None,
                gap_percent: None,
                baseline: Baseline::Unavailable,
            };
        };

        let gap_percent = Self::gap(rl.summary.mean, classical.summary.mean);
        info!("Performance comparison:");
        info!("   - RL method cost: {:.4}", rl.summary.mean);
        info!("   - Classical cost: {:.4}", classical.summary.mean);
        match gap_percent {
            Some(gap) => info!("   - Gap: {:.2}% ({:?})", gap, GapBand::from_gap(gap)),
            None => warn!("   - Gap: undefined (classical mean cost is zero)"),
        }

        ComparisonReport {
            learned: rl.summary,
            classical: Some(classical.summary),
            classical_solver: classical.solver.clone(),
            gap_percent,
            baseline: Baseline::Available,
        }
    }

    pub fn gap(rl_mean: f64, classical_mean: f64) -> Option<f64> {
        if classical_mean == 0.0 {
            return None;
        }
        Some((rl_mean - classical_mean) / classical_mean * 100.0)
    }

    pub fn build_artifact(config: &RunConfig, record: &TrainingRecord, report: &ComparisonReport) -> ResultArtifact {
        let classical_comparison = report.classical.map(|classical| ClassicalComparison {
            solver: report.classical_solver.clone(),
            classical_mean_cost: classical.mean,
            classical_std_cost: classical.std,
            classical_min_cost: classical.min,
            classical_max_cost: classical.max,
            rl_vs_classical_gap: report.gap_percent,
        });

        ResultArtifact {
            training_config: config.clone(),
            training_time_seconds: record.duration_seconds,
            start_time: record.start_time,
            end_time: record.end_time,
            evaluation_results: EvaluationResults {
                mean_cost: report.learned.mean,
                std_cost: report.learned.std,
                min_cost: report.learned.min,
                max_cost: report.learned.max,
            },
            classical_comparison,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EvaluationResults {
    pub mean_cost: f64,
    pub std_cost: f64,
    pub min_cost: f64,
    pub max_cost: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClassicalComparison {
    pub solver: Option<String>,
    pub classical_mean_cost: f64,
    pub classical_std_cost: f64,
    pub classical_min_cost: f64,
    pub classical_max_cost: f64,
    pub rl_vs_classical_gap: Option<f64>,
}

/// Document written to `training_results.json` at the end of a run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResultArtifact {
    pub training_config: RunConfig,
    pub training_time_seconds: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub evaluation_results: EvaluationResults,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classical_comparison: Option<ClassicalComparison>,
}
