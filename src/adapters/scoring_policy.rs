use std::env;

use log::{debug, info, warn};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::policy::*;
use crate::core::instance::{ProblemInstance, ProblemInstanceBatch, DEPOT};
use crate::utils::lib::create_progress_bar;

pub const ACCELERATOR_ENV: &str = "ROUTEFORGE_ACCELERATOR";

const SEARCH_STEP: f64 = 0.25;

pub fn accelerator_detected() -> bool {
    env::var(ACCELERATOR_ENV)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct Parameters {
    /// Weights on (distance from current node, demand share of capacity, distance back to depot).
    weights: [f64; 3],
    temperature: f64,
}

impl Default for Parameters {
    fn default() -> Self {
        Self { weights: [1.0, 0.0, 0.0], temperature: 0.1 }
    }
}

/// Construction policy that scores the next customer with a learned linear model.
pub struct ScoringPolicy {
    params: Parameters,
    device: Device,
    accelerator_available: bool,
    rng: StdRng,
}

impl ScoringPolicy {
    pub fn new(preferred: Device, seed: u64) -> Self {
        Self {
            params: Parameters::default(),
            device: preferred,
            accelerator_available: accelerator_detected(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn with_accelerator(mut self, available: bool) -> Self {
        self.accelerator_available = available;
        self
    }

    fn ensure_placement(&self) -> Result<(), RunnerError> {
        if self.device == Device::Accelerator && !self.accelerator_available {
            return Err(RunnerError::AcceleratorUnavailable(format!(
                "no accelerator detected (set {} to enable)",
                ACCELERATOR_ENV
            )));
        }
        Ok(())
    }

    fn score(params: &Parameters, instance: &ProblemInstance, current: usize, candidate: usize) -> f64 {
        let [w_dist, w_demand, w_depot] = params.weights;
        let demand_share = instance.demands[candidate] as f64 / instance.capacity.max(1) as f64;
        -(w_dist * instance.distance(current, candidate) - w_demand * demand_share
            + w_depot * instance.distance(candidate, DEPOT))
    }

    fn construct(
        params: &Parameters,
        rng: &mut StdRng,
        instance: &ProblemInstance,
        method: DecodeMethod,
    ) -> Result<Vec<usize>, RunnerError> {
        let mut unvisited: Vec<usize> = (1..instance.locations.len()).collect();
        let mut actions = Vec::with_capacity(instance.locations.len() * 2);
        let mut current = DEPOT;
        let mut load = 0u32;

        while !unvisited.is_empty() {
            let candidates: Vec<usize> = unvisited
                .iter()
                .copied()
                .filter(|&c| load.saturating_add(instance.demands[c]) <= instance.capacity)
                .collect();

            if candidates.is_empty() {
                if current == DEPOT {
                    return Err(RunnerError::Other("customer demand exceeds vehicle capacity".to_string()));
                }
                actions.push(DEPOT);
                current = DEPOT;
                load = 0;
                continue;
            }

            let scores: Vec<f64> = candidates
                .iter()
                .map(|&c| Self::score(params, instance, current, c))
                .collect();
            let pick = match method {
                DecodeMethod::Greedy => scores
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(i, _)| i)
                    .unwrap_or(0),
                DecodeMethod::Sampling => {
                    let top = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    let temperature = params.temperature.max(1e-6);
                    let weights: Vec<f64> = scores.iter().map(|s| ((s - top) / temperature).exp()).collect();
                    let dist = WeightedIndex::new(&weights).map_err(|e| RunnerError::Other(e.to_string()))?;
                    dist.sample(rng)
                }
            };

            let next = candidates[pick];
            actions.push(next);
            load = load.saturating_add(instance.demands[next]);
            current = next;
            unvisited.retain(|&c| c != next);
        }
        Ok(actions)
    }

    fn mean_cost(&mut self, params: &Parameters, batch: &ProblemInstanceBatch) -> Result<f64, RunnerError> {
        let mut total = 0.0;
        for instance in batch.iter() {
            let actions = Self::construct(params, &mut self.rng, instance, DecodeMethod::Greedy)?;
            total += instance.route_cost(&actions);
        }
        Ok(total / batch.len().max(1) as f64)
    }
}

impl PolicyRunner for ScoringPolicy {
    fn device(&self) -> Device {
        self.device
    }

    fn to_device(&mut self, device: Device) -> Result<(), RunnerError> {
        if device == Device::Accelerator && !self.accelerator_available {
            return Err(RunnerError::AcceleratorUnavailable("cannot place policy on accelerator".to_string()));
        }
        debug!("Moving policy from {} to {}", self.device, device);
        self.device = device;
        Ok(())
    }

    fn reset(&mut self, batch: &ProblemInstanceBatch) -> Result<EnvState, RunnerError> {
        self.ensure_placement()?;
        Ok(EnvState::new(self.device, batch.clone()))
    }

    fn decode(&mut self, state: &EnvState, method: DecodeMethod) -> Result<DecodeOutput, RunnerError> {
        self.ensure_placement()?;
        if state.device != self.device {
            return Err(RunnerError::DeviceMismatch(format!(
                "policy on {}, environment state on {}",
                self.device, state.device
            )));
        }
        if let Some(key) = state.missing_key() {
            return Err(RunnerError::MissingStateKey(key.to_string()));
        }

        let mut actions = Vec::with_capacity(state.batch.len());
        let mut rewards = Vec::with_capacity(state.batch.len());
        for instance in state.batch.iter() {
            let route = Self::construct(&self.params, &mut self.rng, instance, method)?;
            rewards.push(-instance.route_cost(&route));
            actions.push(route);
        }
        Ok(DecodeOutput { actions, rewards })
    }

    fn train(
        &mut self,
        train: &ProblemInstanceBatch,
        validation: &ProblemInstanceBatch,
        plan: &TrainingPlan,
    ) -> Result<TrainingOutcome, RunnerError> {
        self.ensure_placement()?;
        if plan.log_to_experiment_tracker {
            warn!("Experiment tracker not configured, training without external logging");
        }
        info!("Starting training for {} epochs on {}", plan.max_epochs, self.device);

        let progress_bar = create_progress_bar(plan.max_epochs as u64).ok();
        let mut current = self.params.clone();
        let mut current_train_cost = self.mean_cost(&current, train)?;
        let mut best = current.clone();
        let mut best_validation = self.mean_cost(&best, validation)?;
        let mut epochs_without_improvement = 0;
        let mut epochs_run = 0;
        let mut stopped_early = false;

        for epoch in 0..plan.max_epochs {
            epochs_run = epoch + 1;
            let mut candidate = current.clone();
            for weight in candidate.weights.iter_mut() {
                *weight += self.rng.gen_range(-SEARCH_STEP..SEARCH_STEP);
            }
            let candidate_cost = self.mean_cost(&candidate, train)?;
            if candidate_cost < current_train_cost {
                current = candidate;
                current_train_cost = candidate_cost;
            }

            let validation_cost = self.mean_cost(&current, validation)?;
            info!("Epoch {}: Mean cost: {:.4}", epochs_run, current_train_cost);
            if validation_cost < best_validation {
                best_validation = validation_cost;
                best = current.clone();
                epochs_without_improvement = 0;
                info!("Epoch {}: Best cost: {:.4}", epochs_run, best_validation);
            } else {
                epochs_without_improvement += 1;
            }
            if let Some(pb) = &progress_bar {
                pb.inc(1);
            }
            if epochs_without_improvement > plan.early_stopping_patience {
                info!("Early stopping after {} epochs without improvement", epochs_without_improvement);
                stopped_early = true;
                break;
            }
        }
        if let Some(pb) = progress_bar {
            pb.finish_with_message("Training complete");
        }

        self.params = best;
        Ok(TrainingOutcome { epochs_run, best_validation_cost: best_validation, stopped_early })
    }

    fn parameters(&self) -> Value {
        serde_json::to_value(&self.params).unwrap_or(Value::Null)
    }

    fn load_parameters(&mut self, parameters: Value) -> Result<(), RunnerError> {
        let params: Parameters =
            serde_json::from_value(parameters).map_err(|e| RunnerError::IncompatibleParameters(e.to_string()))?;
        self.params = params;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::instance::fixtures::*;

    fn plan(epochs: usize, patience: usize) -> TrainingPlan {
        TrainingPlan { max_epochs: epochs, early_stopping_patience: patience, log_to_experiment_tracker: false }
    }

    #[test]
    fn greedy_decode_produces_feasible_routes() {
        let mut policy = ScoringPolicy::new(Device::Cpu, 7);
        let batch = square_batch(3);
        let state = policy.reset(&batch).unwrap();
        let out = policy.decode(&state, DecodeMethod::Greedy).unwrap();
        assert_eq!(out.actions.len(), 3);
        for (instance, (route, reward)) in batch.iter().zip(out.actions.iter().zip(&out.rewards)) {
            assert!(instance.is_feasible(route));
            assert!(*reward < 0.0);
        }
    }

    #[test]
    fn sampling_respects_capacity() {
        let mut instance = square_instance();
        instance.capacity = 2;
        let batch = ProblemInstanceBatch::new(vec![instance.clone(); 5]);
        let mut policy = ScoringPolicy::new(Device::Cpu, 11);
        let state = policy.reset(&batch).unwrap();
        let out = policy.decode(&state, DecodeMethod::Sampling).unwrap();
        assert!(out.actions.iter().all(|route| instance.is_feasible(route)));
    }

    #[test]
    fn accelerator_placement_fails_without_hardware() {
        let mut policy = ScoringPolicy::new(Device::Accelerator, 1).with_accelerator(false);
        let err = policy.reset(&square_batch(1)).unwrap_err();
        assert!(matches!(err, RunnerError::AcceleratorUnavailable(_)));
        policy.to_device(Device::Cpu).unwrap();
        assert!(policy.reset(&square_batch(1)).is_ok());
    }

    #[test]
    fn decode_rejects_state_from_another_device() {
        let mut policy = ScoringPolicy::new(Device::Cpu, 1);
        let state = EnvState::new(Device::Accelerator, square_batch(1));
        let err = policy.decode(&state, DecodeMethod::Greedy).unwrap_err();
        assert!(matches!(err, RunnerError::DeviceMismatch(_)));
    }

    #[test]
    fn decode_rejects_incomplete_state() {
        let mut policy = ScoringPolicy::new(Device::Cpu, 1);
        let mut state = policy.reset(&square_batch(1)).unwrap();
        state.keys.remove("action_mask");
        let err = policy.decode(&state, DecodeMethod::Greedy).unwrap_err();
        assert_eq!(err, RunnerError::MissingStateKey("action_mask".to_string()));
    }

    #[test]
    fn training_never_worsens_validation_cost() {
        let mut policy = ScoringPolicy::new(Device::Cpu, 3);
        let batch = square_batch(2);
        let before = policy.mean_cost(&Parameters::default(), &batch).unwrap();
        let outcome = policy.train(&batch, &batch, &plan(5, 10)).unwrap();
        assert!(outcome.best_validation_cost <= before + 1e-12);
        assert_eq!(outcome.epochs_run, 5);
    }

    #[test]
    fn zero_patience_stops_after_first_stale_epoch() {
        let mut policy = ScoringPolicy::new(Device::Cpu, 3);
        // The default weights already find the optimal tour of the square, so no epoch can improve on it.
        let batch = square_batch(1);
        let outcome = policy.train(&batch, &batch, &plan(20, 0)).unwrap();
        assert!(outcome.stopped_early);
        assert_eq!(outcome.epochs_run, 1);
    }

    #[test]
    fn parameters_round_trip() {
        let policy = ScoringPolicy::new(Device::Cpu, 3);
        let mut other = ScoringPolicy::new(Device::Cpu, 4);
        other.load_parameters(policy.parameters()).unwrap();
        assert_eq!(other.params, policy.params);
        assert!(other.load_parameters(serde_json::json!({"weights": [1.0]})).is_err());
    }
}
