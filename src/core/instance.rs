use serde::{Deserialize, Serialize};

use crate::core::error::InstanceError;

/// Node index of the depot in every instance.
pub const DEPOT: usize = 0;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ConstraintFlags {
    pub open_route: bool,
    pub backhaul: bool,
    pub duration_limit: bool,
    pub time_windows: bool,
}

/// One MTVRP instance. `locations[0]` is the depot and `demands[0]` is always zero.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProblemInstance {
    pub locations: Vec<(f64, f64)>,
    pub demands: Vec<u32>,
    pub capacity: u32,
    pub flags: ConstraintFlags,
}

impl ProblemInstance {
    /// Checks the shape every solver relies on: a depot, one demand per location, routable demands.
    pub fn validate(&self) -> Result<(), InstanceError> {
        if self.locations.is_empty() {
            return Err(InstanceError::NoLocations);
        }
        if self.demands.len() != self.locations.len() {
            return Err(InstanceError::LengthMismatch {
                locations: self.locations.len(),
                demands: self.demands.len(),
            });
        }
        if self.demands[DEPOT] != 0 {
            return Err(InstanceError::DepotDemand(self.demands[DEPOT]));
        }
        if let Some(index) = self.locations.iter().position(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(InstanceError::NonFiniteLocation(index));
        }
        if let Some((customer, &demand)) = self.demands.iter().enumerate().find(|(_, d)| **d > self.capacity) {
            return Err(InstanceError::DemandExceedsCapacity { customer, demand, capacity: self.capacity });
        }
        Ok(())
    }

    pub fn num_customers(&self) -> usize {
        self.locations.len().saturating_sub(1)
    }

    pub fn distance(&self, from: usize, to: usize) -> f64 {
        let (x1, y1) = self.locations[from];
        let (x2, y2) = self.locations[to];
        ((x2 - x1).powi(2) + (y2 - y1).powi(2)).sqrt()
    }

    /// Length of a depot-anchored action sequence. Open-route instances do not pay for returns to the depot.
    pub fn route_cost(&self, actions: &[usize]) -> f64 {
        let mut cost = 0.0;
        let mut current = DEPOT;
        for &next in actions.iter().chain(std::iter::once(&DEPOT)) {
            if !(self.flags.open_route && next == DEPOT) {
                cost += self.distance(current, next);
            }
            current = next;
        }
        cost
    }

    /// Every customer appears exactly once and no trip exceeds capacity.
    pub fn is_feasible(&self, actions: &[usize]) -> bool {
        let mut seen = vec![false; self.locations.len()];
        let mut load = 0u32;
        for &node in actions {
            if node >= self.locations.len() {
                return false;
            }
            if node == DEPOT {
                load = 0;
                continue;
            }
            if seen[node] {
                return false;
            }
            seen[node] = true;
            load = load.saturating_add(self.demands.get(node).copied().unwrap_or(u32::MAX));
            if load > self.capacity {
                return false;
            }
        }
        seen.iter().skip(1).all(|visited| *visited)
    }
}

/// Ordered, non-empty set of instances solved together.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProblemInstanceBatch {
    instances: Vec<ProblemInstance>,
}

impl ProblemInstanceBatch {
    pub fn new(instances: Vec<ProblemInstance>) -> Self {
        Self { instances }
    }

    pub fn instances(&self) -> &[ProblemInstance] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProblemInstance> {
        self.instances.iter()
    }

    /// Index and error of the first malformed instance.
    pub fn validate(&self) -> Result<(), (usize, InstanceError)> {
        for (index, instance) in self.instances.iter().enumerate() {
            instance.validate().map_err(|e| (index, e))?;
        }
        Ok(())
    }

    /// Consecutive sub-batches of at most `size` instances.
    pub fn chunks(&self, size: usize) -> Vec<ProblemInstanceBatch> {
        self.instances
            .chunks(size.max(1))
            .map(|chunk| ProblemInstanceBatch::new(chunk.to_vec()))
            .collect()
    }

    /// How many instances carry each constraint, in a fixed order.
    pub fn variant_counts(&self) -> VariantCounts {
        let count = |pick: fn(&ConstraintFlags) -> bool| self.instances.iter().filter(|i| pick(&i.flags)).count();
        VariantCounts(vec![
            ("has_capacity".to_string(), self.instances.len()),
            ("has_open".to_string(), count(|f| f.open_route)),
            ("has_backhaul".to_string(), count(|f| f.backhaul)),
            ("has_limit".to_string(), count(|f| f.duration_limit)),
            ("has_time_windows".to_string(), count(|f| f.time_windows)),
        ])
    }
}

/// `(variant-name, present-count)` pairs for a batch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VariantCounts(pub Vec<(String, usize)>);

impl VariantCounts {
    pub fn get(&self, name: &str) -> Option<usize> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, c)| *c)
    }
}
