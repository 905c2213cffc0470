use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::core::baseline::{SolverAdapter, SolverError, SolverOutput};
use crate::core::instance::{ProblemInstance, ProblemInstanceBatch, DEPOT};

/// Builds a solver chain from names. Unknown names become adapters that always report themselves unavailable.
pub fn build_solver_chain(names: &[String]) -> Vec<Box<dyn SolverAdapter>> {
    names
        .iter()
        .map(|name| -> Box<dyn SolverAdapter> {
            match name.as_str() {
                "savings" => Box::new(SavingsSolver),
                "nearest-neighbour" | "nearest_neighbour" => Box::new(NearestNeighbourSolver),
                other => {
                    warn!("No adapter for classical solver '{}'", other);
                    Box::new(MissingSolver { name: other.to_string() })
                }
            }
        })
        .collect()
}

pub fn default_solver_chain() -> Vec<Box<dyn SolverAdapter>> {
    vec![Box::new(SavingsSolver), Box::new(NearestNeighbourSolver)]
}

fn solve_each<F>(batch: &ProblemInstanceBatch, max_runtime: Duration, mut solve: F) -> Result<SolverOutput, SolverError>
where
    F: FnMut(&ProblemInstance, Instant) -> Result<Vec<usize>, SolverError>,
{
    let mut actions = Vec::with_capacity(batch.len());
    let mut costs = Vec::with_capacity(batch.len());
    for instance in batch.iter() {
        instance.validate().map_err(|e| SolverError::Failed(e.to_string()))?;
        let deadline = Instant::now() + max_runtime;
        let route = solve(instance, deadline)?;
        costs.push(instance.route_cost(&route));
        actions.push(route);
    }
    Ok((actions, costs))
}

fn join_trips(trips: impl IntoIterator<Item = Vec<usize>>) -> Vec<usize> {
    let mut actions = Vec::new();
    for trip in trips.into_iter().filter(|t| !t.is_empty()) {
        if !actions.is_empty() {
            actions.push(DEPOT);
        }
        actions.extend(trip);
    }
    actions
}

/// Clarke-Wright savings construction with capacity-checked merges.
pub struct SavingsSolver;

impl SavingsSolver {
    fn solve_instance(instance: &ProblemInstance, deadline: Instant, max_runtime: Duration) -> Result<Vec<usize>, SolverError> {
        let n = instance.locations.len();
        let mut routes: Vec<Vec<usize>> = (0..n).map(|c| if c == DEPOT { vec![] } else { vec![c] }).collect();
        let mut route_of: Vec<usize> = (0..n).collect();
        let mut load: Vec<u32> = instance.demands.clone();

        let mut savings = Vec::with_capacity(n * n / 2);
        for i in 1..n {
            for j in (i + 1)..n {
                let saving = instance.distance(DEPOT, i) + instance.distance(DEPOT, j) - instance.distance(i, j);
                savings.push((saving, i, j));
            }
        }
        savings.sort_by(|a, b| b.0.total_cmp(&a.0));

        for (_, i, j) in savings {
            if Instant::now() > deadline {
                return Err(SolverError::Timeout(max_runtime));
            }
            let (ri, rj) = (route_of[i], route_of[j]);
            if ri == rj || load[ri].saturating_add(load[rj]) > instance.capacity {
                continue;
            }
            let at_end = |route: &Vec<usize>, c: usize| route.first() == Some(&c) || route.last() == Some(&c);
            if !at_end(&routes[ri], i) || !at_end(&routes[rj], j) {
                continue;
            }

            let mut head = std::mem::take(&mut routes[ri]);
            let mut tail = std::mem::take(&mut routes[rj]);
            if head.last() != Some(&i) {
                head.reverse();
            }
            if tail.first() != Some(&j) {
                tail.reverse();
            }
            for &c in &tail {
                route_of[c] = ri;
            }
            head.extend(tail);
            routes[ri] = head;
            load[ri] += load[rj];
            load[rj] = 0;
        }

        Ok(join_trips(routes))
    }
}

impl SolverAdapter for SavingsSolver {
    fn name(&self) -> String {
        "savings".to_string()
    }

    fn solve(&self, batch: &ProblemInstanceBatch, max_runtime: Duration) -> Result<SolverOutput, SolverError> {
        solve_each(batch, max_runtime, |instance, deadline| Self::solve_instance(instance, deadline, max_runtime))
    }
}

/// Nearest-neighbour trips improved by intra-trip 2-opt until no move helps or the deadline passes.
pub struct NearestNeighbourSolver;

impl NearestNeighbourSolver {
    fn nearest_neighbour_trips(instance: &ProblemInstance) -> Vec<Vec<usize>> {
        let mut unvisited: Vec<usize> = (1..instance.locations.len()).collect();
        let mut trips = Vec::new();
        let mut trip = Vec::new();
        let mut current = DEPOT;
        let mut load = 0u32;

        while !unvisited.is_empty() {
            let next = unvisited
                .iter()
                .copied()
                .filter(|&c| load.saturating_add(instance.demands[c]) <= instance.capacity)
                .min_by(|&a, &b| instance.distance(current, a).total_cmp(&instance.distance(current, b)));
            match next {
                Some(c) => {
                    trip.push(c);
                    load = load.saturating_add(instance.demands[c]);
                    current = c;
                    unvisited.retain(|&u| u != c);
                }
                None => {
                    trips.push(std::mem::take(&mut trip));
                    current = DEPOT;
                    load = 0;
                }
            }
        }
        trips.push(trip);
        trips
    }

    fn two_opt(instance: &ProblemInstance, trip: Vec<usize>, deadline: Instant) -> Vec<usize> {
        let mut path = Vec::with_capacity(trip.len() + 2);
        path.push(DEPOT);
        path.extend(trip);
        path.push(DEPOT);

        let d = |a: usize, b: usize| instance.distance(a, b);
        let mut improved = true;
        while improved && Instant::now() <= deadline {
            improved = false;
            for i in 1..path.len().saturating_sub(2) {
                for j in (i + 1)..(path.len() - 1) {
                    let delta = d(path[i - 1], path[j]) + d(path[i], path[j + 1])
                        - d(path[i - 1], path[i])
                        - d(path[j], path[j + 1]);
                    if delta < -1e-10 {
                        path[i..=j].reverse();
                        improved = true;
                    }
                }
            }
        }
        if improved {
            debug!("2-opt stopped at the deadline before converging");
        }
        path[1..path.len() - 1].to_vec()
    }
}

impl SolverAdapter for NearestNeighbourSolver {
    fn name(&self) -> String {
        "nearest-neighbour".to_string()
    }

    fn solve(&self, batch: &ProblemInstanceBatch, max_runtime: Duration) -> Result<SolverOutput, SolverError> {
        solve_each(batch, max_runtime, |instance, deadline| {
            let trips = Self::nearest_neighbour_trips(instance)
                .into_iter()
                .map(|trip| Self::two_opt(instance, trip, deadline));
            Ok(join_trips(trips))
        })
    }
}

/// Placeholder for a named solver that is not built into this binary.
pub struct MissingSolver {
    name: String,
}

impl SolverAdapter for MissingSolver {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn solve(&self, _batch: &ProblemInstanceBatch, _max_runtime: Duration) -> Result<SolverOutput, SolverError> {
        Err(SolverError::Unavailable(format!("solver '{}' is not available in this build", self.name)))
    }
}
