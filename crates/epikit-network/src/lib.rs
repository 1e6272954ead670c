//! Transmission over an explicit contact graph instead of a well-mixed
//! population.
//!
//! Updates are synchronous: every transition decision for a step is taken
//! against the state at the start of that step and applied at once, so the
//! outcome never depends on node iteration order. A susceptible node with
//! `k` infectious neighbors is infected with the union probability
//! `1 - (1 - p)^k`: each infectious neighbor is an independent exposure.

use epikit_core::{EpiError, Trajectory};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Disease label carried by each node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Susceptible,
    Infectious,
    Recovered,
}

/// Undirected contact graph over `0..node_count` node ids.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContactNetwork {
    adjacency: Vec<Vec<u32>>,
}

impl ContactNetwork {
    /// Build from an undirected edge list. Self-loops and out-of-range
    /// endpoints are rejected; duplicate edges are deduplicated.
    pub fn from_edges(node_count: u32, edges: &[(u32, u32)]) -> Result<Self, EpiError> {
        if node_count == 0 {
            return Err(EpiError::configuration("network needs at least one node"));
        }
        let mut adjacency = vec![Vec::new(); node_count as usize];
        for &(a, b) in edges {
            if a >= node_count || b >= node_count {
                return Err(EpiError::Configuration(format!(
                    "edge ({a}, {b}) references a node outside 0..{node_count}"
                )));
            }
            if a == b {
                return Err(EpiError::Configuration(format!("self-loop on node {a}")));
            }
            adjacency[a as usize].push(b);
            adjacency[b as usize].push(a);
        }
        for neighbors in &mut adjacency {
            neighbors.sort_unstable();
            neighbors.dedup();
        }
        Ok(Self { adjacency })
    }

    /// Erdős–Rényi G(n, p) graph with a fixed seed, for tests and demos.
    pub fn erdos_renyi(node_count: u32, p: f64, seed: u64) -> Result<Self, EpiError> {
        if !(0.0..=1.0).contains(&p) {
            return Err(EpiError::Configuration(format!(
                "edge probability {p} is outside [0, 1]"
            )));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut edges = Vec::new();
        for a in 0..node_count {
            for b in (a + 1)..node_count {
                if rng.gen::<f64>() < p {
                    edges.push((a, b));
                }
            }
        }
        Self::from_edges(node_count, &edges)
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn degree(&self, node: u32) -> usize {
        self.adjacency[node as usize].len()
    }

    pub fn neighbors(&self, node: u32) -> &[u32] {
        &self.adjacency[node as usize]
    }
}

/// Per-run probabilities and bounds.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Probability that one infectious contact transmits in one step.
    pub transmission_prob: f64,
    /// Probability that an infectious node recovers in one step.
    pub recovery_prob: f64,
    pub max_steps: u32,
    pub seed: u64,
    /// Record the full node labeling at every step (off by default: the
    /// aggregate trajectory is usually all a caller needs).
    pub record_nodes: bool,
}

impl NetworkConfig {
    pub fn new(transmission_prob: f64, recovery_prob: f64, max_steps: u32, seed: u64) -> Self {
        Self {
            transmission_prob,
            recovery_prob,
            max_steps,
            seed,
            record_nodes: false,
        }
    }

    pub fn with_node_recording(mut self) -> Self {
        self.record_nodes = true;
        self
    }

    fn validate(&self) -> Result<(), EpiError> {
        for (name, p) in [
            ("transmission_prob", self.transmission_prob),
            ("recovery_prob", self.recovery_prob),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(EpiError::Configuration(format!(
                    "{name} {p} is outside [0, 1]"
                )));
            }
        }
        if self.max_steps == 0 {
            return Err(EpiError::configuration("max_steps must be nonzero"));
        }
        Ok(())
    }
}

/// Outcome of one network run: aggregate counts per step, the final node
/// labeling, and optionally the labeling at every step.
#[derive(Clone, Debug)]
pub struct NetworkOutcome {
    pub trajectory: Trajectory,
    pub final_states: Vec<NodeState>,
    pub node_history: Option<Vec<Vec<NodeState>>>,
}

fn counts(states: &[NodeState]) -> [f64; 3] {
    let mut out = [0.0; 3];
    for s in states {
        match s {
            NodeState::Susceptible => out[0] += 1.0,
            NodeState::Infectious => out[1] += 1.0,
            NodeState::Recovered => out[2] += 1.0,
        }
    }
    out
}

/// Advance the epidemic over `network` one synchronous step at a time,
/// starting from `seed_nodes` infectious and everyone else susceptible.
/// Stops when no infectious nodes remain or `max_steps` is reached.
pub fn simulate(
    network: &ContactNetwork,
    seed_nodes: &[u32],
    config: &NetworkConfig,
) -> Result<NetworkOutcome, EpiError> {
    config.validate()?;
    if seed_nodes.is_empty() {
        return Err(EpiError::configuration("no seed nodes supplied"));
    }

    let n = network.node_count();
    let mut states = vec![NodeState::Susceptible; n];
    for &node in seed_nodes {
        if node as usize >= n {
            return Err(EpiError::Configuration(format!(
                "seed node {node} outside 0..{n}"
            )));
        }
        states[node as usize] = NodeState::Infectious;
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut trajectory = Trajectory::new(vec!["S".into(), "I".into(), "R".into()]);
    let mut history = config.record_nodes.then(|| vec![states.clone()]);

    let [s, i, r] = counts(&states);
    trajectory.push(0.0, vec![s, i, r]);

    let mut next = states.clone();
    for step in 1..=config.max_steps {
        if !states.iter().any(|&s| s == NodeState::Infectious) {
            break;
        }

        // all decisions read `states` (step-start snapshot), write `next`
        next.copy_from_slice(&states);
        for node in 0..n {
            match states[node] {
                NodeState::Susceptible => {
                    let infectious_neighbors = network
                        .neighbors(node as u32)
                        .iter()
                        .filter(|&&nb| states[nb as usize] == NodeState::Infectious)
                        .count() as u32;
                    if infectious_neighbors == 0 {
                        continue;
                    }
                    let escape = (1.0 - config.transmission_prob).powi(infectious_neighbors as i32);
                    if rng.gen::<f64>() < 1.0 - escape {
                        next[node] = NodeState::Infectious;
                    }
                }
                NodeState::Infectious => {
                    if rng.gen::<f64>() < config.recovery_prob {
                        next[node] = NodeState::Recovered;
                    }
                }
                NodeState::Recovered => {}
            }
        }
        std::mem::swap(&mut states, &mut next);

        let [s, i, r] = counts(&states);
        trajectory.push(f64::from(step), vec![s, i, r]);
        if let Some(h) = history.as_mut() {
            h.push(states.clone());
        }
    }

    Ok(NetworkOutcome {
        trajectory,
        final_states: states,
        node_history: history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_graph_updates_synchronously() {
        // S - I - S with certain transmission and no recovery: after one
        // step all three are infectious; a cascading update would have
        // infected the whole path in a single step even if it were longer.
        let network = ContactNetwork::from_edges(3, &[(0, 1), (1, 2)]).unwrap();
        let config = NetworkConfig::new(1.0, 0.0, 1, 42);
        let outcome = simulate(&network, &[1], &config).unwrap();
        assert!(outcome
            .final_states
            .iter()
            .all(|&s| s == NodeState::Infectious));
        assert_eq!(outcome.trajectory.series("I").unwrap(), vec![1.0, 3.0]);
    }

    #[test]
    fn no_cascade_beyond_direct_neighbors_in_one_step() {
        // longer path: infection must travel one hop per step
        let network = ContactNetwork::from_edges(5, &[(0, 1), (1, 2), (2, 3), (3, 4)]).unwrap();
        let config = NetworkConfig::new(1.0, 0.0, 1, 42);
        let outcome = simulate(&network, &[0], &config).unwrap();
        assert_eq!(outcome.final_states[1], NodeState::Infectious);
        assert_eq!(outcome.final_states[2], NodeState::Susceptible);
    }

    #[test]
    fn same_seed_reproduces_run() {
        let network = ContactNetwork::erdos_renyi(200, 0.05, 7).unwrap();
        let config = NetworkConfig::new(0.3, 0.2, 50, 11);
        let a = simulate(&network, &[0, 1], &config).unwrap();
        let b = simulate(&network, &[0, 1], &config).unwrap();
        assert_eq!(a.trajectory.states(), b.trajectory.states());
        assert_eq!(a.final_states, b.final_states);
    }

    #[test]
    fn terminates_when_no_infectious_remain() {
        let network = ContactNetwork::erdos_renyi(100, 0.05, 3).unwrap();
        let config = NetworkConfig::new(0.2, 0.5, 10_000, 5);
        let outcome = simulate(&network, &[0], &config).unwrap();
        let i_series = outcome.trajectory.series("I").unwrap();
        assert_eq!(*i_series.last().unwrap(), 0.0);
        // counts always sum to the node count
        for k in 0..outcome.trajectory.len() {
            assert_eq!(outcome.trajectory.total_at(k).unwrap(), 100.0);
        }
    }

    #[test]
    fn node_history_recorded_on_request() {
        let network = ContactNetwork::from_edges(3, &[(0, 1), (1, 2)]).unwrap();
        let config = NetworkConfig::new(1.0, 0.0, 2, 1).with_node_recording();
        let outcome = simulate(&network, &[1], &config).unwrap();
        let history = outcome.node_history.unwrap();
        assert_eq!(history.len(), outcome.trajectory.len());
        assert_eq!(history[0][1], NodeState::Infectious);
        assert_eq!(history[0][0], NodeState::Susceptible);
    }

    #[test]
    fn invalid_inputs_rejected() {
        assert!(ContactNetwork::from_edges(3, &[(0, 3)]).is_err());
        assert!(ContactNetwork::from_edges(3, &[(1, 1)]).is_err());
        assert!(ContactNetwork::erdos_renyi(10, 1.5, 1).is_err());

        let network = ContactNetwork::from_edges(3, &[(0, 1)]).unwrap();
        assert!(simulate(&network, &[], &NetworkConfig::new(0.5, 0.5, 10, 1)).is_err());
        assert!(simulate(&network, &[9], &NetworkConfig::new(0.5, 0.5, 10, 1)).is_err());
        assert!(simulate(&network, &[0], &NetworkConfig::new(1.5, 0.5, 10, 1)).is_err());
    }

    #[test]
    fn zero_transmission_never_spreads() {
        let network = ContactNetwork::erdos_renyi(50, 0.2, 2).unwrap();
        let config = NetworkConfig::new(0.0, 0.3, 100, 9);
        let outcome = simulate(&network, &[0], &config).unwrap();
        let s_series = outcome.trajectory.series("S").unwrap();
        assert!(s_series.iter().all(|&s| s == 49.0));
    }
}
