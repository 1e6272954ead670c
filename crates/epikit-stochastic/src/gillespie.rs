//! Exact discrete-event simulation (Gillespie direct method).

use epikit_core::{EpiError, ReactionSystem, Trajectory};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};
use serde::{Deserialize, Serialize};

/// Run bounds and seed for a stochastic realization.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct StochasticConfig {
    /// Time horizon; the run also stops earlier on the absorbing condition
    /// (all infectious-marked compartments empty).
    pub t_end: f64,
    pub seed: u64,
    /// Hard event bound; exceeding it aborts as a configuration error so a
    /// runaway model cannot spin forever.
    pub max_events: usize,
}

impl StochasticConfig {
    pub fn new(t_end: f64, seed: u64) -> Self {
        Self {
            t_end,
            seed,
            max_events: 10_000_000,
        }
    }

    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events;
        self
    }

    pub fn validate(&self) -> Result<(), EpiError> {
        if !(self.t_end > 0.0) {
            return Err(EpiError::Configuration(format!(
                "time horizon must be positive, got {}",
                self.t_end
            )));
        }
        if self.max_events == 0 {
            return Err(EpiError::configuration("max_events must be nonzero"));
        }
        Ok(())
    }
}

/// Integer-valued copy of the system's initial state.
pub(crate) fn integer_initial_state(system: &ReactionSystem) -> Vec<f64> {
    system.initial_state().iter().map(|v| v.round()).collect()
}

/// Simulate one exact realization, event by event.
///
/// At each iteration the waiting time is drawn from Exp(sum of reaction
/// rates) and the firing reaction is selected with probability proportional
/// to its rate; its unit delta is applied and time advances. Terminates on
/// the absorbing condition, the time horizon, or the event bound.
pub fn simulate_exact(
    system: &mut ReactionSystem,
    config: &StochasticConfig,
) -> Result<Trajectory, EpiError> {
    config.validate()?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut y = integer_initial_state(system);
    let mut rates = vec![0.0; system.reaction_count()];
    let mut trajectory = Trajectory::new(system.compartment_ids().to_vec());
    let mut t = 0.0;
    trajectory.push(t, y.clone());

    for _ in 0..config.max_events {
        if system.is_absorbed(&y) {
            return Ok(trajectory);
        }
        system.propensities(t, &y, &mut rates)?;
        let total: f64 = rates.iter().sum();
        if total <= 0.0 {
            return Ok(trajectory);
        }

        let wait = Exp::new(total)
            .map_err(|e| EpiError::Configuration(format!("exponential draw: {e}")))?
            .sample(&mut rng);
        if t + wait > config.t_end {
            return Ok(trajectory);
        }
        t += wait;

        // select the firing reaction proportionally to its rate
        let mut pick = rng.gen_range(0.0..total);
        let mut fired = rates.len() - 1;
        for (r, &rate) in rates.iter().enumerate() {
            if pick < rate {
                fired = r;
                break;
            }
            pick -= rate;
        }

        let (source, target) = system.endpoints(fired);
        y[source] -= 1.0;
        y[target] += 1.0;
        trajectory.push(t, y.clone());
    }

    Err(EpiError::Configuration(format!(
        "event bound {} exhausted before t_end={}",
        config.max_events, config.t_end
    )))
}
