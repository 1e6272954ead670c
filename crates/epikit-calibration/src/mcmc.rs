//! Posterior sampling with random-walk Metropolis-Hastings.
//!
//! Multiple chains start from independent prior draws; after the burn-in
//! portion is discarded, per-parameter marginals are summarized and the
//! Gelman-Rubin potential scale reduction is computed across chains.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use epikit_core::{seed, EpiError, SimulationEngine};

use crate::problem::CalibrationProblem;
use crate::types::{PosteriorFit, PosteriorSummary, Prior};

/// Sampler settings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct McmcConfig {
    pub chains: usize,
    /// Iterations per chain, burn-in included.
    pub iterations: usize,
    /// Leading fraction of each chain discarded before summarizing.
    pub burn_in: f64,
    /// Random-walk step, as a fraction of each parameter's bound width.
    pub proposal_scale: f64,
    pub seed: u64,
    /// Chains whose R-hat exceeds this mark the fit non-converged.
    pub r_hat_threshold: f64,
}

impl McmcConfig {
    pub fn new(seed: u64) -> Self {
        Self {
            chains: 4,
            iterations: 4000,
            burn_in: 0.5,
            proposal_scale: 0.05,
            seed,
            r_hat_threshold: 1.1,
        }
    }

    pub fn with_chains(mut self, chains: usize) -> Self {
        self.chains = chains;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_burn_in(mut self, burn_in: f64) -> Self {
        self.burn_in = burn_in;
        self
    }

    pub fn with_proposal_scale(mut self, proposal_scale: f64) -> Self {
        self.proposal_scale = proposal_scale;
        self
    }

    fn validate(&self) -> Result<(), EpiError> {
        if self.chains == 0 {
            return Err(EpiError::configuration("sampler needs >= 1 chain"));
        }
        if self.iterations < 10 {
            return Err(EpiError::Configuration(format!(
                "{} iterations is too few to sample anything",
                self.iterations
            )));
        }
        if !(0.0..0.95).contains(&self.burn_in) {
            return Err(EpiError::Configuration(format!(
                "burn-in fraction {} is outside [0, 0.95)",
                self.burn_in
            )));
        }
        if !(self.proposal_scale > 0.0) {
            return Err(EpiError::Configuration(format!(
                "proposal scale must be positive, got {}",
                self.proposal_scale
            )));
        }
        Ok(())
    }
}

struct Chain {
    /// Post-burn-in draws, one Vec per iteration.
    samples: Vec<Vec<f64>>,
    accepted: usize,
    proposed: usize,
}

/// Approximate the posterior of the problem's parameters under `priors`.
///
/// Reproducible: chain c draws from a stream seeded by
/// `derive(config.seed, c)`, so the result is independent of scheduling.
pub fn sample_posterior<E: SimulationEngine>(
    problem: &CalibrationProblem<E>,
    priors: &[Prior],
    config: &McmcConfig,
) -> Result<PosteriorFit, EpiError> {
    config.validate()?;
    if priors.len() != problem.num_parameters() {
        return Err(EpiError::Configuration(format!(
            "{} priors supplied for {} parameters",
            priors.len(),
            problem.num_parameters()
        )));
    }
    for prior in priors {
        prior.validate()?;
    }

    let burn = (config.iterations as f64 * config.burn_in) as usize;
    let kept = config.iterations - burn;
    if kept == 0 {
        return Err(EpiError::configuration("burn-in discards every sample"));
    }

    let steps: Vec<f64> = problem
        .parameters()
        .iter()
        .map(|p| config.proposal_scale * p.width())
        .collect();

    let mut chains = Vec::with_capacity(config.chains);
    for c in 0..config.chains {
        let rng = StdRng::seed_from_u64(seed::derive(config.seed, c as u64));
        chains.push(run_chain(problem, priors, &steps, burn, config.iterations, rng)?);
    }

    for (c, chain) in chains.iter().enumerate() {
        log::debug!(
            "chain {c}: acceptance rate {:.3}",
            chain.accepted as f64 / chain.proposed.max(1) as f64
        );
    }

    summarize(problem, &chains, kept, config)
}

fn log_posterior<E: SimulationEngine>(
    problem: &CalibrationProblem<E>,
    priors: &[Prior],
    values: &[f64],
) -> Result<f64, EpiError> {
    let prior: f64 = priors
        .iter()
        .zip(values)
        .map(|(p, &v)| p.log_density(v))
        .sum();
    if prior == f64::NEG_INFINITY {
        return Ok(f64::NEG_INFINITY);
    }
    Ok(problem.log_likelihood(values)? + prior)
}

fn run_chain<E: SimulationEngine>(
    problem: &CalibrationProblem<E>,
    priors: &[Prior],
    steps: &[f64],
    burn: usize,
    iterations: usize,
    mut rng: StdRng,
) -> Result<Chain, EpiError> {
    // overdispersed start: draw from the priors until inside the domain
    let mut current: Vec<f64> = Vec::new();
    for attempt in 0..100 {
        let draw: Vec<f64> = priors.iter().map(|p| p.sample(&mut rng)).collect();
        let inside = problem
            .parameters()
            .iter()
            .zip(&draw)
            .all(|(p, &v)| p.contains(v));
        if inside {
            current = draw;
            break;
        }
        if attempt == 99 {
            current = problem.initial_parameters();
        }
    }

    let mut current_lp = log_posterior(problem, priors, &current)?;
    let unit = Normal::new(0.0, 1.0).expect("unit normal");
    let mut chain = Chain {
        samples: Vec::with_capacity(iterations - burn),
        accepted: 0,
        proposed: 0,
    };

    for it in 0..iterations {
        let proposal: Vec<f64> = current
            .iter()
            .zip(steps)
            .map(|(&v, &s)| v + s * unit.sample(&mut rng))
            .collect();
        let proposal_lp = log_posterior(problem, priors, &proposal)?;
        chain.proposed += 1;

        let accept = proposal_lp > current_lp
            || rng.gen::<f64>().ln() < proposal_lp - current_lp;
        if accept && proposal_lp.is_finite() {
            current = proposal;
            current_lp = proposal_lp;
            chain.accepted += 1;
        }
        if it >= burn {
            chain.samples.push(current.clone());
        }
    }
    Ok(chain)
}

/// Gelman-Rubin potential scale reduction for one parameter across chains.
fn gelman_rubin(per_chain: &[Vec<f64>]) -> Option<f64> {
    let m = per_chain.len();
    if m < 2 {
        return None;
    }
    let n = per_chain[0].len() as f64;
    let chain_means: Vec<f64> = per_chain
        .iter()
        .map(|c| c.iter().sum::<f64>() / n)
        .collect();
    let grand_mean = chain_means.iter().sum::<f64>() / m as f64;
    let b = n / (m as f64 - 1.0)
        * chain_means
            .iter()
            .map(|&mu| (mu - grand_mean).powi(2))
            .sum::<f64>();
    let w = per_chain
        .iter()
        .zip(&chain_means)
        .map(|(c, &mu)| c.iter().map(|&v| (v - mu).powi(2)).sum::<f64>() / (n - 1.0))
        .sum::<f64>()
        / m as f64;
    if w <= 0.0 {
        // degenerate chains (e.g. zero acceptance); R-hat is undefined
        return Some(f64::INFINITY);
    }
    let var_plus = (n - 1.0) / n * w + b / n;
    Some((var_plus / w).sqrt())
}

fn summarize<E: SimulationEngine>(
    problem: &CalibrationProblem<E>,
    chains: &[Chain],
    kept: usize,
    config: &McmcConfig,
) -> Result<PosteriorFit, EpiError> {
    let names = problem.parameter_names();
    let dim = names.len();
    let mut summaries = Vec::with_capacity(dim);
    let mut all_converged = true;

    for (j, id) in names.iter().enumerate() {
        let per_chain: Vec<Vec<f64>> = chains
            .iter()
            .map(|c| c.samples.iter().map(|s| s[j]).collect())
            .collect();
        let pooled: Vec<f64> = per_chain.iter().flatten().copied().collect();
        let count = pooled.len() as f64;
        let mean = pooled.iter().sum::<f64>() / count;
        let sd = (pooled.iter().map(|&v| (v - mean).powi(2)).sum::<f64>()
            / (count - 1.0).max(1.0))
        .sqrt();

        let mut sorted = pooled;
        sorted.sort_by(f64::total_cmp);
        let quantile = |q: f64| {
            let rank = (q * (sorted.len() - 1) as f64).round() as usize;
            sorted[rank]
        };

        let r_hat = gelman_rubin(&per_chain);
        match r_hat {
            // NaN (degenerate chains) counts as non-converged too
            Some(r) if !(r <= config.r_hat_threshold) => all_converged = false,
            None => all_converged = false,
            _ => {}
        }
        summaries.push(PosteriorSummary {
            id: id.clone(),
            mean,
            sd,
            lower: quantile(0.025),
            upper: quantile(0.975),
            r_hat,
        });
    }

    let means: Vec<f64> = summaries.iter().map(|s| s.mean).collect();
    let log_likelihood = problem.log_likelihood(&means)?;
    Ok(PosteriorFit {
        r0: problem.r0_for(&means),
        summaries,
        log_likelihood,
        converged: all_converged,
        chains: chains.len(),
        samples_per_chain: kept,
    })
}
