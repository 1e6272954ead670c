//! Parallel ensembles of independent stochastic realizations.

use epikit_core::{seed, EpiError, ReactionSystem, Trajectory};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::gillespie::{simulate_exact, StochasticConfig};
use crate::tau_leap::simulate_tau_leap;

/// Which sampler the ensemble replicates.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum SamplerMode {
    Exact,
    TauLeap { tau: f64 },
}

/// Ensemble size, master seed and envelope quantiles.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EnsembleConfig {
    pub replicates: usize,
    /// Master seed; replicate k runs on a stream seed derived from it.
    pub seed: u64,
    pub lower_quantile: f64,
    pub upper_quantile: f64,
}

impl EnsembleConfig {
    /// 95% central envelope by default.
    pub fn new(replicates: usize, seed: u64) -> Self {
        Self {
            replicates,
            seed,
            lower_quantile: 0.025,
            upper_quantile: 0.975,
        }
    }

    pub fn with_envelope(mut self, lower: f64, upper: f64) -> Self {
        self.lower_quantile = lower;
        self.upper_quantile = upper;
        self
    }

    fn validate(&self) -> Result<(), EpiError> {
        if self.replicates == 0 {
            return Err(EpiError::configuration("ensemble needs >= 1 replicate"));
        }
        if !(0.0..=1.0).contains(&self.lower_quantile)
            || !(0.0..=1.0).contains(&self.upper_quantile)
            || self.lower_quantile >= self.upper_quantile
        {
            return Err(EpiError::Configuration(format!(
                "envelope quantiles ({}, {}) are invalid",
                self.lower_quantile, self.upper_quantile
            )));
        }
        Ok(())
    }
}

/// Cross-replicate summary on a common time grid.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnsembleSummary {
    pub compartments: Vec<String>,
    pub times: Vec<f64>,
    /// Row-major like a trajectory: one row per grid point.
    pub mean: Vec<Vec<f64>>,
    pub median: Vec<Vec<f64>>,
    pub lower: Vec<Vec<f64>>,
    pub upper: Vec<Vec<f64>>,
    pub replicates: usize,
}

impl EnsembleSummary {
    pub fn mean_series(&self, compartment: &str) -> Option<Vec<f64>> {
        let idx = self.compartments.iter().position(|c| c == compartment)?;
        Some(self.mean.iter().map(|row| row[idx]).collect())
    }

    pub fn median_series(&self, compartment: &str) -> Option<Vec<f64>> {
        let idx = self.compartments.iter().position(|c| c == compartment)?;
        Some(self.median.iter().map(|row| row[idx]).collect())
    }
}

/// Evenly spaced grid 0, step, 2*step, ..., covering `t_end`.
pub fn time_grid(t_end: f64, step: f64) -> Vec<f64> {
    let rows = (t_end / step).floor() as usize;
    (0..=rows).map(|i| i as f64 * step).collect()
}

/// Run `config.replicates` independent realizations and summarize them on
/// `grid`. Replicates run in parallel; each has its own derived seed, so
/// results do not depend on scheduling order.
pub fn run_ensemble(
    system: &ReactionSystem,
    mode: SamplerMode,
    t_end: f64,
    grid: &[f64],
    config: &EnsembleConfig,
) -> Result<EnsembleSummary, EpiError> {
    config.validate()?;
    if grid.is_empty() {
        return Err(EpiError::configuration("empty summary grid"));
    }
    if grid.windows(2).any(|w| w[1] <= w[0]) {
        return Err(EpiError::configuration("summary grid must be increasing"));
    }

    let sampled: Vec<Vec<Vec<f64>>> = (0..config.replicates)
        .into_par_iter()
        .map(|k| -> Result<Vec<Vec<f64>>, EpiError> {
            let mut replica = system.clone();
            let run_config = StochasticConfig::new(t_end, seed::derive(config.seed, k as u64));
            let trajectory = match mode {
                SamplerMode::Exact => simulate_exact(&mut replica, &run_config)?,
                SamplerMode::TauLeap { tau } => {
                    simulate_tau_leap(&mut replica, tau, &run_config)?
                }
            };
            Ok(sample_on_grid(&trajectory, grid))
        })
        .collect::<Result<_, _>>()?;

    log::debug!(
        "summarizing {} replicates over {} grid points",
        sampled.len(),
        grid.len()
    );
    Ok(summarize(
        system.compartment_ids().to_vec(),
        grid,
        &sampled,
        config,
    ))
}

fn sample_on_grid(trajectory: &Trajectory, grid: &[f64]) -> Vec<Vec<f64>> {
    grid.iter()
        .map(|&t| {
            trajectory
                .row_at(t)
                .map(|row| row.to_vec())
                .unwrap_or_default()
        })
        .collect()
}

fn summarize(
    compartments: Vec<String>,
    grid: &[f64],
    sampled: &[Vec<Vec<f64>>],
    config: &EnsembleConfig,
) -> EnsembleSummary {
    let dim = compartments.len();
    let replicates = sampled.len();
    let mut mean = vec![vec![0.0; dim]; grid.len()];
    let mut median = vec![vec![0.0; dim]; grid.len()];
    let mut lower = vec![vec![0.0; dim]; grid.len()];
    let mut upper = vec![vec![0.0; dim]; grid.len()];

    let mut values = vec![0.0; replicates];
    for g in 0..grid.len() {
        for c in 0..dim {
            for (k, replica) in sampled.iter().enumerate() {
                values[k] = replica[g][c];
            }
            values.sort_by(f64::total_cmp);
            mean[g][c] = values.iter().sum::<f64>() / replicates as f64;
            median[g][c] = quantile(&values, 0.5);
            lower[g][c] = quantile(&values, config.lower_quantile);
            upper[g][c] = quantile(&values, config.upper_quantile);
        }
    }

    EnsembleSummary {
        compartments,
        times: grid.to_vec(),
        mean,
        median,
        lower,
        upper,
        replicates,
    }
}

/// Nearest-rank quantile of already-sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let rank = (q * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}
