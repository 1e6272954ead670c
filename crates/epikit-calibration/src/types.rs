//! Calibration inputs and results.

use rand::Rng;
use rand_distr::{Distribution, LogNormal, Normal};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use epikit_core::EpiError;

/// A parameter to estimate, with its domain bounds.
///
/// The bounds declare the parameter's valid domain: candidate vectors
/// outside them are rejected with a -infinity log-likelihood before the
/// simulator is ever invoked.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationParameter {
    pub id: String,
    pub min_bound: f64,
    pub max_bound: f64,
    /// Starting point for optimizers; midpoint of the bounds when absent.
    pub initial_guess: Option<f64>,
}

impl CalibrationParameter {
    pub fn new(id: impl Into<String>, min_bound: f64, max_bound: f64) -> Self {
        Self {
            id: id.into(),
            min_bound,
            max_bound,
            initial_guess: None,
        }
    }

    pub fn with_initial_guess(mut self, guess: f64) -> Self {
        self.initial_guess = Some(guess);
        self
    }

    pub fn initial_value(&self) -> f64 {
        self.initial_guess
            .unwrap_or_else(|| (self.min_bound + self.max_bound) / 2.0)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min_bound && value <= self.max_bound
    }

    pub fn width(&self) -> f64 {
        self.max_bound - self.min_bound
    }

    pub fn validate(&self) -> Result<(), EpiError> {
        if !self.min_bound.is_finite()
            || !self.max_bound.is_finite()
            || self.min_bound >= self.max_bound
        {
            return Err(EpiError::Configuration(format!(
                "parameter '{}' has invalid bounds [{}, {}]",
                self.id, self.min_bound, self.max_bound
            )));
        }
        if let Some(guess) = self.initial_guess {
            if !self.contains(guess) {
                return Err(EpiError::Configuration(format!(
                    "initial guess {guess} for '{}' is outside [{}, {}]",
                    self.id, self.min_bound, self.max_bound
                )));
            }
        }
        Ok(())
    }
}

/// Prior distribution over one parameter, for posterior sampling.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum Prior {
    Uniform { low: f64, high: f64 },
    Normal { mean: f64, sd: f64 },
    LogNormal { mu: f64, sigma: f64 },
}

impl Prior {
    pub fn validate(&self) -> Result<(), EpiError> {
        let ok = match self {
            Prior::Uniform { low, high } => low.is_finite() && high.is_finite() && low < high,
            Prior::Normal { mean, sd } => mean.is_finite() && *sd > 0.0,
            Prior::LogNormal { mu, sigma } => mu.is_finite() && *sigma > 0.0,
        };
        if ok {
            Ok(())
        } else {
            Err(EpiError::Configuration(format!("invalid prior {self:?}")))
        }
    }

    /// Log prior density at `value` (up to an additive constant for the
    /// uniform case); `-inf` outside the support.
    pub fn log_density(&self, value: f64) -> f64 {
        match self {
            Prior::Uniform { low, high } => {
                if value >= *low && value <= *high {
                    -(high - low).ln()
                } else {
                    f64::NEG_INFINITY
                }
            }
            Prior::Normal { mean, sd } => {
                let z = (value - mean) / sd;
                -0.5 * z * z - sd.ln()
            }
            Prior::LogNormal { mu, sigma } => {
                if value <= 0.0 {
                    return f64::NEG_INFINITY;
                }
                let z = (value.ln() - mu) / sigma;
                -0.5 * z * z - value.ln() - sigma.ln()
            }
        }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        match self {
            Prior::Uniform { low, high } => rng.gen_range(*low..*high),
            Prior::Normal { mean, sd } => Normal::new(*mean, *sd)
                .expect("validated prior")
                .sample(rng),
            Prior::LogNormal { mu, sigma } => LogNormal::new(*mu, *sigma)
                .expect("validated prior")
                .sample(rng),
        }
    }
}

/// Point-estimation result.
///
/// `converged` is a soft flag: a fit that exhausted its iteration budget is
/// still returned, marked non-converged, so the caller decides whether to
/// trust it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FitResult {
    pub parameter_names: Vec<String>,
    pub estimates: Vec<f64>,
    pub log_likelihood: f64,
    pub iterations: u64,
    pub converged: bool,
    pub termination_reason: String,
    /// Implied basic reproduction number, when the engine declares one.
    pub r0: Option<f64>,
}

impl FitResult {
    pub fn estimates_map(&self) -> HashMap<String, f64> {
        self.parameter_names
            .iter()
            .cloned()
            .zip(self.estimates.iter().copied())
            .collect()
    }

    pub fn estimate(&self, id: &str) -> Option<f64> {
        let idx = self.parameter_names.iter().position(|n| n == id)?;
        Some(self.estimates[idx])
    }
}

/// Marginal posterior summary for one parameter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PosteriorSummary {
    pub id: String,
    pub mean: f64,
    pub sd: f64,
    /// Central credible interval bounds.
    pub lower: f64,
    pub upper: f64,
    /// Gelman-Rubin potential scale reduction; `None` with a single chain.
    pub r_hat: Option<f64>,
}

/// Posterior-sampling result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PosteriorFit {
    pub summaries: Vec<PosteriorSummary>,
    /// Log-likelihood at the posterior mean.
    pub log_likelihood: f64,
    /// All chains passed the R-hat threshold.
    pub converged: bool,
    pub chains: usize,
    pub samples_per_chain: usize,
    pub r0: Option<f64>,
}

impl PosteriorFit {
    pub fn summary(&self, id: &str) -> Option<&PosteriorSummary> {
        self.summaries.iter().find(|s| s.id == id)
    }

    pub fn posterior_means(&self) -> Vec<f64> {
        self.summaries.iter().map(|s| s.mean).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn initial_value_defaults_to_midpoint() {
        let p = CalibrationParameter::new("beta", 0.0, 1.0);
        assert_eq!(p.initial_value(), 0.5);
        let p = p.with_initial_guess(0.2);
        assert_eq!(p.initial_value(), 0.2);
    }

    #[test]
    fn inverted_bounds_rejected() {
        assert!(CalibrationParameter::new("x", 1.0, 0.0).validate().is_err());
        assert!(CalibrationParameter::new("x", 0.0, 1.0)
            .with_initial_guess(2.0)
            .validate()
            .is_err());
    }

    #[test]
    fn uniform_prior_support() {
        let prior = Prior::Uniform { low: 0.0, high: 2.0 };
        assert!(prior.log_density(1.0).is_finite());
        assert_eq!(prior.log_density(3.0), f64::NEG_INFINITY);
    }

    #[test]
    fn prior_samples_land_in_support() {
        let mut rng = StdRng::seed_from_u64(1);
        let uniform = Prior::Uniform { low: 0.1, high: 0.9 };
        let lognormal = Prior::LogNormal { mu: 0.0, sigma: 0.5 };
        for _ in 0..100 {
            let u = uniform.sample(&mut rng);
            assert!((0.1..0.9).contains(&u));
            assert!(lognormal.sample(&mut rng) > 0.0);
        }
    }

    #[test]
    fn fit_result_lookup() {
        let fit = FitResult {
            parameter_names: vec!["beta".into(), "gamma".into()],
            estimates: vec![0.3, 0.1],
            log_likelihood: -12.0,
            iterations: 40,
            converged: true,
            termination_reason: "solver converged".into(),
            r0: Some(3.0),
        };
        assert_eq!(fit.estimate("gamma"), Some(0.1));
        assert_eq!(fit.estimates_map()["beta"], 0.3);
        assert_eq!(fit.estimate("nope"), None);
    }
}
