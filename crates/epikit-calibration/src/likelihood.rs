//! Observation models linking simulated trajectories to case counts.

use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

use epikit_core::EpiError;

// Poisson and negative-binomial means must stay positive; a simulated zero
// is floored here rather than producing -inf for an exact hit.
const MEAN_FLOOR: f64 = 1e-9;

/// Distribution of an observed count around the simulated mean.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub enum ObservationModel {
    /// Counts are Poisson around the simulated trajectory (the default).
    #[default]
    Poisson,
    /// Gaussian error with fixed standard deviation.
    Gaussian { sd: f64 },
    /// Negative binomial with dispersion `k`; approaches Poisson as k
    /// grows.
    NegativeBinomial { k: f64 },
}

impl ObservationModel {
    pub fn validate(&self) -> Result<(), EpiError> {
        match self {
            ObservationModel::Poisson => Ok(()),
            ObservationModel::Gaussian { sd } if *sd > 0.0 => Ok(()),
            ObservationModel::NegativeBinomial { k } if *k > 0.0 => Ok(()),
            other => Err(EpiError::Configuration(format!(
                "invalid observation model {other:?}"
            ))),
        }
    }

    /// Total log-likelihood of `observed` given simulated means
    /// `predicted`. Non-finite predictions yield `-inf`.
    pub fn log_likelihood(&self, observed: &[f64], predicted: &[f64]) -> f64 {
        debug_assert_eq!(observed.len(), predicted.len());
        let mut total = 0.0;
        for (&y, &mu) in observed.iter().zip(predicted) {
            if !mu.is_finite() {
                return f64::NEG_INFINITY;
            }
            total += match self {
                ObservationModel::Poisson => {
                    let mu = mu.max(MEAN_FLOOR);
                    y * mu.ln() - mu - ln_gamma(y + 1.0)
                }
                ObservationModel::Gaussian { sd } => {
                    let z = (y - mu) / sd;
                    -0.5 * z * z - sd.ln() - 0.5 * (2.0 * std::f64::consts::PI).ln()
                }
                ObservationModel::NegativeBinomial { k } => {
                    let mu = mu.max(MEAN_FLOOR);
                    ln_gamma(y + k) - ln_gamma(*k) - ln_gamma(y + 1.0)
                        + k * (k / (k + mu)).ln()
                        + y * (mu / (k + mu)).ln()
                }
            };
        }
        total
    }
}
