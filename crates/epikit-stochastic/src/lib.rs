//! Stochastic simulation for epikit: the exact Gillespie direct method and
//! fixed-interval tau-leaping over the shared reaction abstraction, plus
//! parallel ensembles with envelope summaries.

pub mod ensemble;
pub mod gillespie;
pub mod tau_leap;

pub use ensemble::{run_ensemble, time_grid, EnsembleConfig, EnsembleSummary, SamplerMode};
pub use gillespie::{simulate_exact, StochasticConfig};
pub use tau_leap::simulate_tau_leap;
