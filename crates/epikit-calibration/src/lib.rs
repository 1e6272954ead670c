//! Parameter estimation and model selection for epikit.
//!
//! Two estimation modes share one likelihood abstraction: bounded
//! derivative-free maximization (Nelder-Mead or particle swarm via argmin)
//! and random-walk Metropolis-Hastings posterior sampling with Gelman-Rubin
//! diagnostics. On top of the estimator sits the model comparator: AIC/BIC
//! ranking and expanding-window temporal cross-validation.

pub mod comparison;
pub mod likelihood;
pub mod mcmc;
pub mod optimization;
pub mod problem;
pub mod types;

pub use comparison::{
    compare, compare_with_cv, cross_validate, Candidate, ComparisonRow, ComparisonTable,
    CrossValidationConfig, CvReport, FoldScore,
};
pub use likelihood::ObservationModel;
pub use mcmc::{sample_posterior, McmcConfig};
pub use optimization::{fit, NelderMeadConfig, OptimizerConfig, ParticleSwarmConfig};
pub use problem::CalibrationProblem;
pub use types::{
    CalibrationParameter, FitResult, PosteriorFit, PosteriorSummary, Prior,
};
