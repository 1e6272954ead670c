//! Error types shared across the workspace.

use crate::expr::ExprError;

/// Errors raised by model construction and simulation.
///
/// Convergence failure during calibration is deliberately not represented
/// here: optimizers and samplers always return a result object carrying a
/// `converged` flag, so a degraded fit stays inspectable instead of
/// becoming an error.
#[derive(Debug, thiserror::Error)]
pub enum EpiError {
    /// Structurally invalid input: dimension mismatches, out-of-domain
    /// values supplied directly, malformed schedules or series.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The integrator could not maintain its accuracy or conservation
    /// contract. The run is aborted rather than returning unreliable output.
    #[error("numerical instability: {0}")]
    NumericalInstability(String),

    /// Too few observations relative to what the operation requires.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// A rate formula failed to parse or evaluate.
    #[error("rate expression error: {0}")]
    Expression(#[from] ExprError),
}

impl EpiError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        EpiError::Configuration(msg.into())
    }

    pub fn instability(msg: impl Into<String>) -> Self {
        EpiError::NumericalInstability(msg.into())
    }

    pub fn insufficient_data(msg: impl Into<String>) -> Self {
        EpiError::InsufficientData(msg.into())
    }
}
