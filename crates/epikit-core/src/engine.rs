//! Strategy seams between model families, integrators and the estimator.

use crate::error::EpiError;
use crate::types::model::ReproductionRatio;
use crate::types::trajectory::Trajectory;

/// A continuous-time flow field: the derivative of every compartment as a
/// function of the current state. Implemented by the reaction system, the
/// metapopulation coupler and the age-structured model; consumed by the
/// numerical integrators.
///
/// `derivative` takes `&mut self` because implementations reuse internal
/// evaluation buffers between calls; the visible state is `y` alone.
pub trait VectorField {
    fn dim(&self) -> usize;

    fn compartments(&self) -> &[String];

    fn derivative(&mut self, t: f64, y: &[f64], dy: &mut [f64]) -> Result<(), EpiError>;
}

/// A calibratable forward simulator: the estimator clones it, resets it,
/// overrides candidate parameters and runs it over the observation window.
/// One implementation per model family, selected at construction time.
pub trait SimulationEngine: Clone + Send {
    fn compartments(&self) -> &[String];

    /// Restore the initial state; parameter overrides survive a reset.
    fn reset(&mut self);

    fn set_parameter(&mut self, id: &str, value: f64) -> Result<(), EpiError>;

    fn parameter(&self, id: &str) -> Option<f64>;

    /// Which parameters form the basic reproduction number, when declared.
    fn reproduction(&self) -> Option<ReproductionRatio> {
        None
    }

    /// Simulate from the initial state for `days` days, reporting one row
    /// per day starting at day 0.
    fn run(&mut self, days: u32) -> Result<Trajectory, EpiError>;
}
