//! Core data model and abstractions for the epikit epidemic-dynamics
//! workspace: compartmental model definitions, rate expressions, the
//! generic reaction system, trajectories, observed series, coupling
//! matrices, intervention schedules, and the traits connecting model
//! families to integrators and estimators.

pub mod engine;
pub mod error;
pub mod expr;
pub mod reaction;
pub mod seed;
pub mod types;

pub use engine::{SimulationEngine, VectorField};
pub use error::EpiError;
pub use expr::{EvalContext, ExprError, Formula, RateExpr};
pub use reaction::ReactionSystem;
pub use types::interventions::{Intervention, InterventionSchedule, OverlapPolicy};
pub use types::matrices::{ContactMatrix, MobilityMatrix};
pub use types::model::{Compartment, ModelDef, Parameter, ReproductionRatio, Transition};
pub use types::observed::{ObservedPoint, ObservedSeries};
pub use types::trajectory::{StabilityWarning, Trajectory};
