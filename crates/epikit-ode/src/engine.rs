//! Deterministic simulation engine over a reaction system.

use epikit_core::{
    EpiError, InterventionSchedule, ModelDef, ReactionSystem, ReproductionRatio,
    SimulationEngine, Trajectory,
};

use crate::integrator::{integrate, IntegratorConfig};

/// Continuous-time engine: a compiled reaction system plus an integrator
/// configuration. Cheap to clone, which is how the estimator evaluates
/// candidate parameter vectors.
#[derive(Clone, Debug)]
pub struct OdeEngine {
    system: ReactionSystem,
    config: IntegratorConfig,
    base_parameters: Vec<(String, f64)>,
}

impl OdeEngine {
    /// Build with the default adaptive integrator and daily reporting.
    pub fn new(model: &ModelDef) -> Result<Self, EpiError> {
        Self::with_config(model, IntegratorConfig::adaptive())
    }

    pub fn with_config(model: &ModelDef, config: IntegratorConfig) -> Result<Self, EpiError> {
        config.validate()?;
        let system = ReactionSystem::from_model(model)?;
        let base_parameters = model
            .parameters
            .iter()
            .map(|p| (p.id.clone(), p.value))
            .collect();
        Ok(Self {
            system,
            config,
            base_parameters,
        })
    }

    /// Attach an intervention schedule modulating `parameter`.
    pub fn with_interventions(
        mut self,
        schedule: InterventionSchedule,
        parameter: &str,
    ) -> Result<Self, EpiError> {
        self.system = self.system.with_interventions(schedule, parameter)?;
        Ok(self)
    }

    pub fn system(&self) -> &ReactionSystem {
        &self.system
    }

    pub fn config(&self) -> &IntegratorConfig {
        &self.config
    }

    /// Integrate over an arbitrary span (not just whole days).
    pub fn simulate(&mut self, t0: f64, t_end: f64) -> Result<Trajectory, EpiError> {
        let y0 = self.system.initial_state();
        integrate(&mut self.system, &y0, t0, t_end, &self.config)
    }
}

impl SimulationEngine for OdeEngine {
    fn compartments(&self) -> &[String] {
        self.system.compartment_ids()
    }

    fn reset(&mut self) {
        for (id, value) in &self.base_parameters {
            self.system
                .set_parameter(id, *value)
                .expect("base parameter exists");
        }
    }

    fn set_parameter(&mut self, id: &str, value: f64) -> Result<(), EpiError> {
        self.system.set_parameter(id, value)
    }

    fn parameter(&self, id: &str) -> Option<f64> {
        self.system.parameter(id)
    }

    fn reproduction(&self) -> Option<ReproductionRatio> {
        self.system.reproduction().cloned()
    }

    fn run(&mut self, days: u32) -> Result<Trajectory, EpiError> {
        if days == 0 {
            return Err(EpiError::Configuration(
                "run requires at least one day".into(),
            ));
        }
        self.simulate(0.0, f64::from(days))
    }
}
