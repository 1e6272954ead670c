//! Generic reaction evaluation shared by the deterministic and stochastic
//! simulators.
//!
//! A [`ReactionSystem`] compiles a [`ModelDef`] into indexed reactions: one
//! per transition, each carrying a rate expression and a source/target
//! compartment pair. The same compiled flows serve as the right-hand side
//! of the continuous flow equations and as the propensities of the
//! discrete-event simulators, so no model family ever hard-codes its
//! reaction count.

use std::collections::HashSet;

use crate::engine::VectorField;
use crate::error::EpiError;
use crate::expr::{EvalContext, RateExpr};
use crate::types::interventions::InterventionSchedule;
use crate::types::model::{ModelDef, ReproductionRatio};

#[derive(Clone, Debug)]
struct CompiledReaction {
    id: String,
    rate: RateExpr,
    source: usize,
    target: usize,
    // A rate referencing a compartment is an absolute flow; otherwise it is
    // per-capita and multiplied by the source occupancy.
    absolute: bool,
}

#[derive(Clone, Debug)]
struct Modulation {
    schedule: InterventionSchedule,
    parameter: String,
}

/// Compiled reaction set with the evaluation context for its rates.
#[derive(Clone, Debug)]
pub struct ReactionSystem {
    compartments: Vec<String>,
    reactions: Vec<CompiledReaction>,
    parameter_ids: HashSet<String>,
    initial_state: Vec<f64>,
    infectious: Vec<usize>,
    reproduction: Option<ReproductionRatio>,
    ctx: EvalContext,
    modulation: Option<Modulation>,
    flow_buf: Vec<f64>,
}

impl ReactionSystem {
    pub fn from_model(model: &ModelDef) -> Result<Self, EpiError> {
        model.validate()?;

        let compartments = model.compartment_ids();
        let mut ctx = EvalContext::new();
        let mut parameter_ids = HashSet::new();
        for p in &model.parameters {
            ctx.set_parameter(p.id.clone(), p.value);
            parameter_ids.insert(p.id.clone());
        }

        let mut reactions = Vec::with_capacity(model.transitions.len());
        for t in &model.transitions {
            let source = model.index_of(&t.source).expect("validated");
            let target = model.index_of(&t.target).expect("validated");
            let mut absolute = false;
            for var in t.rate.variables() {
                if compartments.iter().any(|c| *c == var) {
                    absolute = true;
                } else if !parameter_ids.contains(&var) {
                    return Err(EpiError::Configuration(format!(
                        "rate of transition '{}' references '{}', which is neither \
                         a compartment nor a parameter",
                        t.id, var
                    )));
                }
            }
            reactions.push(CompiledReaction {
                id: t.id.clone(),
                rate: t.rate.clone(),
                source,
                target,
                absolute,
            });
        }

        let infectious = model
            .infectious
            .iter()
            .map(|id| model.index_of(id).expect("validated"))
            .collect();

        let flow_buf = vec![0.0; reactions.len()];
        Ok(Self {
            compartments,
            reactions,
            parameter_ids,
            initial_state: model.initial_state(),
            infectious,
            reproduction: model.reproduction.clone(),
            ctx,
            modulation: None,
            flow_buf,
        })
    }

    /// Attach an intervention schedule modulating the named transmission
    /// parameter. The effective value at time t is `value * factor_at(t)`.
    pub fn with_interventions(
        mut self,
        schedule: InterventionSchedule,
        parameter: impl Into<String>,
    ) -> Result<Self, EpiError> {
        let parameter = parameter.into();
        if !self.parameter_ids.contains(&parameter) {
            return Err(EpiError::Configuration(format!(
                "intervention target '{parameter}' is not a model parameter"
            )));
        }
        self.modulation = Some(Modulation {
            schedule,
            parameter,
        });
        Ok(self)
    }

    pub fn dim(&self) -> usize {
        self.compartments.len()
    }

    pub fn compartment_ids(&self) -> &[String] {
        &self.compartments
    }

    pub fn initial_state(&self) -> Vec<f64> {
        self.initial_state.clone()
    }

    pub fn reaction_count(&self) -> usize {
        self.reactions.len()
    }

    pub fn reaction_id(&self, reaction: usize) -> &str {
        &self.reactions[reaction].id
    }

    /// (source, target) compartment indices of a reaction; firing moves one
    /// unit (or one flow quantum) from source to target.
    pub fn endpoints(&self, reaction: usize) -> (usize, usize) {
        let r = &self.reactions[reaction];
        (r.source, r.target)
    }

    pub fn set_parameter(&mut self, id: &str, value: f64) -> Result<(), EpiError> {
        if !self.parameter_ids.contains(id) {
            return Err(EpiError::Configuration(format!("unknown parameter '{id}'")));
        }
        self.ctx.set_parameter(id.to_string(), value);
        Ok(())
    }

    pub fn parameter(&self, id: &str) -> Option<f64> {
        self.ctx.parameter(id)
    }

    pub fn reproduction(&self) -> Option<&ReproductionRatio> {
        self.reproduction.as_ref()
    }

    /// Basic reproduction number implied by the current parameter values.
    pub fn r0(&self) -> Option<f64> {
        let r = self.reproduction.as_ref()?;
        let transmission = self.ctx.parameter(&r.transmission)?;
        let removal = self.ctx.parameter(&r.removal)?;
        (removal != 0.0).then(|| transmission / removal)
    }

    /// True when every infectious-marked compartment is empty, the
    /// absorbing condition for stochastic runs.
    pub fn is_absorbed(&self, state: &[f64]) -> bool {
        self.infectious.iter().all(|&i| state[i] <= 0.0)
    }

    /// Evaluate every reaction's signed flow at (t, state) into `out`.
    pub fn flows(&mut self, t: f64, state: &[f64], out: &mut [f64]) -> Result<(), EpiError> {
        debug_assert_eq!(out.len(), self.reactions.len());
        self.ctx.set_time(t);
        for (i, id) in self.compartments.iter().enumerate() {
            self.ctx.set_compartment(id.clone(), state[i]);
        }

        let restore = match &self.modulation {
            Some(m) => {
                let base = self
                    .ctx
                    .parameter(&m.parameter)
                    .expect("modulated parameter exists");
                let factor = m.schedule.factor_at(t);
                let id = m.parameter.clone();
                self.ctx.set_parameter(id.clone(), base * factor);
                Some((id, base))
            }
            None => None,
        };

        let mut result = Ok(());
        for (r, reaction) in self.reactions.iter().enumerate() {
            let value = match reaction.rate.evaluate(&self.ctx) {
                Ok(v) => v,
                Err(e) => {
                    result = Err(EpiError::Expression(e));
                    break;
                }
            };
            out[r] = if reaction.absolute {
                value
            } else {
                value * state[reaction.source]
            };
        }

        if let Some((id, base)) = restore {
            self.ctx.set_parameter(id, base);
        }
        result
    }

    /// Reaction firing rates at (t, state): flows clamped to be
    /// non-negative, as required by the stochastic samplers.
    pub fn propensities(&mut self, t: f64, state: &[f64], out: &mut [f64]) -> Result<(), EpiError> {
        self.flows(t, state, out)?;
        for v in out.iter_mut() {
            if *v < 0.0 {
                *v = 0.0;
            }
        }
        Ok(())
    }
}

impl VectorField for ReactionSystem {
    fn dim(&self) -> usize {
        self.compartments.len()
    }

    fn compartments(&self) -> &[String] {
        &self.compartments
    }

    fn derivative(&mut self, t: f64, y: &[f64], dy: &mut [f64]) -> Result<(), EpiError> {
        let mut flows = std::mem::take(&mut self.flow_buf);
        let result = self.flows(t, y, &mut flows);
        if result.is_ok() {
            dy.fill(0.0);
            for (r, reaction) in self.reactions.iter().enumerate() {
                dy[reaction.source] -= flows[r];
                dy[reaction.target] += flows[r];
            }
        }
        self.flow_buf = flows;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::interventions::Intervention;
    use approx::assert_relative_eq;

    fn sir_system() -> ReactionSystem {
        ReactionSystem::from_model(&ModelDef::sir(1000.0, 10.0, 0.3, 0.1)).unwrap()
    }

    #[test]
    fn sir_flows_match_mass_action() {
        let mut sys = sir_system();
        let y = sys.initial_state();
        let mut flows = vec![0.0; sys.reaction_count()];
        sys.flows(0.0, &y, &mut flows).unwrap();
        assert_relative_eq!(flows[0], 0.3 * 990.0 * 10.0 / 1000.0, epsilon = 1e-9);
        assert_relative_eq!(flows[1], 0.1 * 10.0, epsilon = 1e-12);
    }

    #[test]
    fn derivative_conserves_population() {
        let mut sys = sir_system();
        let y = sys.initial_state();
        let mut dy = vec![0.0; sys.dim()];
        sys.derivative(0.0, &y, &mut dy).unwrap();
        assert_relative_eq!(dy.iter().sum::<f64>(), 0.0, epsilon = 1e-12);
        assert!(dy[0] < 0.0 && dy[2] > 0.0);
    }

    #[test]
    fn interventions_scale_transmission() {
        let schedule =
            InterventionSchedule::new(vec![Intervention::new(0.0, 10.0, 0.5)]).unwrap();
        let mut sys = sir_system().with_interventions(schedule, "beta").unwrap();
        let y = sys.initial_state();
        let mut flows = vec![0.0; sys.reaction_count()];
        sys.flows(5.0, &y, &mut flows).unwrap();
        assert_relative_eq!(flows[0], 0.5 * 0.3 * 990.0 * 10.0 / 1000.0, epsilon = 1e-9);
        // outside the window the base rate is back
        sys.flows(15.0, &y, &mut flows).unwrap();
        assert_relative_eq!(flows[0], 0.3 * 990.0 * 10.0 / 1000.0, epsilon = 1e-9);
        // base value untouched afterwards
        assert_relative_eq!(sys.parameter("beta").unwrap(), 0.3);
    }

    #[test]
    fn unknown_rate_variable_rejected() {
        let mut model = ModelDef::sir(1000.0, 10.0, 0.3, 0.1);
        model.transitions[1] = crate::types::model::Transition::new(
            "recovery", "I", "R", "gamma_typo",
        )
        .unwrap();
        assert!(ReactionSystem::from_model(&model).is_err());
    }

    #[test]
    fn absorbing_condition_checks_infectious_markers() {
        let sys = sir_system();
        assert!(!sys.is_absorbed(&[990.0, 10.0, 0.0]));
        assert!(sys.is_absorbed(&[990.0, 0.0, 10.0]));
    }

    #[test]
    fn set_parameter_rejects_unknown_id() {
        let mut sys = sir_system();
        assert!(sys.set_parameter("beta", 0.4).is_ok());
        assert!(sys.set_parameter("nope", 0.4).is_err());
        assert_relative_eq!(sys.r0().unwrap(), 4.0);
    }
}
