//! Deterministic simulation for epikit: numerical integration of
//! compartment flow equations, the calibratable ODE engine, multi-region
//! metapopulation coupling and age-structured dynamics.

pub mod age;
pub mod engine;
pub mod integrator;
pub mod metapopulation;

pub use age::{AgeBand, AgeStructuredModel};
pub use engine::OdeEngine;
pub use integrator::{integrate, IntegratorConfig, Method};
pub use metapopulation::{Metapopulation, MetapopulationRun};

#[cfg(test)]
mod tests {
    use super::*;
    use epikit_core::{EpiError, ModelDef, VectorField};

    // A field that blows up: the integrator must flag instability instead
    // of returning garbage.
    #[derive(Clone)]
    struct Explosive {
        names: Vec<String>,
    }

    impl VectorField for Explosive {
        fn dim(&self) -> usize {
            1
        }
        fn compartments(&self) -> &[String] {
            &self.names
        }
        fn derivative(&mut self, _t: f64, y: &[f64], dy: &mut [f64]) -> Result<(), EpiError> {
            dy[0] = y[0] * y[0] * 10.0;
            Ok(())
        }
    }

    #[test]
    fn runaway_field_reports_instability() {
        let mut field = Explosive {
            names: vec!["X".into()],
        };
        let result = integrate(
            &mut field,
            &[1.0],
            0.0,
            10.0,
            &IntegratorConfig::adaptive(),
        );
        assert!(matches!(result, Err(EpiError::NumericalInstability(_))));
    }

    #[test]
    fn zero_day_span_rejected() {
        let mut field = epikit_core::ReactionSystem::from_model(&ModelDef::sir(
            1000.0, 1.0, 0.3, 0.1,
        ))
        .unwrap();
        let y0 = field.initial_state();
        assert!(integrate(&mut field, &y0, 0.0, 0.0, &IntegratorConfig::adaptive()).is_err());
    }
}
