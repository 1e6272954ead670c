//! The calibration problem: candidate parameters against observed counts.

use argmin::core::{CostFunction, Error};

use epikit_core::{EpiError, ObservedSeries, SimulationEngine};

use crate::likelihood::ObservationModel;
use crate::types::CalibrationParameter;

/// Generic calibration problem over any [`SimulationEngine`].
///
/// Simulation time 0 corresponds to the first observed day; the engine runs
/// over the whole observation window and the named compartment's trajectory
/// is the mean of the observation model at each observed day.
#[derive(Clone)]
pub struct CalibrationProblem<E: SimulationEngine> {
    engine: E,
    series: ObservedSeries,
    compartment: String,
    parameters: Vec<CalibrationParameter>,
    observation: ObservationModel,
    horizon: u32,
}

impl<E: SimulationEngine> CalibrationProblem<E> {
    pub fn new(
        engine: E,
        series: ObservedSeries,
        compartment: impl Into<String>,
        parameters: Vec<CalibrationParameter>,
        observation: ObservationModel,
    ) -> Result<Self, EpiError> {
        let compartment = compartment.into();
        if parameters.is_empty() {
            return Err(EpiError::configuration("no calibration parameters"));
        }
        for p in &parameters {
            p.validate()?;
        }
        observation.validate()?;
        if !engine.compartments().iter().any(|c| *c == compartment) {
            return Err(EpiError::Configuration(format!(
                "observed compartment '{compartment}' not in model (available: {})",
                engine.compartments().join(", ")
            )));
        }
        if series.len() <= parameters.len() {
            return Err(EpiError::InsufficientData(format!(
                "{} observations cannot constrain {} free parameters",
                series.len(),
                parameters.len()
            )));
        }

        let horizon = (series.last_day() - series.first_day()).max(1);
        Ok(Self {
            engine,
            series,
            compartment,
            parameters,
            observation,
            horizon,
        })
    }

    pub fn num_parameters(&self) -> usize {
        self.parameters.len()
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.id.clone()).collect()
    }

    pub fn initial_parameters(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.initial_value()).collect()
    }

    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.parameters
            .iter()
            .map(|p| (p.min_bound, p.max_bound))
            .collect()
    }

    pub fn parameters(&self) -> &[CalibrationParameter] {
        &self.parameters
    }

    pub fn observations(&self) -> &ObservedSeries {
        &self.series
    }

    pub fn observed_values(&self) -> Vec<f64> {
        self.series.values()
    }

    /// Log-likelihood of a candidate vector. A candidate outside the
    /// declared domain scores `-inf` without invoking the simulator.
    pub fn log_likelihood(&self, values: &[f64]) -> Result<f64, EpiError> {
        if values.len() != self.parameters.len() {
            return Err(EpiError::Configuration(format!(
                "expected {} parameter values, got {}",
                self.parameters.len(),
                values.len()
            )));
        }
        if self
            .parameters
            .iter()
            .zip(values)
            .any(|(p, &v)| !v.is_finite() || !p.contains(v))
        {
            return Ok(f64::NEG_INFINITY);
        }

        let predicted = self.predict(values, self.horizon)?;
        Ok(self
            .observation
            .log_likelihood(&self.series.values(), &predicted))
    }

    /// Simulate a candidate and read the observed compartment on every day
    /// in `0..=days` (day 0 is the first observed day, so indices past the
    /// series length are forecasts).
    pub fn predict(&self, values: &[f64], days: u32) -> Result<Vec<f64>, EpiError> {
        let mut engine = self.engine.clone();
        engine.reset();
        for (p, &v) in self.parameters.iter().zip(values) {
            engine.set_parameter(&p.id, v)?;
        }
        let trajectory = engine.run(days)?;
        (0..=days)
            .map(|d| {
                trajectory
                    .value_at(f64::from(d), &self.compartment)
                    .ok_or_else(|| {
                        EpiError::Configuration(format!(
                            "compartment '{}' missing from trajectory",
                            self.compartment
                        ))
                    })
            })
            .collect()
    }

    /// Implied basic reproduction number at `values`, when the engine
    /// declares the ratio. Parameters not under calibration fall back to
    /// the engine's configured values.
    pub fn r0_for(&self, values: &[f64]) -> Option<f64> {
        let ratio = self.engine.reproduction()?;
        let lookup = |id: &str| {
            self.parameters
                .iter()
                .position(|p| p.id == id)
                .map(|idx| values[idx])
                .or_else(|| self.engine.parameter(id))
        };
        let transmission = lookup(&ratio.transmission)?;
        let removal = lookup(&ratio.removal)?;
        (removal != 0.0).then(|| transmission / removal)
    }
}

impl<E: SimulationEngine> CostFunction for CalibrationProblem<E> {
    type Param = Vec<f64>;
    type Output = f64;

    // argmin minimizes, so the cost is the negated log-likelihood; domain
    // rejections become +inf.
    fn cost(&self, param: &Self::Param) -> Result<Self::Output, Error> {
        let ll = self.log_likelihood(param).map_err(Error::msg)?;
        if ll == f64::NEG_INFINITY {
            return Ok(f64::INFINITY);
        }
        Ok(-ll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epikit_core::ModelDef;
    use epikit_ode::OdeEngine;

    fn sir_problem() -> CalibrationProblem<OdeEngine> {
        let model = ModelDef::sir(1000.0, 1.0, 0.3, 0.1);
        let mut engine = OdeEngine::new(&model).unwrap();
        let observed = {
            use epikit_core::SimulationEngine;
            let trajectory = engine.run(60).unwrap();
            ObservedSeries::from_counts(&trajectory.series("I").unwrap(), 1000.0).unwrap()
        };
        CalibrationProblem::new(
            engine,
            observed,
            "I",
            vec![
                CalibrationParameter::new("beta", 0.01, 1.0),
                CalibrationParameter::new("gamma", 0.01, 0.5),
            ],
            ObservationModel::Poisson,
        )
        .unwrap()
    }

    #[test]
    fn out_of_domain_candidate_scores_neg_infinity() {
        let problem = sir_problem();
        assert_eq!(
            problem.log_likelihood(&[-0.1, 0.1]).unwrap(),
            f64::NEG_INFINITY
        );
        assert_eq!(
            problem.log_likelihood(&[0.3, 2.0]).unwrap(),
            f64::NEG_INFINITY
        );
        let cost = problem.cost(&vec![-0.1, 0.1]).unwrap();
        assert_eq!(cost, f64::INFINITY);
    }

    #[test]
    fn truth_beats_neighboring_candidates() {
        let problem = sir_problem();
        let at_truth = problem.log_likelihood(&[0.3, 0.1]).unwrap();
        for candidate in [[0.25, 0.1], [0.35, 0.1], [0.3, 0.12], [0.3, 0.08]] {
            assert!(at_truth > problem.log_likelihood(&candidate).unwrap());
        }
    }

    #[test]
    fn too_few_observations_rejected() {
        let model = ModelDef::sir(1000.0, 1.0, 0.3, 0.1);
        let engine = OdeEngine::new(&model).unwrap();
        let observed = ObservedSeries::from_counts(&[1.0, 2.0], 1000.0).unwrap();
        let result = CalibrationProblem::new(
            engine,
            observed,
            "I",
            vec![
                CalibrationParameter::new("beta", 0.01, 1.0),
                CalibrationParameter::new("gamma", 0.01, 0.5),
            ],
            ObservationModel::Poisson,
        );
        assert!(matches!(result, Err(EpiError::InsufficientData(_))));
    }

    #[test]
    fn unknown_compartment_rejected() {
        let model = ModelDef::sir(1000.0, 1.0, 0.3, 0.1);
        let engine = OdeEngine::new(&model).unwrap();
        let observed = ObservedSeries::from_counts(&[1.0, 2.0, 3.0, 4.0], 1000.0).unwrap();
        assert!(CalibrationProblem::new(
            engine,
            observed,
            "X",
            vec![CalibrationParameter::new("beta", 0.01, 1.0)],
            ObservationModel::Poisson,
        )
        .is_err());
    }

    #[test]
    fn r0_uses_fitted_and_fallback_values() {
        let problem = sir_problem();
        let r0 = problem.r0_for(&[0.4, 0.1]).unwrap();
        assert!((r0 - 4.0).abs() < 1e-12);

        // gamma not under calibration: falls back to the engine's value
        let model = ModelDef::sir(1000.0, 1.0, 0.3, 0.1);
        let mut engine = OdeEngine::new(&model).unwrap();
        let observed = {
            use epikit_core::SimulationEngine;
            let trajectory = engine.run(30).unwrap();
            ObservedSeries::from_counts(&trajectory.series("I").unwrap(), 1000.0).unwrap()
        };
        let problem = CalibrationProblem::new(
            engine,
            observed,
            "I",
            vec![CalibrationParameter::new("beta", 0.01, 1.0)],
            ObservationModel::Poisson,
        )
        .unwrap();
        let r0 = problem.r0_for(&[0.2]).unwrap();
        assert!((r0 - 2.0).abs() < 1e-12);
    }
}
