//! Compartmental model definitions.

use serde::{Deserialize, Serialize};

use crate::error::EpiError;
use crate::expr::RateExpr;

/// A named subpopulation bucket with its initial occupancy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Compartment {
    pub id: String,
    pub initial: f64,
}

impl Compartment {
    pub fn new(id: impl Into<String>, initial: f64) -> Self {
        Self {
            id: id.into(),
            initial,
        }
    }
}

/// A named scalar model parameter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Parameter {
    pub id: String,
    pub value: f64,
    pub description: Option<String>,
}

impl Parameter {
    pub fn new(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value,
            description: None,
        }
    }
}

/// A directed flow between two compartments.
///
/// The rate is either per-capita (multiplied by the source occupancy) or
/// absolute; see [`crate::reaction::ReactionSystem`] for the distinction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transition {
    pub id: String,
    pub source: String,
    pub target: String,
    pub rate: RateExpr,
}

impl Transition {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        rate: &str,
    ) -> Result<Self, EpiError> {
        Ok(Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            rate: RateExpr::parse(rate)?,
        })
    }
}

/// Names the parameters whose ratio gives the basic reproduction number.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReproductionRatio {
    pub transmission: String,
    pub removal: String,
}

/// A complete compartmental model: compartments with initial occupancies,
/// parameters, and the transitions connecting them.
///
/// `infectious` lists the compartments whose occupancy keeps an outbreak
/// alive (incubating stages included); stochastic simulators stop when all
/// of them are empty.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelDef {
    pub name: String,
    pub description: Option<String>,
    pub compartments: Vec<Compartment>,
    pub parameters: Vec<Parameter>,
    pub transitions: Vec<Transition>,
    pub infectious: Vec<String>,
    pub reproduction: Option<ReproductionRatio>,
}

impl ModelDef {
    /// Validate internal consistency: unique compartment ids, transitions
    /// and markers referencing known compartments, non-negative initial
    /// occupancies.
    pub fn validate(&self) -> Result<(), EpiError> {
        if self.compartments.is_empty() {
            return Err(EpiError::configuration("model has no compartments"));
        }
        for (i, c) in self.compartments.iter().enumerate() {
            if self.compartments[..i].iter().any(|other| other.id == c.id) {
                return Err(EpiError::Configuration(format!(
                    "duplicate compartment id '{}'",
                    c.id
                )));
            }
            if !c.initial.is_finite() || c.initial < 0.0 {
                return Err(EpiError::Configuration(format!(
                    "compartment '{}' has invalid initial value {}",
                    c.id, c.initial
                )));
            }
        }
        for t in &self.transitions {
            for end in [&t.source, &t.target] {
                if self.index_of(end).is_none() {
                    return Err(EpiError::Configuration(format!(
                        "transition '{}' references unknown compartment '{}'",
                        t.id, end
                    )));
                }
            }
        }
        for id in &self.infectious {
            if self.index_of(id).is_none() {
                return Err(EpiError::Configuration(format!(
                    "infectious marker references unknown compartment '{id}'"
                )));
            }
        }
        if let Some(r) = &self.reproduction {
            for id in [&r.transmission, &r.removal] {
                if !self.parameters.iter().any(|p| &p.id == id) {
                    return Err(EpiError::Configuration(format!(
                        "reproduction ratio references unknown parameter '{id}'"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn index_of(&self, compartment: &str) -> Option<usize> {
        self.compartments.iter().position(|c| c.id == compartment)
    }

    pub fn compartment_ids(&self) -> Vec<String> {
        self.compartments.iter().map(|c| c.id.clone()).collect()
    }

    pub fn initial_state(&self) -> Vec<f64> {
        self.compartments.iter().map(|c| c.initial).collect()
    }

    pub fn total_population(&self) -> f64 {
        self.compartments.iter().map(|c| c.initial).sum()
    }

    /// Implied basic reproduction number at the current parameter values,
    /// when the model declares one.
    pub fn r0(&self) -> Option<f64> {
        let r = self.reproduction.as_ref()?;
        let find = |id: &str| self.parameters.iter().find(|p| p.id == id).map(|p| p.value);
        let transmission = find(&r.transmission)?;
        let removal = find(&r.removal)?;
        (removal != 0.0).then(|| transmission / removal)
    }

    pub fn from_json(json: &str) -> Result<Self, EpiError> {
        let model: ModelDef = serde_json::from_str(json)
            .map_err(|e| EpiError::Configuration(format!("model JSON: {e}")))?;
        model.validate()?;
        Ok(model)
    }

    pub fn to_json(&self) -> Result<String, EpiError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EpiError::Configuration(format!("model JSON: {e}")))
    }
}

// Built-in model families. Transmission uses an absolute mass-action flow
// `beta * S * I / N`; progression and removal flows are per-capita.
impl ModelDef {
    /// Susceptible-Infectious-Recovered.
    pub fn sir(population: f64, initial_infectious: f64, beta: f64, gamma: f64) -> Self {
        ModelDef {
            name: "sir".into(),
            description: None,
            compartments: vec![
                Compartment::new("S", population - initial_infectious),
                Compartment::new("I", initial_infectious),
                Compartment::new("R", 0.0),
            ],
            parameters: vec![Parameter::new("beta", beta), Parameter::new("gamma", gamma)],
            transitions: vec![
                Transition::new("infection", "S", "I", "beta * S * I / N").unwrap(),
                Transition::new("recovery", "I", "R", "gamma").unwrap(),
            ],
            infectious: vec!["I".into()],
            reproduction: Some(ReproductionRatio {
                transmission: "beta".into(),
                removal: "gamma".into(),
            }),
        }
    }

    /// SIR with an incubating (exposed, not yet infectious) stage.
    pub fn seir(
        population: f64,
        initial_exposed: f64,
        initial_infectious: f64,
        beta: f64,
        sigma: f64,
        gamma: f64,
    ) -> Self {
        ModelDef {
            name: "seir".into(),
            description: None,
            compartments: vec![
                Compartment::new("S", population - initial_exposed - initial_infectious),
                Compartment::new("E", initial_exposed),
                Compartment::new("I", initial_infectious),
                Compartment::new("R", 0.0),
            ],
            parameters: vec![
                Parameter::new("beta", beta),
                Parameter::new("sigma", sigma),
                Parameter::new("gamma", gamma),
            ],
            transitions: vec![
                Transition::new("infection", "S", "E", "beta * S * I / N").unwrap(),
                Transition::new("incubation", "E", "I", "sigma").unwrap(),
                Transition::new("recovery", "I", "R", "gamma").unwrap(),
            ],
            infectious: vec!["E".into(), "I".into()],
            reproduction: Some(ReproductionRatio {
                transmission: "beta".into(),
                removal: "gamma".into(),
            }),
        }
    }

    /// SEIR with waning immunity (R flows back to S at rate omega).
    pub fn seirs(
        population: f64,
        initial_exposed: f64,
        initial_infectious: f64,
        beta: f64,
        sigma: f64,
        gamma: f64,
        omega: f64,
    ) -> Self {
        let mut model = Self::seir(
            population,
            initial_exposed,
            initial_infectious,
            beta,
            sigma,
            gamma,
        );
        model.name = "seirs".into();
        model.parameters.push(Parameter::new("omega", omega));
        model
            .transitions
            .push(Transition::new("waning", "R", "S", "omega").unwrap());
        model
    }

    /// SIR with an absorbing fatality compartment.
    pub fn sird(
        population: f64,
        initial_infectious: f64,
        beta: f64,
        gamma: f64,
        mu: f64,
    ) -> Self {
        ModelDef {
            name: "sird".into(),
            description: None,
            compartments: vec![
                Compartment::new("S", population - initial_infectious),
                Compartment::new("I", initial_infectious),
                Compartment::new("R", 0.0),
                Compartment::new("D", 0.0),
            ],
            parameters: vec![
                Parameter::new("beta", beta),
                Parameter::new("gamma", gamma),
                Parameter::new("mu", mu),
            ],
            transitions: vec![
                Transition::new("infection", "S", "I", "beta * S * I / N").unwrap(),
                Transition::new("recovery", "I", "R", "gamma").unwrap(),
                Transition::new("death", "I", "D", "mu").unwrap(),
            ],
            infectious: vec!["I".into()],
            reproduction: Some(ReproductionRatio {
                transmission: "beta".into(),
                removal: "gamma".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_models_validate() {
        for model in [
            ModelDef::sir(1000.0, 1.0, 0.3, 0.1),
            ModelDef::seir(1000.0, 0.0, 1.0, 0.3, 0.2, 0.1),
            ModelDef::seirs(1000.0, 0.0, 1.0, 0.3, 0.2, 0.1, 0.01),
            ModelDef::sird(1000.0, 1.0, 0.3, 0.09, 0.01),
        ] {
            model.validate().unwrap();
            assert_eq!(model.total_population(), 1000.0);
        }
    }

    #[test]
    fn sir_reports_r0() {
        let model = ModelDef::sir(1000.0, 1.0, 0.3, 0.1);
        assert!((model.r0().unwrap() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn unknown_transition_compartment_rejected() {
        let mut model = ModelDef::sir(1000.0, 1.0, 0.3, 0.1);
        model.transitions[0].target = "X".into();
        assert!(matches!(
            model.validate(),
            Err(EpiError::Configuration(_))
        ));
    }

    #[test]
    fn negative_initial_rejected() {
        let model = ModelDef::sir(1000.0, 2000.0, 0.3, 0.1);
        assert!(model.validate().is_err());
    }

    #[test]
    fn model_roundtrips_through_json() {
        let model = ModelDef::seirs(1000.0, 5.0, 1.0, 0.3, 0.2, 0.1, 0.01);
        let json = model.to_json().unwrap();
        let back = ModelDef::from_json(&json).unwrap();
        assert_eq!(back.compartment_ids(), model.compartment_ids());
        assert_eq!(back.transitions.len(), model.transitions.len());
    }
}
