//! Rate expression evaluation.
//!
//! Transition rates in a [`crate::ModelDef`](crate::types::model::ModelDef)
//! are either numeric constants, bare parameter ids, or formulas over
//! parameters and compartment names. Two variables are always in scope:
//!
//! - `N`: current total population (sum of all compartments)
//! - `t`: current simulation time
//!
//! Formulas accept the usual arithmetic operators (`+`, `-`, `*`, `/`, `%`,
//! `^`; Python-style `**` is converted to `^`) and the math functions
//! `sin`, `cos`, `tan`, `exp`, `ln`, `sqrt`, `abs` and `pow`. `min`, `max`,
//! `floor`, `ceil`, `round` and `if` are available as well.

use std::collections::{HashMap, HashSet};

use evalexpr::{
    build_operator_tree, ContextWithMutableVariables, EvalexprError, HashMapContext, Node, Value,
};
use serde::{Deserialize, Serialize};

const VAR_TOTAL: &str = "N";
const VAR_TIME: &str = "t";

/// Errors from parsing or evaluating a rate formula.
#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    #[error("invalid formula: {0}")]
    Parse(#[from] EvalexprError),
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    #[error("formula '{0}' did not evaluate to a number")]
    NotNumeric(String),
}

/// Variable bindings available to a rate formula at one evaluation point.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    parameters: HashMap<String, f64>,
    compartments: HashMap<String, f64>,
    time: f64,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_parameter(&mut self, id: impl Into<String>, value: f64) {
        self.parameters.insert(id.into(), value);
    }

    pub fn set_compartment(&mut self, id: impl Into<String>, value: f64) {
        self.compartments.insert(id.into(), value);
    }

    pub fn set_time(&mut self, t: f64) {
        self.time = t;
    }

    pub fn parameter(&self, id: &str) -> Option<f64> {
        self.parameters.get(id).copied()
    }

    pub fn parameters(&self) -> &HashMap<String, f64> {
        &self.parameters
    }

    fn bindings(&self) -> HashMapContext {
        let mut ctx = HashMapContext::new();
        for (id, value) in &self.parameters {
            ctx.set_value(id.clone(), Value::Float(*value)).ok();
        }
        for (id, value) in &self.compartments {
            ctx.set_value(id.clone(), Value::Float(*value)).ok();
        }
        let total: f64 = self.compartments.values().sum();
        ctx.set_value(VAR_TOTAL.into(), Value::Float(total)).ok();
        ctx.set_value(VAR_TIME.into(), Value::Float(self.time)).ok();
        ctx
    }
}

/// Functions that must be namespaced for the evaluator.
const PREFIXED_FNS: &[&str] = &["sqrt", "sin", "cos", "tan", "exp", "ln", "abs", "pow"];

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == ':'
}

/// Rewrite a user-facing formula into evaluator syntax: `**` becomes `^`
/// and bare math functions get their `math::` namespace.
fn rewrite(formula: &str) -> String {
    let mut out = formula.replace("**", "^");
    for func in PREFIXED_FNS {
        let pattern = format!("{func}(");
        let mut rewritten = String::with_capacity(out.len());
        let mut rest = out.as_str();
        while let Some(pos) = rest.find(&pattern) {
            let preceded_by_ident = rest[..pos].chars().next_back().is_some_and(is_ident_char);
            rewritten.push_str(&rest[..pos]);
            if preceded_by_ident {
                rewritten.push_str(&pattern);
            } else {
                rewritten.push_str("math::");
                rewritten.push_str(&pattern);
            }
            rest = &rest[pos + pattern.len()..];
        }
        rewritten.push_str(rest);
        out = rewritten;
    }
    out
}

/// A parsed formula. The operator tree is built once at construction and
/// reused for every evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct Formula {
    pub text: String,
    #[serde(skip)]
    tree: Node,
}

// Rebuilds the operator tree on deserialization; only the text is stored.
impl<'de> Deserialize<'de> for Formula {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Stored {
            text: String,
        }
        let stored = Stored::deserialize(deserializer)?;
        Formula::parse(&stored.text).map_err(serde::de::Error::custom)
    }
}

impl Formula {
    pub fn parse(text: &str) -> Result<Self, ExprError> {
        let tree = build_operator_tree(&rewrite(text))?;
        Ok(Self {
            text: text.to_string(),
            tree,
        })
    }

    pub fn evaluate(&self, ctx: &EvalContext) -> Result<f64, ExprError> {
        match self.tree.eval_with_context(&ctx.bindings())? {
            Value::Float(v) => Ok(v),
            Value::Int(v) => Ok(v as f64),
            _ => Err(ExprError::NotNumeric(self.text.clone())),
        }
    }

    /// All variable identifiers the formula references, except the
    /// always-available `N` and `t`.
    pub fn variables(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        for ident in self.tree.iter_variable_identifiers() {
            if ident != VAR_TOTAL && ident != VAR_TIME {
                seen.insert(ident.to_string());
            }
        }
        seen.into_iter().collect()
    }
}

/// A transition rate: constant, bare parameter, or formula.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RateExpr {
    Constant(f64),
    Parameter(String),
    Formula(Formula),
}

impl RateExpr {
    /// Classify a rate string. Numbers become [`RateExpr::Constant`], a
    /// single identifier becomes [`RateExpr::Parameter`], anything else is
    /// parsed as a formula.
    pub fn parse(text: &str) -> Result<Self, ExprError> {
        let trimmed = text.trim();
        if let Ok(value) = trimmed.parse::<f64>() {
            return Ok(RateExpr::Constant(value));
        }
        if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Ok(RateExpr::Parameter(trimmed.to_string()));
        }
        Ok(RateExpr::Formula(Formula::parse(trimmed)?))
    }

    pub fn evaluate(&self, ctx: &EvalContext) -> Result<f64, ExprError> {
        match self {
            RateExpr::Constant(value) => Ok(*value),
            RateExpr::Parameter(id) => ctx
                .parameter(id)
                .ok_or_else(|| ExprError::UnknownParameter(id.clone())),
            RateExpr::Formula(formula) => formula.evaluate(ctx),
        }
    }

    pub fn variables(&self) -> Vec<String> {
        match self {
            RateExpr::Constant(_) => Vec::new(),
            RateExpr::Parameter(id) => vec![id.clone()],
            RateExpr::Formula(formula) => formula.variables(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ctx() -> EvalContext {
        let mut ctx = EvalContext::new();
        ctx.set_parameter("beta", 0.3);
        ctx.set_compartment("S", 990.0);
        ctx.set_compartment("I", 10.0);
        ctx.set_time(2.0);
        ctx
    }

    #[test]
    fn constant_and_parameter_rates() {
        assert_relative_eq!(RateExpr::parse("0.25").unwrap().evaluate(&ctx()).unwrap(), 0.25);
        assert_relative_eq!(RateExpr::parse("beta").unwrap().evaluate(&ctx()).unwrap(), 0.3);
    }

    #[test]
    fn formula_sees_compartments_and_total() {
        let rate = RateExpr::parse("beta * S * I / N").unwrap();
        assert_relative_eq!(rate.evaluate(&ctx()).unwrap(), 0.3 * 990.0 * 10.0 / 1000.0);
    }

    #[test]
    fn seasonal_forcing_formula() {
        let rate = RateExpr::parse("beta * (1 + 0.2 * sin(2 * 3.14159 * t / 365))").unwrap();
        let value = rate.evaluate(&ctx()).unwrap();
        assert!(value > 0.3 && value < 0.31);
    }

    #[test]
    fn python_power_operator_accepted() {
        let rate = RateExpr::parse("beta ** 2").unwrap();
        assert_relative_eq!(rate.evaluate(&ctx()).unwrap(), 0.09, epsilon = 1e-12);
    }

    #[test]
    fn unknown_parameter_is_reported() {
        let err = RateExpr::parse("rho").unwrap().evaluate(&ctx()).unwrap_err();
        assert!(matches!(err, ExprError::UnknownParameter(id) if id == "rho"));
    }

    #[test]
    fn variables_exclude_builtins() {
        let rate = RateExpr::parse("beta * S * I / N").unwrap();
        let mut vars = rate.variables();
        vars.sort();
        assert_eq!(vars, vec!["I", "S", "beta"]);
    }

    #[test]
    fn formula_roundtrips_through_json() {
        let rate = RateExpr::parse("beta * S * I / N").unwrap();
        let json = serde_json::to_string(&rate).unwrap();
        let back: RateExpr = serde_json::from_str(&json).unwrap();
        assert_relative_eq!(
            back.evaluate(&ctx()).unwrap(),
            rate.evaluate(&ctx()).unwrap()
        );
    }
}
