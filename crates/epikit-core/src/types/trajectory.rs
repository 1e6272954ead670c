//! Simulation output: ordered (time, state) rows.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A numerical-stability event recorded while producing a trajectory,
/// e.g. a compartment clamped back to zero.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StabilityWarning {
    pub time: f64,
    pub compartment: String,
    pub value: f64,
}

/// Ordered sequence of (time, compartment values) rows produced by one
/// simulator invocation. Read-only once produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trajectory {
    compartments: Vec<String>,
    times: Vec<f64>,
    states: Vec<Vec<f64>>,
    warnings: Vec<StabilityWarning>,
}

impl Trajectory {
    pub fn new(compartments: Vec<String>) -> Self {
        Self {
            compartments,
            times: Vec::new(),
            states: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_capacity(compartments: Vec<String>, rows: usize) -> Self {
        Self {
            compartments,
            times: Vec::with_capacity(rows),
            states: Vec::with_capacity(rows),
            warnings: Vec::new(),
        }
    }

    pub fn push(&mut self, time: f64, state: Vec<f64>) {
        debug_assert_eq!(state.len(), self.compartments.len());
        self.times.push(time);
        self.states.push(state);
    }

    pub fn push_warning(&mut self, warning: StabilityWarning) {
        self.warnings.push(warning);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn compartments(&self) -> &[String] {
        &self.compartments
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn states(&self) -> &[Vec<f64>] {
        &self.states
    }

    pub fn warnings(&self) -> &[StabilityWarning] {
        &self.warnings
    }

    pub fn last_state(&self) -> Option<(&f64, &[f64])> {
        match (self.times.last(), self.states.last()) {
            (Some(t), Some(s)) => Some((t, s.as_slice())),
            _ => None,
        }
    }

    /// Time series of one compartment across all rows.
    pub fn series(&self, compartment: &str) -> Option<Vec<f64>> {
        let idx = self.compartments.iter().position(|c| c == compartment)?;
        Some(self.states.iter().map(|row| row[idx]).collect())
    }

    /// Compartment value at an arbitrary time, step-function sampled: the
    /// last row at or before `time` applies. Times before the first row
    /// sample the first row.
    pub fn value_at(&self, time: f64, compartment: &str) -> Option<f64> {
        let idx = self.compartments.iter().position(|c| c == compartment)?;
        self.row_at(time).map(|row| row[idx])
    }

    /// Full state row at an arbitrary time, step-function sampled.
    pub fn row_at(&self, time: f64) -> Option<&[f64]> {
        if self.times.is_empty() {
            return None;
        }
        let pos = self.times.partition_point(|&t| t <= time);
        let row = if pos == 0 { 0 } else { pos - 1 };
        Some(&self.states[row])
    }

    /// Sum of all compartments in the row at `index`.
    pub fn total_at(&self, index: usize) -> Option<f64> {
        self.states.get(index).map(|row| row.iter().sum())
    }

    /// Rows as (time, compartment -> value) maps, the shape reporting
    /// collaborators consume.
    pub fn named_rows(&self) -> Vec<(f64, HashMap<String, f64>)> {
        self.times
            .iter()
            .zip(&self.states)
            .map(|(&t, row)| {
                let map = self
                    .compartments
                    .iter()
                    .cloned()
                    .zip(row.iter().copied())
                    .collect();
                (t, map)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Trajectory {
        let mut t = Trajectory::new(vec!["S".into(), "I".into()]);
        t.push(0.0, vec![99.0, 1.0]);
        t.push(1.0, vec![95.0, 5.0]);
        t.push(3.0, vec![90.0, 10.0]);
        t
    }

    #[test]
    fn series_extraction() {
        assert_eq!(sample().series("I").unwrap(), vec![1.0, 5.0, 10.0]);
        assert!(sample().series("X").is_none());
    }

    #[test]
    fn step_function_sampling() {
        let t = sample();
        assert_eq!(t.value_at(0.5, "I").unwrap(), 1.0);
        assert_eq!(t.value_at(1.0, "I").unwrap(), 5.0);
        assert_eq!(t.value_at(2.9, "I").unwrap(), 5.0);
        assert_eq!(t.value_at(10.0, "I").unwrap(), 10.0);
        // before the first row: first row applies
        assert_eq!(t.value_at(-1.0, "I").unwrap(), 1.0);
    }

    #[test]
    fn totals() {
        assert_eq!(sample().total_at(0).unwrap(), 100.0);
        assert_eq!(sample().total_at(2).unwrap(), 100.0);
    }
}
