//! Time-varying transmission reductions.

use serde::{Deserialize, Serialize};

use crate::error::EpiError;

/// One intervention window: transmission is reduced by `effect` (a fraction
/// in `[0, 1]`) while `start <= t < end`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Intervention {
    pub start: f64,
    pub end: f64,
    pub effect: f64,
}

impl Intervention {
    pub fn new(start: f64, end: f64, effect: f64) -> Self {
        Self { start, end, effect }
    }

    fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end
    }
}

/// How the effects of overlapping windows combine.
///
/// Additive combination is deliberately not offered: summing reductions can
/// drive effective transmission negative.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlapPolicy {
    /// Residual transmissions multiply: two 50% reductions give 75% total.
    #[default]
    Multiplicative,
    /// Only the strongest active window applies.
    Strongest,
}

/// A validated, immutable set of intervention windows consulted at each
/// simulation step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InterventionSchedule {
    entries: Vec<Intervention>,
    policy: OverlapPolicy,
}

impl InterventionSchedule {
    pub fn new(mut entries: Vec<Intervention>) -> Result<Self, EpiError> {
        for e in &entries {
            if !e.start.is_finite() || !e.end.is_finite() || e.end <= e.start {
                return Err(EpiError::Configuration(format!(
                    "intervention window [{}, {}) is malformed",
                    e.start, e.end
                )));
            }
            if !(0.0..=1.0).contains(&e.effect) {
                return Err(EpiError::Configuration(format!(
                    "intervention effect {} is outside [0, 1]",
                    e.effect
                )));
            }
        }
        entries.sort_by(|a, b| a.start.total_cmp(&b.start));
        Ok(Self {
            entries,
            policy: OverlapPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: OverlapPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn entries(&self) -> &[Intervention] {
        &self.entries
    }

    pub fn policy(&self) -> OverlapPolicy {
        self.policy
    }

    /// Multiplicative factor applied to the transmission parameter at time
    /// `t`. Deterministic: identical schedule and time always yield the
    /// identical factor.
    pub fn factor_at(&self, t: f64) -> f64 {
        let active = self.entries.iter().filter(|e| e.contains(t));
        match self.policy {
            OverlapPolicy::Multiplicative => active.map(|e| 1.0 - e.effect).product(),
            OverlapPolicy::Strongest => active
                .map(|e| 1.0 - e.effect)
                .fold(1.0, |strongest: f64, f| strongest.min(f)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn factor_outside_all_windows_is_one() {
        let s = InterventionSchedule::new(vec![Intervention::new(10.0, 20.0, 0.5)]).unwrap();
        assert_relative_eq!(s.factor_at(5.0), 1.0);
        assert_relative_eq!(s.factor_at(20.0), 1.0); // end is exclusive
        assert_relative_eq!(s.factor_at(10.0), 0.5); // start is inclusive
    }

    #[test]
    fn overlapping_windows_compose_multiplicatively() {
        let s = InterventionSchedule::new(vec![
            Intervention::new(0.0, 30.0, 0.5),
            Intervention::new(10.0, 40.0, 0.5),
        ])
        .unwrap();
        // two 50% reductions -> 75% total, not 100%
        assert_relative_eq!(s.factor_at(15.0), 0.25);
    }

    #[test]
    fn strongest_policy_takes_single_best() {
        let s = InterventionSchedule::new(vec![
            Intervention::new(0.0, 30.0, 0.5),
            Intervention::new(10.0, 40.0, 0.3),
        ])
        .unwrap()
        .with_policy(OverlapPolicy::Strongest);
        assert_relative_eq!(s.factor_at(15.0), 0.5);
    }

    #[test]
    fn malformed_windows_rejected() {
        assert!(InterventionSchedule::new(vec![Intervention::new(5.0, 5.0, 0.2)]).is_err());
        assert!(InterventionSchedule::new(vec![Intervention::new(0.0, 5.0, 1.2)]).is_err());
    }
}
