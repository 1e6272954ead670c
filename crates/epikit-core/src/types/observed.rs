//! Observed incidence series supplied by external collaborators.

use serde::{Deserialize, Serialize};

use crate::error::EpiError;

/// One observation: day index and reported case count.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ObservedPoint {
    pub day: u32,
    pub cases: f64,
}

impl ObservedPoint {
    pub fn new(day: u32, cases: f64) -> Self {
        Self { day, cases }
    }
}

/// A validated observed time series.
///
/// Days must be strictly increasing and contiguous: a gap means the calling
/// collaborator failed to interpolate or flag missing dates, and is rejected
/// here rather than silently bridged.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObservedSeries {
    points: Vec<ObservedPoint>,
    population: f64,
}

impl ObservedSeries {
    pub fn new(points: Vec<ObservedPoint>, population: f64) -> Result<Self, EpiError> {
        if points.is_empty() {
            return Err(EpiError::insufficient_data("observed series is empty"));
        }
        if !population.is_finite() || population <= 0.0 {
            return Err(EpiError::Configuration(format!(
                "population must be positive, got {population}"
            )));
        }
        for pair in points.windows(2) {
            if pair[1].day != pair[0].day + 1 {
                return Err(EpiError::Configuration(format!(
                    "observed days must be contiguous and increasing: {} followed by {}",
                    pair[0].day, pair[1].day
                )));
            }
        }
        for p in &points {
            if !p.cases.is_finite() || p.cases < 0.0 {
                return Err(EpiError::Configuration(format!(
                    "case count on day {} is invalid: {}",
                    p.day, p.cases
                )));
            }
        }
        Ok(Self { points, population })
    }

    /// Convenience constructor from raw counts starting on day 0.
    pub fn from_counts(counts: &[f64], population: f64) -> Result<Self, EpiError> {
        let points = counts
            .iter()
            .enumerate()
            .map(|(day, &cases)| ObservedPoint::new(day as u32, cases))
            .collect();
        Self::new(points, population)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[ObservedPoint] {
        &self.points
    }

    pub fn population(&self) -> f64 {
        self.population
    }

    pub fn first_day(&self) -> u32 {
        self.points[0].day
    }

    pub fn last_day(&self) -> u32 {
        self.points[self.points.len() - 1].day
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.cases).collect()
    }

    /// Leading sub-series of the first `len` points (for cross-validation
    /// training windows).
    pub fn head(&self, len: usize) -> Result<ObservedSeries, EpiError> {
        if len == 0 || len > self.points.len() {
            return Err(EpiError::insufficient_data(format!(
                "cannot take {len} leading points from a series of {}",
                self.points.len()
            )));
        }
        Ok(ObservedSeries {
            points: self.points[..len].to_vec(),
            population: self.population,
        })
    }

    /// The `horizon` points following the first `len` (held-out forecast
    /// targets).
    pub fn window(&self, start: usize, horizon: usize) -> Result<&[ObservedPoint], EpiError> {
        let end = start + horizon;
        if end > self.points.len() {
            return Err(EpiError::insufficient_data(format!(
                "window [{start}, {end}) exceeds series length {}",
                self.points.len()
            )));
        }
        Ok(&self.points[start..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_series_accepted() {
        let s = ObservedSeries::from_counts(&[1.0, 3.0, 7.0], 1000.0).unwrap();
        assert_eq!(s.len(), 3);
        assert_eq!(s.last_day(), 2);
    }

    #[test]
    fn gapped_days_rejected() {
        let points = vec![ObservedPoint::new(0, 1.0), ObservedPoint::new(2, 3.0)];
        assert!(matches!(
            ObservedSeries::new(points, 1000.0),
            Err(EpiError::Configuration(_))
        ));
    }

    #[test]
    fn decreasing_days_rejected() {
        let points = vec![ObservedPoint::new(5, 1.0), ObservedPoint::new(4, 3.0)];
        assert!(ObservedSeries::new(points, 1000.0).is_err());
    }

    #[test]
    fn negative_cases_rejected() {
        assert!(ObservedSeries::from_counts(&[1.0, -2.0], 1000.0).is_err());
    }

    #[test]
    fn head_and_window() {
        let s = ObservedSeries::from_counts(&[1.0, 2.0, 3.0, 4.0, 5.0], 1000.0).unwrap();
        let head = s.head(3).unwrap();
        assert_eq!(head.values(), vec![1.0, 2.0, 3.0]);
        let held_out = s.window(3, 2).unwrap();
        assert_eq!(held_out[0].cases, 4.0);
        assert!(s.window(3, 3).is_err());
    }
}
