//! Coupling matrices: inter-region mobility and age-band contact intensity.

use serde::{Deserialize, Serialize};

use crate::error::EpiError;

fn check_square(rows: &[Vec<f64>], what: &str) -> Result<(), EpiError> {
    if rows.is_empty() {
        return Err(EpiError::Configuration(format!("{what} matrix is empty")));
    }
    let n = rows.len();
    for (i, row) in rows.iter().enumerate() {
        if row.len() != n {
            return Err(EpiError::Configuration(format!(
                "{what} matrix is not square: row {i} has {} entries, expected {n}",
                row.len()
            )));
        }
        for (j, &v) in row.iter().enumerate() {
            if !v.is_finite() || v < 0.0 {
                return Err(EpiError::Configuration(format!(
                    "{what} matrix entry [{i}][{j}] is invalid: {v}"
                )));
            }
        }
    }
    Ok(())
}

/// Square non-negative matrix of inter-region movement rates.
/// `rates[i][j]` is the per-capita rate of movement from region i to j;
/// rows need not sum to one and the diagonal is conventionally zero.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MobilityMatrix {
    rates: Vec<Vec<f64>>,
}

impl MobilityMatrix {
    pub fn new(rates: Vec<Vec<f64>>) -> Result<Self, EpiError> {
        check_square(&rates, "mobility")?;
        Ok(Self { rates })
    }

    pub fn dim(&self) -> usize {
        self.rates.len()
    }

    #[inline]
    pub fn rate(&self, from: usize, to: usize) -> f64 {
        self.rates[from][to]
    }
}

/// Square matrix of relative contact intensity between age bands.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContactMatrix {
    intensity: Vec<Vec<f64>>,
}

impl ContactMatrix {
    pub fn new(intensity: Vec<Vec<f64>>) -> Result<Self, EpiError> {
        check_square(&intensity, "contact")?;
        Ok(Self { intensity })
    }

    pub fn dim(&self) -> usize {
        self.intensity.len()
    }

    #[inline]
    pub fn intensity(&self, of: usize, with: usize) -> f64 {
        self.intensity[of][with]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_matrix_accepted() {
        let m = MobilityMatrix::new(vec![vec![0.0, 0.1], vec![0.2, 0.0]]).unwrap();
        assert_eq!(m.dim(), 2);
        assert_eq!(m.rate(1, 0), 0.2);
    }

    #[test]
    fn ragged_matrix_rejected() {
        assert!(ContactMatrix::new(vec![vec![1.0, 2.0], vec![1.0]]).is_err());
    }

    #[test]
    fn negative_entry_rejected() {
        assert!(MobilityMatrix::new(vec![vec![0.0, -0.1], vec![0.2, 0.0]]).is_err());
    }

    #[test]
    fn empty_matrix_rejected() {
        assert!(ContactMatrix::new(vec![]).is_err());
    }
}
