//! Ranking candidate model variants against one observed series.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use epikit_core::{EpiError, ObservedSeries, SimulationEngine};

use crate::likelihood::ObservationModel;
use crate::optimization::{fit, OptimizerConfig};
use crate::problem::CalibrationProblem;
use crate::types::{CalibrationParameter, FitResult};

/// One model variant entered into a comparison.
#[derive(Clone)]
pub struct Candidate<E: SimulationEngine> {
    pub name: String,
    pub engine: E,
    pub parameters: Vec<CalibrationParameter>,
}

impl<E: SimulationEngine> Candidate<E> {
    pub fn new(
        name: impl Into<String>,
        engine: E,
        parameters: Vec<CalibrationParameter>,
    ) -> Self {
        Self {
            name: name.into(),
            engine,
            parameters,
        }
    }
}

/// One comparison-table row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub rank: usize,
    pub name: String,
    pub parameter_count: usize,
    pub log_likelihood: f64,
    pub aic: f64,
    pub bic: f64,
    pub converged: bool,
    pub fit: FitResult,
    /// (MAE, RMSE) when cross-validation was requested.
    pub cv_error: Option<(f64, f64)>,
}

/// Candidates ranked ascending by AIC (ties broken by parameter count).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComparisonTable {
    rows: Vec<ComparisonRow>,
}

impl ComparisonTable {
    pub fn rows(&self) -> &[ComparisonRow] {
        &self.rows
    }

    pub fn best(&self) -> &ComparisonRow {
        &self.rows[0]
    }
}

/// Cross-validation settings: `folds` expanding training windows, each
/// forecasting `horizon` days ahead.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CrossValidationConfig {
    pub folds: usize,
    pub horizon: usize,
    /// Folds with fewer training points than this are skipped, not fitted.
    pub min_train: usize,
    pub optimizer: OptimizerConfig,
}

impl CrossValidationConfig {
    pub fn new(folds: usize, horizon: usize, min_train: usize) -> Self {
        Self {
            folds,
            horizon,
            min_train,
            optimizer: OptimizerConfig::default(),
        }
    }

    fn validate(&self) -> Result<(), EpiError> {
        if self.folds == 0 || self.horizon == 0 {
            return Err(EpiError::configuration(
                "cross-validation needs >= 1 fold and a positive horizon",
            ));
        }
        Ok(())
    }
}

/// Score of one completed fold.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FoldScore {
    pub train_len: usize,
    pub mae: f64,
    pub rmse: f64,
}

/// Cross-validation report for one candidate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CvReport {
    pub folds: Vec<FoldScore>,
    pub skipped: usize,
    pub mean_mae: f64,
    pub mean_rmse: f64,
}

fn aic(k: usize, log_likelihood: f64) -> f64 {
    2.0 * k as f64 - 2.0 * log_likelihood
}

fn bic(k: usize, n: usize, log_likelihood: f64) -> f64 {
    k as f64 * (n as f64).ln() - 2.0 * log_likelihood
}

/// Fit every candidate against `series` and rank by AIC.
pub fn compare<E>(
    candidates: &[Candidate<E>],
    series: &ObservedSeries,
    compartment: &str,
    observation: ObservationModel,
    optimizer: &OptimizerConfig,
) -> Result<ComparisonTable, EpiError>
where
    E: SimulationEngine + Sync,
{
    if candidates.is_empty() {
        return Err(EpiError::configuration("no candidate models"));
    }

    let n = series.len();
    let mut rows: Vec<ComparisonRow> = candidates
        .par_iter()
        .map(|candidate| -> Result<ComparisonRow, EpiError> {
            let problem = CalibrationProblem::new(
                candidate.engine.clone(),
                series.clone(),
                compartment,
                candidate.parameters.clone(),
                observation,
            )?;
            let result = fit(&problem, optimizer)?;
            let k = candidate.parameters.len();
            Ok(ComparisonRow {
                rank: 0,
                name: candidate.name.clone(),
                parameter_count: k,
                log_likelihood: result.log_likelihood,
                aic: aic(k, result.log_likelihood),
                bic: bic(k, n, result.log_likelihood),
                converged: result.converged,
                fit: result,
                cv_error: None,
            })
        })
        .collect::<Result<_, _>>()?;

    rows.sort_by(|a, b| {
        a.aic
            .total_cmp(&b.aic)
            .then(a.parameter_count.cmp(&b.parameter_count))
    });
    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = i + 1;
    }
    Ok(ComparisonTable { rows })
}

/// Temporal cross-validation of one candidate: train on a leading window,
/// forecast `horizon` days, score against the held-out observations.
pub fn cross_validate<E: SimulationEngine>(
    candidate: &Candidate<E>,
    series: &ObservedSeries,
    compartment: &str,
    observation: ObservationModel,
    config: &CrossValidationConfig,
) -> Result<CvReport, EpiError> {
    config.validate()?;
    let usable = series.len().saturating_sub(config.horizon);
    if usable == 0 {
        return Err(EpiError::InsufficientData(format!(
            "series of {} points leaves nothing to train on with horizon {}",
            series.len(),
            config.horizon
        )));
    }

    let mut folds = Vec::new();
    let mut skipped = 0usize;
    for f in 1..=config.folds {
        let train_len = usable * f / config.folds;
        if train_len < config.min_train || train_len <= candidate.parameters.len() {
            log::debug!("skipping fold {f}: training window {train_len} is too short");
            skipped += 1;
            continue;
        }

        let train = series.head(train_len)?;
        let problem = CalibrationProblem::new(
            candidate.engine.clone(),
            train,
            compartment,
            candidate.parameters.clone(),
            observation,
        )?;
        let result = fit(&problem, &config.optimizer)?;

        // forecast past the training window and score the held-out days
        let total_days = (train_len - 1 + config.horizon) as u32;
        let predicted = problem.predict(&result.estimates, total_days)?;
        let held_out = series.window(train_len, config.horizon)?;

        let mut abs_sum = 0.0;
        let mut sq_sum = 0.0;
        for (offset, point) in held_out.iter().enumerate() {
            let forecast = predicted[train_len + offset];
            let error = forecast - point.cases;
            abs_sum += error.abs();
            sq_sum += error * error;
        }
        let h = config.horizon as f64;
        folds.push(FoldScore {
            train_len,
            mae: abs_sum / h,
            rmse: (sq_sum / h).sqrt(),
        });
    }

    if folds.is_empty() {
        return Err(EpiError::InsufficientData(format!(
            "all {} folds were below the minimum training size {}",
            config.folds, config.min_train
        )));
    }
    let mean_mae = folds.iter().map(|s| s.mae).sum::<f64>() / folds.len() as f64;
    let mean_rmse = folds.iter().map(|s| s.rmse).sum::<f64>() / folds.len() as f64;
    Ok(CvReport {
        folds,
        skipped,
        mean_mae,
        mean_rmse,
    })
}

/// [`compare`], then attach each candidate's cross-validation error.
pub fn compare_with_cv<E>(
    candidates: &[Candidate<E>],
    series: &ObservedSeries,
    compartment: &str,
    observation: ObservationModel,
    optimizer: &OptimizerConfig,
    cv: &CrossValidationConfig,
) -> Result<ComparisonTable, EpiError>
where
    E: SimulationEngine + Sync,
{
    let mut table = compare(candidates, series, compartment, observation, optimizer)?;
    for row in &mut table.rows {
        let candidate = candidates
            .iter()
            .find(|c| c.name == row.name)
            .expect("row names come from candidates");
        let report = cross_validate(candidate, series, compartment, observation, cv)?;
        row.cv_error = Some((report.mean_mae, report.mean_rmse));
    }
    Ok(table)
}
