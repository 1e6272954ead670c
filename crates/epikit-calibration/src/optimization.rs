//! Point estimation: bounded derivative-free maximization of the
//! log-likelihood.

use argmin::core::observers::ObserverMode;
use argmin::core::{Executor, TerminationReason, TerminationStatus};
use argmin::solver::neldermead::NelderMead;
use argmin::solver::particleswarm::ParticleSwarm;
use argmin_observer_slog::SlogLogger;
use serde::{Deserialize, Serialize};

use epikit_core::{EpiError, SimulationEngine};

use crate::problem::CalibrationProblem;
use crate::types::FitResult;

/// Nelder-Mead simplex settings. The most reliable default for the 2-6
/// parameter fits typical of compartmental models.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct NelderMeadConfig {
    pub max_iterations: u64,
    /// Sample standard deviation of simplex costs at which the solver
    /// declares convergence.
    pub sd_tolerance: f64,
    /// Attach a terminal observer logging every iteration.
    pub verbose: bool,
}

impl Default for NelderMeadConfig {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            sd_tolerance: 1e-8,
            verbose: false,
        }
    }
}

impl NelderMeadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_sd_tolerance(mut self, sd_tolerance: f64) -> Self {
        self.sd_tolerance = sd_tolerance;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Particle swarm settings: global search inside the parameter bounds, for
/// likelihoods suspected of multiple local optima.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ParticleSwarmConfig {
    pub num_particles: usize,
    pub max_iterations: u64,
    pub verbose: bool,
}

impl Default for ParticleSwarmConfig {
    fn default() -> Self {
        Self {
            num_particles: 40,
            max_iterations: 500,
            verbose: false,
        }
    }
}

impl ParticleSwarmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_num_particles(mut self, num_particles: usize) -> Self {
        self.num_particles = num_particles;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Optimizer selection.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum OptimizerConfig {
    NelderMead(NelderMeadConfig),
    ParticleSwarm(ParticleSwarmConfig),
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig::NelderMead(NelderMeadConfig::default())
    }
}

fn converged(status: &TerminationStatus) -> bool {
    matches!(
        status,
        TerminationStatus::Terminated(
            TerminationReason::SolverConverged | TerminationReason::TargetCostReached
        )
    )
}

/// Maximize the problem's log-likelihood.
///
/// Always returns a [`FitResult`]; a run that stopped on its iteration
/// budget comes back with `converged: false` rather than an error.
pub fn fit<E: SimulationEngine>(
    problem: &CalibrationProblem<E>,
    config: &OptimizerConfig,
) -> Result<FitResult, EpiError> {
    match config {
        OptimizerConfig::NelderMead(nm) => fit_nelder_mead(problem, nm),
        OptimizerConfig::ParticleSwarm(ps) => fit_particle_swarm(problem, ps),
    }
}

/// Initial simplex: the starting point plus one vertex per parameter,
/// nudged along that axis while staying inside the bounds.
fn initial_simplex<E: SimulationEngine>(problem: &CalibrationProblem<E>) -> Vec<Vec<f64>> {
    let initial = problem.initial_parameters();
    let bounds = problem.bounds();
    let mut vertices = vec![initial.clone()];
    for i in 0..initial.len() {
        let (low, high) = bounds[i];
        let step = 0.05 * (high - low);
        let mut vertex = initial.clone();
        vertex[i] = if vertex[i] + step <= high {
            vertex[i] + step
        } else {
            vertex[i] - step
        };
        vertices.push(vertex);
    }
    vertices
}

fn fit_nelder_mead<E: SimulationEngine>(
    problem: &CalibrationProblem<E>,
    config: &NelderMeadConfig,
) -> Result<FitResult, EpiError> {
    let parameter_names = problem.parameter_names();
    let initial = problem.initial_parameters();

    let solver: NelderMead<Vec<f64>, f64> = NelderMead::new(initial_simplex(problem))
        .with_sd_tolerance(config.sd_tolerance)
        .map_err(|e| EpiError::Configuration(format!("sd_tolerance: {e}")))?;

    let executor = Executor::new(problem.clone(), solver)
        .configure(|state| state.max_iters(config.max_iterations));
    let result = if config.verbose {
        log::debug!(
            "Nelder-Mead over {parameter_names:?}, start {initial:?}, \
             max {} iterations",
            config.max_iterations
        );
        executor.add_observer(SlogLogger::term(), ObserverMode::Always)
    } else {
        executor
    }
    .run()
    .map_err(|e| EpiError::Configuration(format!("optimizer: {e}")))?;

    let state = result.state();
    let estimates = state.best_param.clone().unwrap_or(initial);
    let log_likelihood = -state.best_cost;
    Ok(FitResult {
        r0: problem.r0_for(&estimates),
        parameter_names,
        estimates,
        log_likelihood,
        iterations: state.iter,
        converged: converged(&state.termination_status) && log_likelihood.is_finite(),
        termination_reason: format!("{:?}", state.termination_status),
    })
}

fn fit_particle_swarm<E: SimulationEngine>(
    problem: &CalibrationProblem<E>,
    config: &ParticleSwarmConfig,
) -> Result<FitResult, EpiError> {
    let parameter_names = problem.parameter_names();
    let initial = problem.initial_parameters();
    let bounds = problem.bounds();
    let lower: Vec<f64> = bounds.iter().map(|(low, _)| *low).collect();
    let upper: Vec<f64> = bounds.iter().map(|(_, high)| *high).collect();

    let solver = ParticleSwarm::new((lower, upper), config.num_particles);
    let executor = Executor::new(problem.clone(), solver)
        .configure(|state| state.max_iters(config.max_iterations));
    let result = if config.verbose {
        log::debug!(
            "particle swarm over {parameter_names:?}, {} particles, \
             max {} iterations",
            config.num_particles,
            config.max_iterations
        );
        executor.add_observer(SlogLogger::term(), ObserverMode::Always)
    } else {
        executor
    }
    .run()
    .map_err(|e| EpiError::Configuration(format!("optimizer: {e}")))?;

    let state = result.state();
    let (estimates, best_cost) = match &state.best_individual {
        Some(particle) => (particle.position.clone(), particle.cost),
        None => (initial, f64::INFINITY),
    };
    let log_likelihood = -best_cost;
    Ok(FitResult {
        r0: problem.r0_for(&estimates),
        parameter_names,
        estimates,
        log_likelihood,
        iterations: state.iter,
        converged: converged(&state.termination_status) && log_likelihood.is_finite(),
        termination_reason: format!("{:?}", state.termination_status),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood::ObservationModel;
    use crate::types::CalibrationParameter;
    use epikit_core::{ModelDef, ObservedSeries};
    use epikit_ode::OdeEngine;

    fn noise_free_sir_problem() -> CalibrationProblem<OdeEngine> {
        use epikit_core::SimulationEngine;
        let truth = ModelDef::sir(1000.0, 1.0, 0.3, 0.1);
        let trajectory = OdeEngine::new(&truth).unwrap().run(100).unwrap();
        let observed =
            ObservedSeries::from_counts(&trajectory.series("I").unwrap(), 1000.0).unwrap();
        CalibrationProblem::new(
            OdeEngine::new(&truth).unwrap(),
            observed,
            "I",
            vec![
                CalibrationParameter::new("beta", 0.05, 1.0),
                CalibrationParameter::new("gamma", 0.01, 0.5),
            ],
            ObservationModel::Poisson,
        )
        .unwrap()
    }

    #[test]
    fn recovers_known_rates_within_one_percent() {
        let problem = noise_free_sir_problem();
        let fit = fit_nelder_mead(&problem, &NelderMeadConfig::default()).unwrap();

        let beta = fit.estimate("beta").unwrap();
        let gamma = fit.estimate("gamma").unwrap();
        assert!(
            (beta - 0.3).abs() / 0.3 < 0.01,
            "beta {beta} off by more than 1%"
        );
        assert!(
            (gamma - 0.1).abs() / 0.1 < 0.01,
            "gamma {gamma} off by more than 1%"
        );
        let r0 = fit.r0.unwrap();
        assert!((r0 - 3.0).abs() < 0.05, "R0 {r0} should be 3.0");
        assert!(fit.converged);
    }

    #[test]
    fn iteration_starved_fit_is_flagged_not_erred() {
        let problem = noise_free_sir_problem();
        let config = NelderMeadConfig::new()
            .with_max_iterations(2)
            .with_sd_tolerance(1e-15);
        let fit = fit_nelder_mead(&problem, &config).unwrap();
        assert!(!fit.converged);
        assert_eq!(fit.parameter_names, vec!["beta", "gamma"]);
    }

    #[test]
    fn fit_is_deterministic_for_nelder_mead() {
        let problem = noise_free_sir_problem();
        let a = fit(&problem, &OptimizerConfig::default()).unwrap();
        let b = fit(&problem, &OptimizerConfig::default()).unwrap();
        assert_eq!(a.estimates, b.estimates);
        assert_eq!(a.log_likelihood, b.log_likelihood);
    }

    #[test]
    fn simplex_vertices_respect_bounds() {
        let problem = noise_free_sir_problem();
        for vertex in initial_simplex(&problem) {
            for (value, param) in vertex.iter().zip(problem.parameters()) {
                assert!(param.contains(*value));
            }
        }
    }
}
