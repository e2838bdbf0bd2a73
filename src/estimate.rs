//! Public entry points for unsupervised multiple-kernel learning.
//!
//! The pipeline is dyad library → coordinate descent → primal recovery. Every
//! failure surfaces as a [`UmklError`]; nothing here terminates the process or
//! retries, so callers decide whether to adjust parameters or give up.

use crate::dyad::DyadLibrary;
use crate::linalg::faer_ndarray::FaerLinalgError;
use crate::solver::descent::run_coordinate_descent;
use crate::solver::recovery::recover_primal;
use crate::types::{SolveResult, UmklOptions};
use ndarray::{Array2, ArrayView2};
use thiserror::Error;

/// Internal invariant breaches of the coordinate-descent solve.
#[derive(Debug, Error)]
pub enum NumericalFault {
    #[error("step size for dyad {dyad} in sweep {sweep} is imaginary")]
    ImaginaryStep { dyad: usize, sweep: usize },

    #[error("step size for dyad {dyad} in sweep {sweep} is negative ({alpha:.6e})")]
    NegativeStep { dyad: usize, sweep: usize, alpha: f64 },

    #[error("objective increased during sweep {sweep}: {previous:.12e} -> {current:.12e}")]
    ObjectiveIncreased {
        sweep: usize,
        previous: f64,
        current: f64,
    },

    #[error("converged objective {phi:.6e} cannot normalize the weights")]
    DegenerateObjective { phi: f64 },
}

/// Failures of the dense linear-algebra primitives.
#[derive(Debug, Error)]
pub enum LinearAlgebraFault {
    #[error("kernel {kernel} is not symmetric")]
    NotSymmetric { kernel: usize },

    #[error("eigendecomposition of kernel {kernel} failed: {source}")]
    Eigendecomposition {
        kernel: usize,
        source: FaerLinalgError,
    },

    #[error("kernel {kernel} has a materially negative leading eigenvalue {eigenvalue:.6e}")]
    NegativeEigenvalue { kernel: usize, eigenvalue: f64 },

    #[error("every selected eigenvalue is zero; the dyad library cannot be normalized")]
    DegenerateLibrary,

    #[error("optimal kernel is singular: {0}")]
    SingularOptimalKernel(String),
}

#[derive(Error)]
pub enum UmklError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Numerical invariant violated: {0}")]
    Numerical(#[from] NumericalFault),

    #[error("Linear algebra failure: {0}")]
    LinearAlgebra(#[from] LinearAlgebraFault),

    #[error(
        "Coordinate descent did not converge within {max_sweeps} sweeps. Last objective decrease was {last_decrease:.6e}."
    )]
    DidNotConverge {
        max_sweeps: usize,
        last_decrease: f64,
    },
}

// Ensure Debug prints the message by delegating to Display
impl core::fmt::Debug for UmklError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self)
    }
}

impl UmklError {
    /// True when adjusting the inputs (rho, p, kernels, options) can fix the failure.
    pub fn is_caller_correctable(&self) -> bool {
        matches!(self, UmklError::Configuration(_))
    }
}

/// Run the solver on a dyad matrix `k` (n×m) and return
/// `(weights, trace, objective_log)`.
pub fn solve(
    k: ArrayView2<'_, f64>,
    rho: f64,
    epsilon: f64,
    sigma: Option<f64>,
) -> Result<(Vec<f64>, f64, Vec<f64>), UmklError> {
    let mut options = UmklOptions::new(rho).with_epsilon(epsilon);
    options.sigma = sigma;
    let result = solve_with_options(k, &options)?;
    Ok((result.weights, result.trace, result.objective_log))
}

pub fn solve_with_options(
    k: ArrayView2<'_, f64>,
    options: &UmklOptions,
) -> Result<SolveResult, UmklError> {
    let outcome = run_coordinate_descent(k, options)?;
    let primal = recover_primal(&outcome, options.rho)?;
    log::info!(
        "UMKL finished: phi={:.6e}, residual weight={:.4}, tr(K^-1)={:.6e}",
        outcome.phi,
        primal.weights[0],
        primal.trace
    );
    Ok(SolveResult {
        weights: primal.weights,
        trace: primal.trace,
        objective_log: outcome.objective_log,
        phi: outcome.phi,
        sweeps: outcome.sweeps,
        active_columns: outcome.active_columns,
        optimal_kernel: primal.optimal_kernel,
    })
}

/// Build the dyad library from `kernels` and solve on it in one call.
pub fn fit_kernel_combination(
    kernels: &[Array2<f64>],
    dyads_per_kernel: usize,
    options: &UmklOptions,
) -> Result<(DyadLibrary, SolveResult), UmklError> {
    let library = DyadLibrary::build(kernels, dyads_per_kernel)?;
    let result = solve_with_options(library.matrix.view(), options)?;
    Ok((library, result))
}
