use crate::estimate::{LinearAlgebraFault, NumericalFault, UmklError};
use crate::linalg::faer_ndarray::{symmetric_inverse_trace, weighted_gram};
use crate::linalg::utils::l2_norm;
use crate::solver::descent::DescentOutcome;
use ndarray::{Array1, Array2};

/// Combination weights and the A-optimality diagnostic.
#[derive(Debug, Clone)]
pub struct PrimalSolution {
    pub weights: Vec<f64>,
    pub optimal_kernel: Array2<f64>,
    pub trace: f64,
}

pub fn recover_primal(outcome: &DescentOutcome, rho: f64) -> Result<PrimalSolution, UmklError> {
    let phi = outcome.phi;
    if !(phi.is_finite() && phi > 0.0) {
        return Err(NumericalFault::DegenerateObjective { phi }.into());
    }

    let mut weights = Vec::with_capacity(outcome.u.nrows() + 1);
    weights.push(l2_norm(&outcome.z) / phi);
    weights.extend(
        outcome
            .u
            .rows()
            .into_iter()
            .map(|row| rho * l2_norm(&row) / phi),
    );

    let optimal_kernel = optimal_kernel(&outcome.k, &weights, rho)?;
    let trace = inverse_trace(&optimal_kernel)?;
    Ok(PrimalSolution {
        weights,
        optimal_kernel,
        trace,
    })
}

/// `w_0 I + sum_i rho^-2 w_{i+1} outer(K_i, K_i)`.
///
/// `weights` must hold the residual weight followed by one weight per column of `k`.
pub fn optimal_kernel(
    k: &Array2<f64>,
    weights: &[f64],
    rho: f64,
) -> Result<Array2<f64>, UmklError> {
    let Some((&residual, dyad_weights)) = weights.split_first() else {
        return Err(UmklError::Configuration(
            "optimal kernel needs at least the residual weight".to_string(),
        ));
    };
    if dyad_weights.len() != k.ncols() {
        return Err(UmklError::Configuration(format!(
            "{} dyad weights for {} dyads",
            dyad_weights.len(),
            k.ncols()
        )));
    }

    let inv_rho_sq = 1.0 / (rho * rho);
    let scales = Array1::from_iter(dyad_weights.iter().map(|w| inv_rho_sq * w));
    let mut kernel = weighted_gram(k, &scales);
    for i in 0..k.nrows() {
        kernel[[i, i]] += residual;
    }
    Ok(kernel)
}

/// `tr(A^-1)` for a symmetric `A`.
pub fn inverse_trace(matrix: &Array2<f64>) -> Result<f64, UmklError> {
    symmetric_inverse_trace(matrix)
        .map_err(|e| UmklError::from(LinearAlgebraFault::SingularOptimalKernel(e.to_string())))
}
