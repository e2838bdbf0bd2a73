//! Dense kernels handed to faer: kernel spectra, weighted dyad Gram matrices
//! and the inverse trace of the combined kernel. Arrays cross the boundary by
//! copy, so callers never see faer types.

use faer::linalg::matmul::matmul;
use faer::linalg::solvers::{self, Ldlt, Llt, Solve};
use faer::{Accum, Mat, MatRef, Par, Side, get_global_parallelism};
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix2};
use thiserror::Error;

const SYMMETRY_REL_TOL: f64 = 1e-12;
const SYMMETRY_ABS_TOL: f64 = 1e-12;

/// Below this many multiply-adds the ndarray product wins over a faer GEMM.
const GEMM_MIN_WORK: usize = 64 * 64 * 32;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("Self-adjoint eigendecomposition failed: {0:?}")]
    SelfAdjointEigen(solvers::EvdError),
    #[error("LDLT factorization failed: {0:?}")]
    Ldlt(solvers::LdltError),
    #[error("inverse has non-finite entries")]
    NonFiniteInverse,
}

fn to_faer<S: Data<Elem = f64>>(a: &ArrayBase<S, Ix2>) -> Mat<f64> {
    Mat::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

fn from_faer(m: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Eigenpairs of a symmetric kernel, eigenvalues ascending, eigenvectors as columns.
pub fn kernel_spectrum(
    kernel: &Array2<f64>,
) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError> {
    let a = to_faer(kernel);
    let eigen = a
        .as_ref()
        .self_adjoint_eigen(Side::Lower)
        .map_err(FaerLinalgError::SelfAdjointEigen)?;
    let spectrum = eigen.S().column_vector().as_mat();
    let values = Array1::from_shape_fn(spectrum.nrows(), |i| spectrum[(i, 0)]);
    Ok((values, from_faer(eigen.U())))
}

/// `sum_i scales[i] * outer(K_i, K_i)` over the columns of the n×m `dyads`, symmetrized.
pub fn weighted_gram(dyads: &Array2<f64>, scales: &Array1<f64>) -> Array2<f64> {
    let (n, m) = dyads.dim();
    debug_assert_eq!(m, scales.len(), "one scale per dyad");

    let mut gram = if n.saturating_mul(n).saturating_mul(m) < GEMM_MIN_WORK {
        let scaled = dyads * &scales.view().insert_axis(Axis(0));
        scaled.dot(&dyads.t())
    } else {
        let lhs = Mat::from_fn(n, m, |i, j| dyads[[i, j]] * scales[j]);
        let rhs = to_faer(dyads);
        let mut out = Mat::<f64>::zeros(n, n);
        let par = if n < 128 {
            Par::Seq
        } else {
            get_global_parallelism()
        };
        matmul(
            out.as_mut(),
            Accum::Replace,
            lhs.as_ref(),
            rhs.as_ref().transpose(),
            1.0,
            par,
        );
        from_faer(out.as_ref())
    };

    // GEMM roundoff can leave tiny asymmetry.
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (gram[[i, j]] + gram[[j, i]]);
            gram[[i, j]] = avg;
            gram[[j, i]] = avg;
        }
    }
    gram
}

/// `tr(A^-1)` for symmetric `A`. LLT first, LDLT when `A` is not positive definite.
pub fn symmetric_inverse_trace(matrix: &Array2<f64>) -> Result<f64, FaerLinalgError> {
    let n = matrix.nrows();
    let a = to_faer(matrix);
    let identity = Mat::<f64>::identity(n, n);
    let inverse = match Llt::new(a.as_ref(), Side::Lower) {
        Ok(llt) => llt.solve(identity.as_ref()),
        Err(_) => {
            log::debug!("combined kernel is not positive definite; falling back to LDLT");
            Ldlt::new(a.as_ref(), Side::Lower)
                .map_err(FaerLinalgError::Ldlt)?
                .solve(identity.as_ref())
        }
    };

    let mut trace = 0.0;
    for j in 0..n {
        for i in 0..n {
            if !inverse[(i, j)].is_finite() {
                return Err(FaerLinalgError::NonFiniteInverse);
            }
        }
        trace += inverse[(j, j)];
    }
    Ok(trace)
}

/// Symmetry test scaled by the largest absolute entry.
pub fn is_symmetric<S: Data<Elem = f64>>(matrix: &ArrayBase<S, Ix2>) -> bool {
    let (nrows, ncols) = matrix.dim();
    if nrows != ncols {
        return false;
    }
    let scale = matrix.iter().fold(0.0f64, |acc, &v| acc.max(v.abs()));
    let tol = SYMMETRY_ABS_TOL + SYMMETRY_REL_TOL * scale.max(1.0);
    for i in 0..nrows {
        for j in i + 1..ncols {
            if (matrix[[i, j]] - matrix[[j, i]]).abs() > tol {
                return false;
            }
        }
    }
    true
}
