//! Dyad library construction.
//!
//! Each kernel contributes its `p` leading eigenvectors scaled by the square
//! root of their eigenvalues. The concatenated matrix is then divided by the
//! sum of all column norms, one global scalar, so column norms sum to one.

use crate::estimate::{LinearAlgebraFault, UmklError};
use crate::linalg::faer_ndarray::{is_symmetric, kernel_spectrum};
use crate::linalg::utils::{KahanSum, l2_norm};
use crate::types::SolveResult;
use ndarray::{Array1, Array2, s};
use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

const NEGATIVE_EIGENVALUE_REL_TOL: f64 = 1e-10;

/// Where a dyad column came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DyadSource {
    pub kernel: usize,
    /// 0 for the kernel's largest eigenvalue.
    pub eigen_rank: usize,
    pub eigenvalue: f64,
}

#[derive(Debug, Clone)]
pub struct DyadLibrary {
    /// n×(p·num_kernels), globally normalized.
    pub matrix: Array2<f64>,
    pub sources: Vec<DyadSource>,
    pub num_kernels: usize,
}

impl DyadLibrary {
    pub fn build(kernels: &[Array2<f64>], p: usize) -> Result<Self, UmklError> {
        let n = validate_kernels(kernels, p)?;

        let blocks = kernels
            .par_iter()
            .enumerate()
            .map(|(idx, kernel)| leading_scaled_eigenvectors(idx, kernel, p))
            .collect::<Result<Vec<_>, UmklError>>()?;

        let mut matrix = Array2::<f64>::zeros((n, p * kernels.len()));
        let mut sources = Vec::with_capacity(p * kernels.len());
        for (idx, (block, block_sources)) in blocks.into_iter().enumerate() {
            matrix
                .slice_mut(s![.., idx * p..(idx + 1) * p])
                .assign(&block);
            sources.extend(block_sources);
        }

        let mut total = KahanSum::default();
        for column in matrix.columns() {
            total.add(l2_norm(&column));
        }
        let total = total.sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(LinearAlgebraFault::DegenerateLibrary.into());
        }
        matrix.mapv_inplace(|v| v / total);

        log::debug!(
            "Built dyad library: {} kernels x {} dyads over {} items (norm sum {:.6e})",
            kernels.len(),
            p,
            n,
            total
        );

        Ok(Self {
            matrix,
            sources,
            num_kernels: kernels.len(),
        })
    }

    pub fn num_dyads(&self) -> usize {
        self.matrix.ncols()
    }

    /// Sum the dyad weights of `result` per source kernel.
    pub fn kernel_weights(&self, result: &SolveResult) -> Result<Array1<f64>, UmklError> {
        if result.weights.len() != result.active_columns.len() + 1 {
            return Err(UmklError::Configuration(format!(
                "result carries {} weights for {} active dyads",
                result.weights.len(),
                result.active_columns.len()
            )));
        }
        let mut per_kernel = Array1::<f64>::zeros(self.num_kernels);
        for (&column, &weight) in result.active_columns.iter().zip(result.dyad_weights()) {
            let source = self.sources.get(column).ok_or_else(|| {
                UmklError::Configuration(format!(
                    "active column {column} is outside a library of {} dyads",
                    self.sources.len()
                ))
            })?;
            per_kernel[source.kernel] += weight;
        }
        Ok(per_kernel)
    }
}

/// Scaled leading eigenvectors of every kernel, concatenated and globally normalized.
pub fn build_dyad_library(kernels: &[Array2<f64>], p: usize) -> Result<Array2<f64>, UmklError> {
    DyadLibrary::build(kernels, p).map(|library| library.matrix)
}

fn validate_kernels(kernels: &[Array2<f64>], p: usize) -> Result<usize, UmklError> {
    let first = kernels.first().ok_or_else(|| {
        UmklError::Configuration("at least one kernel matrix is required".to_string())
    })?;
    let n = first.nrows();
    if p == 0 {
        return Err(UmklError::Configuration(
            "dyads per kernel must be at least 1".to_string(),
        ));
    }
    for (idx, kernel) in kernels.iter().enumerate() {
        if kernel.dim() != (n, n) {
            return Err(UmklError::Configuration(format!(
                "kernel {idx} has shape {:?}, expected ({n}, {n})",
                kernel.dim()
            )));
        }
        if !kernel.iter().all(|v| v.is_finite()) {
            return Err(UmklError::Configuration(format!(
                "kernel {idx} contains non-finite entries"
            )));
        }
    }
    if p > n {
        return Err(UmklError::Configuration(format!(
            "requested {p} dyads per kernel but kernels are only {n}x{n}"
        )));
    }
    Ok(n)
}

fn leading_scaled_eigenvectors(
    kernel_idx: usize,
    kernel: &Array2<f64>,
    p: usize,
) -> Result<(Array2<f64>, Vec<DyadSource>), UmklError> {
    if !is_symmetric(kernel) {
        return Err(LinearAlgebraFault::NotSymmetric { kernel: kernel_idx }.into());
    }
    let (values, vectors) =
        kernel_spectrum(kernel).map_err(|source| LinearAlgebraFault::Eigendecomposition {
            kernel: kernel_idx,
            source,
        })?;

    let n = values.len();
    let scale = values.iter().fold(0.0f64, |acc, &v| acc.max(v.abs()));
    let tol = NEGATIVE_EIGENVALUE_REL_TOL * scale.max(1.0);

    // Ascending eigensolver order: the leading p pairs are the trailing block.
    let mut block = vectors.slice(s![.., n - p..]).to_owned();
    let mut sources = Vec::with_capacity(p);
    for (j, mut column) in block.columns_mut().into_iter().enumerate() {
        let eig_idx = n - p + j;
        let eigenvalue = values[eig_idx];
        if eigenvalue < -tol {
            return Err(LinearAlgebraFault::NegativeEigenvalue {
                kernel: kernel_idx,
                eigenvalue,
            }
            .into());
        }
        column *= eigenvalue.max(0.0).sqrt();
        sources.push(DyadSource {
            kernel: kernel_idx,
            eigen_rank: n - 1 - eig_idx,
            eigenvalue,
        });
    }
    Ok((block, sources))
}
