//! Gauss–Seidel coordinate descent over dyads.
//!
//! Minimizes `rho * sum_i ||U_i||_2 + ||I - K U||_F` one dyad row at a time.
//! The residual `Z = I - sum_i outer(K_i, U_i)` is carried explicitly: before a
//! coordinate step the dyad's own contribution is added back, the closed-form
//! step is taken against that residual, and the new contribution is removed
//! again. Coordinates must run in order; each step reads the residual left by
//! the previous one.

use crate::estimate::{NumericalFault, UmklError};
use crate::linalg::utils::{KahanSum, l2_norm};
use crate::types::UmklOptions;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};

/// Columns of the dyad matrix that survive the `rho` feasibility filter.
#[derive(Debug, Clone)]
pub struct ActiveDyads {
    /// n×m, unaugmented.
    pub matrix: Array2<f64>,
    /// Index of each surviving column in the input matrix.
    pub columns: Vec<usize>,
    pub norms: Vec<f64>,
}

/// Drop every column with norm below `rho`.
pub fn select_active_dyads(k: ArrayView2<'_, f64>, rho: f64) -> Result<ActiveDyads, UmklError> {
    let mut columns = Vec::new();
    let mut norms = Vec::new();
    for (idx, column) in k.columns().into_iter().enumerate() {
        let norm = l2_norm(&column);
        if norm >= rho {
            columns.push(idx);
            norms.push(norm);
        }
    }
    if columns.is_empty() {
        return Err(UmklError::Configuration(format!(
            "rho too large: {rho} exceeds the norm of all {} dyads",
            k.ncols()
        )));
    }
    if columns.len() < k.ncols() {
        log::warn!(
            "Dropped {} of {} dyads with norm below rho={:.3e}",
            k.ncols() - columns.len(),
            k.ncols(),
            rho
        );
    }
    let matrix = k.select(Axis(1), &columns);
    Ok(ActiveDyads {
        matrix,
        columns,
        norms,
    })
}

/// Stack `sigma * I_m` under the n×m dyad matrix.
pub fn augment_with_ridge(k: &Array2<f64>, sigma: f64) -> Array2<f64> {
    let (n, m) = k.dim();
    let mut augmented = Array2::<f64>::zeros((n + m, m));
    augmented.slice_mut(s![..n, ..]).assign(k);
    for i in 0..m {
        augmented[[n + i, i]] = sigma;
    }
    augmented
}

/// Closed-form KKT step for one dyad against the residual that excludes it.
///
/// `z_norm` is `||Z||_F`, `ktz_norm` is `||K_i^T Z||`, `k_norm` is `||K_i||`.
/// The result may be NaN or negative; callers decide admissibility.
pub fn closed_form_step(z_norm: f64, ktz_norm: f64, k_norm: f64, rho: f64) -> f64 {
    let alpha_0 = 1.0 / (k_norm * k_norm);
    let c = k_norm;
    let d = alpha_0 * ((z_norm * z_norm) / (ktz_norm * ktz_norm) - alpha_0);
    alpha_0 - ((rho * rho * d) / (c * c - rho * rho)).sqrt()
}

/// `Z += scale * outer(k, u)`.
fn add_outer(z: &mut Array2<f64>, k: ArrayView1<'_, f64>, u: ArrayView1<'_, f64>, scale: f64) {
    for (mut row, &ki) in z.rows_mut().into_iter().zip(k.iter()) {
        if ki != 0.0 {
            row.scaled_add(scale * ki, &u);
        }
    }
}

/// `||Z - alpha * outer(k, ktz)||_F`, i.e. `||(I - alpha k k^T) Z||_F` without forming the n×n operator.
fn shrunk_residual_norm(
    z: &Array2<f64>,
    k: ArrayView1<'_, f64>,
    ktz: &Array1<f64>,
    alpha: f64,
) -> f64 {
    let mut acc = KahanSum::default();
    for (row, &ki) in z.rows().into_iter().zip(k.iter()) {
        let coeff = alpha * ki;
        for (&zij, &gj) in row.iter().zip(ktz.iter()) {
            let r = zij - coeff * gj;
            acc.add(r * r);
        }
    }
    acc.sum().sqrt()
}

/// Mutable solve state owned by exactly one run.
#[derive(Debug, Clone)]
pub struct DescentState {
    /// m×n coefficients, one row per active dyad.
    pub u: Array2<f64>,
    /// Residual, n×n or (n+m)×n when augmented.
    pub z: Array2<f64>,
    /// `rho * sum_i ||U_i||`, maintained incrementally.
    penalty: f64,
}

impl DescentState {
    /// Zero coefficients and the (possibly augmented) identity residual for `design` with `n` items.
    pub fn new(design: &Array2<f64>, n: usize, rho: f64) -> Self {
        let rows = design.nrows();
        let m = design.ncols();
        let u = Array2::<f64>::zeros((m, n));
        let mut z = Array2::<f64>::zeros((rows, n));
        for i in 0..n {
            z[[i, i]] = 1.0;
        }
        for (k_i, u_i) in design.columns().into_iter().zip(u.rows()) {
            add_outer(&mut z, k_i, u_i, -1.0);
        }
        let penalty = rho * u.rows().into_iter().map(|row| l2_norm(&row)).sum::<f64>();
        Self { u, z, penalty }
    }

    pub fn objective(&self) -> f64 {
        self.penalty + l2_norm(&self.z)
    }

    /// One coordinate step for dyad `dyad`; returns the accepted step size.
    ///
    /// When `K_i^T Z` vanishes the step is zero outright instead of going
    /// through the closed form, which would divide by zero there and fail
    /// with an imaginary or negative step. A zero row is the exact minimizer
    /// in that case.
    pub fn update_coordinate(
        &mut self,
        k_i: ArrayView1<'_, f64>,
        k_norm: f64,
        rho: f64,
        dyad: usize,
        sweep: usize,
    ) -> Result<f64, UmklError> {
        let old_row = self.u.row(dyad).to_owned();
        add_outer(&mut self.z, k_i, old_row.view(), 1.0);

        let z_norm = l2_norm(&self.z);
        let ktz = self.z.t().dot(&k_i);
        let ktz_norm = l2_norm(&ktz);

        let alpha = if ktz_norm == 0.0 {
            0.0
        } else {
            let candidate = closed_form_step(z_norm, ktz_norm, k_norm, rho);
            let f_of_alpha = rho * candidate.abs() * ktz_norm
                + shrunk_residual_norm(&self.z, k_i, &ktz, candidate);
            if z_norm < f_of_alpha { 0.0 } else { candidate }
        };

        if alpha.is_nan() {
            return Err(NumericalFault::ImaginaryStep { dyad, sweep }.into());
        }
        if alpha < 0.0 {
            return Err(NumericalFault::NegativeStep { dyad, sweep, alpha }.into());
        }

        let new_row = ktz * alpha;
        self.penalty = self.penalty - rho * l2_norm(&old_row) + rho * l2_norm(&new_row);
        self.u.row_mut(dyad).assign(&new_row);
        add_outer(&mut self.z, k_i, new_row.view(), -1.0);
        Ok(alpha)
    }
}

/// Converged solver output, before primal recovery.
#[derive(Debug, Clone)]
pub struct DescentOutcome {
    pub u: Array2<f64>,
    /// Final residual, including the augmentation block when `sigma` was set.
    pub z: Array2<f64>,
    /// Active dyads without augmentation rows.
    pub k: Array2<f64>,
    pub active_columns: Vec<usize>,
    pub objective_log: Vec<f64>,
    pub phi: f64,
    pub sweeps: usize,
}

pub fn run_coordinate_descent(
    k: ArrayView2<'_, f64>,
    options: &UmklOptions,
) -> Result<DescentOutcome, UmklError> {
    options.validate()?;
    let (n, total_dyads) = k.dim();
    if n == 0 || total_dyads == 0 {
        return Err(UmklError::Configuration(format!(
            "dyad matrix must be non-empty, got {n}x{total_dyads}"
        )));
    }
    if !k.iter().all(|v| v.is_finite()) {
        return Err(UmklError::Configuration(
            "dyad matrix contains non-finite entries".to_string(),
        ));
    }

    let rho = options.rho;
    let active = select_active_dyads(k, rho)?;
    let m = active.columns.len();
    log::info!(
        "Performing UMKL for {n} x {n} kernels with {m} active dyads (rho={rho:.3e}, sigma={:?})",
        options.sigma
    );

    let design = match options.sigma {
        Some(sigma) => augment_with_ridge(&active.matrix, sigma),
        None => active.matrix.clone(),
    };

    let mut state = DescentState::new(&design, n, rho);
    let mut prev_obj = state.objective();
    let mut objective_log = vec![prev_obj];
    let mut sweeps = 0usize;

    loop {
        sweeps += 1;
        for (i, k_i) in design.columns().into_iter().enumerate() {
            state.update_coordinate(k_i, active.norms[i], rho, i, sweeps)?;
            objective_log.push(state.objective());
        }
        let new_obj = state.objective();
        let diff = prev_obj - new_obj;
        log::debug!("sweep {sweeps}: objective={new_obj:.12e}, decrease={diff:.3e}");

        let slack = options.objective_increase_tolerance * prev_obj.abs().max(1.0);
        if diff < -slack {
            return Err(NumericalFault::ObjectiveIncreased {
                sweep: sweeps,
                previous: prev_obj,
                current: new_obj,
            }
            .into());
        }
        prev_obj = new_obj;

        if diff <= options.epsilon {
            break;
        }
        if sweeps >= options.max_sweeps {
            return Err(UmklError::DidNotConverge {
                max_sweeps: options.max_sweeps,
                last_decrease: diff,
            });
        }
    }

    log::info!("UMKL converged after {sweeps} sweeps, optimal value {prev_obj:.12e}");

    Ok(DescentOutcome {
        u: state.u,
        z: state.z,
        k: active.matrix,
        active_columns: active.columns,
        objective_log,
        phi: prev_obj,
        sweeps,
    })
}
