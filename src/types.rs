use crate::estimate::UmklError;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Number of leading eigenpairs taken from each kernel when none is specified.
pub const DEFAULT_DYADS_PER_KERNEL: usize = 10;

pub fn default_epsilon() -> f64 {
    1e-3
}

pub fn default_max_sweeps() -> usize {
    10_000
}

/// Strict by default: any per-sweep increase of the objective is fatal.
pub fn default_objective_increase_tolerance() -> f64 {
    0.0
}

/// Ridge scale relative to the group penalty, as used by the reference driver.
pub fn default_ridge_for(rho: f64) -> f64 {
    rho / 20.0
}

/// Solver configuration for one coordinate-descent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UmklOptions {
    /// Group-sparsity weight. Dyads with column norm below `rho` are dropped.
    pub rho: f64,
    /// A sweep whose objective decrease is at or below this value ends the solve.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Optional ridge augmentation of the dyad matrix.
    #[serde(default)]
    pub sigma: Option<f64>,
    #[serde(default = "default_max_sweeps")]
    pub max_sweeps: usize,
    /// Relative slack for the per-sweep non-increase check. Zero means strict.
    #[serde(default = "default_objective_increase_tolerance")]
    pub objective_increase_tolerance: f64,
}

impl UmklOptions {
    pub fn new(rho: f64) -> Self {
        Self {
            rho,
            epsilon: default_epsilon(),
            sigma: None,
            max_sweeps: default_max_sweeps(),
            objective_increase_tolerance: default_objective_increase_tolerance(),
        }
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.sigma = Some(sigma);
        self
    }

    pub fn with_max_sweeps(mut self, max_sweeps: usize) -> Self {
        self.max_sweeps = max_sweeps;
        self
    }

    /// Tolerate per-sweep increases up to `tolerance * max(1, |objective|)`.
    pub fn with_objective_increase_tolerance(mut self, tolerance: f64) -> Self {
        self.objective_increase_tolerance = tolerance;
        self
    }

    pub fn validate(&self) -> Result<(), UmklError> {
        if !(self.rho.is_finite() && self.rho > 0.0) {
            return Err(UmklError::Configuration(format!(
                "rho must be finite and positive, got {}",
                self.rho
            )));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(UmklError::Configuration(format!(
                "epsilon must be finite and positive, got {}",
                self.epsilon
            )));
        }
        if let Some(sigma) = self.sigma
            && !(sigma.is_finite() && sigma > 0.0)
        {
            return Err(UmklError::Configuration(format!(
                "sigma must be finite and positive when supplied, got {sigma}"
            )));
        }
        if self.max_sweeps == 0 {
            return Err(UmklError::Configuration(
                "max_sweeps must be at least 1".to_string(),
            ));
        }
        if !(self.objective_increase_tolerance.is_finite()
            && self.objective_increase_tolerance >= 0.0)
        {
            return Err(UmklError::Configuration(format!(
                "objective_increase_tolerance must be finite and non-negative, got {}",
                self.objective_increase_tolerance
            )));
        }
        Ok(())
    }
}

/// Recovered primal solution of one solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveResult {
    /// `weights[0]` is the identity term, `weights[i + 1]` the i-th active dyad.
    pub weights: Vec<f64>,
    /// Trace of the inverse of `optimal_kernel`.
    pub trace: f64,
    /// Objective after initialization and after every coordinate update.
    pub objective_log: Vec<f64>,
    /// Converged objective value.
    pub phi: f64,
    pub sweeps: usize,
    /// Column of the input dyad matrix behind each active dyad.
    pub active_columns: Vec<usize>,
    pub optimal_kernel: Array2<f64>,
}

impl SolveResult {
    /// Weight of the identity term, `None` when `weights` is empty.
    pub fn residual_weight(&self) -> Option<f64> {
        self.weights.first().copied()
    }

    pub fn dyad_weights(&self) -> &[f64] {
        self.weights.get(1..).unwrap_or_default()
    }
}
