#![deny(dead_code)]
#![deny(unused_imports)]

pub mod dyad;
pub mod estimate;
pub mod linalg;
pub mod solver;
pub mod types;

pub use dyad::{DyadLibrary, DyadSource, build_dyad_library};
pub use estimate::{
    LinearAlgebraFault, NumericalFault, UmklError, fit_kernel_combination, solve,
    solve_with_options,
};
pub use solver::descent::{DescentOutcome, run_coordinate_descent};
pub use types::{DEFAULT_DYADS_PER_KERNEL, SolveResult, UmklOptions, default_ridge_for};
