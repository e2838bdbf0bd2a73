use approx::{assert_abs_diff_eq, assert_relative_eq};
use ndarray::{Array2, array};
use umkl::linalg::utils::l2_norm;
use umkl::solver::descent::closed_form_step;
use umkl::{
    NumericalFault, UmklError, UmklOptions, default_ridge_for, run_coordinate_descent, solve,
    solve_with_options,
};

fn assert_monotone(log: &[f64]) {
    for (t, pair) in log.windows(2).enumerate() {
        assert!(
            pair[1] <= pair[0] + 1e-12 * pair[0].abs().max(1.0),
            "objective increased at update {t}: {:.15e} -> {:.15e}",
            pair[0],
            pair[1]
        );
    }
}

#[test]
fn single_dyad_two_items_matches_closed_form() {
    let k = array![[1.0], [0.0]];
    let rho = 0.1;
    let (weights, trace, log) = solve(k.view(), rho, 1e-6, None).expect("solve should succeed");

    assert_eq!(weights.len(), 2);
    assert_relative_eq!(weights.iter().sum::<f64>(), 1.0, epsilon = 1e-12);

    // One sweep reaches the optimum, the second confirms it.
    assert_eq!(log.len(), 3);
    assert_abs_diff_eq!(log[0], 2f64.sqrt(), epsilon = 1e-15);
    assert_monotone(&log);

    let alpha = 1.0 - (0.01f64 / 0.99).sqrt();
    let phi = rho * alpha + ((1.0 - alpha).powi(2) + 1.0).sqrt();
    assert_relative_eq!(log[2], phi, epsilon = 1e-12);
    assert_relative_eq!(weights[0], ((1.0 - alpha).powi(2) + 1.0).sqrt() / phi, epsilon = 1e-12);
    assert_relative_eq!(weights[1], rho * alpha / phi, epsilon = 1e-12);

    // optimal kernel = diag(w0 + w1 / rho^2, w0); explicit 2x2 inverse trace.
    let a = weights[0] + weights[1] / (rho * rho);
    let d = weights[0];
    assert_relative_eq!(trace, (a + d) / (a * d), epsilon = 1e-10);
    assert_relative_eq!(trace, 1.198_997_487_421_323_8, epsilon = 1e-9);
}

#[test]
fn converged_coefficients_satisfy_stationarity() {
    let k = array![[1.0], [0.0]];
    let rho = 0.1;
    let outcome = run_coordinate_descent(k.view(), &UmklOptions::new(rho).with_epsilon(1e-6))
        .expect("descent should succeed");

    // Residual with the dyad's own contribution restored.
    let u_row = outcome.u.row(0);
    let mut z_excl = outcome.z.clone();
    for r in 0..2 {
        for c in 0..2 {
            z_excl[[r, c]] += k[[r, 0]] * u_row[c];
        }
    }
    let ktz = z_excl.t().dot(&k.column(0));
    let alpha = closed_form_step(l2_norm(&z_excl), l2_norm(&ktz), 1.0, rho);
    for (u, g) in u_row.iter().zip(ktz.iter()) {
        assert_abs_diff_eq!(*u, alpha * g, epsilon = 1e-6);
    }

    let full = Array2::<f64>::eye(2) - k.dot(&outcome.u);
    for (a, b) in outcome.z.iter().zip(full.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
    }
}

#[test]
fn rho_above_every_norm_is_infeasible() {
    let k = array![[0.3, 0.0], [0.0, 0.2], [0.1, 0.1]];
    let err = solve(k.view(), 0.5, 1e-6, None).expect_err("rho exceeds every column norm");
    assert!(err.is_caller_correctable(), "unexpected error: {err}");
    assert!(err.to_string().contains("rho too large"));
}

#[test]
fn coupled_dyads_descend_monotonically_and_normalize() {
    let k = array![[0.5, 0.1], [0.2, 0.3], [0.0, 0.4]];
    let options = UmklOptions::new(0.05).with_epsilon(1e-8);
    let result = solve_with_options(k.view(), &options).expect("solve should succeed");

    assert_monotone(&result.objective_log);
    assert_eq!(result.objective_log.len(), 1 + 2 * result.sweeps);
    assert_relative_eq!(result.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-10);
    assert_eq!(result.active_columns, vec![0, 1]);
    assert_eq!(
        result.phi,
        *result.objective_log.last().expect("non-empty log")
    );
    assert!(result.weights.iter().all(|w| *w >= 0.0));
    assert!(result.trace.is_finite() && result.trace > 0.0);
}

#[test]
fn repeated_solves_are_bitwise_identical() {
    let k = array![[0.5, 0.1, 0.2], [0.2, 0.3, 0.1], [0.0, 0.4, 0.3]];
    let first = solve(k.view(), 0.05, 1e-7, None).expect("first solve");
    let second = solve(k.view(), 0.05, 1e-7, None).expect("second solve");
    assert_eq!(first.0, second.0);
    assert_eq!(first.1.to_bits(), second.1.to_bits());
    assert_eq!(first.2, second.2);
}

#[test]
fn filtered_columns_are_reported_as_inactive() {
    // The middle column is below rho and must not receive a weight.
    let k = array![[0.5, 0.01, 0.1], [0.2, 0.0, 0.3], [0.0, 0.0, 0.4]];
    let result = solve_with_options(k.view(), &UmklOptions::new(0.05).with_epsilon(1e-8))
        .expect("solve should succeed");
    assert_eq!(result.active_columns, vec![0, 2]);
    assert_eq!(result.weights.len(), 3);
    assert_eq!(result.dyad_weights().len(), 2);
}

#[test]
fn ridge_augmentation_strips_extra_rows_before_recovery() {
    let k = array![[0.6, 0.0], [0.0, 0.4]];
    let rho = 0.1;
    let options = UmklOptions::new(rho)
        .with_epsilon(1e-3)
        .with_sigma(default_ridge_for(rho));
    let result = solve_with_options(k.view(), &options).expect("augmented solve");

    assert_eq!(result.optimal_kernel.dim(), (2, 2));
    assert_eq!(result.weights.len(), 3);
    assert_relative_eq!(result.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-10);
    // Orthogonal dyads: the combined kernel stays diagonal.
    assert_abs_diff_eq!(result.optimal_kernel[[0, 1]], 0.0, epsilon = 1e-12);

    let expected_trace =
        1.0 / result.optimal_kernel[[0, 0]] + 1.0 / result.optimal_kernel[[1, 1]];
    assert_relative_eq!(result.trace, expected_trace, epsilon = 1e-10);
}

#[test]
fn ridge_augmentation_can_breach_monotonicity_and_is_fatal() {
    // Step sizes use the unaugmented column norms, so late sweeps may overshoot.
    let k = array![[0.6, 0.0], [0.0, 0.4]];
    let options = UmklOptions::new(0.1).with_epsilon(1e-5).with_sigma(0.005);
    match solve_with_options(k.view(), &options) {
        Err(UmklError::Numerical(NumericalFault::ObjectiveIncreased { previous, current, .. })) => {
            assert!(current > previous)
        }
        other => panic!("expected ObjectiveIncreased, got {other:?}"),
    }
}

#[test]
fn opting_into_increase_slack_accepts_the_ridge_overshoot() {
    let k = array![[0.6, 0.0], [0.0, 0.4]];
    let options = UmklOptions::new(0.1)
        .with_epsilon(1e-5)
        .with_sigma(0.005)
        .with_objective_increase_tolerance(1e-5);
    let result = solve_with_options(k.view(), &options).expect("overshoot within slack");

    // The overshooting sweep also ends the solve.
    assert_eq!(result.sweeps, 4);
    assert_relative_eq!(result.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-10);
    assert!(result.trace.is_finite() && result.trace > 0.0);
}

#[test]
fn rank_one_residual_can_make_the_step_imaginary() {
    // Two items, two dyads: after a few sweeps the residual is numerically
    // rank one along the second dyad and roundoff pushes `d` below zero.
    let k = array![
        [-0.7910421963910467, 0.04870078198116867],
        [0.09540052472807167, 0.19730430170601584]
    ];
    match solve(k.view(), 0.031305928315615766, 1e-6, None) {
        Err(UmklError::Numerical(NumericalFault::ImaginaryStep { dyad, sweep })) => {
            assert_eq!((dyad, sweep), (1, 6));
        }
        other => panic!("expected ImaginaryStep, got {other:?}"),
    }
}

#[test]
fn duplicate_dyad_facing_a_vanished_residual_gets_zero_weight() {
    // One item: the first copy drives the residual to exactly zero, so the
    // second copy sees K^T Z = 0 and keeps a zero row.
    let k = array![[0.5, 0.5]];
    let rho = 0.1;
    let result = solve_with_options(k.view(), &UmklOptions::new(rho).with_epsilon(1e-6))
        .expect("zero gradient is not a failure");

    assert_eq!(result.sweeps, 2);
    assert_eq!(result.objective_log.len(), 5);
    assert_abs_diff_eq!(result.phi, 0.2, epsilon = 1e-15);
    assert_eq!(result.residual_weight(), Some(0.0));
    assert_abs_diff_eq!(result.dyad_weights()[0], 1.0, epsilon = 1e-15);
    assert_eq!(result.dyad_weights()[1], 0.0);

    // 1x1 combined kernel: rho^-2 * 0.5^2 = 25.
    assert_relative_eq!(result.optimal_kernel[[0, 0]], 25.0, epsilon = 1e-12);
    assert_relative_eq!(result.trace, 0.04, epsilon = 1e-12);
}
