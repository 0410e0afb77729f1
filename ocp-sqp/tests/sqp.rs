//! End-to-end SQP runs on small linear and nonlinear OCPs.

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use nalgebra::{DMatrix, DVector};
use ocp_qp::OcpError;
use ocp_sqp::{
    CostEval, Dynamics, DynamicsEval, HessianBlocks, LinearDynamics, OcpNlp, QuadraticCost, RegularizationKind,
    SqpError, SqpOptions, SqpSolver, SqpStatus, StageCost,
};

/// min ½x₀² + ½u² + ½x₁²  s.t. x₁ = x₀ + u, x₀ = 1.  Optimum u = −½, x₁ = ½.
fn one_stage_lqr() -> OcpNlp {
    let mut nlp = OcpNlp::uniform(1, 1, 1).unwrap();
    let one = || DMatrix::from_element(1, 1, 1.0);
    nlp.set_dynamics(0, Arc::new(LinearDynamics::new(one(), one()))).unwrap();
    nlp.set_cost(0, Arc::new(QuadraticCost::new(one(), one()))).unwrap();
    nlp.set_cost(1, Arc::new(QuadraticCost::terminal(one()))).unwrap();
    nlp.fix_initial_state(&[1.0]).unwrap();
    nlp
}

fn assert_lqr_optimum(solver: &SqpSolver, tol: f64) {
    assert_abs_diff_eq!(solver.controls()[0][0], -0.5, epsilon = tol);
    assert_abs_diff_eq!(solver.states()[1][0], 0.5, epsilon = tol);
    assert_abs_diff_eq!(solver.equality_multipliers()[0][0], 0.5, epsilon = tol);
    assert_abs_diff_eq!(solver.memory().cost, 0.75, epsilon = tol);
}

#[test]
fn one_stage_lqr_converges_with_riccati() {
    let opts = SqpOptions::default().with_qp_solver("riccati");
    let mut solver = SqpSolver::new(one_stage_lqr(), opts.clone()).unwrap();
    let status = solver.solve().unwrap();
    assert_eq!(status, SqpStatus::Success);

    let mem = solver.memory();
    assert!(mem.sqp_iter <= 2, "{}", mem.sqp_iter);
    assert!(mem.residuals.stat <= opts.tol_stat);
    assert!(mem.residuals.eq <= opts.tol_eq);
    assert!(mem.residuals.ineq <= opts.tol_ineq);
    assert!(mem.residuals.comp <= opts.tol_comp);
    assert_eq!(mem.stats.len(), mem.sqp_iter + 1);
    assert_lqr_optimum(&solver, 1e-10);
}

#[test]
fn max_iter_zero_only_evaluates_residuals() {
    let opts = SqpOptions::default().with_qp_solver("riccati").with_max_iter(0);
    let mut solver = SqpSolver::new(one_stage_lqr(), opts).unwrap();
    assert_eq!(solver.solve().unwrap(), SqpStatus::MaxIter);
    let mem = solver.memory();
    assert_eq!(mem.sqp_iter, 0);
    assert_eq!(mem.stats.len(), 1);
    // x₁ = 0 but f(x₀, u) = 1.
    assert_abs_diff_eq!(mem.residuals.eq, 1.0, epsilon = 1e-14);
    assert_eq!(mem.stats.get(0, "qp_status"), None);
}

#[test]
fn reuse_workspace_restarts_from_solution() {
    let opts = SqpOptions::default().with_qp_solver("riccati");
    let mut solver = SqpSolver::new(one_stage_lqr(), opts).unwrap();
    solver.solve().unwrap();
    let first = solver.memory().sqp_iter;
    assert!(first >= 1);

    solver.solve().unwrap();
    assert_eq!(solver.memory().sqp_iter, 0);

    solver.set_option("reuse_workspace", &false.into()).unwrap();
    solver.solve().unwrap();
    assert_eq!(solver.memory().sqp_iter, first);
}

#[test]
fn ext_qp_res_fills_extra_columns() {
    let opts = SqpOptions::default().with_qp_solver("riccati").with_ext_qp_res(true);
    let mut solver = SqpSolver::new(one_stage_lqr(), opts).unwrap();
    solver.solve().unwrap();
    let stats = &solver.memory().stats;
    assert_eq!(stats.columns().len(), 11);
    let qp_res = stats.get(0, "qp_res_stat").unwrap();
    assert!(qp_res < 1e-10, "{qp_res}");
    assert_eq!(stats.get(0, "qp_status"), Some(0.0));
    assert!(stats.to_string().contains("qp_res_comp"));
}

#[test]
fn unknown_backend_is_reported() {
    let opts = SqpOptions::default().with_qp_solver("no_such_solver");
    let err = SqpSolver::new(one_stage_lqr(), opts).unwrap_err();
    assert!(matches!(err, SqpError::Qp(OcpError::UnsupportedBackend(ref name)) if name == "no_such_solver"), "{err}");
}

#[test]
fn invalid_options_rejected_before_solving() {
    let opts = SqpOptions { tol_eq: -1.0, ..SqpOptions::default() };
    assert!(matches!(SqpSolver::new(one_stage_lqr(), opts), Err(SqpError::InvalidOptions(_))));

    let mut solver = SqpSolver::new(one_stage_lqr(), SqpOptions::default().with_qp_solver("riccati")).unwrap();
    assert!(solver.set_option("step_length", &2.0.into()).is_err());
    assert!(solver.set_option("no_such_option", &1.0.into()).is_err());
    assert_eq!(solver.options().step_length, 1.0);
}

#[test]
fn qp_warm_start_needs_backend_support() {
    let opts = SqpOptions { qp_warm_start: true, ..SqpOptions::default().with_qp_solver("riccati") };
    let err = SqpSolver::new(one_stage_lqr(), opts).unwrap_err();
    assert!(matches!(err, SqpError::InvalidOptions(ref msg) if msg.contains("riccati")), "{err}");

    let mut solver = SqpSolver::new(one_stage_lqr(), SqpOptions::default().with_qp_solver("riccati")).unwrap();
    assert!(matches!(solver.set_option("qp_warm_start", &true.into()), Err(SqpError::InvalidOptions(_))));
    assert!(!solver.options().qp_warm_start);
    assert_eq!(solver.solve().unwrap(), SqpStatus::Success);
}

#[test]
fn missing_dynamics_is_invalid_problem() {
    let mut nlp = OcpNlp::uniform(2, 1, 1).unwrap();
    nlp.set_cost_all(Arc::new(QuadraticCost::new(DMatrix::identity(1, 1), DMatrix::identity(1, 1)))).unwrap();
    assert!(matches!(SqpSolver::new(nlp, SqpOptions::default()), Err(SqpError::InvalidProblem(_))));
}

#[test]
fn regularization_keeps_the_fixed_point() {
    // Negative terminal curvature: the reduced problem is convex but the stage
    // Hessian is not, so the projected model converges linearly to the same point.
    let mut nlp = OcpNlp::uniform(1, 1, 1).unwrap();
    let one = DMatrix::from_element(1, 1, 1.0);
    nlp.set_dynamics(0, Arc::new(LinearDynamics::new(one.clone(), one.clone()))).unwrap();
    nlp.set_cost(0, Arc::new(QuadraticCost::new(DMatrix::zeros(1, 1), one))).unwrap();
    nlp.set_cost(1, Arc::new(QuadraticCost::terminal(DMatrix::from_element(1, 1, -0.5)))).unwrap();
    nlp.fix_initial_state(&[1.0]).unwrap();

    let exact = SqpOptions::default().with_qp_solver("riccati");
    let mut plain = SqpSolver::new(nlp.clone(), exact.clone()).unwrap();
    assert_eq!(plain.solve().unwrap(), SqpStatus::Success);

    let projected = exact.with_regularization(RegularizationKind::Project, 1e-4);
    let mut reg = SqpSolver::new(nlp, projected).unwrap();
    assert_eq!(reg.solve().unwrap(), SqpStatus::Success);
    assert!(reg.memory().sqp_iter > plain.memory().sqp_iter);
    // ½u² − ¼(1 + u)² is minimal at u = 1.
    assert_abs_diff_eq!(plain.controls()[0][0], 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(reg.controls()[0][0], 1.0, epsilon = 1e-6);
}

struct NanCost;

impl StageCost for NanCost {
    fn nx(&self) -> usize {
        1
    }

    fn nu(&self) -> usize {
        1
    }

    fn evaluate(&self, _x: &DVector<f64>, _u: &DVector<f64>) -> CostEval {
        CostEval {
            value: f64::NAN,
            grad_x: DVector::from_element(1, f64::NAN),
            grad_u: DVector::zeros(1),
            hess: HessianBlocks::zeros(1, 1),
        }
    }
}

#[test]
fn non_finite_residuals_abort() {
    let mut nlp = one_stage_lqr();
    nlp.set_cost(0, Arc::new(NanCost)).unwrap();
    let mut solver = SqpSolver::new(nlp, SqpOptions::default().with_qp_solver("riccati")).unwrap();
    let err = solver.solve().unwrap_err();
    assert!(matches!(err, SqpError::NonFinite { what: "residuals", iter: 0 }), "{err}");
    assert!(solver.memory().status.is_none());
}

/// Explicit-Euler pendulum, `x = [θ, ω]`.
struct Pendulum {
    dt: f64,
    k: f64,
}

impl Dynamics for Pendulum {
    fn nx(&self) -> usize {
        2
    }

    fn nu(&self) -> usize {
        1
    }

    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>) -> DynamicsEval {
        let (th, om) = (x[0], x[1]);
        DynamicsEval {
            next: DVector::from_vec(vec![th + self.dt * om, om + self.dt * (-self.k * th.sin() + u[0])]),
            jac_x: DMatrix::from_row_slice(2, 2, &[1.0, self.dt, -self.dt * self.k * th.cos(), 1.0]),
            jac_u: DMatrix::from_column_slice(2, 1, &[0.0, self.dt]),
        }
    }

    fn hessian(&self, x: &DVector<f64>, _u: &DVector<f64>, pi: &DVector<f64>) -> Option<HessianBlocks> {
        let mut h = HessianBlocks::zeros(2, 1);
        h.xx[(0, 0)] = pi[1] * self.dt * self.k * x[0].sin();
        Some(h)
    }
}

fn pendulum(n: usize, u_max: Option<f64>) -> OcpNlp {
    let mut nlp = OcpNlp::uniform(n, 2, 1).unwrap();
    nlp.set_dynamics_all(Arc::new(Pendulum { dt: 0.05, k: 9.81 })).unwrap();
    let q = DMatrix::from_diagonal(&DVector::from_vec(vec![10.0, 1.0]));
    nlp.set_cost_all(Arc::new(QuadraticCost::new(q.clone(), DMatrix::from_element(1, 1, 0.1)))).unwrap();
    nlp.set_cost(n, Arc::new(QuadraticCost::terminal(q))).unwrap();
    nlp.fix_initial_state(&[0.8, 0.0]).unwrap();
    if let Some(u_max) = u_max {
        for i in 0..n {
            nlp.set_control_bounds(i, &[-u_max], &[u_max]).unwrap();
        }
    }
    nlp
}

#[test]
fn pendulum_converges_with_exact_hessian() {
    let opts = SqpOptions::default()
        .with_qp_solver("riccati")
        .with_regularization(RegularizationKind::Project, 1e-8)
        .with_max_iter(50);
    let mut solver = SqpSolver::new(pendulum(20, None), opts).unwrap();
    assert_eq!(solver.solve().unwrap(), SqpStatus::Success);
    let mem = solver.memory();
    assert!(mem.sqp_iter <= 20, "{}", mem.sqp_iter);
    assert!(mem.residuals.max() <= 1e-8);
    assert!(mem.timings.time_tot >= mem.timings.time_lin);

    // Iterates satisfy the nonlinear dynamics.
    let f = Pendulum { dt: 0.05, k: 9.81 };
    for i in 0..20 {
        let next = f.evaluate(&solver.states()[i], &solver.controls()[i]).next;
        assert_abs_diff_eq!(next, solver.states()[i + 1].clone(), epsilon = 1e-8);
    }
}

#[test]
fn parallel_linearization_gives_identical_iterates() {
    let base = SqpOptions::default().with_qp_solver("riccati").with_max_iter(50);
    let mut seq = SqpSolver::new(pendulum(16, None), base.clone()).unwrap();
    let mut par = SqpSolver::new(pendulum(16, None), base.with_threads(4)).unwrap();
    seq.solve().unwrap();
    par.solve().unwrap();
    assert_eq!(seq.memory().sqp_iter, par.memory().sqp_iter);
    assert_eq!(seq.states(), par.states());
    assert_eq!(seq.controls(), par.controls());
}

#[cfg(feature = "clarabel")]
mod interior_point {
    use super::*;
    use ocp_qp::QpStatus;
    use ocp_sqp::QpLimitPolicy;

    #[test]
    fn one_stage_lqr_converges_with_clarabel() {
        for name in ["sparse_clarabel", "condensing_clarabel"] {
            let opts = SqpOptions::default().with_qp_solver(name).with_tolerance(1e-6);
            let mut solver = SqpSolver::new(one_stage_lqr(), opts).unwrap();
            assert_eq!(solver.solve().unwrap(), SqpStatus::Success, "{name}");
            assert!(solver.memory().sqp_iter <= 3, "{name}: {}", solver.memory().sqp_iter);
            assert_lqr_optimum(&solver, 1e-6);
        }
    }

    #[test]
    fn pendulum_respects_control_bounds() {
        let opts = SqpOptions::default()
            .with_qp_solver("sparse_clarabel")
            .with_tolerance(1e-6)
            .with_regularization(RegularizationKind::Project, 1e-8)
            .with_max_iter(50);
        let mut solver = SqpSolver::new(pendulum(20, Some(2.0)), opts).unwrap();
        assert_eq!(solver.solve().unwrap(), SqpStatus::Success);
        assert!(solver.controls().iter().take(20).all(|u| u[0].abs() <= 2.0 + 1e-6));
        // Unconstrained, the braking phase needs close to 5.
        assert!(solver.controls().iter().any(|u| (u[0] - 2.0).abs() < 1e-4));
    }

    #[test]
    fn qp_iteration_limit_aborts_under_abort_policy() {
        let mut opts = SqpOptions::default().with_qp_solver("sparse_clarabel").with_qp_option("max_iter", 1i64);
        opts.qp_limit_policy = QpLimitPolicy::Abort;
        let mut solver = SqpSolver::new(pendulum(10, Some(2.0)), opts).unwrap();
        assert_eq!(solver.solve().unwrap(), SqpStatus::QpLimit(QpStatus::MaxIter));
        assert_eq!(solver.memory().sqp_iter, 0);
        assert_eq!(solver.memory().stats.get(0, "qp_status"), Some(1.0));
    }
}
