//! Demo optimal control problems.

use std::sync::Arc;

use clap::ValueEnum;
use nalgebra::{DMatrix, DVector};
use ocp_sqp::{Dynamics, DynamicsEval, HessianBlocks, LinearDynamics, OcpNlp, QuadraticCost, SqpResult};

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ProblemChoice {
    /// Double integrator with quadratic cost.
    Lqr,
    /// Pendulum swung back to rest through nonlinear dynamics.
    Pendulum,
}

/// Settings shared by the demo problems.
#[derive(Debug, Clone, Copy)]
pub struct ProblemConfig {
    pub horizon: usize,
    pub dt: f64,
    /// Symmetric control bound, if any.
    pub u_max: Option<f64>,
}

pub fn build(choice: ProblemChoice, cfg: &ProblemConfig) -> SqpResult<OcpNlp> {
    match choice {
        ProblemChoice::Lqr => double_integrator(cfg),
        ProblemChoice::Pendulum => pendulum(cfg),
    }
}

fn apply_control_bounds(nlp: &mut OcpNlp, cfg: &ProblemConfig) -> SqpResult<()> {
    if let Some(u_max) = cfg.u_max {
        for i in 0..cfg.horizon {
            nlp.set_control_bounds(i, &[-u_max], &[u_max])?;
        }
    }
    Ok(())
}

/// `p⁺ = p + dt v + dt²/2 a`, `v⁺ = v + dt a`, driven from rest at `p = 1`.
fn double_integrator(cfg: &ProblemConfig) -> SqpResult<OcpNlp> {
    let dt = cfg.dt;
    let mut nlp = OcpNlp::uniform(cfg.horizon, 2, 1)?;
    let a = DMatrix::from_row_slice(2, 2, &[1.0, dt, 0.0, 1.0]);
    let b = DMatrix::from_column_slice(2, 1, &[0.5 * dt * dt, dt]);
    nlp.set_dynamics_all(Arc::new(LinearDynamics::new(a, b)))?;

    let q = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 0.1]));
    nlp.set_cost_all(Arc::new(QuadraticCost::new(q.clone(), DMatrix::from_element(1, 1, 0.01))))?;
    nlp.set_cost(cfg.horizon, Arc::new(QuadraticCost::terminal(q * 10.0)))?;
    nlp.fix_initial_state(&[1.0, 0.0])?;
    apply_control_bounds(&mut nlp, cfg)?;
    Ok(nlp)
}

/// Explicit-Euler pendulum `θ'' = −(g/l) sin θ + u`, state `[θ, ω]`.
pub struct Pendulum {
    pub dt: f64,
    /// `g / l`.
    pub k: f64,
}

impl Dynamics for Pendulum {
    fn nx(&self) -> usize {
        2
    }

    fn nu(&self) -> usize {
        1
    }

    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>) -> DynamicsEval {
        let (theta, omega) = (x[0], x[1]);
        let dt = self.dt;
        DynamicsEval {
            next: DVector::from_vec(vec![theta + dt * omega, omega + dt * (u[0] - self.k * theta.sin())]),
            jac_x: DMatrix::from_row_slice(2, 2, &[1.0, dt, -dt * self.k * theta.cos(), 1.0]),
            jac_u: DMatrix::from_column_slice(2, 1, &[0.0, dt]),
        }
    }

    fn hessian(&self, x: &DVector<f64>, _u: &DVector<f64>, pi: &DVector<f64>) -> Option<HessianBlocks> {
        let mut h = HessianBlocks::zeros(2, 1);
        h.xx[(0, 0)] = pi[1] * self.dt * self.k * x[0].sin();
        Some(h)
    }
}

fn pendulum(cfg: &ProblemConfig) -> SqpResult<OcpNlp> {
    let mut nlp = OcpNlp::uniform(cfg.horizon, 2, 1)?;
    nlp.set_dynamics_all(Arc::new(Pendulum { dt: cfg.dt, k: 9.81 }))?;
    let q = DMatrix::from_diagonal(&DVector::from_vec(vec![10.0, 1.0]));
    nlp.set_cost_all(Arc::new(QuadraticCost::new(q.clone(), DMatrix::from_element(1, 1, 0.1))))?;
    nlp.set_cost(cfg.horizon, Arc::new(QuadraticCost::terminal(q)))?;
    nlp.fix_initial_state(&[0.8, 0.0])?;
    apply_control_bounds(&mut nlp, cfg)?;
    Ok(nlp)
}
