//! Stage-wise linearization of the OCP around the current iterate.
//!
//! The QP is posed in the step `(Δx, Δu)`: dynamics residuals go into `b`,
//! box and general bounds are shifted by the current values, and infinite
//! bounds stay infinite so the active index sets do not change between
//! iterations.

use nalgebra::{DMatrix, DVector};
use ocp_qp::{Field, OcpQp, OcpQpDims, OcpQpSolution, VarClass};
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::error::{SqpError, SqpResult};
use crate::model::HessianBlocks;
use crate::nlp::{NlpStage, OcpNlp};

/// Primal iterate `(x, u)` over the horizon.
#[derive(Debug, Clone, PartialEq)]
pub struct Iterate {
    pub x: Vec<DVector<f64>>,
    pub u: Vec<DVector<f64>>,
}

impl Iterate {
    /// The initial guess stored in `nlp`.
    pub fn initial(nlp: &OcpNlp) -> Self {
        Self {
            x: nlp.stages.iter().map(|st| st.x_init.clone()).collect(),
            u: nlp.stages.iter().map(|st| st.u_init.clone()).collect(),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.iter().chain(&self.u).all(|v| v.iter().all(|e| e.is_finite()))
    }
}

/// Linearized data of one stage, ready to be written into the QP.
#[derive(Debug, Clone)]
pub(crate) struct StageLinearization {
    pub cost: f64,
    pub hess: HessianBlocks,
    pub q: DVector<f64>,
    pub r: DVector<f64>,
    pub dynamics: Option<(DMatrix<f64>, DMatrix<f64>, DVector<f64>)>,
    pub constraint: Option<(DMatrix<f64>, DMatrix<f64>, DVector<f64>, DVector<f64>)>,
    pub lbx: Vec<f64>,
    pub ubx: Vec<f64>,
    pub lbu: Vec<f64>,
    pub ubu: Vec<f64>,
}

fn shape_error(stage: usize, what: &str, got: (usize, usize), expected: (usize, usize)) -> SqpError {
    SqpError::InvalidProblem(format!(
        "stage {stage}: {what} is {}x{}, expected {}x{}",
        got.0, got.1, expected.0, expected.1
    ))
}

fn check_shape(stage: usize, what: &str, got: (usize, usize), expected: (usize, usize)) -> SqpResult<()> {
    if got != expected {
        return Err(shape_error(stage, what, got, expected));
    }
    Ok(())
}

/// Net multipliers `lam_upper − lam_lower` of the general constraints of `stage`.
fn constraint_multipliers(dims: &OcpQpDims, mult: &OcpQpSolution, stage: usize) -> DVector<f64> {
    let ng = dims.ng()[stage];
    let off = dims.nbu()[stage] + dims.nbx()[stage];
    let net = &mult.lam_upper[stage] - &mult.lam_lower[stage];
    if net.len() < off + ng {
        return DVector::zeros(ng);
    }
    net.rows(off, ng).into_owned()
}

fn shifted(bound: &[f64], value: &DVector<f64>) -> Vec<f64> {
    bound.iter().zip(value.iter()).map(|(b, v)| b - v).collect()
}

fn linearize_stage(
    nlp: &OcpNlp,
    it: &Iterate,
    dims: &OcpQpDims,
    mult: &OcpQpSolution,
    i: usize,
) -> SqpResult<StageLinearization> {
    let st: &NlpStage = &nlp.stages[i];
    let (nx, nu) = (nlp.nx()[i], nlp.nu()[i]);
    let (x, u) = (&it.x[i], &it.u[i]);

    let (cost, mut hess, q, r) = match &st.cost {
        Some(c) => {
            let ev = c.evaluate(x, u);
            if !ev.hess.has_shape(nx, nu) {
                return Err(SqpError::InvalidProblem(format!("stage {i}: cost Hessian has the wrong shape")));
            }
            check_shape(i, "cost gradient in x", ev.grad_x.shape(), (nx, 1))?;
            check_shape(i, "cost gradient in u", ev.grad_u.shape(), (nu, 1))?;
            (ev.value, ev.hess, ev.grad_x, ev.grad_u)
        }
        None => (0.0, HessianBlocks::zeros(nx, nu), DVector::zeros(nx), DVector::zeros(nu)),
    };

    let dynamics = match &st.dynamics {
        Some(f) if i < nlp.horizon() => {
            let nx1 = nlp.nx()[i + 1];
            let ev = f.evaluate(x, u);
            check_shape(i, "dynamics value", ev.next.shape(), (nx1, 1))?;
            check_shape(i, "dynamics Jacobian in x", ev.jac_x.shape(), (nx1, nx))?;
            check_shape(i, "dynamics Jacobian in u", ev.jac_u.shape(), (nx1, nu))?;
            if let Some(h) = f.hessian(x, u, &mult.pi[i]) {
                if !h.has_shape(nx, nu) {
                    return Err(SqpError::InvalidProblem(format!("stage {i}: dynamics Hessian has the wrong shape")));
                }
                hess.accumulate(&h);
            }
            let defect = ev.next - &it.x[i + 1];
            Some((ev.jac_x, ev.jac_u, defect))
        }
        _ => None,
    };

    let constraint = match &st.constraint {
        Some(c) => {
            let ng = c.lg.len();
            let ev = c.function.evaluate(x, u);
            check_shape(i, "constraint value", ev.value.shape(), (ng, 1))?;
            check_shape(i, "constraint Jacobian in x", ev.jac_x.shape(), (ng, nx))?;
            check_shape(i, "constraint Jacobian in u", ev.jac_u.shape(), (ng, nu))?;
            let w = constraint_multipliers(dims, mult, i);
            if let Some(h) = c.function.hessian(x, u, &w) {
                if !h.has_shape(nx, nu) {
                    return Err(SqpError::InvalidProblem(format!(
                        "stage {i}: constraint Hessian has the wrong shape"
                    )));
                }
                hess.accumulate(&h);
            }
            let lg = &c.lg - &ev.value;
            let ug = &c.ug - &ev.value;
            Some((ev.jac_x, ev.jac_u, lg, ug))
        }
        None => None,
    };

    Ok(StageLinearization {
        cost,
        hess,
        q,
        r,
        dynamics,
        constraint,
        lbx: shifted(&st.lbx, x),
        ubx: shifted(&st.ubx, x),
        lbu: shifted(&st.lbu, u),
        ubu: shifted(&st.ubu, u),
    })
}

/// Linearize every stage, on `pool` if given.
pub(crate) fn linearize_all(
    nlp: &OcpNlp,
    it: &Iterate,
    dims: &OcpQpDims,
    mult: &OcpQpSolution,
    pool: Option<&ThreadPool>,
) -> SqpResult<Vec<StageLinearization>> {
    let n = nlp.horizon();
    let work = |i: usize| linearize_stage(nlp, it, dims, mult, i);
    match pool {
        Some(pool) => pool.install(|| (0..=n).into_par_iter().map(work).collect()),
        None => (0..=n).map(work).collect(),
    }
}

/// Copy the Hessian blocks of stage `i` into the QP.
pub(crate) fn write_hessian(qp: &mut OcpQp, i: usize, hess: &HessianBlocks) -> SqpResult<()> {
    qp.set(Field::Q, i, hess.xx.as_slice())?;
    qp.set(Field::S, i, hess.ux.as_slice())?;
    qp.set(Field::R, i, hess.uu.as_slice())?;
    Ok(())
}

/// Copy a full stage linearization into the QP.
pub(crate) fn write_stage(qp: &mut OcpQp, i: usize, lin: &StageLinearization) -> SqpResult<()> {
    write_hessian(qp, i, &lin.hess)?;
    qp.set(Field::q, i, lin.q.as_slice())?;
    qp.set(Field::r, i, lin.r.as_slice())?;
    if let Some((a, b, defect)) = &lin.dynamics {
        qp.set(Field::A, i, a.as_slice())?;
        qp.set(Field::B, i, b.as_slice())?;
        qp.set(Field::b, i, defect.as_slice())?;
    }
    if let Some((c, d, lg, ug)) = &lin.constraint {
        qp.set(Field::C, i, c.as_slice())?;
        qp.set(Field::D, i, d.as_slice())?;
        qp.set(Field::lg, i, lg.as_slice())?;
        qp.set(Field::ug, i, ug.as_slice())?;
    }
    qp.set_bounds(i, VarClass::State, &lin.lbx, &lin.ubx)?;
    qp.set_bounds(i, VarClass::Control, &lin.lbu, &lin.ubu)?;
    Ok(())
}
