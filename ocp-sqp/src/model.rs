//! Evaluator plugins for the nonlinear OCP.
//!
//! The engine never looks inside a model: it asks each stage's plugins for
//! values and first derivatives at the current iterate and copies them into
//! the stage QP. Second derivatives are optional; a plugin that returns
//! `None` from its `hessian` hook contributes nothing (Gauss-Newton).
//!
//! All plugins are `Send + Sync` so stages can be linearized in parallel.

#![allow(non_snake_case)]

use nalgebra::{DMatrix, DVector};

/// Second-derivative blocks of a stage function w.r.t. `(x, u)`.
#[derive(Debug, Clone, PartialEq)]
pub struct HessianBlocks {
    /// `∂²/∂x²`, `nx × nx`.
    pub xx: DMatrix<f64>,
    /// `∂²/∂u∂x`, `nu × nx`.
    pub ux: DMatrix<f64>,
    /// `∂²/∂u²`, `nu × nu`.
    pub uu: DMatrix<f64>,
}

impl HessianBlocks {
    pub fn zeros(nx: usize, nu: usize) -> Self {
        Self { xx: DMatrix::zeros(nx, nx), ux: DMatrix::zeros(nu, nx), uu: DMatrix::zeros(nu, nu) }
    }

    /// Add `other` into `self`.
    pub fn accumulate(&mut self, other: &HessianBlocks) {
        self.xx += &other.xx;
        self.ux += &other.ux;
        self.uu += &other.uu;
    }

    pub(crate) fn has_shape(&self, nx: usize, nu: usize) -> bool {
        self.xx.shape() == (nx, nx) && self.ux.shape() == (nu, nx) && self.uu.shape() == (nu, nu)
    }
}

/// Discrete dynamics `x⁺ = f(x, u)` linearized at a point.
#[derive(Debug, Clone)]
pub struct DynamicsEval {
    pub next: DVector<f64>,
    pub jac_x: DMatrix<f64>,
    pub jac_u: DMatrix<f64>,
}

/// Stage cost `l(x, u)` with gradient and Hessian.
#[derive(Debug, Clone)]
pub struct CostEval {
    pub value: f64,
    pub grad_x: DVector<f64>,
    pub grad_u: DVector<f64>,
    pub hess: HessianBlocks,
}

/// General constraint function `g(x, u)` linearized at a point.
#[derive(Debug, Clone)]
pub struct ConstraintEval {
    pub value: DVector<f64>,
    pub jac_x: DMatrix<f64>,
    pub jac_u: DMatrix<f64>,
}

pub trait Dynamics: Send + Sync {
    fn nx(&self) -> usize;
    fn nu(&self) -> usize;

    /// State dimension of the successor stage.
    fn nx_next(&self) -> usize {
        self.nx()
    }

    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>) -> DynamicsEval;

    /// Curvature `Σ_k pi_k ∇²f_k(x, u)` for the multipliers `pi`.
    fn hessian(&self, _x: &DVector<f64>, _u: &DVector<f64>, _pi: &DVector<f64>) -> Option<HessianBlocks> {
        None
    }
}

pub trait StageCost: Send + Sync {
    fn nx(&self) -> usize;
    fn nu(&self) -> usize;
    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>) -> CostEval;
}

pub trait Constraint: Send + Sync {
    fn nx(&self) -> usize;
    fn nu(&self) -> usize;
    fn ng(&self) -> usize;
    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>) -> ConstraintEval;

    /// Curvature `Σ_k w_k ∇²g_k(x, u)` for the net multipliers `w = lam_upper − lam_lower`.
    fn hessian(&self, _x: &DVector<f64>, _u: &DVector<f64>, _w: &DVector<f64>) -> Option<HessianBlocks> {
        None
    }
}

/// `x⁺ = A x + B u + c`.
#[derive(Debug, Clone)]
pub struct LinearDynamics {
    pub A: DMatrix<f64>,
    pub B: DMatrix<f64>,
    pub c: DVector<f64>,
}

impl LinearDynamics {
    pub fn new(A: DMatrix<f64>, B: DMatrix<f64>) -> Self {
        let c = DVector::zeros(A.nrows());
        Self { A, B, c }
    }

    pub fn with_offset(mut self, c: DVector<f64>) -> Self {
        self.c = c;
        self
    }
}

impl Dynamics for LinearDynamics {
    fn nx(&self) -> usize {
        self.A.ncols()
    }

    fn nu(&self) -> usize {
        self.B.ncols()
    }

    fn nx_next(&self) -> usize {
        self.A.nrows()
    }

    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>) -> DynamicsEval {
        DynamicsEval { next: &self.A * x + &self.B * u + &self.c, jac_x: self.A.clone(), jac_u: self.B.clone() }
    }
}

/// `½ (x − x_ref)ᵀ Q (x − x_ref) + (x − x_ref)ᵀ Sᵀ (u − u_ref) + ½ (u − u_ref)ᵀ R (u − u_ref)`.
#[derive(Debug, Clone)]
pub struct QuadraticCost {
    pub Q: DMatrix<f64>,
    pub S: DMatrix<f64>,
    pub R: DMatrix<f64>,
    pub x_ref: DVector<f64>,
    pub u_ref: DVector<f64>,
}

impl QuadraticCost {
    /// Cost with zero cross term and zero references.
    pub fn new(Q: DMatrix<f64>, R: DMatrix<f64>) -> Self {
        let (nx, nu) = (Q.nrows(), R.nrows());
        Self { Q, S: DMatrix::zeros(nu, nx), R, x_ref: DVector::zeros(nx), u_ref: DVector::zeros(nu) }
    }

    /// State-only cost, e.g. for the terminal stage.
    pub fn terminal(Q: DMatrix<f64>) -> Self {
        Self::new(Q, DMatrix::zeros(0, 0))
    }

    pub fn with_cross(mut self, S: DMatrix<f64>) -> Self {
        self.S = S;
        self
    }

    pub fn with_reference(mut self, x_ref: DVector<f64>, u_ref: DVector<f64>) -> Self {
        self.x_ref = x_ref;
        self.u_ref = u_ref;
        self
    }
}

impl StageCost for QuadraticCost {
    fn nx(&self) -> usize {
        self.Q.nrows()
    }

    fn nu(&self) -> usize {
        self.R.nrows()
    }

    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>) -> CostEval {
        let dx = x - &self.x_ref;
        let du = u - &self.u_ref;
        let grad_x = &self.Q * &dx + self.S.tr_mul(&du);
        let grad_u = &self.R * &du + &self.S * &dx;
        let value = 0.5 * (dx.dot(&(&self.Q * &dx)) + du.dot(&(&self.R * &du))) + du.dot(&(&self.S * &dx));
        CostEval {
            value,
            grad_x,
            grad_u,
            hess: HessianBlocks { xx: self.Q.clone(), ux: self.S.clone(), uu: self.R.clone() },
        }
    }
}

/// `g(x, u) = C x + D u`.
#[derive(Debug, Clone)]
pub struct LinearConstraint {
    pub C: DMatrix<f64>,
    pub D: DMatrix<f64>,
}

impl LinearConstraint {
    pub fn new(C: DMatrix<f64>, D: DMatrix<f64>) -> Self {
        Self { C, D }
    }
}

impl Constraint for LinearConstraint {
    fn nx(&self) -> usize {
        self.C.ncols()
    }

    fn nu(&self) -> usize {
        self.D.ncols()
    }

    fn ng(&self) -> usize {
        self.C.nrows()
    }

    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>) -> ConstraintEval {
        ConstraintEval { value: &self.C * x + &self.D * u, jac_x: self.C.clone(), jac_u: self.D.clone() }
    }
}
