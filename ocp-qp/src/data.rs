//! Per-stage QP storage.
//!
//! Each stage holds
//!
//! ```text
//! cost:        ½ uᵀ R u + uᵀ S x + ½ xᵀ Q x + rᵀ u + qᵀ x
//! dynamics:    x⁺ = A x + B u + b                  (stages 0..N)
//! general:     lg ≤ C x + D u ≤ ug
//! box bounds:  lbu ≤ u[idxbu] ≤ ubu,  lbx ≤ x[idxbx] ≤ ubx
//! ```
//!
//! The box bounds stored here are the packed, backend-facing vectors: one
//! entry per index of the active set. The dense caller-facing bounds live in
//! [`crate::bounds::BoundsManager`].

use nalgebra::{DMatrix, DVector};

use crate::dims::OcpQpDims;
use crate::field::Field;

/// Default magnitude substituted for infinite bounds before a backend solve.
pub const DEFAULT_INF_BOUND: f64 = 1e9;

/// QP blocks for one stage.
#[derive(Debug, Clone)]
#[allow(non_snake_case)] // Q, S, R, A, B, C, D are standard notation
pub struct StageData {
    pub Q: DMatrix<f64>,
    pub S: DMatrix<f64>,
    pub R: DMatrix<f64>,
    pub q: DVector<f64>,
    pub r: DVector<f64>,
    pub A: DMatrix<f64>,
    pub B: DMatrix<f64>,
    pub b: DVector<f64>,
    pub C: DMatrix<f64>,
    pub D: DMatrix<f64>,
    pub lg: DVector<f64>,
    pub ug: DVector<f64>,

    pub(crate) idxbx: Vec<usize>,
    pub(crate) idxbu: Vec<usize>,
    pub(crate) lbx: DVector<f64>,
    pub(crate) ubx: DVector<f64>,
    pub(crate) lbu: DVector<f64>,
    pub(crate) ubu: DVector<f64>,
}

impl StageData {
    /// Zero-initialized blocks for `stage`, with `nbx`/`nbu` index sets
    /// set to the leading entries.
    pub fn zeros(dims: &OcpQpDims, stage: usize) -> Self {
        let nx = dims.nx[stage];
        let nu = dims.nu[stage];
        let ng = dims.ng[stage];
        let nx1 = dims.nx_next(stage);
        let nbx = dims.nbx[stage];
        let nbu = dims.nbu[stage];
        Self {
            Q: DMatrix::zeros(nx, nx),
            S: DMatrix::zeros(nu, nx),
            R: DMatrix::zeros(nu, nu),
            q: DVector::zeros(nx),
            r: DVector::zeros(nu),
            A: DMatrix::zeros(nx1, nx),
            B: DMatrix::zeros(nx1, nu),
            b: DVector::zeros(nx1),
            C: DMatrix::zeros(ng, nx),
            D: DMatrix::zeros(ng, nu),
            lg: DVector::from_element(ng, f64::NEG_INFINITY),
            ug: DVector::from_element(ng, f64::INFINITY),
            idxbx: (0..nbx).collect(),
            idxbu: (0..nbu).collect(),
            lbx: DVector::from_element(nbx, f64::NEG_INFINITY),
            ubx: DVector::from_element(nbx, f64::INFINITY),
            lbu: DVector::from_element(nbu, f64::NEG_INFINITY),
            ubu: DVector::from_element(nbu, f64::INFINITY),
        }
    }

    /// Column-major storage of a matrix or vector field.
    ///
    /// Returns `None` for box-bound fields, which are not stored densely here.
    pub fn block(&self, field: Field) -> Option<&[f64]> {
        Some(match field {
            Field::Q => self.Q.as_slice(),
            Field::S => self.S.as_slice(),
            Field::R => self.R.as_slice(),
            Field::q => self.q.as_slice(),
            Field::r => self.r.as_slice(),
            Field::A => self.A.as_slice(),
            Field::B => self.B.as_slice(),
            Field::b => self.b.as_slice(),
            Field::C => self.C.as_slice(),
            Field::D => self.D.as_slice(),
            Field::lg => self.lg.as_slice(),
            Field::ug => self.ug.as_slice(),
            Field::lbx | Field::ubx | Field::lbu | Field::ubu => return None,
        })
    }

    /// Mutable column-major storage of a matrix or vector field.
    pub fn block_mut(&mut self, field: Field) -> Option<&mut [f64]> {
        Some(match field {
            Field::Q => self.Q.as_mut_slice(),
            Field::S => self.S.as_mut_slice(),
            Field::R => self.R.as_mut_slice(),
            Field::q => self.q.as_mut_slice(),
            Field::r => self.r.as_mut_slice(),
            Field::A => self.A.as_mut_slice(),
            Field::B => self.B.as_mut_slice(),
            Field::b => self.b.as_mut_slice(),
            Field::C => self.C.as_mut_slice(),
            Field::D => self.D.as_mut_slice(),
            Field::lg => self.lg.as_mut_slice(),
            Field::ug => self.ug.as_mut_slice(),
            Field::lbx | Field::ubx | Field::lbu | Field::ubu => return None,
        })
    }

    /// Indices of bounded states.
    pub fn idxbx(&self) -> &[usize] {
        &self.idxbx
    }

    /// Indices of bounded controls.
    pub fn idxbu(&self) -> &[usize] {
        &self.idxbu
    }

    /// Packed lower state bounds (one per entry of `idxbx`).
    pub fn lbx(&self) -> &DVector<f64> {
        &self.lbx
    }

    pub fn ubx(&self) -> &DVector<f64> {
        &self.ubx
    }

    pub fn lbu(&self) -> &DVector<f64> {
        &self.lbu
    }

    pub fn ubu(&self) -> &DVector<f64> {
        &self.ubu
    }

    /// Lower and upper value of constraint row `k` in `[u[idxbu]; x[idxbx]; Cx+Du]` order.
    pub fn constraint_bounds(&self, k: usize) -> (f64, f64) {
        let nbu = self.idxbu.len();
        let nbx = self.idxbx.len();
        if k < nbu {
            (self.lbu[k], self.ubu[k])
        } else if k < nbu + nbx {
            (self.lbx[k - nbu], self.ubx[k - nbu])
        } else {
            (self.lg[k - nbu - nbx], self.ug[k - nbu - nbx])
        }
    }

    /// Evaluate the stage constraint vector `[u[idxbu]; x[idxbx]; Cx+Du]`.
    pub fn constraint_values(&self, u: &DVector<f64>, x: &DVector<f64>) -> DVector<f64> {
        let nbu = self.idxbu.len();
        let nbx = self.idxbx.len();
        let ng = self.lg.len();
        let mut d = DVector::zeros(nbu + nbx + ng);
        for (k, &j) in self.idxbu.iter().enumerate() {
            d[k] = u[j];
        }
        for (k, &j) in self.idxbx.iter().enumerate() {
            d[nbu + k] = x[j];
        }
        if ng > 0 {
            let g = &self.C * x + &self.D * u;
            d.rows_mut(nbu + nbx, ng).copy_from(&g);
        }
        d
    }
}

/// The full stage-structured QP.
#[derive(Debug, Clone)]
pub struct OcpQpData {
    pub(crate) stages: Vec<StageData>,
    pub(crate) inf_bound: f64,
}

impl OcpQpData {
    /// Zero QP for the given shape.
    pub fn zeros(dims: &OcpQpDims) -> Self {
        Self {
            stages: (0..dims.num_stages()).map(|i| StageData::zeros(dims, i)).collect(),
            inf_bound: DEFAULT_INF_BOUND,
        }
    }

    #[inline]
    pub fn stage(&self, i: usize) -> &StageData {
        &self.stages[i]
    }

    #[inline]
    pub fn stage_mut(&mut self, i: usize) -> &mut StageData {
        &mut self.stages[i]
    }

    pub fn stages(&self) -> &[StageData] {
        &self.stages
    }

    /// Magnitude at or above which a bound counts as absent.
    #[inline]
    pub fn inf_bound(&self) -> f64 {
        self.inf_bound
    }

    /// Whether a lower bound value constrains anything.
    #[inline]
    pub fn is_lower_active(&self, v: f64) -> bool {
        v.is_finite() && v > -self.inf_bound
    }

    /// Whether an upper bound value constrains anything.
    #[inline]
    pub fn is_upper_active(&self, v: f64) -> bool {
        v.is_finite() && v < self.inf_bound
    }
}
