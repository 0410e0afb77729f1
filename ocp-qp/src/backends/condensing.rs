//! Condensed interior point.
//!
//! States are eliminated through the dynamics. With decision vector
//! `z = [x_0; u_0; …; u_{N−1}]` every state is affine in `z`,
//!
//! ```text
//! x_k = Φ_k z + c_k,   Φ_0 = [I 0 … 0],  c_0 = 0
//! Φ_{k+1} = A_k Φ_k + B_k E_k,  c_{k+1} = A_k c_k + b_k
//! ```
//!
//! and the dense condensed QP is handed to Clarabel. Dynamics multipliers
//! are recovered afterwards by a backward sweep over the state stationarity
//! conditions.

use std::time::Instant;

use nalgebra::{DMatrix, DVector};

use super::conic::{
    dense_upper_to_csc, scatter_bound_duals, solve_conic, stage_row, ClarabelSettings, ConicAssembler,
    CODE_SETUP,
};
use crate::backend::QpBackend;
use crate::data::{OcpQpData, StageData};
use crate::dims::OcpQpDims;
use crate::solution::{OcpQpSolution, QpStatus};

/// Condensing Clarabel backend.
#[derive(Debug)]
pub struct CondensingClarabelBackend {
    settings: ClarabelSettings,
    /// Offset of `u_k` in `z`.
    u_off: Vec<usize>,
    n_z: usize,
    /// Prediction matrices `Φ_k`.
    phi: Vec<DMatrix<f64>>,
    /// Affine terms `c_k`.
    c: Vec<DVector<f64>>,
}

impl CondensingClarabelBackend {
    pub fn new(dims: &OcpQpDims, settings: ClarabelSettings) -> Self {
        let mut u_off = Vec::with_capacity(dims.num_stages());
        let mut off = dims.nx()[0];
        for i in 0..dims.num_stages() {
            u_off.push(off);
            off += dims.nu()[i];
        }
        let n_z = off;
        Self {
            settings,
            u_off,
            n_z,
            phi: (0..dims.num_stages()).map(|i| DMatrix::zeros(dims.nx()[i], n_z)).collect(),
            c: (0..dims.num_stages()).map(|i| DVector::zeros(dims.nx()[i])).collect(),
        }
    }

    /// Build `Φ_k`, `c_k` for the current dynamics.
    fn predict(&mut self, dims: &OcpQpDims, qp: &OcpQpData) {
        let nx0 = dims.nx()[0];
        self.phi[0].fill(0.0);
        self.phi[0].view_mut((0, 0), (nx0, nx0)).fill_with_identity();
        self.c[0].fill(0.0);
        for k in 0..dims.horizon() {
            let st = qp.stage(k);
            let mut next = &st.A * &self.phi[k];
            let nu = dims.nu()[k];
            let mut cols = next.columns_mut(self.u_off[k], nu);
            cols += &st.B;
            self.c[k + 1] = &st.A * &self.c[k] + &st.b;
            self.phi[k + 1] = next;
        }
    }

    /// `[E_k; Φ_k]`, mapping `z` to `v_k = [u_k; x_k]` (up to `c_k`).
    fn stage_map(&self, dims: &OcpQpDims, k: usize) -> DMatrix<f64> {
        let nu = dims.nu()[k];
        let nx = dims.nx()[k];
        let mut t = DMatrix::zeros(nu + nx, self.n_z);
        for j in 0..nu {
            t[(j, self.u_off[k] + j)] = 1.0;
        }
        t.view_mut((nu, 0), (nx, self.n_z)).copy_from(&self.phi[k]);
        t
    }

    /// Condensed Hessian and gradient.
    fn condense_cost(&self, dims: &OcpQpDims, qp: &OcpQpData) -> (DMatrix<f64>, DVector<f64>) {
        let mut hess = DMatrix::zeros(self.n_z, self.n_z);
        let mut grad = DVector::zeros(self.n_z);
        for k in 0..dims.num_stages() {
            let st = qp.stage(k);
            let nu = dims.nu()[k];
            let nx = dims.nx()[k];
            let mut w = DMatrix::zeros(nu + nx, nu + nx);
            w.view_mut((0, 0), (nu, nu)).copy_from(&st.R);
            w.view_mut((0, nu), (nu, nx)).copy_from(&st.S);
            w.view_mut((nu, 0), (nx, nu)).copy_from(&st.S.transpose());
            w.view_mut((nu, nu), (nx, nx)).copy_from(&st.Q);

            let mut lin = DVector::zeros(nu + nx);
            lin.rows_mut(0, nu).copy_from(&st.r);
            lin.rows_mut(nu, nx).copy_from(&st.q);
            let mut shift = DVector::zeros(nu + nx);
            shift.rows_mut(nu, nx).copy_from(&self.c[k]);
            lin += &w * shift;

            let t = self.stage_map(dims, k);
            hess += t.tr_mul(&(&w * &t));
            grad += t.tr_mul(&lin);
        }
        let sym = (&hess + hess.transpose()) * 0.5;
        (sym, grad)
    }

    fn constraints(&self, dims: &OcpQpDims, qp: &OcpQpData) -> ConicAssembler {
        let mut asm = ConicAssembler::new(self.n_z);
        for i in 0..dims.num_stages() {
            let st = qp.stage(i);
            for k in 0..dims.nc(i) {
                let (cu, cx) = stage_row(st, k);
                let mut row = DVector::<f64>::zeros(self.n_z);
                let mut offset = 0.0;
                for (j, v) in cu {
                    row[self.u_off[i] + j] += v;
                }
                for (j, v) in cx {
                    row += self.phi[i].row(j).transpose() * v;
                    offset += v * self.c[i][j];
                }
                let coeffs = row.iter().copied().enumerate().filter(|&(_, v)| v != 0.0).collect();
                asm.push_two_sided(qp, coeffs, offset, st.constraint_bounds(k), i, k);
            }
        }
        asm
    }
}

/// `J_xᵀ (lam_upper − lam_lower)` for one stage.
fn state_constraint_gradient(st: &StageData, sol: &OcpQpSolution, stage: usize) -> DVector<f64> {
    let nbu = st.idxbu().len();
    let nbx = st.idxbx().len();
    let ng = st.lg.len();
    let net = &sol.lam_upper[stage] - &sol.lam_lower[stage];
    let mut g = DVector::zeros(st.Q.nrows());
    for (k, &j) in st.idxbx().iter().enumerate() {
        g[j] += net[nbu + k];
    }
    if ng > 0 {
        g += st.C.tr_mul(&net.rows(nbu + nbx, ng));
    }
    g
}

impl QpBackend for CondensingClarabelBackend {
    fn name(&self) -> &'static str {
        "condensing_clarabel"
    }

    fn solve(&mut self, dims: &OcpQpDims, qp: &OcpQpData, sol: &mut OcpQpSolution) -> QpStatus {
        let start = Instant::now();
        self.predict(dims, qp);
        let (hess, grad) = self.condense_cost(dims, qp);
        let prob = self.constraints(dims, qp).finish();
        let Some(out) = solve_conic(&dense_upper_to_csc(&hess), grad.as_slice(), &prob, &self.settings) else {
            return QpStatus::Failure { code: CODE_SETUP };
        };

        let z = DVector::from_column_slice(&out.x);
        for i in 0..dims.num_stages() {
            let nu = dims.nu()[i];
            sol.u[i].copy_from(&z.rows(self.u_off[i], nu));
            sol.x[i] = &self.phi[i] * &z + &self.c[i];
        }
        scatter_bound_duals(&prob.roles, &out.z, sol);

        // pi_{k−1} = Q x + Sᵀ u + q + Aᵀ pi_k + J_xᵀ(lam_u − lam_l) at stage k.
        let n = dims.horizon();
        for k in (1..=n).rev() {
            let st = qp.stage(k);
            let mut g = &st.Q * &sol.x[k] + st.S.tr_mul(&sol.u[k]) + &st.q;
            if k < n {
                g += st.A.tr_mul(&sol.pi[k]);
            }
            g += state_constraint_gradient(st, sol, k);
            sol.pi[k - 1] = g;
        }

        sol.info.iterations = out.iterations;
        sol.info.solve_time = start.elapsed().as_secs_f64();
        out.status
    }
}
