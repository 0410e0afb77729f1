//! Full-space interior point: every `u_i`, `x_i` is a decision variable and
//! the dynamics enter as equality rows.

use std::time::Instant;

use sprs::TriMat;

use super::conic::{
    scatter_bound_duals, solve_conic, stage_row, triplets_to_csc, ClarabelSettings, ConicAssembler, RowRole,
    CODE_SETUP,
};
use crate::backend::QpBackend;
use crate::data::OcpQpData;
use crate::dims::OcpQpDims;
use crate::solution::{OcpQpSolution, QpStatus};

/// Offsets of `u_i` and `x_i` in `v = [u_0; x_0; u_1; x_1; …; x_N]`.
#[derive(Debug, Clone)]
struct Layout {
    u: Vec<usize>,
    x: Vec<usize>,
    n_vars: usize,
}

impl Layout {
    fn new(dims: &OcpQpDims) -> Self {
        let mut u = Vec::with_capacity(dims.num_stages());
        let mut x = Vec::with_capacity(dims.num_stages());
        let mut off = 0;
        for i in 0..dims.num_stages() {
            u.push(off);
            off += dims.nu()[i];
            x.push(off);
            off += dims.nx()[i];
        }
        Self { u, x, n_vars: off }
    }
}

/// Sparse Clarabel backend.
#[derive(Debug)]
pub struct SparseClarabelBackend {
    settings: ClarabelSettings,
    layout: Layout,
}

impl SparseClarabelBackend {
    pub fn new(dims: &OcpQpDims, settings: ClarabelSettings) -> Self {
        Self { settings, layout: Layout::new(dims) }
    }

    /// Cost Hessian (upper triangle) and gradient over `v`.
    fn cost(&self, dims: &OcpQpDims, qp: &OcpQpData) -> (TriMat<f64>, Vec<f64>) {
        let lay = &self.layout;
        let mut p = TriMat::new((lay.n_vars, lay.n_vars));
        let mut c = vec![0.0; lay.n_vars];
        for i in 0..dims.num_stages() {
            let st = qp.stage(i);
            let (ou, ox) = (lay.u[i], lay.x[i]);
            let (nu, nx) = (dims.nu()[i], dims.nx()[i]);
            for col in 0..nu {
                for row in 0..=col {
                    push_nz(&mut p, ou + row, ou + col, st.R[(row, col)]);
                }
                c[ou + col] = st.r[col];
            }
            // u precedes x, so S sits entirely in the upper triangle.
            for col in 0..nx {
                for row in 0..nu {
                    push_nz(&mut p, ou + row, ox + col, st.S[(row, col)]);
                }
                for row in 0..=col {
                    push_nz(&mut p, ox + row, ox + col, st.Q[(row, col)]);
                }
                c[ox + col] = st.q[col];
            }
        }
        (p, c)
    }

    fn constraints(&self, dims: &OcpQpDims, qp: &OcpQpData) -> ConicAssembler {
        let lay = &self.layout;
        let mut asm = ConicAssembler::new(lay.n_vars);
        for i in 0..dims.horizon() {
            let st = qp.stage(i);
            // x⁺ − A x − B u = b
            for comp in 0..dims.nx()[i + 1] {
                let mut coeffs: Vec<(usize, f64)> = Vec::with_capacity(dims.nv(i) + 1);
                coeffs.extend(st.B.row(comp).iter().enumerate().map(|(j, &v)| (lay.u[i] + j, -v)));
                coeffs.extend(st.A.row(comp).iter().enumerate().map(|(j, &v)| (lay.x[i] + j, -v)));
                coeffs.push((lay.x[i + 1] + comp, 1.0));
                asm.push_equality(coeffs, st.b[comp], RowRole::Dynamics { stage: i, comp });
            }
        }
        for i in 0..dims.num_stages() {
            let st = qp.stage(i);
            for k in 0..dims.nc(i) {
                let (cu, cx) = stage_row(st, k);
                let coeffs = cu
                    .into_iter()
                    .map(|(j, v)| (lay.u[i] + j, v))
                    .chain(cx.into_iter().map(|(j, v)| (lay.x[i] + j, v)))
                    .collect();
                asm.push_two_sided(qp, coeffs, 0.0, st.constraint_bounds(k), i, k);
            }
        }
        asm
    }
}

fn push_nz(tri: &mut TriMat<f64>, row: usize, col: usize, v: f64) {
    if v != 0.0 {
        tri.add_triplet(row, col, v);
    }
}

impl QpBackend for SparseClarabelBackend {
    fn name(&self) -> &'static str {
        "sparse_clarabel"
    }

    fn solve(&mut self, dims: &OcpQpDims, qp: &OcpQpData, sol: &mut OcpQpSolution) -> QpStatus {
        let start = Instant::now();
        let (p, c) = self.cost(dims, qp);
        let prob = self.constraints(dims, qp).finish();
        let Some(out) = solve_conic(&triplets_to_csc(p), &c, &prob, &self.settings) else {
            return QpStatus::Failure { code: CODE_SETUP };
        };

        let lay = &self.layout;
        for i in 0..dims.num_stages() {
            let nu = dims.nu()[i];
            let nx = dims.nx()[i];
            sol.u[i].copy_from_slice(&out.x[lay.u[i]..lay.u[i] + nu]);
            sol.x[i].copy_from_slice(&out.x[lay.x[i]..lay.x[i] + nx]);
        }
        for (role, &y) in prob.roles.iter().zip(&out.z) {
            if let RowRole::Dynamics { stage, comp } = *role {
                sol.pi[stage][comp] = -y;
            }
        }
        scatter_bound_duals(&prob.roles, &out.z, sol);

        sol.info.iterations = out.iterations;
        sol.info.solve_time = start.elapsed().as_secs_f64();
        out.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::residuals::compute_residuals;
    use nalgebra::{DMatrix, DVector};

    #[test]
    fn test_layout_offsets() {
        let dims = OcpQpDims::new(vec![2, 3, 1], vec![1, 2, 0], vec![0; 3], vec![0; 3], vec![0; 3]).unwrap();
        let lay = Layout::new(&dims);
        assert_eq!(lay.u, vec![0, 3, 8]);
        assert_eq!(lay.x, vec![1, 5, 8]);
        assert_eq!(lay.n_vars, 9);
    }

    #[test]
    fn test_box_constrained_control() {
        // min ½x0² + ½u² + ½x1², x1 = x0 + u, x0 = 2, u ≥ −0.5  ⇒  u = −0.5 (active)
        let dims = OcpQpDims::new(vec![1, 1], vec![1, 0], vec![1, 0], vec![1, 0], vec![0, 0]).unwrap();
        let mut qp = OcpQpData::zeros(&dims);
        {
            let st = qp.stage_mut(0);
            st.Q = DMatrix::identity(1, 1);
            st.R = DMatrix::identity(1, 1);
            st.A = DMatrix::identity(1, 1);
            st.B = DMatrix::identity(1, 1);
            st.lbx = DVector::from_element(1, 2.0);
            st.ubx = DVector::from_element(1, 2.0);
            st.lbu = DVector::from_element(1, -0.5);
            st.ubu = DVector::from_element(1, 1e9);
        }
        qp.stage_mut(1).Q = DMatrix::identity(1, 1);

        let mut be = SparseClarabelBackend::new(&dims, ClarabelSettings::default());
        let mut sol = OcpQpSolution::zeros(&dims);
        assert_eq!(be.solve(&dims, &qp, &mut sol), QpStatus::Success);
        assert!((sol.u[0][0] + 0.5).abs() < 1e-6);
        assert!((sol.x[1][0] - 1.5).abs() < 1e-6);
        assert!((sol.pi[0][0] - 1.5).abs() < 1e-6);
        // R u + pi − lam_lower = 0  ⇒  lam_lower = 1.0
        assert!((sol.lam_lower[0][0] - 1.0).abs() < 1e-5);
        let res = compute_residuals(&dims, &qp, &sol);
        assert!(res.max() < 1e-5, "{res:?}");
    }
}
