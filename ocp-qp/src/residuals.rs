//! KKT residuals of a stage-structured QP.
//!
//! For a candidate `(u, x, pi, lam)` the four measures are
//!
//! ```text
//! stat  = ‖∇ cost + ∇ dynᵀ pi + Jᵀ(lam_upper − lam_lower)‖∞
//! eq    = ‖A x + B u + b − x⁺‖∞
//! ineq  = ‖max(lb − d, d − ub, 0)‖∞
//! comp  = ‖lam_lower ∘ (d − lb), lam_upper ∘ (ub − d)‖∞
//! ```
//!
//! with `d = [u[idxbu]; x[idxbx]; Cx + Du]`. Bounds at or beyond the data's
//! infinity sentinel are treated as absent.

use nalgebra::DVector;

use crate::data::OcpQpData;
use crate::dims::OcpQpDims;
use crate::solution::OcpQpSolution;

/// Infinity norms of the four optimality residuals.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QpResiduals {
    pub stat: f64,
    pub eq: f64,
    pub ineq: f64,
    pub comp: f64,
}

impl QpResiduals {
    /// Largest of the four measures.
    pub fn max(&self) -> f64 {
        nan_max(nan_max(self.stat, self.eq), nan_max(self.ineq, self.comp))
    }

    /// All four measures are finite.
    pub fn is_finite(&self) -> bool {
        self.stat.is_finite() && self.eq.is_finite() && self.ineq.is_finite() && self.comp.is_finite()
    }
}

/// `max` that keeps NaN instead of discarding it.
#[inline]
fn nan_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.max(b)
    }
}

#[inline]
fn inf_norm(v: &DVector<f64>) -> f64 {
    v.iter().fold(0.0, |acc, &x| nan_max(acc, x.abs()))
}

/// Evaluate the residuals of `sol` for the QP `data`.
///
/// Pure function: neither argument is modified.
pub fn compute_residuals(dims: &OcpQpDims, data: &OcpQpData, sol: &OcpQpSolution) -> QpResiduals {
    let n = dims.horizon();
    let mut res = QpResiduals::default();

    for i in 0..=n {
        let st = data.stage(i);
        let u = &sol.u[i];
        let x = &sol.x[i];
        let nbu = st.idxbu.len();
        let nbx = st.idxbx.len();
        let ng = st.lg.len();

        // Gradient of the Lagrangian w.r.t. (u, x).
        let mut r_u = &st.R * u + &st.S * x + &st.r;
        let mut r_x = &st.Q * x + st.S.tr_mul(u) + &st.q;
        if i < n {
            let pi = &sol.pi[i];
            r_u += st.B.tr_mul(pi);
            r_x += st.A.tr_mul(pi);
        }
        if i > 0 {
            r_x -= &sol.pi[i - 1];
        }

        let lam_l = &sol.lam_lower[i];
        let lam_u = &sol.lam_upper[i];
        let net = lam_u - lam_l;
        for (k, &j) in st.idxbu.iter().enumerate() {
            r_u[j] += net[k];
        }
        for (k, &j) in st.idxbx.iter().enumerate() {
            r_x[j] += net[nbu + k];
        }
        if ng > 0 {
            let net_g = net.rows(nbu + nbx, ng);
            r_u += st.D.tr_mul(&net_g);
            r_x += st.C.tr_mul(&net_g);
        }
        res.stat = nan_max(res.stat, nan_max(inf_norm(&r_u), inf_norm(&r_x)));

        if i < n {
            let defect = &st.A * x + &st.B * u + &st.b - &sol.x[i + 1];
            res.eq = nan_max(res.eq, inf_norm(&defect));
        }

        let d = st.constraint_values(u, x);
        for k in 0..d.len() {
            let (lb, ub) = st.constraint_bounds(k);
            if data.is_lower_active(lb) {
                let slack = d[k] - lb;
                res.ineq = nan_max(res.ineq, -slack);
                res.comp = nan_max(res.comp, (lam_l[k] * slack).abs());
            }
            if data.is_upper_active(ub) {
                let slack = ub - d[k];
                res.ineq = nan_max(res.ineq, -slack);
                res.comp = nan_max(res.comp, (lam_u[k] * slack).abs());
            }
        }
    }

    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    /// min ½x₀² + ½x₁² + ½u² s.t. x₁ = x₀ + u, with x₀ bounded to [1, 1].
    fn tiny_qp() -> (OcpQpDims, OcpQpData) {
        let dims = OcpQpDims::new(vec![1, 1], vec![1, 0], vec![1, 0], vec![0, 0], vec![0, 0]).unwrap();
        let mut data = OcpQpData::zeros(&dims);
        {
            let s0 = data.stage_mut(0);
            s0.Q = DMatrix::identity(1, 1);
            s0.R = DMatrix::identity(1, 1);
            s0.A = DMatrix::identity(1, 1);
            s0.B = DMatrix::identity(1, 1);
            s0.lbx = DVector::from_element(1, 1.0);
            s0.ubx = DVector::from_element(1, 1.0);
        }
        data.stage_mut(1).Q = DMatrix::identity(1, 1);
        (dims, data)
    }

    #[test]
    fn test_optimal_point_has_zero_residuals() {
        let (dims, data) = tiny_qp();
        // u = -x₀/2, x₁ = x₀/2, pi = x₁, stationarity in x₀: x₀ + pi + (lam_u - lam_l) = 0
        let mut sol = OcpQpSolution::zeros(&dims);
        sol.x[0][0] = 1.0;
        sol.u[0][0] = -0.5;
        sol.x[1][0] = 0.5;
        sol.pi[0][0] = 0.5;
        sol.lam_lower[0][0] = 1.5;
        let res = compute_residuals(&dims, &data, &sol);
        assert!(res.max() < 1e-14, "{res:?}");
    }

    #[test]
    fn test_violations_reported() {
        let (dims, data) = tiny_qp();
        let mut sol = OcpQpSolution::zeros(&dims);
        sol.x[0][0] = 0.0; // violates x₀ = 1
        sol.x[1][0] = 2.0; // dynamics defect 2
        let res = compute_residuals(&dims, &data, &sol);
        assert!((res.ineq - 1.0).abs() < 1e-14);
        assert!((res.eq - 2.0).abs() < 1e-14);
        assert!(res.stat > 0.0);
    }

    #[test]
    fn test_nan_propagates() {
        let (dims, data) = tiny_qp();
        let mut sol = OcpQpSolution::zeros(&dims);
        sol.pi[0][0] = f64::NAN;
        let res = compute_residuals(&dims, &data, &sol);
        assert!(res.stat.is_nan());
        assert!(!res.is_finite());
        assert!(res.max().is_nan());
    }

    #[test]
    fn test_sentinel_bounds_ignored() {
        let (dims, mut data) = tiny_qp();
        let inf = data.inf_bound();
        data.stage_mut(0).lbx[0] = -inf;
        data.stage_mut(0).ubx[0] = inf;
        let mut sol = OcpQpSolution::zeros(&dims);
        sol.lam_lower[0][0] = 5.0;
        let res = compute_residuals(&dims, &data, &sol);
        assert_eq!(res.ineq, 0.0);
        assert_eq!(res.comp, 0.0);
    }
}
