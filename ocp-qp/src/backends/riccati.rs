//! Backward Riccati recursion.
//!
//! Solves QPs whose only constraint is an optionally fixed initial state:
//!
//! ```text
//! H_k  = R + Bᵀ P B          G_k = S + Bᵀ P A          g_k = r + Bᵀ (P b + p)
//! K_k  = −H_k⁻¹ G_k          k_k = −H_k⁻¹ g_k
//! P_k  = Q + Aᵀ P A + G_kᵀ K_k
//! p_k  = q + Aᵀ (P b + p) + G_kᵀ k_k
//! ```
//!
//! starting from `P_N = Q_N`, `p_N = q_N`. Multipliers of the dynamics are
//! the value-function gradients `pi_k = P_{k+1} x_{k+1} + p_{k+1}`.

use std::time::Instant;

use nalgebra::{Cholesky, DMatrix, DVector};
use tracing::trace;

use crate::backend::{BackendSettings, OptionValue, QpBackend};
use crate::data::OcpQpData;
use crate::dims::OcpQpDims;
use crate::error::{OcpError, OcpResult};
use crate::solution::{OcpQpSolution, QpStatus};

/// Raw return code: a reduced Hessian was not positive definite.
pub const CODE_FACTORIZATION: i32 = 1;
/// Raw return code: bound data describes an inequality on the initial state.
pub const CODE_UNSUPPORTED: i32 = 2;

/// Settings of the Riccati backend.
#[derive(Debug, Clone, Default)]
pub struct RiccatiSettings {
    /// Diagonal shift added to every reduced Hessian before factorization.
    pub reg_eps: f64,
}

impl BackendSettings for RiccatiSettings {
    fn set_option(&mut self, key: &str, value: &OptionValue) -> OcpResult<()> {
        match key {
            "reg_eps" => self.reg_eps = value.as_tolerance(key)?,
            _ => {
                return Err(OcpError::UnknownOption { backend: "riccati".into(), key: key.to_string() });
            }
        }
        Ok(())
    }
}

/// Riccati solver memory for a fixed horizon shape.
#[derive(Debug)]
#[allow(non_snake_case)]
pub struct RiccatiBackend {
    settings: RiccatiSettings,
    /// Value-function Hessians `P_k`.
    P: Vec<DMatrix<f64>>,
    /// Value-function gradients `p_k`.
    p: Vec<DVector<f64>>,
    /// Feedback gains.
    K: Vec<DMatrix<f64>>,
    /// Feedforward terms.
    k: Vec<DVector<f64>>,
    fixed_x0: bool,
}

impl RiccatiBackend {
    /// Create the memory, rejecting shapes the recursion cannot handle.
    ///
    /// Supported: no general constraints, no control bounds, no state bounds
    /// past stage 0, and either no bounds or all states bounded on stage 0.
    pub fn new(dims: &OcpQpDims, settings: RiccatiSettings) -> OcpResult<Self> {
        for i in 0..dims.num_stages() {
            let unsupported = if dims.ng()[i] > 0 {
                Some("general constraints")
            } else if dims.nbu()[i] > 0 {
                Some("control bounds")
            } else if i > 0 && dims.nbx()[i] > 0 {
                Some("state bounds after the initial stage")
            } else if i == 0 && dims.nbx()[0] != 0 && dims.nbx()[0] != dims.nx()[0] {
                Some("a partially bounded initial state")
            } else {
                None
            };
            if let Some(what) = unsupported {
                return Err(OcpError::Usage(format!(
                    "QP solver 'riccati' does not support {what} (stage {i})"
                )));
            }
        }

        let stages = dims.num_stages();
        let nx = dims.nx();
        let nu = dims.nu();
        Ok(Self {
            settings,
            P: (0..stages).map(|i| DMatrix::zeros(nx[i], nx[i])).collect(),
            p: (0..stages).map(|i| DVector::zeros(nx[i])).collect(),
            K: (0..stages).map(|i| DMatrix::zeros(nu[i], nx[i])).collect(),
            k: (0..stages).map(|i| DVector::zeros(nu[i])).collect(),
            fixed_x0: dims.nbx()[0] > 0,
        })
    }

    /// Backward sweep. Returns `false` if a reduced Hessian is not positive definite.
    #[allow(non_snake_case)]
    fn factorize(&mut self, dims: &OcpQpDims, qp: &OcpQpData) -> bool {
        let n = dims.horizon();
        self.P[n].copy_from(&qp.stage(n).Q);
        self.p[n].copy_from(&qp.stage(n).q);

        for i in (0..n).rev() {
            let st = qp.stage(i);
            let P = &self.P[i + 1];
            let Pb_p = P * &st.b + &self.p[i + 1];
            let PA = P * &st.A;
            let PB = P * &st.B;

            let G = &st.S + st.B.tr_mul(&PA);
            let g = &st.r + st.B.tr_mul(&Pb_p);

            if dims.nu()[i] > 0 {
                let mut H = &st.R + st.B.tr_mul(&PB);
                if self.settings.reg_eps > 0.0 {
                    for j in 0..H.nrows() {
                        H[(j, j)] += self.settings.reg_eps;
                    }
                }
                let Some(chol) = Cholesky::new(H) else {
                    trace!(stage = i, "reduced Hessian not positive definite");
                    return false;
                };
                self.K[i] = -chol.solve(&G);
                self.k[i] = -chol.solve(&g);
            }

            let mut P_i = &st.Q + st.A.tr_mul(&PA) + G.tr_mul(&self.K[i]);
            let sym = (&P_i + P_i.transpose()) * 0.5;
            P_i = sym;
            let p_i = &st.q + st.A.tr_mul(&Pb_p) + G.tr_mul(&self.k[i]);
            self.P[i] = P_i;
            self.p[i] = p_i;
        }
        true
    }
}

impl QpBackend for RiccatiBackend {
    fn name(&self) -> &'static str {
        "riccati"
    }

    fn solve(&mut self, dims: &OcpQpDims, qp: &OcpQpData, sol: &mut OcpQpSolution) -> QpStatus {
        let start = Instant::now();
        let n = dims.horizon();

        // Fixed x0 requires lbx == ubx on every entry.
        let s0 = qp.stage(0);
        if self.fixed_x0 && s0.lbx().iter().zip(s0.ubx().iter()).any(|(l, u)| l != u) {
            return QpStatus::Failure { code: CODE_UNSUPPORTED };
        }

        if !self.factorize(dims, qp) {
            return QpStatus::Failure { code: CODE_FACTORIZATION };
        }

        if self.fixed_x0 {
            // Index set on stage 0 is the identity when every state is bounded.
            for (k, &j) in s0.idxbx().iter().enumerate() {
                sol.x[0][j] = s0.ubx()[k];
            }
        } else if dims.nx()[0] > 0 {
            let Some(chol) = Cholesky::new(self.P[0].clone()) else {
                return QpStatus::Failure { code: CODE_FACTORIZATION };
            };
            sol.x[0] = -chol.solve(&self.p[0]);
        }

        for i in 0..n {
            let st = qp.stage(i);
            sol.u[i] = &self.K[i] * &sol.x[i] + &self.k[i];
            sol.x[i + 1] = &st.A * &sol.x[i] + &st.B * &sol.u[i] + &st.b;
            sol.pi[i] = &self.P[i + 1] * &sol.x[i + 1] + &self.p[i + 1];
        }

        for (l, u) in sol.lam_lower.iter_mut().zip(sol.lam_upper.iter_mut()) {
            l.fill(0.0);
            u.fill(0.0);
        }
        if self.fixed_x0 {
            // Stationarity in x0: grad + lam_upper − lam_lower = 0.
            let mut grad = &s0.Q * &sol.x[0] + s0.S.tr_mul(&sol.u[0]) + &s0.q;
            if n > 0 {
                grad += s0.A.tr_mul(&sol.pi[0]);
            }
            for (k, &j) in s0.idxbx().iter().enumerate() {
                sol.lam_upper[0][k] = (-grad[j]).max(0.0);
                sol.lam_lower[0][k] = grad[j].max(0.0);
            }
        }

        sol.info.iterations = 0;
        sol.info.solve_time = start.elapsed().as_secs_f64();
        QpStatus::Success
    }
}
