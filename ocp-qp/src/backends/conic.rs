//! Shared plumbing for the Clarabel backends.
//!
//! Clarabel solves
//!
//! ```text
//! min ½ zᵀ P z + cᵀ z   s.t.  M z + s = h,  s ∈ K
//! ```
//!
//! with `K` a product of zero and non-negative cones. Stage constraints
//! `l ≤ a·v ≤ u` become one `Zero` row when `l == u` and otherwise up to two
//! `Nonnegative` rows (`−a·v + s = −l`, `a·v + s = u`); bounds at or beyond
//! the infinity sentinel produce no row.

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettings, DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus, SupportedConeT,
};
use nalgebra::DMatrix;
use sprs::TriMat;
use tracing::debug;

use crate::backend::{BackendSettings, OptionValue};
use crate::data::{OcpQpData, StageData};
use crate::error::{OcpError, OcpResult};
use crate::solution::{OcpQpSolution, QpStatus};

/// Interior-point settings shared by both Clarabel backends.
#[derive(Debug, Clone)]
pub struct ClarabelSettings {
    pub max_iter: u32,
    pub time_limit: f64,
    pub tol_feas: f64,
    pub tol_gap_abs: f64,
    pub tol_gap_rel: f64,
    pub equilibrate: bool,
    pub verbose: bool,
}

impl Default for ClarabelSettings {
    fn default() -> Self {
        Self {
            max_iter: 200,
            time_limit: f64::INFINITY,
            tol_feas: 1e-8,
            tol_gap_abs: 1e-8,
            tol_gap_rel: 1e-8,
            equilibrate: true,
            verbose: false,
        }
    }
}

impl ClarabelSettings {
    pub fn with_max_iter(mut self, max_iter: u32) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tol_feas = tol;
        self.tol_gap_abs = tol;
        self.tol_gap_rel = tol;
        self
    }

    pub(crate) fn to_clarabel(&self) -> Option<DefaultSettings<f64>> {
        DefaultSettingsBuilder::default()
            .max_iter(self.max_iter)
            .time_limit(self.time_limit)
            .tol_feas(self.tol_feas)
            .tol_gap_abs(self.tol_gap_abs)
            .tol_gap_rel(self.tol_gap_rel)
            .equilibrate_enable(self.equilibrate)
            .verbose(self.verbose)
            .build()
            .ok()
    }
}

impl BackendSettings for ClarabelSettings {
    fn set_option(&mut self, key: &str, value: &OptionValue) -> OcpResult<()> {
        match key {
            "max_iter" => {
                let v = value.as_usize(key)?;
                self.max_iter = u32::try_from(v).map_err(|_| OcpError::InvalidOption {
                    key: key.to_string(),
                    reason: format!("{v} does not fit in 32 bits"),
                })?;
            }
            "time_limit" => {
                let v = value.as_f64(key)?;
                if v.is_nan() || v <= 0.0 {
                    return Err(OcpError::InvalidOption {
                        key: key.to_string(),
                        reason: format!("expected a positive duration, got {v}"),
                    });
                }
                self.time_limit = v;
            }
            "tol_feas" => self.tol_feas = value.as_tolerance(key)?,
            "tol_gap_abs" => self.tol_gap_abs = value.as_tolerance(key)?,
            "tol_gap_rel" => self.tol_gap_rel = value.as_tolerance(key)?,
            "tol" => {
                let tol = value.as_tolerance(key)?;
                *self = self.clone().with_tolerance(tol);
            }
            "equilibrate" => self.equilibrate = value.as_bool(key)?,
            "verbose" => self.verbose = value.as_bool(key)?,
            _ => {
                return Err(OcpError::UnknownOption { backend: "clarabel".into(), key: key.to_string() });
            }
        }
        Ok(())
    }
}

/// Raw numeric code of a Clarabel status, as reported in `Failure`.
pub(crate) fn raw_code(status: &SolverStatus) -> i32 {
    match status {
        SolverStatus::Solved => 1,
        SolverStatus::AlmostSolved => 2,
        SolverStatus::PrimalInfeasible => 3,
        SolverStatus::DualInfeasible => 4,
        SolverStatus::AlmostPrimalInfeasible => 5,
        SolverStatus::AlmostDualInfeasible => 6,
        SolverStatus::MaxIterations => 7,
        SolverStatus::MaxTime => 8,
        SolverStatus::NumericalError => 9,
        SolverStatus::InsufficientProgress => 10,
        _ => -1,
    }
}

/// Uniform status for a Clarabel outcome.
pub(crate) fn map_status(status: &SolverStatus) -> QpStatus {
    match status {
        SolverStatus::Solved | SolverStatus::AlmostSolved => QpStatus::Success,
        SolverStatus::MaxIterations => QpStatus::MaxIter,
        SolverStatus::InsufficientProgress => QpStatus::MinStep,
        other => QpStatus::Failure { code: raw_code(other) },
    }
}

/// Code reported when the conic problem could not even be set up.
pub(crate) const CODE_SETUP: i32 = -2;

/// Where a constraint row's dual goes in the OCP-QP solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RowRole {
    /// Component `comp` of the dynamics linking `stage` to `stage + 1`.
    Dynamics { stage: usize, comp: usize },
    /// Lower side of stage constraint `k`.
    Lower { stage: usize, k: usize },
    /// Upper side of stage constraint `k`.
    Upper { stage: usize, k: usize },
    /// Stage constraint `k` with equal lower and upper bound.
    Equality { stage: usize, k: usize },
}

#[derive(Debug, Clone)]
struct ConicRow {
    coeffs: Vec<(usize, f64)>,
    rhs: f64,
    role: RowRole,
}

/// Collects constraint rows and emits Clarabel's `(M, h, K)`.
#[derive(Debug)]
pub(crate) struct ConicAssembler {
    n_vars: usize,
    zero: Vec<ConicRow>,
    nonneg: Vec<ConicRow>,
}

/// Assembled constraint data. Row `j` of `m` has dual `roles[j]`.
pub(crate) struct ConicProblem {
    pub m: CscMatrix<f64>,
    pub h: Vec<f64>,
    pub cones: Vec<SupportedConeT<f64>>,
    pub roles: Vec<RowRole>,
}

impl ConicAssembler {
    pub fn new(n_vars: usize) -> Self {
        Self { n_vars, zero: Vec::new(), nonneg: Vec::new() }
    }

    /// `coeffs · z == rhs`.
    pub fn push_equality(&mut self, coeffs: Vec<(usize, f64)>, rhs: f64, role: RowRole) {
        self.zero.push(ConicRow { coeffs, rhs, role });
    }

    /// `lb ≤ coeffs · z + offset ≤ ub` for stage constraint `(stage, k)`.
    pub fn push_two_sided(
        &mut self,
        qp: &OcpQpData,
        coeffs: Vec<(usize, f64)>,
        offset: f64,
        (lb, ub): (f64, f64),
        stage: usize,
        k: usize,
    ) {
        let lower = qp.is_lower_active(lb);
        let upper = qp.is_upper_active(ub);
        if lower && upper && lb == ub {
            self.push_equality(coeffs, ub - offset, RowRole::Equality { stage, k });
            return;
        }
        if lower {
            let neg = coeffs.iter().map(|&(j, a)| (j, -a)).collect();
            self.nonneg.push(ConicRow { coeffs: neg, rhs: offset - lb, role: RowRole::Lower { stage, k } });
        }
        if upper {
            self.nonneg.push(ConicRow { coeffs, rhs: ub - offset, role: RowRole::Upper { stage, k } });
        }
    }

    /// Zero-cone rows first, then non-negative rows.
    pub fn finish(self) -> ConicProblem {
        let n_zero = self.zero.len();
        let n_nonneg = self.nonneg.len();
        let mut tri = TriMat::new((n_zero + n_nonneg, self.n_vars));
        let mut h = Vec::with_capacity(n_zero + n_nonneg);
        let mut roles = Vec::with_capacity(n_zero + n_nonneg);
        for (row, r) in self.zero.into_iter().chain(self.nonneg).enumerate() {
            for (col, v) in r.coeffs {
                if v != 0.0 {
                    tri.add_triplet(row, col, v);
                }
            }
            h.push(r.rhs);
            roles.push(r.role);
        }
        let mut cones = Vec::with_capacity(2);
        if n_zero > 0 {
            cones.push(SupportedConeT::ZeroConeT(n_zero));
        }
        if n_nonneg > 0 {
            cones.push(SupportedConeT::NonnegativeConeT(n_nonneg));
        }
        ConicProblem { m: triplets_to_csc(tri), h, cones, roles }
    }
}

pub(crate) fn triplets_to_csc(tri: TriMat<f64>) -> CscMatrix<f64> {
    let (rows, cols) = tri.shape();
    let csc: sprs::CsMat<f64> = tri.to_csc();
    let (colptr, rowval, nzval) = csc.into_raw_storage();
    CscMatrix::new(rows, cols, colptr, rowval, nzval)
}

/// Upper triangle of a dense symmetric matrix in CSC form.
pub(crate) fn dense_upper_to_csc(p: &DMatrix<f64>) -> CscMatrix<f64> {
    let n = p.nrows();
    let mut tri = TriMat::new((n, n));
    for j in 0..n {
        for i in 0..=j {
            let v = p[(i, j)];
            if v != 0.0 {
                tri.add_triplet(i, j, v);
            }
        }
    }
    triplets_to_csc(tri)
}

/// Row `k` of the stage constraint vector `[u[idxbu]; x[idxbx]; Cx + Du]`
/// as sparse coefficients on `u` and on `x`.
pub(crate) fn stage_row(st: &StageData, k: usize) -> (Vec<(usize, f64)>, Vec<(usize, f64)>) {
    let nbu = st.idxbu().len();
    let nbx = st.idxbx().len();
    if k < nbu {
        (vec![(st.idxbu()[k], 1.0)], Vec::new())
    } else if k < nbu + nbx {
        (Vec::new(), vec![(st.idxbx()[k - nbu], 1.0)])
    } else {
        let g = k - nbu - nbx;
        let du = st.D.row(g).iter().copied().enumerate().filter(|&(_, v)| v != 0.0).collect();
        let cx = st.C.row(g).iter().copied().enumerate().filter(|&(_, v)| v != 0.0).collect();
        (du, cx)
    }
}

/// Primal-dual result of one Clarabel run.
pub(crate) struct ConicOutcome {
    pub status: QpStatus,
    pub x: Vec<f64>,
    pub z: Vec<f64>,
    pub iterations: usize,
}

/// Run Clarabel on `min ½zᵀPz + cᵀz` subject to `prob`.
///
/// Returns `None` if the problem data or settings are rejected before the
/// first iteration.
pub(crate) fn solve_conic(
    p: &CscMatrix<f64>,
    c: &[f64],
    prob: &ConicProblem,
    settings: &ClarabelSettings,
) -> Option<ConicOutcome> {
    let settings = settings.to_clarabel()?;
    let mut solver = match DefaultSolver::new(p, c, &prob.m, &prob.h, &prob.cones, settings) {
        Ok(solver) => solver,
        Err(e) => {
            debug!(error = ?e, "clarabel rejected problem data");
            return None;
        }
    };
    solver.solve();
    let sol = &solver.solution;
    debug!(status = ?sol.status, iterations = sol.iterations, "clarabel finished");
    Some(ConicOutcome {
        status: map_status(&sol.status),
        x: sol.x.clone(),
        z: sol.z.clone(),
        iterations: sol.iterations as usize,
    })
}

/// Scatter the duals of stage-constraint rows into `sol`.
///
/// Dynamics rows are left to the caller. Equality rows split their signed
/// dual into the lower or upper multiplier.
pub(crate) fn scatter_bound_duals(roles: &[RowRole], z: &[f64], sol: &mut OcpQpSolution) {
    for l in sol.lam_lower.iter_mut().chain(sol.lam_upper.iter_mut()) {
        l.fill(0.0);
    }
    for (role, &y) in roles.iter().zip(z) {
        match *role {
            RowRole::Lower { stage, k } => sol.lam_lower[stage][k] = y.max(0.0),
            RowRole::Upper { stage, k } => sol.lam_upper[stage][k] = y.max(0.0),
            RowRole::Equality { stage, k } => {
                sol.lam_upper[stage][k] = y.max(0.0);
                sol.lam_lower[stage][k] = (-y).max(0.0);
            }
            RowRole::Dynamics { .. } => {}
        }
    }
}
