//! The SQP iteration engine.

use std::fmt;
use std::time::Instant;

use nalgebra::DVector;
use ocp_qp::{BackendKind, OcpQp, OcpQpSolution, OptionValue, QpResiduals, QpStatus};
use rayon::ThreadPool;
use tracing::{debug, info, warn};

use crate::error::{SqpError, SqpResult};
use crate::linearize::{linearize_all, write_hessian, write_stage, Iterate, StageLinearization};
use crate::nlp::OcpNlp;
use crate::options::{QpLimitPolicy, SqpOptions};
use crate::regularize::{regularize_stage, Regularization};
use crate::stats::SqpStats;
use crate::timings::{Phase, SqpTimings};

/// Terminal status of an SQP run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqpStatus {
    /// All four residuals within tolerance.
    Success,
    /// `max_iter` QP solves without convergence.
    MaxIter,
    /// A QP stopped at its own limit under [`QpLimitPolicy::Abort`].
    QpLimit(QpStatus),
}

impl SqpStatus {
    #[inline]
    pub fn is_success(self) -> bool {
        matches!(self, SqpStatus::Success)
    }
}

impl fmt::Display for SqpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqpStatus::Success => write!(f, "Success"),
            SqpStatus::MaxIter => write!(f, "reached maximum number of SQP iterations"),
            SqpStatus::QpLimit(status) => write!(f, "QP solver stopped: {status}"),
        }
    }
}

/// Run state of the last [`SqpSolver::solve`].
#[derive(Debug, Clone)]
pub struct SqpMemory {
    /// `None` until a run terminates without error.
    pub status: Option<SqpStatus>,
    /// QP solves performed.
    pub sqp_iter: usize,
    /// NLP residuals at the final iterate.
    pub residuals: QpResiduals,
    /// Objective at the final iterate.
    pub cost: f64,
    pub timings: SqpTimings,
    pub stats: SqpStats,
}

impl SqpMemory {
    fn new(ext_qp_res: bool) -> Self {
        Self {
            status: None,
            sqp_iter: 0,
            residuals: QpResiduals::default(),
            cost: f64::NAN,
            timings: SqpTimings::default(),
            stats: SqpStats::new(ext_qp_res),
        }
    }
}

/// SQP solver for one [`OcpNlp`].
///
/// Each iteration linearizes the problem at the current iterate into an
/// [`OcpQp`] in step form, evaluates the NLP residuals as the QP residuals
/// at a zero step, and, unless converged, solves the QP and takes the step.
pub struct SqpSolver {
    nlp: OcpNlp,
    opts: SqpOptions,
    qp: OcpQp,
    pool: Option<ThreadPool>,
    regularization: Box<dyn Regularization>,

    iterate: Iterate,
    /// Current multipliers; `u` and `x` are kept at zero so the QP residuals
    /// of this solution are the NLP residuals.
    mult: OcpQpSolution,
    qp_sol: OcpQpSolution,
    lin: Vec<StageLinearization>,
    has_solved: bool,

    memory: SqpMemory,
}

fn build_pool(num_threads: usize) -> SqpResult<Option<ThreadPool>> {
    if num_threads <= 1 {
        return Ok(None);
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map(Some)
        .map_err(|e| SqpError::ThreadPool(e.to_string()))
}

fn check_warm_start(opts: &SqpOptions) -> SqpResult<()> {
    if opts.qp_warm_start && !BackendKind::from_name(&opts.qp_solver)?.supports_warm_start() {
        return Err(SqpError::InvalidOptions(format!(
            "qp_warm_start is set but QP solver '{}' does not support warm starts",
            opts.qp_solver
        )));
    }
    Ok(())
}

impl SqpSolver {
    /// Validate `nlp` and `opts`, size the QP and initialize its backend.
    pub fn new(nlp: OcpNlp, opts: SqpOptions) -> SqpResult<Self> {
        opts.validate()?;
        check_warm_start(&opts)?;
        nlp.validate()?;

        let mut qp = OcpQp::new(nlp.qp_dims()?);
        qp.set_inf_bound(opts.inf_bound)?;
        let iterate = Iterate::initial(&nlp);
        let mult = OcpQpSolution::zeros(qp.dims());

        // Bounds first, so that initialization squeezes to the right active sets.
        let lin = linearize_all(&nlp, &iterate, qp.dims(), &mult, None)?;
        for (i, l) in lin.iter().enumerate() {
            write_stage(&mut qp, i, l)?;
        }
        qp.initialize_solver(&opts.qp_solver, &opts.qp_options)?;

        let pool = build_pool(opts.num_threads)?;
        let regularization = opts.regularization.build(opts.reg_epsilon);
        let mult = OcpQpSolution::zeros(qp.dims());
        let qp_sol = OcpQpSolution::zeros(qp.dims());
        let memory = SqpMemory::new(opts.ext_qp_res);
        Ok(Self { nlp, opts, qp, pool, regularization, iterate, mult, qp_sol, lin, has_solved: false, memory })
    }

    pub fn nlp(&self) -> &OcpNlp {
        &self.nlp
    }

    pub fn options(&self) -> &SqpOptions {
        &self.opts
    }

    /// The QP of the last iteration, for diagnostics.
    pub fn qp(&self) -> &OcpQp {
        &self.qp
    }

    pub fn memory(&self) -> &SqpMemory {
        &self.memory
    }

    pub fn states(&self) -> &[DVector<f64>] {
        &self.iterate.x
    }

    pub fn controls(&self) -> &[DVector<f64>] {
        &self.iterate.u
    }

    /// Dynamics multipliers, one vector per interval.
    pub fn equality_multipliers(&self) -> &[DVector<f64>] {
        &self.mult.pi
    }

    /// Bound and constraint multipliers per stage as `[lam_lower; lam_upper]`.
    pub fn inequality_multipliers(&self) -> Vec<Vec<f64>> {
        self.mult.inequality_multipliers()
    }

    /// Change one option by name.
    ///
    /// Changing the backend or its options reinitializes the QP solver. On
    /// error the solver keeps its previous options.
    pub fn set_option(&mut self, key: &str, value: &OptionValue) -> SqpResult<()> {
        let mut opts = self.opts.clone();
        opts.set(key, value)?;
        opts.validate()?;
        check_warm_start(&opts)?;

        if opts.qp_solver != self.opts.qp_solver || opts.qp_options != self.opts.qp_options {
            self.qp.initialize_solver(&opts.qp_solver, &opts.qp_options)?;
            self.mult.reset(self.qp.dims());
            self.qp_sol.reset(self.qp.dims());
        }
        if opts.num_threads != self.opts.num_threads {
            self.pool = build_pool(opts.num_threads)?;
        }
        if opts.inf_bound != self.opts.inf_bound {
            self.qp.set_inf_bound(opts.inf_bound)?;
        }
        self.regularization = opts.regularization.build(opts.reg_epsilon);
        self.opts = opts;
        Ok(())
    }

    /// Drop the previous solution; the next solve starts from the initial guess.
    pub fn reset(&mut self) {
        self.iterate = Iterate::initial(&self.nlp);
        self.mult.reset(self.qp.dims());
        self.qp_sol.reset(self.qp.dims());
        self.has_solved = false;
    }

    /// Run SQP iterations until convergence or a limit.
    ///
    /// Backend failures, regularization failures and non-finite residuals
    /// are returned as errors; the run state up to that point stays readable
    /// through [`SqpSolver::memory`].
    pub fn solve(&mut self) -> SqpResult<SqpStatus> {
        if !self.opts.reuse_workspace || !self.has_solved {
            self.reset();
        }
        self.memory = SqpMemory::new(self.opts.ext_qp_res);
        let start = Instant::now();
        let mut timings = SqpTimings::default();
        let result = self.run_iterations(&mut timings);
        timings.time_tot = start.elapsed();
        self.memory.timings = timings;

        let status = result?;
        self.memory.status = Some(status);
        self.has_solved = true;
        info!(
            %status,
            sqp_iter = self.memory.sqp_iter,
            res_stat = self.memory.residuals.stat,
            res_eq = self.memory.residuals.eq,
            res_ineq = self.memory.residuals.ineq,
            res_comp = self.memory.residuals.comp,
            time_tot = self.memory.timings.time_tot.as_secs_f64(),
            "SQP terminated"
        );
        Ok(status)
    }

    fn converged(&self, res: &QpResiduals) -> bool {
        res.stat <= self.opts.tol_stat
            && res.eq <= self.opts.tol_eq
            && res.ineq <= self.opts.tol_ineq
            && res.comp <= self.opts.tol_comp
    }

    fn run_iterations(&mut self, timings: &mut SqpTimings) -> SqpResult<SqpStatus> {
        let max_iter = self.opts.max_iter;
        for iter in 0..=max_iter {
            self.memory.sqp_iter = iter;

            timings.measure(Phase::Linearization, || -> SqpResult<()> {
                self.lin = linearize_all(&self.nlp, &self.iterate, self.qp.dims(), &self.mult, self.pool.as_ref())?;
                for (i, l) in self.lin.iter().enumerate() {
                    write_stage(&mut self.qp, i, l)?;
                }
                Ok(())
            })?;
            self.memory.cost = self.lin.iter().map(|l| l.cost).sum();

            if self.qp.needs_initializing() {
                self.qp.initialize_solver(&self.opts.qp_solver, &self.opts.qp_options)?;
                self.mult.reset(self.qp.dims());
                self.qp_sol.reset(self.qp.dims());
            }

            let res = timings.measure(Phase::Residuals, || self.qp.residuals(&self.mult))?;
            if !res.is_finite() {
                return Err(SqpError::NonFinite { what: "residuals", iter });
            }
            self.memory.residuals = res;
            let stats = &mut self.memory.stats;
            stats.push_row();
            stats.set("iter", iter as f64);
            stats.set("res_stat", res.stat);
            stats.set("res_eq", res.eq);
            stats.set("res_ineq", res.ineq);
            stats.set("res_comp", res.comp);
            debug!(iter, res_stat = res.stat, res_eq = res.eq, res_ineq = res.ineq, res_comp = res.comp, "SQP iteration");

            if self.converged(&res) {
                return Ok(SqpStatus::Success);
            }
            if iter == max_iter {
                return Ok(SqpStatus::MaxIter);
            }

            timings.measure(Phase::Regularization, || -> SqpResult<()> {
                for (i, l) in self.lin.iter_mut().enumerate() {
                    regularize_stage(self.regularization.as_ref(), i, &mut l.hess.xx, &mut l.hess.ux, &mut l.hess.uu)?;
                    write_hessian(&mut self.qp, i, &l.hess)?;
                }
                Ok(())
            })?;

            if self.opts.qp_warm_start && iter > 0 {
                self.qp.warm_start(&self.qp_sol)?;
            }
            let qp_status = timings.measure(Phase::QpSolve, || self.qp.solve_into(&mut self.qp_sol))?;
            let stats = &mut self.memory.stats;
            stats.set("qp_status", f64::from(qp_status.code()));
            stats.set("qp_iter", self.qp_sol.info.iterations as f64);

            if !qp_status.is_success() {
                let solver = self.qp.solver_name().unwrap_or("none").to_string();
                if !qp_status.is_limit() {
                    return Err(SqpError::QpFailure { solver, iter, code: qp_status.code() });
                }
                match self.opts.qp_limit_policy {
                    QpLimitPolicy::Abort => return Ok(SqpStatus::QpLimit(qp_status)),
                    QpLimitPolicy::Proceed => {
                        warn!(iter, %solver, %qp_status, "QP solver hit a limit, taking the step anyway");
                    }
                }
            }

            if self.opts.ext_qp_res {
                let qp_res = timings.measure(Phase::Residuals, || self.qp.residuals(&self.qp_sol))?;
                let stats = &mut self.memory.stats;
                stats.set("qp_res_stat", qp_res.stat);
                stats.set("qp_res_eq", qp_res.eq);
                stats.set("qp_res_ineq", qp_res.ineq);
                stats.set("qp_res_comp", qp_res.comp);
            }

            self.take_step();
            if !self.iterate.is_finite() {
                return Err(SqpError::NonFinite { what: "iterate", iter });
            }
        }
        Ok(SqpStatus::MaxIter)
    }

    /// `w ← w + α Δw`; multipliers `λ ← (1 − α) λ + α λ_qp`.
    fn take_step(&mut self) {
        let alpha = self.opts.step_length;
        let step = &self.qp_sol;
        for (x, dx) in self.iterate.x.iter_mut().zip(&step.x) {
            x.axpy(alpha, dx, 1.0);
        }
        for (u, du) in self.iterate.u.iter_mut().zip(&step.u) {
            u.axpy(alpha, du, 1.0);
        }
        let blend = |old: &mut Vec<DVector<f64>>, new: &[DVector<f64>]| {
            for (o, n) in old.iter_mut().zip(new) {
                o.axpy(alpha, n, 1.0 - alpha);
            }
        };
        blend(&mut self.mult.pi, &step.pi);
        blend(&mut self.mult.lam_lower, &step.lam_lower);
        blend(&mut self.mult.lam_upper, &step.lam_upper);
    }
}

impl fmt::Debug for SqpSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqpSolver")
            .field("nlp", &self.nlp)
            .field("qp_solver", &self.qp.solver_name())
            .field("regularization", &self.regularization.name())
            .field("status", &self.memory.status)
            .finish()
    }
}
