//! The OCP-QP facade: data, bounds, and one initialized solver.

use std::fmt;

use tracing::{debug, info};

use crate::backend::{BackendOptions, QpBackend};
use crate::backends::BackendKind;
use crate::bounds::{BoundSide, BoundsManager, VarClass};
use crate::data::OcpQpData;
use crate::dims::OcpQpDims;
use crate::error::{OcpError, OcpResult};
use crate::field::Field;
use crate::residuals::{compute_residuals, QpResiduals};
use crate::solution::{OcpQpSolution, QpStatus};

struct SolverHandle {
    kind: BackendKind,
    options: BackendOptions,
    backend: Box<dyn QpBackend>,
}

/// A stage-structured QP with its bound bookkeeping and backend handle.
///
/// Writing a box bound whose set of finite entries differs from the current
/// index set expands the problem to full bound dimensions and invalidates
/// the solver; [`OcpQp::initialize_solver`] must be called again before the
/// next [`OcpQp::solve`].
pub struct OcpQp {
    dims: OcpQpDims,
    data: OcpQpData,
    bounds: BoundsManager,
    solver: Option<SolverHandle>,
    needs_init: bool,
    solution: OcpQpSolution,
}

impl OcpQp {
    /// Zero QP of the given shape. All box bounds start free.
    pub fn new(dims: OcpQpDims) -> Self {
        let data = OcpQpData::zeros(&dims);
        let bounds = BoundsManager::new(&dims);
        let solution = OcpQpSolution::zeros(&dims);
        Self { dims, data, bounds, solver: None, needs_init: true, solution }
    }

    /// Zero QP with identical counts on every stage.
    pub fn uniform(n: usize, nx: usize, nu: usize, nbx: usize, nbu: usize, ng: usize) -> OcpResult<Self> {
        Ok(Self::new(OcpQpDims::uniform(n, nx, nu, nbx, nbu, ng, 0)?))
    }

    pub fn dims(&self) -> &OcpQpDims {
        &self.dims
    }

    /// Number of intervals `N`.
    pub fn horizon(&self) -> usize {
        self.dims.horizon()
    }

    pub fn nx(&self) -> &[usize] {
        self.dims.nx()
    }

    pub fn nu(&self) -> &[usize] {
        self.dims.nu()
    }

    pub fn nbx(&self) -> &[usize] {
        self.dims.nbx()
    }

    pub fn nbu(&self) -> &[usize] {
        self.dims.nbu()
    }

    pub fn ng(&self) -> &[usize] {
        self.dims.ng()
    }

    pub fn data(&self) -> &OcpQpData {
        &self.data
    }

    /// Write one block by name.
    pub fn set_field(&mut self, field: &str, stage: usize, values: &[f64]) -> OcpResult<()> {
        self.set(field.parse()?, stage, values)
    }

    /// Write one block.
    pub fn set(&mut self, field: Field, stage: usize, values: &[f64]) -> OcpResult<()> {
        let expected = field.num_elements(&self.dims, stage)?;
        if values.len() != expected {
            return Err(OcpError::Shape { field: field.name().to_string(), stage, expected, got: values.len() });
        }

        let target = match field {
            Field::lbx => Some((VarClass::State, BoundSide::Lower)),
            Field::ubx => Some((VarClass::State, BoundSide::Upper)),
            Field::lbu => Some((VarClass::Control, BoundSide::Lower)),
            Field::ubu => Some((VarClass::Control, BoundSide::Upper)),
            _ => None,
        };
        match target {
            Some((class, side)) => {
                let changed = self.bounds.set_side(&mut self.dims, &mut self.data, stage, class, side, values)?;
                if changed {
                    self.mark_stale();
                }
            }
            None => {
                if let Some(block) = self.data.stage_mut(stage).block_mut(field) {
                    block.copy_from_slice(values);
                }
            }
        }
        Ok(())
    }

    /// Write the same block to every stage on which the field exists.
    pub fn set_field_all(&mut self, field: &str, values: &[f64]) -> OcpResult<()> {
        let field: Field = field.parse()?;
        let Some(last) = field.last_stage(&self.dims) else {
            return Ok(());
        };
        for stage in 0..=last {
            self.set(field, stage, values)?;
        }
        Ok(())
    }

    /// Read one block of one stage (column-major; box bounds as dense vectors).
    pub fn get_field_at(&self, field: &str, stage: usize) -> OcpResult<Vec<f64>> {
        let field: Field = field.parse()?;
        field.shape(&self.dims, stage)?;
        Ok(match field {
            Field::lbx => self.bounds.dense(stage, VarClass::State, BoundSide::Lower).to_vec(),
            Field::ubx => self.bounds.dense(stage, VarClass::State, BoundSide::Upper).to_vec(),
            Field::lbu => self.bounds.dense(stage, VarClass::Control, BoundSide::Lower).to_vec(),
            Field::ubu => self.bounds.dense(stage, VarClass::Control, BoundSide::Upper).to_vec(),
            _ => self.data.stage(stage).block(field).map(<[f64]>::to_vec).unwrap_or_default(),
        })
    }

    /// Read one block across every stage on which the field exists.
    pub fn get_field(&self, field: &str) -> OcpResult<Vec<Vec<f64>>> {
        let f: Field = field.parse()?;
        let Some(last) = f.last_stage(&self.dims) else {
            return Ok(Vec::new());
        };
        (0..=last).map(|stage| self.get_field_at(field, stage)).collect()
    }

    /// Write both sides of a dense box bound at once.
    pub fn set_bounds(&mut self, stage: usize, class: VarClass, lower: &[f64], upper: &[f64]) -> OcpResult<()> {
        let field = match class {
            VarClass::State => Field::lbx,
            VarClass::Control => Field::lbu,
        };
        field.shape(&self.dims, stage)?;
        let changed = self.bounds.set_both(&mut self.dims, &mut self.data, stage, class, lower, upper)?;
        if changed {
            self.mark_stale();
        }
        Ok(())
    }

    /// Dense bound vector as last written.
    pub fn dense_bounds(&self, stage: usize, class: VarClass, side: BoundSide) -> OcpResult<&[f64]> {
        if stage > self.dims.horizon() {
            return Err(OcpError::Range { field: "bounds".into(), stage, end: self.dims.horizon() + 1 });
        }
        Ok(self.bounds.dense(stage, class, side))
    }

    /// Current index sets of one variable class, per stage.
    pub fn bounds_indices(&self, class: VarClass) -> Vec<Vec<usize>> {
        self.data
            .stages()
            .iter()
            .map(|st| match class {
                VarClass::State => st.idxbx().to_vec(),
                VarClass::Control => st.idxbu().to_vec(),
            })
            .collect()
    }

    /// Override the index set of one stage. Invalidates the solver.
    pub fn set_bounds_indices(&mut self, class: VarClass, stage: usize, idx: &[usize]) -> OcpResult<()> {
        if stage > self.dims.horizon() {
            return Err(OcpError::Range { field: "idxb".into(), stage, end: self.dims.horizon() + 1 });
        }
        self.bounds.set_index_set(&self.dims, &mut self.data, stage, class, idx)?;
        self.mark_stale();
        Ok(())
    }

    /// Shrink `nbx`/`nbu` to the bounds that are actually finite.
    pub fn squeeze_dimensions(&mut self) {
        let plan = self.bounds.plan_squeeze();
        self.bounds.apply_squeeze(plan, &mut self.dims, &mut self.data);
        self.mark_stale();
    }

    /// Use full-dimension index sets on every stage.
    pub fn expand_dimensions(&mut self) {
        self.bounds.expand(&mut self.dims, &mut self.data);
        self.mark_stale();
    }

    /// Whether [`OcpQp::initialize_solver`] must run before the next solve.
    pub fn needs_initializing(&self) -> bool {
        self.needs_init || self.solver.is_none()
    }

    /// Magnitude substituted for infinite bounds at fill-in.
    pub fn set_inf_bound(&mut self, inf_bound: f64) -> OcpResult<()> {
        if !(inf_bound.is_finite() && inf_bound > 0.0) {
            return Err(OcpError::Usage(format!("infinity sentinel must be positive and finite, got {inf_bound}")));
        }
        self.data.inf_bound = inf_bound;
        Ok(())
    }

    pub fn inf_bound(&self) -> f64 {
        self.data.inf_bound
    }

    /// Name of the initialized backend, if any.
    pub fn solver_name(&self) -> Option<&'static str> {
        self.solver.as_ref().map(|h| h.kind.name())
    }

    /// Options the current backend was initialized with.
    pub fn solver_options(&self) -> Option<&BackendOptions> {
        self.solver.as_ref().map(|h| &h.options)
    }

    /// Squeeze the bound dimensions and create backend `name`.
    ///
    /// Every check runs against the planned squeezed shape before anything is
    /// committed: on error the QP and any previous solver are left as they were.
    pub fn initialize_solver(&mut self, name: &str, options: &BackendOptions) -> OcpResult<()> {
        let kind = BackendKind::from_name(name)?;
        let plan = self.bounds.plan_squeeze();
        let planned = plan.squeezed_dims(&self.dims);
        let mut config = kind.default_config();
        config.apply_options(options)?;
        let backend = config.build(&planned)?;

        self.bounds.apply_squeeze(plan, &mut self.dims, &mut self.data);
        self.solution = OcpQpSolution::zeros(&self.dims);
        self.solver = Some(SolverHandle { kind, options: options.clone(), backend });
        self.needs_init = false;
        info!(solver = name, nbx = ?self.dims.nbx(), nbu = ?self.dims.nbu(), "initialized QP solver");
        Ok(())
    }

    /// Whether the initialized backend makes use of [`OcpQp::warm_start`].
    pub fn supports_warm_start(&self) -> bool {
        self.solver.as_ref().is_some_and(|h| h.kind.supports_warm_start())
    }

    /// Offer a previous solution to the backend as a starting point.
    ///
    /// Fails with a usage error when the backend cannot use one.
    pub fn warm_start(&mut self, previous: &OcpQpSolution) -> OcpResult<()> {
        let Some(h) = self.solver.as_mut() else {
            return Err(OcpError::StaleState(None));
        };
        if !h.kind.supports_warm_start() {
            return Err(OcpError::Usage(format!("QP solver '{}' does not support warm starts", h.kind.name())));
        }
        if !previous.matches(&self.dims) {
            return Err(OcpError::Usage("warm-start solution does not match the QP dimensions".into()));
        }
        h.backend.warm_start(previous);
        Ok(())
    }

    /// Solve into the internal solution and return it.
    pub fn solve(&mut self) -> OcpResult<&OcpQpSolution> {
        run_solve(self.solver.as_mut(), self.needs_init, &self.dims, &mut self.data, &self.bounds, &mut self.solution)?;
        Ok(&self.solution)
    }

    /// Solve into a caller-owned solution, resized if needed.
    pub fn solve_into(&mut self, out: &mut OcpQpSolution) -> OcpResult<QpStatus> {
        run_solve(self.solver.as_mut(), self.needs_init, &self.dims, &mut self.data, &self.bounds, out)
    }

    /// Result of the last [`OcpQp::solve`].
    pub fn solution(&self) -> &OcpQpSolution {
        &self.solution
    }

    /// KKT residuals of `sol` for the current data.
    pub fn residuals(&self, sol: &OcpQpSolution) -> OcpResult<QpResiduals> {
        if !sol.matches(&self.dims) {
            return Err(OcpError::Usage("solution does not match the QP dimensions".into()));
        }
        Ok(compute_residuals(&self.dims, &self.data, sol))
    }

    fn mark_stale(&mut self) {
        if !self.needs_init {
            debug!(solver = ?self.solver_name(), "QP solver invalidated by a dimension change");
        }
        self.needs_init = true;
    }
}

fn run_solve(
    handle: Option<&mut SolverHandle>,
    needs_init: bool,
    dims: &OcpQpDims,
    data: &mut OcpQpData,
    bounds: &BoundsManager,
    out: &mut OcpQpSolution,
) -> OcpResult<QpStatus> {
    let Some(handle) = handle else {
        return Err(OcpError::StaleState(None));
    };
    if needs_init {
        return Err(OcpError::StaleState(Some(handle.kind.name().to_string())));
    }
    bounds.fill_in(dims, data);
    out.reset(dims);
    let status = handle.backend.solve(dims, data, out);
    out.status = status;
    debug!(
        solver = handle.backend.name(),
        %status,
        iterations = out.info.iterations,
        time = out.info.solve_time,
        "QP solve"
    );
    Ok(status)
}

impl fmt::Display for OcpQp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dims)?;
        match self.solver_name() {
            Some(name) if !self.needs_init => writeln!(f, "solver: {name}"),
            Some(name) => writeln!(f, "solver: {name} (needs reinitialization)"),
            None => writeln!(f, "solver: none"),
        }
    }
}
