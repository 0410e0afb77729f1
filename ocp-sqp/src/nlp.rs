//! Nonlinear OCP definition: stage shapes, plugins, bounds, initial guess.

use std::fmt;
use std::sync::Arc;

use nalgebra::DVector;
use ocp_qp::OcpQpDims;

use crate::error::{SqpError, SqpResult};
use crate::model::{Constraint, Dynamics, StageCost};

/// General constraint `lg ≤ g(x, u) ≤ ug` attached to one stage.
#[derive(Clone)]
pub(crate) struct StageConstraint {
    pub(crate) function: Arc<dyn Constraint>,
    pub(crate) lg: DVector<f64>,
    pub(crate) ug: DVector<f64>,
}

#[derive(Clone)]
pub(crate) struct NlpStage {
    pub(crate) dynamics: Option<Arc<dyn Dynamics>>,
    pub(crate) cost: Option<Arc<dyn StageCost>>,
    pub(crate) constraint: Option<StageConstraint>,
    pub(crate) lbx: Vec<f64>,
    pub(crate) ubx: Vec<f64>,
    pub(crate) lbu: Vec<f64>,
    pub(crate) ubu: Vec<f64>,
    pub(crate) x_init: DVector<f64>,
    pub(crate) u_init: DVector<f64>,
}

impl NlpStage {
    fn free(nx: usize, nu: usize) -> Self {
        Self {
            dynamics: None,
            cost: None,
            constraint: None,
            lbx: vec![f64::NEG_INFINITY; nx],
            ubx: vec![f64::INFINITY; nx],
            lbu: vec![f64::NEG_INFINITY; nu],
            ubu: vec![f64::INFINITY; nu],
            x_init: DVector::zeros(nx),
            u_init: DVector::zeros(nu),
        }
    }

    pub(crate) fn ng(&self) -> usize {
        self.constraint.as_ref().map_or(0, |c| c.lg.len())
    }
}

/// Optimal control problem over stages `0..=N`
///
/// ```text
/// min  Σ_i l_i(x_i, u_i)
/// s.t. x_{i+1} = f_i(x_i, u_i),  lbx ≤ x_i ≤ ubx,  lbu ≤ u_i ≤ ubu,  lg ≤ g_i(x_i, u_i) ≤ ug
/// ```
///
/// Box bounds are dense with `±∞` marking free entries. Stages without a cost
/// contribute zero; every stage `i < N` needs dynamics before solving.
#[derive(Clone)]
pub struct OcpNlp {
    nx: Vec<usize>,
    nu: Vec<usize>,
    pub(crate) stages: Vec<NlpStage>,
}

impl OcpNlp {
    /// Problem with per-stage state and control counts. `nu[N]` is forced to 0.
    pub fn new(nx: Vec<usize>, mut nu: Vec<usize>) -> SqpResult<Self> {
        if nx.is_empty() {
            return Err(SqpError::InvalidProblem("at least one stage is required".into()));
        }
        if nx.len() != nu.len() {
            return Err(SqpError::InvalidProblem(format!(
                "nx has {} stages but nu has {}",
                nx.len(),
                nu.len()
            )));
        }
        if let Some(last) = nu.last_mut() {
            *last = 0;
        }
        let stages = nx.iter().zip(&nu).map(|(&x, &u)| NlpStage::free(x, u)).collect();
        Ok(Self { nx, nu, stages })
    }

    /// `n` intervals with identical state and control counts.
    pub fn uniform(n: usize, nx: usize, nu: usize) -> SqpResult<Self> {
        Self::new(vec![nx; n + 1], vec![nu; n + 1])
    }

    pub fn horizon(&self) -> usize {
        self.nx.len() - 1
    }

    pub fn nx(&self) -> &[usize] {
        &self.nx
    }

    pub fn nu(&self) -> &[usize] {
        &self.nu
    }

    pub fn ng(&self) -> Vec<usize> {
        self.stages.iter().map(NlpStage::ng).collect()
    }

    fn check_stage(&self, what: &str, stage: usize, last: usize) -> SqpResult<()> {
        if stage > last {
            return Err(SqpError::InvalidProblem(format!("{what}: stage {stage} out of range 0..={last}")));
        }
        Ok(())
    }

    fn check_plugin(&self, what: &str, stage: usize, nx: usize, nu: usize) -> SqpResult<()> {
        if nx != self.nx[stage] || nu != self.nu[stage] {
            return Err(SqpError::InvalidProblem(format!(
                "{what} at stage {stage} is {nx}x{nu} (states x controls), expected {}x{}",
                self.nx[stage], self.nu[stage]
            )));
        }
        Ok(())
    }

    pub fn set_dynamics(&mut self, stage: usize, dynamics: Arc<dyn Dynamics>) -> SqpResult<()> {
        if self.horizon() == 0 || stage >= self.horizon() {
            return Err(SqpError::InvalidProblem(format!(
                "dynamics: stage {stage} has no successor (horizon {})",
                self.horizon()
            )));
        }
        self.check_plugin("dynamics", stage, dynamics.nx(), dynamics.nu())?;
        if dynamics.nx_next() != self.nx[stage + 1] {
            return Err(SqpError::InvalidProblem(format!(
                "dynamics at stage {stage} maps to {} states, stage {} has {}",
                dynamics.nx_next(),
                stage + 1,
                self.nx[stage + 1]
            )));
        }
        self.stages[stage].dynamics = Some(dynamics);
        Ok(())
    }

    /// Same dynamics on every interval.
    pub fn set_dynamics_all(&mut self, dynamics: Arc<dyn Dynamics>) -> SqpResult<()> {
        for stage in 0..self.horizon() {
            self.set_dynamics(stage, Arc::clone(&dynamics))?;
        }
        Ok(())
    }

    pub fn set_cost(&mut self, stage: usize, cost: Arc<dyn StageCost>) -> SqpResult<()> {
        self.check_stage("cost", stage, self.horizon())?;
        self.check_plugin("cost", stage, cost.nx(), cost.nu())?;
        self.stages[stage].cost = Some(cost);
        Ok(())
    }

    /// Same cost on every stage before the terminal one.
    pub fn set_cost_all(&mut self, cost: Arc<dyn StageCost>) -> SqpResult<()> {
        for stage in 0..self.horizon() {
            self.set_cost(stage, Arc::clone(&cost))?;
        }
        Ok(())
    }

    pub fn set_constraint(
        &mut self,
        stage: usize,
        function: Arc<dyn Constraint>,
        lg: &[f64],
        ug: &[f64],
    ) -> SqpResult<()> {
        self.check_stage("constraint", stage, self.horizon())?;
        self.check_plugin("constraint", stage, function.nx(), function.nu())?;
        let ng = function.ng();
        if lg.len() != ng || ug.len() != ng {
            return Err(SqpError::InvalidProblem(format!(
                "constraint at stage {stage}: {ng} rows but bounds of length {} and {}",
                lg.len(),
                ug.len()
            )));
        }
        check_ordered("constraint", stage, lg, ug)?;
        self.stages[stage].constraint = Some(StageConstraint {
            function,
            lg: DVector::from_column_slice(lg),
            ug: DVector::from_column_slice(ug),
        });
        Ok(())
    }

    pub fn set_state_bounds(&mut self, stage: usize, lower: &[f64], upper: &[f64]) -> SqpResult<()> {
        self.check_stage("state bounds", stage, self.horizon())?;
        check_len("state bounds", stage, self.nx[stage], lower, upper)?;
        check_ordered("state bounds", stage, lower, upper)?;
        let st = &mut self.stages[stage];
        st.lbx.copy_from_slice(lower);
        st.ubx.copy_from_slice(upper);
        Ok(())
    }

    pub fn set_control_bounds(&mut self, stage: usize, lower: &[f64], upper: &[f64]) -> SqpResult<()> {
        self.check_stage("control bounds", stage, self.horizon())?;
        check_len("control bounds", stage, self.nu[stage], lower, upper)?;
        check_ordered("control bounds", stage, lower, upper)?;
        let st = &mut self.stages[stage];
        st.lbu.copy_from_slice(lower);
        st.ubu.copy_from_slice(upper);
        Ok(())
    }

    /// Pin `x_0` to `x0` and start the guess of stage 0 there.
    pub fn fix_initial_state(&mut self, x0: &[f64]) -> SqpResult<()> {
        self.set_state_bounds(0, x0, x0)?;
        self.stages[0].x_init = DVector::from_column_slice(x0);
        Ok(())
    }

    /// Linearization point of the first SQP iteration at `stage`.
    pub fn set_initial_guess(&mut self, stage: usize, x: &[f64], u: &[f64]) -> SqpResult<()> {
        self.check_stage("initial guess", stage, self.horizon())?;
        if x.len() != self.nx[stage] || u.len() != self.nu[stage] {
            return Err(SqpError::InvalidProblem(format!(
                "initial guess at stage {stage} has {} states and {} controls, expected {} and {}",
                x.len(),
                u.len(),
                self.nx[stage],
                self.nu[stage]
            )));
        }
        let st = &mut self.stages[stage];
        st.x_init = DVector::from_column_slice(x);
        st.u_init = DVector::from_column_slice(u);
        Ok(())
    }

    /// Shape of the QP subproblem, with no box bounds active yet.
    pub fn qp_dims(&self) -> SqpResult<OcpQpDims> {
        let stages = self.stages.len();
        Ok(OcpQpDims::new(self.nx.clone(), self.nu.clone(), vec![0; stages], vec![0; stages], self.ng())?)
    }

    /// Every interval must have dynamics.
    pub fn validate(&self) -> SqpResult<()> {
        if let Some(stage) = (0..self.horizon()).find(|&i| self.stages[i].dynamics.is_none()) {
            return Err(SqpError::InvalidProblem(format!("no dynamics set for stage {stage}")));
        }
        let finite = self
            .stages
            .iter()
            .all(|st| st.x_init.iter().chain(st.u_init.iter()).all(|v| v.is_finite()));
        if !finite {
            return Err(SqpError::InvalidProblem("initial guess contains non-finite values".into()));
        }
        Ok(())
    }
}

fn check_len(what: &str, stage: usize, n: usize, lower: &[f64], upper: &[f64]) -> SqpResult<()> {
    if lower.len() != n || upper.len() != n {
        return Err(SqpError::InvalidProblem(format!(
            "{what} at stage {stage}: expected length {n}, got {} and {}",
            lower.len(),
            upper.len()
        )));
    }
    Ok(())
}

fn check_ordered(what: &str, stage: usize, lower: &[f64], upper: &[f64]) -> SqpResult<()> {
    if let Some(k) = lower.iter().zip(upper).position(|(l, u)| l.is_nan() || u.is_nan() || l > u) {
        return Err(SqpError::InvalidProblem(format!(
            "{what} at stage {stage}: entry {k} has lower {} above upper {}",
            lower[k], upper[k]
        )));
    }
    Ok(())
}

impl fmt::Debug for OcpNlp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcpNlp")
            .field("nx", &self.nx)
            .field("nu", &self.nu)
            .field("ng", &self.ng())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LinearConstraint, LinearDynamics, QuadraticCost};
    use nalgebra::DMatrix;

    #[test]
    fn test_terminal_controls_forced_to_zero() {
        let nlp = OcpNlp::new(vec![2, 2, 2], vec![1, 1, 3]).unwrap();
        assert_eq!(nlp.nu(), &[1, 1, 0]);
        assert_eq!(nlp.horizon(), 2);
        assert!(OcpNlp::new(vec![2], vec![1, 1]).is_err());
        assert!(OcpNlp::new(vec![], vec![]).is_err());
    }

    #[test]
    fn test_plugin_shape_checks() {
        let mut nlp = OcpNlp::uniform(2, 2, 1).unwrap();
        let good = Arc::new(LinearDynamics::new(DMatrix::identity(2, 2), DMatrix::zeros(2, 1)));
        let bad = Arc::new(LinearDynamics::new(DMatrix::identity(3, 3), DMatrix::zeros(3, 1)));
        assert!(nlp.set_dynamics(0, bad).is_err());
        assert!(nlp.set_dynamics(2, good.clone()).is_err());
        assert!(nlp.validate().is_err());
        nlp.set_dynamics_all(good).unwrap();
        nlp.validate().unwrap();

        let terminal = Arc::new(QuadraticCost::terminal(DMatrix::identity(2, 2)));
        assert!(nlp.set_cost(0, terminal.clone()).is_err());
        nlp.set_cost(2, terminal).unwrap();
    }

    #[test]
    fn test_bounds_validation() {
        let mut nlp = OcpNlp::uniform(1, 2, 1).unwrap();
        assert!(nlp.set_state_bounds(0, &[0.0], &[1.0]).is_err());
        assert!(nlp.set_state_bounds(0, &[0.0, 2.0], &[1.0, 1.0]).is_err());
        assert!(nlp.set_control_bounds(1, &[], &[]).is_ok());
        nlp.fix_initial_state(&[0.5, -0.5]).unwrap();
        assert_eq!(nlp.stages[0].lbx, vec![0.5, -0.5]);
        assert_eq!(nlp.stages[0].x_init[1], -0.5);
    }

    #[test]
    fn test_qp_dims_carries_constraint_rows() {
        let mut nlp = OcpNlp::uniform(2, 2, 1).unwrap();
        let g = Arc::new(LinearConstraint::new(DMatrix::from_element(1, 2, 1.0), DMatrix::zeros(1, 1)));
        nlp.set_constraint(1, g.clone(), &[0.0], &[1.0]).unwrap();
        assert!(nlp.set_constraint(1, g, &[0.0, 0.0], &[1.0]).is_err());
        let dims = nlp.qp_dims().unwrap();
        assert_eq!(dims.ng(), &[0, 1, 0]);
        assert_eq!(dims.nbx(), &[0, 0, 0]);
    }
}
