//! SQP options.

use ocp_qp::{BackendOptions, OptionValue, DEFAULT_INF_BOUND};
use serde::{Deserialize, Serialize};

use crate::error::{SqpError, SqpResult};
use crate::regularize::RegularizationKind;

/// What to do when the QP backend stops at its iteration or step limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QpLimitPolicy {
    /// Terminate the SQP run with [`crate::SqpStatus::QpLimit`].
    Abort,
    /// Take the step from the unconverged QP solution and keep iterating.
    #[default]
    Proceed,
}

/// Settings of one SQP run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqpOptions {
    /// Stationarity tolerance (infinity norm).
    pub tol_stat: f64,
    /// Dynamics defect tolerance.
    pub tol_eq: f64,
    /// Bound and constraint violation tolerance.
    pub tol_ineq: f64,
    /// Complementarity tolerance.
    pub tol_comp: f64,

    /// Maximum number of QP solves.
    pub max_iter: usize,

    /// Worker threads for stage linearization (1 = sequential).
    pub num_threads: usize,

    /// Start each `solve` from the previous solution instead of the initial guess.
    pub reuse_workspace: bool,

    /// Record the KKT residuals of every QP solution in the statistics.
    pub ext_qp_res: bool,

    /// Offer the previous QP solution to the backend before each solve.
    /// Rejected by [`crate::SqpSolver`] unless the backend supports it.
    pub qp_warm_start: bool,

    /// Backend name, see [`ocp_qp::available_backends`].
    pub qp_solver: String,
    /// Options forwarded to the backend at initialization.
    pub qp_options: BackendOptions,

    pub regularization: RegularizationKind,
    /// Eigenvalue floor of the regularized Hessian.
    pub reg_epsilon: f64,

    pub qp_limit_policy: QpLimitPolicy,

    /// Full-step fraction `α` in `w ← w + α Δw`.
    pub step_length: f64,

    /// Magnitude substituted for infinite QP bounds.
    pub inf_bound: f64,
}

impl Default for SqpOptions {
    fn default() -> Self {
        Self {
            tol_stat: 1e-8,
            tol_eq: 1e-8,
            tol_ineq: 1e-8,
            tol_comp: 1e-8,
            max_iter: 100,
            num_threads: 1,
            reuse_workspace: true,
            ext_qp_res: false,
            qp_warm_start: false,
            qp_solver: default_qp_solver().to_string(),
            qp_options: BackendOptions::new(),
            regularization: RegularizationKind::None,
            reg_epsilon: 1e-4,
            qp_limit_policy: QpLimitPolicy::default(),
            step_length: 1.0,
            inf_bound: DEFAULT_INF_BOUND,
        }
    }
}

#[cfg(feature = "clarabel")]
fn default_qp_solver() -> &'static str {
    "sparse_clarabel"
}

#[cfg(not(feature = "clarabel"))]
fn default_qp_solver() -> &'static str {
    "riccati"
}

impl SqpOptions {
    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tol_stat = tol;
        self.tol_eq = tol;
        self.tol_ineq = tol;
        self.tol_comp = tol;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn with_qp_solver(mut self, name: &str) -> Self {
        self.qp_solver = name.to_string();
        self
    }

    pub fn with_qp_option(mut self, key: &str, value: impl Into<OptionValue>) -> Self {
        self.qp_options.insert(key.to_string(), value.into());
        self
    }

    pub fn with_regularization(mut self, kind: RegularizationKind, epsilon: f64) -> Self {
        self.regularization = kind;
        self.reg_epsilon = epsilon;
        self
    }

    pub fn with_ext_qp_res(mut self, enabled: bool) -> Self {
        self.ext_qp_res = enabled;
        self
    }

    /// Set one option by name. Keys prefixed with `qp.` go to the backend.
    pub fn set(&mut self, key: &str, value: &OptionValue) -> SqpResult<()> {
        if let Some(qp_key) = key.strip_prefix("qp.") {
            self.qp_options.insert(qp_key.to_string(), value.clone());
            return Ok(());
        }
        match key {
            "tol_stat" => self.tol_stat = value.as_f64(key)?,
            "tol_eq" => self.tol_eq = value.as_f64(key)?,
            "tol_ineq" => self.tol_ineq = value.as_f64(key)?,
            "tol_comp" => self.tol_comp = value.as_f64(key)?,
            "tol" => {
                let tol = value.as_f64(key)?;
                *self = std::mem::take(self).with_tolerance(tol);
            }
            "max_iter" => self.max_iter = value.as_usize(key)?,
            "num_threads" => self.num_threads = value.as_usize(key)?,
            "reuse_workspace" => self.reuse_workspace = value.as_bool(key)?,
            "ext_qp_res" => self.ext_qp_res = value.as_bool(key)?,
            "qp_warm_start" => self.qp_warm_start = value.as_bool(key)?,
            "qp_solver" => self.qp_solver = string_value(key, value)?.to_string(),
            "regularization" => self.regularization = string_value(key, value)?.parse()?,
            "reg_epsilon" => self.reg_epsilon = value.as_f64(key)?,
            "qp_limit_policy" => {
                self.qp_limit_policy = match string_value(key, value)? {
                    "abort" => QpLimitPolicy::Abort,
                    "proceed" => QpLimitPolicy::Proceed,
                    other => {
                        return Err(SqpError::InvalidOptions(format!(
                            "qp_limit_policy must be \"abort\" or \"proceed\", got \"{other}\""
                        )))
                    }
                }
            }
            "step_length" => self.step_length = value.as_f64(key)?,
            "inf_bound" => self.inf_bound = value.as_f64(key)?,
            _ => return Err(SqpError::InvalidOptions(format!("unknown option '{key}'"))),
        }
        Ok(())
    }

    /// Range checks run before every solve.
    pub fn validate(&self) -> SqpResult<()> {
        for (name, tol) in [
            ("tol_stat", self.tol_stat),
            ("tol_eq", self.tol_eq),
            ("tol_ineq", self.tol_ineq),
            ("tol_comp", self.tol_comp),
        ] {
            if !tol.is_finite() || tol < 0.0 {
                return Err(SqpError::InvalidOptions(format!("{name} must be finite and non-negative, got {tol}")));
            }
        }
        if self.num_threads == 0 {
            return Err(SqpError::InvalidOptions("num_threads must be at least 1".into()));
        }
        if !(self.step_length > 0.0 && self.step_length <= 1.0) {
            return Err(SqpError::InvalidOptions(format!("step_length must be in (0, 1], got {}", self.step_length)));
        }
        if !(self.reg_epsilon.is_finite() && self.reg_epsilon > 0.0) {
            return Err(SqpError::InvalidOptions(format!("reg_epsilon must be positive, got {}", self.reg_epsilon)));
        }
        if !(self.inf_bound.is_finite() && self.inf_bound > 0.0) {
            return Err(SqpError::InvalidOptions(format!("inf_bound must be positive and finite, got {}", self.inf_bound)));
        }
        Ok(())
    }
}

fn string_value<'a>(key: &str, value: &'a OptionValue) -> SqpResult<&'a str> {
    match value {
        OptionValue::Str(s) => Ok(s),
        other => Err(SqpError::InvalidOptions(format!("option '{key}' expects a string, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let opts = SqpOptions::default();
        opts.validate().unwrap();
        assert_eq!(opts.max_iter, 100);
        assert_eq!(opts.qp_limit_policy, QpLimitPolicy::Proceed);
        assert!(ocp_qp::available_backends().iter().any(|name| *name == opts.qp_solver));
    }

    #[test]
    fn test_set_by_name() {
        let mut opts = SqpOptions::default();
        opts.set("tol", &1e-6.into()).unwrap();
        assert_eq!(opts.tol_comp, 1e-6);
        opts.set("max_iter", &OptionValue::Int(7)).unwrap();
        assert_eq!(opts.max_iter, 7);
        opts.set("qp_limit_policy", &"abort".into()).unwrap();
        assert_eq!(opts.qp_limit_policy, QpLimitPolicy::Abort);
        opts.set("regularization", &"mirror".into()).unwrap();
        assert_eq!(opts.regularization, RegularizationKind::Mirror);
        opts.set("qp.max_iter", &OptionValue::Int(50)).unwrap();
        assert_eq!(opts.qp_options.get("max_iter"), Some(&OptionValue::Int(50)));
    }

    #[test]
    fn test_set_rejects_unknown_and_mistyped() {
        let mut opts = SqpOptions::default();
        assert!(matches!(opts.set("tol_foo", &1.0.into()), Err(SqpError::InvalidOptions(_))));
        assert!(opts.set("max_iter", &"ten".into()).is_err());
        assert!(opts.set("qp_limit_policy", &"retry".into()).is_err());
        assert!(opts.set("regularization", &"magic".into()).is_err());
    }

    #[test]
    fn test_validate_ranges() {
        let bad = [
            SqpOptions { tol_stat: -1.0, ..Default::default() },
            SqpOptions { tol_eq: f64::NAN, ..Default::default() },
            SqpOptions { num_threads: 0, ..Default::default() },
            SqpOptions { step_length: 0.0, ..Default::default() },
            SqpOptions { step_length: 1.5, ..Default::default() },
            SqpOptions { inf_bound: f64::INFINITY, ..Default::default() },
        ];
        for opts in bad {
            assert!(opts.validate().is_err(), "{opts:?}");
        }
        SqpOptions { max_iter: 0, tol_stat: 0.0, ..Default::default() }.validate().unwrap();
    }
}
