//! Convexification of the stage Hessians before each QP solve.
//!
//! A stage Hessian is assembled as `H = [R S; Sᵀ Q]` over `v = [u; x]`,
//! regularized in place and split back into its blocks.

use std::fmt;
use std::str::FromStr;

use nalgebra::{DMatrix, SymmetricEigen};
use serde::{Deserialize, Serialize};

use crate::error::{SqpError, SqpResult};

const EIGEN_EPS: f64 = 1e-14;
const EIGEN_MAX_ITER: usize = 500;

/// Strategy applied to every stage Hessian.
pub trait Regularization: Send + Sync {
    fn name(&self) -> &'static str;

    /// Modify `hess` (symmetric, `nu + nx` square) in place.
    fn regularize(&self, hess: &mut DMatrix<f64>) -> Result<(), String>;
}

/// Leaves the Hessian untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRegularization;

impl Regularization for NoRegularization {
    fn name(&self) -> &'static str {
        "none"
    }

    fn regularize(&self, _hess: &mut DMatrix<f64>) -> Result<(), String> {
        Ok(())
    }
}

/// Replaces each eigenvalue `λ` by `max(|λ|, ε)`.
#[derive(Debug, Clone, Copy)]
pub struct MirrorRegularization {
    pub epsilon: f64,
}

impl Regularization for MirrorRegularization {
    fn name(&self) -> &'static str {
        "mirror"
    }

    fn regularize(&self, hess: &mut DMatrix<f64>) -> Result<(), String> {
        let eps = self.epsilon;
        floor_spectrum(hess, |l| l.abs().max(eps))
    }
}

/// Replaces each eigenvalue `λ` by `max(λ, ε)`.
#[derive(Debug, Clone, Copy)]
pub struct ProjectRegularization {
    pub epsilon: f64,
}

impl Regularization for ProjectRegularization {
    fn name(&self) -> &'static str {
        "project"
    }

    fn regularize(&self, hess: &mut DMatrix<f64>) -> Result<(), String> {
        let eps = self.epsilon;
        floor_spectrum(hess, |l| l.max(eps))
    }
}

fn floor_spectrum(hess: &mut DMatrix<f64>, map: impl Fn(f64) -> f64) -> Result<(), String> {
    if hess.is_empty() {
        return Ok(());
    }
    let sym = (&*hess + hess.transpose()) * 0.5;
    let eig = SymmetricEigen::try_new(sym, EIGEN_EPS, EIGEN_MAX_ITER)
        .ok_or_else(|| "eigendecomposition did not converge".to_string())?;
    let lambda = eig.eigenvalues.map(map);
    let v = &eig.eigenvectors;
    *hess = v * DMatrix::from_diagonal(&lambda) * v.transpose();
    Ok(())
}

/// Configured regularization, selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegularizationKind {
    #[default]
    None,
    Mirror,
    Project,
}

impl RegularizationKind {
    pub fn build(self, epsilon: f64) -> Box<dyn Regularization> {
        match self {
            RegularizationKind::None => Box::new(NoRegularization),
            RegularizationKind::Mirror => Box::new(MirrorRegularization { epsilon }),
            RegularizationKind::Project => Box::new(ProjectRegularization { epsilon }),
        }
    }
}

impl FromStr for RegularizationKind {
    type Err = SqpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(RegularizationKind::None),
            "mirror" => Ok(RegularizationKind::Mirror),
            "project" => Ok(RegularizationKind::Project),
            other => Err(SqpError::InvalidOptions(format!(
                "regularization must be one of none, mirror, project; got \"{other}\""
            ))),
        }
    }
}

impl fmt::Display for RegularizationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegularizationKind::None => "none",
            RegularizationKind::Mirror => "mirror",
            RegularizationKind::Project => "project",
        };
        f.write_str(name)
    }
}

/// Regularize the blocks `(Q, S, R)` of `stage` as one matrix.
#[allow(non_snake_case)]
pub(crate) fn regularize_stage(
    reg: &dyn Regularization,
    stage: usize,
    Q: &mut DMatrix<f64>,
    S: &mut DMatrix<f64>,
    R: &mut DMatrix<f64>,
) -> SqpResult<()> {
    let (nu, nx) = (R.nrows(), Q.nrows());
    let n = nu + nx;
    let mut hess = DMatrix::zeros(n, n);
    hess.view_mut((0, 0), (nu, nu)).copy_from(R);
    hess.view_mut((0, nu), (nu, nx)).copy_from(S);
    hess.view_mut((nu, 0), (nx, nu)).copy_from(&S.transpose());
    hess.view_mut((nu, nu), (nx, nx)).copy_from(Q);

    let fail = |reason: String| SqpError::Regularization { stage, reason };
    if hess.iter().any(|v| !v.is_finite()) {
        return Err(fail("non-finite Hessian entry".into()));
    }
    reg.regularize(&mut hess).map_err(fail)?;
    if hess.iter().any(|v| !v.is_finite()) {
        return Err(fail(format!("{} regularization produced non-finite entries", reg.name())));
    }

    R.copy_from(&hess.view((0, 0), (nu, nu)));
    S.copy_from(&hess.view((0, nu), (nu, nx)));
    Q.copy_from(&hess.view((nu, nu), (nx, nx)));
    Ok(())
}
