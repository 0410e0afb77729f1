//! QP solution container and backend outcome.

use std::fmt;

use nalgebra::DVector;

use crate::dims::OcpQpDims;

/// Uniform outcome of a backend solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QpStatus {
    /// Solved to the backend's tolerances.
    #[default]
    Success,
    /// Backend hit its iteration limit.
    MaxIter,
    /// Backend stopped because its step became too small to make progress.
    MinStep,
    /// Any other backend failure, with the backend's raw return code.
    Failure { code: i32 },
}

impl QpStatus {
    #[inline]
    pub fn is_success(self) -> bool {
        matches!(self, QpStatus::Success)
    }

    /// Iteration or step limit: a usable but unconverged solution.
    #[inline]
    pub fn is_limit(self) -> bool {
        matches!(self, QpStatus::MaxIter | QpStatus::MinStep)
    }

    /// Numeric code used in statistics tables.
    pub fn code(self) -> i32 {
        match self {
            QpStatus::Success => 0,
            QpStatus::MaxIter => 1,
            QpStatus::MinStep => 2,
            QpStatus::Failure { code } => code,
        }
    }
}

impl fmt::Display for QpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QpStatus::Success => write!(f, "Success"),
            QpStatus::MaxIter => write!(f, "reached maximum number of iterations"),
            QpStatus::MinStep => write!(f, "reached minimum step size"),
            QpStatus::Failure { code } => write!(f, "failed with solver-specific error code {code}"),
        }
    }
}

/// Backend-reported statistics of one QP solve.
#[derive(Debug, Clone, Copy, Default)]
pub struct QpInfo {
    /// Backend iterations (0 for direct methods).
    pub iterations: usize,
    /// Wall-clock time of the backend call in seconds.
    pub solve_time: f64,
}

/// Primal-dual solution of an OCP-QP.
///
/// Multiplier layout per stage follows the constraint order
/// `[u[idxbu]; x[idxbx]; Cx + Du]`; `lam_lower`/`lam_upper` are non-negative.
/// `pi[i]` is the multiplier of the dynamics linking stage `i` to `i + 1`.
#[derive(Debug, Clone)]
pub struct OcpQpSolution {
    pub u: Vec<DVector<f64>>,
    pub x: Vec<DVector<f64>>,
    pub pi: Vec<DVector<f64>>,
    pub lam_lower: Vec<DVector<f64>>,
    pub lam_upper: Vec<DVector<f64>>,
    pub status: QpStatus,
    pub info: QpInfo,
}

impl OcpQpSolution {
    /// Zero solution sized for `dims`.
    pub fn zeros(dims: &OcpQpDims) -> Self {
        let stages = dims.num_stages();
        Self {
            u: (0..stages).map(|i| DVector::zeros(dims.nu()[i])).collect(),
            x: (0..stages).map(|i| DVector::zeros(dims.nx()[i])).collect(),
            pi: (0..dims.horizon()).map(|i| DVector::zeros(dims.nx()[i + 1])).collect(),
            lam_lower: (0..stages).map(|i| DVector::zeros(dims.nc(i))).collect(),
            lam_upper: (0..stages).map(|i| DVector::zeros(dims.nc(i))).collect(),
            status: QpStatus::Success,
            info: QpInfo::default(),
        }
    }

    /// Whether every vector has the length `dims` prescribes.
    pub fn matches(&self, dims: &OcpQpDims) -> bool {
        let stages = dims.num_stages();
        self.u.len() == stages
            && self.x.len() == stages
            && self.pi.len() == dims.horizon()
            && (0..stages).all(|i| {
                self.u[i].len() == dims.nu()[i]
                    && self.x[i].len() == dims.nx()[i]
                    && self.lam_lower[i].len() == dims.nc(i)
                    && self.lam_upper[i].len() == dims.nc(i)
            })
            && (0..dims.horizon()).all(|i| self.pi[i].len() == dims.nx()[i + 1])
    }

    /// Reset all values to zero, reshaping to `dims` if needed.
    pub fn reset(&mut self, dims: &OcpQpDims) {
        if !self.matches(dims) {
            *self = Self::zeros(dims);
            return;
        }
        for v in self
            .u
            .iter_mut()
            .chain(self.x.iter_mut())
            .chain(self.pi.iter_mut())
            .chain(self.lam_lower.iter_mut())
            .chain(self.lam_upper.iter_mut())
        {
            v.fill(0.0);
        }
        self.status = QpStatus::Success;
        self.info = QpInfo::default();
    }

    /// States as plain vectors, one per stage.
    pub fn states(&self) -> Vec<Vec<f64>> {
        self.x.iter().map(|v| v.as_slice().to_vec()).collect()
    }

    /// Controls as plain vectors, one per stage.
    pub fn controls(&self) -> Vec<Vec<f64>> {
        self.u.iter().map(|v| v.as_slice().to_vec()).collect()
    }

    /// Equality multipliers as plain vectors, one per interval.
    pub fn equality_multipliers(&self) -> Vec<Vec<f64>> {
        self.pi.iter().map(|v| v.as_slice().to_vec()).collect()
    }

    /// Inequality multipliers per stage as `[lam_lower; lam_upper]`.
    pub fn inequality_multipliers(&self) -> Vec<Vec<f64>> {
        self.lam_lower
            .iter()
            .zip(&self.lam_upper)
            .map(|(l, u)| l.iter().chain(u.iter()).copied().collect())
            .collect()
    }
}
