//! Error types for the SQP engine.

use ocp_qp::OcpError;
use thiserror::Error;

/// Errors that abort an SQP run or its setup.
#[derive(Error, Debug)]
pub enum SqpError {
    /// Error from the QP layer (usage, range, stale state).
    #[error(transparent)]
    Qp(#[from] OcpError),

    /// Option value out of its valid range.
    #[error("invalid SQP options: {0}")]
    InvalidOptions(String),

    /// Problem definition inconsistent with its own dimensions.
    #[error("invalid OCP: {0}")]
    InvalidProblem(String),

    /// QP backend failed with a status other than an iteration or step limit.
    #[error("QP solver '{solver}' failed in SQP iteration {iter} with code {code}")]
    QpFailure {
        /// Backend name.
        solver: String,
        /// SQP iteration in which the QP failed.
        iter: usize,
        /// Raw backend return code.
        code: i32,
    },

    /// Hessian regularization could not produce a usable matrix.
    #[error("regularization failed at stage {stage}: {reason}")]
    Regularization {
        /// Stage whose Hessian block was rejected.
        stage: usize,
        /// What went wrong.
        reason: String,
    },

    /// NaN or infinity in residuals or iterates.
    #[error("non-finite {what} in SQP iteration {iter}")]
    NonFinite {
        /// Which quantity was non-finite.
        what: &'static str,
        /// SQP iteration.
        iter: usize,
    },

    /// Linearization worker pool could not be created.
    #[error("failed to build linearization thread pool: {0}")]
    ThreadPool(String),
}

/// Result type for SQP operations.
pub type SqpResult<T> = Result<T, SqpError>;
