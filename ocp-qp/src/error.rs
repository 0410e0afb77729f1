//! Error types for the OCP-QP layer.

use thiserror::Error;

/// Coarse classification of an [`OcpError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller supplied something malformed (field, backend, option, size).
    Usage,
    /// Stage index outside the horizon.
    Range,
    /// A solve was attempted on a solver invalidated by a shape change.
    StaleState,
}

/// Errors raised by the OCP-QP data model and backend adapter.
///
/// All of these are detected at the boundary of a public operation before
/// any state is mutated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OcpError {
    /// Generic usage error (mismatched lengths, invalid shape, ...).
    #[error("{0}")]
    Usage(String),

    /// Field name outside the closed field enumeration.
    #[error("OCP QP does not contain field '{0}'")]
    UnknownField(String),

    /// Backend name not compiled into this build.
    #[error("QP solver '{0}' is not available")]
    UnsupportedBackend(String),

    /// Option key the selected backend does not recognize.
    #[error("QP solver '{backend}' has no option '{key}'")]
    UnknownOption {
        /// Backend the option was applied to.
        backend: String,
        /// Offending key.
        key: String,
    },

    /// Option value of the wrong type or out of range.
    #[error("invalid value for option '{key}': {reason}")]
    InvalidOption {
        /// Option key.
        key: String,
        /// What was wrong with the value.
        reason: String,
    },

    /// Stage index out of range for the addressed field.
    #[error("stage index {stage} out of range for field '{field}' (valid: 0..{end})")]
    Range {
        /// Field name.
        field: String,
        /// Requested stage.
        stage: usize,
        /// One past the last valid stage; `0` when no stage is valid.
        end: usize,
    },

    /// Wrong number of elements for a field block.
    #[error("field '{field}' at stage {stage}: I need {expected} elements but got {got}")]
    Shape {
        /// Field name.
        field: String,
        /// Stage index.
        stage: usize,
        /// Expected element count.
        expected: usize,
        /// Supplied element count.
        got: usize,
    },

    /// Bound index set changed since the last `initialize_solver`.
    #[error("QP dimensions changed since initialization: reinitialize solver{}", .0.as_deref().map(|s| format!(" '{s}'")).unwrap_or_default())]
    StaleState(Option<String>),
}

impl OcpError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OcpError::Range { .. } => ErrorKind::Range,
            OcpError::StaleState(_) => ErrorKind::StaleState,
            OcpError::Usage(_)
            | OcpError::UnknownField(_)
            | OcpError::UnsupportedBackend(_)
            | OcpError::UnknownOption { .. }
            | OcpError::InvalidOption { .. }
            | OcpError::Shape { .. } => ErrorKind::Usage,
        }
    }
}

/// Result type for OCP-QP operations.
pub type OcpResult<T> = Result<T, OcpError>;
