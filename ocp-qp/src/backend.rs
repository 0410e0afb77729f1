//! QP backend contract and option handling.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::OcpQpData;
use crate::dims::OcpQpDims;
use crate::error::{OcpError, OcpResult};
use crate::solution::{OcpQpSolution, QpStatus};

/// A single backend option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Option mapping passed to [`crate::OcpQp::initialize_solver`].
pub type BackendOptions = BTreeMap<String, OptionValue>;

impl OptionValue {
    pub fn as_f64(&self, key: &str) -> OcpResult<f64> {
        match *self {
            OptionValue::Float(v) => Ok(v),
            OptionValue::Int(v) => Ok(v as f64),
            _ => Err(invalid(key, format!("expected a number, got {self}"))),
        }
    }

    pub fn as_usize(&self, key: &str) -> OcpResult<usize> {
        match *self {
            OptionValue::Int(v) if v >= 0 => Ok(v as usize),
            OptionValue::Int(v) => Err(invalid(key, format!("expected a non-negative integer, got {v}"))),
            _ => Err(invalid(key, format!("expected an integer, got {self}"))),
        }
    }

    pub fn as_bool(&self, key: &str) -> OcpResult<bool> {
        match *self {
            OptionValue::Bool(v) => Ok(v),
            _ => Err(invalid(key, format!("expected a boolean, got {self}"))),
        }
    }

    /// Non-negative finite number.
    pub fn as_tolerance(&self, key: &str) -> OcpResult<f64> {
        let v = self.as_f64(key)?;
        if !v.is_finite() || v < 0.0 {
            return Err(invalid(key, format!("expected a finite non-negative value, got {v}")));
        }
        Ok(v)
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(v) => write!(f, "{v}"),
            OptionValue::Int(v) => write!(f, "{v}"),
            OptionValue::Float(v) => write!(f, "{v}"),
            OptionValue::Str(v) => write!(f, "\"{v}\""),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        OptionValue::Bool(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        OptionValue::Int(v)
    }
}

impl From<i32> for OptionValue {
    fn from(v: i32) -> Self {
        OptionValue::Int(v.into())
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        OptionValue::Float(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::Str(v.to_string())
    }
}

fn invalid(key: &str, reason: String) -> OcpError {
    OcpError::InvalidOption { key: key.to_string(), reason }
}

/// Backend-specific settings that accept string-keyed options.
pub trait BackendSettings {
    /// Apply one option. Keys the backend does not know are rejected with
    /// [`OcpError::UnknownOption`].
    fn set_option(&mut self, key: &str, value: &OptionValue) -> OcpResult<()>;

    /// Apply a whole option mapping, stopping at the first error.
    fn apply_options(&mut self, options: &BackendOptions) -> OcpResult<()> {
        for (key, value) in options {
            self.set_option(key, value)?;
        }
        Ok(())
    }
}

/// An initialized QP solver, sized for one horizon shape.
pub trait QpBackend: Send {
    /// Registry name of the backend.
    fn name(&self) -> &'static str;

    /// Solve the (filled-in) QP into `sol`.
    ///
    /// `sol` is sized for `dims` on entry. The returned status is also
    /// stored in `sol.status` by the caller.
    fn solve(&mut self, dims: &OcpQpDims, qp: &OcpQpData, sol: &mut OcpQpSolution) -> QpStatus;

    /// Offer the previous solution as a starting point.
    ///
    /// Only called for backends whose [`crate::BackendKind::supports_warm_start`]
    /// is `true`.
    fn warm_start(&mut self, _previous: &OcpQpSolution) {}
}
