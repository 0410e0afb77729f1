//! Stage-structured quadratic programs for optimal control.
//!
//! An OCP-QP over stages `0..=N` is
//!
//! ```text
//! min  Σ_i ½ uᵀ R u + uᵀ S x + ½ xᵀ Q x + rᵀ u + qᵀ x
//! s.t. x[i+1] = A x[i] + B u[i] + b
//!      lbu ≤ u[idxbu] ≤ ubu,   lbx ≤ x[idxbx] ≤ ubx,   lg ≤ C x + D u ≤ ug
//! ```
//!
//! This crate owns the data (named per-stage blocks), the box-bound
//! bookkeeping between caller-facing dense bounds and backend-facing packed
//! bounds, and a small set of interchangeable backends selected by name:
//!
//! - `riccati`: backward Riccati recursion, for problems with at most a
//!   fixed initial state,
//! - `sparse_clarabel` and `condensing_clarabel`: interior point via
//!   Clarabel (feature `clarabel`, enabled by default).
//!
//! # Example
//!
//! ```ignore
//! use ocp_qp::{BackendOptions, OcpQp};
//!
//! let mut qp = OcpQp::uniform(10, 2, 1, 0, 0, 0)?;
//! qp.set_field_all("Q", &[1.0, 0.0, 0.0, 1.0])?;
//! qp.set_field_all("R", &[0.1])?;
//! qp.set_field_all("A", &[1.0, 0.0, 0.1, 1.0])?;
//! qp.set_field_all("B", &[0.005, 0.1])?;
//! qp.set_field("lbx", 0, &[1.0, 0.0])?;
//! qp.set_field("ubx", 0, &[1.0, 0.0])?;
//!
//! qp.initialize_solver("riccati", &BackendOptions::new())?;
//! let sol = qp.solve()?;
//! println!("u0 = {}", sol.u[0]);
//! ```

#![allow(clippy::too_many_arguments)]

pub mod backend;
pub mod backends;
pub mod bounds;
pub mod data;
pub mod dims;
pub mod error;
pub mod field;
pub mod qp;
pub mod residuals;
pub mod solution;

pub use backend::{BackendOptions, BackendSettings, OptionValue, QpBackend};
pub use backends::{available_backends, BackendConfig, BackendKind};
pub use bounds::{compute_index_set, BoundSide, VarClass};
pub use data::{OcpQpData, StageData, DEFAULT_INF_BOUND};
pub use dims::OcpQpDims;
pub use error::{ErrorKind, OcpError, OcpResult};
pub use field::Field;
pub use qp::OcpQp;
pub use residuals::{compute_residuals, QpResiduals};
pub use solution::{OcpQpSolution, QpInfo, QpStatus};
