//! Sequential quadratic programming for optimal control problems.
//!
//! An [`OcpNlp`] holds the stage structure of the problem and its evaluator
//! plugins ([`Dynamics`], [`StageCost`], [`Constraint`]). [`SqpSolver`]
//! linearizes it into an [`ocp_qp::OcpQp`] at every iterate, solves that QP
//! with the backend named in [`SqpOptions::qp_solver`] and takes the step
//! until the NLP residuals drop below tolerance.
//!
//! ```ignore
//! use std::sync::Arc;
//! use nalgebra::DMatrix;
//! use ocp_sqp::{LinearDynamics, OcpNlp, QuadraticCost, SqpOptions, SqpSolver};
//!
//! let mut nlp = OcpNlp::uniform(20, 2, 1)?;
//! let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.1, 0.0, 1.0]);
//! let b = DMatrix::from_column_slice(2, 1, &[0.005, 0.1]);
//! nlp.set_dynamics_all(Arc::new(LinearDynamics::new(a, b)))?;
//! nlp.set_cost_all(Arc::new(QuadraticCost::new(DMatrix::identity(2, 2), DMatrix::identity(1, 1))))?;
//! nlp.fix_initial_state(&[1.0, 0.0])?;
//!
//! let mut solver = SqpSolver::new(nlp, SqpOptions::default().with_qp_solver("riccati"))?;
//! let status = solver.solve()?;
//! println!("{status}: {} iterations", solver.memory().sqp_iter);
//! ```

pub mod error;
pub mod linearize;
pub mod model;
pub mod nlp;
pub mod options;
pub mod regularize;
pub mod solver;
pub mod stats;
pub mod timings;

pub use error::{SqpError, SqpResult};
pub use linearize::Iterate;
pub use model::{
    Constraint, ConstraintEval, CostEval, Dynamics, DynamicsEval, HessianBlocks, LinearConstraint, LinearDynamics,
    QuadraticCost, StageCost,
};
pub use nlp::OcpNlp;
pub use options::{QpLimitPolicy, SqpOptions};
pub use regularize::{MirrorRegularization, NoRegularization, ProjectRegularization, Regularization, RegularizationKind};
pub use solver::{SqpMemory, SqpSolver, SqpStatus};
pub use stats::SqpStats;
pub use timings::{Phase, SqpTimings};
