//! Wall-clock accounting of an SQP run.
//!
//! Each phase of an iteration is charged to one [`Phase`]. Totals are keyed
//! the way the run summary prints them (`time_lin`, `time_qp_sol`, ...), with
//! `time_tot` covering the whole `solve` call.

use std::fmt;
use std::time::{Duration, Instant};

/// Phase of an SQP iteration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Plugin evaluation and writing the QP.
    Linearization,
    /// Hessian regularization.
    Regularization,
    /// Backend QP solve.
    QpSolve,
    /// NLP and external QP residuals.
    Residuals,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Linearization, Phase::Regularization, Phase::QpSolve, Phase::Residuals];

    pub fn key(self) -> &'static str {
        match self {
            Phase::Linearization => "time_lin",
            Phase::Regularization => "time_reg",
            Phase::QpSolve => "time_qp_sol",
            Phase::Residuals => "time_res",
        }
    }
}

/// Accumulated phase times of one run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SqpTimings {
    pub time_lin: Duration,
    pub time_reg: Duration,
    pub time_qp_sol: Duration,
    pub time_res: Duration,
    pub time_tot: Duration,
}

impl SqpTimings {
    /// Run `f`, charging its wall time to `phase`.
    pub fn measure<R>(&mut self, phase: Phase, f: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let out = f();
        *self.slot_mut(phase) += start.elapsed();
        out
    }

    pub fn phase(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Linearization => self.time_lin,
            Phase::Regularization => self.time_reg,
            Phase::QpSolve => self.time_qp_sol,
            Phase::Residuals => self.time_res,
        }
    }

    fn slot_mut(&mut self, phase: Phase) -> &mut Duration {
        match phase {
            Phase::Linearization => &mut self.time_lin,
            Phase::Regularization => &mut self.time_reg,
            Phase::QpSolve => &mut self.time_qp_sol,
            Phase::Residuals => &mut self.time_res,
        }
    }

    /// Total by key, `time_tot` included.
    pub fn get(&self, key: &str) -> Option<Duration> {
        if key == "time_tot" {
            return Some(self.time_tot);
        }
        Phase::ALL.into_iter().find(|p| p.key() == key).map(|p| self.phase(p))
    }

    /// Part of `time_tot` not charged to any phase.
    pub fn unaccounted(&self) -> Duration {
        let charged: Duration = Phase::ALL.into_iter().map(|p| self.phase(p)).sum();
        self.time_tot.saturating_sub(charged)
    }
}

impl fmt::Display for SqpTimings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = |d: Duration| d.as_secs_f64() * 1e3;
        for phase in Phase::ALL {
            writeln!(f, "{:<14}{:>10.3} ms", phase.key(), ms(self.phase(phase)))?;
        }
        writeln!(f, "{:<14}{:>10.3} ms", "(other)", ms(self.unaccounted()))?;
        write!(f, "{:<14}{:>10.3} ms", "time_tot", ms(self.time_tot))
    }
}
