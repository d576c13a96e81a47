//! Stopping rules shared by the bounded searches.
//!
//! Each search reports termination as an Argmin `SolverExit` carrying one of
//! the codes in [`ExitCode`], so the status string a caller sees is the same
//! whichever algorithm ran.
use crate::optimization::loglik_optimizer::{Theta, Tolerances};
use argmin::core::{TerminationReason, TerminationStatus};

/// Reason a bounded search stopped on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    FtolReached,
    XtolReached,
    MaxEvalReached,
}

impl ExitCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitCode::FtolReached => "FTOL_REACHED",
            ExitCode::XtolReached => "XTOL_REACHED",
            ExitCode::MaxEvalReached => "MAXEVAL_REACHED",
        }
    }

    pub fn status(&self) -> TerminationStatus {
        TerminationStatus::Terminated(TerminationReason::SolverExit(self.as_str().to_string()))
    }
}

/// Evaluation counter with a hard cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalBudget {
    pub used: u64,
    pub max: u64,
}

impl EvalBudget {
    pub fn new(max: u64) -> Self {
        Self { used: 0, max }
    }

    pub fn exhausted(&self) -> bool {
        self.used >= self.max
    }

    /// Spend one evaluation; `false` when the cap was already reached.
    pub fn spend(&mut self) -> bool {
        if self.exhausted() {
            return false;
        }
        self.used += 1;
        true
    }
}

/// Relative/absolute convergence tests on objective values and points.
///
/// A tolerance of zero disables the corresponding test. The relative x-test
/// uses the per-parameter weights from [`Tolerances::x_weights`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoppingRules {
    pub xtol_rel: f64,
    pub xtol_abs: f64,
    pub ftol_rel: f64,
    pub ftol_abs: f64,
    pub weights: Theta,
}

impl StoppingRules {
    pub fn new(tols: &Tolerances, start: &Theta) -> Self {
        Self {
            xtol_rel: tols.xtol_rel,
            xtol_abs: tols.xtol_abs,
            ftol_rel: tols.ftol_rel,
            ftol_abs: tols.ftol_abs,
            weights: tols.x_weights(start),
        }
    }

    /// Rules for a subset of coordinates (used by subspace searches).
    pub fn restricted(&self, coords: &[usize]) -> Self {
        Self { weights: coords.iter().map(|&c| self.weights[c]).collect(), ..self.clone() }
    }

    pub fn f_converged(&self, f_new: f64, f_old: f64) -> bool {
        let diff = (f_new - f_old).abs();
        if self.ftol_abs > 0.0 && diff < self.ftol_abs {
            return true;
        }
        if self.ftol_rel > 0.0 {
            return f_new == f_old || diff < self.ftol_rel * 0.5 * (f_new.abs() + f_old.abs());
        }
        false
    }

    pub fn x_converged(&self, x_new: &Theta, x_old: &Theta) -> bool {
        if self.xtol_abs > 0.0
            && x_new.iter().zip(x_old.iter()).all(|(a, b)| (a - b).abs() < self.xtol_abs)
        {
            return true;
        }
        if self.xtol_rel > 0.0 {
            let mut step = 0.0;
            let mut scale = 0.0;
            for ((&a, &b), &w) in x_new.iter().zip(x_old.iter()).zip(self.weights.iter()) {
                step += w * (a - b).abs();
                scale += w * a.abs();
            }
            return step == 0.0 || step < self.xtol_rel * scale;
        }
        false
    }
}
