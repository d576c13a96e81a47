//! Public API surface for log-likelihood maximization.
//!
//! - [`LogLikelihood`]: trait users implement for their model.
//! - [`MLEOptions`], [`Tolerances`] and [`Bounds`]: configuration for the
//!   bounded optimizer.
//! - [`Algorithm`]: choice of derivative-free search.
//! - [`OptimOutcome`]: normalized result returned by the high-level `maximize` API.
//!
//! Convention: we *maximize* a user log-likelihood `ℓ(θ)` by minimizing the cost
//! `c(θ) = -ℓ(θ)`. All searches are derivative-free and never leave the box.
use crate::optimization::{
    errors::{OptError, OptResult},
    loglik_optimizer::{
        Theta,
        validation::{
            validate_bounds, validate_theta_hat, validate_value, verify_max_eval,
            verify_tolerance,
        },
    },
};
use argmin::core::{TerminationReason, TerminationStatus};
use std::{fmt, str::FromStr};

/// User-implemented log-likelihood interface.
///
/// You maximize `ℓ(θ)`; internally we minimize the cost `c(θ) = -ℓ(θ)`.
///
/// - `type Data`: per-model data carried into `value`/`check`.
///
/// Required:
/// - `value(&Theta, &Data) -> OptResult<f64>`: evaluate `ℓ(θ)`.
///   - Errors: return a descriptive `OptError` for invalid inputs or model failures.
///     Any error aborts the optimization run.
/// - `check(&Theta, &Data) -> OptResult<()>`: validation hook to reject
///   obviously invalid `θ`/`data` pairs. Called once before optimization.
pub trait LogLikelihood {
    type Data;

    fn value(&self, theta: &Theta, data: &Self::Data) -> OptResult<f64>;
    fn check(&self, theta: &Theta, data: &Self::Data) -> OptResult<()>;
}

/// Choice of bounded derivative-free search.
///
/// Variants:
/// - `NelderMead`: local simplex search with projection onto the box.
/// - `Subplex`: local search running simplex searches on coordinate subspaces.
/// - `Crs2`: global controlled random search with local mutation.
///
/// Parsing:
/// This enum implements `FromStr` and accepts case-insensitive names
/// (`"neldermead"`, `"sbplx"`, `"crs2"`). Unknown names return
/// `OptError::InvalidAlgorithm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    NelderMead,
    Subplex,
    #[default]
    Crs2,
}

impl FromStr for Algorithm {
    type Err = OptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "neldermead" => Ok(Algorithm::NelderMead),
            "sbplx" | "subplex" => Ok(Algorithm::Subplex),
            "crs2" => Ok(Algorithm::Crs2),
            _ => Err(OptError::InvalidAlgorithm {
                name: s.to_string(),
                reason: "Valid options are case insensitive 'neldermead', 'sbplx' or 'CRS2'.",
            }),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::NelderMead => write!(f, "neldermead"),
            Algorithm::Subplex => write!(f, "sbplx"),
            Algorithm::Crs2 => write!(f, "CRS2"),
        }
    }
}

/// Stopping rules for a bounded search.
///
/// - `xtol_rel`, `xtol_abs`: relative / absolute change in the parameters.
/// - `ftol_rel`, `ftol_abs`: relative / absolute change in the objective.
/// - `max_eval`: hard cap on likelihood evaluations.
///
/// A tolerance of `0.0` disables that rule. Whichever enabled rule triggers
/// first stops the search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    pub xtol_rel: f64,
    pub xtol_abs: f64,
    pub ftol_rel: f64,
    pub ftol_abs: f64,
    pub max_eval: u64,
}

impl Tolerances {
    /// Construct validated tolerances.
    ///
    /// # Errors
    /// - [`OptError::InvalidTolerance`] for a negative or non-finite tolerance.
    /// - [`OptError::InvalidMaxEval`] if `max_eval == 0`.
    pub fn new(
        xtol_rel: f64, xtol_abs: f64, ftol_rel: f64, ftol_abs: f64, max_eval: u64,
    ) -> OptResult<Self> {
        verify_tolerance("xtol_rel", xtol_rel)?;
        verify_tolerance("xtol_abs", xtol_abs)?;
        verify_tolerance("ftol_rel", ftol_rel)?;
        verify_tolerance("ftol_abs", ftol_abs)?;
        verify_max_eval(max_eval)?;
        Ok(Self { xtol_rel, xtol_abs, ftol_rel, ftol_abs, max_eval })
    }

    /// Per-parameter weights for the relative x-test.
    ///
    /// With `xtol_rel > 0`, `w_i = 1 / (n · x0_i)` so that parameters of very
    /// different magnitude contribute comparably; a zero start coordinate
    /// falls back to `1 / n`. Otherwise every weight is one.
    pub fn x_weights(&self, start: &Theta) -> Theta {
        let n = start.len() as f64;
        if self.xtol_rel > 0.0 {
            start.mapv(|x0| if x0 == 0.0 { 1.0 / n } else { (1.0 / (n * x0)).abs() })
        } else {
            Theta::ones(start.len())
        }
    }
}

impl Default for Tolerances {
    fn default() -> Self {
        Self { xtol_rel: 1e-4, xtol_abs: 0.0, ftol_rel: 0.0, ftol_abs: 0.0, max_eval: 1_000 }
    }
}

/// Box constraints `lower ≤ θ ≤ upper` applied per free parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: Theta,
    pub upper: Theta,
}

impl Bounds {
    /// Build a validated box.
    ///
    /// # Errors
    /// - [`OptError::BoundsLengthMismatch`] / [`OptError::InvalidBounds`] from
    ///   [`validate_bounds`].
    pub fn new(lower: Theta, upper: Theta) -> OptResult<Self> {
        validate_bounds(&lower, &upper)?;
        Ok(Self { lower, upper })
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    pub fn width(&self, index: usize) -> f64 {
        self.upper[index] - self.lower[index]
    }

    /// Clamp every coordinate into the box.
    pub fn project(&self, mut theta: Theta) -> Theta {
        for ((x, &lo), &hi) in theta.iter_mut().zip(self.lower.iter()).zip(self.upper.iter()) {
            *x = x.clamp(lo, hi);
        }
        theta
    }

    pub fn contains(&self, theta: &Theta) -> bool {
        theta
            .iter()
            .zip(self.lower.iter())
            .zip(self.upper.iter())
            .all(|((&x, &lo), &hi)| x >= lo && x <= hi)
    }

    /// Box restricted to the given coordinates, in the given order.
    pub fn subspace(&self, coords: &[usize]) -> Self {
        Self {
            lower: coords.iter().map(|&c| self.lower[c]).collect(),
            upper: coords.iter().map(|&c| self.upper[c]).collect(),
        }
    }
}

/// Optimizer-level configuration.
///
/// Fields:
/// - `algorithm: Algorithm` — bounded search to run.
/// - `tols: Tolerances` — stopping rules.
/// - `seed: Option<u64>` — RNG seed for stochastic searches; `None` draws
///   from OS entropy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MLEOptions {
    pub algorithm: Algorithm,
    pub tols: Tolerances,
    pub seed: Option<u64>,
}

impl MLEOptions {
    /// Create a new set of optimizer options; numeric validation lives in
    /// [`Tolerances::new`].
    pub fn new(algorithm: Algorithm, tols: Tolerances, seed: Option<u64>) -> Self {
        Self { algorithm, tols, seed }
    }
}

/// Canonical result returned by `maximize`.
///
/// - `theta_hat`: best parameter vector found (inside the box).
/// - `value`: best **log-likelihood** value `ℓ(θ)` (not the cost).
/// - `converged`: `true` if a tolerance rule stopped the search.
/// - `status`: termination status string (`FTOL_REACHED`, `XTOL_REACHED`,
///   `MAXEVAL_REACHED`, ...).
/// - `iterations`: number of optimizer iterations performed.
/// - `fn_evals`: number of likelihood evaluations.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimOutcome {
    pub theta_hat: Theta,
    pub value: f64,
    pub converged: bool,
    pub status: String,
    pub iterations: usize,
    pub fn_evals: u64,
}

impl OptimOutcome {
    /// Build a validated [`OptimOutcome`] from raw solver state.
    ///
    /// # Errors
    /// - Propagates any validation errors for `theta_hat` or `value`.
    pub fn new(
        theta_hat_opt: Option<Theta>, value: f64, termination: TerminationStatus, iterations: u64,
        fn_evals: u64,
    ) -> OptResult<Self> {
        let theta_hat = validate_theta_hat(theta_hat_opt)?;
        validate_value(value)?;
        let (converged, status) = match termination {
            TerminationStatus::NotTerminated => (false, "NOT_TERMINATED".to_string()),
            TerminationStatus::Terminated(TerminationReason::SolverExit(code)) => {
                let converged = code != "MAXEVAL_REACHED";
                (converged, code)
            }
            TerminationStatus::Terminated(reason) => (false, reason.to_string()),
        };
        Ok(Self { theta_hat, value, converged, status, iterations: iterations as usize, fn_evals })
    }
}
