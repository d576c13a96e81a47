//! loglik_optimizer::types — shared numeric aliases and solver wiring.
//!
//! Purpose
//! -------
//! Centralize the core numeric types and the Argmin state alias used by the
//! bounded derivative-free optimizers. Keeping these in one place lets the
//! solvers, the adapter and the runner stay agnostic to `ndarray` and Argmin
//! generics.
//!
//! Invariants & assumptions
//! ------------------------
//! - All optimizer vectors are `ndarray` containers over `f64`.
//! - `Cost` is the scalar `c(θ) = -ℓ(θ)`; higher layers flip the sign back
//!   into log-likelihood space.
//! - The searches are derivative-free, so the Argmin state carries no
//!   gradient, Jacobian or Hessian slots.
//!
//! Testing notes
//! -------------
//! - This module only defines aliases and constants; they are exercised by
//!   the solver and runner tests.
use argmin::core::IterState;
use ndarray::Array1;

/// Parameter vector `θ` for log-likelihood optimization.
pub type Theta = Array1<f64>;

/// Scalar objective value used by the optimizer (`c(θ) = -ℓ(θ)`).
pub type Cost = f64;

/// Argmin iteration state shared by every bounded search in this crate.
pub type SearchState = IterState<Theta, (), (), (), (), Cost>;

/// Fraction of each box width used as the initial simplex step.
pub const DEFAULT_STEP_FRACTION: f64 = 0.1;

/// Population size of the controlled random search is `factor · (n + 1)`.
pub const CRS_POPULATION_FACTOR: usize = 10;

/// Largest subspace handled by one inner simplex search of Subplex.
pub const SUBPLEX_MAX_SUBSPACE: usize = 5;
