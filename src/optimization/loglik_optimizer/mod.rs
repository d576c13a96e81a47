//! loglik_optimizer — bounded, derivative-free log-likelihood maximizer on argmin.
//!
//! Purpose
//! -------
//! Provide a high-level, Argmin-backed optimization layer for **maximizing
//! log-likelihoods** `ℓ(θ)` inside a box. Callers implement a single trait,
//! [`LogLikelihood`], and invoke [`maximize`] with a start point, a [`Bounds`]
//! box and [`MLEOptions`] selecting one of three searches.
//!
//! Key behaviors
//! -------------
//! - Convert user-supplied log-likelihoods `ℓ(θ)` into Argmin-compatible
//!   cost functions `c(θ) = -ℓ(θ)` via [`adapter::ArgMinAdapter`].
//! - Expose a single, user-facing entrypoint [`maximize`] that:
//!   - validates the initial guess with [`LogLikelihood::check`],
//!   - builds the search selected by [`Algorithm`] via [`builders`],
//!   - executes it via [`run::run_search`], and
//!   - normalizes results into an [`OptimOutcome`].
//! - Implement the searches themselves in [`solvers`]: bounded Nelder–Mead,
//!   Subplex and CRS2-LM, all stopping on whichever of relative/absolute
//!   x-tolerance, relative/absolute f-tolerance or the evaluation cap fires
//!   first.
//!
//! Invariants & assumptions
//! ------------------------
//! - The optimizer **always maximizes** `ℓ(θ)` by minimizing `c(θ) = -ℓ(θ)`.
//! - Every point handed to [`LogLikelihood::value`] lies inside the box, so
//!   the returned `theta_hat` does too.
//! - [`LogLikelihood::value`] reports invalid inputs as `OptError` values,
//!   never panics; any such error ends the run.
//! - Configuration types ([`Tolerances`], [`Bounds`]) are validated on
//!   construction.
//!
//! Conventions
//! -----------
//! - Parameters are [`Theta`] (`Array1<f64>`) in the caller's units; the
//!   relative x-test weights each coordinate by `1 / (n · x0_i)` to balance
//!   parameters of different magnitude.
//! - Termination status strings are `FTOL_REACHED`, `XTOL_REACHED` and
//!   `MAXEVAL_REACHED`.
//! - Errors bubble up as `OptResult<T>` / `OptError`.
//!
//! Downstream usage
//! ----------------
//! - The dispatcher wraps each optimization task's likelihood in a
//!   [`LogLikelihood`] and calls [`maximize`] once per task.
//!
//! Testing notes
//! -------------
//! - Unit tests in submodules cover the sign convention in [`adapter`],
//!   stopping rules and each search in [`solvers`], start-point checks in
//!   [`builders`], configuration invariants in [`traits`], and end-to-end
//!   runs on toy bowls in [`api`].

pub mod adapter;
pub mod api;
pub mod builders;
pub mod run;
pub mod solvers;
pub mod traits;
pub mod types;
pub mod validation;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::api::maximize;
pub use self::traits::{Algorithm, Bounds, LogLikelihood, MLEOptions, OptimOutcome, Tolerances};
pub use self::types::{Cost, Theta};

pub mod prelude {
    pub use super::api::maximize;
    pub use super::traits::{
        Algorithm, Bounds, LogLikelihood, MLEOptions, OptimOutcome, Tolerances,
    };
    pub use super::types::{Cost, Theta};
}
