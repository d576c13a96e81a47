//! optimization — bounded MLE stack and unified error surface.
//!
//! Purpose
//! -------
//! Provide the optimization layer used to fit demographic models: an
//! Argmin-backed, derivative-free log-likelihood maximizer over a box and a
//! single error/result surface shared by the likelihood, dispatch and
//! telemetry layers.
//!
//! Key behaviors
//! -------------
//! - Expose a high-level API for **maximizing log-likelihoods** `ℓ(θ)`
//!   (`loglik_optimizer`) with Nelder–Mead, Subplex and CRS2 searches and
//!   NLopt-style stopping rules.
//! - Normalize configuration issues, numerical failures, worker-pool and
//!   telemetry failures, and backend solver errors into a single enum
//!   (`errors::OptError`) with a common result alias (`OptResult<T>`).
//!
//! Invariants & assumptions
//! ------------------------
//! - Searches never evaluate outside the configured box.
//! - Invalid states are reported as `OptError`, not panics.
//!
//! Conventions
//! -----------
//! - All solvers maximize `ℓ(θ)` by minimizing `c(θ) = -ℓ(θ)`; user-facing
//!   APIs and outcomes are expressed in terms of `ℓ`.
//! - Parameters are `ndarray` vectors in the caller's units.
//!
//! Downstream usage
//! ----------------
//! - `likelihood::BsfsLikelihood` implements `LogLikelihood`; the dispatcher
//!   calls `maximize` once per optimization task.
//! - Front-ends can import the curated surface via `optimization::prelude::*`.

pub mod errors;
pub mod loglik_optimizer;

pub mod prelude {
    pub use super::errors::{OptError, OptResult};
    pub use super::loglik_optimizer::prelude::*;
}
