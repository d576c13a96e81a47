//! loglik_optimizer::builders — bounded solver construction helpers.
//!
//! Purpose
//! -------
//! Provide small, focused builders for the three bounded searches. They
//! validate the start point against the box, wire the stopping rules from
//! [`MLEOptions`], and resolve the RNG seed of the stochastic search, so that
//! higher-level code can request a configured solver without touching the
//! solver internals.
//!
//! Conventions
//! -----------
//! - The builders do **not** set the initial parameter vector on the Argmin
//!   state; the runner does that through the executor.
//! - Errors are always reported via [`OptResult`].
//!
//! Testing notes
//! -------------
//! - Unit tests verify start-point validation and that seeded CRS2 builds
//!   are reproducible.
use crate::optimization::{
    errors::OptResult,
    loglik_optimizer::{
        Bounds, Theta,
        solvers::{Crs2, NelderMead, Subplex},
        traits::MLEOptions,
        validation::validate_start,
    },
};
use rand::Rng;

/// Construct a bounded Nelder–Mead search.
///
/// # Errors
/// - `BoundsLengthMismatch` / `StartOutOfBounds` if `theta0` does not fit the box.
pub fn build_nelder_mead(bounds: &Bounds, theta0: &Theta, opts: &MLEOptions) -> OptResult<NelderMead> {
    validate_start(theta0, &bounds.lower, &bounds.upper)?;
    Ok(NelderMead::new(bounds.clone(), &opts.tols, theta0))
}

/// Construct a bounded Subplex search.
///
/// # Errors
/// - `BoundsLengthMismatch` / `StartOutOfBounds` if `theta0` does not fit the box.
pub fn build_subplex(bounds: &Bounds, theta0: &Theta, opts: &MLEOptions) -> OptResult<Subplex> {
    validate_start(theta0, &bounds.lower, &bounds.upper)?;
    Ok(Subplex::new(bounds.clone(), &opts.tols, theta0))
}

/// Construct a CRS2-LM search seeded from `opts.seed`, or from OS entropy
/// when no seed is configured.
///
/// # Errors
/// - `BoundsLengthMismatch` / `StartOutOfBounds` if `theta0` does not fit the box.
pub fn build_crs2(bounds: &Bounds, theta0: &Theta, opts: &MLEOptions) -> OptResult<Crs2> {
    validate_start(theta0, &bounds.lower, &bounds.upper)?;
    let seed = opts.seed.unwrap_or_else(|| rand::rng().random());
    Ok(Crs2::new(bounds.clone(), &opts.tols, theta0, seed))
}
