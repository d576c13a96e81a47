//! Validation helpers for log-likelihood optimization.
//!
//! This module centralizes common consistency checks used across the
//! optimizer interface:
//!
//! - **Tolerance checks**: [`verify_tolerance`] and [`verify_max_eval`]
//!   ensure stopping rules are finite and usable.
//! - **Search box**: [`validate_bounds`] and [`validate_start`] enforce
//!   matching lengths, finite ordered bounds and an in-box start point.
//! - **Parameter estimates**: [`validate_theta_hat`] ensures a candidate
//!   `theta_hat` exists and contains only finite values.
//! - **Objective values**: [`validate_value`] checks log-likelihood outputs
//!   for finiteness.
//!
//! These helpers standardize error reporting by returning domain-specific
//! [`OptError`] variants.
use crate::optimization::{
    errors::{OptError, OptResult},
    loglik_optimizer::Theta,
};

/// Validate a single stopping tolerance.
///
/// Zero disables the rule; negative or non-finite values are rejected.
///
/// # Errors
/// Returns [`OptError::InvalidTolerance`] naming the offending tolerance.
pub fn verify_tolerance(name: &'static str, tol: f64) -> OptResult<()> {
    if !tol.is_finite() {
        return Err(OptError::InvalidTolerance { name, tol, reason: "Tolerance must be finite." });
    }
    if tol < 0.0 {
        return Err(OptError::InvalidTolerance {
            name,
            tol,
            reason: "Tolerance must be non-negative.",
        });
    }
    Ok(())
}

/// Validate the evaluation budget.
///
/// # Errors
/// Returns [`OptError::InvalidMaxEval`] when `max_eval == 0`.
pub fn verify_max_eval(max_eval: u64) -> OptResult<()> {
    if max_eval == 0 {
        return Err(OptError::InvalidMaxEval {
            max_eval,
            reason: "Maximum evaluations must be greater than zero.",
        });
    }
    Ok(())
}

/// Validate a pair of bound vectors.
///
/// Checks:
/// - `lower.len() == upper.len()`
/// - every bound is finite and `lower[i] < upper[i]`
///
/// # Errors
/// - [`OptError::BoundsLengthMismatch`] for differing lengths.
/// - [`OptError::InvalidBounds`] for the first offending coordinate.
pub fn validate_bounds(lower: &Theta, upper: &Theta) -> OptResult<()> {
    if lower.len() != upper.len() {
        return Err(OptError::BoundsLengthMismatch {
            what: "upper bound",
            expected: lower.len(),
            found: upper.len(),
        });
    }
    for (index, (&lo, &hi)) in lower.iter().zip(upper.iter()).enumerate() {
        if !lo.is_finite() || !hi.is_finite() {
            return Err(OptError::InvalidBounds {
                index,
                lower: lo,
                upper: hi,
                reason: "Bounds must be finite.",
            });
        }
        if lo >= hi {
            return Err(OptError::InvalidBounds {
                index,
                lower: lo,
                upper: hi,
                reason: "Lower bound must be strictly below the upper bound.",
            });
        }
    }
    Ok(())
}

/// Validate that a start point matches the box and lies inside it.
///
/// # Errors
/// - [`OptError::BoundsLengthMismatch`] if the lengths differ.
/// - [`OptError::StartOutOfBounds`] for the first coordinate outside the box.
pub fn validate_start(start: &Theta, lower: &Theta, upper: &Theta) -> OptResult<()> {
    if start.len() != lower.len() {
        return Err(OptError::BoundsLengthMismatch {
            what: "start point",
            expected: lower.len(),
            found: start.len(),
        });
    }
    for (index, ((&value, &lo), &hi)) in start.iter().zip(lower.iter()).zip(upper.iter()).enumerate()
    {
        if !(value >= lo && value <= hi) {
            return Err(OptError::StartOutOfBounds { index, value, lower: lo, upper: hi });
        }
    }
    Ok(())
}

/// Validate and unwrap an estimated parameter vector (`theta_hat`).
///
/// # Errors
/// - [`OptError::MissingThetaHat`] if no vector was provided.
/// - [`OptError::InvalidThetaHat`] if any element is non-finite.
pub fn validate_theta_hat(theta_hat: Option<Theta>) -> OptResult<Theta> {
    match theta_hat {
        Some(t) => {
            for (index, &value) in t.iter().enumerate() {
                if !value.is_finite() {
                    return Err(OptError::InvalidThetaHat {
                        index,
                        value,
                        reason: "Parameter estimates must be finite.",
                    });
                }
            }
            Ok(t)
        }
        None => Err(OptError::MissingThetaHat),
    }
}

/// Validate that a scalar log-likelihood value is finite.
///
/// # Errors
/// Returns [`OptError::NonFiniteCost`] if the value is `NaN` or infinite.
pub fn validate_value(value: f64) -> OptResult<()> {
    if !value.is_finite() {
        return Err(OptError::NonFiniteCost { value });
    }
    Ok(())
}
