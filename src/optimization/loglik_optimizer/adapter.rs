//! Adapter that exposes a user `LogLikelihood` as an `argmin` problem.
//!
//! We convert a *maximization* of a log-likelihood `ℓ(θ)` into a *minimization*
//! problem by defining the cost as `c(θ) = -ℓ(θ)`. Evaluations are counted on
//! a shared atomic so the runner can report them after the executor has
//! consumed the problem.
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crate::optimization::{
    errors::OptError,
    loglik_optimizer::{
        traits::LogLikelihood,
        types::{Cost, Theta},
    },
};
use argmin::core::{CostFunction, Error};

/// Bridges a user `LogLikelihood` to `argmin`'s `CostFunction`.
///
/// - `CostFunction::cost` returns `-ℓ(θ)` (negative log-likelihood).
/// - Errors raised by the user's `value` are boxed into `argmin::core::Error`
///   and recovered as the original [`OptError`] by the runner.
#[derive(Debug, Clone)]
pub struct ArgMinAdapter<'a, F: LogLikelihood> {
    pub f: &'a F,
    pub data: &'a F::Data,
    evals: Arc<AtomicU64>,
}

impl<'a, F: LogLikelihood> CostFunction for ArgMinAdapter<'a, F> {
    type Param = Theta;
    type Output = Cost;

    /// Evaluate the cost `c(θ) = -ℓ(θ)`.
    ///
    /// # Errors
    /// Propagates any `OptError` from the user’s `value` and returns
    /// `NonFiniteCost` when the value is not finite.
    fn cost(&self, theta: &Self::Param) -> Result<Self::Output, Error> {
        self.evals.fetch_add(1, Ordering::Relaxed);
        let output = self.f.value(theta, self.data)?;
        if !output.is_finite() {
            return Err((OptError::NonFiniteCost { value: output }).into());
        }
        Ok(-output)
    }
}

impl<'a, F: LogLikelihood> ArgMinAdapter<'a, F> {
    /// Construct a new adapter over a user `LogLikelihood` and its data.
    pub fn new(f: &'a F, data: &'a F::Data) -> Self {
        Self { f, data, evals: Arc::new(AtomicU64::new(0)) }
    }

    /// Shared handle on the evaluation counter.
    pub fn eval_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.evals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::errors::OptResult;
    use ndarray::array;

    struct Bowl;

    impl LogLikelihood for Bowl {
        type Data = f64;

        fn value(&self, theta: &Theta, shift: &f64) -> OptResult<f64> {
            if theta[0] < 0.0 {
                return Ok(f64::NAN);
            }
            Ok(-(theta[0] - shift).powi(2))
        }

        fn check(&self, _theta: &Theta, _data: &f64) -> OptResult<()> {
            Ok(())
        }
    }

    #[test]
    // Purpose
    // -------
    // The adapter flips the sign of the log-likelihood and counts calls.
    //
    // Given
    // -----
    // - ℓ(θ) = -(θ - 1)^2 evaluated at θ = 3.
    //
    // Expect
    // ------
    // - cost = 4 and the counter reads one.
    fn cost_is_negated_log_likelihood_and_counted() {
        let shift = 1.0;
        let adapter = ArgMinAdapter::new(&Bowl, &shift);
        let counter = adapter.eval_counter();

        let cost = adapter.cost(&array![3.0]).unwrap();

        assert_eq!(cost, 4.0);
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    // Purpose
    // -------
    // Non-finite log-likelihoods are rejected as `NonFiniteCost`.
    //
    // Given
    // -----
    // - θ = -1, for which the toy model returns NaN.
    //
    // Expect
    // ------
    // - The error converts back into `OptError::NonFiniteCost`.
    fn non_finite_value_is_an_error() {
        let shift = 1.0;
        let adapter = ArgMinAdapter::new(&Bowl, &shift);

        let err = OptError::from(adapter.cost(&array![-1.0]).unwrap_err());

        assert!(matches!(err, OptError::NonFiniteCost { .. }));
    }
}
