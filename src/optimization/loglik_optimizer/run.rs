//! Execution helper that runs an `argmin` solver on a log-likelihood problem and
//! returns a crate-friendly [`OptimOutcome`].
use std::sync::atomic::Ordering;

use crate::optimization::{
    errors::OptResult,
    loglik_optimizer::{
        LogLikelihood, OptimOutcome, Theta, adapter::ArgMinAdapter, types::SearchState,
    },
};
use argmin::core::{Executor, Solver, State};

/// Run a bounded `argmin` search for a log-likelihood problem.
///
/// This is the shared runner used by all three searches. It wires up:
/// - the user model via [`ArgMinAdapter`],
/// - the chosen bounded `Solver`,
/// - the initial parameter `theta0`,
///   then executes the solver and converts the result into [`OptimOutcome`].
///
/// Every search reports its best point as the current state parameter, so the
/// outcome is read from the final state's parameter and cost.
///
/// # Errors
/// - Propagates any `argmin` runtime error. Errors raised by the
///   log-likelihood come back as the original `OptError`.
/// - Propagates any validation errors encountered when constructing
///   [`OptimOutcome`].
pub fn run_search<'a, F, S>(
    theta0: Theta, problem: ArgMinAdapter<'a, F>, solver: S,
) -> OptResult<OptimOutcome>
where
    F: LogLikelihood,
    S: Solver<ArgMinAdapter<'a, F>, SearchState> + Send + 'static,
{
    let counter = problem.eval_counter();
    let optimizer = Executor::new(problem, solver).configure(|state| state.param(theta0));

    let mut result = optimizer.run()?.state().clone();
    let iterations = result.get_iter();
    let termination = result.get_termination_status().clone();
    let cost = result.get_cost();
    OptimOutcome::new(
        result.take_param(),
        -cost,
        termination,
        iterations,
        counter.load(Ordering::Relaxed),
    )
}
