//! High-level entry point for maximizing a user-provided `LogLikelihood`.
//!
//! This builds the bounded search selected in [`MLEOptions`], wraps the model
//! in an `ArgMinAdapter` (which *minimizes* `-ℓ(θ)`), and delegates the run to
//! `run_search`.
use crate::optimization::{
    errors::OptResult,
    loglik_optimizer::{
        OptimOutcome, Theta,
        adapter::ArgMinAdapter,
        builders::{build_crs2, build_nelder_mead, build_subplex},
        run::run_search,
        traits::{Algorithm, Bounds, LogLikelihood, MLEOptions},
    },
};

/// Maximize a log-likelihood `ℓ(θ)` inside a box with the chosen search.
///
/// # Behavior
/// - Validates the initial guess via `f.check(theta0, data)`.
/// - Builds the search for `opts.algorithm`, which validates `theta0` against
///   `bounds`.
/// - Runs it until one of the stopping rules in `opts.tols` fires.
///
/// # Errors
/// - Propagates any error from `f.check`.
/// - Propagates builder errors (start point outside the box).
/// - Propagates runtime errors, including any error raised by `f.value`.
///
/// # Returns
/// An [`OptimOutcome`] containing `theta_hat` (inside the box), the best value
/// `ℓ(θ̂)`, the termination status string, the iteration count and the number
/// of likelihood evaluations.
///
/// # Example
/// ```no_run
/// use ndarray::array;
/// use bsfs_infer::optimization::{
///     errors::OptResult,
///     loglik_optimizer::{maximize, Algorithm, Bounds, LogLikelihood, MLEOptions, Theta, Tolerances},
/// };
///
/// struct Bowl;
/// impl LogLikelihood for Bowl {
///     type Data = ();
///     fn value(&self, theta: &Theta, _: &()) -> OptResult<f64> {
///         Ok(-theta.dot(theta))
///     }
///     fn check(&self, _: &Theta, _: &()) -> OptResult<()> {
///         Ok(())
///     }
/// }
///
/// let bounds = Bounds::new(array![-1.0, -1.0], array![1.0, 1.0])?;
/// let tols = Tolerances::new(1e-6, 0.0, 0.0, 0.0, 500)?;
/// let opts = MLEOptions::new(Algorithm::NelderMead, tols, None);
/// let out = maximize(&Bowl, array![0.5, -0.5], &(), &bounds, &opts)?;
/// println!("θ̂ = {:?}", out.theta_hat);
/// # Ok::<(), bsfs_infer::optimization::errors::OptError>(())
/// ```
pub fn maximize<F: LogLikelihood>(
    f: &F, theta0: Theta, data: &F::Data, bounds: &Bounds, opts: &MLEOptions,
) -> OptResult<OptimOutcome> {
    f.check(&theta0, data)?;
    let problem = ArgMinAdapter::new(f, data);
    match opts.algorithm {
        Algorithm::NelderMead => {
            let solver = build_nelder_mead(bounds, &theta0, opts)?;
            run_search(theta0, problem, solver)
        }
        Algorithm::Subplex => {
            let solver = build_subplex(bounds, &theta0, opts)?;
            run_search(theta0, problem, solver)
        }
        Algorithm::Crs2 => {
            let solver = build_crs2(bounds, &theta0, opts)?;
            run_search(theta0, problem, solver)
        }
    }
}
