//! Bounded derivative-free searches implemented as Argmin solvers.
//!
//! - [`NelderMead`]: local simplex search.
//! - [`Subplex`]: simplex searches over coordinate subspaces.
//! - [`Crs2`]: global controlled random search with local mutation.
//!
//! All three keep every evaluated point inside the box, count their own
//! evaluations against `max_eval`, and stop with an Argmin `SolverExit`
//! carrying one of the [`ExitCode`] strings.
pub mod crs;
pub mod nelder_mead;
pub mod simplex;
pub mod stopping;
pub mod subplex;

pub use self::crs::Crs2;
pub use self::nelder_mead::NelderMead;
pub use self::stopping::{EvalBudget, ExitCode, StoppingRules};
pub use self::subplex::Subplex;
