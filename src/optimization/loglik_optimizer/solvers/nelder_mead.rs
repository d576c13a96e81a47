//! Bounded Nelder–Mead as an Argmin [`Solver`].
use super::{
    simplex::Simplex,
    stopping::{EvalBudget, ExitCode, StoppingRules},
};
use crate::optimization::loglik_optimizer::{
    Bounds, Cost, Theta, Tolerances, types::{DEFAULT_STEP_FRACTION, SearchState},
};
use argmin::core::{
    ArgminError, CostFunction, Error, KV, Problem, Solver, State, TerminationStatus,
};

#[derive(Debug, Clone)]
pub struct NelderMead {
    bounds: Bounds,
    rules: StoppingRules,
    budget: EvalBudget,
    simplex: Option<Simplex>,
    exit: Option<ExitCode>,
}

impl NelderMead {
    /// `start` only seeds the x-weights; the executor supplies the actual
    /// initial parameter vector.
    pub fn new(bounds: Bounds, tols: &Tolerances, start: &Theta) -> Self {
        Self {
            rules: StoppingRules::new(tols, start),
            budget: EvalBudget::new(tols.max_eval),
            bounds,
            simplex: None,
            exit: None,
        }
    }

    pub fn evaluations(&self) -> u64 {
        self.budget.used
    }
}

/// Initial per-coordinate steps: a fixed fraction of each box width.
pub(crate) fn initial_steps(bounds: &Bounds) -> Theta {
    (0..bounds.dim()).map(|i| DEFAULT_STEP_FRACTION * bounds.width(i)).collect()
}

impl<O> Solver<O, SearchState> for NelderMead
where
    O: CostFunction<Param = Theta, Output = Cost>,
{
    const NAME: &'static str = "Nelder-Mead (bounded)";

    fn init(
        &mut self, problem: &mut Problem<O>, state: SearchState,
    ) -> Result<(SearchState, Option<KV>), Error> {
        let x0 = state.get_param().cloned().ok_or_else(|| {
            Error::new(ArgminError::NotInitialized {
                text: "Nelder-Mead requires an initial parameter vector".to_string(),
            })
        })?;
        let x0 = self.bounds.project(x0);
        self.budget.spend();
        let f0 = problem.cost(&x0)?;
        let steps = initial_steps(&self.bounds);
        let mut eval = |x: &Theta| problem.cost(x);
        let simplex = Simplex::new(x0, f0, &steps, &self.bounds, &mut self.budget, &mut eval)?;
        if !simplex.is_complete() || self.budget.exhausted() {
            self.exit = Some(ExitCode::MaxEvalReached);
        }
        let (best, f_best) = simplex.best();
        let state = state.param(best.clone()).cost(f_best);
        self.simplex = Some(simplex);
        Ok((state, None))
    }

    fn next_iter(
        &mut self, problem: &mut Problem<O>, state: SearchState,
    ) -> Result<(SearchState, Option<KV>), Error> {
        let simplex = self.simplex.as_mut().ok_or_else(|| {
            Error::new(ArgminError::NotInitialized {
                text: "Nelder-Mead simplex was not built".to_string(),
            })
        })?;
        let mut eval = |x: &Theta| problem.cost(x);
        let completed = simplex.iterate(&self.bounds, &mut self.budget, &mut eval)?;
        let (best, f_best) = simplex.best();
        if !completed || self.budget.exhausted() {
            self.exit = Some(ExitCode::MaxEvalReached);
        } else if self.rules.f_converged(f_best, simplex.worst_value()) {
            self.exit = Some(ExitCode::FtolReached);
        } else if self.rules.x_converged(best, simplex.farthest_from_best()) {
            self.exit = Some(ExitCode::XtolReached);
        }
        Ok((state.param(best.clone()).cost(f_best), None))
    }

    fn terminate(&mut self, _state: &SearchState) -> TerminationStatus {
        match self.exit {
            Some(code) => code.status(),
            None => TerminationStatus::NotTerminated,
        }
    }
}
