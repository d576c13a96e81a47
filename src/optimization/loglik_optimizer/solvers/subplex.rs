//! Subplex: simplex searches on a sequence of coordinate subspaces.
//!
//! Each outer iteration orders the coordinates by how far they moved in the
//! previous iteration, cuts them into subspaces of at most
//! [`SUBPLEX_MAX_SUBSPACE`] coordinates, and runs a bounded simplex search in
//! each subspace with the remaining coordinates frozen. Step sizes are then
//! rescaled from the observed progress.
use super::{
    nelder_mead::initial_steps,
    simplex::Simplex,
    stopping::{EvalBudget, ExitCode, StoppingRules},
};
use crate::optimization::loglik_optimizer::{
    Bounds, Cost, Theta, Tolerances, types::{SUBPLEX_MAX_SUBSPACE, SearchState},
};
use argmin::core::{
    ArgminError, CostFunction, Error, KV, Problem, Solver, State, TerminationStatus,
};

/// Bounds on the step rescaling factor between outer iterations.
const STEP_SCALE_MIN: f64 = 0.1;
const STEP_SCALE_MAX: f64 = 10.0;
/// Step factor used when there is a single subspace.
const SINGLE_SUBSPACE_SCALE: f64 = 0.25;
/// Inner simplex steps allowed per subspace coordinate.
const INNER_STEPS_PER_COORD: usize = 100;

#[derive(Debug, Clone)]
pub struct Subplex {
    bounds: Bounds,
    rules: StoppingRules,
    budget: EvalBudget,
    x: Theta,
    fx: f64,
    steps: Theta,
    last_move: Theta,
    exit: Option<ExitCode>,
}

impl Subplex {
    pub fn new(bounds: Bounds, tols: &Tolerances, start: &Theta) -> Self {
        let steps = initial_steps(&bounds);
        Self {
            rules: StoppingRules::new(tols, start),
            budget: EvalBudget::new(tols.max_eval),
            x: start.clone(),
            fx: f64::INFINITY,
            last_move: steps.clone(),
            steps,
            bounds,
            exit: None,
        }
    }
}

/// Coordinates ordered by decreasing movement, cut into subspaces.
///
/// A trailing single coordinate is merged into the previous subspace so
/// that every subspace search has at least two dimensions when `n > 1`.
pub(crate) fn partition(last_move: &Theta) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..last_move.len()).collect();
    order.sort_by(|&a, &b| last_move[b].abs().total_cmp(&last_move[a].abs()));
    let mut subspaces: Vec<Vec<usize>> =
        order.chunks(SUBPLEX_MAX_SUBSPACE).map(|c| c.to_vec()).collect();
    if subspaces.len() > 1 && subspaces[subspaces.len() - 1].len() == 1 {
        if let Some(tail) = subspaces.pop() {
            if let Some(prev) = subspaces.last_mut() {
                prev.extend(tail);
            }
        }
    }
    subspaces
}

impl Subplex {
    /// Simplex search on one subspace; updates `self.x` / `self.fx`.
    ///
    /// Returns `Ok(false)` when the evaluation budget ran out.
    fn search_subspace<O>(&mut self, problem: &mut Problem<O>, coords: &[usize]) -> Result<bool, Error>
    where
        O: CostFunction<Param = Theta, Output = Cost>,
    {
        let sub_bounds = self.bounds.subspace(coords);
        let sub_rules = self.rules.restricted(coords);
        let origin: Theta = coords.iter().map(|&c| self.x[c]).collect();
        let sub_steps: Theta = coords.iter().map(|&c| self.steps[c].abs()).collect();
        let frozen = self.x.clone();
        let mut eval = |y: &Theta| {
            let mut full = frozen.clone();
            for (k, &c) in coords.iter().enumerate() {
                full[c] = y[k];
            }
            problem.cost(&full)
        };

        let mut simplex =
            Simplex::new(origin, self.fx, &sub_steps, &sub_bounds, &mut self.budget, &mut eval)?;
        let mut budget_left = simplex.is_complete();
        if budget_left {
            for _ in 0..INNER_STEPS_PER_COORD * coords.len() {
                if !simplex.iterate(&sub_bounds, &mut self.budget, &mut eval)? {
                    budget_left = false;
                    break;
                }
                let (best, f_best) = simplex.best();
                if sub_rules.f_converged(f_best, simplex.worst_value())
                    || sub_rules.x_converged(best, simplex.farthest_from_best())
                {
                    break;
                }
            }
        }
        let (best, f_best) = simplex.best();
        if f_best <= self.fx {
            for (k, &c) in coords.iter().enumerate() {
                self.x[c] = best[k];
            }
            self.fx = f_best;
        }
        Ok(budget_left && !self.budget.exhausted())
    }

    fn rescale_steps(&mut self, delta: &Theta, subspace_count: usize) {
        let factor = if subspace_count > 1 {
            let moved: f64 = delta.iter().map(|d| d.abs()).sum();
            let stepped: f64 = self.steps.iter().map(|s| s.abs()).sum();
            if stepped > 0.0 {
                (moved / stepped).clamp(STEP_SCALE_MIN, STEP_SCALE_MAX)
            } else {
                STEP_SCALE_MIN
            }
        } else {
            SINGLE_SUBSPACE_SCALE
        };
        for i in 0..self.steps.len() {
            let size = (factor * self.steps[i].abs()).min(self.bounds.width(i));
            self.steps[i] = if delta[i] > 0.0 {
                size
            } else if delta[i] < 0.0 {
                -size
            } else {
                -self.steps[i].signum() * size
            };
        }
    }
}

impl<O> Solver<O, SearchState> for Subplex
where
    O: CostFunction<Param = Theta, Output = Cost>,
{
    const NAME: &'static str = "Subplex (bounded)";

    fn init(
        &mut self, problem: &mut Problem<O>, state: SearchState,
    ) -> Result<(SearchState, Option<KV>), Error> {
        let x0 = state.get_param().cloned().ok_or_else(|| {
            Error::new(ArgminError::NotInitialized {
                text: "Subplex requires an initial parameter vector".to_string(),
            })
        })?;
        self.x = self.bounds.project(x0);
        self.budget.spend();
        self.fx = problem.cost(&self.x)?;
        if self.budget.exhausted() {
            self.exit = Some(ExitCode::MaxEvalReached);
        }
        Ok((state.param(self.x.clone()).cost(self.fx), None))
    }

    fn next_iter(
        &mut self, problem: &mut Problem<O>, state: SearchState,
    ) -> Result<(SearchState, Option<KV>), Error> {
        let x_prev = self.x.clone();
        let f_prev = self.fx;
        let subspaces = partition(&self.last_move);
        for coords in &subspaces {
            if !self.search_subspace(problem, coords)? {
                self.exit = Some(ExitCode::MaxEvalReached);
                break;
            }
        }
        let delta = &self.x - &x_prev;
        if self.exit.is_none() {
            if self.rules.f_converged(self.fx, f_prev) {
                self.exit = Some(ExitCode::FtolReached);
            } else if self.rules.x_converged(&self.x, &x_prev) {
                self.exit = Some(ExitCode::XtolReached);
            }
        }
        self.rescale_steps(&delta, subspaces.len());
        self.last_move = delta;
        Ok((state.param(self.x.clone()).cost(self.fx), None))
    }

    fn terminate(&mut self, _state: &SearchState) -> TerminationStatus {
        match self.exit {
            Some(code) => code.status(),
            None => TerminationStatus::NotTerminated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    // Purpose
    // -------
    // Coordinates are grouped by decreasing movement and no trailing
    // subspace is one-dimensional.
    //
    // Given
    // -----
    // - Six coordinates with movements [0.1, 5, 0.2, 3, 0.05, 1].
    //
    // Expect
    // ------
    // - A single subspace holding all six, largest movers first.
    fn partition_orders_by_movement_and_merges_singletons() {
        let subspaces = partition(&array![0.1, 5.0, 0.2, 3.0, 0.05, 1.0]);

        assert_eq!(subspaces, vec![vec![1, 3, 5, 2, 0, 4]]);
    }

    #[test]
    // Purpose
    // -------
    // Small problems form one subspace.
    //
    // Given
    // -----
    // - Three coordinates.
    //
    // Expect
    // ------
    // - One subspace of three.
    fn partition_keeps_small_problems_whole() {
        let subspaces = partition(&array![1.0, 2.0, 3.0]);

        assert_eq!(subspaces, vec![vec![2, 1, 0]]);
    }
}
