//! Controlled random search with local mutation (CRS2-LM).
//!
//! A population of `10 · (n + 1)` points (the start point plus uniform draws
//! from the box) is evolved by reflecting a random point through the centroid
//! of a random subset that includes the current best. Failed reflections are
//! followed by a local mutation around the best point. The worst population
//! member is replaced whenever a trial improves on it.
use super::stopping::{EvalBudget, ExitCode, StoppingRules};
use crate::optimization::loglik_optimizer::{
    Bounds, Cost, Theta, Tolerances, types::{CRS_POPULATION_FACTOR, SearchState},
};
use argmin::core::{
    ArgminError, CostFunction, Error, KV, Problem, Solver, State, TerminationStatus,
};
use rand::{Rng, SeedableRng, rngs::SmallRng, seq::index::sample};

/// Redraws allowed for a reflection that leaves the box before falling back
/// to a uniform draw.
const MAX_REFLECTION_REDRAWS: usize = 1_000;

#[derive(Debug, Clone)]
pub struct Crs2 {
    bounds: Bounds,
    rules: StoppingRules,
    budget: EvalBudget,
    rng: SmallRng,
    population: Vec<Theta>,
    values: Vec<f64>,
    best: usize,
    exit: Option<ExitCode>,
}

impl Crs2 {
    pub fn new(bounds: Bounds, tols: &Tolerances, start: &Theta, seed: u64) -> Self {
        Self {
            rules: StoppingRules::new(tols, start),
            budget: EvalBudget::new(tols.max_eval),
            rng: SmallRng::seed_from_u64(seed),
            bounds,
            population: Vec::new(),
            values: Vec::new(),
            best: 0,
            exit: None,
        }
    }

    fn worst(&self) -> usize {
        let mut worst = 0;
        for (i, &v) in self.values.iter().enumerate() {
            if v > self.values[worst] {
                worst = i;
            }
        }
        worst
    }

    fn uniform_point(&mut self) -> Theta {
        (0..self.bounds.dim())
            .map(|i| self.rng.random_range(self.bounds.lower[i]..=self.bounds.upper[i]))
            .collect()
    }

    /// Reflection of a random member through the centroid of `n` others,
    /// one of which is always the best point.
    fn reflection(&mut self) -> Theta {
        let n = self.bounds.dim();
        let others = self.population.len() - 1;
        let picks_needed = n.min(others);
        for _ in 0..MAX_REFLECTION_REDRAWS {
            let best = self.best;
            let picks: Vec<usize> = sample(&mut self.rng, others, picks_needed)
                .iter()
                .map(|i| if i >= best { i + 1 } else { i })
                .collect();
            let Some((&from, rest)) = picks.split_last() else {
                break;
            };
            let mut centroid = self.population[best].clone();
            for &idx in rest {
                centroid += &self.population[idx];
            }
            centroid /= (rest.len() + 1) as f64;
            let trial = &centroid * 2.0 - &self.population[from];
            if self.bounds.contains(&trial) {
                return trial;
            }
        }
        self.uniform_point()
    }

    /// Local mutation `x̃_i = (1 + w_i) · best_i − w_i · trial_i`.
    fn mutation(&mut self, trial: &Theta) -> Theta {
        let best = self.population[self.best].clone();
        let mutated: Theta = best
            .iter()
            .zip(trial.iter())
            .map(|(&b, &t)| {
                let w: f64 = self.rng.random();
                (1.0 + w) * b - w * t
            })
            .collect();
        self.bounds.project(mutated)
    }

    /// Replace the worst member if `f` improves on it; tracks the best index.
    fn offer(&mut self, x: Theta, f: f64) -> bool {
        let worst = self.worst();
        if f >= self.values[worst] {
            return false;
        }
        self.population[worst] = x;
        self.values[worst] = f;
        if f < self.values[self.best] {
            self.best = worst;
        }
        true
    }

    fn evaluate<O>(&mut self, problem: &mut Problem<O>, x: &Theta) -> Result<Option<f64>, Error>
    where
        O: CostFunction<Param = Theta, Output = Cost>,
    {
        if !self.budget.spend() {
            return Ok(None);
        }
        problem.cost(x).map(Some)
    }
}

impl<O> Solver<O, SearchState> for Crs2
where
    O: CostFunction<Param = Theta, Output = Cost>,
{
    const NAME: &'static str = "CRS2-LM (bounded)";

    fn init(
        &mut self, problem: &mut Problem<O>, state: SearchState,
    ) -> Result<(SearchState, Option<KV>), Error> {
        let x0 = state.get_param().cloned().ok_or_else(|| {
            Error::new(ArgminError::NotInitialized {
                text: "CRS2 requires an initial parameter vector".to_string(),
            })
        })?;
        let size = CRS_POPULATION_FACTOR * (self.bounds.dim() + 1);
        let mut candidate = self.bounds.project(x0);
        while self.population.len() < size {
            match self.evaluate(problem, &candidate)? {
                Some(f) => {
                    if f < self.values.get(self.best).copied().unwrap_or(f64::INFINITY) {
                        self.best = self.values.len();
                    }
                    self.population.push(candidate);
                    self.values.push(f);
                }
                None => break,
            }
            candidate = self.uniform_point();
        }
        if self.population.len() < size || self.budget.exhausted() {
            self.exit = Some(ExitCode::MaxEvalReached);
        }
        let best = self.population[self.best].clone();
        Ok((state.param(best).cost(self.values[self.best]), None))
    }

    fn next_iter(
        &mut self, problem: &mut Problem<O>, state: SearchState,
    ) -> Result<(SearchState, Option<KV>), Error> {
        let x_best_old = self.population[self.best].clone();
        let f_best_old = self.values[self.best];

        let trial = self.reflection();
        match self.evaluate(problem, &trial)? {
            None => self.exit = Some(ExitCode::MaxEvalReached),
            Some(f_trial) => {
                if !self.offer(trial.clone(), f_trial) {
                    let mutated = self.mutation(&trial);
                    match self.evaluate(problem, &mutated)? {
                        None => self.exit = Some(ExitCode::MaxEvalReached),
                        Some(f_mutated) => {
                            self.offer(mutated, f_mutated);
                        }
                    }
                }
            }
        }

        let f_best = self.values[self.best];
        let x_best = self.population[self.best].clone();
        if self.exit.is_none() {
            if self.budget.exhausted() {
                self.exit = Some(ExitCode::MaxEvalReached);
            } else if f_best < f_best_old {
                if self.rules.f_converged(f_best, f_best_old) {
                    self.exit = Some(ExitCode::FtolReached);
                } else if self.rules.x_converged(&x_best, &x_best_old) {
                    self.exit = Some(ExitCode::XtolReached);
                }
            }
        }
        Ok((state.param(x_best).cost(f_best), None))
    }

    fn terminate(&mut self, _state: &SearchState) -> TerminationStatus {
        match self.exit {
            Some(code) => code.status(),
            None => TerminationStatus::NotTerminated,
        }
    }
}
