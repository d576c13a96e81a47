//! Bounded Nelder–Mead simplex shared by the simplex and subspace searches.
//!
//! The simplex lives in its own coordinate space; callers hand in an
//! evaluation closure that maps a vertex to a cost, so the same code drives
//! the full-space search and the per-subspace searches of Subplex. Every
//! trial point is projected onto the box before evaluation, which keeps all
//! vertices feasible.
use super::stopping::EvalBudget;
use crate::optimization::loglik_optimizer::{Bounds, Theta};
use argmin::core::Error;

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Vertices sorted by ascending cost.
#[derive(Debug, Clone)]
pub struct Simplex {
    points: Vec<Theta>,
    values: Vec<f64>,
}

/// Evaluate `x` if the budget allows; `None` once it is exhausted.
fn probe<E>(budget: &mut EvalBudget, eval: &mut E, x: &Theta) -> Result<Option<f64>, Error>
where
    E: FnMut(&Theta) -> Result<f64, Error>,
{
    if !budget.spend() {
        return Ok(None);
    }
    eval(x).map(Some)
}

impl Simplex {
    /// Build the initial simplex around `origin`.
    ///
    /// Vertex `i` moves coordinate `i` by `steps[i]`; the step is flipped when
    /// it would leave the box. If the budget runs out during construction the
    /// simplex keeps only the vertices that were evaluated.
    pub fn new<E>(
        origin: Theta, f_origin: f64, steps: &Theta, bounds: &Bounds, budget: &mut EvalBudget,
        eval: &mut E,
    ) -> Result<Self, Error>
    where
        E: FnMut(&Theta) -> Result<f64, Error>,
    {
        let mut points = vec![origin.clone()];
        let mut values = vec![f_origin];
        for i in 0..origin.len() {
            let mut vertex = origin.clone();
            let step = steps[i];
            vertex[i] = if origin[i] + step <= bounds.upper[i] {
                origin[i] + step
            } else {
                origin[i] - step
            };
            let vertex = bounds.project(vertex);
            match probe(budget, eval, &vertex)? {
                Some(f) => {
                    points.push(vertex);
                    values.push(f);
                }
                None => break,
            }
        }
        let mut simplex = Self { points, values };
        simplex.sort();
        Ok(simplex)
    }

    pub fn is_complete(&self) -> bool {
        self.points.len() == self.dim() + 1
    }

    pub fn dim(&self) -> usize {
        self.points[0].len()
    }

    pub fn best(&self) -> (&Theta, f64) {
        (&self.points[0], self.values[0])
    }

    pub fn worst_value(&self) -> f64 {
        self.values[self.values.len() - 1]
    }

    /// Largest per-coordinate distance between the best vertex and any other.
    pub fn farthest_from_best(&self) -> &Theta {
        let best = &self.points[0];
        let mut farthest = best;
        let mut dist = 0.0;
        for p in &self.points[1..] {
            let d = p
                .iter()
                .zip(best.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max);
            if d > dist {
                dist = d;
                farthest = p;
            }
        }
        farthest
    }

    fn sort(&mut self) {
        let mut order: Vec<usize> = (0..self.points.len()).collect();
        order.sort_by(|&a, &b| self.values[a].total_cmp(&self.values[b]));
        self.points = order.iter().map(|&i| self.points[i].clone()).collect();
        self.values = order.iter().map(|&i| self.values[i]).collect();
    }

    fn replace_worst(&mut self, x: Theta, f: f64) {
        let last = self.points.len() - 1;
        self.points[last] = x;
        self.values[last] = f;
    }

    /// One reflect/expand/contract/shrink step.
    ///
    /// Returns `Ok(false)` if the budget ran out before the step completed; the
    /// simplex then holds every point evaluated so far.
    pub fn iterate<E>(
        &mut self, bounds: &Bounds, budget: &mut EvalBudget, eval: &mut E,
    ) -> Result<bool, Error>
    where
        E: FnMut(&Theta) -> Result<f64, Error>,
    {
        let n = self.points.len() - 1;
        let worst = self.points[n].clone();
        let f_worst = self.values[n];
        let f_best = self.values[0];
        let f_second = self.values[n.saturating_sub(1)];

        let mut centroid = Theta::zeros(self.dim());
        for p in &self.points[..n] {
            centroid += p;
        }
        centroid /= n as f64;

        let reflected = bounds.project(&centroid + &((&centroid - &worst) * REFLECT));
        let Some(f_reflected) = probe(budget, eval, &reflected)? else {
            return Ok(false);
        };

        if f_reflected < f_best {
            let expanded = bounds.project(&centroid + &((&reflected - &centroid) * EXPAND));
            let Some(f_expanded) = probe(budget, eval, &expanded)? else {
                self.replace_worst(reflected, f_reflected);
                self.sort();
                return Ok(false);
            };
            if f_expanded < f_reflected {
                self.replace_worst(expanded, f_expanded);
            } else {
                self.replace_worst(reflected, f_reflected);
            }
        } else if f_reflected < f_second {
            self.replace_worst(reflected, f_reflected);
        } else {
            let contracted = if f_reflected < f_worst {
                bounds.project(&centroid + &((&reflected - &centroid) * CONTRACT))
            } else {
                bounds.project(&centroid + &((&worst - &centroid) * CONTRACT))
            };
            let Some(f_contracted) = probe(budget, eval, &contracted)? else {
                if f_reflected < f_worst {
                    self.replace_worst(reflected, f_reflected);
                    self.sort();
                }
                return Ok(false);
            };
            if f_contracted < f_reflected.min(f_worst) {
                self.replace_worst(contracted, f_contracted);
            } else {
                let best = self.points[0].clone();
                for i in 1..self.points.len() {
                    let shrunk = bounds.project(&best + &((&self.points[i] - &best) * SHRINK));
                    let Some(f_shrunk) = probe(budget, eval, &shrunk)? else {
                        self.sort();
                        return Ok(false);
                    };
                    self.points[i] = shrunk;
                    self.values[i] = f_shrunk;
                }
            }
        }
        self.sort();
        Ok(true)
    }
}
