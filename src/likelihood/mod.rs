//! likelihood — composite log-likelihood of an observed bSFS tally.
//!
//! Purpose
//! -------
//! Turn a candidate parameter vector into a composite log-likelihood:
//! name the free values, rescale them through the [`DemographicModel`],
//! query a [`ProbabilityEvaluator`] (or its fallback) for the expected
//! probability tensor and score the observed tally against it.
//!
//! Key behaviors
//! -------------
//! - [`composite_likelihood`] computes `Σ ln(P[i]) · A[i]` over cells with
//!   `P[i] > 0`; zero probabilities contribute nothing, so no `-inf`/`NaN`
//!   enters the sum.
//! - [`BsfsLikelihood`] implements [`LogLikelihood`] and emits exactly one
//!   iteration event per call, with a failure payload when the call fails.
//! - [`expected_tallies_grid`] evaluates probability tensors for a grid of
//!   parameter points, serially or on a rayon pool.
//!
//! Invariants & assumptions
//! ------------------------
//! - Evaluators are pure functions of their explicit arguments and are shared
//!   read-only between tasks as `Arc<dyn ProbabilityEvaluator>`.
//! - A probability tensor with a non-finite or non-positive total is an
//!   error ([`OptError::DegenerateProbabilities`]), never clamped.
//! - Shapes of probability tensor and tally must agree exactly.

use std::{
    cell::Cell,
    fmt,
    sync::Arc,
};

use crossbeam_channel::Sender;
use ndarray::{ArrayD, Axis, Zip};
use rayon::{ThreadPoolBuilder, prelude::*};
use tracing::debug;

use crate::{
    demography::{DemographicModel, ParameterSet},
    optimization::{
        errors::{OptError, OptResult},
        loglik_optimizer::{LogLikelihood, Theta},
    },
    telemetry::{AbortSignal, IterationRecord, TelemetryEvent},
};

/// Maps scaled evaluator inputs onto an expected probability tensor.
pub trait ProbabilityEvaluator: Send + Sync {
    /// Probability tensor for a branch-length scalar, a rate vector and an
    /// optional split time. The result must have the observed tally's shape.
    fn evaluate(&self, theta_branch: f64, rates: &[f64], time: Option<f64>) -> OptResult<ArrayD<f64>>;
}

/// Primary evaluator plus the one used in the fallback region.
#[derive(Clone)]
pub struct EvaluatorSet {
    primary: Arc<dyn ProbabilityEvaluator>,
    fallback: Option<Arc<dyn ProbabilityEvaluator>>,
}

impl EvaluatorSet {
    pub fn new(primary: Arc<dyn ProbabilityEvaluator>) -> Self {
        Self { primary, fallback: None }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn ProbabilityEvaluator>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Evaluator for the given region.
    ///
    /// # Errors
    /// - `MissingFallbackEvaluator` if `fallback` is set and none exists.
    pub fn select(&self, fallback: bool) -> OptResult<&dyn ProbabilityEvaluator> {
        if !fallback {
            return Ok(self.primary.as_ref());
        }
        self.fallback.as_deref().ok_or(OptError::MissingFallbackEvaluator)
    }
}

impl fmt::Debug for EvaluatorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluatorSet").field("fallback", &self.fallback.is_some()).finish()
    }
}

/// `Σ ln(etp[i]) · data[i]` over cells with `etp[i] > 0`.
///
/// # Errors
/// - `ShapeMismatch` if the tensors differ in shape.
pub fn composite_likelihood(etp: &ArrayD<f64>, data: &ArrayD<u64>) -> OptResult<f64> {
    if etp.shape() != data.shape() {
        return Err(OptError::ShapeMismatch {
            expected: etp.shape().to_vec(),
            found: data.shape().to_vec(),
        });
    }
    Ok(Zip::from(etp).and(data).fold(0.0, |acc, &p, &count| {
        if p > 0.0 { acc + p.ln() * count as f64 } else { acc }
    }))
}

/// Probability tensor for one named point, after rescaling and
/// evaluator selection.
pub fn expected_tallies<M: DemographicModel + ?Sized>(
    evaluators: &EvaluatorSet, model: &M, free: &ParameterSet,
) -> OptResult<ArrayD<f64>> {
    let (scaled, _) = model.rescale(free)?;
    let inputs = model.evaluator_inputs(&scaled)?;
    let evaluator = evaluators.select(inputs.fallback)?;
    let rates = inputs.rates.to_vec();
    evaluator.evaluate(inputs.theta_branch, &rates, inputs.time)
}

/// Probability tensors for a grid of points, stacked along a new leading
/// axis in input order.
///
/// `processes <= 1` evaluates serially; otherwise on a rayon pool of that
/// many threads.
///
/// # Errors
/// - The first evaluation error.
/// - `ShapeMismatch` if the tensors do not share one shape.
/// - `WorkerPool` if the pool cannot be built.
pub fn expected_tallies_grid<M: DemographicModel + ?Sized>(
    evaluators: &EvaluatorSet, model: &M, points: &[ParameterSet], processes: usize,
) -> OptResult<ArrayD<f64>> {
    debug!(points = points.len(), processes, "evaluating expected tallies grid");
    let tensors: Vec<ArrayD<f64>> = if processes <= 1 {
        points.iter().map(|p| expected_tallies(evaluators, model, p)).collect::<OptResult<_>>()?
    } else {
        let pool = ThreadPoolBuilder::new()
            .num_threads(processes)
            .build()
            .map_err(|e| OptError::WorkerPool { text: e.to_string() })?;
        pool.install(|| {
            points
                .par_iter()
                .map(|p| expected_tallies(evaluators, model, p))
                .collect::<OptResult<Vec<_>>>()
        })?
    };
    if let Some(first) = tensors.first() {
        if let Some(other) = tensors.iter().find(|t| t.shape() != first.shape()) {
            return Err(OptError::ShapeMismatch {
                expected: first.shape().to_vec(),
                found: other.shape().to_vec(),
            });
        }
    }
    let views: Vec<_> = tensors.iter().map(|t| t.view()).collect();
    ndarray::stack(Axis(0), &views).map_err(|e| OptError::EvaluatorFailed { text: e.to_string() })
}

/// Likelihood of one optimization task.
///
/// Holds everything the task needs explicitly: the model, the evaluators,
/// the task's window index, its iteration counter, a producer handle on the
/// telemetry channel and the run's abort signal.
pub struct BsfsLikelihood<'m, M: DemographicModel + ?Sized> {
    model: &'m M,
    evaluators: EvaluatorSet,
    window: Option<usize>,
    iteration: Cell<u64>,
    logged: Vec<String>,
    events: Sender<TelemetryEvent>,
    abort: AbortSignal,
}

struct Evaluation {
    likelihood: f64,
    scaled: Vec<f64>,
    unscaled: Vec<f64>,
}

impl<'m, M: DemographicModel + ?Sized> BsfsLikelihood<'m, M> {
    pub fn new(
        model: &'m M, evaluators: EvaluatorSet, window: Option<usize>,
        events: Sender<TelemetryEvent>, abort: AbortSignal,
    ) -> Self {
        let logged = model.logged_parameters();
        Self { model, evaluators, window, iteration: Cell::new(0), logged, events, abort }
    }

    /// Number of calls so far.
    pub fn iterations(&self) -> u64 {
        self.iteration.get()
    }

    fn snapshot(&self, view: &ParameterSet) -> Vec<f64> {
        self.logged.iter().map(|p| view.get(p).unwrap_or(f64::NAN)).collect()
    }

    fn evaluate(&self, theta: &Theta, data: &ArrayD<u64>) -> (OptResult<f64>, Vec<f64>, Vec<f64>) {
        let blank = || vec![f64::NAN; self.logged.len()];
        let free = match self.model.bind(theta) {
            Ok(free) => free,
            Err(e) => return (Err(e), blank(), blank()),
        };
        let (scaled, unscaled) = match self.model.rescale(&free) {
            Ok(views) => views,
            Err(e) => return (Err(e), blank(), blank()),
        };
        let snapshot = (self.snapshot(&scaled), self.snapshot(&unscaled));
        let likelihood = self.score(&scaled, data);
        (likelihood, snapshot.0, snapshot.1)
    }

    fn score(&self, scaled: &ParameterSet, data: &ArrayD<u64>) -> OptResult<f64> {
        let inputs = self.model.evaluator_inputs(scaled)?;
        let evaluator = self.evaluators.select(inputs.fallback)?;
        let rates = inputs.rates.to_vec();
        let etp = evaluator.evaluate(inputs.theta_branch, &rates, inputs.time)?;
        let sum = etp.sum();
        if !sum.is_finite() || sum <= 0.0 {
            return Err(OptError::DegenerateProbabilities { sum });
        }
        composite_likelihood(&etp, data)
    }

    fn emit(&self, evaluation: &Evaluation, failure: Option<String>) -> OptResult<()> {
        let record = IterationRecord {
            window: self.window,
            iteration: self.iteration.get(),
            block_length: self.model.block_length(),
            likelihood: evaluation.likelihood,
            scaled: evaluation.scaled.clone(),
            unscaled: evaluation.unscaled.clone(),
        };
        // A closed channel means the pipeline stopped on another task's failure.
        self.events
            .send(TelemetryEvent::Iteration { record, failure })
            .map_err(|_| OptError::Aborted)
    }
}

impl<M: DemographicModel + ?Sized> LogLikelihood for BsfsLikelihood<'_, M> {
    type Data = ArrayD<u64>;

    fn value(&self, theta: &Theta, data: &Self::Data) -> OptResult<f64> {
        if self.abort.is_raised() {
            return Err(OptError::Aborted);
        }
        self.iteration.set(self.iteration.get() + 1);
        let (result, scaled, unscaled) = self.evaluate(theta, data);
        match result {
            Ok(likelihood) => {
                self.emit(&Evaluation { likelihood, scaled, unscaled }, None)?;
                Ok(likelihood)
            }
            Err(err) => {
                let evaluation = Evaluation { likelihood: f64::NAN, scaled, unscaled };
                // The original error wins over a closed channel.
                let _ = self.emit(&evaluation, Some(err.to_string()));
                Err(err)
            }
        }
    }

    fn check(&self, theta: &Theta, _data: &Self::Data) -> OptResult<()> {
        let expected = self.model.free_parameters().len();
        if theta.len() != expected {
            return Err(OptError::ParameterCountMismatch { expected, found: theta.len() });
        }
        Ok(())
    }
}
