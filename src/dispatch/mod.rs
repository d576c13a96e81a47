//! dispatch — multi-chain optimization of a demographic model.
//!
//! Purpose
//! -------
//! Run one bounded maximization per independent dataset slice ("chain" or
//! "window"), either sequentially or on a rayon pool, with every task
//! reporting to one telemetry pipeline, and aggregate the per-task outcomes
//! by task index.
//!
//! Key behaviors
//! -------------
//! - [`optimize`] spawns the [`TelemetryPipeline`] before the first task and
//!   sends exactly one `Shutdown` after the last one, on success and on
//!   failure alike.
//! - With `processes <= 1` tasks run in the calling thread; otherwise on a
//!   pool of `processes` threads, reporting back over a channel in
//!   completion order.
//! - Any task failure is fatal: the shared [`AbortSignal`] stops the other
//!   tasks at their next likelihood call and the first error is returned.
//! - Optimum coordinates exactly equal to a bound are reported as lower or
//!   upper boundary collisions (diagnostic only).
//!
//! Conventions
//! -----------
//! - [`OptimizeSettings`] mirrors the `nlopt_*` keys of a JSON/YAML config;
//!   [`OptimizeConfig`] is the validated form. Non-positive tolerances in the
//!   settings disable the rule, a non-positive `nlopt_maxeval` lifts the cap.

use std::{collections::BTreeMap, path::PathBuf};

use crossbeam_channel::{Sender, unbounded};
use ndarray::{ArrayD, Axis};
use rayon::ThreadPoolBuilder;
use serde::Deserialize;
use tracing::{debug, info, info_span};

use crate::{
    demography::{DemographicModel, ParameterSet},
    likelihood::{BsfsLikelihood, EvaluatorSet},
    optimization::{
        errors::{OptError, OptResult},
        loglik_optimizer::{
            Algorithm, Bounds, MLEOptions, Theta, Tolerances, maximize,
            validation::validate_start,
        },
    },
    telemetry::{AbortSignal, TaskSummary, TelemetryConfig, TelemetryEvent, TelemetryPipeline},
};

/// Named search box with its start point.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchBox {
    names: Vec<String>,
    bounds: Bounds,
    start: Theta,
}

impl SearchBox {
    /// # Errors
    /// - `BoundsLengthMismatch` if names, bounds and start differ in length.
    /// - `InvalidBounds` / `StartOutOfBounds` from the box validation.
    pub fn new(
        names: Vec<String>, lower: Vec<f64>, upper: Vec<f64>, start: Vec<f64>,
    ) -> OptResult<Self> {
        for (what, len) in [("lower bound", lower.len()), ("upper bound", upper.len()), ("start point", start.len())] {
            if len != names.len() {
                return Err(OptError::BoundsLengthMismatch { what, expected: names.len(), found: len });
            }
        }
        let bounds = Bounds::new(Theta::from(lower), Theta::from(upper))?;
        let start = Theta::from(start);
        validate_start(&start, &bounds.lower, &bounds.upper)?;
        Ok(Self { names, bounds, start })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn start(&self) -> &Theta {
        &self.start
    }

    /// Names whose optimum sits exactly on the lower / upper bound.
    pub fn collisions(&self, optimum: &Theta) -> (Vec<String>, Vec<String>) {
        let mut lower = Vec::new();
        let mut upper = Vec::new();
        for (i, name) in self.names.iter().enumerate() {
            if optimum[i] == self.bounds.lower[i] {
                lower.push(name.clone());
            }
            if optimum[i] == self.bounds.upper[i] {
                upper.push(name.clone());
            }
        }
        (lower, upper)
    }
}

/// Validated optimization configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeConfig {
    pub search: SearchBox,
    pub options: MLEOptions,
    pub chains: usize,
    pub processes: usize,
    pub label: String,
    pub log_dir: PathBuf,
    pub progress: bool,
}

impl OptimizeConfig {
    /// # Errors
    /// - `InvalidChains` if `chains == 0`.
    pub fn new(
        search: SearchBox, options: MLEOptions, chains: usize, processes: usize,
        label: impl Into<String>, log_dir: impl Into<PathBuf>,
    ) -> OptResult<Self> {
        if chains == 0 {
            return Err(OptError::InvalidChains { chains });
        }
        Ok(Self {
            search,
            options,
            chains,
            processes,
            label: label.into(),
            log_dir: log_dir.into(),
            progress: true,
        })
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }
}

fn default_label() -> String {
    "optimize".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_one() -> usize {
    1
}

fn default_true() -> bool {
    true
}

/// Serde form of [`OptimizeConfig`] using the `nlopt_*` keys.
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizeSettings {
    pub nlopt_parameters: Vec<String>,
    pub nlopt_lower_bound: Vec<f64>,
    pub nlopt_upper_bound: Vec<f64>,
    pub nlopt_start_point: Vec<f64>,
    #[serde(default)]
    pub nlopt_algorithm: Option<String>,
    #[serde(default)]
    pub nlopt_xtol_rel: f64,
    #[serde(default)]
    pub nlopt_xtol_abs: f64,
    #[serde(default)]
    pub nlopt_ftol_rel: f64,
    #[serde(default)]
    pub nlopt_ftol_abs: f64,
    #[serde(default)]
    pub nlopt_maxeval: i64,
    #[serde(default = "default_one")]
    pub nlopt_chains: usize,
    #[serde(default = "default_one")]
    pub processes: usize,
    #[serde(default)]
    pub nlopt_seed: Option<u64>,
    #[serde(default = "default_label")]
    pub optimize_label: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_true")]
    pub progress: bool,
}

fn enabled(tol: f64) -> f64 {
    if tol > 0.0 { tol } else { 0.0 }
}

impl TryFrom<OptimizeSettings> for OptimizeConfig {
    type Error = OptError;

    fn try_from(s: OptimizeSettings) -> OptResult<Self> {
        let algorithm = match s.nlopt_algorithm.as_deref() {
            Some(name) => name.parse::<Algorithm>()?,
            None => Algorithm::default(),
        };
        let max_eval = if s.nlopt_maxeval > 0 { s.nlopt_maxeval as u64 } else { u64::MAX };
        let tols = Tolerances::new(
            enabled(s.nlopt_xtol_rel),
            enabled(s.nlopt_xtol_abs),
            enabled(s.nlopt_ftol_rel),
            enabled(s.nlopt_ftol_abs),
            max_eval,
        )?;
        let search = SearchBox::new(
            s.nlopt_parameters,
            s.nlopt_lower_bound,
            s.nlopt_upper_bound,
            s.nlopt_start_point,
        )?;
        let options = MLEOptions::new(algorithm, tols, s.nlopt_seed);
        Ok(OptimizeConfig::new(search, options, s.nlopt_chains, s.processes, s.optimize_label, s.log_dir)?
            .with_progress(s.progress))
    }
}

/// One unit of optimization work: a dataset slice and its seed.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationTask {
    pub index: usize,
    pub data: ArrayD<u64>,
    pub seed: Option<u64>,
}

/// Outcome of one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    /// Optimized free values merged with the model's fixed values.
    pub values: ParameterSet,
    pub optimum: f64,
    pub evals: u64,
    pub status: String,
    pub lower_collisions: Vec<String>,
    pub upper_collisions: Vec<String>,
}

/// Aggregated run record, keyed by task index.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeResult {
    pub header: Vec<String>,
    pub iterations: Vec<Vec<f64>>,
    pub dataset_count: usize,
    pub windows_flag: bool,
    pub tasks: BTreeMap<usize, TaskResult>,
    /// Completion events seen by the telemetry pipeline.
    pub completed_events: usize,
    pub log_path: PathBuf,
}

/// Everything a task needs, passed explicitly to each worker.
struct TaskContext<'a, M: DemographicModel + ?Sized> {
    evaluators: &'a EvaluatorSet,
    model: &'a M,
    config: &'a OptimizeConfig,
    windows_flag: bool,
    abort: AbortSignal,
}

impl<M: DemographicModel + ?Sized> TaskContext<'_, M> {
    fn run(&self, task: &OptimizationTask, events: Sender<TelemetryEvent>) -> OptResult<TaskResult> {
        if self.abort.is_raised() {
            return Err(OptError::Aborted);
        }
        let window = self.windows_flag.then_some(task.index);
        let likelihood = BsfsLikelihood::new(
            self.model,
            self.evaluators.clone(),
            window,
            events.clone(),
            self.abort.clone(),
        );
        let options = MLEOptions { seed: task.seed, ..self.config.options.clone() };
        let search = &self.config.search;
        let outcome = maximize(&likelihood, search.start().clone(), &task.data, search.bounds(), &options)?;

        let (lower_collisions, upper_collisions) = search.collisions(&outcome.theta_hat);
        let values = self.model.bind(&outcome.theta_hat)?.merged(self.model.fixed_parameters());
        let result = TaskResult {
            values,
            optimum: outcome.value,
            evals: outcome.fn_evals,
            status: outcome.status,
            lower_collisions,
            upper_collisions,
        };
        events
            .send(TelemetryEvent::Completed(TaskSummary {
                window: task.index,
                windows_flag: self.windows_flag,
                status: result.status.clone(),
                evals: result.evals,
                optimum: result.optimum,
                lower_collisions: result.lower_collisions.clone(),
                upper_collisions: result.upper_collisions.clone(),
            }))
            .map_err(|_| OptError::Aborted)?;
        Ok(result)
    }
}

/// Split the dataset into one task per chain.
fn build_tasks(dataset: &ArrayD<u64>, chains: usize, seed: Option<u64>) -> OptResult<Vec<OptimizationTask>> {
    let seed_for = |i: usize| seed.map(|s| s.wrapping_add(i as u64));
    if chains == 1 {
        return Ok(vec![OptimizationTask { index: 0, data: dataset.clone(), seed: seed_for(0) }]);
    }
    let found = dataset.shape().first().copied().unwrap_or(0);
    if found != chains {
        return Err(OptError::DatasetChainMismatch { chains, found });
    }
    Ok(dataset
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(index, slice)| OptimizationTask { index, data: slice.to_owned(), seed: seed_for(index) })
        .collect())
}

/// Prefer a root cause over the `Aborted` errors it triggered elsewhere.
fn record_error(first: &mut Option<OptError>, err: OptError) {
    match first {
        None => *first = Some(err),
        Some(OptError::Aborted) if err != OptError::Aborted => *first = Some(err),
        Some(_) => {}
    }
}

/// Pair the task outcome with the telemetry log, keeping the root cause.
///
/// A task error caused any telemetry failure that follows it, except
/// `Aborted`, which is what tasks see once the telemetry worker has died.
fn settle<T, L>(outcome: OptResult<T>, log: OptResult<L>) -> OptResult<(T, L)> {
    match (outcome, log) {
        (Err(OptError::Aborted), Err(log_err)) => Err(log_err),
        (outcome, log) => Ok((outcome?, log?)),
    }
}

/// Maximize the composite likelihood of `dataset` under `model`, one task per
/// chain.
///
/// # Errors
/// - `InvalidChains` / `DatasetChainMismatch` for an inconsistent chain
///   layout; `ParameterCountMismatch` if the search box does not match the
///   model's free parameters.
/// - The first task error (likelihood, evaluator or solver failure).
/// - `TelemetryFailure` / `Io` from the telemetry pipeline.
pub fn optimize<M: DemographicModel + ?Sized>(
    evaluators: &EvaluatorSet, replicate_idx: usize, dataset: &ArrayD<u64>,
    config: &OptimizeConfig, model: &M,
) -> OptResult<OptimizeResult> {
    let _span = info_span!("optimize", label = %config.label, replicate_idx).entered();
    let free = model.free_parameters();
    if free.len() != config.search.names().len() {
        return Err(OptError::ParameterCountMismatch {
            expected: free.len(),
            found: config.search.names().len(),
        });
    }
    if let Some(name) = config.search.names().iter().find(|n| !free.contains(n)) {
        return Err(OptError::UnknownParameter { name: name.clone() });
    }
    if config.chains == 0 {
        return Err(OptError::InvalidChains { chains: config.chains });
    }
    let windows_flag = config.chains > 1;
    let tasks = build_tasks(dataset, config.chains, config.options.seed)?;
    info!(
        tasks = tasks.len(),
        processes = config.processes,
        algorithm = %config.options.algorithm,
        "starting optimization"
    );

    let abort = AbortSignal::new();
    let telemetry = TelemetryPipeline::spawn(
        TelemetryConfig {
            log_dir: config.log_dir.clone(),
            label: config.label.clone(),
            replicate_idx,
            task_count: tasks.len(),
            windows_flag,
            logged_parameters: model.logged_parameters(),
            progress: config.progress,
        },
        abort.clone(),
    )?;
    let context = TaskContext { evaluators, model, config, windows_flag, abort: abort.clone() };

    let outcome = if config.processes <= 1 {
        run_sequential(&context, &tasks, &telemetry)
    } else {
        run_pooled(&context, &tasks, &telemetry, config.processes)
    };
    if outcome.is_err() {
        abort.raise();
    }
    let log = telemetry.finish();

    let (results, log) = settle(outcome, log)?;
    for index in 0..config.chains {
        if !results.contains_key(&index) {
            return Err(OptError::MissingTaskResult { task: index });
        }
    }
    debug!(iterations = log.iterations.len(), "optimization finished");
    Ok(OptimizeResult {
        header: log.header,
        iterations: log.iterations,
        dataset_count: config.chains,
        windows_flag,
        tasks: results,
        completed_events: log.completed,
        log_path: log.log_path,
    })
}

fn run_sequential<M: DemographicModel + ?Sized>(
    context: &TaskContext<'_, M>, tasks: &[OptimizationTask], telemetry: &TelemetryPipeline,
) -> OptResult<BTreeMap<usize, TaskResult>> {
    let mut results = BTreeMap::new();
    for task in tasks {
        let result = context.run(task, telemetry.sender())?;
        results.insert(task.index, result);
    }
    Ok(results)
}

fn run_pooled<M: DemographicModel + ?Sized>(
    context: &TaskContext<'_, M>, tasks: &[OptimizationTask], telemetry: &TelemetryPipeline,
    processes: usize,
) -> OptResult<BTreeMap<usize, TaskResult>> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(processes)
        .build()
        .map_err(|e| OptError::WorkerPool { text: e.to_string() })?;
    let (tx, rx) = unbounded::<(usize, OptResult<TaskResult>)>();
    pool.scope(|scope| {
        for task in tasks {
            let tx = tx.clone();
            let events = telemetry.sender();
            scope.spawn(move |_| {
                let result = context.run(task, events);
                if result.is_err() {
                    context.abort.raise();
                }
                // The receiver outlives the scope.
                let _ = tx.send((task.index, result));
            });
        }
    });
    drop(tx);

    let mut results = BTreeMap::new();
    let mut first_error = None;
    for (index, result) in rx.iter() {
        match result {
            Ok(result) => {
                results.insert(index, result);
            }
            Err(err) => record_error(&mut first_error, err),
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(results),
    }
}
