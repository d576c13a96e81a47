//! Integration tests for the optimization engine.
//!
//! Purpose
//! -------
//! - Validate the end-to-end fitting path: observed tallies and a search box
//!   go in, the dispatcher runs one bounded search per chain, the likelihood
//!   feeds telemetry on every evaluation, and an aggregated
//!   `OptimizeResult` plus a CSV log come out.
//!
//! Coverage
//! --------
//! - `dispatch::optimize` with sequential and pooled execution, multi-chain
//!   datasets, fixed-value merging and boundary collisions.
//! - `likelihood::BsfsLikelihood` driven by a closed-form evaluator.
//! - `telemetry`: log header, one row per evaluation, completion events and
//!   the log file on disk.
//! - Fatal evaluator failures surfacing from `optimize`.
//!
//! Exclusions
//! ----------
//! - Solver internals and stopping rules, covered by unit tests in
//!   `optimization::loglik_optimizer`.
use std::{fs, sync::Arc};

use approx::assert_relative_eq;
use bsfs_infer::{
    demography::{IsolationMigration, ParameterSet},
    dispatch::{OptimizeConfig, OptimizeResult, SearchBox, optimize},
    likelihood::{EvaluatorSet, ProbabilityEvaluator},
    optimization::{
        errors::{OptError, OptResult},
        loglik_optimizer::{Algorithm, MLEOptions, Tolerances},
    },
};
use ndarray::{ArrayD, IxDyn, array};

const MU: f64 = 1e-6;

/// Two-cell tensor `[p, 1 - p]` with `p = theta_branch = 2 · Ne_A · μ`.
struct Bernoulli;

impl ProbabilityEvaluator for Bernoulli {
    fn evaluate(&self, theta_branch: f64, _: &[f64], _: Option<f64>) -> OptResult<ArrayD<f64>> {
        Ok(array![theta_branch, 1.0 - theta_branch].into_dyn())
    }
}

/// All-zero tensor: every evaluation is degenerate.
struct Vanishing;

impl ProbabilityEvaluator for Vanishing {
    fn evaluate(&self, _: f64, _: &[f64], _: Option<f64>) -> OptResult<ArrayD<f64>> {
        Ok(ArrayD::zeros(IxDyn(&[2])))
    }
}

/// Purpose
/// -------
/// Isolation-with-migration model with only `Ne_A` free, unit block length
/// and a migration rate well above the fallback threshold.
fn model() -> IsolationMigration {
    IsolationMigration::new(
        ("A", "B"),
        "A",
        MU,
        1.0,
        vec!["Ne_A".to_string()],
        ParameterSet::from_pairs([("Ne_B", 1e4), ("Ne_A_B", 2e4), ("me", 1e-3), ("T", 1e3)]),
    )
    .expect("model parameters form a complete partition")
}

/// Purpose
/// -------
/// Nelder–Mead config over `Ne_A ∈ [1e4, 4e5]`, i.e. `p ∈ [0.02, 0.8]`.
fn config(start: f64, chains: usize, processes: usize, log_dir: &std::path::Path) -> OptimizeConfig {
    let search = SearchBox::new(vec!["Ne_A".to_string()], vec![1e4], vec![4e5], vec![start])
        .expect("start lies inside the box");
    let tols = Tolerances::new(1e-8, 0.0, 1e-12, 0.0, 400).expect("tolerances are non-negative");
    let options = MLEOptions::new(Algorithm::NelderMead, tols, Some(3));
    OptimizeConfig::new(search, options, chains, processes, "itest", log_dir)
        .expect("chains is positive")
        .with_progress(false)
}

/// Three windows whose maximum-likelihood `p` is 0.3, 0.5 and 0.2.
fn windows() -> ArrayD<u64> {
    array![[30_u64, 70], [50, 50], [20, 80]].into_dyn()
}

fn run(processes: usize) -> OptimizeResult {
    let tmp = tempfile::tempdir().unwrap();
    let evaluators = EvaluatorSet::new(Arc::new(Bernoulli));
    optimize(&evaluators, 0, &windows(), &config(1e5, 3, processes, tmp.path()), &model()).unwrap()
}

#[test]
// Purpose
// -------
// A sequential multi-window run recovers each window's optimum and logs
// every evaluation.
//
// Given
// -----
// - Three windows, chains = 3, processes = 1.
//
// Expect
// ------
// - Tasks 0, 1, 2 with Ne_A ≈ p / (2μ) and the fixed values merged in.
// - One log row per evaluation across all tasks, three completion events.
// - A windowed header and a log file `itest.0.<timestamp>.log` holding the
//   header plus every row.
fn sequential_windows_recover_optima_and_log_every_evaluation() {
    // Arrange
    let tmp = tempfile::tempdir().unwrap();
    let evaluators = EvaluatorSet::new(Arc::new(Bernoulli));

    // Act
    let result = optimize(&evaluators, 0, &windows(), &config(1e5, 3, 1, tmp.path()), &model()).unwrap();

    // Assert
    assert_eq!(result.tasks.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
    assert!(result.windows_flag);
    assert_eq!(result.dataset_count, 3);
    for (index, p) in [0.3, 0.5, 0.2].into_iter().enumerate() {
        let task = &result.tasks[&index];
        assert_relative_eq!(task.values.get("Ne_A").unwrap(), p / (2.0 * MU), max_relative = 1e-2);
        assert_eq!(task.values.get("T"), Some(1e3));
        assert_eq!(task.values.get("Ne_B"), Some(1e4));
        assert!(task.lower_collisions.is_empty() && task.upper_collisions.is_empty());
    }

    let evals: u64 = result.tasks.values().map(|t| t.evals).sum();
    assert_eq!(result.iterations.len() as u64, evals);
    assert_eq!(result.completed_events, 3);
    assert_eq!(&result.header[..4], &["windows_idx", "iteration", "block_length", "likelihood"]);
    assert_eq!(result.header.len(), 4 + 2 * 5);
    assert!(result.header.contains(&"Ne_A_unscaled".to_string()));

    let name = result.log_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("itest.0.") && name.ends_with(".log"));
    let contents = fs::read_to_string(&result.log_path).unwrap();
    assert_eq!(contents.lines().count() as u64, evals + 1);
}

#[test]
// Purpose
// -------
// Pooled execution aggregates by task index and matches the sequential run.
//
// Given
// -----
// - The same three windows with processes = 2 and processes = 1.
//
// Expect
// ------
// - Identical task keys, optima and evaluation counts.
fn pooled_run_matches_sequential_run() {
    let sequential = run(1);
    let pooled = run(2);

    assert_eq!(pooled.tasks.len(), 3);
    for (index, task) in &sequential.tasks {
        assert_eq!(pooled.tasks[index].optimum, task.optimum);
        assert_eq!(pooled.tasks[index].evals, task.evals);
        assert_eq!(pooled.tasks[index].values, task.values);
    }
    assert_eq!(pooled.completed_events, 3);
    assert_eq!(pooled.iterations.len(), sequential.iterations.len());
}

#[test]
// Purpose
// -------
// An optimum on the box edge is reported as a lower collision.
//
// Given
// -----
// - A single dataset [0, 100] (likelihood decreasing in Ne_A) with the
//   search starting on the lower bound.
//
// Expect
// ------
// - Ne_A == 1e4 and lower collisions == [Ne_A]; no window column.
fn optimum_on_lower_bound_is_a_collision() {
    let tmp = tempfile::tempdir().unwrap();
    let evaluators = EvaluatorSet::new(Arc::new(Bernoulli));
    let data = array![0_u64, 100].into_dyn();

    let result = optimize(&evaluators, 4, &data, &config(1e4, 1, 1, tmp.path()), &model()).unwrap();

    let task = &result.tasks[&0];
    assert_eq!(task.values.get("Ne_A"), Some(1e4));
    assert_eq!(task.lower_collisions, vec!["Ne_A".to_string()]);
    assert!(task.upper_collisions.is_empty());
    assert!(!result.windows_flag);
    assert_eq!(result.header[0], "iteration");
}

#[test]
// Purpose
// -------
// A degenerate probability tensor aborts the run with its root cause and
// still leaves the log file behind.
//
// Given
// -----
// - An evaluator returning only zeros; pooled execution over three windows.
//
// Expect
// ------
// - `DegenerateProbabilities`; exactly one log file in the log directory.
fn degenerate_evaluator_aborts_run() {
    let tmp = tempfile::tempdir().unwrap();
    let evaluators = EvaluatorSet::new(Arc::new(Vanishing));

    let err = optimize(&evaluators, 0, &windows(), &config(1e5, 3, 2, tmp.path()), &model()).unwrap_err();

    assert!(matches!(err, OptError::DegenerateProbabilities { .. }), "{err}");
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
}
