//! bsfs_infer — demographic inference from blockwise site-frequency spectra.
//!
//! Purpose
//! -------
//! Serve as the crate root for two pipelines sharing one tensor
//! representation, the bSFS tally:
//! - the **simulation tally pipeline**, which simulates coalescent replicates
//!   under two-population demographies and tallies them into bSFS tensors;
//! - the **optimization engine**, which fits demographic parameters by
//!   maximizing the composite likelihood of observed tallies against a
//!   model-predicted probability tensor, one bounded search per chain.
//!
//! Key behaviors
//! -------------
//! - `simulation` compiles configs, runs replicates (serially or on a rayon
//!   pool), recombines chunks and writes to sinks.
//! - `demography` fixes the model interface: free/fixed parameters,
//!   rescaling and evaluator inputs.
//! - `likelihood` turns a parameter vector into a composite log-likelihood
//!   and emits one telemetry event per evaluation.
//! - `dispatch` runs one optimization task per chain and aggregates results
//!   by task index, with boundary-collision diagnostics.
//! - `telemetry` owns the iteration log: CSV file, in-memory copy and live
//!   progress, fed through a single event channel.
//! - `optimization` provides the argmin-based solvers and the `OptError`
//!   surface.
//!
//! Invariants & assumptions
//! ------------------------
//! - Probability evaluators and demographic models are shared read-only
//!   across tasks; no global state is used.
//! - Any failure inside a likelihood evaluation or a simulation aborts the
//!   run and is returned to the caller.
//!
//! Conventions
//! -----------
//! - Tensors are `ndarray` arrays; observed tallies are `u64`.
//! - Logging goes through `tracing`; the crate never installs a subscriber.
//!
//! Testing notes
//! -------------
//! - Unit tests live next to each module; `tests/` holds end-to-end runs of
//!   both pipelines.

pub mod demography;
pub mod dispatch;
pub mod likelihood;
pub mod optimization;
pub mod simulation;
pub mod telemetry;
