//! Unified error surface for the optimization, likelihood, dispatch and
//! telemetry layers.
//!
//! Every failure that can stop an optimization run is normalized into
//! [`OptError`]. Variants carry the offending values so that the diagnostic
//! printed before exit names both the violated invariant and the value that
//! violated it. Backend errors raised inside `argmin` are unwrapped back into
//! the original [`OptError`] when possible, so a failure in the likelihood
//! surfaces with its own message rather than a generic solver error.
use argmin::core::{ArgminError, Error};

/// Crate-wide result alias for optimizer operations.
pub type OptResult<T> = Result<T, OptError>;

#[derive(Debug, Clone, PartialEq)]
pub enum OptError {
    // ---- Tolerances / options ----
    /// A stopping tolerance must be finite and non-negative.
    InvalidTolerance {
        name: &'static str,
        tol: f64,
        reason: &'static str,
    },
    /// Maximum evaluations needs to be positive.
    InvalidMaxEval {
        max_eval: u64,
        reason: &'static str,
    },
    /// Unknown optimization algorithm name.
    InvalidAlgorithm {
        name: String,
        reason: &'static str,
    },

    // ---- Search box ----
    /// Bounds, start point and parameter names must agree in length.
    BoundsLengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    /// Each lower bound must be finite and strictly below its upper bound.
    InvalidBounds {
        index: usize,
        lower: f64,
        upper: f64,
        reason: &'static str,
    },
    /// The start point must lie inside the search box.
    StartOutOfBounds {
        index: usize,
        value: f64,
        lower: f64,
        upper: f64,
    },

    // ---- Dispatch ----
    /// Chain count must be at least one.
    InvalidChains {
        chains: usize,
    },
    /// Multi-chain datasets need one leading-axis entry per chain.
    DatasetChainMismatch {
        chains: usize,
        found: usize,
    },
    /// Worker pool could not be created.
    WorkerPool {
        text: String,
    },
    /// A task finished without reporting a result.
    MissingTaskResult {
        task: usize,
    },

    // ---- Likelihood ----
    /// Probability tensor and observed tally must have identical shapes.
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    /// Probability tensor sums to a non-finite or non-positive total.
    DegenerateProbabilities {
        sum: f64,
    },
    /// The model flagged a fallback region but no fallback evaluator exists.
    MissingFallbackEvaluator,
    /// Probability-tensor evaluator failed.
    EvaluatorFailed {
        text: String,
    },
    /// Optimizer vector length does not match the free-parameter list.
    ParameterCountMismatch {
        expected: usize,
        found: usize,
    },
    /// A parameter required by the model is missing.
    UnknownParameter {
        name: String,
    },
    /// A parameter is listed as both free and fixed.
    OverlappingParameter {
        name: String,
    },
    /// A parameter value is outside the domain of the model.
    InvalidParameterValue {
        name: String,
        value: f64,
        reason: &'static str,
    },

    // ---- Cost function ----
    /// Cost function returned a non-finite value.
    NonFiniteCost {
        value: f64,
    },

    // ---- Optimizer outcome ----
    /// Estimated parameters must be finite.
    InvalidThetaHat {
        index: usize,
        value: f64,
        reason: &'static str,
    },
    /// Theta hat is missing
    MissingThetaHat,

    // ---- Run control / telemetry ----
    /// Run stopped because another worker raised the abort signal.
    Aborted,
    /// An iteration event carried a failure payload.
    TelemetryFailure {
        log_file: String,
        text: String,
    },
    /// Log file could not be written.
    Io {
        text: String,
    },

    // ---- Argmin ---
    /// Wrapper for argmin::InvalidParameter
    InvalidParameter {
        text: String,
    },
    /// Wrapper for argmin::NotImplemented
    NotImplemented {
        text: String,
    },
    /// Wrapper for argmin::NotInitialized
    NotInitialized {
        text: String,
    },
    /// Wrapper for argmin::ConditionViolated
    ConditionViolated {
        text: String,
    },
    /// Wrapper for argmin::CheckPointNotFound
    CheckPointNotFound {
        text: String,
    },
    /// Wrapper for argmin::PotentialBug
    PotentialBug {
        text: String,
    },
    /// Wrapper for argmin::ImpossibleError
    ImpossibleError {
        text: String,
    },
    /// Wrapper for other argmin::Error types
    BackendError {
        text: String,
    },

    // ---- Fallback ----
    UnknownError,
}

impl std::error::Error for OptError {}

impl std::fmt::Display for OptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // ---- Tolerances / options ----
            OptError::InvalidTolerance { name, tol, reason } => {
                write!(f, "Invalid tolerance {name}={tol}: {reason}")
            }
            OptError::InvalidMaxEval { max_eval, reason } => {
                write!(f, "Invalid maximum evaluations {max_eval}: {reason}")
            }
            OptError::InvalidAlgorithm { name, reason } => {
                write!(f, "Invalid optimization algorithm '{name}': {reason}")
            }

            // ---- Search box ----
            OptError::BoundsLengthMismatch { what, expected, found } => {
                write!(f, "Length mismatch for {what}: expected {expected}, found {found}")
            }
            OptError::InvalidBounds { index, lower, upper, reason } => {
                write!(f, "Invalid bounds at index {index}: [{lower}, {upper}]: {reason}")
            }
            OptError::StartOutOfBounds { index, value, lower, upper } => {
                write!(
                    f,
                    "Start point at index {index} is {value}, outside the box [{lower}, {upper}]"
                )
            }

            // ---- Dispatch ----
            OptError::InvalidChains { chains } => {
                write!(f, "Invalid chain count {chains}: must be at least 1")
            }
            OptError::DatasetChainMismatch { chains, found } => {
                write!(
                    f,
                    "Dataset has {found} entries along its leading axis but {chains} chains were requested"
                )
            }
            OptError::WorkerPool { text } => {
                write!(f, "Failed to build worker pool: {text}")
            }
            OptError::MissingTaskResult { task } => {
                write!(f, "Optimization task {task} finished without a result")
            }

            // ---- Likelihood ----
            OptError::ShapeMismatch { expected, found } => {
                write!(
                    f,
                    "Incompatible shapes in composite likelihood: probabilities {expected:?} vs data {found:?}"
                )
            }
            OptError::DegenerateProbabilities { sum } => {
                write!(f, "Probability tensor sums to {sum}, expected a finite positive total")
            }
            OptError::MissingFallbackEvaluator => {
                write!(f, "Parameters fall in the fallback region but no fallback evaluator was supplied")
            }
            OptError::EvaluatorFailed { text } => {
                write!(f, "Probability evaluator failed: {text}")
            }
            OptError::ParameterCountMismatch { expected, found } => {
                write!(f, "Parameter vector length mismatch: expected {expected}, found {found}")
            }
            OptError::UnknownParameter { name } => {
                write!(f, "Unknown or missing parameter '{name}'")
            }
            OptError::OverlappingParameter { name } => {
                write!(f, "Parameter '{name}' is listed as both free and fixed")
            }
            OptError::InvalidParameterValue { name, value, reason } => {
                write!(f, "Invalid value {value} for parameter '{name}': {reason}")
            }

            // ---- Cost function ----
            OptError::NonFiniteCost { value } => {
                write!(f, "Non-finite cost value: {value}")
            }

            // ---- Optimizer outcome ----
            OptError::InvalidThetaHat { index, value, reason } => {
                write!(f, "Invalid estimated parameter at index {index}: {value}: {reason}")
            }
            OptError::MissingThetaHat => {
                write!(f, "Missing estimated parameters (theta hat)")
            }

            // ---- Run control / telemetry ----
            OptError::Aborted => {
                write!(f, "Optimization aborted after a failure in another task")
            }
            OptError::TelemetryFailure { log_file, text } => {
                write!(f, "Something went wrong, check the log file {log_file:?}: {text}")
            }
            OptError::Io { text } => {
                write!(f, "I/O error: {text}")
            }

            // ---- Argmin ----
            OptError::InvalidParameter { text } => {
                write!(f, "Invalid parameter: {text}")
            }
            OptError::NotImplemented { text } => {
                write!(f, "Not implemented: {text}")
            }
            OptError::NotInitialized { text } => {
                write!(f, "Not initialized: {text}")
            }
            OptError::ConditionViolated { text } => {
                write!(f, "Condition violated: {text}")
            }
            OptError::CheckPointNotFound { text } => {
                write!(f, "Checkpoint not found: {text}")
            }
            OptError::PotentialBug { text } => {
                write!(f, "Potential bug: {text}")
            }
            OptError::ImpossibleError { text } => {
                write!(f, "Impossible error: {text}")
            }
            OptError::BackendError { text } => {
                write!(f, "Backend error: {text}")
            }

            // ---- Fallback ----
            OptError::UnknownError => {
                write!(f, "Unknown error")
            }
        }
    }
}

impl From<Error> for OptError {
    fn from(original_err: Error) -> Self {
        // Errors raised by our own cost function travel through argmin untouched.
        let original_err = match original_err.downcast::<OptError>() {
            Ok(opt_err) => return opt_err,
            Err(err) => err,
        };
        match original_err.downcast() {
            Ok(opt_err) => match opt_err {
                ArgminError::InvalidParameter { text } => OptError::InvalidParameter { text },
                ArgminError::NotImplemented { text } => OptError::NotImplemented { text },
                ArgminError::NotInitialized { text } => OptError::NotInitialized { text },
                ArgminError::ConditionViolated { text } => OptError::ConditionViolated { text },
                ArgminError::CheckpointNotFound { text } => OptError::CheckPointNotFound { text },
                ArgminError::PotentialBug { text } => OptError::PotentialBug { text },
                ArgminError::ImpossibleError { text } => OptError::ImpossibleError { text },
                _ => OptError::UnknownError,
            },
            Err(err) => OptError::BackendError { text: err.to_string() },
        }
    }
}

impl From<std::io::Error> for OptError {
    fn from(err: std::io::Error) -> Self {
        OptError::Io { text: err.to_string() }
    }
}

impl From<csv::Error> for OptError {
    fn from(err: csv::Error) -> Self {
        OptError::Io { text: err.to_string() }
    }
}
