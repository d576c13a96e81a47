//! demography — fixed interface between demographic models and the likelihood.
//!
//! Purpose
//! -------
//! Describe a parametric demographic model through a small, pure interface:
//! ordered free-parameter names, fixed name/value pairs, a rescaling step
//! producing model-native ("scaled") and user-facing ("unscaled") views, and
//! a projection from scaled parameters onto the inputs of a probability
//! evaluator.
//!
//! Key behaviors
//! -------------
//! - [`ParameterSet`] keeps named values in insertion order so logs and
//!   result records list parameters in a stable order.
//! - [`DemographicModel::bind`] maps an optimizer vector onto the free names.
//! - [`IsolationMigration`] implements the two-population isolation with
//!   migration model.
//!
//! Invariants & assumptions
//! ------------------------
//! - `rescale` and `evaluator_inputs` are pure; implementations are
//!   `Send + Sync` and shared read-only across optimization tasks.
//! - Names starting with `theta` are never written to the iteration log.

pub mod isolation_migration;

pub use self::isolation_migration::IsolationMigration;

use crate::optimization::{
    errors::{OptError, OptResult},
    loglik_optimizer::Theta,
};
use ndarray::Array1;

/// Ordered `(name, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    entries: Vec<(String, f64)>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut set = Self::new();
        for (name, value) in pairs {
            set.insert(name, value);
        }
        set
    }

    /// Insert or overwrite `name`, keeping the original position on overwrite.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    /// Value of `name`, or `UnknownParameter`.
    pub fn require(&self, name: &str) -> OptResult<f64> {
        self.get(name).ok_or_else(|| OptError::UnknownParameter { name: name.to_string() })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `self` followed by every entry of `other` (later entries win).
    pub fn merged(&self, other: &ParameterSet) -> ParameterSet {
        let mut out = self.clone();
        for (name, value) in other.iter() {
            out.insert(name, value);
        }
        out
    }
}

/// Inputs handed to a probability evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorInputs {
    /// Mutation-scaled branch-length scalar.
    pub theta_branch: f64,
    /// Coalescence / migration rate variables.
    pub rates: Array1<f64>,
    /// Split time in model units, when the model has one.
    pub time: Option<f64>,
    /// Parameters fall in the region handled by the fallback evaluator.
    pub fallback: bool,
}

/// Fixed interface of a demographic model.
pub trait DemographicModel: Send + Sync {
    /// Ordered names of the optimized parameters.
    fn free_parameters(&self) -> &[String];

    /// Parameters held constant, with their values.
    fn fixed_parameters(&self) -> &ParameterSet;

    /// Every model parameter in log order (free and fixed).
    fn parameter_order(&self) -> &[String];

    /// Effective block length used to scale mutation rates.
    fn block_length(&self) -> f64;

    /// Scaled (model units) and unscaled (user units) views of the full
    /// parameter set for the given free values.
    fn rescale(&self, free: &ParameterSet) -> OptResult<(ParameterSet, ParameterSet)>;

    /// Evaluator inputs derived from the scaled view.
    fn evaluator_inputs(&self, scaled: &ParameterSet) -> OptResult<EvaluatorInputs>;

    /// Parameters written to the iteration log.
    fn logged_parameters(&self) -> Vec<String> {
        self.parameter_order().iter().filter(|p| !p.starts_with("theta")).cloned().collect()
    }

    /// Name the entries of an optimizer vector.
    fn bind(&self, values: &Theta) -> OptResult<ParameterSet> {
        let names = self.free_parameters();
        if names.len() != values.len() {
            return Err(OptError::ParameterCountMismatch {
                expected: names.len(),
                found: values.len(),
            });
        }
        Ok(ParameterSet::from_pairs(names.iter().cloned().zip(values.iter().copied())))
    }
}
