//! Two-population isolation with migration.
//!
//! Parameters (for sample populations `A` and `B`):
//! `Ne_<A>`, `Ne_<B>`, `Ne_<A>_<B>` (ancestral size), `me` (migration rate per
//! lineage per generation, backwards in time) and `T` (split time in
//! generations). Each is either free or fixed.
//!
//! Scaling is relative to the reference population size `N = Ne_<ref>`:
//! `theta = 4 N μ L`, relative sizes `Ne_x / N`, `M = 4 N me`, `T / 2N`.
//! The evaluator receives `theta / 2`, the coalescence rates `N / Ne_x` and
//! `M`; a vanishing migration rate switches to the fallback evaluator, which
//! takes the three coalescence rates only.
use crate::{
    demography::{DemographicModel, EvaluatorInputs, ParameterSet},
    optimization::errors::{OptError, OptResult},
};
use ndarray::Array1;

/// Migration rates at or below this value use the fallback evaluator.
pub const MIGRATION_FALLBACK_THRESHOLD: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct IsolationMigration {
    mu: f64,
    block_length: f64,
    reference: String,
    names: ImNames,
    order: Vec<String>,
    free: Vec<String>,
    fixed: ParameterSet,
}

#[derive(Debug, Clone, PartialEq)]
struct ImNames {
    ne_a: String,
    ne_b: String,
    ne_ab: String,
    me: String,
    time: String,
}

impl IsolationMigration {
    /// Build the model.
    ///
    /// - `pops`: the two sample population ids.
    /// - `reference`: `Ne_*` parameter used as the scaling size; one of the
    ///   three size parameters.
    /// - `free` / `fixed`: partition of the five model parameters.
    ///
    /// # Errors
    /// - `UnknownParameter` if a name is not a model parameter, or a model
    ///   parameter is neither free nor fixed.
    /// - `OverlappingParameter` if a parameter is both free and fixed.
    /// - `InvalidParameterValue` for a non-positive `mu` or block length.
    pub fn new(
        pops: (&str, &str), reference: &str, mu: f64, block_length: f64, free: Vec<String>,
        fixed: ParameterSet,
    ) -> OptResult<Self> {
        let (a, b) = pops;
        let names = ImNames {
            ne_a: format!("Ne_{a}"),
            ne_b: format!("Ne_{b}"),
            ne_ab: format!("Ne_{a}_{b}"),
            me: "me".to_string(),
            time: "T".to_string(),
        };
        let order = vec![
            names.ne_a.clone(),
            names.ne_b.clone(),
            names.ne_ab.clone(),
            names.me.clone(),
            names.time.clone(),
        ];
        if !(mu.is_finite() && mu > 0.0) {
            return Err(OptError::InvalidParameterValue {
                name: "mu".to_string(),
                value: mu,
                reason: "Mutation rate must be finite and positive.",
            });
        }
        if !(block_length.is_finite() && block_length > 0.0) {
            return Err(OptError::InvalidParameterValue {
                name: "block_length".to_string(),
                value: block_length,
                reason: "Block length must be finite and positive.",
            });
        }
        let reference = format!("Ne_{reference}");
        if ![&names.ne_a, &names.ne_b, &names.ne_ab].contains(&&reference) {
            return Err(OptError::UnknownParameter { name: reference });
        }
        for name in free.iter().map(String::as_str).chain(fixed.names()) {
            if !order.iter().any(|p| p == name) {
                return Err(OptError::UnknownParameter { name: name.to_string() });
            }
        }
        for name in &order {
            match (free.contains(name), fixed.contains(name)) {
                (false, false) => return Err(OptError::UnknownParameter { name: name.clone() }),
                (true, true) => return Err(OptError::OverlappingParameter { name: name.clone() }),
                _ => {}
            }
        }
        Ok(Self { mu, block_length, reference, names, order, free, fixed })
    }

    fn positive(name: &str, value: f64) -> OptResult<f64> {
        if value.is_finite() && value > 0.0 {
            Ok(value)
        } else {
            Err(OptError::InvalidParameterValue {
                name: name.to_string(),
                value,
                reason: "Population sizes must be finite and positive.",
            })
        }
    }

    fn non_negative(name: &str, value: f64) -> OptResult<f64> {
        if value.is_finite() && value >= 0.0 {
            Ok(value)
        } else {
            Err(OptError::InvalidParameterValue {
                name: name.to_string(),
                value,
                reason: "Rates and times must be finite and non-negative.",
            })
        }
    }
}

impl DemographicModel for IsolationMigration {
    fn free_parameters(&self) -> &[String] {
        &self.free
    }

    fn fixed_parameters(&self) -> &ParameterSet {
        &self.fixed
    }

    fn parameter_order(&self) -> &[String] {
        &self.order
    }

    fn block_length(&self) -> f64 {
        self.block_length
    }

    fn rescale(&self, free: &ParameterSet) -> OptResult<(ParameterSet, ParameterSet)> {
        let all = free.merged(&self.fixed);
        let n = &self.names;
        let mut unscaled = ParameterSet::new();
        for name in &self.order {
            unscaled.insert(name.clone(), all.require(name)?);
        }

        let ne_ref = Self::positive(&self.reference, unscaled.require(&self.reference)?)?;
        let mut scaled = ParameterSet::new();
        scaled.insert("theta", 4.0 * ne_ref * self.mu * self.block_length);
        for size in [&n.ne_a, &n.ne_b, &n.ne_ab] {
            let ne = Self::positive(size, unscaled.require(size)?)?;
            scaled.insert(size.clone(), ne / ne_ref);
        }
        let me = Self::non_negative(&n.me, unscaled.require(&n.me)?)?;
        scaled.insert(n.me.clone(), 4.0 * ne_ref * me);
        let time = Self::non_negative(&n.time, unscaled.require(&n.time)?)?;
        scaled.insert(n.time.clone(), time / (2.0 * ne_ref));
        Ok((scaled, unscaled))
    }

    fn evaluator_inputs(&self, scaled: &ParameterSet) -> OptResult<EvaluatorInputs> {
        let n = &self.names;
        let theta = scaled.require("theta")?;
        let c_a = 1.0 / scaled.require(&n.ne_a)?;
        let c_b = 1.0 / scaled.require(&n.ne_b)?;
        let c_ab = 1.0 / scaled.require(&n.ne_ab)?;
        let migration = scaled.require(&n.me)?;
        let fallback = migration <= MIGRATION_FALLBACK_THRESHOLD;
        let rates = if fallback {
            Array1::from(vec![c_a, c_b, c_ab])
        } else {
            Array1::from(vec![c_a, c_b, c_ab, migration])
        };
        Ok(EvaluatorInputs {
            theta_branch: theta / 2.0,
            rates,
            time: Some(scaled.require(&n.time)?),
            fallback,
        })
    }
}
