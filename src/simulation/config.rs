//! Demographic config compiler.
//!
//! Turns a declarative simulation config into the run-wide [`GlobalInfo`]
//! and each parameter combination into a concrete [`SimDemography`].
//!
//! Chunking rebalances work without changing the simulated sequence: with
//! `chunks > 1`, `blocks` is divided and `replicates` multiplied by `chunks`,
//! and the driver later sums each group of `chunks` consecutive replicate
//! tallies back into one. A single block cannot be split; chunking is then
//! switched off with a warning.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::simulation::errors::{SimError, SimResult};

/// Named demographic values of one parameter combination.
pub type ParameterCombination = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MutationSection {
    pub mu: f64,
    pub blocklength: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PopulationSection {
    pub sample_pop_ids: Vec<String>,
    pub reference_pop: String,
}

fn default_chunks() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimulationSection {
    pub ploidy: usize,
    pub blocks: usize,
    pub replicates: usize,
    #[serde(default = "default_chunks")]
    pub chunks: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    /// `sample_size_<id>` entries plus any other keys of the section, which
    /// are carried but not interpreted.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl SimulationSection {
    /// Sampled individuals of `pop_id`, read from `sample_size_<pop_id>`.
    ///
    /// # Errors
    /// - `MissingSampleSize` if the key is absent.
    /// - `InvalidSetting` if its value is not a non-negative integer.
    pub fn sample_size(&self, pop_id: &str) -> SimResult<usize> {
        let key = format!("sample_size_{pop_id}");
        let value = self.extra.get(&key).ok_or_else(|| SimError::MissingSampleSize { pop_id: pop_id.to_string() })?;
        value
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| SimError::InvalidSetting {
                name: key,
                value: value.to_string(),
                reason: "sample sizes must be non-negative integers",
            })
    }
}

/// Simulation config as read from disk.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawConfig {
    pub mu: MutationSection,
    /// Caps per mutation type, in tally axis order.
    pub k_max: Vec<usize>,
    pub populations: PopulationSection,
    pub simulations: SimulationSection,
}

/// Run-wide simulation settings after compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalInfo {
    pub mu: f64,
    pub block_length: u64,
    pub blocks: usize,
    pub replicates: usize,
    pub chunks: usize,
    pub ploidy: usize,
    pub k_max: Vec<usize>,
    pub sample_pop_ids: Vec<String>,
    pub sample_pop_sizes: Vec<usize>,
    pub reference_pop: String,
    pub seed: Option<u64>,
}

/// Compile the run-wide settings.
///
/// # Errors
/// - `MissingSampleSize` if a sample population has no `sample_size_<id>`.
/// - `InvalidSetting` for a non-integer sample size, zero ploidy or zero
///   replicates.
/// - `UnknownReferencePopulation` if the reference is not sampled.
/// - `InvalidChunks` for zero chunks or a block count not divisible by them.
pub fn compile_global_info(raw: &RawConfig) -> SimResult<GlobalInfo> {
    let sim = &raw.simulations;
    let mut sample_pop_ids = raw.populations.sample_pop_ids.clone();
    sample_pop_ids.sort();
    let sample_pop_sizes = sample_pop_ids.iter().map(|id| sim.sample_size(id)).collect::<SimResult<Vec<_>>>()?;
    let reference_pop = raw.populations.reference_pop.clone();
    if !sample_pop_ids.contains(&reference_pop) {
        return Err(SimError::UnknownReferencePopulation { pop_id: reference_pop });
    }

    for (name, value) in [("ploidy", sim.ploidy), ("replicates", sim.replicates)] {
        if value == 0 {
            return Err(SimError::InvalidSetting {
                name: name.to_string(),
                value: value.to_string(),
                reason: "must be at least 1",
            });
        }
    }

    let (mut blocks, mut replicates, mut chunks) = (sim.blocks, sim.replicates, sim.chunks);
    if chunks == 0 {
        return Err(SimError::InvalidChunks { chunks, blocks, reason: "chunks must be at least 1" });
    }
    if chunks > 1 {
        if blocks == 1 {
            warn!(chunks, "cannot split 1 block into chunks; simulating without chunking");
            chunks = 1;
        } else if blocks % chunks != 0 {
            return Err(SimError::InvalidChunks {
                chunks,
                blocks,
                reason: "blocks must be divisible by chunks",
            });
        } else {
            blocks /= chunks;
            replicates *= chunks;
        }
    }

    Ok(GlobalInfo {
        mu: raw.mu.mu,
        block_length: raw.mu.blocklength,
        blocks,
        replicates,
        chunks,
        ploidy: sim.ploidy,
        k_max: raw.k_max.clone(),
        sample_pop_ids,
        sample_pop_sizes,
        reference_pop,
        seed: sim.seed,
    })
}

/// Concrete two-population demography for one simulation.
///
/// Population indices: `0` = first sample population, `1` = second,
/// `2` = ancestral. Migration is backwards in time: `migration[0]` moves
/// lineages of population 0 into population 1, `migration[1]` the reverse.
#[derive(Debug, Clone, PartialEq)]
pub struct SimDemography {
    /// Sampled individuals per sample population.
    pub sample_sizes: [usize; 2],
    pub ploidy: usize,
    /// Effective sizes of populations 0, 1 and the ancestral population.
    pub ne: [f64; 3],
    pub migration: [f64; 2],
    /// Split time in generations; `None` keeps the populations apart forever.
    pub split_time: Option<f64>,
    pub recombination: f64,
    pub mu: f64,
}

impl SimDemography {
    /// Number of sampled haplotypes.
    pub fn haplotypes(&self) -> usize {
        (self.sample_sizes[0] + self.sample_sizes[1]) * self.ploidy
    }
}

fn lookup(combination: &ParameterCombination, name: &str) -> SimResult<f64> {
    combination
        .get(name)
        .copied()
        .ok_or_else(|| SimError::MissingParameter { name: name.to_string() })
}

fn positive(name: &str, value: f64) -> SimResult<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(SimError::InvalidParameter {
            name: name.to_string(),
            value,
            reason: "must be finite and positive".to_string(),
        })
    }
}

fn non_negative(name: &str, value: f64) -> SimResult<f64> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(SimError::InvalidParameter {
            name: name.to_string(),
            value,
            reason: "must be finite and non-negative".to_string(),
        })
    }
}

/// Resolve one parameter combination against the run settings.
///
/// Ancestral size comes from `Ne_<A>_<B>`, then `Ne_<B>_<A>`, then the
/// reference population's size. A missing or zero `T` means no split.
///
/// # Errors
/// - `PopulationCount` unless exactly two sample populations are configured.
/// - `MissingParameter` for a missing size or `recombination`.
/// - `InvalidParameter` for out-of-domain values.
pub fn compile_demography(combination: &ParameterCombination, info: &GlobalInfo) -> SimResult<SimDemography> {
    let (a, b) = match info.sample_pop_ids.as_slice() {
        [a, b] => (a, b),
        ids => return Err(SimError::PopulationCount { found: ids.len() }),
    };
    let sample_sizes = match info.sample_pop_sizes.as_slice() {
        &[size_a, size_b] => [size_a, size_b],
        sizes => return Err(SimError::PopulationCount { found: sizes.len() }),
    };

    let ne_a = positive(&format!("Ne_{a}"), lookup(combination, &format!("Ne_{a}"))?)?;
    let ne_b = positive(&format!("Ne_{b}"), lookup(combination, &format!("Ne_{b}"))?)?;
    let ancestral = [format!("Ne_{a}_{b}"), format!("Ne_{b}_{a}"), format!("Ne_{}", info.reference_pop)];
    let (name, value) = ancestral
        .iter()
        .find_map(|name| combination.get(name).map(|v| (name, *v)))
        .ok_or_else(|| SimError::MissingParameter { name: ancestral[0].clone() })?;
    let ne_ab = positive(name, value)?;

    let migration_ab = format!("me_{a}_{b}");
    let migration_ba = format!("me_{b}_{a}");
    let migration = [
        non_negative(&migration_ab, combination.get(&migration_ab).copied().unwrap_or(0.0))?,
        non_negative(&migration_ba, combination.get(&migration_ba).copied().unwrap_or(0.0))?,
    ];
    let split_time = match combination.get("T") {
        Some(&t) if t != 0.0 => Some(positive("T", t)?),
        _ => None,
    };
    let recombination = non_negative("recombination", lookup(combination, "recombination")?)?;

    Ok(SimDemography {
        sample_sizes,
        ploidy: info.ploidy,
        ne: [ne_a, ne_b, ne_ab],
        migration,
        split_time,
        recombination,
        mu: positive("mu", info.mu)?,
    })
}

/// Every (first-population sample, second-population sample) index pair.
///
/// Samples are numbered consecutively: `0..a` for the first population,
/// `a..a + b` for the second.
///
/// # Errors
/// - `PopulationCount` unless exactly two sizes are given.
pub fn all_interpopulation_comparisons(sizes: &[usize]) -> SimResult<Vec<(usize, usize)>> {
    let &[a, b] = sizes else {
        return Err(SimError::PopulationCount { found: sizes.len() });
    };
    Ok((0..a).flat_map(|i| (a..a + b).map(move |j| (i, j))).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(blocks: usize, chunks: usize) -> RawConfig {
        let json = format!(
            r#"{{
                "mu": {{"mu": 1e-8, "blocklength": 64}},
                "k_max": [2, 2, 2, 2],
                "populations": {{"sample_pop_ids": ["B", "A"], "reference_pop": "A"}},
                "simulations": {{
                    "ploidy": 2, "blocks": {blocks}, "replicates": 3, "chunks": {chunks},
                    "sample_size_A": 2, "sample_size_B": 1
                }}
            }}"#
        );
        serde_json::from_str(&json).unwrap()
    }

    fn info() -> GlobalInfo {
        compile_global_info(&raw(10, 1)).unwrap()
    }

    #[test]
    // Purpose
    // -------
    // Sample ids are sorted and resolved to their sizes.
    //
    // Given
    // -----
    // - ids [B, A] with sample_size_A = 2, sample_size_B = 1.
    //
    // Expect
    // ------
    // - ids [A, B], sizes [2, 1], settings copied.
    fn global_info_sorts_and_resolves_populations() {
        let info = info();

        assert_eq!(info.sample_pop_ids, vec!["A", "B"]);
        assert_eq!(info.sample_pop_sizes, vec![2, 1]);
        assert_eq!(info.block_length, 64);
        assert_eq!((info.blocks, info.replicates, info.chunks), (10, 3, 1));
    }

    #[test]
    // Purpose
    // -------
    // Chunking divides blocks and multiplies replicates.
    //
    // Given
    // -----
    // - blocks 10, chunks 5.
    //
    // Expect
    // ------
    // - blocks 2, replicates 15, chunks 5.
    fn chunking_rebalances_blocks_and_replicates() {
        let info = compile_global_info(&raw(10, 5)).unwrap();

        assert_eq!((info.blocks, info.replicates, info.chunks), (2, 15, 5));
    }

    #[test]
    // Purpose
    // -------
    // A single block cannot be chunked; chunking is dropped.
    //
    // Given
    // -----
    // - blocks 1, chunks 4.
    //
    // Expect
    // ------
    // - chunks 1, blocks and replicates unchanged.
    fn single_block_disables_chunking() {
        let info = compile_global_info(&raw(1, 4)).unwrap();

        assert_eq!((info.blocks, info.replicates, info.chunks), (1, 3, 1));
    }

    #[test]
    // Purpose
    // -------
    // Indivisible chunking and an unsampled reference are rejected.
    //
    // Given
    // -----
    // - blocks 10, chunks 3; and reference "C".
    //
    // Expect
    // ------
    // - `InvalidChunks` and `UnknownReferencePopulation`.
    fn invalid_chunks_and_reference_are_rejected() {
        let mut bad_reference = raw(10, 1);
        bad_reference.populations.reference_pop = "C".to_string();

        let chunks = compile_global_info(&raw(10, 3)).unwrap_err();
        let reference = compile_global_info(&bad_reference).unwrap_err();

        assert!(matches!(chunks, SimError::InvalidChunks { chunks: 3, blocks: 10, .. }));
        assert_eq!(reference, SimError::UnknownReferencePopulation { pop_id: "C".to_string() });
    }

    #[test]
    // Purpose
    // -------
    // Ancestral size falls back to the reference population.
    //
    // Given
    // -----
    // - Ne_A, Ne_B, me_B_A, T, recombination; no ancestral size.
    //
    // Expect
    // ------
    // - ne = [Ne_A, Ne_B, Ne_A]; migration [0, me_B_A]; split at T.
    fn demography_resolves_sizes_and_migration() {
        let combination: ParameterCombination = [
            ("Ne_A", 1e4),
            ("Ne_B", 2e4),
            ("me_B_A", 1e-5),
            ("T", 5e4),
            ("recombination", 0.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let demography = compile_demography(&combination, &info()).unwrap();

        assert_eq!(demography.ne, [1e4, 2e4, 1e4]);
        assert_eq!(demography.migration, [0.0, 1e-5]);
        assert_eq!(demography.split_time, Some(5e4));
        assert_eq!(demography.haplotypes(), 6);
    }

    #[test]
    // Purpose
    // -------
    // Comparisons pair every first-population sample with every
    // second-population sample; more than two populations is fatal.
    //
    // Given
    // -----
    // - sizes [2, 2] and [1, 1, 1].
    //
    // Expect
    // ------
    // - [(0,2), (0,3), (1,2), (1,3)] and `PopulationCount { found: 3 }`.
    fn comparisons_cover_cross_population_pairs() {
        let pairs = all_interpopulation_comparisons(&[2, 2]).unwrap();
        let err = all_interpopulation_comparisons(&[1, 1, 1]).unwrap_err();

        assert_eq!(pairs, vec![(0, 2), (0, 3), (1, 2), (1, 3)]);
        assert_eq!(err, SimError::PopulationCount { found: 3 });
    }

    #[test]
    // Purpose
    // -------
    // Keys of the simulations section beyond the known ones are carried
    // without affecting compilation.
    //
    // Given
    // -----
    // - `recombination_rate: 0.0` and `label: "run"` next to the sample sizes.
    //
    // Expect
    // ------
    // - Parsing and compilation succeed; sizes [2, 1]; the extra keys are
    //   kept in the raw section.
    fn extra_simulation_keys_are_tolerated() {
        let json = r#"{
            "mu": {"mu": 1e-8, "blocklength": 64},
            "k_max": [2, 2, 2, 2],
            "populations": {"sample_pop_ids": ["A", "B"], "reference_pop": "A"},
            "simulations": {
                "ploidy": 2, "blocks": 4, "replicates": 1,
                "sample_size_A": 2, "sample_size_B": 1,
                "recombination_rate": 0.0, "label": "run"
            }
        }"#;

        let raw: RawConfig = serde_json::from_str(json).unwrap();
        let info = compile_global_info(&raw).unwrap();

        assert_eq!(info.sample_pop_sizes, vec![2, 1]);
        assert_eq!(raw.simulations.extra.get("recombination_rate"), Some(&Value::from(0.0)));
        assert_eq!(raw.simulations.extra.get("label"), Some(&Value::from("run")));
    }

    #[test]
    // Purpose
    // -------
    // Settings that leave nothing to simulate are named in the error.
    //
    // Given
    // -----
    // - replicates 0; ploidy 0; sample_size_B = 1.5.
    //
    // Expect
    // ------
    // - `InvalidSetting` naming `replicates`, `ploidy` and `sample_size_B`.
    fn degenerate_settings_are_rejected() {
        let mut no_replicates = raw(10, 1);
        no_replicates.simulations.replicates = 0;
        let mut no_ploidy = raw(10, 1);
        no_ploidy.simulations.ploidy = 0;
        let mut fractional = raw(10, 1);
        fractional.simulations.extra.insert("sample_size_B".to_string(), Value::from(1.5));

        let errors = [no_replicates, no_ploidy, fractional].map(|r| compile_global_info(&r).unwrap_err());

        let names: Vec<_> = errors
            .iter()
            .map(|e| match e {
                SimError::InvalidSetting { name, .. } => name.as_str(),
                other => panic!("unexpected error {other:?}"),
            })
            .collect();
        assert_eq!(names, vec!["replicates", "ploidy", "sample_size_B"]);
        assert_eq!(errors[0].to_string(), "Invalid setting replicates = 0: must be at least 1");
    }
}
