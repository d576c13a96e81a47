//! Chunked simulation driver.
//!
//! Purpose
//! -------
//! Run the coalescent simulator for every parameter combination, tally each
//! replicate into a bSFS tensor and either hand the results to a
//! [`SimulationSink`] or return them as one array.
//!
//! Key behaviors
//! -------------
//! - Replicate seeds are drawn in `[1, 2^32)` from one run RNG seeded by
//!   `GlobalInfo::seed`, or from OS entropy when no seed is configured.
//! - `threads <= 1` simulates in the calling thread; otherwise a rayon pool
//!   of `threads` workers runs the replicates of a combination and results
//!   keep seed order.
//! - [`combine_chunks`] sums consecutive groups of `chunks` replicate tallies,
//!   undoing the block split done by the config compiler.
//! - [`replay_combination`] reruns one combination from recorded seeds.
//! - Raw simulator positions go through [`infinite_sites_layout`] before
//!   tallying.
//!
//! Invariants
//! ----------
//! - With a fixed seed the outcome does not depend on `threads`.
//! - Any simulation failure aborts the whole run.
//!
//! Conventions
//! -----------
//! - Sink keys are `parameter_combination_<index>`.
//! - Returned arrays are `(combinations, replicates / chunks, k_max + 2…)`;
//!   sink entries drop the leading combination axis.

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{ArrayD, Axis, stack};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};
use tracing::{debug, info, info_span};

use crate::simulation::{
    coalescent::CoalescentSimulator,
    config::{GlobalInfo, ParameterCombination, SimDemography, compile_demography},
    errors::{SimError, SimResult},
    sink::{SimulationSink, SinkMetadata},
    tally::{BlockLayout, FourMutationTypes, build_tally},
};

const SEED_CEILING: u64 = 1 << 32;

/// Seeds used per combination, and the stacked tallies when no sink was given.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOutcome {
    pub results: Option<ArrayD<u64>>,
    pub seeds: Vec<Vec<u64>>,
}

/// Integer sites for raw simulator positions.
///
/// Positions are floored and forced strictly increasing by shifting
/// collisions one site to the right. If the last site falls outside
/// `layout`, the block length is widened to `ceil((last + 1) / blocks)`.
pub fn infinite_sites_layout(raw_positions: &[f64], layout: BlockLayout) -> SimResult<(Vec<u64>, BlockLayout)> {
    let mut sites: Vec<u64> = Vec::with_capacity(raw_positions.len());
    for &raw in raw_positions {
        let floored = raw.max(0.0).floor() as u64;
        let site = match sites.last() {
            Some(&previous) if floored <= previous => previous + 1,
            _ => floored,
        };
        sites.push(site);
    }
    let layout = match sites.last() {
        Some(&last) if last >= layout.sequence_length() => {
            let widened = (last + 1).div_ceil(layout.blocks as u64);
            debug!(from = layout.block_length, to = widened, "widening block length");
            BlockLayout::new(widened, layout.blocks)?
        }
        _ => layout,
    };
    Ok((sites, layout))
}

/// Sum consecutive groups of `chunks` replicate tallies.
///
/// # Errors
/// - `ChunkMismatch` if `chunks` is zero or does not divide the replicates.
/// - `ShapeMismatch` if tallies within a group differ in shape.
pub fn combine_chunks(tallies: Vec<ArrayD<u64>>, chunks: usize) -> SimResult<Vec<ArrayD<u64>>> {
    if chunks == 0 || tallies.len() % chunks != 0 {
        return Err(SimError::ChunkMismatch { replicates: tallies.len(), chunks });
    }
    if chunks == 1 {
        return Ok(tallies);
    }
    let mut combined = Vec::with_capacity(tallies.len() / chunks);
    let mut group = tallies.into_iter();
    while let Some(mut sum) = group.next() {
        for part in group.by_ref().take(chunks - 1) {
            if part.shape() != sum.shape() {
                return Err(SimError::ShapeMismatch { expected: sum.shape().to_vec(), found: part.shape().to_vec() });
            }
            sum += &part;
        }
        combined.push(sum);
    }
    Ok(combined)
}

fn simulate_replicate(
    simulator: &dyn CoalescentSimulator, demography: &SimDemography, info: &GlobalInfo,
    sample_pairs: &[(usize, usize)], layout: BlockLayout, seed: u64,
) -> SimResult<ArrayD<u64>> {
    let variants = simulator.simulate(demography, &layout, seed)?;
    let (sites, layout) = infinite_sites_layout(&variants.positions, layout)?;
    let tally = build_tally(variants.genotypes.view(), &sites, sample_pairs, &info.k_max, layout, &FourMutationTypes)?;
    Ok(tally.to_u64())
}

/// Simulate, tally, combine chunks and stack the replicates of one combination.
fn simulate_combination(
    combination: &ParameterCombination, info: &GlobalInfo, sample_pairs: &[(usize, usize)], seeds: &[u64],
    chunks: usize, simulator: &dyn CoalescentSimulator, pool: Option<&ThreadPool>,
) -> SimResult<ArrayD<u64>> {
    if seeds.is_empty() {
        return Err(SimError::InvalidSetting {
            name: "replicates".to_string(),
            value: "0".to_string(),
            reason: "at least one replicate seed is required",
        });
    }
    let demography = compile_demography(combination, info)?;
    let layout = BlockLayout::new(info.block_length, info.blocks)?;
    let run = |&seed: &u64| simulate_replicate(simulator, &demography, info, sample_pairs, layout, seed);

    let tallies = match pool {
        Some(pool) => pool.install(|| seeds.par_iter().map(run).collect::<SimResult<Vec<_>>>())?,
        None => seeds.iter().map(run).collect::<SimResult<Vec<_>>>()?,
    };
    let combined = combine_chunks(tallies, chunks)?;
    let views: Vec<_> = combined.iter().map(|t| t.view()).collect();
    Ok(stack(Axis(0), &views)?)
}

/// Rerun one combination from recorded seeds, serially.
///
/// Produces the same tensor as the run that drew `seeds`.
///
/// # Errors
/// - `InvalidSetting` if `seeds` is empty.
pub fn replay_combination(
    combination: &ParameterCombination, info: &GlobalInfo, sample_pairs: &[(usize, usize)], seeds: &[u64],
    chunks: usize, simulator: &dyn CoalescentSimulator,
) -> SimResult<ArrayD<u64>> {
    simulate_combination(combination, info, sample_pairs, seeds, chunks, simulator, None)
}

fn progress_bar(combinations: usize) -> ProgressBar {
    let bar = ProgressBar::new(combinations as u64);
    if let Ok(style) = ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} combinations") {
        bar.set_style(style);
    }
    bar
}

/// Simulate every parameter combination.
///
/// With a sink each combination is written as it finishes and
/// `results` is `None`; without one the tallies are stacked along a leading
/// combination axis.
///
/// # Errors
/// - Any `SimError` from config compilation, simulation, tallying or the
///   sink; the run stops at the first one.
/// - `WorkerPool` if the thread pool cannot be built.
pub fn run_sims(
    combinations: &[ParameterCombination], info: &GlobalInfo, sample_pairs: &[(usize, usize)], chunks: usize,
    threads: usize, simulator: &dyn CoalescentSimulator, mut sink: Option<&mut dyn SimulationSink>,
) -> SimResult<SimulationOutcome> {
    let span = info_span!("run_sims", combinations = combinations.len(), replicates = info.replicates, threads);
    let _guard = span.enter();

    let pool = if threads > 1 {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| SimError::WorkerPool { text: e.to_string() })?;
        Some(pool)
    } else {
        None
    };
    let run_seed = info.seed.unwrap_or_else(|| rand::rng().random_range(1..u64::MAX));
    let mut rng = SmallRng::seed_from_u64(run_seed);
    info!(run_seed, chunks, "simulating {} parameter combination(s)", combinations.len());

    let bar = progress_bar(combinations.len());
    let mut collected = Vec::new();
    let mut all_seeds = Vec::with_capacity(combinations.len());
    for (index, combination) in combinations.iter().enumerate() {
        let seeds: Vec<u64> = (0..info.replicates).map(|_| rng.random_range(1..SEED_CEILING)).collect();
        let tally = simulate_combination(combination, info, sample_pairs, &seeds, chunks, simulator, pool.as_ref())?;
        match sink.as_deref_mut() {
            Some(sink) => {
                let metadata =
                    SinkMetadata { global_info: info.clone(), parameters: combination.clone(), seeds: seeds.clone() };
                sink.write(&format!("parameter_combination_{index}"), &tally, &metadata)?;
            }
            None => collected.push(tally),
        }
        all_seeds.push(seeds);
        bar.inc(1);
    }
    bar.finish_and_clear();

    let results = if collected.is_empty() {
        None
    } else {
        let views: Vec<_> = collected.iter().map(|t| t.view()).collect();
        Some(stack(Axis(0), &views)?)
    };
    Ok(SimulationOutcome { results, seeds: all_seeds })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::{coalescent::SimulatedVariants, sink::MemorySink};
    use ndarray::Array3;

    /// `seed % 3` heterozygous sites for the first sample, at sites 0, 1, 2.
    struct SeedCountSimulator;

    impl CoalescentSimulator for SeedCountSimulator {
        fn simulate(&self, _: &SimDemography, _: &BlockLayout, seed: u64) -> SimResult<SimulatedVariants> {
            let n = (seed % 3) as usize;
            let mut genotypes = Array3::<i8>::zeros((n, 2, 2));
            for v in 0..n {
                genotypes[[v, 0, 1]] = 1;
            }
            Ok(SimulatedVariants { positions: (0..n).map(|p| p as f64).collect(), genotypes })
        }
    }

    fn info(replicates: usize, seed: Option<u64>) -> GlobalInfo {
        GlobalInfo {
            mu: 1e-8,
            block_length: 10,
            blocks: 2,
            replicates,
            chunks: 1,
            ploidy: 2,
            k_max: vec![2, 2, 2, 2],
            sample_pop_ids: vec!["A".into(), "B".into()],
            sample_pop_sizes: vec![1, 1],
            reference_pop: "A".into(),
            seed,
        }
    }

    fn combination(ne: f64) -> ParameterCombination {
        [("Ne_A", ne), ("Ne_B", ne), ("Ne_A_B", ne), ("recombination", 0.0)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    // Purpose
    // -------
    // Raw positions become strictly increasing sites and the layout widens
    // to hold the last one.
    //
    // Given
    // -----
    // - Positions 0.2, 0.7, 3.9, 3.95, 10.0 over 2 blocks of 4 sites.
    //
    // Expect
    // ------
    // - Sites 0, 1, 3, 4, 10; block length ceil(11 / 2) = 6.
    fn infinite_sites_shift_collisions_and_widen() {
        let layout = BlockLayout::new(4, 2).unwrap();

        let (sites, widened) = infinite_sites_layout(&[0.2, 0.7, 3.9, 3.95, 10.0], layout).unwrap();

        assert_eq!(sites, vec![0, 1, 3, 4, 10]);
        assert_eq!(widened, BlockLayout { block_length: 6, blocks: 2 });
    }

    #[test]
    // Purpose
    // -------
    // Sites inside the layout leave it alone.
    //
    // Given
    // -----
    // - Positions 1.5 and 6.0 over 2 blocks of 4 sites.
    //
    // Expect
    // ------
    // - Sites 1 and 6; unchanged layout.
    fn infinite_sites_keep_fitting_layout() {
        let layout = BlockLayout::new(4, 2).unwrap();

        let (sites, same) = infinite_sites_layout(&[1.5, 6.0], layout).unwrap();

        assert_eq!(sites, vec![1, 6]);
        assert_eq!(same, layout);
    }

    #[test]
    // Purpose
    // -------
    // Chunk groups are summed in order; uneven grouping is rejected.
    //
    // Given
    // -----
    // - Four 1-D tallies [1], [2], [3], [4] with chunks = 2; then three
    //   tallies with chunks = 2.
    //
    // Expect
    // ------
    // - [3] and [7]; then `ChunkMismatch`.
    fn combine_chunks_sums_consecutive_groups() {
        let tallies: Vec<ArrayD<u64>> =
            (1..=4).map(|v| ArrayD::from_elem(ndarray::IxDyn(&[1]), v)).collect();

        let combined = combine_chunks(tallies.clone(), 2).unwrap();
        let err = combine_chunks(tallies[..3].to_vec(), 2).unwrap_err();

        assert_eq!(combined.iter().map(|t| t.sum()).collect::<Vec<_>>(), vec![3, 7]);
        assert_eq!(err, SimError::ChunkMismatch { replicates: 3, chunks: 2 });
        assert_eq!(combine_chunks(tallies.clone(), 1).unwrap(), tallies);
    }

    #[test]
    // Purpose
    // -------
    // A seeded run is reproducible and independent of the thread count.
    //
    // Given
    // -----
    // - Two combinations, 3 replicates, seed 42; serial and 2 threads.
    //
    // Expect
    // ------
    // - Identical outcomes; shape (2, 3, 4, 4, 4, 4); every replicate
    //   tallies 1 pair × 2 blocks; seeds in [1, 2^32).
    fn seeded_runs_match_across_thread_counts() {
        // Arrange
        let info = info(3, Some(42));
        let combinations = vec![combination(1e3), combination(2e3)];
        let pairs = [(0, 1)];

        // Act
        let serial = run_sims(&combinations, &info, &pairs, 1, 1, &SeedCountSimulator, None).unwrap();
        let pooled = run_sims(&combinations, &info, &pairs, 1, 2, &SeedCountSimulator, None).unwrap();

        // Assert
        assert_eq!(serial, pooled);
        let results = serial.results.unwrap();
        assert_eq!(results.shape(), &[2, 3, 4, 4, 4, 4]);
        for replicate in results.index_axis(Axis(0), 0).outer_iter() {
            assert_eq!(replicate.sum(), 2);
        }
        assert!(serial.seeds.iter().flatten().all(|&s| (1..SEED_CEILING).contains(&s)));
    }

    #[test]
    // Purpose
    // -------
    // With a sink, each combination is stored under its key with its seeds
    // and nothing is returned.
    //
    // Given
    // -----
    // - Two combinations, 2 replicates, a memory sink.
    //
    // Expect
    // ------
    // - `results` is `None`; two entries whose seeds match the outcome and
    //   whose replay reproduces the stored tally.
    fn sink_receives_one_entry_per_combination() {
        let info = info(2, Some(5));
        let combinations = vec![combination(1e3), combination(4e3)];
        let mut sink = MemorySink::new();

        let outcome =
            run_sims(&combinations, &info, &[(0, 1)], 1, 1, &SeedCountSimulator, Some(&mut sink as &mut dyn SimulationSink)).unwrap();

        assert!(outcome.results.is_none());
        assert_eq!(sink.keys().collect::<Vec<_>>(), vec!["parameter_combination_0", "parameter_combination_1"]);
        let entry = sink.read("parameter_combination_1").unwrap();
        assert_eq!(entry.metadata.seeds, outcome.seeds[1]);
        assert_eq!(entry.metadata.parameters, combinations[1]);
        let replay =
            replay_combination(&combinations[1], &info, &[(0, 1)], &entry.metadata.seeds, 1, &SeedCountSimulator)
                .unwrap();
        assert_eq!(replay, entry.tally);
    }

    #[test]
    // Purpose
    // -------
    // A run without replicates fails with a named setting, not a shape error.
    //
    // Given
    // -----
    // - Run settings with replicates = 0; a replay with no seeds.
    //
    // Expect
    // ------
    // - `InvalidSetting { name: "replicates", .. }` from both.
    fn zero_replicates_are_reported_by_name() {
        let info = info(0, Some(1));

        let run = run_sims(&[combination(1e3)], &info, &[(0, 1)], 1, 1, &SeedCountSimulator, None).unwrap_err();
        let replay = replay_combination(&combination(1e3), &info, &[(0, 1)], &[], 1, &SeedCountSimulator).unwrap_err();

        assert!(matches!(run, SimError::InvalidSetting { ref name, .. } if name == "replicates"), "{run}");
        assert_eq!(run, replay);
    }
}
