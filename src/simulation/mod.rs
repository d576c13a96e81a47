//! simulation — coalescent replicates to bSFS tallies.
//!
//! Purpose
//! -------
//! Generate synthetic blockwise site-frequency spectra: compile a declarative
//! config into run settings and per-combination demographies, simulate
//! replicates, tally each one into a fixed-shape tensor and deliver the
//! results to a sink or the caller.
//!
//! Key behaviors
//! -------------
//! - [`config`] compiles [`config::RawConfig`] into [`config::GlobalInfo`] and
//!   parameter combinations into [`config::SimDemography`].
//! - [`coalescent`] defines the simulator seam and a reference structured
//!   coalescent.
//! - [`tally`] turns genotypes and positions into bSFS tensors.
//! - [`driver`] draws seeds, runs replicates serially or on a rayon pool and
//!   recombines chunks.
//! - [`sink`] stores per-combination tallies with replay metadata.
//!
//! Testing notes
//! -------------
//! - Each submodule carries unit tests; `tests/integration_simulation_pipeline.rs`
//!   runs the full config → tally path with the reference coalescent.

pub mod coalescent;
pub mod config;
pub mod driver;
pub mod errors;
pub mod sink;
pub mod tally;

pub use self::coalescent::{CoalescentSimulator, SimulatedVariants, StructuredCoalescent};
pub use self::config::{
    GlobalInfo, ParameterCombination, RawConfig, SimDemography, all_interpopulation_comparisons, compile_demography,
    compile_global_info,
};
pub use self::driver::{SimulationOutcome, combine_chunks, infinite_sites_layout, replay_combination, run_sims};
pub use self::errors::{SimError, SimResult};
pub use self::sink::{JsonDirectorySink, MemorySink, SimulationSink, SinkEntry, SinkMetadata};
pub use self::tally::{
    BlockLayout, CompactTally, FourMutationTypes, PairStatistic, build_tally, sparse_rows, tally_mutation_counts,
};
