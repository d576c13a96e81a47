//! Error surface for the simulation tally pipeline.
//!
//! [`SimError`] covers tally construction, configuration compilation, the
//! reference coalescent, the chunked driver and the sinks. Variants carry the
//! offending values so a failed run names both the broken invariant and the
//! value that broke it.

/// Result alias for simulation operations.
pub type SimResult<T> = Result<T, SimError>;

#[derive(Debug, Clone, PartialEq)]
pub enum SimError {
    // ---- Tally ----
    /// `k_max` must provide one cap per mutation type.
    KMaxLengthMismatch {
        expected: usize,
        found: usize,
    },
    /// At least one mutation type is required.
    EmptyKMax,
    /// A sample pair refers to a sample outside the genotype matrix.
    SampleIndexOutOfRange {
        index: usize,
        samples: usize,
    },
    /// Genotype rows and variant positions must agree in number.
    PositionCountMismatch {
        variants: usize,
        positions: usize,
    },
    /// Only rank-4 (blocks) and rank-5 (windows) tallies have a row form.
    UnsupportedRank {
        rank: usize,
    },
    /// Block layout must have positive length and count.
    InvalidBlockLayout {
        block_length: u64,
        blocks: usize,
    },

    // ---- Config ----
    /// No `sample_size_<id>` entry for a sample population.
    MissingSampleSize {
        pop_id: String,
    },
    /// A simulation setting is outside its domain.
    InvalidSetting {
        name: String,
        value: String,
        reason: &'static str,
    },
    /// The reference population is not one of the sample populations.
    UnknownReferencePopulation {
        pop_id: String,
    },
    /// Chunks must be positive and divide the block count.
    InvalidChunks {
        chunks: usize,
        blocks: usize,
        reason: &'static str,
    },
    /// Exactly two sample populations are supported.
    PopulationCount {
        found: usize,
    },
    /// A parameter combination lacks a required parameter.
    MissingParameter {
        name: String,
    },
    /// A demographic value is outside its domain.
    InvalidParameter {
        name: String,
        value: f64,
        reason: String,
    },

    // ---- Coalescent / driver ----
    /// Lineages remain that can never coalesce.
    NoCoalescence {
        lineages: usize,
    },
    /// Replicate count is not a multiple of the chunk count.
    ChunkMismatch {
        replicates: usize,
        chunks: usize,
    },
    /// Tallies to be summed differ in shape.
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    /// A sink has no entry under the requested key.
    MissingEntry {
        key: String,
    },
    /// Worker pool could not be created.
    WorkerPool {
        text: String,
    },

    // ---- Persistence ----
    Io {
        text: String,
    },
    Serialization {
        text: String,
    },
}

impl std::error::Error for SimError {}

impl std::fmt::Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // ---- Tally ----
            SimError::KMaxLengthMismatch { expected, found } => {
                write!(f, "k_max has {found} entries but there are {expected} mutation types")
            }
            SimError::EmptyKMax => write!(f, "k_max must contain at least one mutation type"),
            SimError::SampleIndexOutOfRange { index, samples } => {
                write!(f, "Sample index {index} out of range for {samples} samples")
            }
            SimError::PositionCountMismatch { variants, positions } => {
                write!(f, "Genotype matrix has {variants} variants but {positions} positions were given")
            }
            SimError::UnsupportedRank { rank } => {
                write!(f, "Tally rank must be 4 (blocks) or 5 (windows), found {rank}")
            }
            SimError::InvalidBlockLayout { block_length, blocks } => {
                write!(f, "Invalid block layout: {blocks} block(s) of length {block_length}")
            }

            // ---- Config ----
            SimError::MissingSampleSize { pop_id } => {
                write!(f, "Missing sample_size_{pop_id} for sample population '{pop_id}'")
            }
            SimError::InvalidSetting { name, value, reason } => {
                write!(f, "Invalid setting {name} = {value}: {reason}")
            }
            SimError::UnknownReferencePopulation { pop_id } => {
                write!(f, "Reference population '{pop_id}' is not a sample population")
            }
            SimError::InvalidChunks { chunks, blocks, reason } => {
                write!(f, "Cannot split {blocks} block(s) into {chunks} chunk(s): {reason}")
            }
            SimError::PopulationCount { found } => {
                write!(f, "Exactly 2 sample populations are supported, found {found}")
            }
            SimError::MissingParameter { name } => {
                write!(f, "Parameter combination has no value for '{name}'")
            }
            SimError::InvalidParameter { name, value, reason } => {
                write!(f, "Invalid value {value} for '{name}': {reason}")
            }

            // ---- Coalescent / driver ----
            SimError::NoCoalescence { lineages } => {
                write!(f, "{lineages} lineages can never coalesce under this demography")
            }
            SimError::ChunkMismatch { replicates, chunks } => {
                write!(f, "{replicates} replicate tallies cannot be grouped into chunks of {chunks}")
            }
            SimError::ShapeMismatch { expected, found } => {
                write!(f, "Tally shape mismatch: expected {expected:?}, found {found:?}")
            }
            SimError::MissingEntry { key } => write!(f, "No sink entry named '{key}'"),
            SimError::WorkerPool { text } => write!(f, "Failed to build worker pool: {text}"),

            // ---- Persistence ----
            SimError::Io { text } => write!(f, "I/O error: {text}"),
            SimError::Serialization { text } => write!(f, "Serialization error: {text}"),
        }
    }
}

impl From<std::io::Error> for SimError {
    fn from(err: std::io::Error) -> Self {
        SimError::Io { text: err.to_string() }
    }
}

impl From<serde_json::Error> for SimError {
    fn from(err: serde_json::Error) -> Self {
        SimError::Serialization { text: err.to_string() }
    }
}

impl From<ndarray::ShapeError> for SimError {
    fn from(err: ndarray::ShapeError) -> Self {
        SimError::Serialization { text: err.to_string() }
    }
}
