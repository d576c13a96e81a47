//! Persistent destinations for simulated tallies.
//!
//! A [`SimulationSink`] stores one entry per parameter combination: the
//! summed `u64` tally plus [`SinkMetadata`] (run settings, the combination
//! itself and the replicate seeds). Reading an entry back is enough to replay
//! the combination bit for bit.
//!
//! - [`MemorySink`] keeps entries in a map.
//! - [`JsonDirectorySink`] writes `<dir>/<key>.json`, one file per entry.
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::simulation::{
    config::{GlobalInfo, ParameterCombination},
    errors::{SimError, SimResult},
};

/// Everything needed to reproduce one stored tally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkMetadata {
    pub global_info: GlobalInfo,
    pub parameters: ParameterCombination,
    /// Replicate seeds in simulation order.
    pub seeds: Vec<u64>,
}

/// Stored form of one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkEntry {
    pub tally: ArrayD<u64>,
    pub metadata: SinkMetadata,
}

/// Keyed store for simulated tallies.
pub trait SimulationSink {
    /// Store `tally` under `key`, replacing any previous entry.
    fn write(&mut self, key: &str, tally: &ArrayD<u64>, metadata: &SinkMetadata) -> SimResult<()>;

    /// # Errors
    /// - `MissingEntry` if nothing was written under `key`.
    fn read(&self, key: &str) -> SimResult<SinkEntry>;
}

#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    entries: BTreeMap<String, SinkEntry>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SimulationSink for MemorySink {
    fn write(&mut self, key: &str, tally: &ArrayD<u64>, metadata: &SinkMetadata) -> SimResult<()> {
        self.entries
            .insert(key.to_string(), SinkEntry { tally: tally.clone(), metadata: metadata.clone() });
        Ok(())
    }

    fn read(&self, key: &str) -> SimResult<SinkEntry> {
        self.entries.get(key).cloned().ok_or_else(|| SimError::MissingEntry { key: key.to_string() })
    }
}

/// One JSON file per entry inside a directory.
#[derive(Debug, Clone)]
pub struct JsonDirectorySink {
    dir: PathBuf,
}

impl JsonDirectorySink {
    /// Open `dir`, creating it if needed.
    pub fn create(dir: impl AsRef<Path>) -> SimResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl SimulationSink for JsonDirectorySink {
    fn write(&mut self, key: &str, tally: &ArrayD<u64>, metadata: &SinkMetadata) -> SimResult<()> {
        let path = self.entry_path(key);
        let entry = SinkEntry { tally: tally.clone(), metadata: metadata.clone() };
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(&mut writer, &entry)?;
        writer.flush()?;
        debug!(path = %path.display(), "wrote simulation entry");
        Ok(())
    }

    fn read(&self, key: &str) -> SimResult<SinkEntry> {
        let path = self.entry_path(key);
        if !path.is_file() {
            return Err(SimError::MissingEntry { key: key.to_string() });
        }
        let reader = BufReader::new(File::open(&path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
