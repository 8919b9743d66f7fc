//! Per-episode control log

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Serialize;
use std::path::Path;

// Internal
use util::archive::{ArchiveError, Archiver};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One row of the episode log.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LogRecord {
    pub frame: usize,
    pub steer: f64,
    pub throttle: f64,

    /// Forward speed in km/h
    pub speed: f64,
}

/// Append-only log of the demands sent in each frame of an episode.
pub struct EpisodeLog {
    archiver: Archiver,
    num_rows: usize,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl EpisodeLog {
    /// Create the log file, truncating any previous log at the same path.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        Ok(Self {
            archiver: Archiver::create(path)?,
            num_rows: 0,
        })
    }

    /// Append a row for one frame.
    pub fn write(&mut self, record: LogRecord) -> Result<(), ArchiveError> {
        self.archiver.serialise(record)?;
        self.num_rows += 1;
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn path(&self) -> &Path {
        self.archiver.path()
    }
}
