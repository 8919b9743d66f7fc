//! CSV archive files
//!
//! An [`Archiver`] writes serialisable records as rows of a CSV file, with a header taken from
//! the field names of the record type.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use csv::WriterBuilder;
pub use csv::Writer;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An object used to write CSV archive files.
pub struct Archiver {
    path: PathBuf,
    writer: Writer<File>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Could not create archive file {0:?}: {1}")]
    CreateError(PathBuf, std::io::Error),

    #[error("Could not write record to archive: {0}")]
    WriteError(csv::Error),

    #[error("Could not flush archive: {0}")]
    FlushError(std::io::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Archiver {
    /// Create a new archiver at the given path, truncating any existing file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();

        let file =
            File::create(&path).map_err(|e| ArchiveError::CreateError(path.clone(), e))?;

        let writer = WriterBuilder::new().has_headers(true).from_writer(file);

        Ok(Self { path, writer })
    }

    /// Path of the archive file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialise a record into the archive.
    ///
    /// The record is flushed to disk straight away so the archive is readable while it's still
    /// being written.
    pub fn serialise<T: Serialize>(&mut self, record: T) -> Result<(), ArchiveError> {
        self.writer
            .serialize(record)
            .map_err(ArchiveError::WriteError)?;
        self.writer.flush().map_err(ArchiveError::FlushError)
    }
}
