//! Error and Result types for archive operations.

use std::io;
use thiserror::Error;

/// A convenience `Result` type for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// The error type for archive operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// A record line could not be decoded.
    #[error("Unparseable record line: {line:?}")]
    BadRecord {
        /// The offending line, as read from the file.
        line: String,
    },

    /// A record line carried a value type tag this archive does not know.
    #[error("Unknown value type tag: {tag:?}")]
    UnknownTag {
        /// The unrecognized tag.
        tag: String,
    },

    /// An archive file name did not parse as a `YYYYMMDD-HHMM` timestamp.
    #[error("Bad archive file name: {name:?}")]
    BadFileName {
        /// The offending file name.
        name: String,
    },

    /// The backend has shut down and can no longer accept flush jobs.
    #[error("Archive backend is shut down")]
    Shutdown,

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
