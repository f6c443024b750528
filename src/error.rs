//! Error types for the rotating file writer.

use std::{io, path::PathBuf};

/// Result type for file writer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when using the file writer.
///
/// Each variant names the stage that failed and wraps the underlying I/O
/// error, so callers can tell a failed rename apart from a failed flush.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to open log file '{path}': {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("Failed to rename log file from '{from}' to '{to}': {source}")]
    Rename { from: PathBuf, to: PathBuf, source: io::Error },
    #[error("Failed to remove log file '{path}': {source}")]
    Remove { path: PathBuf, source: io::Error },
    #[error("Failed to get file stats for '{path}': {source}")]
    Stat { path: PathBuf, source: io::Error },
    /// The buffer refused part of a payload. `accepted` bytes were staged and
    /// are already counted in the writer's size.
    #[error("Failed to write log file ({accepted} bytes accepted): {source}")]
    Write { accepted: usize, source: io::Error },
    #[error("Failed to flush log buffer: {0}")]
    Flush(#[source] io::Error),
    #[error("Failed to compress rotated log file '{path}': {source}")]
    Compress { path: PathBuf, source: io::Error },
    #[error("Failed to start background flush thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("Log file writer is closed")]
    Closed,
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Open { source, .. }
            | Error::Rename { source, .. }
            | Error::Remove { source, .. }
            | Error::Stat { source, .. }
            | Error::Write { source, .. }
            | Error::Compress { source, .. }
            | Error::Spawn(source)
            | Error::Flush(source) => source.kind(),
            Error::Closed => io::ErrorKind::BrokenPipe,
            Error::Configuration(_) => io::ErrorKind::InvalidInput,
        };
        io::Error::new(kind, err)
    }
}
