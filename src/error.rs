//! Crate-level error types.

use std::fmt;
use std::path::PathBuf;

/// Errors produced by the nuage crate.
///
/// Cloud operations never abort the process: failures are returned to the
/// caller or recorded on the cloud (see
/// [`CloudBuffer::take_error`](crate::cloud::CloudBuffer::take_error)).
#[derive(Debug)]
pub enum CloudError {
    /// A column index in a source descriptor is below 1.
    InvalidColumnIndex {
        /// Which column mapping was rejected (`"x"`, `"r"`, ...).
        column: &'static str,
        /// The offending 1-based index.
        index: usize,
    },
    /// The source could not be opened or decoded.
    SourceUnreadable {
        /// Resolved path (or URL) of the source.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// Point-by-point mutation attempted on a GPU-only cloud.
    CannotMutateOptimizedCloud {
        /// Name of the optimized cloud.
        name: String,
    },
    /// Failed to spawn a loader worker thread.
    ThreadSpawn(std::io::Error),
    /// A task was submitted to a scheduler that is shutting down.
    SchedulerStopped,
    /// TOML options parsing/serialization failure.
    OptionsParse(String),
    /// Generic I/O failure.
    Io(std::io::Error),
}

impl fmt::Display for CloudError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidColumnIndex { column, index } => {
                write!(f, "invalid {column} column index value: {index}")
            }
            Self::SourceUnreadable { path, source } => write!(
                f,
                "file not found or unreadable: {} ({source})",
                path.display()
            ),
            Self::CannotMutateOptimizedCloud { name } => {
                write!(f, "cannot modify points of optimized cloud \"{name}\"")
            }
            Self::ThreadSpawn(e) => {
                write!(f, "failed to spawn loader thread: {e}")
            }
            Self::SchedulerStopped => write!(f, "task scheduler is stopping"),
            Self::OptionsParse(msg) => {
                write!(f, "options parse error: {msg}")
            }
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for CloudError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SourceUnreadable { source, .. } => Some(source),
            Self::Io(e) | Self::ThreadSpawn(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CloudError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
