//! Error types for netsplit
//!
//! Only input validation and resource problems are errors. Partitioner
//! degeneracies and metadata inconsistencies are logged and reported in the
//! run summary instead.

use std::fmt;
use std::path::PathBuf;

use strsim::jaro_winkler;

use crate::core::partitioner::PartitionerError;

/// Minimum similarity for a "did you mean" suggestion
const SUGGESTION_THRESHOLD: f64 = 0.8;

/// Suggest the closest known name for a misspelled option value
pub fn suggest_correction(input: &str, candidates: &[&str]) -> Option<String> {
    let input_lower = input.to_lowercase();
    let mut best: Option<(&str, f64)> = None;

    for candidate in candidates {
        if candidate.eq_ignore_ascii_case(input) {
            return None;
        }
        let score = jaro_winkler(&input_lower, candidate);
        if score >= SUGGESTION_THRESHOLD && best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }

    best.map(|(name, _)| name.to_string())
}

/// Main error type for netsplit operations
#[derive(Debug)]
pub enum Error {
    /// Demand or network content that the pipeline refuses to process
    InvalidInput(String),

    /// Invalid configuration or option value
    InvalidConfig(String),

    /// A required input or intermediate artifact does not exist
    MissingArtifact(PathBuf),

    /// An artifact exists but could not be parsed
    ParseError { path: PathBuf, message: String },

    /// File I/O error
    IoError(std::io::Error),

    /// The external partitioner failed in a non-recoverable way
    Partitioner(PartitionerError),

    /// A per-partition task failed
    PartitionFailed { part: u32, message: String },
}

impl Error {
    /// Wrap an I/O failure on `path`, turning "not found" into a missing artifact
    pub fn from_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Error::MissingArtifact(path.into())
        } else {
            Error::IoError(err)
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidInput(msg) => {
                write!(f, "Invalid input: {}", msg)
            }
            Error::InvalidConfig(msg) => {
                write!(f, "Invalid configuration: {}", msg)
            }
            Error::MissingArtifact(path) => {
                write!(f, "Missing artifact: {}", path.display())
            }
            Error::ParseError { path, message } => {
                write!(f, "Failed to parse {}: {}", path.display(), message)
            }
            Error::IoError(err) => {
                write!(f, "I/O error: {}", err)
            }
            Error::Partitioner(err) => {
                write!(f, "Partitioner error: {}", err)
            }
            Error::PartitionFailed { part, message } => {
                write!(f, "Partition {} failed: {}", part, message)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            Error::Partitioner(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<PartitionerError> for Error {
    fn from(err: PartitionerError) -> Self {
        Error::Partitioner(err)
    }
}

/// Convenience result type for netsplit operations
pub type Result<T> = std::result::Result<T, Error>;
