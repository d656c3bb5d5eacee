//! Error types for strata

use crate::granularity::Granularity;
use crate::shard::Shard;
use std::fmt;

/// Result type alias for strata operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for strata
#[derive(Debug)]
pub enum Error {
    /// Transient store failure (read or write); retried by the pipeline
    Store(String),
    /// Store operation exceeded its deadline
    Timeout,
    /// Distributed lock service unreachable or misbehaving.
    ///
    /// Note: lock *contention* is not an error and is reported as
    /// [`crate::coordinator::LockAttempt::Busy`] instead.
    LockUnavailable(Shard),
    /// Configuration errors
    Config(String),
    /// Slot-state or rollup serialization errors
    Serialization(String),
    /// No coarser granularity exists (already at the coarsest level)
    NoCoarserGranularity(Granularity),
    /// No finer granularity exists (already at FULL resolution)
    NoFinerGranularity(Granularity),
    /// Operation failed after exhausting its retry budget
    TooManyRetries,
    /// Malformed slot key string form
    InvalidSlotKey(String),
    /// IO errors
    Io(std::io::Error),
    /// Internal error
    Internal(String),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Store(msg) => write!(f, "Store error: {}", msg),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::LockUnavailable(shard) => {
                write!(f, "Lock service unavailable for shard {}", shard)
            }
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::NoCoarserGranularity(g) => {
                write!(f, "No granularity coarser than {}", g)
            }
            Error::NoFinerGranularity(g) => {
                write!(f, "No granularity finer than {}", g)
            }
            Error::TooManyRetries => write!(
                f,
                "Too many retries: operation failed after maximum retry attempts"
            ),
            Error::InvalidSlotKey(s) => write!(f, "Invalid slot key: {}", s),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
