//! Error types for circuit-sched
//!
//! Two kinds of failure are distinguished throughout the crate:
//! - User-data problems (malformed input lines, unknown client references,
//!   empty candidate pools) degrade gracefully: the offending item is warned
//!   about and skipped, and processing continues.
//! - Algorithmic invariant violations ([`SolverError`]) and I/O failures are
//!   fatal: they abort the current run and surface through [`Result`].

use std::path::PathBuf;
use thiserror::Error;

use crate::types::DownloadId;

/// Result type alias for circuit-sched operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for circuit-sched
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "mutation_probability")
        key: Option<String>,
    },

    /// Catalog could not be assembled (e.g., no usable circuits)
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Bandwidth solver invariant violation (a bug, not a user input problem)
    #[error("solver invariant violated: {0}")]
    Solver(#[from] SolverError),

    /// Failed to read an input file
    #[error("failed to read {path}: {source}")]
    ReadFile {
        /// The file that could not be read
        path: PathBuf,
        /// The underlying I/O error
        source: std::io::Error,
    },

    /// Failed to write an output file or create the output directory
    #[error("failed to write {path}: {source}")]
    WriteFile {
        /// The file or directory that could not be written
        path: PathBuf,
        /// The underlying I/O error
        source: std::io::Error,
    },

    /// Worker pool construction failed
    #[error("thread pool error: {0}")]
    ThreadPool(String),

    /// I/O error without file context
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Invariant violations raised by the max-min bandwidth solver
///
/// Any of these indicates a defect in the solver or in the state handed to
/// it, never a problem with user input. The run is aborted when one occurs.
#[derive(Debug, Error)]
pub enum SolverError {
    /// Active relays remain but none of them carries a download
    #[error("no bottleneck relay found with {active} active relays remaining")]
    NoBottleneck {
        /// Number of relays still holding residual capacity
        active: usize,
    },

    /// The chosen bottleneck still shows residual capacity after draining
    #[error("bottleneck relay {relay} still has {residual} bytes/s after draining")]
    ResidualRemains {
        /// Name of the bottleneck relay
        relay: String,
        /// Residual capacity left on the relay
        residual: f64,
    },

    /// The chosen bottleneck still carries downloads after draining
    #[error("bottleneck relay {relay} still has downloads after draining")]
    DownloadsRemain {
        /// Name of the bottleneck relay
        relay: String,
    },

    /// A download in the active set has no circuit in the assignment
    #[error("download {download} is active but has no assigned circuit")]
    Unassigned {
        /// The offending download handle
        download: DownloadId,
    },
}
