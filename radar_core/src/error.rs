//! Error taxonomy. Transient decode and numerical errors are handled at the
//! stage that detects them and never cross a queue boundary; configuration
//! errors are fatal at startup only.

use thiserror::Error;

/// A malformed or unrecognised input frame. Fails locally: the frame is
/// dropped with a counter increment and pipeline state is untouched.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum DecodeError {
    #[error("frame truncated at byte {offset}: need {needed} more bytes")]
    Truncated { offset: usize, needed: usize },

    #[error("bad frame magic {found:#010x}")]
    BadMagic { found: u32 },

    #[error("unsupported frame version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown message kind {0:#04x}")]
    UnknownKind(u8),

    #[error("invalid {field} at byte {offset}")]
    InvalidField { offset: usize, field: &'static str },

    #[error("{extra} trailing bytes after {records} records")]
    TrailingBytes { records: usize, extra: usize },
}

/// Numerical failure inside the estimator. Recoverable by covariance repair;
/// if repair fails the offending update is skipped, never applied.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum NumericalError {
    #[error("innovation covariance singular (dim {dim})")]
    SingularInnovation { dim: usize },

    #[error("covariance not positive semi-definite after repair (min eigenvalue {min_eig:.3e})")]
    IndefiniteCovariance { min_eig: f64 },

    #[error("non-finite value in {context}")]
    NonFinite { context: &'static str },
}

/// Invalid or missing configuration. Fatal at startup; never raised at
/// runtime after initialisation.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("unknown {kind} algorithm {name:?} (expected one of {expected})")]
    UnknownAlgorithm { kind: &'static str, name: String, expected: &'static str },
}

/// Pipeline-level failures surfaced to the embedding application.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum PipelineError {
    #[error("pipeline is shut down")]
    Shutdown,

    #[error("queue {queue} full past backpressure timeout")]
    ResourceExhausted { queue: &'static str },

    #[error("failed to spawn stage thread {name}: {reason}")]
    SpawnFailed { name: &'static str, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
