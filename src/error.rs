//! Error types for vq-core

use thiserror::Error;

/// Main error type for vector-quantization operations
#[derive(Error, Debug)]
pub enum VqError {
    /// Cluster count <= 0 or > sample size, bad bit depth, non-finite
    /// centroids, zero-norm vector where a norm is required.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Vector length != declared dimension, partition total != D, ordinal
    /// out of range.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Cosine requested from BQ or the Quicker-ADC fused path; unknown
    /// similarity enum.
    #[error("unsupported combination: {0}")]
    UnsupportedCombination(String),

    /// Negative counts/lengths, magic mismatch with unknown version,
    /// premature EOF.
    #[error("corrupted stream: {0}")]
    CorruptedStream(String),

    /// Underlying reader/writer error.
    #[error("io failure: {0}")]
    IoFailure(#[from] std::io::Error),
}

/// Result type alias for vq-core operations
pub type Result<T> = std::result::Result<T, VqError>;
