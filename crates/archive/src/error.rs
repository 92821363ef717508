//! Error types for archive container writing.

use thiserror::Error;

/// Errors that can occur while producing an encrypted container.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The salt source was asked for a length other than the AES-256
    /// salt size. Indicates the container layer drifted from the scheme
    /// it was configured for.
    #[error("salt of {requested} bytes requested, scheme requires {expected}")]
    SaltLength { requested: usize, expected: usize },

    /// The one-shot salt source was used more than once. A second draw
    /// would silently break ciphertext determinism.
    #[error("one-shot salt source drawn twice")]
    SaltExhausted,

    /// The entry was written out of order (data before header, data
    /// after finish).
    #[error("container writer used out of order: {0}")]
    Sequence(&'static str),

    /// Sink write failure.
    #[error("archive write failed: {0}")]
    Io(#[from] std::io::Error),
}
