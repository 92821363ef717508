//! Error types for the upload pipeline.

use dropvault_archive::ArchiveError;
use dropvault_client::CloudError;
use thiserror::Error;

/// Errors surfaced by the upload pipeline.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The saved session could not be resumed: the local hash chain no
    /// longer matches the recorded prefix, the server dropped the
    /// session, or the encryption stage drifted from the recorded salt.
    /// The session record has already been deleted; the caller should
    /// restart the file from scratch.
    #[error("resume failed: {reason}")]
    ResumeFailed { reason: &'static str },

    /// Cloud-service failure after retries.
    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// Archive container failure.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Local file I/O failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A background read-ahead task died.
    #[error("background task failed: {0}")]
    Background(String),

    /// `read_block`/`upload_chunk` called before `open_next`/`prepare`.
    #[error("pipeline used out of order: {0}")]
    Sequence(&'static str),
}

impl TransferError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        TransferError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// True for failures that tear down resume state and require a fresh
    /// restart of the file.
    pub fn is_resume_failure(&self) -> bool {
        matches!(self, TransferError::ResumeFailed { .. })
    }
}
