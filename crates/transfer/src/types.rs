//! Upload job description.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// One unit of upload, immutable once planned.
#[derive(Debug, Clone, PartialEq)]
pub struct FileJob {
    /// Absolute local path of the source file.
    pub source_path: PathBuf,
    /// Destination path on the remote side, forward-slash separated,
    /// archive suffix already applied when encryption is on.
    pub remote_path: String,
    /// Source length in bytes at planning time.
    pub size: u64,
    /// Source modification timestamp (UTC, millisecond precision).
    pub client_modified: DateTime<Utc>,
}

impl FileJob {
    /// Basename of the source file.
    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
