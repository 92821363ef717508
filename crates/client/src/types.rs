//! Data types shared across cloud-service operations.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the server resolves a path collision on commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail if the path already exists.
    Add,
    /// Replace whatever is at the path.
    Overwrite,
}

impl WriteMode {
    /// Wire name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Add => "add",
            WriteMode::Overwrite => "overwrite",
        }
    }
}

/// Commit parameters for `session_finish` and `simple_upload`.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    /// Destination path, forward-slash separated.
    pub path: String,
    /// Collision behavior.
    pub mode: WriteMode,
    /// Whether the server may rename on collision. Always false here;
    /// the sync model is last-writer-wins overwrite.
    pub autorename: bool,
    /// Client-side modification timestamp recorded on the committed file.
    pub client_modified: DateTime<Utc>,
}

impl CommitInfo {
    /// Commit info for an overwriting upload, the only mode the sync
    /// pipeline uses.
    pub fn overwrite(path: impl Into<String>, client_modified: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            mode: WriteMode::Overwrite,
            autorename: false,
            client_modified,
        }
    }
}

/// Metadata for a live remote file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMetadata {
    pub name: String,
    /// Lowercased full path, used for case-insensitive comparison.
    pub path_lower: String,
    /// Display-cased full path.
    pub path_display: String,
    pub client_modified: DateTime<Utc>,
    pub server_modified: Option<DateTime<Utc>>,
    pub size: u64,
    pub rev: String,
}

/// Metadata for a remote folder.
#[derive(Debug, Clone, PartialEq)]
pub struct FolderMetadata {
    pub name: String,
    pub path_lower: String,
    pub path_display: String,
}

/// Metadata for a deleted remote entry, visible only when listing with
/// deleted-file visibility enabled.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedMetadata {
    pub name: String,
    pub path_lower: String,
    pub path_display: String,
    /// When the server recorded the deletion. Not all listings carry it;
    /// consumers must skip entries without one.
    pub server_deleted: Option<DateTime<Utc>>,
}

/// One entry from a folder listing.
#[derive(Debug, Clone, PartialEq)]
pub enum Metadata {
    File(FileMetadata),
    Folder(FolderMetadata),
    Deleted(DeletedMetadata),
}

impl Metadata {
    /// Lowercased full path of the entry.
    pub fn path_lower(&self) -> &str {
        match self {
            Metadata::File(f) => &f.path_lower,
            Metadata::Folder(f) => &f.path_lower,
            Metadata::Deleted(d) => &d.path_lower,
        }
    }

    /// Display-cased full path of the entry.
    pub fn path_display(&self) -> &str {
        match self {
            Metadata::File(f) => &f.path_display,
            Metadata::Folder(f) => &f.path_display,
            Metadata::Deleted(d) => &d.path_display,
        }
    }
}

/// One page of a folder listing plus the cursor for the next page.
#[derive(Debug, Clone)]
pub struct ListFolderPage {
    pub entries: Vec<Metadata>,
    pub cursor: String,
    pub has_more: bool,
}

/// A historical revision of a remote file.
#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    pub rev: String,
    pub client_modified: DateTime<Utc>,
    pub server_modified: DateTime<Utc>,
    pub size: u64,
}

/// Lookup mode for `list_revisions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionMode {
    /// Revisions of whatever lived at the path.
    Path,
    /// Revisions of the file id, following moves.
    Id,
}

impl RevisionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionMode::Path => "path",
            RevisionMode::Id => "id",
        }
    }
}

/// Result of launching a batch delete.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchLaunch {
    /// The server finished the batch synchronously.
    Complete,
    /// The batch runs asynchronously; poll with `delete_batch_check`.
    JobId(String),
}

/// Polled status of an asynchronous batch job.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchJobStatus {
    InProgress,
    Complete,
    Failed(String),
}

/// Per-call retry policy knobs.
///
/// A single cloud call is retried up to `max_attempts` times for
/// transient failures. Connection-class failures back off linearly
/// (`attempt * connect_backoff`); timeout-class failures retry
/// immediately, since the failed attempt already consumed its deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub connect_backoff: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            connect_backoff: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_mode_wire_names() {
        assert_eq!(WriteMode::Add.as_str(), "add");
        assert_eq!(WriteMode::Overwrite.as_str(), "overwrite");
    }

    #[test]
    fn test_commit_info_overwrite() {
        let ts: DateTime<Utc> = Utc::now();
        let commit: CommitInfo = CommitInfo::overwrite("/backup/a.txt", ts);
        assert_eq!(commit.path, "/backup/a.txt");
        assert_eq!(commit.mode, WriteMode::Overwrite);
        assert!(!commit.autorename);
        assert_eq!(commit.client_modified, ts);
    }

    #[test]
    fn test_retry_defaults() {
        let settings: RetrySettings = RetrySettings::default();
        assert_eq!(settings.max_attempts, 10);
        assert_eq!(settings.connect_backoff, Duration::from_secs(1));
    }
}
