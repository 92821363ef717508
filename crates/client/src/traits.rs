//! The cloud-service operation trait consumed by the upload pipeline.

use async_trait::async_trait;

use crate::error::CloudError;
use crate::types::{
    BatchJobStatus, BatchLaunch, CommitInfo, FileMetadata, ListFolderPage, Revision, RevisionMode,
};

/// Remote operations of the cloud service.
///
/// Upload payloads are passed as stable byte slices; implementations
/// re-create whatever request body they need per attempt, so the retry
/// layer can replay a call without copying the chunk.
///
/// `content_hash` is the service's block-SHA-256 checksum over the bytes
/// of that call (see [`crate::content_hash`]), passed where the API
/// accepts one.
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Open an upload session with the first chunk. Returns the opaque
    /// session id.
    async fn session_start(
        &self,
        data: &[u8],
        content_hash: Option<&str>,
    ) -> Result<String, CloudError>;

    /// Append a chunk at `offset` to an open session.
    ///
    /// Fails with [`CloudError::SessionNotFound`] when the server no
    /// longer knows the session.
    async fn session_append(
        &self,
        session_id: &str,
        offset: u64,
        data: &[u8],
        content_hash: Option<&str>,
    ) -> Result<(), CloudError>;

    /// Close a session with the final chunk and commit the file.
    async fn session_finish(
        &self,
        session_id: &str,
        offset: u64,
        commit: &CommitInfo,
        data: &[u8],
        content_hash: Option<&str>,
    ) -> Result<FileMetadata, CloudError>;

    /// Single-shot upload of a small file, no session involved.
    async fn simple_upload(
        &self,
        commit: &CommitInfo,
        data: &[u8],
        content_hash: Option<&str>,
    ) -> Result<FileMetadata, CloudError>;

    /// First page of a folder listing. `path` is `""` for the root.
    async fn list_folder(
        &self,
        path: &str,
        recursive: bool,
        limit: Option<u32>,
        include_deleted: bool,
    ) -> Result<ListFolderPage, CloudError>;

    /// Next page of a folder listing.
    async fn list_folder_continue(&self, cursor: &str) -> Result<ListFolderPage, CloudError>;

    /// Create a folder. Already-exists conflicts are swallowed; the call
    /// is idempotent.
    async fn create_folder(&self, path: &str) -> Result<(), CloudError>;

    /// Launch deletion of a set of paths.
    async fn delete_batch(&self, paths: &[String]) -> Result<BatchLaunch, CloudError>;

    /// Poll an asynchronous batch-delete job.
    async fn delete_batch_check(&self, job_id: &str) -> Result<BatchJobStatus, CloudError>;

    /// Revisions of a file, newest ordering not guaranteed by the server.
    async fn list_revisions(
        &self,
        path: &str,
        mode: RevisionMode,
        limit: u32,
    ) -> Result<Vec<Revision>, CloudError>;

    /// Restore a file to a given revision.
    async fn restore(&self, path: &str, rev: &str) -> Result<FileMetadata, CloudError>;
}
