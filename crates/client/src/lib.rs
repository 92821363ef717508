//! Cloud-service operation surface for dropvault.
//!
//! This crate defines the boundary between the upload pipeline and the
//! Dropbox HTTP API:
//!
//! - **`CloudClient`** - the async operation trait the pipeline consumes
//! - **`DropboxClient`** - the production `reqwest` implementation
//! - **Content hashing** - Dropbox's per-call block-SHA-256 checksum
//! - **Retry** - per-call retry policy with transport-class backoff
//!
//! The `testing` module provides an in-memory `CloudClient` double used by
//! the pipeline and planner test suites.

mod content_hash;
mod error;
mod http;
mod retry;
pub mod testing;
mod traits;
mod types;

pub use content_hash::{content_hash_hex, ContentHasher, CONTENT_HASH_BLOCK_SIZE};
pub use error::CloudError;
pub use http::DropboxClient;
pub use retry::call_with_retry;
pub use traits::CloudClient;
pub use types::{
    BatchJobStatus, BatchLaunch, CommitInfo, DeletedMetadata, FileMetadata, FolderMetadata,
    ListFolderPage, Metadata, RetrySettings, Revision, RevisionMode, WriteMode,
};
