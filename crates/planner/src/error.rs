//! Error types for planning and recycling.

use std::path::PathBuf;

use dropvault_client::CloudError;
use thiserror::Error;

/// Errors surfaced by the planner and recycler.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// Cloud-service failure while listing, restoring, or deleting.
    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// The local root is missing or not a directory.
    #[error("local root is not a directory: {0}")]
    LocalRoot(PathBuf),

    /// A batch-delete job reported failure.
    #[error("batch delete failed: {0}")]
    DeleteBatch(String),
}
