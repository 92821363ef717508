//! Storage recycling for deleted remote files.
//!
//! The service keeps revisions of deleted files for a bounded window.
//! Restoring the newest revision and deleting it again refreshes that
//! window, so files deleted locally remain recoverable. Only entries
//! aging toward expiry are touched: deleted between 15 and 29 days ago
//! (both ends inclusive), not shadowed by a live file, and whose parent
//! folder still exists.
//!
//! Re-deletes are batched: a restored file of 32 GiB or more is deleted
//! immediately when no batch is pending, everything else accumulates
//! until the batch reaches 32 GiB, with a final flush at the end.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use dropvault_client::{BatchJobStatus, BatchLaunch, CloudClient, Revision, RevisionMode};

use crate::error::PlannerError;
use crate::plan::{rel_below_root, SyncPlan};

/// Youngest deletion age eligible for recycling.
pub const RECYCLE_MIN_AGE_DAYS: i64 = 15;
/// Oldest deletion age eligible for recycling.
pub const RECYCLE_MAX_AGE_DAYS: i64 = 29;

/// Pending re-deletes flush when their restored sizes reach this.
const BATCH_FLUSH_BYTES: u64 = 32 * 1024 * 1024 * 1024;

/// How many revisions to ask for when picking the newest.
const REVISION_LIMIT: u32 = 100;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Refresh aging deleted entries under the remote root.
///
/// # Arguments
/// * `client` - Cloud operations
/// * `plan` - The sync plan carrying deleted entries and folder/file sets
/// * `remote_root` - The synced remote folder
/// * `now` - Reference time for the age window
pub async fn recycle_deleted<C: CloudClient>(
    client: &C,
    plan: &SyncPlan,
    remote_root: &str,
    now: DateTime<Utc>,
) -> Result<(), PlannerError> {
    let root_lower: String = remote_root.to_lowercase();
    let mut pending: Vec<String> = Vec::new();
    let mut pending_bytes: u64 = 0;

    for entry in &plan.deleted_entries {
        let Some(rel_lower) = rel_below_root(&entry.path_lower, &root_lower) else {
            continue;
        };
        // A live file at the same path owns the name now.
        if plan.existing_files.contains(&rel_lower) {
            continue;
        }
        // Restoring into a deleted folder would resurrect the folder too.
        let parent: String = match rel_lower.rsplit_once('/') {
            Some((dir, _)) => dir.to_string(),
            None => String::new(),
        };
        if !plan.existing_folders.contains(&parent) {
            continue;
        }
        let Some(deleted_at) = entry.server_deleted else {
            debug!(path = %entry.path_display, "deleted entry without timestamp, skipping");
            continue;
        };
        let age: TimeDelta = now - deleted_at;
        if age < TimeDelta::days(RECYCLE_MIN_AGE_DAYS) || age > TimeDelta::days(RECYCLE_MAX_AGE_DAYS)
        {
            continue;
        }

        let mut revisions: Vec<Revision> = client
            .list_revisions(&entry.path_display, RevisionMode::Path, REVISION_LIMIT)
            .await?;
        revisions.sort_by(|a, b| b.client_modified.cmp(&a.client_modified));
        let Some(newest) = revisions.first() else {
            debug!(path = %entry.path_display, "no revisions to restore");
            continue;
        };

        info!(
            path = %entry.path_display,
            age_days = age.num_days(),
            size = newest.size,
            "recycling deleted file"
        );
        client.restore(&entry.path_display, &newest.rev).await?;

        if newest.size >= BATCH_FLUSH_BYTES && pending.is_empty() {
            // Too big to sit in a batch; drop it again right away.
            delete_paths(client, std::slice::from_ref(&entry.path_display)).await?;
        } else {
            pending.push(entry.path_display.clone());
            pending_bytes += newest.size;
            if pending_bytes >= BATCH_FLUSH_BYTES {
                delete_paths(client, &pending).await?;
                pending.clear();
                pending_bytes = 0;
            }
        }
    }

    if !pending.is_empty() {
        delete_paths(client, &pending).await?;
    }
    Ok(())
}

/// Delete a set of remote paths, polling the async job to completion.
pub async fn delete_paths<C: CloudClient>(
    client: &C,
    paths: &[String],
) -> Result<(), PlannerError> {
    if paths.is_empty() {
        return Ok(());
    }
    debug!(count = paths.len(), "deleting remote paths");
    let job_id: String = match client.delete_batch(paths).await? {
        BatchLaunch::Complete => return Ok(()),
        BatchLaunch::JobId(id) => id,
    };
    loop {
        match client.delete_batch_check(&job_id).await? {
            BatchJobStatus::InProgress => tokio::time::sleep(POLL_INTERVAL).await,
            BatchJobStatus::Complete => return Ok(()),
            BatchJobStatus::Failed(message) => return Err(PlannerError::DeleteBatch(message)),
        }
    }
}
