//! Directory-diff sync planning.
//!
//! Compares the local tree against the remote tree and produces the work
//! the pipeline executes. Remote paths are forward-slash separated and
//! compared case-insensitively; a local file whose remote counterpart
//! matches within a one-second timestamp tolerance is considered in
//! sync and omitted.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};
use walkdir::WalkDir;

use dropvault_client::{CloudClient, DeletedMetadata, FileMetadata, ListFolderPage, Metadata};
use dropvault_transfer::FileJob;

use crate::error::PlannerError;

/// Timestamps this close count as unchanged; the service stores
/// whole-second precision.
fn mtime_tolerance() -> TimeDelta {
    TimeDelta::seconds(1)
}

/// The planned work for one sync run.
#[derive(Debug, Default)]
pub struct SyncPlan {
    /// Files to upload, in order.
    pub jobs: Vec<FileJob>,
    /// Absolute remote paths to delete (no local counterpart).
    pub deletions: Vec<String>,
    /// Absolute remote folders to create before uploading, shallowest
    /// first.
    pub missing_folders: Vec<String>,
    /// Root-relative lowercase paths of live remote files.
    pub existing_files: HashSet<String>,
    /// Root-relative lowercase paths of remote folders, `""` for the
    /// root itself.
    pub existing_folders: HashSet<String>,
    /// Deleted remote entries, for the storage recycler.
    pub deleted_entries: Vec<DeletedMetadata>,
}

/// Build the sync plan for one local directory and remote folder.
///
/// # Arguments
/// * `client` - Cloud operations
/// * `local_root` - Local directory to mirror
/// * `remote_root` - Destination folder, forward slashes, `""` for root
/// * `archive_suffix` - Appended to remote file names (`".zip"` when
///   encrypting, `""` otherwise)
pub async fn build_plan<C: CloudClient>(
    client: &C,
    local_root: &Path,
    remote_root: &str,
    archive_suffix: &str,
) -> Result<SyncPlan, PlannerError> {
    if !local_root.is_dir() {
        return Err(PlannerError::LocalRoot(local_root.to_path_buf()));
    }
    let root_lower: String = remote_root.to_lowercase();

    // Full remote listing, deleted entries included, across all pages.
    let mut entries: Vec<Metadata> = Vec::new();
    let mut page: ListFolderPage = client.list_folder(remote_root, true, None, true).await?;
    loop {
        entries.append(&mut page.entries);
        if !page.has_more {
            break;
        }
        page = client.list_folder_continue(&page.cursor).await?;
    }

    let mut remote_files: HashMap<String, FileMetadata> = HashMap::new();
    let mut existing_folders: HashSet<String> = HashSet::new();
    existing_folders.insert(String::new());
    let mut deleted_entries: Vec<DeletedMetadata> = Vec::new();

    for entry in entries {
        match entry {
            Metadata::File(file) => {
                if let Some(rel) = rel_below_root(&file.path_lower, &root_lower) {
                    remote_files.insert(rel, file);
                }
            }
            Metadata::Folder(folder) => {
                if let Some(rel) = rel_below_root(&folder.path_lower, &root_lower) {
                    existing_folders.insert(rel);
                }
            }
            Metadata::Deleted(deleted) => {
                if rel_below_root(&deleted.path_lower, &root_lower).is_some() {
                    deleted_entries.push(deleted);
                }
            }
        }
    }

    // Local scan. Unreadable entries are reported and skipped rather
    // than failing the whole run.
    let mut local_files: Vec<(String, FileJob)> = Vec::new();
    for entry in WalkDir::new(local_root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "skipping unreadable file");
                continue;
            }
        };
        let Some(rel) = rel_string(local_root, entry.path()) else {
            continue;
        };
        let modified: DateTime<Utc> = match metadata.modified() {
            Ok(mtime) => truncate_to_millis(DateTime::<Utc>::from(mtime)),
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "skipping file without mtime");
                continue;
            }
        };
        let target_rel: String = format!("{rel}{archive_suffix}");
        let job: FileJob = FileJob {
            source_path: entry.path().to_path_buf(),
            remote_path: join_remote(remote_root, &target_rel),
            size: metadata.len(),
            client_modified: modified,
        };
        local_files.push((target_rel, job));
    }
    local_files.sort_by(|a, b| a.0.cmp(&b.0));

    // Diff.
    let mut jobs: Vec<FileJob> = Vec::new();
    let mut local_targets: HashSet<String> = HashSet::new();
    let mut wanted_folders: BTreeSet<String> = BTreeSet::new();

    for (target_rel, job) in local_files {
        let target_lower: String = target_rel.to_lowercase();
        let in_sync: bool = remote_files.get(&target_lower).is_some_and(|remote| {
            (remote.client_modified - job.client_modified).abs() <= mtime_tolerance()
        });
        if in_sync {
            debug!(path = %job.source_path.display(), "unchanged, skipping");
        } else {
            for ancestor in ancestors_of(&target_rel) {
                wanted_folders.insert(ancestor);
            }
            jobs.push(job);
        }
        local_targets.insert(target_lower);
    }

    let mut deletions: Vec<String> = remote_files
        .iter()
        .filter(|(rel, _)| !local_targets.contains(rel.as_str()))
        .map(|(_, file)| file.path_display.clone())
        .collect();
    deletions.sort();

    let mut missing_folders: Vec<String> = wanted_folders
        .into_iter()
        .filter(|rel| !existing_folders.contains(&rel.to_lowercase()))
        .map(|rel| join_remote(remote_root, &rel))
        .collect();
    // Parents before children.
    missing_folders.sort_by_key(|path| (path.matches('/').count(), path.clone()));

    Ok(SyncPlan {
        jobs,
        deletions,
        missing_folders,
        existing_files: remote_files.into_keys().collect(),
        existing_folders,
        deleted_entries,
    })
}

/// Root-relative form of a lowercase remote path, when it lies strictly
/// below the root.
pub(crate) fn rel_below_root(path_lower: &str, root_lower: &str) -> Option<String> {
    if root_lower.is_empty() {
        let rel: &str = path_lower.trim_start_matches('/');
        return (!rel.is_empty()).then(|| rel.to_string());
    }
    match path_lower.strip_prefix(root_lower) {
        Some(rest) if rest.starts_with('/') => Some(rest[1..].to_string()),
        _ => None,
    }
}

/// Join the remote root with a root-relative path.
pub(crate) fn join_remote(remote_root: &str, rel: &str) -> String {
    format!("{}/{}", remote_root.trim_end_matches('/'), rel)
}

/// Forward-slash relative path of `path` under `root`.
fn rel_string(root: &Path, path: &Path) -> Option<String> {
    let rel: &Path = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Proper ancestor directories of a relative file path.
fn ancestors_of(rel: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut prefix: String = String::new();
    let Some((dirs, _file)) = rel.rsplit_once('/') else {
        return out;
    };
    for part in dirs.split('/') {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(part);
        out.push(prefix.clone());
    }
    out
}

/// The job model carries millisecond precision.
fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}
