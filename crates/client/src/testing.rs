//! In-memory `CloudClient` double for tests.
//!
//! Records every call, keeps session and committed-file bytes, enforces
//! append offsets the way the real service does, and lets tests script
//! failures for upcoming upload calls.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::CloudError;
use crate::traits::CloudClient;
use crate::types::{
    BatchJobStatus, BatchLaunch, CommitInfo, FileMetadata, ListFolderPage, Metadata, Revision,
    RevisionMode,
};

/// One recorded cloud call.
#[derive(Debug, Clone, PartialEq)]
pub enum CloudCall {
    SessionStart {
        data: Vec<u8>,
        content_hash: Option<String>,
    },
    SessionAppend {
        session_id: String,
        offset: u64,
        data: Vec<u8>,
        content_hash: Option<String>,
    },
    SessionFinish {
        session_id: String,
        offset: u64,
        path: String,
        data: Vec<u8>,
        content_hash: Option<String>,
    },
    SimpleUpload {
        path: String,
        data: Vec<u8>,
        content_hash: Option<String>,
    },
    ListFolder {
        path: String,
        include_deleted: bool,
    },
    ListFolderContinue,
    CreateFolder {
        path: String,
    },
    DeleteBatch {
        paths: Vec<String>,
    },
    DeleteBatchCheck {
        job_id: String,
    },
    ListRevisions {
        path: String,
    },
    Restore {
        path: String,
        rev: String,
    },
}

#[derive(Default)]
struct MockState {
    calls: Vec<CloudCall>,
    sessions: HashMap<String, Vec<u8>>,
    next_session: u64,
    committed: HashMap<String, Vec<u8>>,
    /// Failures handed to upcoming upload-family calls, in order.
    scripted_failures: VecDeque<CloudError>,
    /// Count of upload-family calls so far.
    upload_seq: u64,
    /// Failures keyed by upload-family call ordinal (1-based).
    fail_at: HashMap<u64, CloudError>,
    listing: Vec<Metadata>,
    page_size: Option<usize>,
    /// Remainder of a paged listing, consumed by `list_folder_continue`.
    pending_pages: Option<(Vec<Metadata>, bool)>,
    revisions: HashMap<String, Vec<Revision>>,
    next_job: u64,
    /// How many `delete_batch_check` polls report in-progress before
    /// completing.
    polls_before_complete: u32,
    poll_counts: HashMap<String, u32>,
}

/// Scriptable in-memory cloud service.
#[derive(Default)]
pub struct MockCloud {
    state: Mutex<MockState>,
}

impl MockCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure for the next upload-family call.
    pub fn fail_next(&self, err: CloudError) {
        self.state.lock().unwrap().scripted_failures.push_back(err);
    }

    /// Fail the `n`-th upload-family call from now (1-based), letting
    /// earlier calls through.
    pub fn fail_nth(&self, n: u64, err: CloudError) {
        let mut state = self.state.lock().unwrap();
        let at: u64 = state.upload_seq + n;
        state.fail_at.insert(at, err);
    }

    /// Install the remote listing returned by `list_folder`.
    pub fn set_listing(&self, entries: Vec<Metadata>) {
        self.state.lock().unwrap().listing = entries;
    }

    /// Split listings into pages of `n` entries to exercise pagination.
    pub fn set_page_size(&self, n: usize) {
        self.state.lock().unwrap().page_size = Some(n);
    }

    /// Install revisions for a path (keyed by lowercase path).
    pub fn set_revisions(&self, path_lower: impl Into<String>, revisions: Vec<Revision>) {
        self.state
            .lock()
            .unwrap()
            .revisions
            .insert(path_lower.into(), revisions);
    }

    /// Make batch-delete jobs report in-progress `n` times before
    /// completing.
    pub fn set_polls_before_complete(&self, n: u32) {
        self.state.lock().unwrap().polls_before_complete = n;
    }

    /// Pre-create a server-side session, as if an earlier run had
    /// uploaded `content` into it.
    pub fn seed_session(&self, id: impl Into<String>, content: Vec<u8>) {
        self.state.lock().unwrap().sessions.insert(id.into(), content);
    }

    /// Bytes the server holds for an open session.
    pub fn session_bytes(&self, id: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().sessions.get(id).cloned()
    }

    /// All recorded calls so far.
    pub fn calls(&self) -> Vec<CloudCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Recorded upload-family calls only.
    pub fn upload_calls(&self) -> Vec<CloudCall> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    CloudCall::SessionStart { .. }
                        | CloudCall::SessionAppend { .. }
                        | CloudCall::SessionFinish { .. }
                        | CloudCall::SimpleUpload { .. }
                )
            })
            .cloned()
            .collect()
    }

    /// Bytes committed at a path, if any.
    pub fn committed(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().committed.get(path).cloned()
    }

    /// Paths passed to `delete_batch`, flattened across batches.
    pub fn deleted_paths(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter_map(|c| match c {
                CloudCall::DeleteBatch { paths } => Some(paths.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn pop_scripted(state: &mut MockState) -> Result<(), CloudError> {
        state.upload_seq += 1;
        if let Some(err) = state.scripted_failures.pop_front() {
            return Err(err);
        }
        let seq: u64 = state.upload_seq;
        match state.fail_at.remove(&seq) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn file_metadata(path: &str, size: u64) -> FileMetadata {
        let name: String = path.rsplit('/').next().unwrap_or(path).to_string();
        FileMetadata {
            name,
            path_lower: path.to_lowercase(),
            path_display: path.to_string(),
            client_modified: Utc::now(),
            server_modified: Some(Utc::now()),
            size,
            rev: "0123456789abcdef".to_string(),
        }
    }
}

#[async_trait]
impl CloudClient for MockCloud {
    async fn session_start(
        &self,
        data: &[u8],
        content_hash: Option<&str>,
    ) -> Result<String, CloudError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(CloudCall::SessionStart {
            data: data.to_vec(),
            content_hash: content_hash.map(str::to_string),
        });
        Self::pop_scripted(&mut state)?;
        state.next_session += 1;
        let id: String = format!("session-{}", state.next_session);
        state.sessions.insert(id.clone(), data.to_vec());
        Ok(id)
    }

    async fn session_append(
        &self,
        session_id: &str,
        offset: u64,
        data: &[u8],
        content_hash: Option<&str>,
    ) -> Result<(), CloudError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(CloudCall::SessionAppend {
            session_id: session_id.to_string(),
            offset,
            data: data.to_vec(),
            content_hash: content_hash.map(str::to_string),
        });
        Self::pop_scripted(&mut state)?;
        let session: &mut Vec<u8> = state
            .sessions
            .get_mut(session_id)
            .ok_or(CloudError::SessionNotFound)?;
        if session.len() as u64 != offset {
            return Err(CloudError::Api {
                status: 409,
                message: format!(
                    "incorrect_offset: expected {}, got {}",
                    session.len(),
                    offset
                ),
            });
        }
        session.extend_from_slice(data);
        Ok(())
    }

    async fn session_finish(
        &self,
        session_id: &str,
        offset: u64,
        commit: &CommitInfo,
        data: &[u8],
        content_hash: Option<&str>,
    ) -> Result<FileMetadata, CloudError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(CloudCall::SessionFinish {
            session_id: session_id.to_string(),
            offset,
            path: commit.path.clone(),
            data: data.to_vec(),
            content_hash: content_hash.map(str::to_string),
        });
        Self::pop_scripted(&mut state)?;
        let mut content: Vec<u8> = state
            .sessions
            .remove(session_id)
            .ok_or(CloudError::SessionNotFound)?;
        if content.len() as u64 != offset {
            return Err(CloudError::Api {
                status: 409,
                message: format!(
                    "incorrect_offset: expected {}, got {}",
                    content.len(),
                    offset
                ),
            });
        }
        content.extend_from_slice(data);
        let size: u64 = content.len() as u64;
        state.committed.insert(commit.path.clone(), content);
        Ok(Self::file_metadata(&commit.path, size))
    }

    async fn simple_upload(
        &self,
        commit: &CommitInfo,
        data: &[u8],
        content_hash: Option<&str>,
    ) -> Result<FileMetadata, CloudError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(CloudCall::SimpleUpload {
            path: commit.path.clone(),
            data: data.to_vec(),
            content_hash: content_hash.map(str::to_string),
        });
        Self::pop_scripted(&mut state)?;
        state.committed.insert(commit.path.clone(), data.to_vec());
        Ok(Self::file_metadata(&commit.path, data.len() as u64))
    }

    async fn list_folder(
        &self,
        path: &str,
        _recursive: bool,
        _limit: Option<u32>,
        include_deleted: bool,
    ) -> Result<ListFolderPage, CloudError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(CloudCall::ListFolder {
            path: path.to_string(),
            include_deleted,
        });
        let all: Vec<Metadata> = if include_deleted {
            state.listing.clone()
        } else {
            state
                .listing
                .iter()
                .filter(|m| !matches!(m, Metadata::Deleted(_)))
                .cloned()
                .collect()
        };
        let page_size: usize = state.page_size.unwrap_or(usize::MAX).max(1);
        let first: Vec<Metadata> = all.iter().take(page_size).cloned().collect();
        let has_more: bool = all.len() > page_size;
        // The cursor carries the remainder so `continue` can replay it.
        let rest: Vec<Metadata> = all.into_iter().skip(page_size).collect();
        state.pending_pages = Some((rest, include_deleted));
        Ok(ListFolderPage {
            entries: first,
            cursor: "cursor-0".to_string(),
            has_more,
        })
    }

    async fn list_folder_continue(&self, _cursor: &str) -> Result<ListFolderPage, CloudError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(CloudCall::ListFolderContinue);
        let (remaining, _) = state
            .pending_pages
            .take()
            .ok_or_else(|| CloudError::Protocol("continue without listing".into()))?;
        let page_size: usize = state.page_size.unwrap_or(usize::MAX).max(1);
        let first: Vec<Metadata> = remaining.iter().take(page_size).cloned().collect();
        let has_more: bool = remaining.len() > page_size;
        let rest: Vec<Metadata> = remaining.into_iter().skip(page_size).collect();
        state.pending_pages = Some((rest, true));
        Ok(ListFolderPage {
            entries: first,
            cursor: "cursor-n".to_string(),
            has_more,
        })
    }

    async fn create_folder(&self, path: &str) -> Result<(), CloudError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(CloudCall::CreateFolder {
            path: path.to_string(),
        });
        Ok(())
    }

    async fn delete_batch(&self, paths: &[String]) -> Result<BatchLaunch, CloudError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(CloudCall::DeleteBatch {
            paths: paths.to_vec(),
        });
        state.next_job += 1;
        let id: String = format!("job-{}", state.next_job);
        state.poll_counts.insert(id.clone(), 0);
        for path in paths {
            state.committed.remove(path);
        }
        Ok(BatchLaunch::JobId(id))
    }

    async fn delete_batch_check(&self, job_id: &str) -> Result<BatchJobStatus, CloudError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(CloudCall::DeleteBatchCheck {
            job_id: job_id.to_string(),
        });
        let threshold: u32 = state.polls_before_complete;
        let count: &mut u32 = state.poll_counts.entry(job_id.to_string()).or_insert(0);
        if *count < threshold {
            *count += 1;
            Ok(BatchJobStatus::InProgress)
        } else {
            Ok(BatchJobStatus::Complete)
        }
    }

    async fn list_revisions(
        &self,
        path: &str,
        _mode: RevisionMode,
        limit: u32,
    ) -> Result<Vec<Revision>, CloudError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(CloudCall::ListRevisions {
            path: path.to_string(),
        });
        let mut revisions: Vec<Revision> = state
            .revisions
            .get(&path.to_lowercase())
            .cloned()
            .unwrap_or_default();
        revisions.truncate(limit as usize);
        Ok(revisions)
    }

    async fn restore(&self, path: &str, rev: &str) -> Result<FileMetadata, CloudError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(CloudCall::Restore {
            path: path.to_string(),
            rev: rev.to_string(),
        });
        let size: u64 = state
            .revisions
            .get(&path.to_lowercase())
            .and_then(|revs| revs.iter().find(|r| r.rev == rev))
            .map(|r| r.size)
            .unwrap_or(0);
        Ok(Self::file_metadata(path, size))
    }
}
