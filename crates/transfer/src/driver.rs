//! Chunked upload session driver.
//!
//! Drives one file's byte stream through the cloud service's upload
//! session state machine:
//!
//! ```text
//! Idle ─► Prepared ─► ChunkingBeforeResume ─► Verified ─► Uploading ─► Idle
//!            │                  (resumed uploads only)        ▲
//!            └────────────────────────────────────────────────┘
//! ```
//!
//! with failure edges from every non-terminal state to `Failed`.
//!
//! Two hashes do two different jobs here and must not be conflated:
//!
//! - the **chain hash** `h_i = SHA256(h_{i-1} ∥ chunk_i)`, `h_0 = 0³²`,
//!   an equality witness over the stream prefix, used only to verify
//!   that a resumed run is reproducing the recorded bytes;
//! - the service's **content hash** (block SHA-256, see
//!   [`dropvault_client::content_hash_hex`]), a transport checksum over
//!   one call's payload.

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use dropvault_archive::SALT_LEN;
use dropvault_client::{
    call_with_retry, content_hash_hex, CloudClient, CloudError, CommitInfo, FileMetadata,
    RetrySettings,
};

use crate::error::TransferError;
use crate::session_store::{SessionRecord, SessionStore};
use crate::types::FileJob;

/// Observable state of the driver, per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverPhase {
    Idle,
    Prepared,
    /// Replaying chunks that the server already holds.
    ChunkingBeforeResume,
    /// Chain hash matched the record at the resume point.
    Verified,
    Uploading,
    Failed,
}

/// Drives the chunked upload protocol for one file at a time.
pub struct UploadDriver<'a, C: CloudClient> {
    client: &'a C,
    store: &'a SessionStore,
    retry: RetrySettings,

    phase: DriverPhase,
    job: Option<FileJob>,
    /// Stream bytes acknowledged by the service in this session.
    upload_offset: u64,
    /// Stream bytes pushed through the chain hash locally.
    local_offset: u64,
    /// Snapshot of the record's offset at prepare; 0 for fresh uploads.
    resume_offset: u64,
    active_session: Option<String>,
    hash_state: [u8; 32],
    hash_verified: bool,
    /// Chain hash recorded by the interrupted run.
    resume_hash: Option<String>,
    /// Salt recorded by the interrupted run.
    resume_salt: Option<[u8; SALT_LEN]>,
}

impl<'a, C: CloudClient> UploadDriver<'a, C> {
    pub fn new(client: &'a C, store: &'a SessionStore, retry: RetrySettings) -> Self {
        Self {
            client,
            store,
            retry,
            phase: DriverPhase::Idle,
            job: None,
            upload_offset: 0,
            local_offset: 0,
            resume_offset: 0,
            active_session: None,
            hash_state: [0u8; 32],
            hash_verified: false,
            resume_hash: None,
            resume_salt: None,
        }
    }

    pub fn phase(&self) -> DriverPhase {
        self.phase
    }

    /// Whether `prepare` adopted a saved session.
    pub fn is_resuming(&self) -> bool {
        self.resume_offset > 0
    }

    /// Salt from the adopted session record, for replaying the
    /// encryption stage.
    pub fn resumed_salt(&self) -> Option<[u8; SALT_LEN]> {
        self.resume_salt
    }

    /// Reset transient state and adopt a matching session record if one
    /// is stored. Idempotent: calling it again on the same job rebuilds
    /// the same state.
    pub async fn prepare(&mut self, job: &FileJob) {
        self.clear();
        self.job = Some(job.clone());
        self.phase = DriverPhase::Prepared;

        let Some(record) = self.store.load().await else {
            return;
        };

        if !record_matches(&record, job) {
            info!(
                file = %job.source_path.display(),
                recorded = %record.file_path.display(),
                "session record does not match the queued file, discarding"
            );
            self.store.delete().await;
            return;
        }

        info!(
            file = %job.source_path.display(),
            offset = record.current_offset,
            session = %record.session_id,
            "resuming interrupted upload"
        );
        self.resume_offset = record.current_offset;
        self.upload_offset = record.current_offset;
        self.active_session = Some(record.session_id.clone());
        self.resume_salt = record.encryption_salt_bytes();
        self.resume_hash = Some(record.content_hash);
        self.phase = DriverPhase::ChunkingBeforeResume;
    }

    /// Process one chunk from the accumulator.
    ///
    /// Hashes the chunk into the chain, verifies against the record at
    /// the resume point, skips chunks the server already holds, uploads
    /// the rest, and persists progress after each successful call.
    ///
    /// # Arguments
    /// * `chunk` - The chunk bytes; the view stays stable across retries
    /// * `salt` - The salt the stream is encrypted under, if any;
    ///   persisted with the progress record
    pub async fn upload_chunk(
        &mut self,
        chunk: &[u8],
        salt: Option<&[u8; SALT_LEN]>,
    ) -> Result<(), TransferError> {
        if self.job.is_none() {
            return Err(TransferError::Sequence("upload_chunk before prepare"));
        }
        let len: u64 = chunk.len() as u64;

        // 1. Fold the chunk into the chain.
        let mut hasher: Sha256 = Sha256::new();
        hasher.update(self.hash_state);
        hasher.update(chunk);
        self.hash_state = hasher.finalize().into();
        self.local_offset += len;

        // 2. At the resume point, the chain must reproduce the record.
        if self.resume_offset > 0 && !self.hash_verified && self.local_offset >= self.resume_offset
        {
            let chain: String = hex::encode(self.hash_state);
            let recorded: &str = self.resume_hash.as_deref().unwrap_or_default();
            if !recorded.eq_ignore_ascii_case(&chain) {
                warn!(
                    local_offset = self.local_offset,
                    resume_offset = self.resume_offset,
                    "chain hash does not reproduce the recorded prefix"
                );
                self.store.delete().await;
                self.clear();
                self.phase = DriverPhase::Failed;
                return Err(TransferError::ResumeFailed {
                    reason: "hash verification failed",
                });
            }
            debug!(offset = self.local_offset, "resume point verified");
            self.hash_verified = true;
            self.phase = DriverPhase::Verified;
        }

        // 3. The server already holds everything up to the resume offset.
        if self.local_offset <= self.resume_offset {
            debug!(offset = self.local_offset, "skipping already-uploaded chunk");
            return Ok(());
        }

        // 4. Dispatch.
        let content_hash: String = content_hash_hex(chunk);
        let session_id: String = match self.active_session.clone() {
            None => {
                let id: String = call_with_retry(&self.retry, "upload_session/start", || {
                    self.client.session_start(chunk, Some(&content_hash))
                })
                .await?;
                debug!(session = %id, len, "upload session started");
                self.active_session = Some(id.clone());
                id
            }
            Some(id) => {
                let result: Result<(), CloudError> =
                    call_with_retry(&self.retry, "upload_session/append", || {
                        self.client
                            .session_append(&id, self.upload_offset, chunk, Some(&content_hash))
                    })
                    .await;
                if let Err(CloudError::SessionNotFound) = result {
                    warn!(session = %id, "server no longer knows the upload session");
                    self.store.delete().await;
                    self.clear();
                    self.phase = DriverPhase::Failed;
                    return Err(TransferError::ResumeFailed {
                        reason: "session not found",
                    });
                }
                result?;
                debug!(session = %id, offset = self.upload_offset, len, "chunk appended");
                id
            }
        };
        self.phase = DriverPhase::Uploading;
        self.upload_offset += len;

        // 5. Persist progress for cross-process resume.
        let record: SessionRecord = self.progress_record(session_id, salt)?;
        self.store.save(&record).await;
        Ok(())
    }

    /// Finalize the file: close the session, or upload small files in a
    /// single shot when no session was ever needed. On success the
    /// session record is gone and the driver is back to `Idle`.
    pub async fn finish(
        &mut self,
        commit: &CommitInfo,
        final_chunk: &[u8],
    ) -> Result<FileMetadata, TransferError> {
        if self.job.is_none() {
            return Err(TransferError::Sequence("finish before prepare"));
        }
        let content_hash: String = content_hash_hex(final_chunk);
        let result: Result<FileMetadata, CloudError> = match self.active_session.clone() {
            None => {
                debug!(path = %commit.path, len = final_chunk.len(), "single-shot upload");
                call_with_retry(&self.retry, "upload", || {
                    self.client
                        .simple_upload(commit, final_chunk, Some(&content_hash))
                })
                .await
            }
            Some(id) => {
                debug!(
                    session = %id,
                    offset = self.upload_offset,
                    len = final_chunk.len(),
                    "finishing upload session"
                );
                call_with_retry(&self.retry, "upload_session/finish", || {
                    self.client.session_finish(
                        &id,
                        self.upload_offset,
                        commit,
                        final_chunk,
                        Some(&content_hash),
                    )
                })
                .await
            }
        };

        match result {
            Ok(metadata) => {
                self.store.delete().await;
                self.clear();
                Ok(metadata)
            }
            Err(e) => {
                // The record stays; the session may still be finishable on
                // a later attempt.
                self.phase = DriverPhase::Failed;
                Err(e.into())
            }
        }
    }

    /// Build the progress record for the current position.
    fn progress_record(
        &self,
        session_id: String,
        salt: Option<&[u8; SALT_LEN]>,
    ) -> Result<SessionRecord, TransferError> {
        let job: &FileJob = self
            .job
            .as_ref()
            .ok_or(TransferError::Sequence("no job prepared"))?;
        let salt: Option<[u8; SALT_LEN]> = salt.copied().or(self.resume_salt);
        Ok(SessionRecord {
            session_id,
            file_path: job.source_path.clone(),
            client_modified: job.client_modified,
            total_size: job.size,
            current_offset: self.local_offset,
            encryption_salt: salt.map(hex::encode),
            content_hash: hex::encode(self.hash_state),
        })
    }

    fn clear(&mut self) {
        self.phase = DriverPhase::Idle;
        self.job = None;
        self.upload_offset = 0;
        self.local_offset = 0;
        self.resume_offset = 0;
        self.active_session = None;
        self.hash_state = [0u8; 32];
        self.hash_verified = false;
        self.resume_hash = None;
        self.resume_salt = None;
    }
}

/// A record may only be adopted for a job that is byte-for-byte the file
/// it was written for.
fn record_matches(record: &SessionRecord, job: &FileJob) -> bool {
    record.file_path == job.source_path
        && record.total_size == job.size
        && record.client_modified == job.client_modified
        && !record.content_hash.is_empty()
        && record.salt_field_usable()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    use dropvault_client::testing::{CloudCall, MockCloud};

    use super::*;

    /// Chain hash of a stream prefix, as an interrupted run would have
    /// recorded it.
    fn chain_hash_hex(chunks: &[&[u8]]) -> String {
        let mut state: [u8; 32] = [0u8; 32];
        for chunk in chunks {
            let mut hasher: Sha256 = Sha256::new();
            hasher.update(state);
            hasher.update(chunk);
            state = hasher.finalize().into();
        }
        hex::encode(state)
    }

    fn job(path: &str, size: u64) -> FileJob {
        FileJob {
            source_path: PathBuf::from(path),
            remote_path: format!("/backup{path}"),
            size,
            client_modified: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        }
    }

    fn store(base: &TempDir) -> SessionStore {
        SessionStore::with_base_dir(base.path(), std::path::Path::new("/data"))
    }

    #[tokio::test]
    async fn test_prepare_is_idempotent() {
        let base: TempDir = TempDir::new().unwrap();
        let store: SessionStore = store(&base);
        let cloud: MockCloud = MockCloud::new();
        let job: FileJob = job("/data/a.bin", 300);

        store
            .save(&SessionRecord {
                session_id: "session-9".into(),
                file_path: job.source_path.clone(),
                client_modified: job.client_modified,
                total_size: 300,
                current_offset: 100,
                encryption_salt: None,
                content_hash: chain_hash_hex(&[&[1u8; 100]]),
            })
            .await;

        let mut driver: UploadDriver<'_, MockCloud> =
            UploadDriver::new(&cloud, &store, RetrySettings::default());
        driver.prepare(&job).await;
        let first: (DriverPhase, bool, u64) =
            (driver.phase(), driver.is_resuming(), driver.upload_offset);
        driver.prepare(&job).await;
        let second: (DriverPhase, bool, u64) =
            (driver.phase(), driver.is_resuming(), driver.upload_offset);
        assert_eq!(first, second);
        assert_eq!(first.0, DriverPhase::ChunkingBeforeResume);
        assert!(first.1);
    }

    #[tokio::test]
    async fn test_mismatched_record_deleted() {
        let base: TempDir = TempDir::new().unwrap();
        let store: SessionStore = store(&base);
        let cloud: MockCloud = MockCloud::new();

        store
            .save(&SessionRecord {
                session_id: "session-9".into(),
                file_path: PathBuf::from("/data/other.bin"),
                client_modified: Utc::now(),
                total_size: 300,
                current_offset: 100,
                encryption_salt: None,
                content_hash: "ab".repeat(32),
            })
            .await;

        let mut driver: UploadDriver<'_, MockCloud> =
            UploadDriver::new(&cloud, &store, RetrySettings::default());
        driver.prepare(&job("/data/a.bin", 300)).await;

        assert_eq!(driver.phase(), DriverPhase::Prepared);
        assert!(!driver.is_resuming());
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_record_with_bad_salt_rejected() {
        let base: TempDir = TempDir::new().unwrap();
        let store: SessionStore = store(&base);
        let cloud: MockCloud = MockCloud::new();
        let job: FileJob = job("/data/a.bin", 300);

        store
            .save(&SessionRecord {
                session_id: "session-9".into(),
                file_path: job.source_path.clone(),
                client_modified: job.client_modified,
                total_size: 300,
                current_offset: 100,
                encryption_salt: Some("not-hex".into()),
                content_hash: "ab".repeat(32),
            })
            .await;

        let mut driver: UploadDriver<'_, MockCloud> =
            UploadDriver::new(&cloud, &store, RetrySettings::default());
        driver.prepare(&job).await;
        assert!(!driver.is_resuming());
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_chunk_before_prepare_fails() {
        let base: TempDir = TempDir::new().unwrap();
        let store: SessionStore = store(&base);
        let cloud: MockCloud = MockCloud::new();

        let mut driver: UploadDriver<'_, MockCloud> =
            UploadDriver::new(&cloud, &store, RetrySettings::default());
        assert!(matches!(
            driver.upload_chunk(b"data", None).await,
            Err(TransferError::Sequence(_))
        ));
    }

    #[tokio::test]
    async fn test_record_carries_salt_from_call() {
        let base: TempDir = TempDir::new().unwrap();
        let store: SessionStore = store(&base);
        let cloud: MockCloud = MockCloud::new();
        let job: FileJob = job("/data/a.bin", 300);
        let salt: [u8; SALT_LEN] = [0x5a; SALT_LEN];

        let mut driver: UploadDriver<'_, MockCloud> =
            UploadDriver::new(&cloud, &store, RetrySettings::default());
        driver.prepare(&job).await;
        driver.upload_chunk(&[1u8; 100], Some(&salt)).await.unwrap();

        let record: SessionRecord = store.load().await.unwrap();
        assert_eq!(record.encryption_salt_bytes(), Some(salt));
        assert_eq!(record.current_offset, 100);
        assert_eq!(record.total_size, 300);
        assert_eq!(record.content_hash.len(), 64);
    }

    #[tokio::test]
    async fn test_chain_hash_differs_from_content_hash() {
        // Same bytes, two different hash jobs: the transport checksum and
        // the resume witness must never coincide.
        let data: &[u8] = &[7u8; 100];
        let chain: String = chain_hash_hex(&[data]);
        let content: String = content_hash_hex(data);
        assert_eq!(chain.len(), 64);
        assert_eq!(content.len(), 64);
        assert_ne!(chain, content);
    }

    #[tokio::test]
    async fn test_progress_record_after_each_chunk() {
        let base: TempDir = TempDir::new().unwrap();
        let store: SessionStore = store(&base);
        let cloud: MockCloud = MockCloud::new();
        let job: FileJob = job("/data/a.bin", 300);

        let mut driver: UploadDriver<'_, MockCloud> =
            UploadDriver::new(&cloud, &store, RetrySettings::default());
        driver.prepare(&job).await;

        driver.upload_chunk(&[1u8; 100], None).await.unwrap();
        assert_eq!(store.load().await.unwrap().current_offset, 100);
        assert_eq!(
            store.load().await.unwrap().content_hash,
            chain_hash_hex(&[&[1u8; 100]])
        );

        driver.upload_chunk(&[2u8; 100], None).await.unwrap();
        let record: SessionRecord = store.load().await.unwrap();
        assert_eq!(record.current_offset, 200);
        assert_eq!(
            record.content_hash,
            chain_hash_hex(&[&[1u8; 100], &[2u8; 100]])
        );
        assert!(record.current_offset <= record.total_size);

        // One session for both chunks.
        let calls: Vec<CloudCall> = cloud.upload_calls();
        assert!(matches!(calls[0], CloudCall::SessionStart { .. }));
        assert!(matches!(
            calls[1],
            CloudCall::SessionAppend { offset: 100, .. }
        ));
    }
}
