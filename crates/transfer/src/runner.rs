//! Per-directory upload runner.
//!
//! Ties the stages together for a queue of jobs: session-aware queue
//! reordering, the per-file read/encrypt/accumulate/upload loop, the
//! next-file pre-open hint, and the outer per-file retry envelope.

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{info, warn};

use dropvault_archive::SALT_LEN;
use dropvault_client::{CloudClient, CommitInfo, RetrySettings};

use crate::accumulator::ChunkAccumulator;
use crate::driver::UploadDriver;
use crate::encrypt::{EncryptStage, UploadStage};
use crate::error::TransferError;
use crate::reader::BlockReader;
use crate::session_store::SessionStore;
use crate::types::FileJob;

/// Additional attempts per file after the first one fails.
const FILE_RETRY_LIMIT: u32 = 3;

/// Knobs for the upload pipeline.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Read-buffer size; also the chunk emission threshold.
    pub read_buffer_size: usize,
    /// Chunk arena allocation: the threshold plus headroom for the
    /// encryption container's framing.
    pub arena_capacity: usize,
    /// Per-call retry policy.
    pub retry: RetrySettings,
    /// Archive password; `None` uploads files as-is.
    pub password: Option<String>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            read_buffer_size: 90 * 1024 * 1024,
            arena_capacity: 99 * 1024 * 1024,
            retry: RetrySettings::default(),
            password: None,
        }
    }
}

/// Upload a queue of files in order through one bounded pipeline.
///
/// A stored session record whose file is still queued moves that file to
/// the head of the queue, maximizing the chance of resuming before the
/// server-side session expires; a record for a file no longer queued is
/// discarded.
pub async fn upload_all<C: CloudClient>(
    client: &C,
    store: &SessionStore,
    options: &UploadOptions,
    mut jobs: Vec<FileJob>,
) -> Result<(), TransferError> {
    store.sweep_expired().await;
    reorder_for_resume(store, &mut jobs).await;

    let mut driver: UploadDriver<'_, C> = UploadDriver::new(client, store, options.retry.clone());
    let mut reader: BlockReader = BlockReader::new(options.read_buffer_size);
    let mut arena: ChunkAccumulator =
        ChunkAccumulator::new(options.read_buffer_size, options.arena_capacity);

    let total: usize = jobs.len();
    for (index, job) in jobs.iter().enumerate() {
        info!(
            file = %job.source_path.display(),
            remote = %job.remote_path,
            position = index + 1,
            total,
            size = job.size,
            "uploading"
        );
        let next: Option<&FileJob> = jobs.get(index + 1);
        upload_with_retries(&mut driver, &mut reader, &mut arena, options, job, next).await?;
    }
    Ok(())
}

/// Outer retry envelope: each retry re-opens the file from the start and
/// lets the resume protocol decide whether to skip, verify and continue,
/// or restart.
async fn upload_with_retries<C: CloudClient>(
    driver: &mut UploadDriver<'_, C>,
    reader: &mut BlockReader,
    arena: &mut ChunkAccumulator,
    options: &UploadOptions,
    job: &FileJob,
    next: Option<&FileJob>,
) -> Result<(), TransferError> {
    let mut failures: u32 = 0;
    loop {
        match upload_one(driver, reader, arena, options, job, next).await {
            Ok(()) => return Ok(()),
            Err(e) if failures < FILE_RETRY_LIMIT => {
                failures += 1;
                warn!(
                    file = %job.source_path.display(),
                    attempt = failures,
                    error = %e,
                    "upload attempt failed, retrying file"
                );
            }
            Err(e) => return Err(e),
        }
    }
}

/// One pass over one file: prepare, stream, finish.
async fn upload_one<C: CloudClient>(
    driver: &mut UploadDriver<'_, C>,
    reader: &mut BlockReader,
    arena: &mut ChunkAccumulator,
    options: &UploadOptions,
    job: &FileJob,
    next: Option<&FileJob>,
) -> Result<(), TransferError> {
    driver.prepare(job).await;
    arena.clear();

    reader.enqueue_next(&job.source_path);
    reader.open_next().await?;
    if let Some(next_job) = next {
        // Hint for the end-of-file pre-open.
        reader.enqueue_next(&next_job.source_path);
    }

    let (mut stage, salt): (UploadStage, Option<[u8; SALT_LEN]>) = match options.password.as_deref()
    {
        Some(password) if !password.is_empty() => {
            // Resumed uploads must re-encrypt under the recorded salt to
            // reproduce the original ciphertext.
            let salt: [u8; SALT_LEN] = driver.resumed_salt().unwrap_or_else(random_salt);
            let stage: EncryptStage =
                EncryptStage::new(&job.file_name(), job.client_modified, password, salt)?;
            (UploadStage::Encrypt(stage), Some(salt))
        }
        _ => (UploadStage::Direct, None),
    };

    stage.begin(arena)?;
    loop {
        let len: usize = reader.read_block().await?;
        if len == 0 {
            break;
        }
        // A full arena is emitted before the next write lands, so the
        // final chunk always stays in hand for finish().
        if arena.is_full() {
            driver.upload_chunk(arena.chunk(), salt.as_ref()).await?;
            arena.clear();
        }
        stage.write(arena, reader.current_block())?;
    }
    stage.finish(arena)?;

    let commit: CommitInfo = CommitInfo::overwrite(job.remote_path.clone(), job.client_modified);
    driver.finish(&commit, arena.chunk()).await?;
    arena.clear();
    Ok(())
}

/// Move the recorded file, if still queued, to the head of the queue.
async fn reorder_for_resume(store: &SessionStore, jobs: &mut Vec<FileJob>) {
    let Some(record) = store.load().await else {
        return;
    };
    match jobs.iter().position(|j| j.source_path == record.file_path) {
        Some(0) => {}
        Some(position) => {
            info!(
                file = %record.file_path.display(),
                "moving interrupted upload to the head of the queue"
            );
            let job: FileJob = jobs.remove(position);
            jobs.insert(0, job);
        }
        None => {
            info!(
                file = %record.file_path.display(),
                "recorded file is no longer queued, discarding session record"
            );
            store.delete().await;
        }
    }
}

fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}
