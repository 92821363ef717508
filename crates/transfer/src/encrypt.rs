//! Optional encryption stage between the reader and the accumulator.

use chrono::{DateTime, Utc};

use dropvault_archive::{ArchiveError, ContainerWriter, OneShotSalt, SALT_LEN};

use crate::accumulator::ChunkAccumulator;
use crate::error::TransferError;

/// Streams a source file into a single-entry encrypted archive whose
/// output lands in the chunk arena.
///
/// The salt is injected through a one-shot source scoped to exactly this
/// entry. If the container layer ever asks for a second salt or a wrong
/// length, the upload fails as a resume failure instead of silently
/// producing ciphertext the session record cannot vouch for.
pub struct EncryptStage {
    writer: ContainerWriter,
}

impl EncryptStage {
    /// Build the stage for one file.
    ///
    /// # Arguments
    /// * `source_name` - Basename of the source file; the entry is named
    ///   `/<basename>`
    /// * `modified` - Source modification timestamp
    /// * `password` - Archive password
    /// * `salt` - Salt to encrypt under: fresh for new uploads, replayed
    ///   from the session record on resume
    pub fn new(
        source_name: &str,
        modified: DateTime<Utc>,
        password: &str,
        salt: [u8; SALT_LEN],
    ) -> Result<Self, TransferError> {
        let source: OneShotSalt = OneShotSalt::fixed(salt);
        let entry_name: String = format!("/{source_name}");
        let writer: ContainerWriter =
            ContainerWriter::new(entry_name, modified, password, &source).map_err(map_salt_drift)?;
        Ok(Self { writer })
    }

    fn begin(&mut self, out: &mut ChunkAccumulator) -> Result<(), TransferError> {
        self.writer.begin(out).map_err(map_salt_drift)
    }

    fn write(&mut self, out: &mut ChunkAccumulator, block: &[u8]) -> Result<(), TransferError> {
        self.writer.write(out, block).map_err(map_salt_drift)
    }

    fn finish(self, out: &mut ChunkAccumulator) -> Result<(), TransferError> {
        self.writer.finish(out).map_err(map_salt_drift)
    }
}

/// Salt-source guard trips mean the re-encryption can no longer be
/// byte-identical to the recorded run.
fn map_salt_drift(err: ArchiveError) -> TransferError {
    match err {
        ArchiveError::SaltLength { .. } => TransferError::ResumeFailed {
            reason: "archive salt length drifted",
        },
        ArchiveError::SaltExhausted => TransferError::ResumeFailed {
            reason: "archive salt drawn twice",
        },
        other => TransferError::Archive(other),
    }
}

/// The producer side of the pipeline: raw passthrough or encrypted
/// container.
pub enum UploadStage {
    Direct,
    Encrypt(EncryptStage),
}

impl UploadStage {
    /// Emit any stream prologue into the arena.
    pub fn begin(&mut self, out: &mut ChunkAccumulator) -> Result<(), TransferError> {
        match self {
            UploadStage::Direct => Ok(()),
            UploadStage::Encrypt(stage) => stage.begin(out),
        }
    }

    /// Feed one source block through the stage into the arena.
    pub fn write(&mut self, out: &mut ChunkAccumulator, block: &[u8]) -> Result<(), TransferError> {
        match self {
            UploadStage::Direct => {
                use std::io::Write;
                out.write_all(block)
                    .map_err(|e| TransferError::Archive(ArchiveError::Io(e)))
            }
            UploadStage::Encrypt(stage) => stage.write(out, block),
        }
    }

    /// Emit any stream trailer into the arena.
    pub fn finish(self, out: &mut ChunkAccumulator) -> Result<(), TransferError> {
        match self {
            UploadStage::Direct => Ok(()),
            UploadStage::Encrypt(stage) => stage.finish(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn fixed_timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn run_stage(salt: [u8; SALT_LEN], blocks: &[&[u8]]) -> Vec<u8> {
        let mut acc: ChunkAccumulator = ChunkAccumulator::new(1 << 20, 1 << 20);
        let mut stage: EncryptStage =
            EncryptStage::new("movie.mkv", fixed_timestamp(), "pw", salt).unwrap();
        stage.begin(&mut acc).unwrap();
        for block in blocks {
            stage.write(&mut acc, block).unwrap();
        }
        stage.finish(&mut acc).unwrap();
        acc.chunk().to_vec()
    }

    #[test]
    fn test_same_salt_reproduces_stream() {
        let salt: [u8; SALT_LEN] = [3u8; SALT_LEN];
        let a: Vec<u8> = run_stage(salt, &[b"hello ", b"world"]);
        let b: Vec<u8> = run_stage(salt, &[b"hello ", b"world"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_block_boundaries_do_not_affect_stream() {
        let salt: [u8; SALT_LEN] = [3u8; SALT_LEN];
        let a: Vec<u8> = run_stage(salt, &[b"hello world"]);
        let b: Vec<u8> = run_stage(salt, &[b"hel", b"lo wor", b"ld"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_salt_different_stream() {
        let a: Vec<u8> = run_stage([3u8; SALT_LEN], &[b"hello world"]);
        let b: Vec<u8> = run_stage([4u8; SALT_LEN], &[b"hello world"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_direct_stage_passthrough() {
        let mut acc: ChunkAccumulator = ChunkAccumulator::new(64, 64);
        let mut stage: UploadStage = UploadStage::Direct;
        stage.begin(&mut acc).unwrap();
        stage.write(&mut acc, b"raw bytes").unwrap();
        stage.finish(&mut acc).unwrap();
        assert_eq!(acc.chunk(), b"raw bytes");
    }

    #[test]
    fn test_entry_name_gets_leading_slash() {
        // The entry name sits right after the 30-byte fixed local header.
        let out: Vec<u8> = run_stage([1u8; SALT_LEN], &[b"x"]);
        assert_eq!(&out[30..30 + 10], b"/movie.mkv");
    }
}
