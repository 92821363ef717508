//! Double-buffered asynchronous file reader.

use std::mem;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::TransferError;

/// A filled read buffer together with the file it came from.
struct ReadAhead {
    path: PathBuf,
    file: File,
    buf: Vec<u8>,
    /// Valid prefix of `buf`; 0 at end of file.
    len: usize,
}

enum Inflight {
    /// Primed by `open_next`, not yet handed out.
    Ready(ReadAhead),
    /// A read running concurrently with downstream consumption.
    Task(JoinHandle<Result<ReadAhead, TransferError>>),
}

/// Reads a queue of files as fixed-size blocks, overlapping disk I/O
/// with downstream consumption.
///
/// Two arenas of `block_size` bytes circulate: while the consumer works
/// on the current block, the other arena is the target of an in-flight
/// background read. When a file reaches end of file and a next-file hint
/// is queued, the next file is opened and its first block primed in the
/// background so `open_next` finds it ready.
///
/// Failures opening or priming the next file are deferred to the
/// `open_next` call for that file; they never surface in the middle of
/// the current file's read stream.
pub struct BlockReader {
    block_size: usize,
    current: Vec<u8>,
    current_len: usize,
    /// Arena at rest, when no read is in flight.
    spare: Option<Vec<u8>>,
    inflight: Option<Inflight>,
    preopen: Option<(PathBuf, JoinHandle<Result<ReadAhead, TransferError>>)>,
    next_hint: Option<PathBuf>,
}

impl BlockReader {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            current: vec![0; block_size],
            current_len: 0,
            spare: Some(vec![0; block_size]),
            inflight: None,
            preopen: None,
            next_hint: None,
        }
    }

    /// Set the next file to open. Idempotent until consumed by
    /// `open_next`.
    pub fn enqueue_next(&mut self, path: &Path) {
        self.next_hint = Some(path.to_path_buf());
    }

    /// Close any prior file and open the hinted one, priming its first
    /// block. Uses the pre-opened handle when one was prepared for the
    /// same path.
    pub async fn open_next(&mut self) -> Result<(), TransferError> {
        // Reclaim the arena of any abandoned in-flight read (retry paths).
        if let Some(stale) = self.inflight.take() {
            match stale {
                Inflight::Ready(ahead) => self.spare = Some(ahead.buf),
                Inflight::Task(handle) => {
                    if let Ok(Ok(ahead)) = handle.await {
                        self.spare = Some(ahead.buf);
                    }
                }
            }
        }

        let preopen_matches: bool = match (&self.preopen, &self.next_hint) {
            (Some((path, _)), Some(hint)) => path == hint,
            _ => false,
        };

        let ahead: ReadAhead = if preopen_matches {
            let (_, handle) = self
                .preopen
                .take()
                .ok_or(TransferError::Sequence("pre-open state changed underfoot"))?;
            self.next_hint = None;
            handle
                .await
                .map_err(|e| TransferError::Background(e.to_string()))??
        } else {
            // A stale pre-open (different file) is discarded; its arena is
            // recovered if it completed.
            if let Some((_, handle)) = self.preopen.take() {
                if let Ok(Ok(ahead)) = handle.await {
                    self.spare = Some(ahead.buf);
                }
            }
            let path: PathBuf = self
                .next_hint
                .take()
                .ok_or(TransferError::Sequence("open_next without enqueue_next"))?;
            let buf: Vec<u8> = self.take_spare();
            open_and_prime(path, buf).await?
        };

        debug!(path = %ahead.path.display(), "opened file");
        self.inflight = Some(Inflight::Ready(ahead));
        self.current_len = 0;
        Ok(())
    }

    /// Produce the next block; 0 means the current file is exhausted.
    /// The block itself is available through [`BlockReader::current_block`]
    /// until the next call.
    pub async fn read_block(&mut self) -> Result<usize, TransferError> {
        let inflight: Inflight = match self.inflight.take() {
            Some(inflight) => inflight,
            // At (or before) end of file: stay there.
            None => return Ok(0),
        };
        let ahead: ReadAhead = match inflight {
            Inflight::Ready(ahead) => ahead,
            Inflight::Task(handle) => handle
                .await
                .map_err(|e| TransferError::Background(e.to_string()))??,
        };

        let ReadAhead {
            path,
            file,
            buf,
            len,
        } = ahead;
        let prev: Vec<u8> = mem::replace(&mut self.current, buf);
        self.current_len = len;

        if len > 0 {
            // Overlap the next read with downstream consumption.
            self.inflight = Some(Inflight::Task(tokio::spawn(fill(path, file, prev))));
        } else {
            self.spare = Some(prev);
            drop(file);
            if let Some(next) = self.next_hint.clone() {
                if self.preopen.is_none() {
                    let buf: Vec<u8> = self.take_spare();
                    debug!(path = %next.display(), "pre-opening next file");
                    self.preopen = Some((next.clone(), tokio::spawn(open_and_prime(next, buf))));
                }
            }
        }
        Ok(self.current_len)
    }

    /// The most recently returned block.
    pub fn current_block(&self) -> &[u8] {
        &self.current[..self.current_len]
    }

    /// An arena can be lost when a background read fails; fall back to a
    /// fresh allocation rather than wedging the pipeline.
    fn take_spare(&mut self) -> Vec<u8> {
        self.spare
            .take()
            .unwrap_or_else(|| vec![0; self.block_size])
    }
}

async fn open_and_prime(path: PathBuf, buf: Vec<u8>) -> Result<ReadAhead, TransferError> {
    let file: File = File::open(&path)
        .await
        .map_err(|e| TransferError::io(&path, e))?;
    fill(path, file, buf).await
}

/// Read until the buffer is full or the file ends.
async fn fill(path: PathBuf, mut file: File, mut buf: Vec<u8>) -> Result<ReadAhead, TransferError> {
    let mut len: usize = 0;
    while len < buf.len() {
        let n: usize = file
            .read(&mut buf[len..])
            .await
            .map_err(|e| TransferError::io(&path, e))?;
        if n == 0 {
            break;
        }
        len += n;
    }
    Ok(ReadAhead {
        path,
        file,
        buf,
        len,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;

    fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path: PathBuf = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    async fn read_whole(reader: &mut BlockReader) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::new();
        loop {
            let len: usize = reader.read_block().await.unwrap();
            if len == 0 {
                break;
            }
            out.extend_from_slice(reader.current_block());
        }
        out
    }

    #[tokio::test]
    async fn test_reads_file_in_blocks() {
        let dir: TempDir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..1000).map(|i| (i % 256) as u8).collect();
        let path: PathBuf = write_file(&dir, "a.bin", &data);

        let mut reader: BlockReader = BlockReader::new(64);
        reader.enqueue_next(&path);
        reader.open_next().await.unwrap();

        let len: usize = reader.read_block().await.unwrap();
        assert_eq!(len, 64);
        assert_eq!(reader.current_block(), &data[..64]);

        let mut out: Vec<u8> = data[..64].to_vec();
        out.extend(read_whole(&mut reader).await);
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_exact_multiple_of_block_size() {
        let dir: TempDir = TempDir::new().unwrap();
        let data: Vec<u8> = vec![7u8; 128];
        let path: PathBuf = write_file(&dir, "a.bin", &data);

        let mut reader: BlockReader = BlockReader::new(64);
        reader.enqueue_next(&path);
        reader.open_next().await.unwrap();

        assert_eq!(reader.read_block().await.unwrap(), 64);
        assert_eq!(reader.read_block().await.unwrap(), 64);
        assert_eq!(reader.read_block().await.unwrap(), 0);
        // Stays at end of file.
        assert_eq!(reader.read_block().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sequential_files_with_preopen() {
        let dir: TempDir = TempDir::new().unwrap();
        let first: Vec<u8> = vec![1u8; 100];
        let second: Vec<u8> = vec![2u8; 150];
        let path_a: PathBuf = write_file(&dir, "a.bin", &first);
        let path_b: PathBuf = write_file(&dir, "b.bin", &second);

        let mut reader: BlockReader = BlockReader::new(64);
        reader.enqueue_next(&path_a);
        reader.open_next().await.unwrap();
        reader.enqueue_next(&path_b);

        assert_eq!(read_whole(&mut reader).await, first);

        // The end-of-file transition scheduled a pre-open for b.bin.
        reader.open_next().await.unwrap();
        assert_eq!(read_whole(&mut reader).await, second);
    }

    #[tokio::test]
    async fn test_empty_file() {
        let dir: TempDir = TempDir::new().unwrap();
        let path: PathBuf = write_file(&dir, "empty.bin", b"");

        let mut reader: BlockReader = BlockReader::new(64);
        reader.enqueue_next(&path);
        reader.open_next().await.unwrap();
        assert_eq!(reader.read_block().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_file_fails_at_open() {
        let dir: TempDir = TempDir::new().unwrap();
        let mut reader: BlockReader = BlockReader::new(64);
        reader.enqueue_next(&dir.path().join("nope.bin"));
        assert!(matches!(
            reader.open_next().await,
            Err(TransferError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn test_open_without_hint_fails() {
        let mut reader: BlockReader = BlockReader::new(64);
        assert!(matches!(
            reader.open_next().await,
            Err(TransferError::Sequence(_))
        ));
    }

    #[tokio::test]
    async fn test_reopen_restarts_from_beginning() {
        let dir: TempDir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..200).map(|i| i as u8).collect();
        let path: PathBuf = write_file(&dir, "a.bin", &data);

        let mut reader: BlockReader = BlockReader::new(64);
        reader.enqueue_next(&path);
        reader.open_next().await.unwrap();
        reader.read_block().await.unwrap();

        // Retry path: re-open the same file mid-stream.
        reader.enqueue_next(&path);
        reader.open_next().await.unwrap();
        assert_eq!(read_whole(&mut reader).await, data);
    }

    #[tokio::test]
    async fn test_stale_preopen_discarded() {
        let dir: TempDir = TempDir::new().unwrap();
        let first: Vec<u8> = vec![1u8; 10];
        let second: Vec<u8> = vec![2u8; 10];
        let third: Vec<u8> = vec![3u8; 10];
        let path_a: PathBuf = write_file(&dir, "a.bin", &first);
        let path_b: PathBuf = write_file(&dir, "b.bin", &second);
        let path_c: PathBuf = write_file(&dir, "c.bin", &third);

        let mut reader: BlockReader = BlockReader::new(64);
        reader.enqueue_next(&path_a);
        reader.open_next().await.unwrap();
        reader.enqueue_next(&path_b);
        assert_eq!(read_whole(&mut reader).await, first);

        // The queue changed after the pre-open was scheduled.
        reader.enqueue_next(&path_c);
        reader.open_next().await.unwrap();
        assert_eq!(read_whole(&mut reader).await, third);
    }
}
