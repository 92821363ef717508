//! Fixed-capacity chunk arena.

use std::io;

/// Collects producer output until it holds a full upload chunk.
///
/// The arena's target is `chunk_size` bytes; its allocation carries
/// headroom above that because the encryption container's framing makes
/// the ciphertext stream slightly longer than the source, and a write
/// that crosses the chunk boundary completes into the arena before the
/// chunk is handed off. The emission rule lives with the caller: once
/// [`ChunkAccumulator::is_full`] reports true, take the current fill as
/// one chunk via [`ChunkAccumulator::chunk`] and [`ChunkAccumulator::clear`]
/// before writing more.
#[derive(Debug)]
pub struct ChunkAccumulator {
    buf: Vec<u8>,
    chunk_size: usize,
}

impl ChunkAccumulator {
    /// # Arguments
    /// * `chunk_size` - Fill level at which a chunk should be emitted
    /// * `capacity` - Arena allocation, `chunk_size` plus headroom
    pub fn new(chunk_size: usize, capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity.max(chunk_size)),
            chunk_size,
        }
    }

    /// Whether the next write would exceed the chunk target, i.e. the
    /// current fill should be emitted first.
    pub fn is_full(&self) -> bool {
        self.buf.len() >= self.chunk_size
    }

    /// Current fill in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// View of the accumulated chunk. Stable until the next write or
    /// [`ChunkAccumulator::clear`].
    pub fn chunk(&self) -> &[u8] {
        &self.buf
    }

    /// Reclaim the arena after the chunk was consumed. Keeps the
    /// allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Producers write into the arena through `io::Write`; appends cannot
/// fail.
impl io::Write for ChunkAccumulator {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
