//! Streaming upload pipeline.
//!
//! Moves arbitrarily large files into the cloud service through a bounded
//! in-memory pipeline that survives interruption:
//!
//! ```text
//! jobs ─► BlockReader ─► [EncryptStage] ─► ChunkAccumulator ─► UploadDriver ─► cloud
//!                                                                   │
//!                                                                   ▼
//!                                                           SessionStore (disk)
//! ```
//!
//! - [`BlockReader`] - double-buffered async file reader that overlaps
//!   disk reads with upload and pre-opens the next queued file
//! - [`EncryptStage`] / [`UploadStage`] - optional streaming wrap into an
//!   encrypted archive container
//! - [`ChunkAccumulator`] - fixed-capacity arena collecting producer
//!   output into upload-sized chunks
//! - [`UploadDriver`] - the chunked upload session state machine with
//!   retry, content hashing, and crash-resumable sessions
//! - [`SessionStore`] - atomic single-slot resume record on disk
//! - [`upload_all`] - the per-directory runner tying the stages together

mod accumulator;
mod driver;
mod encrypt;
mod error;
mod reader;
mod runner;
mod session_store;
mod types;

pub use accumulator::ChunkAccumulator;
pub use driver::{DriverPhase, UploadDriver};
pub use encrypt::{EncryptStage, UploadStage};
pub use error::TransferError;
pub use reader::BlockReader;
pub use runner::{upload_all, UploadOptions};
pub use session_store::{SessionRecord, SessionStore, SESSION_DIR_NAME};
pub use types::FileJob;
