//! Streaming encrypted archive container.
//!
//! Produces a password-protected zip with exactly one entry, written
//! incrementally to any `io::Write` sink so the downstream consumer can
//! take the output chunk by chunk without ever holding the whole archive:
//!
//! - store mode (no compression)
//! - AES-256 encryption (AE-2 scheme: PBKDF2 key derivation, CTR mode,
//!   HMAC-SHA1 authentication)
//! - Zip64 extensions, so entries may exceed 4 GB
//! - UTF-8 entry names
//!
//! The 16-byte salt is a constructor input rather than an internal
//! source: re-running the writer with the same password, salt, entry
//! name, timestamp, and plaintext reproduces the container byte for
//! byte, which is what makes resumable uploads of encrypted streams
//! possible.

mod crypto;
mod error;
mod salt;
mod writer;

pub use crypto::{EntryCipher, AUTH_CODE_LEN, SALT_LEN, VERIFIER_LEN};
pub use error::ArchiveError;
pub use salt::OneShotSalt;
pub use writer::ContainerWriter;
