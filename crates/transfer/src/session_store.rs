//! On-disk persistence of in-progress upload sessions.
//!
//! At most one record exists per local-directory scope. The file lives
//! in the per-user application-data directory under a name derived from
//! the scope path, so concurrent processes syncing different directories
//! never collide:
//!
//! ```text
//! <app-data>/DropboxEncryptedUploader/session-<hex32>.json
//! ```
//!
//! where `hex32` is the first 32 hex characters of the SHA-256 of the
//! lowercased scope path.
//!
//! Persistence is strictly best-effort: a store that cannot load, save,
//! or delete logs a warning and carries on. The upload still works, it
//! just cannot resume across a crash.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use dropvault_archive::SALT_LEN;

/// Directory under the user's application data holding session records.
pub const SESSION_DIR_NAME: &str = "DropboxEncryptedUploader";

const SESSION_FILE_PREFIX: &str = "session-";

/// Records older than this are swept at startup; it sits conservatively
/// below the server-side session lifetime.
const RETENTION: Duration = Duration::from_secs(5 * 24 * 60 * 60);

/// The resume token for one interrupted upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Server-side upload session id.
    pub session_id: String,
    /// Absolute local path of the file being uploaded.
    pub file_path: PathBuf,
    /// Modification timestamp of that file at session start.
    pub client_modified: DateTime<Utc>,
    /// Byte length of that file at session start.
    pub total_size: u64,
    /// Stream bytes consumed through the last successfully uploaded
    /// chunk.
    pub current_offset: u64,
    /// Hex-encoded 16-byte archive salt; absent for direct uploads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_salt: Option<String>,
    /// Hex chain hash over the stream prefix covered by
    /// `current_offset`.
    pub content_hash: String,
}

impl SessionRecord {
    /// Decode the salt field; `None` when absent or malformed.
    pub fn encryption_salt_bytes(&self) -> Option<[u8; SALT_LEN]> {
        let raw: Vec<u8> = hex::decode(self.encryption_salt.as_ref()?).ok()?;
        raw.try_into().ok()
    }

    /// A present-but-undecodable salt means the record cannot drive a
    /// byte-identical re-encryption.
    pub fn salt_field_usable(&self) -> bool {
        self.encryption_salt.is_none() || self.encryption_salt_bytes().is_some()
    }
}

/// Single-slot session record store for one local-directory scope.
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Store for a scope under the default per-user application-data
    /// directory.
    pub fn for_scope(local_dir: &Path) -> Self {
        Self::with_base_dir(&default_base_dir(), local_dir)
    }

    /// Store under an explicit base directory (tests, unusual setups).
    pub fn with_base_dir(base_dir: &Path, local_dir: &Path) -> Self {
        let path: PathBuf = base_dir
            .join(SESSION_DIR_NAME)
            .join(scope_file_name(local_dir));
        Self { path }
    }

    /// The record file path for this scope.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored record, if any. Unreadable or corrupt storage is
    /// reported and treated as absent.
    pub async fn load(&self) -> Option<SessionRecord> {
        let bytes: Vec<u8> = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read session record");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt session record ignored");
                None
            }
        }
    }

    /// Atomically replace the stored record. Failures are logged, never
    /// propagated.
    pub async fn save(&self, record: &SessionRecord) {
        if let Err(e) = self.try_save(record).await {
            warn!(path = %self.path.display(), error = %e, "failed to persist session record");
        }
    }

    async fn try_save(&self, record: &SessionRecord) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json: Vec<u8> = serde_json::to_vec_pretty(record)?;
        // Write-then-rename keeps concurrent readers from seeing a torn
        // record.
        let tmp: PathBuf = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), offset = record.current_offset, "session record saved");
        Ok(())
    }

    /// Remove the stored record. Idempotent.
    pub async fn delete(&self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "session record deleted"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to delete session record");
            }
        }
    }

    /// Drop records old enough that their server-side session has
    /// certainly expired.
    pub async fn sweep_expired(&self) {
        self.sweep_older_than(RETENTION).await;
    }

    async fn sweep_older_than(&self, max_age: Duration) {
        let Some(dir) = self.path.parent() else {
            return;
        };
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(_) => return, // nothing stored yet
        };
        let now: SystemTime = SystemTime::now();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name: String = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(SESSION_FILE_PREFIX) || !name.ends_with(".json") {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            let age: Duration = now.duration_since(modified).unwrap_or_default();
            if age > max_age {
                info!(file = %name, age_days = age.as_secs() / 86_400, "sweeping stale session record");
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
    }
}

/// File name for a scope: hash the lowercased path so distinct
/// directories get distinct slots and path casing does not.
fn scope_file_name(local_dir: &Path) -> String {
    let scope: String = local_dir.to_string_lossy().to_lowercase();
    let digest: String = hex::encode(Sha256::digest(scope.as_bytes()));
    format!("{}{}.json", SESSION_FILE_PREFIX, &digest[..32])
}

fn default_base_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("LOCALAPPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\ProgramData"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
    }
}
