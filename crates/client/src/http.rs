//! Production `CloudClient` over the Dropbox v2 HTTP API.
//!
//! Two endpoint families are involved:
//!
//! - RPC endpoints (`api.dropboxapi.com`): JSON request body, JSON response.
//! - Content endpoints (`content.dropboxapi.com`): arguments in the
//!   `Dropbox-API-Arg` header, payload as the octet-stream body.
//!
//! All calls carry a per-request deadline; the batch-delete poll gets a
//! longer one. Transport failures are folded into the `CloudError`
//! taxonomy so the retry layer can classify them.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::CloudError;
use crate::traits::CloudClient;
use crate::types::{
    BatchJobStatus, BatchLaunch, CommitInfo, DeletedMetadata, FileMetadata, FolderMetadata,
    ListFolderPage, Metadata, Revision, RevisionMode,
};

const API_BASE: &str = "https://api.dropboxapi.com/2";
const CONTENT_BASE: &str = "https://content.dropboxapi.com/2";

/// Deadline for ordinary RPC and upload calls.
const CALL_TIMEOUT: Duration = Duration::from_secs(300);
/// Deadline for batch-job polling, which the server may hold longer.
const POLL_TIMEOUT: Duration = Duration::from_secs(600);

/// Dropbox HTTP client.
pub struct DropboxClient {
    http: reqwest::Client,
    token: String,
}

impl DropboxClient {
    /// Create a client around a bearer token.
    pub fn new(token: impl Into<String>) -> Result<Self, CloudError> {
        let http: reqwest::Client = reqwest::Client::builder()
            .build()
            .map_err(|e| CloudError::Connect(e.to_string()))?;
        Ok(Self {
            http,
            token: token.into(),
        })
    }

    /// POST to an RPC endpoint with a JSON body.
    async fn rpc(&self, endpoint: &str, args: Value, timeout: Duration) -> Result<Value, CloudError> {
        let url: String = format!("{API_BASE}/{endpoint}");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .timeout(timeout)
            .json(&args)
            .send()
            .await
            .map_err(map_transport)?;

        let status: u16 = response.status().as_u16();
        let body: String = response.text().await.map_err(map_transport)?;
        if (200..300).contains(&status) {
            parse_body(&body)
        } else {
            Err(api_error(status, &body))
        }
    }

    /// POST to a content endpoint: args in the `Dropbox-API-Arg` header,
    /// payload as the body. The payload slice is stable across retries;
    /// each call builds a fresh body from it.
    async fn content(&self, endpoint: &str, args: Value, data: &[u8]) -> Result<Value, CloudError> {
        let url: String = format!("{CONTENT_BASE}/{endpoint}");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .timeout(CALL_TIMEOUT)
            .header("Dropbox-API-Arg", args.to_string())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data.to_vec())
            .send()
            .await
            .map_err(map_transport)?;

        let status: u16 = response.status().as_u16();
        let body: String = response.text().await.map_err(map_transport)?;
        if (200..300).contains(&status) {
            parse_body(&body)
        } else {
            Err(api_error(status, &body))
        }
    }
}

#[async_trait]
impl CloudClient for DropboxClient {
    async fn session_start(
        &self,
        data: &[u8],
        content_hash: Option<&str>,
    ) -> Result<String, CloudError> {
        let mut args: Value = json!({ "close": false });
        if let Some(hash) = content_hash {
            args["content_hash"] = Value::String(hash.to_string());
        }
        let value: Value = self.content("files/upload_session/start", args, data).await?;
        let started: SessionStartResult =
            serde_json::from_value(value).map_err(|e| CloudError::Protocol(e.to_string()))?;
        Ok(started.session_id)
    }

    async fn session_append(
        &self,
        session_id: &str,
        offset: u64,
        data: &[u8],
        content_hash: Option<&str>,
    ) -> Result<(), CloudError> {
        let mut args: Value = json!({
            "cursor": { "session_id": session_id, "offset": offset },
            "close": false,
        });
        if let Some(hash) = content_hash {
            args["content_hash"] = Value::String(hash.to_string());
        }
        self.content("files/upload_session/append_v2", args, data)
            .await?;
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
        let mut args: Value = json!({
            "cursor": { "session_id": session_id, "offset": offset },
            "commit": commit_args(commit),
        });
        if let Some(hash) = content_hash {
            args["content_hash"] = Value::String(hash.to_string());
        }
        let value: Value = self
            .content("files/upload_session/finish", args, data)
            .await?;
        parse_file_metadata(value)
    }

    async fn simple_upload(
        &self,
        commit: &CommitInfo,
        data: &[u8],
        content_hash: Option<&str>,
    ) -> Result<FileMetadata, CloudError> {
        let mut args: Value = commit_args(commit);
        if let Some(hash) = content_hash {
            args["content_hash"] = Value::String(hash.to_string());
        }
        let value: Value = self.content("files/upload", args, data).await?;
        parse_file_metadata(value)
    }

    async fn list_folder(
        &self,
        path: &str,
        recursive: bool,
        limit: Option<u32>,
        include_deleted: bool,
    ) -> Result<ListFolderPage, CloudError> {
        let mut args: Value = json!({
            "path": path,
            "recursive": recursive,
            "include_deleted": include_deleted,
        });
        if let Some(n) = limit {
            args["limit"] = Value::from(n);
        }
        let value: Value = self.rpc("files/list_folder", args, CALL_TIMEOUT).await?;
        parse_list_page(value)
    }

    async fn list_folder_continue(&self, cursor: &str) -> Result<ListFolderPage, CloudError> {
        let value: Value = self
            .rpc(
                "files/list_folder/continue",
                json!({ "cursor": cursor }),
                CALL_TIMEOUT,
            )
            .await?;
        parse_list_page(value)
    }

    async fn create_folder(&self, path: &str) -> Result<(), CloudError> {
        let result: Result<Value, CloudError> = self
            .rpc(
                "files/create_folder_v2",
                json!({ "path": path, "autorename": false }),
                CALL_TIMEOUT,
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            // Folder already present counts as success.
            Err(CloudError::Api { status: 409, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete_batch(&self, paths: &[String]) -> Result<BatchLaunch, CloudError> {
        let entries: Vec<Value> = paths.iter().map(|p| json!({ "path": p })).collect();
        let value: Value = self
            .rpc(
                "files/delete_batch",
                json!({ "entries": entries }),
                CALL_TIMEOUT,
            )
            .await?;
        match value[".tag"].as_str() {
            Some("async_job_id") => match value["async_job_id"].as_str() {
                Some(id) => Ok(BatchLaunch::JobId(id.to_string())),
                None => Err(CloudError::Protocol("missing async_job_id".into())),
            },
            Some("complete") => Ok(BatchLaunch::Complete),
            other => Err(CloudError::Protocol(format!(
                "unexpected delete_batch tag: {other:?}"
            ))),
        }
    }

    async fn delete_batch_check(&self, job_id: &str) -> Result<BatchJobStatus, CloudError> {
        let value: Value = self
            .rpc(
                "files/delete_batch/check",
                json!({ "async_job_id": job_id }),
                POLL_TIMEOUT,
            )
            .await?;
        match value[".tag"].as_str() {
            Some("in_progress") => Ok(BatchJobStatus::InProgress),
            Some("complete") => Ok(BatchJobStatus::Complete),
            Some("failed") => Ok(BatchJobStatus::Failed(value["failed"].to_string())),
            other => Err(CloudError::Protocol(format!(
                "unexpected delete_batch/check tag: {other:?}"
            ))),
        }
    }

    async fn list_revisions(
        &self,
        path: &str,
        mode: RevisionMode,
        limit: u32,
    ) -> Result<Vec<Revision>, CloudError> {
        let value: Value = self
            .rpc(
                "files/list_revisions",
                json!({ "path": path, "mode": mode.as_str(), "limit": limit }),
                CALL_TIMEOUT,
            )
            .await?;
        let raw: RawRevisionsResult =
            serde_json::from_value(value).map_err(|e| CloudError::Protocol(e.to_string()))?;
        raw.entries.into_iter().map(Revision::try_from).collect()
    }

    async fn restore(&self, path: &str, rev: &str) -> Result<FileMetadata, CloudError> {
        let value: Value = self
            .rpc(
                "files/restore",
                json!({ "path": path, "rev": rev }),
                CALL_TIMEOUT,
            )
            .await?;
        parse_file_metadata(value)
    }
}

// ============================================================================
// Wire helpers
// ============================================================================

/// Fold a transport failure into the retry taxonomy.
fn map_transport(err: reqwest::Error) -> CloudError {
    if err.is_timeout() {
        CloudError::Timeout
    } else if err.is_decode() {
        CloudError::Protocol(err.to_string())
    } else {
        // Connection resets, refused connections, and name-resolution
        // failures all land here.
        CloudError::Connect(err.to_string())
    }
}

/// Interpret a non-success status. Session-lookup failures get their own
/// variant so the driver can tear down its resume state.
fn api_error(status: u16, body: &str) -> CloudError {
    if status == 409 && body.contains("not_found") && body.contains("lookup_failed") {
        return CloudError::SessionNotFound;
    }
    CloudError::Api {
        status,
        message: summary_of(body),
    }
}

/// Extract the error summary from an API error body, falling back to the
/// raw (truncated) body.
fn summary_of(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(summary) = value["error_summary"].as_str() {
            return summary.to_string();
        }
    }
    body.chars().take(200).collect()
}

/// Parse a response body, treating an empty body as JSON null (append
/// returns nothing).
fn parse_body(body: &str) -> Result<Value, CloudError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| CloudError::Protocol(e.to_string()))
}

/// Commit arguments shared by finish and simple upload.
fn commit_args(commit: &CommitInfo) -> Value {
    json!({
        "path": commit.path,
        "mode": commit.mode.as_str(),
        "autorename": commit.autorename,
        "client_modified": format_api_timestamp(&commit.client_modified),
        "mute": true,
    })
}

/// The API accepts timestamps at whole-second precision only.
fn format_api_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn parse_api_timestamp(raw: &str) -> Result<DateTime<Utc>, CloudError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CloudError::Protocol(format!("bad timestamp {raw:?}: {e}")))
}

// ============================================================================
// Wire structs
// ============================================================================

#[derive(Deserialize)]
struct SessionStartResult {
    session_id: String,
}

#[derive(Deserialize)]
struct RawListPage {
    entries: Vec<RawEntry>,
    cursor: String,
    has_more: bool,
}

#[derive(Deserialize)]
#[serde(tag = ".tag", rename_all = "lowercase")]
enum RawEntry {
    File(RawFile),
    Folder(RawFolder),
    Deleted(RawDeleted),
}

#[derive(Deserialize)]
struct RawFile {
    name: String,
    #[serde(default)]
    path_lower: Option<String>,
    #[serde(default)]
    path_display: Option<String>,
    client_modified: String,
    #[serde(default)]
    server_modified: Option<String>,
    size: u64,
    #[serde(default)]
    rev: Option<String>,
}

#[derive(Deserialize)]
struct RawFolder {
    name: String,
    #[serde(default)]
    path_lower: Option<String>,
    #[serde(default)]
    path_display: Option<String>,
}

#[derive(Deserialize)]
struct RawDeleted {
    name: String,
    #[serde(default)]
    path_lower: Option<String>,
    #[serde(default)]
    path_display: Option<String>,
    #[serde(default)]
    server_deleted: Option<String>,
}

#[derive(Deserialize)]
struct RawRevisionsResult {
    entries: Vec<RawRevision>,
}

#[derive(Deserialize)]
struct RawRevision {
    rev: String,
    client_modified: String,
    server_modified: String,
    size: u64,
}

impl TryFrom<RawRevision> for Revision {
    type Error = CloudError;

    fn try_from(raw: RawRevision) -> Result<Self, CloudError> {
        Ok(Revision {
            rev: raw.rev,
            client_modified: parse_api_timestamp(&raw.client_modified)?,
            server_modified: parse_api_timestamp(&raw.server_modified)?,
            size: raw.size,
        })
    }
}

fn parse_list_page(value: Value) -> Result<ListFolderPage, CloudError> {
    let raw: RawListPage =
        serde_json::from_value(value).map_err(|e| CloudError::Protocol(e.to_string()))?;
    let mut entries: Vec<Metadata> = Vec::with_capacity(raw.entries.len());
    for entry in raw.entries {
        entries.push(convert_entry(entry)?);
    }
    Ok(ListFolderPage {
        entries,
        cursor: raw.cursor,
        has_more: raw.has_more,
    })
}

fn convert_entry(raw: RawEntry) -> Result<Metadata, CloudError> {
    Ok(match raw {
        RawEntry::File(f) => Metadata::File(FileMetadata {
            path_lower: f.path_lower.unwrap_or_else(|| f.name.to_lowercase()),
            path_display: f.path_display.unwrap_or_else(|| f.name.clone()),
            client_modified: parse_api_timestamp(&f.client_modified)?,
            server_modified: match f.server_modified {
                Some(raw_ts) => Some(parse_api_timestamp(&raw_ts)?),
                None => None,
            },
            size: f.size,
            rev: f.rev.unwrap_or_default(),
            name: f.name,
        }),
        RawEntry::Folder(f) => Metadata::Folder(FolderMetadata {
            path_lower: f.path_lower.unwrap_or_else(|| f.name.to_lowercase()),
            path_display: f.path_display.unwrap_or_else(|| f.name.clone()),
            name: f.name,
        }),
        RawEntry::Deleted(d) => Metadata::Deleted(DeletedMetadata {
            path_lower: d.path_lower.unwrap_or_else(|| d.name.to_lowercase()),
            path_display: d.path_display.unwrap_or_else(|| d.name.clone()),
            server_deleted: match d.server_deleted {
                Some(raw_ts) => Some(parse_api_timestamp(&raw_ts)?),
                None => None,
            },
            name: d.name,
        }),
    })
}

fn parse_file_metadata(value: Value) -> Result<FileMetadata, CloudError> {
    let raw: RawFile =
        serde_json::from_value(value).map_err(|e| CloudError::Protocol(e.to_string()))?;
    Ok(FileMetadata {
        path_lower: raw.path_lower.unwrap_or_else(|| raw.name.to_lowercase()),
        path_display: raw.path_display.unwrap_or_else(|| raw.name.clone()),
        client_modified: parse_api_timestamp(&raw.client_modified)?,
        server_modified: match raw.server_modified {
            Some(raw_ts) => Some(parse_api_timestamp(&raw_ts)?),
            None => None,
        },
        size: raw.size,
        rev: raw.rev.unwrap_or_default(),
        name: raw.name,
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_api_timestamp_round_trip() {
        let ts: DateTime<Utc> = Utc.with_ymd_and_hms(2024, 7, 15, 9, 30, 2).unwrap();
        let formatted: String = format_api_timestamp(&ts);
        assert_eq!(formatted, "2024-07-15T09:30:02Z");
        assert_eq!(parse_api_timestamp(&formatted).unwrap(), ts);
    }

    #[test]
    fn test_api_timestamp_truncates_subseconds() {
        let ts: DateTime<Utc> = Utc
            .with_ymd_and_hms(2024, 7, 15, 9, 30, 2)
            .unwrap()
            .checked_add_signed(chrono::Duration::milliseconds(750))
            .unwrap();
        assert_eq!(format_api_timestamp(&ts), "2024-07-15T09:30:02Z");
    }

    #[test]
    fn test_session_lookup_failure_maps_to_session_not_found() {
        let body: &str = r#"{"error_summary": "lookup_failed/not_found/..", "error": {".tag": "lookup_failed", "lookup_failed": {".tag": "not_found"}}}"#;
        assert!(matches!(api_error(409, body), CloudError::SessionNotFound));
    }

    #[test]
    fn test_other_conflict_stays_api_error() {
        let body: &str = r#"{"error_summary": "path/conflict/folder/.."}"#;
        match api_error(409, body) {
            CloudError::Api { status, message } => {
                assert_eq!(status, 409);
                assert_eq!(message, "path/conflict/folder/..");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_body_empty_is_null() {
        assert_eq!(parse_body("").unwrap(), Value::Null);
        assert_eq!(parse_body("  \n").unwrap(), Value::Null);
    }

    #[test]
    fn test_parse_list_page_entries() {
        let value: Value = serde_json::json!({
            "entries": [
                {
                    ".tag": "file",
                    "name": "a.txt",
                    "path_lower": "/backup/a.txt",
                    "path_display": "/Backup/a.txt",
                    "client_modified": "2024-01-02T03:04:05Z",
                    "server_modified": "2024-01-02T03:04:06Z",
                    "size": 12,
                    "rev": "015f"
                },
                { ".tag": "folder", "name": "Sub", "path_lower": "/backup/sub", "path_display": "/Backup/Sub" },
                {
                    ".tag": "deleted",
                    "name": "old.bin",
                    "path_lower": "/backup/old.bin",
                    "path_display": "/Backup/old.bin",
                    "server_deleted": "2024-01-01T00:00:00Z"
                }
            ],
            "cursor": "AAA",
            "has_more": false
        });
        let page: ListFolderPage = parse_list_page(value).unwrap();
        assert_eq!(page.entries.len(), 3);
        assert!(!page.has_more);
        match &page.entries[0] {
            Metadata::File(f) => {
                assert_eq!(f.size, 12);
                assert_eq!(f.path_lower, "/backup/a.txt");
            }
            other => panic!("expected file, got {other:?}"),
        }
        match &page.entries[2] {
            Metadata::Deleted(d) => assert!(d.server_deleted.is_some()),
            other => panic!("expected deleted entry, got {other:?}"),
        }
    }

    #[test]
    fn test_commit_args_shape() {
        let ts: DateTime<Utc> = Utc.with_ymd_and_hms(2024, 7, 15, 9, 30, 2).unwrap();
        let commit: CommitInfo = CommitInfo::overwrite("/backup/a.txt", ts);
        let args: Value = commit_args(&commit);
        assert_eq!(args["path"], "/backup/a.txt");
        assert_eq!(args["mode"], "overwrite");
        assert_eq!(args["autorename"], false);
        assert_eq!(args["client_modified"], "2024-07-15T09:30:02Z");
    }
}
