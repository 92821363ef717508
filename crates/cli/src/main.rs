//! dropvault - mirror a local directory into Dropbox, optionally through
//! password-protected encrypted archives, with crash-resumable uploads.

use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dropvault_client::{CloudClient, DropboxClient};
use dropvault_planner::{build_plan, delete_paths, recycle_deleted, SyncPlan};
use dropvault_transfer::{upload_all, SessionStore, UploadOptions};

/// Mirror a local directory to a Dropbox folder.
#[derive(Debug, Parser)]
#[command(name = "dropvault", version, about)]
struct Args {
    /// Dropbox API access token.
    token: String,
    /// Local directory to mirror.
    local_path: PathBuf,
    /// Destination Dropbox folder, forward slashes (e.g. /backup/photos).
    remote_path: String,
    /// Archive password. When present, every file is uploaded as a
    /// password-protected encrypted zip with a `.zip` suffix; when empty
    /// or absent, files are uploaded as-is.
    password: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    run(Args::parse()).await
}

async fn run(args: Args) -> anyhow::Result<()> {
    if args.token.trim().is_empty() {
        bail!("access token must not be empty");
    }
    if !args.local_path.is_dir() {
        bail!(
            "local path is not a directory: {}",
            args.local_path.display()
        );
    }
    let local_root: PathBuf = args
        .local_path
        .canonicalize()
        .with_context(|| format!("cannot resolve {}", args.local_path.display()))?;
    let remote_root: String = normalize_remote_path(&args.remote_path)?;
    let password: Option<String> = args.password.filter(|p| !p.is_empty());
    let archive_suffix: &str = if password.is_some() { ".zip" } else { "" };

    let client: DropboxClient = DropboxClient::new(args.token)?;

    // Also serves as an early token check: any auth problem surfaces
    // here instead of mid-upload.
    if !remote_root.is_empty() {
        client.create_folder(&remote_root).await?;
    }

    let plan: SyncPlan = build_plan(&client, &local_root, &remote_root, archive_suffix).await?;
    info!(
        uploads = plan.jobs.len(),
        deletions = plan.deletions.len(),
        folders = plan.missing_folders.len(),
        "sync plan ready"
    );

    for folder in &plan.missing_folders {
        client.create_folder(folder).await?;
    }

    let store: SessionStore = SessionStore::for_scope(&local_root);
    let options: UploadOptions = UploadOptions {
        password,
        ..UploadOptions::default()
    };
    upload_all(&client, &store, &options, plan.jobs.clone()).await?;

    delete_paths(&client, &plan.deletions).await?;
    recycle_deleted(&client, &plan, &remote_root, Utc::now()).await?;

    info!("sync complete");
    Ok(())
}

/// Normalize the destination folder to `/a/b` form; `""` is the root.
fn normalize_remote_path(raw: &str) -> anyhow::Result<String> {
    let cleaned: String = raw.replace('\\', "/");
    let trimmed: &str = cleaned.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    if trimmed.split('/').any(str::is_empty) {
        bail!("remote path contains empty segments: {raw}");
    }
    Ok(format!("/{trimmed}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_remote_path() {
        assert_eq!(normalize_remote_path("/backup/").unwrap(), "/backup");
        assert_eq!(normalize_remote_path("backup/photos").unwrap(), "/backup/photos");
        assert_eq!(normalize_remote_path("\\backup\\photos").unwrap(), "/backup/photos");
        assert_eq!(normalize_remote_path("/").unwrap(), "");
        assert_eq!(normalize_remote_path("").unwrap(), "");
        assert!(normalize_remote_path("/backup//photos").is_err());
    }

    #[test]
    fn test_args_parse_positional() {
        let args: Args = Args::parse_from([
            "dropvault",
            "token123",
            "/data",
            "/backup",
            "hunter2",
        ]);
        assert_eq!(args.token, "token123");
        assert_eq!(args.local_path, PathBuf::from("/data"));
        assert_eq!(args.remote_path, "/backup");
        assert_eq!(args.password.as_deref(), Some("hunter2"));

        let args: Args = Args::parse_from(["dropvault", "token123", "/data", "/backup"]);
        assert!(args.password.is_none());
    }
}
