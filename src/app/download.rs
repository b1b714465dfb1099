//! Single-file transfer with atomic writes
//!
//! A file is streamed into `<local>.tmp` and renamed into place once the
//! transfer completes, so the local store never holds a partial file under
//! its final name. The temporary file is owned by a [`PartialFileGuard`]
//! which deletes it when the transfer errors, panics or is cancelled by
//! dropping the future. The guard first raises the transfer's
//! [`CancelFlag`] so blocking copies still running stop and clean up after
//! themselves.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::pairs::PathPair;
use crate::app::remote::{CancelFlag, FetchStatus, GlobMatch, RemoteBackend};
use crate::app::validate::is_local_file_valid_async;
use crate::constants::files;
use crate::errors::{DownloadError, DownloadResult, RemoteError};

/// What happened to one path pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TransferOutcome {
    /// Fetched from the remote in this call
    #[serde(rename = "downloaded")]
    Downloaded,
    /// Already valid locally, no network access
    #[serde(rename = "local_exists")]
    LocalExists,
    /// No remote file matched
    #[serde(rename = "remote_not_exist")]
    RemoteMissing,
}

impl TransferOutcome {
    pub const ALL: [TransferOutcome; 3] = [
        TransferOutcome::Downloaded,
        TransferOutcome::LocalExists,
        TransferOutcome::RemoteMissing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferOutcome::Downloaded => "downloaded",
            TransferOutcome::LocalExists => "local_exists",
            TransferOutcome::RemoteMissing => "remote_not_exist",
        }
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deletes a temporary file on drop unless disarmed
#[derive(Debug)]
pub struct PartialFileGuard {
    path: PathBuf,
    cancel: CancelFlag,
    armed: bool,
}

impl PartialFileGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cancel: CancelFlag::new(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flag raised when the guard drops while armed
    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Keep the file; call once it has been renamed into place
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFileGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.cancel.cancel();
        match std::fs::remove_file(&self.path) {
            Ok(()) => warn!("Removed partial file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Could not remove partial file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Temporary path a transfer to `local` is written to
pub fn temp_path_for(local: &Path) -> PathBuf {
    let mut name: OsString = local.file_name().map(OsString::from).unwrap_or_default();
    name.push(files::TEMP_FILE_SUFFIX);
    local.with_file_name(name)
}

/// Create the parent directories of `path`
pub async fn create_parent_dirs(path: &Path) -> DownloadResult<()> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(files::DIR_PERMISSIONS);
    builder
        .create(parent)
        .await
        .map_err(|source| DownloadError::Io {
            path: parent.to_path_buf(),
            source,
        })
}

/// Bring one pair into the local store
///
/// A locally valid file is kept without touching the network. Otherwise the
/// remote glob is resolved; a missing remote is reported, not raised.
///
/// # Errors
///
/// Returns `DownloadError` if:
/// - The remote pattern matches several files
/// - The connection fails or the server refuses the transfer
/// - The local directory or file cannot be written
pub async fn download_file(
    backend: &mut dyn RemoteBackend,
    pair: &PathPair,
) -> DownloadResult<TransferOutcome> {
    let local = pair.local.as_path();
    if is_local_file_valid_async(local.to_path_buf()).await {
        debug!("File exists locally: {}", local.display());
        return Ok(TransferOutcome::LocalExists);
    }

    let transfer_error = |source: RemoteError| DownloadError::Transfer {
        remote: pair.remote.clone(),
        local: local.to_path_buf(),
        source,
    };

    let remote = match backend.resolve_glob(&pair.remote).await.map_err(transfer_error)? {
        GlobMatch::Found(remote) => remote,
        GlobMatch::NotFound => {
            debug!("Remote file does not exist: {}", pair.remote);
            return Ok(TransferOutcome::RemoteMissing);
        }
    };

    create_parent_dirs(local).await?;
    let mut guard = PartialFileGuard::new(temp_path_for(local));

    let bytes = match backend
        .fetch(&remote, guard.path(), guard.cancel_flag())
        .await
        .map_err(transfer_error)?
    {
        FetchStatus::Fetched { bytes } => bytes,
        FetchStatus::NotFound => {
            debug!("Remote file does not exist: {}", remote);
            return Ok(TransferOutcome::RemoteMissing);
        }
    };

    tokio::fs::rename(guard.path(), local)
        .await
        .map_err(|_| DownloadError::AtomicOperationFailed {
            temp_path: guard.path().to_path_buf(),
            final_path: local.to_path_buf(),
        })?;
    guard.disarm();

    info!("Downloaded {} ({} bytes)", local.display(), bytes);
    Ok(TransferOutcome::Downloaded)
}
