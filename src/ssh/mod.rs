// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;

use crate::config::ClusterTarget;
use crate::errors::{Error, Result};

mod session;

pub use session::SshSession;

/// Captured output of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecCapture {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// One established connection to the cluster's login node. A session is
/// owned by a single job submission and must be closed by its owner;
/// `close` is idempotent, every operation after it fails.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a command and wait for it to exit, capturing both streams.
    async fn exec_capture(&self, command: &str) -> Result<ExecCapture>;

    /// Copy a local file to `remote`. The local path is checked before any
    /// network traffic so a typo never leaves a half-prepared workspace.
    async fn upload_file(&self, local: &Path, remote: &str) -> Result<()>;

    /// Create (or overwrite) `remote` with in-memory contents, for files
    /// that never exist locally such as generated submission scripts.
    async fn write_file(&self, remote: &str, contents: &[u8]) -> Result<()>;

    /// Copy a remote file to `local`, creating parent directories.
    async fn download_file(&self, remote: &str, local: &Path) -> Result<()>;

    /// File names directly under `remote`, sorted, directories excluded.
    async fn list_directory(&self, remote: &str) -> Result<Vec<String>>;

    /// `mkdir -p` semantics over SFTP.
    async fn make_dir_all(&self, remote: &str) -> Result<()>;

    /// Tear the connection down. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Seam for tests: the orchestrator asks a factory for sessions instead of
/// dialing TCP itself.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self, target: &ClusterTarget) -> Result<Box<dyn RemoteSession>>;
}

/// Production factory: one real SSH connection per call.
pub struct SshSessionFactory;

#[async_trait]
impl SessionFactory for SshSessionFactory {
    async fn connect(&self, target: &ClusterTarget) -> Result<Box<dyn RemoteSession>> {
        let session = SshSession::open(target).await?;
        Ok(Box::new(session))
    }
}

fn is_sftp_missing_path(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        let Some(sftp_error) = cause.downcast_ref::<russh_sftp::client::error::Error>() else {
            return false;
        };
        matches!(
            sftp_error,
            russh_sftp::client::error::Error::Status(status)
                if status.status_code == russh_sftp::protocol::StatusCode::NoSuchFile
        )
    })
}

/// Collapse an SFTP failure into the engine's taxonomy: a missing remote
/// path is its own variant, everything else stays a transfer error with the
/// original cause attached.
pub(crate) fn map_sftp_error(remote: &str, err: anyhow::Error) -> Error {
    if is_sftp_missing_path(&err) {
        Error::RemoteFileNotFound {
            path: remote.to_string(),
        }
    } else {
        Error::RemoteTransfer {
            path: remote.to_string(),
            source: err,
        }
    }
}
