// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use russh::ChannelMsg;
use russh::client::{AuthResult, Config, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use tokio::fs as tokiofs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::config::ClusterTarget;
use crate::errors::{Error, Result};
use crate::ssh::{ExecCapture, RemoteSession, map_sftp_error};
use crate::util::remote_path::ancestor_chain;

const INACTIVITY_TIMEOUT_SECS: u64 = 30;
const KEEPALIVE_INTERVAL_SECS: u64 = 10;
const TRANSFER_BLOCK_SIZE: usize = 64 * 1024;

/// Minimal russh client handler. We rely on default implementations.
/// TODO: add actual server key verification
#[derive(Clone, Debug, Default)]
struct ClientHandler;

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;
    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// A live, authenticated connection to the cluster's login node. Owned by
/// exactly one job submission; `close` tears the transport down and further
/// operations fail.
pub struct SshSession {
    host: String,
    handle: Mutex<Option<Handle<ClientHandler>>>,
}

impl SshSession {
    /// Connect and authenticate with the configured identity file.
    pub async fn open(target: &ClusterTarget) -> Result<Self> {
        let config = Arc::new(Config {
            inactivity_timeout: Some(Duration::from_secs(INACTIVITY_TIMEOUT_SECS)),
            keepalive_interval: Some(Duration::from_secs(KEEPALIVE_INTERVAL_SECS)),
            ..Default::default()
        });

        log::info!(
            "connecting to {}@{}:{}",
            &target.username,
            &target.host,
            target.port
        );
        let mut handle = russh::client::connect(
            config,
            (target.host.as_str(), target.port),
            ClientHandler,
        )
        .await
        .map_err(|e| Error::connection(&target.host, format!("SSH connect failed: {e}")))?;

        let key = russh::keys::load_secret_key(&target.identity_path, None).map_err(|e| {
            Error::connection(
                &target.host,
                format!(
                    "failed to load secret key at {}: {e}",
                    target.identity_path.display()
                ),
            )
        })?;
        // Prefer SHA-256 for RSA if applicable (ignored for non-RSA keys)
        let hash = handle
            .best_supported_rsa_hash()
            .await
            .map_err(|e| Error::connection(&target.host, e.to_string()))?
            .flatten();
        let pk = PrivateKeyWithHashAlg::new(Arc::new(key), hash);
        let result = handle
            .authenticate_publickey(target.username.clone(), pk)
            .await
            .map_err(|e| Error::connection(&target.host, e.to_string()))?;
        match result {
            AuthResult::Success => {}
            AuthResult::Failure { .. } => {
                return Err(Error::connection(
                    &target.host,
                    format!("publickey authentication failed for {}", &target.username),
                ));
            }
        }
        log::info!("authenticated as {}@{}", &target.username, &target.host);

        Ok(Self {
            host: target.host.clone(),
            handle: Mutex::new(Some(handle)),
        })
    }

    fn closed_error(&self) -> Error {
        Error::connection(&self.host, "session already closed")
    }

    async fn sftp(&self) -> anyhow::Result<SftpSession> {
        let guard = self.handle.lock().await;
        let handle = guard.as_ref().ok_or_else(|| anyhow!("session closed"))?;
        let channel = handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;
        Ok(sftp)
    }
}

fn handle_capture_message(
    msg: &ChannelMsg,
    out: &mut Vec<u8>,
    err: &mut Vec<u8>,
    code: &mut i32,
) -> bool {
    match msg {
        ChannelMsg::Data { data } => {
            out.extend_from_slice(data);
            false
        }
        ChannelMsg::ExtendedData { data, ext: 1 } => {
            err.extend_from_slice(data);
            false
        }
        ChannelMsg::ExitStatus { exit_status } => {
            *code = *exit_status as i32;
            false
        }
        ChannelMsg::Close => true,
        _ => false,
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec_capture(&self, command: &str) -> Result<ExecCapture> {
        let guard = self.handle.lock().await;
        let handle = guard.as_ref().ok_or_else(|| self.closed_error())?;
        let mut chan = handle
            .channel_open_session()
            .await
            .map_err(|e| Error::connection(&self.host, format!("open session: {e}")))?;
        log::debug!("executing '{command}'");
        chan.exec(true, command)
            .await
            .map_err(|e| Error::connection(&self.host, format!("exec request: {e}")))?;

        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut code: i32 = 0;
        loop {
            let Some(msg) = chan.wait().await else {
                break;
            };
            if handle_capture_message(&msg, &mut out, &mut err, &mut code) {
                break;
            }
        }
        let _ = chan.close().await;

        Ok(ExecCapture {
            stdout: String::from_utf8_lossy(&out).into_owned(),
            stderr: String::from_utf8_lossy(&err).into_owned(),
            exit_code: code,
        })
    }

    async fn upload_file(&self, local: &Path, remote: &str) -> Result<()> {
        // Reject a bad local path before any traffic happens.
        match tokiofs::metadata(local).await {
            Ok(meta) if meta.is_file() => {}
            _ => {
                return Err(Error::LocalFileNotFound {
                    path: local.to_path_buf(),
                });
            }
        }
        log::debug!("uploading {} -> {remote}", local.display());
        upload(self, local, remote)
            .await
            .map_err(|e| map_sftp_error(remote, e))
    }

    async fn write_file(&self, remote: &str, contents: &[u8]) -> Result<()> {
        log::debug!("writing {} bytes to {remote}", contents.len());
        write_remote(self, remote, contents)
            .await
            .map_err(|e| map_sftp_error(remote, e))
    }

    async fn download_file(&self, remote: &str, local: &Path) -> Result<()> {
        log::debug!("downloading {remote} -> {}", local.display());
        download(self, remote, local)
            .await
            .map_err(|e| map_sftp_error(remote, e))
    }

    async fn list_directory(&self, remote: &str) -> Result<Vec<String>> {
        let sftp = self.sftp().await.map_err(|e| map_sftp_error(remote, e))?;
        let entries = sftp
            .read_dir(remote)
            .await
            .map_err(|e| map_sftp_error(remote, anyhow::Error::new(e)))?;
        let mut names: Vec<String> = entries
            .into_iter()
            .filter(|entry| !entry.metadata().is_dir())
            .map(|entry| entry.file_name())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn make_dir_all(&self, remote: &str) -> Result<()> {
        let sftp = self.sftp().await.map_err(|e| map_sftp_error(remote, e))?;
        for cur in ancestor_chain(remote) {
            match sftp.metadata(&cur).await {
                Ok(meta) => {
                    if !meta.is_dir() {
                        return Err(Error::RemoteTransfer {
                            path: remote.to_string(),
                            source: anyhow!("remote path exists but is not a directory: {cur}"),
                        });
                    }
                }
                Err(_) => {
                    sftp.create_dir(&cur)
                        .await
                        .map_err(|e| map_sftp_error(&cur, anyhow::Error::new(e)))?;
                }
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.take() {
            log::debug!("closing session to {}", &self.host);
            // Best-effort; the server may already have dropped us.
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
        }
        Ok(())
    }
}

async fn upload(session: &SshSession, local: &Path, remote: &str) -> anyhow::Result<()> {
    let sftp = session.sftp().await?;
    let mut lf = tokiofs::File::open(local).await?;
    let flags = OpenFlags::WRITE
        .union(OpenFlags::CREATE)
        .union(OpenFlags::TRUNCATE);
    let mut rfile = sftp
        .open_with_flags(remote, flags)
        .await
        .with_context(|| format!("open remote {remote}"))?;
    let mut buf = vec![0u8; TRANSFER_BLOCK_SIZE];
    loop {
        let n = lf.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        rfile.write_all(&buf[..n]).await?;
    }
    rfile.flush().await?;
    rfile.shutdown().await?;
    Ok(())
}

async fn write_remote(session: &SshSession, remote: &str, contents: &[u8]) -> anyhow::Result<()> {
    let sftp = session.sftp().await?;
    let flags = OpenFlags::WRITE
        .union(OpenFlags::CREATE)
        .union(OpenFlags::TRUNCATE);
    let mut rfile = sftp
        .open_with_flags(remote, flags)
        .await
        .with_context(|| format!("open remote {remote}"))?;
    rfile.write_all(contents).await?;
    rfile.flush().await?;
    rfile.shutdown().await?;
    Ok(())
}

async fn download(session: &SshSession, remote: &str, local: &Path) -> anyhow::Result<()> {
    let sftp = session.sftp().await?;
    if let Some(parent) = local.parent() {
        tokiofs::create_dir_all(parent).await?;
    }
    let mut rfile = sftp
        .open(remote)
        .await
        .with_context(|| format!("open remote {remote}"))?;
    let mut lfile = tokiofs::File::create(local).await?;
    tokio::io::copy(&mut rfile, &mut lfile).await?;
    lfile.flush().await?;
    Ok(())
}
