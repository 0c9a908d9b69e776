// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use thiserror::Error as ThisError;

/// Failure taxonomy for the whole submission engine. Every variant carries
/// the context an operator needs (phase, path, captured scheduler output)
/// without re-deriving it from logs.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("scheduler config not found at {path}: {source}")]
    ConfigNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("directive '{key}' references %{token}%, which is neither a directive, a runtime variable, nor a defaulted key")]
    UnresolvableReference { key: String, token: String },

    #[error("placeholder cycle: {chain}")]
    CyclicReference { chain: String },

    #[error("required directive '{name}' is missing from the resolved configuration")]
    MissingRequiredDirective { name: &'static str },

    #[error("connection to {host} failed: {message}")]
    Connection { host: String, message: String },

    #[error("local file not found: {path}")]
    LocalFileNotFound { path: PathBuf },

    #[error("remote path not found: {path}")]
    RemoteFileNotFound { path: String },

    #[error("remote transfer failed for {path}: {source}")]
    RemoteTransfer {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("could not parse scheduler acknowledgment (stdout: {stdout:?}, stderr: {stderr:?})")]
    SubmissionParse { stdout: String, stderr: String },

    #[error("no results directory for job {job_id}")]
    JobNotFound { job_id: String },

    #[error("result fetch failed for '{file}': {message}")]
    ResultFetch { file: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn connection(host: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Connection {
            host: host.into(),
            message: message.into(),
        }
    }
}
