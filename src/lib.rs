// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod batch;
pub mod config;
pub mod errors;
pub mod logging;
pub mod orchestrator;
pub mod ssh;
pub mod util;

pub use batch::{BatchConfig, ResolvedConfig, RuntimeContext};
pub use config::{ClusterTarget, Config, Overrides};
pub use errors::{Error, Result};
pub use orchestrator::{Job, JobStatus, Orchestrator, ResultContent, ResultSet};
pub use ssh::{ExecCapture, RemoteSession, SessionFactory, SshSession, SshSessionFactory};
