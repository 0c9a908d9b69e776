// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use beamline::config::ClusterTarget;
use beamline::errors::Error;
use beamline::orchestrator::{JobStatus, Orchestrator, ResultContent};
use beamline::ssh::{ExecCapture, RemoteSession, SessionFactory};
use beamline::RuntimeContext;

#[derive(Default)]
struct SessionState {
    ops: Mutex<Vec<String>>,
    close_calls: AtomicUsize,
    sbatch_stdout: String,
    sbatch_stderr: String,
    /// Remote listing for `list_directory`; `None` means the directory is
    /// missing.
    listing: Option<Vec<String>>,
    /// Contents served by `download_file`, keyed by remote path suffix.
    remote_files: HashMap<String, Vec<u8>>,
    written_files: Mutex<HashMap<String, Vec<u8>>>,
    hang_on_exec: bool,
    hang_on_close: bool,
}

impl SessionState {
    fn record(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }

    fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }
}

struct FakeSession {
    state: Arc<SessionState>,
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn exec_capture(&self, command: &str) -> beamline::Result<ExecCapture> {
        self.state.record(format!("exec:{command}"));
        if self.state.hang_on_exec {
            std::future::pending::<()>().await;
        }
        Ok(ExecCapture {
            stdout: self.state.sbatch_stdout.clone(),
            stderr: self.state.sbatch_stderr.clone(),
            exit_code: 0,
        })
    }

    async fn upload_file(&self, local: &Path, remote: &str) -> beamline::Result<()> {
        if !local.is_file() {
            return Err(Error::LocalFileNotFound {
                path: local.to_path_buf(),
            });
        }
        self.state.record(format!("upload:{remote}"));
        Ok(())
    }

    async fn write_file(&self, remote: &str, contents: &[u8]) -> beamline::Result<()> {
        self.state.record(format!("write:{remote}"));
        self.state
            .written_files
            .lock()
            .unwrap()
            .insert(remote.to_string(), contents.to_vec());
        Ok(())
    }

    async fn download_file(&self, remote: &str, local: &Path) -> beamline::Result<()> {
        self.state.record(format!("download:{remote}"));
        let found = self
            .state
            .remote_files
            .iter()
            .find(|(name, _)| remote.ends_with(name.as_str()));
        let Some((_, bytes)) = found else {
            return Err(Error::RemoteFileNotFound {
                path: remote.to_string(),
            });
        };
        std::fs::write(local, bytes).unwrap();
        Ok(())
    }

    async fn list_directory(&self, remote: &str) -> beamline::Result<Vec<String>> {
        self.state.record(format!("list:{remote}"));
        match &self.state.listing {
            Some(names) => Ok(names.clone()),
            None => Err(Error::RemoteFileNotFound {
                path: remote.to_string(),
            }),
        }
    }

    async fn make_dir_all(&self, remote: &str) -> beamline::Result<()> {
        self.state.record(format!("mkdir:{remote}"));
        Ok(())
    }

    async fn close(&self) -> beamline::Result<()> {
        if self.state.hang_on_close {
            std::future::pending::<()>().await;
        }
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fake mirroring the real session's take-and-drop teardown: the transport
/// is released at most once no matter how often `close` is called.
struct TakeOnceSession {
    handle: Mutex<Option<()>>,
    releases: AtomicUsize,
}

impl TakeOnceSession {
    fn new() -> Self {
        Self {
            handle: Mutex::new(Some(())),
            releases: AtomicUsize::new(0),
        }
    }

    fn unused(&self) -> beamline::Error {
        Error::Connection {
            host: "cluster.test".to_string(),
            message: "unexpected operation".to_string(),
        }
    }
}

#[async_trait]
impl RemoteSession for TakeOnceSession {
    async fn exec_capture(&self, _command: &str) -> beamline::Result<ExecCapture> {
        Err(self.unused())
    }

    async fn upload_file(&self, _local: &Path, _remote: &str) -> beamline::Result<()> {
        Err(self.unused())
    }

    async fn write_file(&self, _remote: &str, _contents: &[u8]) -> beamline::Result<()> {
        Err(self.unused())
    }

    async fn download_file(&self, _remote: &str, _local: &Path) -> beamline::Result<()> {
        Err(self.unused())
    }

    async fn list_directory(&self, _remote: &str) -> beamline::Result<Vec<String>> {
        Err(self.unused())
    }

    async fn make_dir_all(&self, _remote: &str) -> beamline::Result<()> {
        Err(self.unused())
    }

    async fn close(&self) -> beamline::Result<()> {
        if self.handle.lock().unwrap().take().is_some() {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct FakeFactory {
    state: Arc<SessionState>,
    connects: AtomicUsize,
}

impl FakeFactory {
    fn new(state: SessionState) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(state),
            connects: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn connect(&self, _target: &ClusterTarget) -> beamline::Result<Box<dyn RemoteSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            state: self.state.clone(),
        }))
    }
}

fn target() -> ClusterTarget {
    ClusterTarget {
        host: "cluster.test".to_string(),
        port: 22,
        username: "alice".to_string(),
        identity_path: PathBuf::from("/dev/null"),
        workspace_root: "/scratch/alice/beamline".to_string(),
        op_timeout_secs: 5,
    }
}

fn context() -> RuntimeContext {
    RuntimeContext::for_submission("alice", "lwfa", "/scratch/alice/beamline")
}

const SCHEDULER_CFG: &str = "\
# test cluster profile
SCRATCH=/scratch/%USER%
PICSRC=/home/%USER%/picongpu
NODES=2
WALLTIME=01:00:00
";

struct Workspace {
    _dir: TempDir,
    scheduler_config: PathBuf,
    input: PathBuf,
}

fn workspace() -> Workspace {
    let dir = TempDir::new().unwrap();
    let scheduler_config = dir.path().join("cluster.cfg");
    std::fs::write(&scheduler_config, SCHEDULER_CFG).unwrap();
    let input = dir.path().join("lwfa.json");
    std::fs::write(&input, b"{\"grid\": [64, 64, 64]}").unwrap();
    Workspace {
        _dir: dir,
        scheduler_config,
        input,
    }
}

#[tokio::test]
async fn submit_uploads_everything_and_parses_the_job_id() {
    let ws = workspace();
    let factory = FakeFactory::new(SessionState {
        sbatch_stdout: "Submitted batch job 12345\n".to_string(),
        ..SessionState::default()
    });
    let orchestrator = Orchestrator::with_factory(
        target(),
        ws.scheduler_config.clone(),
        factory.clone(),
    );

    let job = orchestrator.submit(&ws.input, &context()).await.unwrap();

    assert_eq!(job.status, JobStatus::Submitted);
    assert_eq!(job.scheduler_id.as_deref(), Some("12345"));
    assert!(job.workspace.starts_with("/scratch/alice/beamline/lwfa_"));
    assert!(job.input_path.ends_with("/lwfa.json"));
    assert!(job.script_path.ends_with("/submit.sbatch"));

    let ops = factory.state.ops();
    assert_eq!(ops.len(), 4);
    assert!(ops[0].starts_with("mkdir:"));
    assert!(ops[1].starts_with("upload:"));
    assert!(ops[2].starts_with("write:"));
    assert!(ops[3].contains("&& sbatch 'submit.sbatch'"));
    assert_eq!(factory.state.close_calls.load(Ordering::SeqCst), 1);

    // The uploaded script is the composed one, with placeholders resolved.
    let written = factory.state.written_files.lock().unwrap();
    let script = String::from_utf8(written[&job.script_path].clone()).unwrap();
    assert!(script.starts_with("#!/bin/bash\n"));
    assert!(script.contains("#SBATCH --nodes=2\n"));
    assert!(script.contains("srun /home/alice/picongpu/bin/picongpu"));
}

#[tokio::test]
async fn scheduler_stderr_fails_the_submission_but_still_closes() {
    let ws = workspace();
    let factory = FakeFactory::new(SessionState {
        sbatch_stdout: "Submitted batch job 7\n".to_string(),
        sbatch_stderr: "sbatch: error: invalid partition\n".to_string(),
        ..SessionState::default()
    });
    let orchestrator = Orchestrator::with_factory(
        target(),
        ws.scheduler_config.clone(),
        factory.clone(),
    );

    let err = orchestrator.submit(&ws.input, &context()).await.unwrap_err();
    assert!(matches!(err, Error::SubmissionParse { .. }));
    assert_eq!(factory.state.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_input_artifact_never_opens_a_session() {
    let ws = workspace();
    let factory = FakeFactory::new(SessionState::default());
    let orchestrator = Orchestrator::with_factory(
        target(),
        ws.scheduler_config.clone(),
        factory.clone(),
    );

    let missing = ws.input.with_file_name("nope.json");
    let err = orchestrator.submit(&missing, &context()).await.unwrap_err();

    assert!(matches!(err, Error::LocalFileNotFound { .. }));
    assert_eq!(factory.connects.load(Ordering::SeqCst), 0);
    assert!(factory.state.ops().is_empty());
}

#[tokio::test]
async fn composition_errors_are_raised_before_any_connection() {
    let ws = workspace();
    // PICSRC is required and absent here.
    std::fs::write(&ws.scheduler_config, "SCRATCH=/scratch/%USER%\n").unwrap();
    let factory = FakeFactory::new(SessionState::default());
    let orchestrator = Orchestrator::with_factory(
        target(),
        ws.scheduler_config.clone(),
        factory.clone(),
    );

    let err = orchestrator.submit(&ws.input, &context()).await.unwrap_err();

    assert!(matches!(
        err,
        Error::MissingRequiredDirective { name: "PICSRC" }
    ));
    assert_eq!(factory.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn fetch_results_decodes_text_and_flags_binary() {
    let ws = workspace();
    let mut remote_files = HashMap::new();
    remote_files.insert("energy.dat".to_string(), b"0.0 1.5\n1.0 2.5\n".to_vec());
    remote_files.insert("fields.h5".to_string(), vec![0x89, 0x48, 0x44, 0x46, 0xff]);
    let factory = FakeFactory::new(SessionState {
        listing: Some(vec!["energy.dat".to_string(), "fields.h5".to_string()]),
        remote_files,
        ..SessionState::default()
    });
    let orchestrator = Orchestrator::with_factory(
        target(),
        ws.scheduler_config.clone(),
        factory.clone(),
    );

    let results = orchestrator.fetch_results("12345").await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(
        results.get("energy.dat"),
        Some(&ResultContent::Text("0.0 1.5\n1.0 2.5\n".to_string()))
    );
    assert_eq!(results.get("fields.h5"), Some(&ResultContent::Binary));
    let ops = factory.state.ops();
    assert!(ops[0].starts_with("list:/scratch/alice/beamline/results_12345"));
    assert_eq!(factory.state.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fetch_results_for_unknown_job_is_job_not_found() {
    let ws = workspace();
    let factory = FakeFactory::new(SessionState {
        listing: None,
        ..SessionState::default()
    });
    let orchestrator = Orchestrator::with_factory(
        target(),
        ws.scheduler_config.clone(),
        factory.clone(),
    );

    let err = orchestrator.fetch_results("999").await.unwrap_err();

    assert!(matches!(err, Error::JobNotFound { job_id } if job_id == "999"));
    assert_eq!(factory.state.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn close_releases_the_transport_once_and_never_errors() {
    let session = TakeOnceSession::new();
    session.close().await.unwrap();
    session.close().await.unwrap();
    assert_eq!(session.releases.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn hanging_close_does_not_wedge_a_decided_workflow() {
    let ws = workspace();
    let factory = FakeFactory::new(SessionState {
        sbatch_stdout: "Submitted batch job 12345\n".to_string(),
        hang_on_close: true,
        ..SessionState::default()
    });
    let orchestrator = Orchestrator::with_factory(
        target(),
        ws.scheduler_config.clone(),
        factory.clone(),
    );

    // The submission outcome is already decided; a dead link during
    // teardown must still let the workflow return.
    let job = orchestrator.submit(&ws.input, &context()).await.unwrap();

    assert_eq!(job.scheduler_id.as_deref(), Some("12345"));
    assert_eq!(factory.state.close_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn hanging_remote_operation_times_out_as_a_connection_error() {
    let ws = workspace();
    let factory = FakeFactory::new(SessionState {
        hang_on_exec: true,
        sbatch_stdout: "Submitted batch job 1\n".to_string(),
        ..SessionState::default()
    });
    let orchestrator = Orchestrator::with_factory(
        target(),
        ws.scheduler_config.clone(),
        factory.clone(),
    );

    let err = orchestrator.submit(&ws.input, &context()).await.unwrap_err();

    let Error::Connection { host, message } = err else {
        panic!("expected connection error, got {err:?}");
    };
    assert_eq!(host, "cluster.test");
    assert!(message.contains("timed out"));
    assert_eq!(factory.state.close_calls.load(Ordering::SeqCst), 1);
}
