// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use crate::batch::{self, BatchConfig, RuntimeContext};
use crate::config::ClusterTarget;
use crate::errors::{Error, Result};
use crate::ssh::{RemoteSession, SessionFactory, SshSessionFactory};
use crate::util::remote_path::{join_remote, sh_escape};

const SCRIPT_FILE_NAME: &str = "submit.sbatch";

/// Lifecycle of one submission. Transitions are strictly forward; any
/// failure moves the job to `Failed` and aborts the remaining steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Created,
    WorkspacePrepared,
    InputUploaded,
    ScriptUploaded,
    Submitted,
    Completed,
    Failed,
}

/// Everything the caller needs to refer to a submission afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Remote per-job workspace directory.
    pub workspace: String,
    /// Remote path of the uploaded input artifact.
    pub input_path: String,
    /// Remote path of the generated submission script.
    pub script_path: String,
    /// Scheduler-assigned identifier, set once the submission is accepted.
    pub scheduler_id: Option<String>,
    pub status: JobStatus,
}

/// One fetched result file: decoded text, or a marker for content that is
/// not valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultContent {
    Text(String),
    Binary,
}

/// Read-only collection of a job's result files, keyed by file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    files: BTreeMap<String, ResultContent>,
}

impl ResultSet {
    pub fn get(&self, name: &str) -> Option<&ResultContent> {
        self.files.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResultContent)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Drives the full submission workflow against one cluster. Each call opens
/// its own session through the factory and closes it on every exit path;
/// nothing is shared between concurrent workflows.
pub struct Orchestrator {
    target: ClusterTarget,
    scheduler_config: PathBuf,
    factory: Arc<dyn SessionFactory>,
}

impl Orchestrator {
    pub fn new(target: ClusterTarget, scheduler_config: PathBuf) -> Self {
        Self::with_factory(target, scheduler_config, Arc::new(SshSessionFactory))
    }

    pub fn with_factory(
        target: ClusterTarget,
        scheduler_config: PathBuf,
        factory: Arc<dyn SessionFactory>,
    ) -> Self {
        Self {
            target,
            scheduler_config,
            factory,
        }
    }

    /// Submit one job: prepare the remote workspace, place the input
    /// artifact and the composed script, hand the script to `sbatch` and
    /// parse the acknowledgment.
    ///
    /// Configuration loading, placeholder resolution and script composition
    /// all happen before the connection is opened, so a config mistake
    /// never leaves a half-prepared remote workspace.
    #[tracing::instrument(
        name = "orchestrator",
        level = "debug",
        skip(self, input_artifact, context),
        fields(op = "submit", host = %self.target.host, sim = %context.simulation)
    )]
    pub async fn submit(&self, input_artifact: &Path, context: &RuntimeContext) -> Result<Job> {
        let config = BatchConfig::load(&self.scheduler_config)?;
        let resolved = batch::resolve(&config, context)?;
        let script = batch::compose(&resolved, context)?;

        match tokio::fs::metadata(input_artifact).await {
            Ok(meta) if meta.is_file() => {}
            _ => {
                return Err(Error::LocalFileNotFound {
                    path: input_artifact.to_path_buf(),
                });
            }
        }
        let input_name = input_artifact
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| Error::LocalFileNotFound {
                path: input_artifact.to_path_buf(),
            })?;

        let workspace = join_remote(&self.target.workspace_root, &context.sim_dir);
        let mut job = Job {
            input_path: join_remote(&workspace, &input_name),
            script_path: join_remote(&workspace, SCRIPT_FILE_NAME),
            workspace,
            scheduler_id: None,
            status: JobStatus::Created,
        };

        let session = self
            .timed("connect", self.factory.connect(&self.target))
            .await?;
        let outcome = self
            .run_submission(session.as_ref(), &mut job, input_artifact, &script)
            .await;
        // Release is best-effort but still bounded; a dead link must not
        // wedge the workflow after the outcome is already decided.
        let _ = self.timed("close", session.close()).await;

        match outcome {
            Ok(scheduler_id) => {
                tracing::info!(job_id = %scheduler_id, workspace = %job.workspace, "job submitted");
                job.scheduler_id = Some(scheduler_id);
                job.status = JobStatus::Submitted;
                Ok(job)
            }
            Err(err) => {
                tracing::warn!(workspace = %job.workspace, error = %err, "submission failed");
                job.status = JobStatus::Failed;
                Err(err)
            }
        }
    }

    async fn run_submission(
        &self,
        session: &dyn RemoteSession,
        job: &mut Job,
        input_artifact: &Path,
        script: &str,
    ) -> Result<String> {
        self.timed("make_dir_all", session.make_dir_all(&job.workspace))
            .await?;
        job.status = JobStatus::WorkspacePrepared;

        self.timed(
            "upload_file",
            session.upload_file(input_artifact, &job.input_path),
        )
        .await?;
        job.status = JobStatus::InputUploaded;

        self.timed(
            "write_file",
            session.write_file(&job.script_path, script.as_bytes()),
        )
        .await?;
        job.status = JobStatus::ScriptUploaded;

        let command = format!(
            "cd {} && sbatch {}",
            sh_escape(&job.workspace),
            sh_escape(SCRIPT_FILE_NAME)
        );
        let capture = self.timed("sbatch", session.exec_capture(&command)).await?;
        if capture.exit_code != 0 {
            return Err(Error::SubmissionParse {
                stdout: capture.stdout.trim().to_string(),
                stderr: capture.stderr.trim().to_string(),
            });
        }
        batch::parse_submit_ack(&capture.stdout, &capture.stderr)
    }

    /// Download everything the job left in its results directory. Files are
    /// staged into a local temp directory, then decoded as UTF-8 where
    /// possible.
    #[tracing::instrument(
        name = "orchestrator",
        level = "debug",
        skip(self),
        fields(op = "fetch_results", host = %self.target.host, job_id = %job_id)
    )]
    pub async fn fetch_results(&self, job_id: &str) -> Result<ResultSet> {
        let results_dir = join_remote(&self.target.workspace_root, &results_dir_name(job_id));

        let session = self
            .timed("connect", self.factory.connect(&self.target))
            .await?;
        let outcome = self.run_fetch(session.as_ref(), job_id, &results_dir).await;
        let _ = self.timed("close", session.close()).await;
        outcome
    }

    async fn run_fetch(
        &self,
        session: &dyn RemoteSession,
        job_id: &str,
        results_dir: &str,
    ) -> Result<ResultSet> {
        let names = match self
            .timed("list_directory", session.list_directory(results_dir))
            .await
        {
            Ok(names) => names,
            Err(Error::RemoteFileNotFound { .. }) => {
                return Err(Error::JobNotFound {
                    job_id: job_id.to_string(),
                });
            }
            Err(err) => return Err(err),
        };

        let staging = TempDir::new().map_err(|e| Error::ResultFetch {
            file: results_dir.to_string(),
            message: format!("could not create staging directory: {e}"),
        })?;

        let mut files = BTreeMap::new();
        for name in names {
            let remote = join_remote(results_dir, &name);
            let local = staging.path().join(&name);
            self.timed("download_file", session.download_file(&remote, &local))
                .await
                .map_err(|e| Error::ResultFetch {
                    file: name.clone(),
                    message: e.to_string(),
                })?;
            let bytes = std::fs::read(&local).map_err(|e| Error::ResultFetch {
                file: name.clone(),
                message: e.to_string(),
            })?;
            let content = match String::from_utf8(bytes) {
                Ok(text) => ResultContent::Text(text),
                Err(_) => ResultContent::Binary,
            };
            files.insert(name, content);
        }
        Ok(ResultSet { files })
    }

    async fn timed<T>(&self, op: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = Duration::from_secs(self.target.op_timeout_secs);
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::connection(
                &self.target.host,
                format!("{op} timed out after {}s", limit.as_secs()),
            )),
        }
    }
}

fn results_dir_name(job_id: &str) -> String {
    format!("results_{job_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_dir_is_derived_from_the_job_id() {
        assert_eq!(results_dir_name("123456"), "results_123456");
    }

    #[test]
    fn result_set_lookups_by_file_name() {
        let mut files = BTreeMap::new();
        files.insert(
            "energy.dat".to_string(),
            ResultContent::Text("1 2 3".to_string()),
        );
        files.insert("fields.h5".to_string(), ResultContent::Binary);
        let set = ResultSet { files };
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.get("energy.dat"),
            Some(&ResultContent::Text("1 2 3".to_string()))
        );
        assert_eq!(set.get("fields.h5"), Some(&ResultContent::Binary));
        assert!(set.get("missing").is_none());
    }
}
