// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

const APP_DIR_NAME: &str = "beamline";
const CONFIG_FILE_NAME: &str = "beamline.toml";
const CONFIG_ENV_VAR: &str = "BEAMLINE_CONFIG_PATH";
const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_OP_TIMEOUT_SECS: u64 = 120;

/// Target cluster for one job workflow. Passed explicitly into session
/// opening; never process-wide state, so tests can inject fakes and
/// multiple clusters can coexist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Path to the private key used for publickey auth.
    pub identity_path: PathBuf,
    /// Writable root on the remote host under which per-job workspaces live.
    pub workspace_root: String,
    /// Timeout applied around each remote operation.
    pub op_timeout_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    identity_path: Option<String>,
    workspace_root: Option<String>,
    op_timeout_secs: Option<u64>,
    scheduler_config: Option<String>,
    verbose: Option<bool>,
}

#[derive(Debug)]
pub struct Config {
    pub target: ClusterTarget,
    /// Flat KEY=VALUE scheduler directive file fed to the batch generator.
    pub scheduler_config: PathBuf,
    pub verbose: bool,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub identity_path: Option<PathBuf>,
    pub workspace_root: Option<String>,
    pub scheduler_config: Option<PathBuf>,
    pub verbose: Option<bool>,
}

pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    let (config_path, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), true),
            None => (default_config_path().ok(), false),
        },
    };

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let base_dir = config_path.as_deref().and_then(|path| path.parent());

    let host = overrides
        .host
        .or(file_config.host)
        .context("cluster host not set; pass --host or set `host` in the config file")?;
    let username = overrides
        .username
        .or(file_config.username)
        .context("cluster username not set; pass --user or set `username` in the config file")?;
    let identity_path = match overrides.identity_path {
        Some(path) => expand_path(path),
        None => file_config
            .identity_path
            .map(|raw| resolve_path(&raw, base_dir))
            .context("identity_path not set; pass --identity or set it in the config file")?,
    };
    let workspace_root = overrides
        .workspace_root
        .or(file_config.workspace_root)
        .context("workspace_root not set; pass --workspace-root or set it in the config file")?;
    let scheduler_config = match overrides.scheduler_config {
        Some(path) => expand_path(path),
        None => file_config
            .scheduler_config
            .map(|raw| resolve_path(&raw, base_dir))
            .context("scheduler_config not set; pass --scheduler-config or set it in the config file")?,
    };

    let port = overrides
        .port
        .or(file_config.port)
        .unwrap_or(DEFAULT_SSH_PORT);
    if port == 0 {
        anyhow::bail!("port must be between 1 and 65535");
    }
    let op_timeout_secs = file_config
        .op_timeout_secs
        .unwrap_or(DEFAULT_OP_TIMEOUT_SECS);
    if op_timeout_secs == 0 {
        anyhow::bail!("op_timeout_secs must be positive");
    }
    let verbose = overrides.verbose.or(file_config.verbose).unwrap_or(false);

    Ok(Config {
        target: ClusterTarget {
            host,
            port,
            username,
            identity_path,
            workspace_root,
            op_timeout_secs,
        },
        scheduler_config,
        verbose,
        config_path,
    })
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}
