// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use anyhow::bail;
use clap::{Args, Parser, Subcommand};

use beamline::orchestrator::{Orchestrator, ResultContent};
use beamline::{RuntimeContext, config, logging};

#[derive(Parser)]
#[command(version, about = "Submit simulation jobs to an HPC cluster over SSH")]
struct Cli {
    /// Path to beamline.toml (defaults to the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    target: TargetArgs,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Args)]
struct TargetArgs {
    /// Cluster login node hostname.
    #[arg(long, global = true)]
    host: Option<String>,

    #[arg(long, global = true)]
    port: Option<u16>,

    /// Remote username.
    #[arg(long, global = true)]
    user: Option<String>,

    /// Private key for publickey authentication.
    #[arg(long, global = true)]
    identity: Option<PathBuf>,

    /// Remote root under which per-job workspaces are created.
    #[arg(long, global = true)]
    workspace_root: Option<String>,

    /// Flat KEY=VALUE scheduler directive file.
    #[arg(long, global = true)]
    scheduler_config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Upload an input artifact and submit it as a batch job.
    Submit(SubmitArgs),
    /// Download the result files of a finished job.
    Fetch(FetchArgs),
}

#[derive(Args)]
struct SubmitArgs {
    /// Simulation input artifact to upload.
    input: PathBuf,

    /// Simulation name; defaults to the input file stem.
    #[arg(long)]
    name: Option<String>,
}

#[derive(Args)]
struct FetchArgs {
    /// Scheduler job id returned by `submit`.
    job_id: String,

    /// Print text result files instead of just listing them.
    #[arg(long)]
    print: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = config::load(
        cli.config,
        config::Overrides {
            host: cli.target.host,
            port: cli.target.port,
            username: cli.target.user,
            identity_path: cli.target.identity,
            workspace_root: cli.target.workspace_root,
            scheduler_config: cli.target.scheduler_config,
            verbose: cli.verbose.then_some(true),
        },
    )?;
    logging::init(config.verbose);

    let orchestrator = Orchestrator::new(config.target.clone(), config.scheduler_config.clone());

    match cli.cmd {
        Cmd::Submit(args) => {
            let simulation = match args.name {
                Some(name) => name,
                None => match args.input.file_stem() {
                    Some(stem) => stem.to_string_lossy().into_owned(),
                    None => bail!("cannot derive a simulation name from {}", args.input.display()),
                },
            };
            let context = RuntimeContext::for_submission(
                config.target.username.clone(),
                simulation,
                config.target.workspace_root.clone(),
            );
            let job = orchestrator.submit(&args.input, &context).await?;
            let Some(job_id) = &job.scheduler_id else {
                bail!("submission finished without a scheduler id");
            };
            println!("{job_id}");
        }
        Cmd::Fetch(args) => {
            let results = orchestrator.fetch_results(&args.job_id).await?;
            if results.is_empty() {
                eprintln!("no result files for job {}", args.job_id);
            }
            for (name, content) in results.iter() {
                match content {
                    ResultContent::Text(text) if args.print => {
                        println!("==> {name} <==");
                        println!("{text}");
                    }
                    ResultContent::Text(_) => println!("{name}\ttext"),
                    ResultContent::Binary => println!("{name}\tbinary"),
                }
            }
        }
    }

    Ok(())
}
