//! Run command handler
//!
//! Wires the archive client, the SLURM adapter and the pipeline
//! builders into a launcher and drives passes: one by default, or
//! forever with `--interval`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;
use colored::*;
use tracing::{info, warn};

use gantry_archive::ArchiveClient;
use gantry_engine::{
    ArchiveUploader, EngineConfig, Launcher, PassSummary, SlurmCluster, SlurmConfig,
};

use crate::pipelines;

/// Arguments for the `run` command
#[derive(Args)]
pub struct RunArgs {
    /// Archive project whose contexts the passes cover
    pub project: String,

    /// Pipeline definitions to build job specs from
    #[arg(long, default_value = "pipelines.toml")]
    pub pipelines: PathBuf,

    /// Seconds between passes; runs a single pass when absent
    #[arg(long)]
    pub interval: Option<u64>,

    /// Cap running jobs for one queue, as NAME=LIMIT (repeatable)
    #[arg(long = "queue-cap", value_name = "NAME=LIMIT")]
    pub queue_caps: Vec<String>,
}

/// Handle the run command
pub async fn handle_run_command(args: RunArgs, client: ArchiveClient) -> Result<()> {
    let mut config = EngineConfig::from_env().context("invalid engine configuration")?;
    for cap in &args.queue_caps {
        let (queue, limit) = parse_queue_cap(cap)?;
        config = config.with_queue_cap(queue, limit);
    }
    config.validate()?;

    let builders = pipelines::load_builders(&args.pipelines)
        .with_context(|| format!("could not load {}", args.pipelines.display()))?;
    info!(
        "Registered {} pipeline(s) from {}",
        builders.len(),
        args.pipelines.display()
    );

    let cluster = SlurmCluster::new(SlurmConfig::default());
    let uploader = ArchiveUploader::new(client.clone());
    let launcher = Launcher::new(
        Arc::new(config),
        Arc::new(client),
        Arc::new(cluster),
        Arc::new(builders),
        Arc::new(uploader),
    );

    match args.interval {
        None => {
            let summary = launcher.run_pass(&args.project).await?;
            print_summary(&args.project, &summary);
            Ok(())
        }
        Some(seconds) => {
            let interval = Duration::from_secs(seconds);
            info!("Running passes every {}s, stop with Ctrl-C", seconds);
            loop {
                match launcher.run_pass(&args.project).await {
                    Ok(summary) => print_summary(&args.project, &summary),
                    Err(e) => warn!("Pass could not run: {:#}", e),
                }
                tokio::time::sleep(interval).await;
            }
        }
    }
}

/// Parses one `NAME=LIMIT` queue cap argument.
fn parse_queue_cap(arg: &str) -> Result<(&str, usize)> {
    let Some((queue, limit)) = arg.split_once('=') else {
        bail!("queue cap {:?} is not NAME=LIMIT", arg);
    };
    let limit: usize = limit
        .parse()
        .with_context(|| format!("queue cap {:?} has a non-numeric limit", arg))?;
    Ok((queue, limit))
}

fn print_summary(project: &str, summary: &PassSummary) {
    let headline = format!("Pass over {} finished:", project);
    if summary.has_problems() {
        println!("{} {}", "⚠".yellow(), headline.bold());
    } else {
        println!("{} {}", "✓".green(), headline.bold());
    }
    println!("  {}", summary);
}
