//! Gantry CLI
//!
//! Command-line interface for the Gantry launcher: run automation
//! passes against an archive project and inspect the tasks they manage.

mod commands;
mod pipelines;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::{Commands, handle_command};

#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "Task lifecycle launcher for archive-driven pipelines", long_about = None)]
struct Cli {
    /// Archive base URL
    #[arg(
        long,
        env = "GANTRY_ARCHIVE_URL",
        default_value = "http://localhost:8080"
    )]
    archive_url: String,

    /// Bearer token for the archive, if it requires one
    #[arg(long, env = "GANTRY_ARCHIVE_TOKEN")]
    archive_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gantry_engine=info,gantry_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut client = gantry_archive::ArchiveClient::new(cli.archive_url);
    if let Some(token) = cli.archive_token {
        client = client.with_token(token);
    }

    handle_command(cli.command, client).await
}
