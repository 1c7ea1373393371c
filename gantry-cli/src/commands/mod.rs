//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod run;
mod tasks;

pub use run::RunArgs;
pub use tasks::TaskCommands;

use anyhow::Result;
use clap::Subcommand;

use gantry_archive::ArchiveClient;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run launcher passes over a project
    Run(RunArgs),
    /// Inspect the tasks a project's passes manage
    Tasks {
        #[command(subcommand)]
        command: TaskCommands,
    },
}

/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, client: ArchiveClient) -> Result<()> {
    match command {
        Commands::Run(args) => run::handle_run_command(args, client).await,
        Commands::Tasks { command } => tasks::handle_task_command(command, client).await,
    }
}
