//! Task command handlers
//!
//! Read-only views over the task records a project's passes manage.

use anyhow::{Result, anyhow};
use clap::Subcommand;
use colored::*;

use gantry_archive::ArchiveClient;
use gantry_core::domain::status::TaskStatus;
use gantry_core::domain::task::Task;

/// Task subcommands
#[derive(Subcommand)]
pub enum TaskCommands {
    /// List a project's tasks
    List {
        /// Project whose tasks to list
        project: String,

        /// Only tasks in this status (NEED_TO_RUN, JOB_RUNNING, ...)
        #[arg(long)]
        status: Option<String>,

        /// Print raw JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Show one task record
    Get {
        /// Task label
        label: String,

        /// Print raw JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
}

/// Handle task commands
pub async fn handle_task_command(command: TaskCommands, client: ArchiveClient) -> Result<()> {
    match command {
        TaskCommands::List {
            project,
            status,
            json,
        } => list_tasks(&client, &project, status, json).await,
        TaskCommands::Get { label, json } => get_task(&client, &label, json).await,
    }
}

/// List tasks for a project, optionally filtered by status
async fn list_tasks(
    client: &ArchiveClient,
    project: &str,
    status: Option<String>,
    json: bool,
) -> Result<()> {
    let status = status.as_deref().map(parse_status).transpose()?;
    let mut tasks = client.list_tasks(project, status).await?;
    tasks.sort_by_key(|t| t.label());

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    if tasks.is_empty() {
        println!("{}", "No tasks found.".yellow());
    } else {
        println!("{}", format!("Found {} task(s):", tasks.len()).bold());
        println!();
        for task in &tasks {
            print_task_summary(task);
        }
    }

    Ok(())
}

/// Get and display a single task
async fn get_task(client: &ArchiveClient, label: &str, json: bool) -> Result<()> {
    let Some(task) = client.get_task(label).await? else {
        println!("{}", format!("No task recorded for {}.", label).yellow());
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&task)?);
    } else {
        print_task_details(&task);
    }

    Ok(())
}

fn parse_status(value: &str) -> Result<TaskStatus> {
    value.parse().map_err(|e: String| anyhow!(e))
}

/// Print a short task summary
fn print_task_summary(task: &Task) {
    println!("  {} {}", "▸".cyan(), task.label());
    println!("    Status:   {}", colorize_status(task.status()));
    if let Some(job_id) = task.job_id() {
        println!("    Job:      {}", job_id.dimmed());
    }
    if task.attempts() > 0 {
        println!("    Attempts: {}", task.attempts());
    }
    if let Some(note) = task.note() {
        println!("    Note:     {}", note.dimmed());
    }
    println!();
}

/// Print detailed task information
fn print_task_details(task: &Task) {
    println!("{}", "Task Details:".bold());
    println!("  Label:     {}", task.label().cyan());
    println!("  Status:    {}", colorize_status(task.status()));
    println!("  Attempts:  {}", task.attempts());

    if let Some(job_id) = task.job_id() {
        println!("  Job ID:    {}", job_id);
    }
    if task.submit_pending() {
        println!("  Pending:   an attempt is awaiting the scheduler's answer");
    }
    if let Some(at) = task.submitted_at() {
        println!("  Submitted: {}", at.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(at) = task.last_status_check() {
        println!("  Last poll: {}", at.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(note) = task.note() {
        println!("  Note:      {}", note);
    }

    if let Some(spec) = task.spec() {
        println!("\n{}", "Job Spec:".bold());
        println!("  Walltime:  {}", spec.resources.walltime);
        println!("  Memory:    {} MB", spec.resources.memory_mb);
        println!("  CPUs:      {}", spec.resources.cpus);
        if let Some(queue) = &spec.resources.queue {
            println!("  Queue:     {}", queue);
        }
        println!("  Command:   {}", spec.command);
    }
}

/// Colorize a task status for display
fn colorize_status(status: TaskStatus) -> colored::ColoredString {
    let s = status.as_str();
    match status {
        TaskStatus::NeedInputs => s.yellow(),
        TaskStatus::NeedToRun => s.magenta(),
        TaskStatus::JobRunning => s.cyan(),
        TaskStatus::ReadyToUpload => s.blue(),
        TaskStatus::Complete => s.green(),
        TaskStatus::JobFailed => s.red(),
        TaskStatus::Obsolete => s.dimmed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("JOB_RUNNING").unwrap(), TaskStatus::JobRunning);
        assert!(parse_status("RUNNING").is_err());
    }
}
