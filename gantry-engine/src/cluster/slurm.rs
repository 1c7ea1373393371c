//! SLURM cluster adapter
//!
//! Drives the scheduler through its command line tools:
//! - submission renders a `#SBATCH` script into a spool directory and
//!   runs `sbatch`
//! - polling asks `squeue` first (live jobs) and falls back to `sacct`
//!   (finished jobs; accounting can lag, which maps to Unknown)
//! - `scancel` tolerates jobs the scheduler already forgot
//!
//! Everything that parses scheduler output is a pure function so it can
//! be unit tested without a cluster.

use std::path::PathBuf;

use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

use async_trait::async_trait;
use gantry_core::domain::spec::JobSpec;

use crate::cluster::{Cluster, ClusterError, JobState};

/// Where the adapter finds the SLURM tools and keeps its files.
#[derive(Debug, Clone)]
pub struct SlurmConfig {
    /// Directory job scripts are written to before submission.
    pub spool_dir: PathBuf,
    /// Directory job stdout/stderr files land in.
    pub log_dir: PathBuf,
    pub sbatch_bin: String,
    pub squeue_bin: String,
    pub sacct_bin: String,
    pub scancel_bin: String,
}

impl Default for SlurmConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("gantry");
        Self {
            spool_dir: base.join("spool"),
            log_dir: base.join("logs"),
            sbatch_bin: "sbatch".to_string(),
            squeue_bin: "squeue".to_string(),
            sacct_bin: "sacct".to_string(),
            scancel_bin: "scancel".to_string(),
        }
    }
}

/// SLURM-backed implementation of [`Cluster`].
pub struct SlurmCluster {
    config: SlurmConfig,
}

impl SlurmCluster {
    pub fn new(config: SlurmConfig) -> Self {
        Self { config }
    }

    /// Runs one scheduler command and captures its output.
    async fn run(&self, program: &str, args: &[&str]) -> Result<std::process::Output, ClusterError> {
        debug!("Running {} {:?}", program, args);
        Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| ClusterError::Unavailable(format!("failed to execute {}: {}", program, e)))
    }
}

#[async_trait]
impl Cluster for SlurmCluster {
    async fn submit(&self, job_name: &str, spec: &JobSpec) -> Result<String, ClusterError> {
        fs::create_dir_all(&self.config.spool_dir)
            .await
            .map_err(|e| ClusterError::Unavailable(format!("cannot create spool dir: {}", e)))?;
        fs::create_dir_all(&self.config.log_dir)
            .await
            .map_err(|e| ClusterError::Unavailable(format!("cannot create log dir: {}", e)))?;

        let script = render_script(job_name, spec, &self.config.log_dir.to_string_lossy());
        let script_path = self.config.spool_dir.join(format!("{}.sbatch", job_name));
        fs::write(&script_path, script)
            .await
            .map_err(|e| ClusterError::Unavailable(format!("cannot write job script: {}", e)))?;

        let output = self
            .run(&self.config.sbatch_bin, &[&script_path.to_string_lossy()])
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            warn!("sbatch rejected {}: {}", job_name, stderr.trim());
            return Err(ClusterError::Rejected(stderr.trim().to_string()));
        }

        let job_id = parse_submit_output(&stdout)?;
        info!("Submitted job {} as {}", job_name, job_id);
        Ok(job_id)
    }

    async fn status(&self, job_id: &str) -> Result<JobState, ClusterError> {
        let output = self
            .run(
                &self.config.squeue_bin,
                &["--noheader", "--format=%T", "--job", job_id],
            )
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            if let Some(word) = first_word(&stdout) {
                return Ok(map_queue_state(word));
            }
            // Empty output: the job left the queue, ask accounting.
        } else if !stderr.contains("Invalid job id") {
            return Err(ClusterError::Unavailable(stderr.trim().to_string()));
        }

        let output = self
            .run(
                &self.config.sacct_bin,
                &[
                    "--noheader",
                    "--parsable2",
                    "--allocations",
                    "--format=State",
                    "--jobs",
                    job_id,
                ],
            )
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ClusterError::Unavailable(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        // Accounting keeps the full line ("CANCELLED by 1234").
        match stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
            Some(line) => Ok(map_accounting_state(line)),
            None => Ok(JobState::Unknown),
        }
    }

    async fn cancel(&self, job_id: &str) -> Result<(), ClusterError> {
        let output = self.run(&self.config.scancel_bin, &[job_id]).await?;

        if output.status.success() {
            info!("Cancelled job {}", job_id);
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("Invalid job id") {
            debug!("Job {} already gone, nothing to cancel", job_id);
            return Ok(());
        }
        Err(ClusterError::CancelFailed {
            job_id: job_id.to_string(),
            message: stderr.trim().to_string(),
        })
    }

    async fn lookup(&self, job_name: &str) -> Result<Option<String>, ClusterError> {
        let output = self
            .run(
                &self.config.squeue_bin,
                &["--noheader", "--format=%i", "--name", job_name],
            )
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ClusterError::Unavailable(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(id) = last_word(&stdout) {
            return Ok(Some(id.to_string()));
        }

        // Not in the queue; a recently finished job still shows up in
        // accounting. The default sacct window only covers today, so
        // reach back far enough to span a launcher outage.
        let output = self
            .run(
                &self.config.sacct_bin,
                &[
                    "--noheader",
                    "--parsable2",
                    "--allocations",
                    "--format=JobID",
                    "--name",
                    job_name,
                    "--starttime",
                    "now-7days",
                ],
            )
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ClusterError::Unavailable(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(last_word(&stdout).map(str::to_string))
    }
}

// =============================================================================
// Pure helpers
// =============================================================================

/// Renders the batch script for one job.
///
/// The command body is opaque to the engine and appended verbatim.
pub fn render_script(job_name: &str, spec: &JobSpec, log_dir: &str) -> String {
    let r = &spec.resources;
    let mut script = String::new();
    script.push_str("#!/bin/bash\n");
    script.push_str(&format!("#SBATCH --job-name={}\n", job_name));
    script.push_str(&format!("#SBATCH --time={}\n", r.walltime));
    script.push_str(&format!("#SBATCH --mem={}M\n", r.memory_mb));
    script.push_str(&format!("#SBATCH --cpus-per-task={}\n", r.cpus));
    if let Some(queue) = &r.queue {
        script.push_str(&format!("#SBATCH --partition={}\n", queue));
    }
    script.push_str(&format!("#SBATCH --output={}/{}.out\n", log_dir, job_name));
    script.push('\n');
    script.push_str(&spec.command);
    script.push('\n');
    script
}

/// Extracts the job id from `sbatch` stdout
/// ("Submitted batch job 123456").
pub fn parse_submit_output(stdout: &str) -> Result<String, ClusterError> {
    let id = stdout
        .split_whitespace()
        .last()
        .unwrap_or_default()
        .to_string();
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
        Ok(id)
    } else {
        Err(ClusterError::Malformed(format!(
            "no job id in sbatch output: {:?}",
            stdout.trim()
        )))
    }
}

/// Maps a `squeue` state word. Anything in the queue is alive.
pub fn map_queue_state(state: &str) -> JobState {
    match state {
        "PENDING" | "RUNNING" | "SUSPENDED" | "COMPLETING" | "CONFIGURING" | "REQUEUED"
        | "RESIZING" | "REQUEUE_HOLD" | "REQUEUE_FED" => JobState::Running,
        "COMPLETED" => JobState::Succeeded,
        "FAILED" | "CANCELLED" | "TIMEOUT" | "OUT_OF_MEMORY" | "NODE_FAIL" | "PREEMPTED"
        | "BOOT_FAIL" | "DEADLINE" | "REVOKED" | "SPECIAL_EXIT" => JobState::Failed,
        _ => JobState::Unknown,
    }
}

/// Maps a `sacct` state line. Cancellations carry the canceller
/// ("CANCELLED by 1234"), so match on the prefix.
pub fn map_accounting_state(state: &str) -> JobState {
    let word = state.split_whitespace().next().unwrap_or("");
    if word.starts_with("CANCELLED") {
        return JobState::Failed;
    }
    match word {
        "COMPLETED" => JobState::Succeeded,
        "PENDING" | "RUNNING" | "SUSPENDED" | "REQUEUED" | "RESIZING" => JobState::Running,
        "FAILED" | "TIMEOUT" | "OUT_OF_MEMORY" | "NODE_FAIL" | "PREEMPTED" | "BOOT_FAIL"
        | "DEADLINE" | "REVOKED" | "SPECIAL_EXIT" => JobState::Failed,
        _ => JobState::Unknown,
    }
}

fn first_word(text: &str) -> Option<&str> {
    text.split_whitespace().next()
}

fn last_word(text: &str) -> Option<&str> {
    text.split_whitespace().last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::domain::spec::ResourceRequest;

    fn spec(queue: Option<&str>) -> JobSpec {
        JobSpec {
            resources: ResourceRequest {
                walltime: "04:00:00".to_string(),
                memory_mb: 8192,
                cpus: 4,
                queue: queue.map(str::to_string),
            },
            command: "run_pipeline --subject S01".to_string(),
        }
    }

    #[test]
    fn test_render_script_directives() {
        let script = render_script("demo-x-S01-x-S01a-x-fmriqa-a1", &spec(Some("gpu")), "/logs");
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("#SBATCH --job-name=demo-x-S01-x-S01a-x-fmriqa-a1\n"));
        assert!(script.contains("#SBATCH --time=04:00:00\n"));
        assert!(script.contains("#SBATCH --mem=8192M\n"));
        assert!(script.contains("#SBATCH --cpus-per-task=4\n"));
        assert!(script.contains("#SBATCH --partition=gpu\n"));
        assert!(script.contains("#SBATCH --output=/logs/demo-x-S01-x-S01a-x-fmriqa-a1.out\n"));
        assert!(script.ends_with("run_pipeline --subject S01\n"));
    }

    #[test]
    fn test_render_script_omits_partition_without_queue() {
        let script = render_script("job", &spec(None), "/logs");
        assert!(!script.contains("--partition"));
    }

    #[test]
    fn test_parse_submit_output() {
        assert_eq!(
            parse_submit_output("Submitted batch job 123456\n").unwrap(),
            "123456"
        );
        // Some sites patch sbatch to print extra noise first.
        assert_eq!(
            parse_submit_output("cluster ok\nSubmitted batch job 42").unwrap(),
            "42"
        );
        assert!(parse_submit_output("").is_err());
        assert!(parse_submit_output("sbatch: error: invalid partition").is_err());
    }

    #[test]
    fn test_map_queue_state() {
        assert_eq!(map_queue_state("PENDING"), JobState::Running);
        assert_eq!(map_queue_state("RUNNING"), JobState::Running);
        assert_eq!(map_queue_state("COMPLETING"), JobState::Running);
        assert_eq!(map_queue_state("COMPLETED"), JobState::Succeeded);
        assert_eq!(map_queue_state("FAILED"), JobState::Failed);
        assert_eq!(map_queue_state("TIMEOUT"), JobState::Failed);
        assert_eq!(map_queue_state("SOMETHING_NEW"), JobState::Unknown);
    }

    #[test]
    fn test_map_accounting_state() {
        assert_eq!(map_accounting_state("COMPLETED"), JobState::Succeeded);
        assert_eq!(map_accounting_state("RUNNING"), JobState::Running);
        assert_eq!(map_accounting_state("FAILED"), JobState::Failed);
        assert_eq!(map_accounting_state("OUT_OF_MEMORY"), JobState::Failed);
        assert_eq!(map_accounting_state("CANCELLED"), JobState::Failed);
        assert_eq!(map_accounting_state("CANCELLED by 1234"), JobState::Failed);
        assert_eq!(map_accounting_state(""), JobState::Unknown);
    }
}
