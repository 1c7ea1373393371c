//! Launcher pass orchestration
//!
//! One pass: snapshot running jobs, discover the project's contexts,
//! then advance each context at most one lifecycle step through a
//! bounded worker pool. The archive is the system of record; every
//! step persists before the pass moves on, and a crash mid-pass loses
//! at most the steps that had not persisted yet.
//!
//! Per context the order is strict: claim, reconcile, advance, release.
//! Errors are caught at the context boundary and become counted
//! outcomes; they never abort the rest of the pass.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use gantry_core::domain::context::DataContext;
use gantry_core::domain::status::TaskStatus;
use gantry_core::domain::task::{GraceDisposition, RetryDisposition, Task, TransitionError};

use crate::archive::{Archive, ArchiveError};
use crate::builder::{BuilderRegistry, Evaluation};
use crate::cluster::{Cluster, ClusterError, JobState};
use crate::config::EngineConfig;
use crate::summary::{Outcome, PassSummary, RunningLedger};
use crate::uploader::{UploadError, Uploader};

/// Why one context's step did not finish.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    /// A record that should be impossible reached a step.
    #[error("{0}")]
    Invariant(String),
    /// The spec builder for this context failed.
    #[error("{0}")]
    Builder(String),
}

impl StepError {
    fn outcome(&self) -> Outcome {
        match self {
            StepError::Builder(_) => Outcome::BuilderError,
            _ => Outcome::TransientError,
        }
    }
}

/// Verdict of reconciling one context against its recorded task.
pub enum Reconciled {
    /// The pipeline does not apply and nothing is recorded.
    NotNeeded,
    /// A task waits for inputs; nothing to advance.
    AwaitingInputs,
    /// This task is ready for its next lifecycle step.
    Actionable(Task),
    /// The context no longer wants this task.
    Superseded(Task),
    /// The record violates lifecycle invariants.
    Quarantined(Task),
    /// The task is terminal; the context is done.
    Settled,
}

/// Drives launcher passes over one archive, one cluster and one set of
/// spec builders.
#[derive(Clone)]
pub struct Launcher {
    config: Arc<EngineConfig>,
    archive: Arc<dyn Archive>,
    cluster: Arc<dyn Cluster>,
    builders: Arc<BuilderRegistry>,
    uploader: Arc<dyn Uploader>,
}

impl Launcher {
    pub fn new(
        config: Arc<EngineConfig>,
        archive: Arc<dyn Archive>,
        cluster: Arc<dyn Cluster>,
        builders: Arc<BuilderRegistry>,
        uploader: Arc<dyn Uploader>,
    ) -> Self {
        Self {
            config,
            archive,
            cluster,
            builders,
            uploader,
        }
    }

    /// Runs one full pass over a project.
    ///
    /// Returns an error only when the pass could not start (snapshot or
    /// discovery failed); anything that goes wrong with an individual
    /// context is a counted outcome instead.
    pub async fn run_pass(&self, project: &str) -> anyhow::Result<PassSummary> {
        use anyhow::Context as _;

        let pass_id = Uuid::new_v4();
        info!("Starting pass {} for project {}", pass_id, project);

        let snapshot = self
            .archive
            .list_tasks(project, Some(TaskStatus::JobRunning))
            .await
            .context("failed to count running jobs")?;
        let ledger = Arc::new(RunningLedger::new(
            self.config.max_running,
            self.config.queue_caps.clone(),
        ));
        ledger.seed(&snapshot);
        debug!(
            "Pass {} starts with {} job(s) already running",
            pass_id,
            ledger.running()
        );

        let contexts = self
            .discover(project)
            .await
            .context("failed to discover contexts")?;
        info!("Pass {}: {} context(s) to consider", pass_id, contexts.len());

        let deadline = Instant::now() + self.config.pass_timeout;
        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let total = contexts.len();
        let mut started = 0usize;
        let mut handles = Vec::new();

        for context in contexts {
            let permit = match time::timeout_at(deadline, semaphore.clone().acquire_owned()).await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => break,
                Err(_) => {
                    warn!(
                        "Pass {} hit its timeout with {} context(s) unreached",
                        pass_id,
                        total - started
                    );
                    break;
                }
            };
            started += 1;

            let launcher = self.clone();
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                let outcome = launcher.advance_context(&context, &ledger).await;
                drop(permit);
                outcome
            }));
        }

        let mut summary = PassSummary {
            unreached: total - started,
            ..PassSummary::default()
        };

        for handle in handles {
            match handle.await {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    error!("Context task panicked: {}", e);
                    summary.record(Outcome::TransientError);
                }
            }
        }

        info!("Pass {} finished: {}", pass_id, summary);
        Ok(summary)
    }

    /// Lists a project's contexts in deterministic order, one entry per
    /// label.
    pub async fn discover(&self, project: &str) -> Result<Vec<DataContext>, StepError> {
        let mut contexts = self.archive.list_contexts(project).await?;
        contexts.sort_by_key(|c| c.label());
        contexts.dedup_by_key(|c| c.label());
        Ok(contexts)
    }

    /// Claims a context, runs its step, releases the claim.
    async fn advance_context(&self, context: &DataContext, ledger: &RunningLedger) -> Outcome {
        let label = context.label();

        match self
            .archive
            .claim(&label, &self.config.launcher_id, self.config.claim_lease.as_secs())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("Context {} is claimed elsewhere, skipping", label);
                return Outcome::Contended;
            }
            Err(e) => {
                warn!("Could not claim {}: {}", label, e);
                return Outcome::TransientError;
            }
        }

        let outcome = match self.process_context(context, ledger).await {
            Ok(outcome) => outcome,
            Err(e) => {
                match &e {
                    StepError::Builder(msg) => error!("Builder failed for {}: {}", label, msg),
                    StepError::Transition(_) | StepError::Invariant(_) => {
                        error!("Lifecycle bug on {}: {}", label, e)
                    }
                    _ => warn!("Pass step failed for {}: {}", label, e),
                }
                e.outcome()
            }
        };

        if let Err(e) = self.archive.release(&label, &self.config.launcher_id).await {
            // The lease expires on its own.
            warn!("Could not release claim on {}: {}", label, e);
        }

        outcome
    }

    async fn process_context(
        &self,
        context: &DataContext,
        ledger: &RunningLedger,
    ) -> Result<Outcome, StepError> {
        let existing = self.archive.get_task(&context.label()).await?;
        match self.reconcile(context, existing).await? {
            Reconciled::NotNeeded => Ok(Outcome::NotNeeded),
            Reconciled::AwaitingInputs => Ok(Outcome::AwaitingInputs),
            Reconciled::Settled => Ok(Outcome::Settled),
            Reconciled::Superseded(task) => self.retire(task, ledger).await,
            Reconciled::Quarantined(task) => self.quarantine(task, ledger).await,
            Reconciled::Actionable(task) => {
                let (_, outcome) = self.advance(task, ledger).await?;
                Ok(outcome)
            }
        }
    }

    /// Compares what the context wants with what is recorded, creating
    /// or repairing nothing silently: new tasks are written, corrupt
    /// ones are surfaced for quarantine.
    pub async fn reconcile(
        &self,
        context: &DataContext,
        existing: Option<Task>,
    ) -> Result<Reconciled, StepError> {
        let label = context.label();

        let Some(builder) = self.builders.get(&context.spec_id) else {
            return Err(StepError::Builder(format!(
                "no builder registered for spec {}",
                context.spec_id
            )));
        };

        let Some(task) = existing else {
            let resources = self.archive.get_resources(&label).await?;
            let verdict = builder
                .evaluate(context, &resources)
                .map_err(|e| StepError::Builder(format!("{:#}", e)))?;
            return match verdict {
                Evaluation::NotApplicable => Ok(Reconciled::NotNeeded),
                Evaluation::MissingInputs(reason) => {
                    info!("Context {} waits for inputs: {}", label, reason);
                    let task = Task::awaiting_inputs(context.clone(), reason);
                    self.archive.put_task(&task).await?;
                    Ok(Reconciled::AwaitingInputs)
                }
                Evaluation::Ready(spec) => {
                    info!("Context {} gets a new task", label);
                    let task = Task::new(context.clone(), spec);
                    self.archive.put_task(&task).await?;
                    Ok(Reconciled::Actionable(task))
                }
            };
        };

        if let Err(violation) = task.check_invariants() {
            error!("Invariant violation on {}: {}", label, violation);
            return Ok(Reconciled::Quarantined(task));
        }
        if task.is_terminal() {
            return Ok(Reconciled::Settled);
        }

        let resources = self.archive.get_resources(&label).await?;
        let verdict = builder
            .evaluate(context, &resources)
            .map_err(|e| StepError::Builder(format!("{:#}", e)))?;

        match (task.status(), verdict) {
            (_, Evaluation::NotApplicable) => Ok(Reconciled::Superseded(task)),
            (TaskStatus::NeedInputs, Evaluation::Ready(spec)) => {
                info!("Context {} has its inputs now", label);
                let mut task = task;
                task.inputs_ready(spec)?;
                self.archive.put_task(&task).await?;
                Ok(Reconciled::Actionable(task))
            }
            (TaskStatus::NeedInputs, Evaluation::MissingInputs(_)) => {
                Ok(Reconciled::AwaitingInputs)
            }
            (_, Evaluation::MissingInputs(reason)) => {
                // Inputs vanished under a task already in flight. The
                // job may still finish; leave the lifecycle alone.
                warn!("Context {} lost inputs after creation: {}", label, reason);
                Ok(Reconciled::Actionable(task))
            }
            (_, Evaluation::Ready(_)) => Ok(Reconciled::Actionable(task)),
        }
    }

    /// Advances one task exactly one lifecycle step.
    pub async fn advance(
        &self,
        task: Task,
        ledger: &RunningLedger,
    ) -> Result<(Task, Outcome), StepError> {
        match task.status() {
            TaskStatus::NeedToRun => self.submit_step(task, ledger).await,
            TaskStatus::JobRunning => self.poll_step(task, ledger).await,
            TaskStatus::ReadyToUpload => self.upload_step(task).await,
            TaskStatus::NeedInputs => Ok((task, Outcome::AwaitingInputs)),
            TaskStatus::Complete | TaskStatus::JobFailed | TaskStatus::Obsolete => {
                Ok((task, Outcome::Settled))
            }
        }
    }

    async fn submit_step(
        &self,
        mut task: Task,
        ledger: &RunningLedger,
    ) -> Result<(Task, Outcome), StepError> {
        let label = task.label();
        let Some(spec) = task.spec().cloned() else {
            return Err(StepError::Invariant(format!("task {} has no job spec", label)));
        };

        if task.submit_pending() {
            // An attempt was recorded but never answered; find the job
            // before even thinking about submitting again.
            if let Some(job_id) = self.cluster.lookup(&task.job_name()).await? {
                info!(
                    "Adopting job {} for {} (attempt {})",
                    job_id,
                    label,
                    task.attempts()
                );
                task.submitted(job_id)?;
                ledger.admit(task.queue());
                self.archive.put_task(&task).await?;
                return Ok((task, Outcome::Adopted));
            }
        } else if task.attempts() >= self.config.max_attempts {
            // Budget spent before this pass; only the record is missing.
            task.submit_rejected("attempt budget exhausted", self.config.max_attempts)?;
            self.archive.put_task(&task).await?;
            warn!(
                "Task {} exhausted its {} attempt(s)",
                label, self.config.max_attempts
            );
            return Ok((task, Outcome::Failed));
        }

        if !ledger.try_reserve(task.queue()) {
            debug!("Caps full, deferring {}", label);
            return Ok((task, Outcome::Deferred));
        }

        if !task.submit_pending() {
            task.begin_attempt()?;
            if let Err(e) = self.archive.put_task(&task).await {
                // The intent was not recorded, so nothing gets submitted.
                ledger.release(task.queue());
                return Err(e.into());
            }
        }

        match self.cluster.submit(&task.job_name(), &spec).await {
            Ok(job_id) => {
                info!(
                    "Submitted {} as job {} (attempt {})",
                    label,
                    job_id,
                    task.attempts()
                );
                task.submitted(job_id)?;
                // Keep the slot even if this write fails: the job runs,
                // and the pending attempt is adopted next pass.
                self.archive.put_task(&task).await?;
                Ok((task, Outcome::Launched))
            }
            Err(ClusterError::Rejected(reason)) => {
                ledger.release(task.queue());
                warn!("Submission of {} rejected: {}", label, reason);
                let disposition = task.submit_rejected(&reason, self.config.max_attempts)?;
                self.archive.put_task(&task).await?;
                Ok((task, retry_outcome(disposition)))
            }
            Err(e) => {
                // Unclear whether the job exists. The pending flag makes
                // the next pass look it up and retry this same attempt.
                ledger.release(task.queue());
                warn!("Cluster unavailable while submitting {}: {}", label, e);
                Ok((task, Outcome::TransientError))
            }
        }
    }

    async fn poll_step(
        &self,
        mut task: Task,
        ledger: &RunningLedger,
    ) -> Result<(Task, Outcome), StepError> {
        let label = task.label();
        let Some(job_id) = task.job_id().map(str::to_string) else {
            return Err(StepError::Invariant(format!(
                "running task {} has no job id",
                label
            )));
        };

        let slack = chrono::Duration::from_std(self.config.walltime_slack)
            .unwrap_or(chrono::Duration::MAX);
        if task.walltime_exceeded(slack) {
            warn!("Job {} for {} outlived its walltime, cancelling", job_id, label);
            if let Err(e) = self.cluster.cancel(&job_id).await {
                warn!("Could not cancel overdue job {}: {}", job_id, e);
            }
            return self.fail_step(task, ledger, "walltime exceeded").await;
        }

        match self.cluster.status(&job_id).await? {
            JobState::Running => {
                task.still_running();
                self.archive.put_task(&task).await?;
                Ok((task, Outcome::Running))
            }
            JobState::Succeeded => {
                info!("Job {} for {} succeeded", job_id, label);
                task.job_succeeded()?;
                ledger.release(task.queue());
                self.archive.put_task(&task).await?;
                Ok((task, Outcome::ReadyToUpload))
            }
            JobState::Failed => self.fail_step(task, ledger, "job failed on cluster").await,
            JobState::Unknown => {
                let disposition =
                    task.observed_unknown(self.config.unknown_grace, self.config.max_attempts)?;
                match disposition {
                    GraceDisposition::Tolerated => {
                        debug!(
                            "Job {} for {} unknown to scheduler ({} consecutive)",
                            job_id,
                            label,
                            task.unknown_polls()
                        );
                        self.archive.put_task(&task).await?;
                        Ok((task, Outcome::Running))
                    }
                    GraceDisposition::Expired(disposition) => {
                        warn!("Job {} for {} unknown beyond grace window", job_id, label);
                        ledger.release(task.queue());
                        self.archive.put_task(&task).await?;
                        Ok((task, retry_outcome(disposition)))
                    }
                }
            }
        }
    }

    /// Records a failed job, requeueing while budget remains.
    async fn fail_step(
        &self,
        mut task: Task,
        ledger: &RunningLedger,
        reason: &str,
    ) -> Result<(Task, Outcome), StepError> {
        ledger.release(task.queue());
        let disposition = task.job_failed(reason, self.config.max_attempts)?;
        self.archive.put_task(&task).await?;
        match disposition {
            RetryDisposition::Requeued => {
                info!("Task {} requeued after failure: {}", task.label(), reason)
            }
            RetryDisposition::Exhausted => {
                warn!("Task {} failed for good: {}", task.label(), reason)
            }
        }
        Ok((task, retry_outcome(disposition)))
    }

    async fn upload_step(&self, mut task: Task) -> Result<(Task, Outcome), StepError> {
        let label = task.label();
        match self.uploader.finalize(&task).await {
            Ok(()) => {
                task.uploaded()?;
                self.archive.put_task(&task).await?;
                info!("Task {} complete", label);
                Ok((task, Outcome::Completed))
            }
            Err(UploadError::Retryable(reason)) => {
                warn!("Finalization of {} deferred: {}", label, reason);
                Ok((task, Outcome::UploadDeferred))
            }
            Err(UploadError::Fatal(reason)) => {
                error!("Finalization of {} rejected: {}", label, reason);
                task.upload_failed(&reason)?;
                self.archive.put_task(&task).await?;
                Ok((task, Outcome::Failed))
            }
        }
    }

    /// Retires a task whose context stopped matching its pipeline.
    async fn retire(
        &self,
        mut task: Task,
        ledger: &RunningLedger,
    ) -> Result<Outcome, StepError> {
        let label = task.label();
        let was_running = task.status() == TaskStatus::JobRunning;

        if let Some(job_id) = task.job_id().map(str::to_string) {
            if self.config.cancel_obsolete {
                if let Err(e) = self.cluster.cancel(&job_id).await {
                    warn!("Could not cancel job {} of superseded {}: {}", job_id, label, e);
                }
            } else {
                debug!(
                    "Leaving job {} of superseded {} to finish on its own",
                    job_id, label
                );
            }
        }

        task.supersede("context no longer matches the pipeline")?;
        self.archive.put_task(&task).await?;
        if was_running {
            ledger.release(task.queue());
        }
        info!("Task {} retired", label);
        Ok(Outcome::Superseded)
    }

    /// Forces a corrupt record out of circulation.
    ///
    /// Never cancels: a record that violates its own invariants cannot
    /// prove it owns the job id it carries.
    async fn quarantine(
        &self,
        mut task: Task,
        ledger: &RunningLedger,
    ) -> Result<Outcome, StepError> {
        let label = task.label();
        let Err(violation) = task.check_invariants() else {
            return Err(StepError::Invariant(format!(
                "task {} sent to quarantine without a violation",
                label
            )));
        };

        if task.is_terminal() {
            // Nothing to transition; the record stays as loud evidence.
            error!("Corrupt terminal record for {} left in place: {}", label, violation);
            return Ok(Outcome::Quarantined);
        }

        let was_running = task.status() == TaskStatus::JobRunning;
        task.supersede(format!("quarantined: {}", violation))?;
        self.archive.put_task(&task).await?;
        if was_running {
            ledger.release(task.queue());
        }
        error!("Task {} quarantined: {}", label, violation);
        Ok(Outcome::Quarantined)
    }
}

fn retry_outcome(disposition: RetryDisposition) -> Outcome {
    match disposition {
        RetryDisposition::Requeued => Outcome::Requeued,
        RetryDisposition::Exhausted => Outcome::Failed,
    }
}
