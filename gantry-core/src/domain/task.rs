//! Task entity and its state machine
//!
//! A `Task` is one unit of orchestrated work: one data context, one job
//! spec, one persisted status lifecycle. Every status change funnels
//! through a single validated transition gate; callers use the named
//! event methods (`submitted`, `job_failed`, `uploaded`, ...) and an
//! illegal move is a typed error, never a silent mutation.
//!
//! The struct doubles as the archive wire format, so the launcher and
//! the archive client share one shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::context::DataContext;
use crate::domain::spec::JobSpec;
use crate::domain::status::TaskStatus;

/// A status change the lifecycle table does not permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal task transition {from} -> {to}")]
pub struct TransitionError {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// A persisted task record that contradicts the lifecycle invariants.
///
/// Violations are never repaired in place: the caller is expected to
/// quarantine the task, because guessing at the missing half of the
/// record could double-submit work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("task {label} has job id {job_id} but status {status}")]
    UnexpectedJobId {
        label: String,
        job_id: String,
        status: TaskStatus,
    },
    #[error("task {label} in status {status} has no job id")]
    MissingJobId { label: String, status: TaskStatus },
    #[error("task {label} in status {status} has no job spec")]
    MissingSpec { label: String, status: TaskStatus },
}

/// Where a failed attempt leaves a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Attempts remain; the task went back to NEED_TO_RUN.
    Requeued,
    /// The retry budget is spent; the task is JOB_FAILED for good.
    Exhausted,
}

/// Outcome of recording an UNKNOWN poll result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraceDisposition {
    /// Still within the grace window; the job is presumed alive.
    Tolerated,
    /// The grace window is spent; the job is treated as failed.
    Expired(RetryDisposition),
}

/// One unit of orchestrated work with a persisted status lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    context: DataContext,
    status: TaskStatus,
    /// Scheduler job id; present only once a submission happened.
    #[serde(default)]
    job_id: Option<String>,
    /// Command and resources; absent only while NEED_INPUTS.
    #[serde(default)]
    spec: Option<JobSpec>,
    /// Submission attempts so far; never decreases.
    #[serde(default)]
    attempts: u32,
    /// True from the moment an attempt is recorded until the scheduler
    /// answers it. A persisted `true` marks the crash window between
    /// submit and write-back.
    #[serde(default)]
    submit_pending: bool,
    /// Consecutive UNKNOWN poll results; reset by a RUNNING observation.
    #[serde(default)]
    unknown_polls: u32,
    /// When the last successful poll happened.
    #[serde(default)]
    last_status_check: Option<DateTime<Utc>>,
    /// When the current job was submitted.
    #[serde(default)]
    submitted_at: Option<DateTime<Utc>>,
    /// Short human-readable reason for the latest transition.
    #[serde(default)]
    note: Option<String>,
}

impl Task {
    /// Creates a task ready to be submitted.
    pub fn new(context: DataContext, spec: JobSpec) -> Self {
        Self {
            context,
            status: TaskStatus::NeedToRun,
            job_id: None,
            spec: Some(spec),
            attempts: 0,
            submit_pending: false,
            unknown_polls: 0,
            last_status_check: None,
            submitted_at: None,
            note: None,
        }
    }

    /// Creates a task whose inputs are not available yet.
    pub fn awaiting_inputs(context: DataContext, reason: impl Into<String>) -> Self {
        Self {
            context,
            status: TaskStatus::NeedInputs,
            job_id: None,
            spec: None,
            attempts: 0,
            submit_pending: false,
            unknown_polls: 0,
            last_status_check: None,
            submitted_at: None,
            note: Some(reason.into()),
        }
    }

    pub fn context(&self) -> &DataContext {
        &self.context
    }

    /// Archive key, sort key and cluster job name for this task.
    pub fn label(&self) -> String {
        self.context.label()
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn spec(&self) -> Option<&JobSpec> {
        self.spec.as_ref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// True while a recorded attempt has not been answered yet.
    pub fn submit_pending(&self) -> bool {
        self.submit_pending
    }

    /// Scheduler job name for the current attempt.
    ///
    /// The attempt counter is part of the name so a retried task never
    /// collides with a finished job from one of its earlier attempts.
    pub fn job_name(&self) -> String {
        format!("{}-a{}", self.label(), self.attempts)
    }

    pub fn unknown_polls(&self) -> u32 {
        self.unknown_polls
    }

    pub fn last_status_check(&self) -> Option<DateTime<Utc>> {
        self.last_status_check
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    /// Queue the task's job runs in, if its spec names one.
    pub fn queue(&self) -> Option<&str> {
        self.spec
            .as_ref()
            .and_then(|s| s.resources.queue.as_deref())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The single gate every status change goes through.
    fn transition(&mut self, to: TaskStatus) -> Result<(), TransitionError> {
        if !self.status.allows(to) {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Records that the wanted inputs are now available.
    pub fn inputs_ready(&mut self, spec: JobSpec) -> Result<(), TransitionError> {
        self.transition(TaskStatus::NeedToRun)?;
        self.spec = Some(spec);
        self.note = None;
        Ok(())
    }

    /// Records the intent to submit, before the cluster is contacted.
    ///
    /// Bumping and persisting the attempt ahead of the actual submission
    /// is what lets a later pass detect a job whose id was never written
    /// back (crash between submit and persist) and look it up by name
    /// instead of resubmitting it. While `submit_pending` is set the
    /// current attempt is still unanswered and beginning another one is
    /// illegal.
    pub fn begin_attempt(&mut self) -> Result<(), TransitionError> {
        if self.status != TaskStatus::NeedToRun || self.submit_pending {
            return Err(TransitionError {
                from: self.status,
                to: TaskStatus::JobRunning,
            });
        }
        self.attempts += 1;
        self.submit_pending = true;
        Ok(())
    }

    /// Records a successful submission (or the adoption of a job found
    /// by name).
    pub fn submitted(&mut self, job_id: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(TaskStatus::JobRunning)?;
        self.job_id = Some(job_id.into());
        self.submit_pending = false;
        self.submitted_at = Some(Utc::now());
        self.unknown_polls = 0;
        self.note = None;
        Ok(())
    }

    /// Records a submission the cluster rejected.
    pub fn submit_rejected(
        &mut self,
        reason: &str,
        max_attempts: u32,
    ) -> Result<RetryDisposition, TransitionError> {
        if self.status != TaskStatus::NeedToRun {
            return Err(TransitionError {
                from: self.status,
                to: TaskStatus::NeedToRun,
            });
        }
        self.submit_pending = false;
        self.note = Some(reason.to_string());
        if self.attempts >= max_attempts {
            self.transition(TaskStatus::JobFailed)?;
            return Ok(RetryDisposition::Exhausted);
        }
        Ok(RetryDisposition::Requeued)
    }

    /// Records a successful poll while the job is still in the queue or
    /// executing. Not a transition.
    pub fn still_running(&mut self) {
        self.last_status_check = Some(Utc::now());
        self.unknown_polls = 0;
    }

    /// Records a poll reporting the job finished successfully.
    pub fn job_succeeded(&mut self) -> Result<(), TransitionError> {
        self.transition(TaskStatus::ReadyToUpload)?;
        self.last_status_check = Some(Utc::now());
        self.unknown_polls = 0;
        Ok(())
    }

    /// Records a poll reporting the job failed (or timed out).
    ///
    /// Requeues when attempts remain, otherwise fails for good.
    pub fn job_failed(
        &mut self,
        reason: &str,
        max_attempts: u32,
    ) -> Result<RetryDisposition, TransitionError> {
        self.last_status_check = Some(Utc::now());
        self.note = Some(reason.to_string());
        if self.attempts >= max_attempts {
            self.transition(TaskStatus::JobFailed)?;
            Ok(RetryDisposition::Exhausted)
        } else {
            self.transition(TaskStatus::NeedToRun)?;
            self.job_id = None;
            self.submitted_at = None;
            self.unknown_polls = 0;
            Ok(RetryDisposition::Requeued)
        }
    }

    /// Records a poll where the scheduler no longer knows the job.
    ///
    /// UNKNOWN is tolerated for `grace` consecutive polls (scheduler
    /// accounting can lag); one more and the job is treated as failed.
    pub fn observed_unknown(
        &mut self,
        grace: u32,
        max_attempts: u32,
    ) -> Result<GraceDisposition, TransitionError> {
        if self.status != TaskStatus::JobRunning {
            return Err(TransitionError {
                from: self.status,
                to: TaskStatus::JobFailed,
            });
        }
        self.unknown_polls += 1;
        if self.unknown_polls <= grace {
            return Ok(GraceDisposition::Tolerated);
        }
        let disposition =
            self.job_failed("job unknown to scheduler beyond grace window", max_attempts)?;
        Ok(GraceDisposition::Expired(disposition))
    }

    /// Records a confirmed upload; the task is done.
    pub fn uploaded(&mut self) -> Result<(), TransitionError> {
        self.transition(TaskStatus::Complete)?;
        self.note = None;
        Ok(())
    }

    /// Records a fatal finalization failure.
    pub fn upload_failed(&mut self, reason: &str) -> Result<(), TransitionError> {
        self.transition(TaskStatus::JobFailed)?;
        self.note = Some(reason.to_string());
        Ok(())
    }

    /// Retires a task whose context no longer wants it.
    pub fn supersede(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(TaskStatus::Obsolete)?;
        self.job_id = None;
        self.submitted_at = None;
        self.note = Some(reason.into());
        Ok(())
    }

    /// Whether the running job has outlived its declared walltime plus
    /// the given slack.
    pub fn walltime_exceeded(&self, slack: chrono::Duration) -> bool {
        let (Some(submitted), Some(spec)) = (self.submitted_at, self.spec.as_ref()) else {
            return false;
        };
        let Some(limit) = spec.resources.walltime_duration() else {
            return false;
        };
        Utc::now() - submitted > limit + slack
    }

    /// Checks the record against the lifecycle invariants.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        use TaskStatus::*;
        match (self.status, &self.job_id) {
            (NeedInputs | NeedToRun | Obsolete, Some(job_id)) => {
                return Err(InvariantViolation::UnexpectedJobId {
                    label: self.label(),
                    job_id: job_id.clone(),
                    status: self.status,
                });
            }
            (JobRunning | ReadyToUpload, None) => {
                return Err(InvariantViolation::MissingJobId {
                    label: self.label(),
                    status: self.status,
                });
            }
            _ => {}
        }
        if self.spec.is_none() && matches!(self.status, NeedToRun | JobRunning | ReadyToUpload) {
            return Err(InvariantViolation::MissingSpec {
                label: self.label(),
                status: self.status,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::spec::ResourceRequest;

    fn context() -> DataContext {
        DataContext::scan("demo", "S01", "S01a", "scan2", "fmriqa")
    }

    fn spec() -> JobSpec {
        JobSpec {
            resources: ResourceRequest {
                walltime: "02:00:00".to_string(),
                memory_mb: 4096,
                cpus: 2,
                queue: None,
            },
            command: "echo run".to_string(),
        }
    }

    fn running_task() -> Task {
        let mut task = Task::new(context(), spec());
        task.begin_attempt().unwrap();
        task.submitted("42").unwrap();
        task
    }

    #[test]
    fn test_new_task_is_ready_to_run() {
        let task = Task::new(context(), spec());
        assert_eq!(task.status(), TaskStatus::NeedToRun);
        assert_eq!(task.attempts(), 0);
        assert!(task.job_id().is_none());
        assert!(task.check_invariants().is_ok());
    }

    #[test]
    fn test_happy_path_to_complete() {
        let mut task = Task::new(context(), spec());
        task.begin_attempt().unwrap();
        task.submitted("42").unwrap();
        assert_eq!(task.status(), TaskStatus::JobRunning);
        assert_eq!(task.job_id(), Some("42"));
        assert_eq!(task.attempts(), 1);
        assert!(task.submitted_at().is_some());

        task.still_running();
        assert!(task.last_status_check().is_some());

        task.job_succeeded().unwrap();
        assert_eq!(task.status(), TaskStatus::ReadyToUpload);

        task.uploaded().unwrap();
        assert_eq!(task.status(), TaskStatus::Complete);
        assert!(task.is_terminal());
        assert!(task.check_invariants().is_ok());
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let mut task = Task::new(context(), spec());
        let err = task.job_succeeded().unwrap_err();
        assert_eq!(err.from, TaskStatus::NeedToRun);
        assert_eq!(err.to, TaskStatus::ReadyToUpload);
        assert_eq!(task.status(), TaskStatus::NeedToRun);

        let mut done = running_task();
        done.job_succeeded().unwrap();
        done.uploaded().unwrap();
        assert!(done.supersede("late").is_err());
        assert!(done.uploaded().is_err());
    }

    #[test]
    fn test_attempts_are_monotonic_and_bounded() {
        let mut task = Task::new(context(), spec());
        task.begin_attempt().unwrap();
        assert_eq!(task.attempts(), 1);
        assert_eq!(
            task.submit_rejected("queue closed", 3).unwrap(),
            RetryDisposition::Requeued
        );
        assert_eq!(task.status(), TaskStatus::NeedToRun);

        task.begin_attempt().unwrap();
        task.submit_rejected("queue closed", 3).unwrap();
        task.begin_attempt().unwrap();
        assert_eq!(
            task.submit_rejected("queue closed", 3).unwrap(),
            RetryDisposition::Exhausted
        );
        assert_eq!(task.status(), TaskStatus::JobFailed);
        assert_eq!(task.attempts(), 3);
        assert!(task.is_terminal());
    }

    #[test]
    fn test_begin_attempt_blocked_while_pending() {
        let mut task = Task::new(context(), spec());
        task.begin_attempt().unwrap();
        assert!(task.submit_pending());
        // The open attempt must be answered before another can start.
        assert!(task.begin_attempt().is_err());
        assert_eq!(task.attempts(), 1);

        task.submit_rejected("node down", 3).unwrap();
        assert!(!task.submit_pending());
        task.begin_attempt().unwrap();
        assert_eq!(task.attempts(), 2);
    }

    #[test]
    fn test_job_name_is_attempt_scoped() {
        let mut task = Task::new(context(), spec());
        task.begin_attempt().unwrap();
        assert_eq!(task.job_name(), format!("{}-a1", task.label()));
        task.submit_rejected("busy", 3).unwrap();
        task.begin_attempt().unwrap();
        assert_eq!(task.job_name(), format!("{}-a2", task.label()));
    }

    #[test]
    fn test_poll_failure_requeues_while_attempts_remain() {
        let mut task = running_task();
        assert_eq!(
            task.job_failed("exit code 1", 3).unwrap(),
            RetryDisposition::Requeued
        );
        assert_eq!(task.status(), TaskStatus::NeedToRun);
        assert!(task.job_id().is_none());
        assert!(task.submitted_at().is_none());
        assert_eq!(task.note(), Some("exit code 1"));
        assert!(task.check_invariants().is_ok());
    }

    #[test]
    fn test_poll_failure_exhausts_budget() {
        let mut task = running_task();
        assert_eq!(
            task.job_failed("exit code 1", 1).unwrap(),
            RetryDisposition::Exhausted
        );
        assert_eq!(task.status(), TaskStatus::JobFailed);
        // Failure keeps the job id for forensics.
        assert_eq!(task.job_id(), Some("42"));
    }

    #[test]
    fn test_unknown_polls_respect_grace_window() {
        let mut task = running_task();
        assert_eq!(
            task.observed_unknown(2, 3).unwrap(),
            GraceDisposition::Tolerated
        );
        assert_eq!(
            task.observed_unknown(2, 3).unwrap(),
            GraceDisposition::Tolerated
        );
        assert_eq!(task.unknown_polls(), 2);
        assert_eq!(task.status(), TaskStatus::JobRunning);

        assert_eq!(
            task.observed_unknown(2, 3).unwrap(),
            GraceDisposition::Expired(RetryDisposition::Requeued)
        );
        assert_eq!(task.status(), TaskStatus::NeedToRun);
        assert_eq!(task.unknown_polls(), 0);
    }

    #[test]
    fn test_running_observation_resets_grace_counter() {
        let mut task = running_task();
        task.observed_unknown(2, 3).unwrap();
        assert_eq!(task.unknown_polls(), 1);
        task.still_running();
        assert_eq!(task.unknown_polls(), 0);
    }

    #[test]
    fn test_inputs_ready_moves_to_need_to_run() {
        let mut task = Task::awaiting_inputs(context(), "no NIFTI resource");
        assert_eq!(task.status(), TaskStatus::NeedInputs);
        assert_eq!(task.note(), Some("no NIFTI resource"));
        task.inputs_ready(spec()).unwrap();
        assert_eq!(task.status(), TaskStatus::NeedToRun);
        assert!(task.spec().is_some());
        assert!(task.note().is_none());
    }

    #[test]
    fn test_supersede_clears_job_id() {
        let mut task = running_task();
        task.supersede("inputs changed").unwrap();
        assert_eq!(task.status(), TaskStatus::Obsolete);
        assert!(task.job_id().is_none());
        assert!(task.check_invariants().is_ok());
    }

    #[test]
    fn test_upload_failure_is_fatal() {
        let mut task = running_task();
        task.job_succeeded().unwrap();
        task.upload_failed("results rejected").unwrap();
        assert_eq!(task.status(), TaskStatus::JobFailed);
    }

    #[test]
    fn test_invariants_catch_corrupt_records() {
        let json = serde_json::json!({
            "context": context(),
            "status": "NEED_TO_RUN",
            "job_id": "99",
            "spec": spec(),
        });
        let task: Task = serde_json::from_value(json).unwrap();
        assert!(matches!(
            task.check_invariants(),
            Err(InvariantViolation::UnexpectedJobId { .. })
        ));

        let json = serde_json::json!({
            "context": context(),
            "status": "JOB_RUNNING",
            "spec": spec(),
        });
        let task: Task = serde_json::from_value(json).unwrap();
        assert!(matches!(
            task.check_invariants(),
            Err(InvariantViolation::MissingJobId { .. })
        ));

        let json = serde_json::json!({
            "context": context(),
            "status": "NEED_TO_RUN",
        });
        let task: Task = serde_json::from_value(json).unwrap();
        assert!(matches!(
            task.check_invariants(),
            Err(InvariantViolation::MissingSpec { .. })
        ));
    }

    #[test]
    fn test_walltime_exceeded() {
        let mut task = running_task();
        assert!(!task.walltime_exceeded(chrono::Duration::zero()));

        // Rewind the submission timestamp through the wire format.
        let mut value = serde_json::to_value(&task).unwrap();
        value["submitted_at"] = serde_json::json!(Utc::now() - chrono::Duration::hours(10));
        task = serde_json::from_value(value).unwrap();
        assert!(task.walltime_exceeded(chrono::Duration::hours(1)));
        assert!(!task.walltime_exceeded(chrono::Duration::hours(20)));
    }

    #[test]
    fn test_wire_round_trip_preserves_state() {
        let mut task = running_task();
        task.observed_unknown(5, 3).unwrap();
        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
        assert!(json.contains("\"JOB_RUNNING\""));
    }
}
