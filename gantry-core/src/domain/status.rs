//! Task status lifecycle
//!
//! Statuses are persisted in the archive as SCREAMING_SNAKE_CASE strings
//! and move only along the transitions listed in `TaskStatus::allows`.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Wanted, but required inputs are not available yet.
    NeedInputs,
    /// Ready to be submitted to the cluster.
    NeedToRun,
    /// Submitted; a cluster job id is recorded.
    JobRunning,
    /// Failed permanently (retry budget spent, or a fatal outcome).
    JobFailed,
    /// The cluster job succeeded; results await finalization.
    ReadyToUpload,
    /// Finalized into the archive.
    Complete,
    /// Superseded; excluded from all future consideration.
    Obsolete,
}

impl TaskStatus {
    /// Wire form of the status, as stored in the archive.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NeedInputs => "NEED_INPUTS",
            TaskStatus::NeedToRun => "NEED_TO_RUN",
            TaskStatus::JobRunning => "JOB_RUNNING",
            TaskStatus::JobFailed => "JOB_FAILED",
            TaskStatus::ReadyToUpload => "READY_TO_UPLOAD",
            TaskStatus::Complete => "COMPLETE",
            TaskStatus::Obsolete => "OBSOLETE",
        }
    }

    /// Terminal statuses never change again and are skipped by passes.
    ///
    /// JOB_FAILED counts as terminal: it is only ever stored once the
    /// retry budget is spent or the failure is fatal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Obsolete | TaskStatus::JobFailed
        )
    }

    /// Whether the lifecycle permits moving from `self` to `to`.
    ///
    /// This table is the single authority on legal transitions; `Task`
    /// funnels every status change through it.
    pub fn allows(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match (*self, to) {
            // Inputs appear, or the context stops being wanted.
            (NeedInputs, NeedToRun) | (NeedInputs, Obsolete) => true,
            // Submission succeeds, the retry budget runs out, or the
            // context stops being wanted.
            (NeedToRun, JobRunning) | (NeedToRun, JobFailed) | (NeedToRun, Obsolete) => true,
            // Poll outcomes: success, requeue with attempts remaining,
            // permanent failure, or supersession.
            (JobRunning, ReadyToUpload)
            | (JobRunning, NeedToRun)
            | (JobRunning, JobFailed)
            | (JobRunning, Obsolete) => true,
            // Finalization confirms, fails fatally, or is superseded.
            (ReadyToUpload, Complete)
            | (ReadyToUpload, JobFailed)
            | (ReadyToUpload, Obsolete) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEED_INPUTS" => Ok(TaskStatus::NeedInputs),
            "NEED_TO_RUN" => Ok(TaskStatus::NeedToRun),
            "JOB_RUNNING" => Ok(TaskStatus::JobRunning),
            "JOB_FAILED" => Ok(TaskStatus::JobFailed),
            "READY_TO_UPLOAD" => Ok(TaskStatus::ReadyToUpload),
            "COMPLETE" => Ok(TaskStatus::Complete),
            "OBSOLETE" => Ok(TaskStatus::Obsolete),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    const ALL: [TaskStatus; 7] = [
        NeedInputs,
        NeedToRun,
        JobRunning,
        JobFailed,
        ReadyToUpload,
        Complete,
        Obsolete,
    ];

    #[test]
    fn test_terminal_statuses_allow_nothing() {
        for terminal in [Complete, Obsolete, JobFailed] {
            for to in ALL {
                assert!(
                    !terminal.allows(to),
                    "{terminal} should not allow a move to {to}"
                );
            }
        }
    }

    #[test]
    fn test_submission_and_poll_transitions() {
        assert!(NeedToRun.allows(JobRunning));
        assert!(JobRunning.allows(ReadyToUpload));
        assert!(JobRunning.allows(NeedToRun));
        assert!(JobRunning.allows(JobFailed));
        assert!(ReadyToUpload.allows(Complete));
    }

    #[test]
    fn test_no_transition_bypasses_job_running() {
        assert!(!NeedToRun.allows(ReadyToUpload));
        assert!(!NeedToRun.allows(Complete));
        assert!(!NeedInputs.allows(JobRunning));
        assert!(!NeedInputs.allows(Complete));
    }

    #[test]
    fn test_any_non_terminal_can_become_obsolete() {
        for from in [NeedInputs, NeedToRun, JobRunning, ReadyToUpload] {
            assert!(from.allows(Obsolete), "{from} should allow OBSOLETE");
        }
    }

    #[test]
    fn test_wire_form_round_trips() {
        for status in ALL {
            let parsed: TaskStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!("RUNNING".parse::<TaskStatus>().is_err());
    }
}
