//! Pass accounting
//!
//! [`RunningLedger`] enforces the concurrency caps within a pass;
//! [`PassSummary`] counts what happened to each context so the CLI can
//! report one line per pass.

use std::collections::HashMap;
use std::sync::Mutex;

use gantry_core::domain::status::TaskStatus;
use gantry_core::domain::task::Task;

/// In-pass view of how many jobs are running, globally and per queue.
///
/// Seeded from a counted read of JOB_RUNNING tasks at pass start, then
/// kept current as the pass submits and retires jobs. Approximate by
/// design: overshoot from concurrent launchers is absorbed by
/// cluster-side queueing, never by blocking the pass.
pub struct RunningLedger {
    max_running: usize,
    queue_caps: HashMap<String, usize>,
    counts: Mutex<Counts>,
}

#[derive(Default)]
struct Counts {
    total: usize,
    per_queue: HashMap<String, usize>,
}

impl RunningLedger {
    pub fn new(max_running: usize, queue_caps: HashMap<String, usize>) -> Self {
        Self {
            max_running,
            queue_caps,
            counts: Mutex::new(Counts::default()),
        }
    }

    /// Seeds the ledger from a snapshot of the project's tasks.
    pub fn seed(&self, tasks: &[Task]) {
        for task in tasks {
            if task.status() == TaskStatus::JobRunning {
                self.admit(task.queue());
            }
        }
    }

    /// Records a job as running without consulting the caps.
    ///
    /// Used for seeding and for adopted jobs, which exist whether the
    /// caps like it or not.
    pub fn admit(&self, queue: Option<&str>) {
        let mut counts = self.counts.lock().unwrap();
        counts.total += 1;
        if let Some(queue) = queue {
            *counts.per_queue.entry(queue.to_string()).or_insert(0) += 1;
        }
    }

    /// Reserves a running slot if the caps allow one.
    pub fn try_reserve(&self, queue: Option<&str>) -> bool {
        let mut counts = self.counts.lock().unwrap();
        if counts.total >= self.max_running {
            return false;
        }
        if let Some(queue) = queue {
            if let Some(cap) = self.queue_caps.get(queue) {
                if counts.per_queue.get(queue).copied().unwrap_or(0) >= *cap {
                    return false;
                }
            }
        }
        counts.total += 1;
        if let Some(queue) = queue {
            *counts.per_queue.entry(queue.to_string()).or_insert(0) += 1;
        }
        true
    }

    /// Frees a running slot after a job finished, failed, or a
    /// reservation went unused.
    pub fn release(&self, queue: Option<&str>) {
        let mut counts = self.counts.lock().unwrap();
        counts.total = counts.total.saturating_sub(1);
        if let Some(queue) = queue {
            if let Some(n) = counts.per_queue.get_mut(queue) {
                *n = n.saturating_sub(1);
            }
        }
    }

    /// Current global running count.
    pub fn running(&self) -> usize {
        self.counts.lock().unwrap().total
    }
}

/// What one pass did with one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The pipeline does not apply here; nothing recorded.
    NotNeeded,
    /// Task exists but its inputs are not available yet.
    AwaitingInputs,
    /// A job was submitted this pass.
    Launched,
    /// An already-submitted job was found by name and adopted.
    Adopted,
    /// Concurrency caps were full; the task waits for a later pass.
    Deferred,
    /// The job is still running (or presumed so within the grace window).
    Running,
    /// The job finished; results await finalization next pass.
    ReadyToUpload,
    /// Finalization hit a retryable problem; unchanged until next pass.
    UploadDeferred,
    /// Results ingested; the task is complete.
    Completed,
    /// The attempt failed but budget remains; queued to run again.
    Requeued,
    /// The task failed for good.
    Failed,
    /// The context no longer wants the task; it was retired.
    Superseded,
    /// The record violated lifecycle invariants and was quarantined.
    Quarantined,
    /// Already terminal; nothing to do.
    Settled,
    /// Another launcher holds the claim on this context.
    Contended,
    /// An adapter was unavailable; the task was left untouched.
    TransientError,
    /// The spec builder itself failed; context skipped.
    BuilderError,
}

/// Counted outcomes of one launcher pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub contexts: usize,
    pub not_needed: usize,
    pub awaiting_inputs: usize,
    pub launched: usize,
    pub adopted: usize,
    pub deferred: usize,
    pub running: usize,
    pub ready_to_upload: usize,
    pub upload_deferred: usize,
    pub completed: usize,
    pub requeued: usize,
    pub failed: usize,
    pub superseded: usize,
    pub quarantined: usize,
    pub settled: usize,
    pub contended: usize,
    pub transient_errors: usize,
    pub builder_errors: usize,
    /// Contexts the pass timeout cut off before they were reached.
    pub unreached: usize,
}

impl PassSummary {
    pub fn record(&mut self, outcome: Outcome) {
        self.contexts += 1;
        match outcome {
            Outcome::NotNeeded => self.not_needed += 1,
            Outcome::AwaitingInputs => self.awaiting_inputs += 1,
            Outcome::Launched => self.launched += 1,
            Outcome::Adopted => self.adopted += 1,
            Outcome::Deferred => self.deferred += 1,
            Outcome::Running => self.running += 1,
            Outcome::ReadyToUpload => self.ready_to_upload += 1,
            Outcome::UploadDeferred => self.upload_deferred += 1,
            Outcome::Completed => self.completed += 1,
            Outcome::Requeued => self.requeued += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Superseded => self.superseded += 1,
            Outcome::Quarantined => self.quarantined += 1,
            Outcome::Settled => self.settled += 1,
            Outcome::Contended => self.contended += 1,
            Outcome::TransientError => self.transient_errors += 1,
            Outcome::BuilderError => self.builder_errors += 1,
        }
    }

    /// True when anything went wrong that deserves operator attention.
    pub fn has_problems(&self) -> bool {
        self.quarantined > 0 || self.transient_errors > 0 || self.builder_errors > 0
    }
}

impl std::fmt::Display for PassSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = [
            (self.launched, "launched"),
            (self.adopted, "adopted"),
            (self.running, "running"),
            (self.ready_to_upload, "ready to upload"),
            (self.completed, "completed"),
            (self.requeued, "requeued"),
            (self.failed, "failed"),
            (self.deferred, "deferred"),
            (self.awaiting_inputs, "awaiting inputs"),
            (self.superseded, "superseded"),
            (self.quarantined, "quarantined"),
            (self.upload_deferred, "upload deferred"),
            (self.settled, "settled"),
            (self.contended, "contended"),
            (self.not_needed, "not needed"),
            (self.transient_errors, "transient errors"),
            (self.builder_errors, "builder errors"),
            (self.unreached, "unreached"),
        ]
        .iter()
        .filter(|(count, _)| *count > 0)
        .map(|(count, label)| format!("{} {}", count, label))
        .collect();

        if parts.is_empty() {
            write!(f, "{} contexts, nothing to do", self.contexts)
        } else {
            write!(f, "{} contexts: {}", self.contexts, parts.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_enforces_global_cap() {
        let ledger = RunningLedger::new(2, HashMap::new());
        assert!(ledger.try_reserve(None));
        assert!(ledger.try_reserve(None));
        assert!(!ledger.try_reserve(None));

        ledger.release(None);
        assert!(ledger.try_reserve(None));
        assert_eq!(ledger.running(), 2);
    }

    #[test]
    fn test_ledger_enforces_queue_cap() {
        let mut caps = HashMap::new();
        caps.insert("gpu".to_string(), 1);
        let ledger = RunningLedger::new(10, caps);

        assert!(ledger.try_reserve(Some("gpu")));
        assert!(!ledger.try_reserve(Some("gpu")));
        // Other queues only feel the global cap.
        assert!(ledger.try_reserve(Some("cpu")));
        assert!(ledger.try_reserve(None));

        ledger.release(Some("gpu"));
        assert!(ledger.try_reserve(Some("gpu")));
    }

    #[test]
    fn test_ledger_admit_ignores_caps() {
        let ledger = RunningLedger::new(1, HashMap::new());
        ledger.admit(None);
        ledger.admit(None);
        assert_eq!(ledger.running(), 2);
        assert!(!ledger.try_reserve(None));
    }

    #[test]
    fn test_ledger_release_never_underflows() {
        let ledger = RunningLedger::new(1, HashMap::new());
        ledger.release(None);
        ledger.release(Some("gpu"));
        assert_eq!(ledger.running(), 0);
        assert!(ledger.try_reserve(None));
    }

    #[test]
    fn test_summary_display_skips_zero_counts() {
        let mut summary = PassSummary::default();
        summary.record(Outcome::Launched);
        summary.record(Outcome::Launched);
        summary.record(Outcome::Completed);
        let line = summary.to_string();
        assert_eq!(line, "3 contexts: 2 launched, 1 completed");
        assert!(!summary.has_problems());
    }

    #[test]
    fn test_summary_flags_problems() {
        let mut summary = PassSummary::default();
        summary.record(Outcome::Quarantined);
        assert!(summary.has_problems());
    }
}
