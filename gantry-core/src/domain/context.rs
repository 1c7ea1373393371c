//! Data context identity
//!
//! A `DataContext` names the exact slice of archive data one task is
//! derived from: project, subject, session, an optional scan, and the
//! spec id of the pipeline that should process it. It is immutable once
//! a task has been created for it and serves as the idempotency key for
//! every automation pass.

use serde::{Deserialize, Serialize};

/// Separator used when joining context components into a label.
///
/// Component values must not contain this sequence, otherwise labels
/// stop being unique keys.
pub const LABEL_SEPARATOR: &str = "-x-";

/// Identifies one (project, subject, session, scan?, spec) tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataContext {
    pub project: String,
    pub subject: String,
    pub session: String,
    /// Present for scan-level contexts, absent for session-level ones.
    pub scan: Option<String>,
    /// Id of the job spec (pipeline) this context is bound to.
    pub spec_id: String,
}

impl DataContext {
    /// Creates a session-level context.
    pub fn session(
        project: impl Into<String>,
        subject: impl Into<String>,
        session: impl Into<String>,
        spec_id: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            subject: subject.into(),
            session: session.into(),
            scan: None,
            spec_id: spec_id.into(),
        }
    }

    /// Creates a scan-level context.
    pub fn scan(
        project: impl Into<String>,
        subject: impl Into<String>,
        session: impl Into<String>,
        scan: impl Into<String>,
        spec_id: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            subject: subject.into(),
            session: session.into(),
            scan: Some(scan.into()),
            spec_id: spec_id.into(),
        }
    }

    /// Whether this context addresses a whole session rather than one scan.
    pub fn is_session_level(&self) -> bool {
        self.scan.is_none()
    }

    /// Canonical label for this context.
    ///
    /// The label is the archive key for the task, the stable sort key
    /// that makes pass ordering deterministic, and the name given to the
    /// cluster job so an unrecorded submission can be found again.
    pub fn label(&self) -> String {
        let mut parts = vec![
            self.project.as_str(),
            self.subject.as_str(),
            self.session.as_str(),
        ];
        if let Some(scan) = &self.scan {
            parts.push(scan.as_str());
        }
        parts.push(self.spec_id.as_str());
        parts.join(LABEL_SEPARATOR)
    }
}

impl std::fmt::Display for DataContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}
