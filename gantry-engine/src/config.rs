//! Engine configuration
//!
//! Defines all configurable parameters for a launcher pass: concurrency
//! caps, retry budget, grace window, worker pool size and timing.

use std::collections::HashMap;
use std::time::Duration;

/// Launcher pass configuration
///
/// Every knob has a default that works for a small project; production
/// deployments tune them through environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Identity of this launcher instance, used as claim owner.
    pub launcher_id: String,

    /// Maximum number of tasks allowed in JOB_RUNNING at once.
    pub max_running: usize,

    /// Optional per-queue caps on running tasks, keyed by queue name.
    pub queue_caps: HashMap<String, usize>,

    /// How many submission attempts a task gets before it fails for good.
    pub max_attempts: u32,

    /// How many consecutive UNKNOWN polls are tolerated before a job is
    /// treated as failed.
    pub unknown_grace: u32,

    /// Max contexts advanced in parallel within a pass.
    pub workers: usize,

    /// Wall-clock bound on a whole pass; contexts not reached before it
    /// expires wait for the next pass.
    pub pass_timeout: Duration,

    /// How long a context claim stays valid without a release.
    pub claim_lease: Duration,

    /// Whether retiring a superseded task also cancels its cluster job.
    pub cancel_obsolete: bool,

    /// Slack added to a job's declared walltime before the engine
    /// treats it as hung.
    pub walltime_slack: Duration,
}

impl EngineConfig {
    /// Creates a configuration with defaults for the given launcher id.
    pub fn new(launcher_id: String) -> Self {
        Self {
            launcher_id,
            max_running: 100,
            queue_caps: HashMap::new(),
            max_attempts: 3,
            unknown_grace: 2,
            workers: 4,
            pass_timeout: Duration::from_secs(1800),
            claim_lease: Duration::from_secs(600),
            cancel_obsolete: true,
            walltime_slack: Duration::from_secs(3600),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Recognized environment variables:
    /// - GANTRY_LAUNCHER_ID (optional, default: random)
    /// - GANTRY_MAX_RUNNING (optional, default: 100)
    /// - GANTRY_MAX_ATTEMPTS (optional, default: 3)
    /// - GANTRY_UNKNOWN_GRACE (optional, default: 2)
    /// - GANTRY_WORKERS (optional, default: 4)
    /// - GANTRY_PASS_TIMEOUT (optional, seconds, default: 1800)
    /// - GANTRY_CLAIM_LEASE (optional, seconds, default: 600)
    /// - GANTRY_CANCEL_OBSOLETE (optional, true/false, default: true)
    /// - GANTRY_WALLTIME_SLACK (optional, seconds, default: 3600)
    pub fn from_env() -> anyhow::Result<Self> {
        let launcher_id = std::env::var("GANTRY_LAUNCHER_ID")
            .unwrap_or_else(|_| format!("gantry-{}", uuid::Uuid::new_v4()));

        let mut config = Self::new(launcher_id);

        if let Some(v) = read_env("GANTRY_MAX_RUNNING")? {
            config.max_running = v;
        }
        if let Some(v) = read_env("GANTRY_MAX_ATTEMPTS")? {
            config.max_attempts = v;
        }
        if let Some(v) = read_env("GANTRY_UNKNOWN_GRACE")? {
            config.unknown_grace = v;
        }
        if let Some(v) = read_env("GANTRY_WORKERS")? {
            config.workers = v;
        }
        if let Some(v) = read_env("GANTRY_PASS_TIMEOUT")? {
            config.pass_timeout = Duration::from_secs(v);
        }
        if let Some(v) = read_env("GANTRY_CLAIM_LEASE")? {
            config.claim_lease = Duration::from_secs(v);
        }
        if let Some(v) = read_env("GANTRY_CANCEL_OBSOLETE")? {
            config.cancel_obsolete = v;
        }
        if let Some(v) = read_env("GANTRY_WALLTIME_SLACK")? {
            config.walltime_slack = Duration::from_secs(v);
        }

        Ok(config)
    }

    /// Adds a per-queue running cap.
    pub fn with_queue_cap(mut self, queue: impl Into<String>, cap: usize) -> Self {
        self.queue_caps.insert(queue.into(), cap);
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.launcher_id.is_empty() {
            anyhow::bail!("launcher_id cannot be empty");
        }

        if self.max_running == 0 {
            anyhow::bail!("max_running must be greater than 0");
        }

        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be greater than 0");
        }

        if self.workers == 0 {
            anyhow::bail!("workers must be greater than 0");
        }

        if self.pass_timeout.as_secs() == 0 {
            anyhow::bail!("pass_timeout must be greater than 0");
        }

        if self.claim_lease.as_secs() == 0 {
            anyhow::bail!("claim_lease must be greater than 0");
        }

        for (queue, cap) in &self.queue_caps {
            if *cap == 0 {
                anyhow::bail!("queue cap for {} must be greater than 0", queue);
            }
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(format!("gantry-{}", uuid::Uuid::new_v4()))
    }
}

/// Reads and parses one optional environment variable.
fn read_env<T: std::str::FromStr>(name: &str) -> anyhow::Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} has invalid value {:?}", name, raw)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_running, 100);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.unknown_grace, 2);
        assert_eq!(config.workers, 4);
        assert!(config.cancel_obsolete);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        // Valid config should pass
        assert!(config.validate().is_ok());

        // Empty launcher_id should fail
        config.launcher_id = String::new();
        assert!(config.validate().is_err());

        config.launcher_id = "test".to_string();

        // Zero caps should fail
        config.max_running = 0;
        assert!(config.validate().is_err());

        config.max_running = 10;
        assert!(config.validate().is_ok());

        config.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_queue_cap() {
        let config = EngineConfig::default()
            .with_queue_cap("gpu", 4)
            .with_queue_cap("highmem", 2);

        assert_eq!(config.queue_caps.get("gpu"), Some(&4));
        assert_eq!(config.queue_caps.get("highmem"), Some(&2));
        assert!(config.validate().is_ok());

        let bad = EngineConfig::default().with_queue_cap("gpu", 0);
        assert!(bad.validate().is_err());
    }
}
