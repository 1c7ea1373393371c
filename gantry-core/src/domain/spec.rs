//! Job specs
//!
//! A `JobSpec` is what a spec builder produces for a context: the
//! resources the cluster job should request and the opaque command body
//! it should run. The engine never interprets the command.

use serde::{Deserialize, Serialize};

/// Resources requested for one cluster job.
///
/// Fixed at submission time; never mutated once a job is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Walltime limit in `HH:MM:SS` form (hours may exceed two digits).
    pub walltime: String,
    /// Memory limit in megabytes.
    pub memory_mb: u32,
    /// CPU cores per job.
    pub cpus: u32,
    /// Queue / partition to submit into; the scheduler default if absent.
    pub queue: Option<String>,
}

impl ResourceRequest {
    /// Parses the walltime field into a duration.
    ///
    /// Returns `None` when the field is not `HH:MM:SS`.
    pub fn walltime_duration(&self) -> Option<chrono::Duration> {
        let mut parts = self.walltime.split(':');
        let hours: i64 = parts.next()?.parse().ok()?;
        let minutes: i64 = parts.next()?.parse().ok()?;
        let seconds: i64 = parts.next()?.parse().ok()?;
        if parts.next().is_some() || minutes > 59 || seconds > 59 {
            return None;
        }
        Some(chrono::Duration::seconds(
            hours * 3600 + minutes * 60 + seconds,
        ))
    }
}

/// What one task should run, and with what resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub resources: ResourceRequest,
    /// Opaque script body handed to the cluster verbatim.
    pub command: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(walltime: &str) -> ResourceRequest {
        ResourceRequest {
            walltime: walltime.to_string(),
            memory_mb: 4096,
            cpus: 2,
            queue: None,
        }
    }

    #[test]
    fn test_walltime_parses() {
        let d = request("48:30:15").walltime_duration().unwrap();
        assert_eq!(d.num_seconds(), 48 * 3600 + 30 * 60 + 15);
        assert_eq!(
            request("120:00:00").walltime_duration().unwrap(),
            chrono::Duration::hours(120)
        );
    }

    #[test]
    fn test_walltime_rejects_malformed_values() {
        assert!(request("24:00").walltime_duration().is_none());
        assert!(request("1:2:3:4").walltime_duration().is_none());
        assert!(request("01:99:00").walltime_duration().is_none());
        assert!(request("soon").walltime_duration().is_none());
    }
}
