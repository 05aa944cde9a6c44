//! Measurement job definitions.

use crate::region::Region;
use serde::Serialize;
use std::fmt;

/// Name of the single container inside every job
pub const CONTAINER_NAME: &str = "measure";

/// Prefix of generated job names
pub const JOB_NAME_PREFIX: &str = "measure";

/// Generate a fresh job name, e.g. `measure-1f0c9a2b`
pub fn generate_job_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", JOB_NAME_PREFIX, &id[..8])
}

/// CPU and memory requested for the measurement container
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceShape {
    pub cpu: f64,
    pub memory_gb: f64,
}

impl Default for ResourceShape {
    fn default() -> Self {
        Self {
            cpu: 0.5,
            memory_gb: 0.5,
        }
    }
}

impl ResourceShape {
    pub fn memory_bytes(&self) -> i64 {
        (self.memory_gb * 1024.0 * 1024.0 * 1024.0) as i64
    }

    pub fn nano_cpus(&self) -> i64 {
        (self.cpu * 1_000_000_000.0) as i64
    }
}

/// Everything a backend needs to provision one measurement job
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    pub region: Region,
    pub target: String,
    pub image: String,
    /// Full command line, target URL included
    pub command: Vec<String>,
    pub resources: ResourceShape,
}

impl JobSpec {
    /// Build a spec for `target`; `command_prefix` gets the URL appended
    pub fn new(
        target: &str,
        region: Region,
        image: &str,
        command_prefix: &[String],
        resources: ResourceShape,
    ) -> Self {
        let mut command = command_prefix.to_vec();
        command.push(target.to_string());

        Self {
            name: generate_job_name(),
            region,
            target: target.to_string(),
            image: image.to_string(),
            command,
            resources,
        }
    }
}

/// Lifecycle of a job as seen by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Running,
    /// The container finished on its own
    Terminated,
    /// The job did not finish within its budget
    TimedOut,
    /// A backend call failed
    Error,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Created => "created",
            JobState::Running => "running",
            JobState::Terminated => "terminated",
            JobState::TimedOut => "timed_out",
            JobState::Error => "error",
        };
        f.write_str(s)
    }
}
