//! Remote job backends.
//!
//! A backend provisions one-shot, single-container jobs in a region, reports
//! their phase, returns their combined output and deletes them. The
//! orchestrator never relies on anything else.

pub mod aci;
pub mod docker;

#[cfg(test)]
pub(crate) mod testing;

use crate::config::{BackendKind, ProbeConfig};
use crate::job::JobSpec;
use crate::region::Region;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use aci::{AciBackend, AciConfig};
pub use docker::DockerBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
    #[error("docker error: {0}")]
    Docker(String),
    /// The backend gave up on the job before it could run
    #[error("job {name} failed to provision: {reason}")]
    Provisioning { name: String, reason: String },
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        BackendError::Transport(e.to_string())
    }
}

impl From<bollard::errors::Error> for BackendError {
    fn from(e: bollard::errors::Error) -> Self {
        BackendError::Docker(e.to_string())
    }
}

/// Reference to a job on the backend.
///
/// Exists before the job is submitted, so deletion can always be attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub name: String,
    pub region: Region,
}

impl From<&JobSpec> for JobHandle {
    fn from(spec: &JobSpec) -> Self {
        Self {
            name: spec.name.clone(),
            region: spec.region,
        }
    }
}

/// Execution phase reported by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPhase {
    Pending,
    Running,
    Terminated,
    /// State string the backend reported but we do not recognise
    Unknown(String),
}

impl JobPhase {
    /// Map a backend state string; `terminated` and `exited` end the job
    pub fn from_state(state: &str) -> Self {
        match state.trim().to_lowercase().as_str() {
            "terminated" | "exited" | "dead" => JobPhase::Terminated,
            "" | "pending" | "waiting" | "created" => JobPhase::Pending,
            "running" | "restarting" | "paused" => JobPhase::Running,
            other => JobPhase::Unknown(other.to_string()),
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, JobPhase::Terminated)
    }
}

#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Provision and start the job. Returns once accepted, not once finished.
    async fn create(&self, spec: &JobSpec) -> Result<(), BackendError>;

    async fn state(&self, job: &JobHandle) -> Result<JobPhase, BackendError>;

    /// Combined stdout/stderr written so far
    async fn fetch_log(&self, job: &JobHandle) -> Result<String, BackendError>;

    /// Tear the job down. Deleting a job that does not exist is not an error.
    async fn delete(&self, job: &JobHandle) -> Result<(), BackendError>;
}

/// Build the backend selected in `config`
pub async fn create_backend(config: &ProbeConfig) -> anyhow::Result<Arc<dyn JobBackend>> {
    match config.backend {
        BackendKind::Aci => {
            let backend = AciBackend::new(AciConfig::from_probe_config(config))?;
            Ok(Arc::new(backend))
        }
        BackendKind::Docker => {
            let backend = DockerBackend::new().await?;
            Ok(Arc::new(backend))
        }
    }
}
