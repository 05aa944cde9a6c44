//! Probe Orchestrator
//!
//! Runs one end-to-end probe attempt for one target:
//!
//! ```text
//! Created --(submit ack)--> Running --(terminal state observed)--> Terminated
//! Running --(budget exceeded)--> TimedOut
//! any state --(backend call fails)--> Error
//! ```
//!
//! The job is deleted exactly once on every path, including when submission
//! itself failed. Nothing that goes wrong inside an attempt escapes it: the
//! caller only ever sees a `ProbeOutcome`.

use crate::backend::{BackendError, JobBackend, JobHandle};
use crate::config::ProbeConfig;
use crate::job::{JobSpec, JobState, ResourceShape};
use crate::metrics::{format_timestamp, MetricSample, MetricSink};
use crate::parser::parse_response_time;
use crate::region::Region;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub image: String,
    /// Command prefix; the target URL is appended
    pub command: Vec<String>,
    pub resources: ResourceShape,
    pub poll_interval: Duration,
    /// Budget from submission until the job must have terminated
    pub job_timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            image: crate::config::DEFAULT_MEASURE_IMAGE.to_string(),
            command: vec!["measure".to_string(), "--url".to_string()],
            resources: ResourceShape::default(),
            poll_interval: Duration::from_secs(crate::config::DEFAULT_POLL_INTERVAL_SECS),
            job_timeout: Duration::from_secs(crate::config::DEFAULT_JOB_TIMEOUT_SECS),
        }
    }
}

impl ProbeSettings {
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self {
            image: config.measure_image.clone(),
            command: config.measure_command.clone(),
            resources: ResourceShape::default(),
            poll_interval: config.poll_interval,
            job_timeout: config.job_timeout,
        }
    }
}

/// Why an attempt produced no value
#[derive(Debug, Error)]
enum ProbeError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("job did not finish within {0:?}")]
    Timeout(Duration),
    #[error("no response time found in job output")]
    NoValue,
}

impl ProbeError {
    fn final_state(&self) -> JobState {
        match self {
            ProbeError::Backend(_) => JobState::Error,
            ProbeError::Timeout(_) => JobState::TimedOut,
            ProbeError::NoValue => JobState::Terminated,
        }
    }
}

/// Result of one probe attempt
#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    pub target: String,
    pub region: Region,
    pub state: JobState,
    /// Milliseconds, absent on any failure
    pub value: Option<f64>,
    /// Completion timestamp of the recorded sample
    pub timestamp: Option<String>,
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        self.value.is_some()
    }
}

/// A job owned by the current attempt. `release` consumes it, so it is
/// deleted at most once, and `probe_once` calls it on every path.
struct ProbeJob<'a> {
    backend: &'a dyn JobBackend,
    spec: JobSpec,
    handle: JobHandle,
    state: JobState,
}

impl<'a> ProbeJob<'a> {
    fn new(backend: &'a dyn JobBackend, spec: JobSpec) -> Self {
        let handle = JobHandle::from(&spec);
        Self {
            backend,
            spec,
            handle,
            state: JobState::Created,
        }
    }

    async fn submit(&mut self) -> Result<(), BackendError> {
        self.backend.create(&self.spec).await?;
        self.state = JobState::Running;
        Ok(())
    }

    /// Poll at a fixed cadence until the backend reports termination
    async fn wait_terminated(&self, every: Duration) -> Result<(), BackendError> {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let phase = self.backend.state(&self.handle).await?;
            debug!("Container {} state: {:?}", self.handle.name, phase);
            if phase.is_terminated() {
                return Ok(());
            }
        }
    }

    async fn release(self) {
        match self.backend.delete(&self.handle).await {
            Ok(()) => debug!("Released job {} ({})", self.handle.name, self.state),
            Err(e) => error!(
                "Cleanup error for container group {}: {}",
                self.handle.name, e
            ),
        }
    }
}

/// Drives measurement jobs and records their results
pub struct Prober {
    backend: Arc<dyn JobBackend>,
    sink: MetricSink,
    settings: ProbeSettings,
}

impl Prober {
    pub fn new(backend: Arc<dyn JobBackend>, sink: MetricSink, settings: ProbeSettings) -> Self {
        Self {
            backend,
            sink,
            settings,
        }
    }

    pub fn sink(&self) -> &MetricSink {
        &self.sink
    }

    /// Run one probe attempt for `target` from `region`
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub async fn probe_once(&self, target: &str, region: Region) -> ProbeOutcome {
        let spec = JobSpec::new(
            target,
            region,
            &self.settings.image,
            &self.settings.command,
            self.settings.resources,
        );
        let mut job = ProbeJob::new(self.backend.as_ref(), spec);

        let result = self.drive(&mut job).await;
        let outcome = match result {
            Ok(sample) => {
                job.state = JobState::Terminated;
                ProbeOutcome {
                    target: target.to_string(),
                    region,
                    state: job.state,
                    value: Some(sample.value),
                    timestamp: Some(sample.timestamp),
                }
            }
            Err(e) => {
                job.state = e.final_state();
                match &e {
                    ProbeError::Timeout(_) => error!(
                        "Timeout waiting for container group {} to finish.",
                        job.handle.name
                    ),
                    ProbeError::NoValue => error!(
                        "Could not parse response time for {} in container group {}",
                        target, job.handle.name
                    ),
                    ProbeError::Backend(e) => error!(
                        "Error running measurement for {} from region {}: {}",
                        target, region, e
                    ),
                }
                ProbeOutcome {
                    target: target.to_string(),
                    region,
                    state: job.state,
                    value: None,
                    timestamp: None,
                }
            }
        };

        job.release().await;
        outcome
    }

    async fn drive(&self, job: &mut ProbeJob<'_>) -> Result<MetricSample, ProbeError> {
        job.submit().await?;

        let budget = self.settings.job_timeout;
        match timeout(budget, job.wait_terminated(self.settings.poll_interval)).await {
            Ok(polled) => polled?,
            Err(_) => return Err(ProbeError::Timeout(budget)),
        }

        let log = job.backend.fetch_log(&job.handle).await?;
        let value = parse_response_time(&log).ok_or(ProbeError::NoValue)?;

        let sample = MetricSample {
            target: job.spec.target.clone(),
            region: job.spec.region.as_str().to_string(),
            timestamp: format_timestamp(Utc::now()),
            value,
        };
        info!(
            "Measured {}ms for {} from {}",
            value, sample.target, sample.region
        );
        self.sink.record(&sample);
        Ok(sample)
    }
}
