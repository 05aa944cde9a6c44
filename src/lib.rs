//! Synthetic webpage response-time monitoring.
//!
//! Each target URL is measured from a randomly chosen region by a one-shot
//! container job. The job prints the elapsed milliseconds, the orchestrator
//! parses that value out of the job log, records it as a Prometheus gauge
//! sample and deletes the job.
//!
//! ## Module Structure
//!
//! - `config`: process configuration from environment variables
//! - `region`: the static set of placement regions
//! - `targets`: target list file reader
//! - `job`: job naming, specs and lifecycle states
//! - `backend`: remote job backends (Azure Container Instances, Docker)
//! - `parser`: latency extraction from job logs
//! - `metrics`: gauge registry exposed for scraping
//! - `orchestrator`: one probe attempt per target
//! - `scheduler`: the measurement cycle loop
//! - `server`: `/metrics` HTTP endpoint

pub mod backend;
pub mod config;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod parser;
pub mod region;
pub mod scheduler;
pub mod server;
pub mod targets;

pub use backend::{create_backend, BackendError, JobBackend, JobHandle, JobPhase};
pub use config::{BackendKind, ConfigError, ProbeConfig};
pub use job::{JobSpec, JobState, ResourceShape};
pub use metrics::{MetricSample, MetricSink};
pub use orchestrator::{ProbeOutcome, ProbeSettings, Prober};
pub use parser::parse_response_time;
pub use region::Region;
pub use scheduler::{
    spawn_scheduler, CycleReport, CycleScheduler, SchedulerConfig, SchedulerHandle, SchedulerStatus,
};
pub use server::{bind_metrics_listener, run_metrics_server};
pub use targets::{load_targets, read_targets};
