//! Process Configuration
//!
//! Everything is read from environment variables. Only the subscription id is
//! mandatory; all other settings fall back to defaults:
//! - `AZURE_SUBSCRIPTION_ID` (required)
//! - `AZURE_RESOURCE_GROUP`, `MEASURE_IMAGE`, `MEASURE_COMMAND`
//! - `WEBPAGES_CONFIG_PATH`
//! - `MEASUREMENT_INTERVAL_SECS`, `JOB_TIMEOUT_SECS`, `JOB_POLL_INTERVAL_SECS`
//! - `MAX_CONCURRENT_PROBES`, `METRICS_ADDR`
//! - `PROBE_BACKEND` (`aci` or `docker`), `AZURE_ACCESS_TOKEN`, `AZURE_MANAGEMENT_URL`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_RESOURCE_GROUP: &str = "my-resource-group";
pub const DEFAULT_MEASURE_IMAGE: &str = "myregistry.azurecr.io/webpage-measure:latest";
pub const DEFAULT_MEASURE_COMMAND: &str = "measure --url";
pub const DEFAULT_TARGETS_PATH: &str = "/etc/webpages/webpages.txt";
pub const DEFAULT_MANAGEMENT_URL: &str = "https://management.azure.com";
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8000";

/// Delay between measurement cycles
pub const DEFAULT_INTERVAL_SECS: u64 = 15;
/// Budget for a single job, counted from submission
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Which remote job backend runs the measurement containers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Azure Container Instances via the Resource Manager REST API
    Aci,
    /// Local Docker daemon, region is only carried as a label
    Docker,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "aci" | "azure" => Ok(BackendKind::Aci),
            "docker" | "local" => Ok(BackendKind::Docker),
            other => Err(format!("unknown backend '{}', expected aci or docker", other)),
        }
    }
}

/// Complete process configuration
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub subscription_id: String,
    pub resource_group: String,
    /// Image of the measurement workload
    pub measure_image: String,
    /// Command prefix; the target URL is appended as the last argument
    pub measure_command: Vec<String>,
    /// File with one target URL per line
    pub targets_path: PathBuf,
    pub interval: Duration,
    pub job_timeout: Duration,
    pub poll_interval: Duration,
    /// Probes in flight within one cycle (1 = sequential)
    pub max_concurrent_probes: usize,
    pub metrics_addr: SocketAddr,
    pub backend: BackendKind,
    /// Opaque bearer credential for the management API
    pub access_token: String,
    pub management_url: String,
}

impl ProbeConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let subscription_id = get("AZURE_SUBSCRIPTION_ID")
            .ok_or(ConfigError::Missing("AZURE_SUBSCRIPTION_ID"))?;

        let measure_command: Vec<String> = get("MEASURE_COMMAND")
            .unwrap_or_else(|| DEFAULT_MEASURE_COMMAND.to_string())
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let interval = Duration::from_secs(parse_nonzero(
            "MEASUREMENT_INTERVAL_SECS",
            get("MEASUREMENT_INTERVAL_SECS"),
            DEFAULT_INTERVAL_SECS,
        )?);
        let job_timeout = Duration::from_secs(parse_nonzero(
            "JOB_TIMEOUT_SECS",
            get("JOB_TIMEOUT_SECS"),
            DEFAULT_JOB_TIMEOUT_SECS,
        )?);
        let poll_interval = Duration::from_secs(parse_nonzero(
            "JOB_POLL_INTERVAL_SECS",
            get("JOB_POLL_INTERVAL_SECS"),
            DEFAULT_POLL_INTERVAL_SECS,
        )?);
        let max_concurrent_probes = parse_nonzero(
            "MAX_CONCURRENT_PROBES",
            get("MAX_CONCURRENT_PROBES"),
            1,
        )? as usize;

        let metrics_addr = parse_value(
            "METRICS_ADDR",
            get("METRICS_ADDR").unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string()),
        )?;
        let backend = parse_value(
            "PROBE_BACKEND",
            get("PROBE_BACKEND").unwrap_or_else(|| "aci".to_string()),
        )?;

        Ok(Self {
            subscription_id,
            resource_group: get("AZURE_RESOURCE_GROUP")
                .unwrap_or_else(|| DEFAULT_RESOURCE_GROUP.to_string()),
            measure_image: get("MEASURE_IMAGE")
                .unwrap_or_else(|| DEFAULT_MEASURE_IMAGE.to_string()),
            measure_command,
            targets_path: PathBuf::from(
                get("WEBPAGES_CONFIG_PATH").unwrap_or_else(|| DEFAULT_TARGETS_PATH.to_string()),
            ),
            interval,
            job_timeout,
            poll_interval,
            max_concurrent_probes,
            metrics_addr,
            backend,
            access_token: get("AZURE_ACCESS_TOKEN").unwrap_or_default(),
            management_url: get("AZURE_MANAGEMENT_URL")
                .unwrap_or_else(|| DEFAULT_MANAGEMENT_URL.to_string()),
        })
    }

    /// Worst-case wall-clock length of one pass over `targets`
    pub fn worst_case_cycle(&self, targets: usize) -> Duration {
        let lanes = self.max_concurrent_probes.max(1);
        let rounds = targets.div_ceil(lanes) as u32;
        self.job_timeout * rounds
    }
}

fn parse_value<T>(key: &'static str, raw: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason: e.to_string(),
    })
}

fn parse_nonzero(key: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let value: u64 = parse_value(key, raw.clone())?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
