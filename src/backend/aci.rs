//! Azure Container Instances backend
//!
//! Talks to the Resource Manager REST API directly. Every measurement job is a
//! container group with a single `measure` container and restart policy
//! `Never`, so the group runs once and stays around in the terminated state
//! until it is deleted.
//!
//! The bearer token is taken as given; acquiring and refreshing it is the
//! caller's business.

use super::{BackendError, JobBackend, JobHandle, JobPhase};
use crate::config::ProbeConfig;
use crate::job::{JobSpec, CONTAINER_NAME};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

pub const API_VERSION: &str = "2023-05-01";

/// Timeout for a single management API request
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct AciConfig {
    /// Management endpoint, e.g. `https://management.azure.com`
    pub base_url: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub access_token: String,
}

impl AciConfig {
    pub fn from_probe_config(config: &ProbeConfig) -> Self {
        Self {
            base_url: config.management_url.clone(),
            subscription_id: config.subscription_id.clone(),
            resource_group: config.resource_group.clone(),
            access_token: config.access_token.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LogsResponse {
    #[serde(default)]
    content: Option<String>,
}

pub struct AciBackend {
    client: Client,
    config: AciConfig,
}

impl AciBackend {
    pub fn new(config: AciConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, config })
    }

    fn group_url(&self, name: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ContainerInstance/containerGroups/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.subscription_id,
            self.config.resource_group,
            name
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.config.access_token)
            .query(&[("api-version", API_VERSION)])
    }

    /// Turn non-2xx responses into `BackendError::Status`
    async fn check(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Container group body for a one-shot measurement job
fn container_group_body(spec: &JobSpec) -> Value {
    json!({
        "location": spec.region.as_str(),
        "properties": {
            "osType": "Linux",
            "restartPolicy": "Never",
            "containers": [{
                "name": CONTAINER_NAME,
                "properties": {
                    "image": spec.image,
                    "command": spec.command,
                    "resources": {
                        "requests": {
                            "cpu": spec.resources.cpu,
                            "memoryInGB": spec.resources.memory_gb,
                        }
                    }
                }
            }]
        }
    })
}

/// Extract the current container state; no instance view yet means pending.
///
/// A group whose provisioning failed never gets an instance view, so that is
/// reported as an error instead.
fn phase_from_group(name: &str, group: &Value) -> Result<JobPhase, BackendError> {
    let provisioning = group
        .pointer("/properties/provisioningState")
        .and_then(Value::as_str)
        .unwrap_or("");
    if provisioning.eq_ignore_ascii_case("Failed") {
        let reason = group
            .pointer("/properties/instanceView/events/0/message")
            .and_then(Value::as_str)
            .unwrap_or("provisioningState is Failed");
        return Err(BackendError::Provisioning {
            name: name.to_string(),
            reason: reason.to_string(),
        });
    }

    let state = group
        .pointer("/properties/containers/0/properties/instanceView/currentState/state")
        .and_then(Value::as_str)
        .unwrap_or("");
    Ok(JobPhase::from_state(state))
}

#[async_trait]
impl JobBackend for AciBackend {
    fn name(&self) -> &'static str {
        "aci"
    }

    async fn create(&self, spec: &JobSpec) -> Result<(), BackendError> {
        info!(
            "Creating container group {} in region {} for URL {}",
            spec.name, spec.region, spec.target
        );

        let response = self
            .authorized(self.client.put(self.group_url(&spec.name)))
            .json(&container_group_body(spec))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn state(&self, job: &JobHandle) -> Result<JobPhase, BackendError> {
        let response = self
            .authorized(self.client.get(self.group_url(&job.name)))
            .send()
            .await?;
        let group: Value = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        let phase = phase_from_group(&job.name, &group)?;
        debug!("Container group {} state: {:?}", job.name, phase);
        Ok(phase)
    }

    async fn fetch_log(&self, job: &JobHandle) -> Result<String, BackendError> {
        let url = format!("{}/containers/{}/logs", self.group_url(&job.name), CONTAINER_NAME);
        let response = self.authorized(self.client.get(url)).send().await?;
        let logs: LogsResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        Ok(logs.content.unwrap_or_default())
    }

    async fn delete(&self, job: &JobHandle) -> Result<(), BackendError> {
        let response = self
            .authorized(self.client.delete(self.group_url(&job.name)))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("Container group {} already gone", job.name);
            return Ok(());
        }
        Self::check(response).await?;
        info!("Deleted container group {}", job.name);
        Ok(())
    }
}
