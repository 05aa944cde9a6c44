//! Response-time gauge exposed for Prometheus scraping
//!
//! The registry lives for the whole process: created at startup, written by
//! the orchestrator and read by the `/metrics` handler. Samples are only ever
//! added or overwritten.
//!
//! The completion timestamp is one of the labels, so every successful probe
//! creates a new series and the series count grows without bound.

use chrono::{DateTime, SecondsFormat, Utc};
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use serde::Serialize;
use std::sync::Arc;

pub const METRIC_NAME: &str = "webpage_response_time_ms";
pub const METRIC_HELP: &str = "Response time in milliseconds";
pub const LABELS: [&str; 3] = ["target", "region", "timestamp"];

/// One recorded measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    pub target: String,
    pub region: String,
    pub timestamp: String,
    pub value: f64,
}

/// Format a completion time as used in the `timestamp` label
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Shared, thread-safe gauge registry
#[derive(Clone)]
pub struct MetricSink {
    registry: Arc<Registry>,
    response_time: GaugeVec,
}

impl MetricSink {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let response_time = GaugeVec::new(Opts::new(METRIC_NAME, METRIC_HELP), &LABELS)?;
        registry.register(Box::new(response_time.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            response_time,
        })
    }

    pub fn record(&self, sample: &MetricSample) {
        self.response_time
            .with_label_values(&[
                sample.target.as_str(),
                sample.region.as_str(),
                sample.timestamp.as_str(),
            ])
            .set(sample.value);
    }

    /// All recorded samples, in registry order
    pub fn samples(&self) -> Vec<MetricSample> {
        let mut samples = Vec::new();
        for family in self.registry.gather() {
            if family.get_name() != METRIC_NAME {
                continue;
            }
            for metric in family.get_metric() {
                let label = |name: &str| {
                    metric
                        .get_label()
                        .iter()
                        .find(|l| l.get_name() == name)
                        .map(|l| l.get_value().to_string())
                        .unwrap_or_default()
                };
                samples.push(MetricSample {
                    target: label("target"),
                    region: label("region"),
                    timestamp: label("timestamp"),
                    value: metric.get_gauge().get_value(),
                });
            }
        }
        samples
    }

    pub fn len(&self) -> usize {
        self.samples().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Prometheus text exposition of the registry
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| prometheus::Error::Msg(format!("metrics output is not UTF-8: {}", e)))
    }
}
