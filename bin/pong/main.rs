//! aci-pong
//!
//! Runs the measurement scheduler and serves the response-time gauge for
//! Prometheus. All configuration comes from environment variables.

use aci_pong::{
    bind_metrics_listener, create_backend, load_targets, run_metrics_server, spawn_scheduler,
    MetricSink, ProbeConfig, ProbeSettings, Prober, SchedulerConfig,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("aci_pong=info".parse()?)
                .add_directive("warn".parse()?),
        )
        .init();

    let config = ProbeConfig::from_env().context("Invalid configuration")?;

    info!("Starting aci-pong");
    info!("  Backend: {:?}", config.backend);
    info!("  Resource group: {}", config.resource_group);
    info!("  Image: {}", config.measure_image);
    info!("  Targets: {}", config.targets_path.display());
    info!(
        "  Interval: {}s, job timeout: {}s, poll: {}s, concurrency: {}",
        config.interval.as_secs(),
        config.job_timeout.as_secs(),
        config.poll_interval.as_secs(),
        config.max_concurrent_probes
    );
    let initial_targets = load_targets(&config.targets_path).await.len();
    info!(
        "  {} targets, {} at a time; a cycle may take up to {}s",
        initial_targets,
        config.max_concurrent_probes,
        config.worst_case_cycle(initial_targets).as_secs()
    );

    // Bind before any job is submitted
    let listener = bind_metrics_listener(config.metrics_addr).await?;

    let sink = MetricSink::new().context("Failed to create metrics registry")?;
    let backend = create_backend(&config).await?;
    let prober = Arc::new(Prober::new(
        backend,
        sink.clone(),
        ProbeSettings::from_config(&config),
    ));

    let handle = spawn_scheduler(prober, SchedulerConfig::from_probe_config(&config));

    let server = tokio::spawn(run_metrics_server(
        listener,
        sink,
        handle.status.clone(),
    ));

    let server_result = tokio::select! {
        result = server => {
            match result {
                Ok(Ok(())) => Err(anyhow::anyhow!("Metrics server exited")),
                Ok(Err(e)) => Err(e.context("Metrics server failed")),
                Err(e) => Err(anyhow::Error::new(e).context("Metrics server task panicked")),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested, finishing current cycle");
            Ok(())
        }
    };

    if let Err(e) = &server_result {
        error!("{:#}", e);
    }

    handle.shutdown();
    if let Err(e) = handle.task_handle.await {
        error!("Scheduler task failed: {}", e);
    }

    server_result
}
