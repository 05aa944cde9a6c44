//! Measurement Cycle Scheduler
//!
//! Every cycle re-reads the target file, probes each target from a freshly
//! drawn random region, then sleeps for the configured interval. Targets are
//! probed in file order; with `max_concurrent_probes > 1` up to that many
//! attempts run at once and their outcomes are still reported in file order.
//!
//! A sequential cycle can take up to `targets × job_timeout`, which delays the
//! next cycle. Shutdown is only honoured between cycles so in-flight jobs are
//! always cleaned up.

use crate::orchestrator::{ProbeOutcome, Prober};
use crate::region::Region;
use crate::targets::load_targets;
use crate::job::JobState;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub targets_path: PathBuf,
    /// Sleep between the end of one cycle and the start of the next
    pub interval: Duration,
    pub max_concurrent_probes: usize,
}

impl SchedulerConfig {
    pub fn from_probe_config(config: &crate::config::ProbeConfig) -> Self {
        Self {
            targets_path: config.targets_path.clone(),
            interval: config.interval,
            max_concurrent_probes: config.max_concurrent_probes,
        }
    }
}

/// Summary of one pass over all targets
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub targets: usize,
    pub recorded: usize,
    pub timed_out: usize,
    pub errors: usize,
    /// Jobs that terminated without a parsable value
    pub unparsed: usize,
}

impl CycleReport {
    fn from_outcomes(started_at: DateTime<Utc>, elapsed: Duration, outcomes: &[ProbeOutcome]) -> Self {
        let mut report = Self {
            started_at: Some(started_at),
            duration_ms: elapsed.as_millis() as u64,
            targets: outcomes.len(),
            ..Default::default()
        };
        for outcome in outcomes {
            if outcome.is_success() {
                report.recorded += 1;
                continue;
            }
            match outcome.state {
                JobState::TimedOut => report.timed_out += 1,
                JobState::Terminated => report.unparsed += 1,
                _ => report.errors += 1,
            }
        }
        report
    }
}

/// Scheduler progress, readable from the HTTP server
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatus {
    pub cycles_completed: u64,
    pub last_cycle: Option<CycleReport>,
}

pub struct CycleScheduler {
    prober: Arc<Prober>,
    config: SchedulerConfig,
    status: Arc<RwLock<SchedulerStatus>>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Handle returned by `spawn_scheduler` for graceful shutdown
pub struct SchedulerHandle {
    pub task_handle: tokio::task::JoinHandle<()>,
    pub shutdown_tx: watch::Sender<bool>,
    pub status: Arc<RwLock<SchedulerStatus>>,
}

impl SchedulerHandle {
    /// Signal the scheduler to stop after the current cycle
    pub fn shutdown(&self) {
        if let Err(e) = self.shutdown_tx.send(true) {
            warn!("Failed to send shutdown signal to scheduler: {}", e);
        }
    }
}

impl CycleScheduler {
    pub fn new(
        prober: Arc<Prober>,
        config: SchedulerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            prober,
            config,
            status: Arc::new(RwLock::new(SchedulerStatus::default())),
            shutdown_rx,
        }
    }

    pub fn status(&self) -> Arc<RwLock<SchedulerStatus>> {
        self.status.clone()
    }

    /// Probe every target once
    pub async fn run_cycle(&self) -> Vec<ProbeOutcome> {
        let targets = load_targets(&self.config.targets_path).await;
        if targets.is_empty() {
            error!("No webpages defined to monitor.");
            return Vec::new();
        }

        let lanes = self.config.max_concurrent_probes.max(1);
        if lanes == 1 {
            let mut outcomes = Vec::with_capacity(targets.len());
            for target in &targets {
                let region = Region::random();
                outcomes.push(self.prober.probe_once(target, region).await);
            }
            return outcomes;
        }

        let prober = &self.prober;
        stream::iter(targets)
            .map(|target| {
                let region = Region::random();
                async move { prober.probe_once(&target, region).await }
            })
            .buffered(lanes)
            .collect()
            .await
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Run cycles until shutdown is signalled
    pub async fn run(mut self) {
        info!(
            "Measurement scheduler started (targets={}, interval={}s, concurrency={})",
            self.config.targets_path.display(),
            self.config.interval.as_secs(),
            self.config.max_concurrent_probes
        );

        loop {
            if self.is_shutdown() {
                break;
            }

            info!("Starting new measurement cycle");
            let started_at = Utc::now();
            let start = Instant::now();
            let outcomes = self.run_cycle().await;
            let report = CycleReport::from_outcomes(started_at, start.elapsed(), &outcomes);

            info!(
                "Measurement cycle completed: {}/{} recorded, {} timed out, {} errors, {} unparsed ({}ms). Sleeping for {} seconds.",
                report.recorded,
                report.targets,
                report.timed_out,
                report.errors,
                report.unparsed,
                report.duration_ms,
                self.config.interval.as_secs()
            );
            {
                let mut status = self.status.write();
                status.cycles_completed += 1;
                status.last_cycle = Some(report);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Measurement scheduler stopped");
    }
}

/// Start the scheduler in the background
pub fn spawn_scheduler(prober: Arc<Prober>, config: SchedulerConfig) -> SchedulerHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = CycleScheduler::new(prober, config, shutdown_rx);
    let status = scheduler.status();
    let task_handle = tokio::spawn(scheduler.run());

    SchedulerHandle {
        task_handle,
        shutdown_tx,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{FailAt, Script, ScriptedBackend};
    use crate::metrics::MetricSink;
    use crate::orchestrator::ProbeSettings;
    use std::io::Write;

    fn settings() -> ProbeSettings {
        ProbeSettings {
            poll_interval: Duration::from_millis(1),
            job_timeout: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn targets_file(targets: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for target in targets {
            writeln!(file, "{}", target).unwrap();
        }
        file
    }

    fn scheduler(
        backend: Arc<ScriptedBackend>,
        path: PathBuf,
        lanes: usize,
    ) -> (CycleScheduler, watch::Sender<bool>) {
        let prober = Arc::new(Prober::new(backend, MetricSink::new().unwrap(), settings()));
        let (tx, rx) = watch::channel(false);
        let config = SchedulerConfig {
            targets_path: path,
            interval: Duration::from_millis(5),
            max_concurrent_probes: lanes,
        };
        (CycleScheduler::new(prober, config, rx), tx)
    }

    fn outcome(state: JobState, value: Option<f64>) -> ProbeOutcome {
        ProbeOutcome {
            target: "https://a.example".to_string(),
            region: Region::EastUs,
            state,
            value,
            timestamp: value.map(|_| "t".to_string()),
        }
    }

    #[test]
    fn test_report_classifies_outcomes() {
        let outcomes = [
            outcome(JobState::Terminated, Some(12.0)),
            outcome(JobState::Terminated, None),
            outcome(JobState::TimedOut, None),
            outcome(JobState::Error, None),
            outcome(JobState::Error, None),
        ];
        let report = CycleReport::from_outcomes(Utc::now(), Duration::from_millis(7), &outcomes);
        assert_eq!(report.targets, 5);
        assert_eq!(report.recorded, 1);
        assert_eq!(report.unparsed, 1);
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.errors, 2);
        assert_eq!(report.duration_ms, 7);
    }

    #[tokio::test]
    async fn test_end_to_end_two_targets() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script("https://a.example", Script::finishes(2, "42.0"));
        backend.script("https://b.example", Script::finishes(2, "memory warning\n58.3"));
        let file = targets_file(&["https://a.example", "https://b.example"]);
        let (scheduler, _tx) = scheduler(backend.clone(), file.path().to_path_buf(), 1);

        let outcomes = scheduler.run_cycle().await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].target, "https://a.example");
        assert_eq!(outcomes[1].target, "https://b.example");

        let mut samples = scheduler.prober.sink().samples();
        samples.sort_by(|a, b| a.target.cmp(&b.target));
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].value, 42.0);
        assert_eq!(samples[1].value, 58.3);
        for (sample, outcome) in samples.iter().zip(&outcomes) {
            assert_eq!(sample.region, outcome.region.as_str());
            assert!(!sample.timestamp.is_empty());
        }

        assert_eq!(backend.create_calls(), 2);
        assert_eq!(backend.delete_calls(), 2);
    }

    #[tokio::test]
    async fn test_cycle_cleans_up_every_job_under_failures() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script("https://create.example", Script::failing(FailAt::Create));
        backend.script("https://state.example", Script::failing(FailAt::State));
        backend.script("https://log.example", Script::failing(FailAt::FetchLog));
        backend.script("https://delete.example", Script::failing(FailAt::Delete));
        backend.script("https://hang.example", Script::hangs());
        backend.script("https://noise.example", Script::finishes(1, "stack trace\n"));
        backend.script("https://ok.example", Script::finishes(1, "10.5"));
        let targets = [
            "https://create.example",
            "https://state.example",
            "https://log.example",
            "https://delete.example",
            "https://hang.example",
            "https://noise.example",
            "https://ok.example",
        ];
        let file = targets_file(&targets);

        for lanes in [1, 3] {
            let (scheduler, _tx) = scheduler(backend.clone(), file.path().to_path_buf(), lanes);
            let before_create = backend.create_calls();
            let before_delete = backend.delete_calls();

            let outcomes = scheduler.run_cycle().await;

            assert_eq!(backend.create_calls() - before_create, targets.len());
            assert_eq!(backend.delete_calls() - before_delete, targets.len());

            let order: Vec<&str> = outcomes.iter().map(|o| o.target.as_str()).collect();
            assert_eq!(order, targets);

            let report = CycleReport::from_outcomes(Utc::now(), Duration::ZERO, &outcomes);
            assert_eq!(report.targets, 7);
            assert_eq!(report.recorded, 2);
            assert_eq!(report.timed_out, 1);
            assert_eq!(report.unparsed, 1);
            assert_eq!(report.errors, 3);

            // delete.example and ok.example
            assert_eq!(scheduler.prober.sink().len(), 2);
        }
    }

    #[tokio::test]
    async fn test_unreadable_target_file_is_empty_cycle() {
        let backend = Arc::new(ScriptedBackend::new());
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, _tx) = scheduler(backend.clone(), dir.path().join("nope.txt"), 1);

        let outcomes = scheduler.run_cycle().await;

        assert!(outcomes.is_empty());
        assert_eq!(backend.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_run_loops_until_shutdown() {
        let backend = Arc::new(ScriptedBackend::new());
        let file = targets_file(&["https://a.example"]);
        let (scheduler, tx) = scheduler(backend.clone(), file.path().to_path_buf(), 1);
        let status = scheduler.status();
        let task = tokio::spawn(scheduler.run());

        tokio::time::timeout(Duration::from_secs(5), async {
            while status.read().cycles_completed < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        let status = status.read();
        assert!(status.cycles_completed >= 3);
        assert_eq!(status.last_cycle.as_ref().unwrap().recorded, 1);
        // Samples persist across cycles, one series per completion timestamp
        assert_eq!(backend.create_calls(), backend.delete_calls());
    }

    #[tokio::test]
    async fn test_spawned_scheduler_shutdown() {
        let backend = Arc::new(ScriptedBackend::new());
        let file = targets_file(&["https://a.example", "https://b.example"]);
        let prober = Arc::new(Prober::new(backend.clone(), MetricSink::new().unwrap(), settings()));
        let handle = spawn_scheduler(
            prober.clone(),
            SchedulerConfig {
                targets_path: file.path().to_path_buf(),
                interval: Duration::from_secs(3600),
                max_concurrent_probes: 2,
            },
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.status.read().cycles_completed < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // Interrupts the hour-long sleep
        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle.task_handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(backend.create_calls(), 2);
        assert_eq!(backend.delete_calls(), 2);
        assert_eq!(prober.sink().len(), 2);
    }
}
