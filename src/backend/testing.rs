//! Scripted in-memory backend for orchestrator and scheduler tests.

use super::{BackendError, JobBackend, JobHandle, JobPhase};
use crate::job::JobSpec;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Step at which a scripted job misbehaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Create,
    State,
    FetchLog,
    Delete,
}

/// How a job for a given target behaves
#[derive(Debug, Clone)]
pub struct Script {
    /// Polls reporting `Running` before `Terminated`; `None` never terminates
    pub polls_until_done: Option<u32>,
    pub log: String,
    pub fail_at: Option<FailAt>,
}

impl Script {
    pub fn finishes(polls: u32, log: &str) -> Self {
        Self {
            polls_until_done: Some(polls),
            log: log.to_string(),
            fail_at: None,
        }
    }

    pub fn hangs() -> Self {
        Self {
            polls_until_done: None,
            log: String::new(),
            fail_at: None,
        }
    }

    pub fn failing(step: FailAt) -> Self {
        Self {
            polls_until_done: Some(0),
            log: "1.0".to_string(),
            fail_at: Some(step),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    scripts: HashMap<String, Script>,
    /// job name -> target
    jobs: HashMap<String, String>,
    polls: HashMap<String, u32>,
    created: Vec<JobSpec>,
    deleted: Vec<String>,
    state_calls: usize,
    log_calls: usize,
}

/// Backend whose jobs follow per-target scripts
#[derive(Default)]
pub struct ScriptedBackend {
    inner: Mutex<Inner>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, target: &str, script: Script) {
        self.inner.lock().scripts.insert(target.to_string(), script);
    }

    pub fn created(&self) -> Vec<JobSpec> {
        self.inner.lock().created.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.inner.lock().created.len()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.inner.lock().deleted.clone()
    }

    pub fn delete_calls(&self) -> usize {
        self.inner.lock().deleted.len()
    }

    pub fn state_calls(&self) -> usize {
        self.inner.lock().state_calls
    }

    pub fn log_calls(&self) -> usize {
        self.inner.lock().log_calls
    }

    /// Script of a live job; unscripted targets finish at once with `1.0`
    fn script_for(inner: &Inner, name: &str) -> Option<Script> {
        let target = inner.jobs.get(name)?;
        Some(
            inner
                .scripts
                .get(target)
                .cloned()
                .unwrap_or_else(|| Script::finishes(0, "1.0")),
        )
    }
}

fn injected(step: &str) -> BackendError {
    BackendError::Transport(format!("injected {} failure", step))
}

#[async_trait]
impl JobBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn create(&self, spec: &JobSpec) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        inner.created.push(spec.clone());
        let script = inner
            .scripts
            .get(&spec.target)
            .cloned()
            .unwrap_or_else(|| Script::finishes(0, "1.0"));
        if script.fail_at == Some(FailAt::Create) {
            return Err(injected("create"));
        }
        inner.jobs.insert(spec.name.clone(), spec.target.clone());
        Ok(())
    }

    async fn state(&self, job: &JobHandle) -> Result<JobPhase, BackendError> {
        let mut inner = self.inner.lock();
        inner.state_calls += 1;
        let script = Self::script_for(&inner, &job.name)
            .ok_or_else(|| BackendError::Status {
                status: 404,
                body: format!("no job {}", job.name),
            })?;
        if script.fail_at == Some(FailAt::State) {
            return Err(injected("state"));
        }

        let polls = inner.polls.entry(job.name.clone()).or_insert(0);
        *polls += 1;
        match script.polls_until_done {
            Some(n) if *polls > n => Ok(JobPhase::Terminated),
            _ => Ok(JobPhase::Running),
        }
    }

    async fn fetch_log(&self, job: &JobHandle) -> Result<String, BackendError> {
        let mut inner = self.inner.lock();
        inner.log_calls += 1;
        let script = Self::script_for(&inner, &job.name)
            .ok_or_else(|| BackendError::InvalidResponse("unknown job".to_string()))?;
        if script.fail_at == Some(FailAt::FetchLog) {
            return Err(injected("fetch_log"));
        }
        Ok(script.log)
    }

    async fn delete(&self, job: &JobHandle) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        inner.deleted.push(job.name.clone());
        let failing = Self::script_for(&inner, &job.name)
            .map(|s| s.fail_at == Some(FailAt::Delete))
            .unwrap_or(false);
        inner.jobs.remove(&job.name);
        if failing {
            return Err(injected("delete"));
        }
        Ok(())
    }
}
