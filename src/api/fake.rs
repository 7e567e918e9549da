//! Scripted in-memory job API for tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use super::{EventStream, JobApi, JobEvent, WatchEvent};
use crate::error::{RehearseError, Result};
use crate::jobs::{JobState, ProwJob};

/// One scripted answer to a `watch` call.
pub enum ScriptedWatch {
    /// Delivers the events, then closes.
    Events(Vec<WatchEvent>),
    /// Establishing the watch fails.
    Fail,
}

#[derive(Default)]
struct State {
    created: Vec<ProwJob>,
    failing_jobs: HashSet<String>,
    results: HashMap<String, JobState>,
    watches: VecDeque<ScriptedWatch>,
    watch_calls: usize,
    selectors: Vec<Option<String>>,
}

/// Once scripted watches run out, every watch replays all created jobs with the
/// configured result for their job name (success when unset).
#[derive(Default)]
pub struct FakeJobApi {
    state: Mutex<State>,
}

impl FakeJobApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_watches(watches: Vec<ScriptedWatch>) -> Self {
        let api = Self::default();
        api.state.lock().unwrap().watches = watches.into();
        api
    }

    /// Makes `create` fail for the job with this spec name.
    pub fn fail_create(self, job: &str) -> Self {
        self.state.lock().unwrap().failing_jobs.insert(job.to_string());
        self
    }

    pub fn with_result(self, job: &str, state: JobState) -> Self {
        self.state
            .lock()
            .unwrap()
            .results
            .insert(job.to_string(), state);
        self
    }

    pub fn created(&self) -> Vec<ProwJob> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn watch_calls(&self) -> usize {
        self.state.lock().unwrap().watch_calls
    }

    pub fn selectors(&self) -> Vec<Option<String>> {
        self.state.lock().unwrap().selectors.clone()
    }
}

pub fn job_event(name: &str, state: JobState) -> WatchEvent {
    WatchEvent::Job(JobEvent::new(name, state))
}

#[async_trait]
impl JobApi for FakeJobApi {
    async fn create(&self, job: &ProwJob) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.failing_jobs.contains(&job.spec.job) {
            return Err(RehearseError::Api {
                status: 500,
                message: format!("failed to create {}", job.spec.job),
            });
        }

        let mut created = job.clone();
        created.metadata.name = format!(
            "{}{}",
            job.metadata.generate_name.as_deref().unwrap_or_default(),
            state.created.len()
        );
        let name = created.metadata.name.clone();
        state.created.push(created);
        Ok(name)
    }

    async fn watch(&self, _namespace: &str, label_selector: Option<&str>) -> Result<EventStream> {
        let mut state = self.state.lock().unwrap();
        state.watch_calls += 1;
        state.selectors.push(label_selector.map(ToString::to_string));

        let events = match state.watches.pop_front() {
            Some(ScriptedWatch::Events(events)) => events,
            Some(ScriptedWatch::Fail) => {
                return Err(RehearseError::Api {
                    status: 503,
                    message: "watch unavailable".to_string(),
                })
            }
            None => state
                .created
                .iter()
                .map(|job| {
                    let mut finished = job.clone();
                    finished.status.state = state
                        .results
                        .get(&job.spec.job)
                        .copied()
                        .unwrap_or(JobState::Success);
                    WatchEvent::Job(JobEvent::from(&finished))
                })
                .collect(),
        };

        Ok(stream::iter(events).boxed())
    }
}
