use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use log::{debug, warn, Level};

use super::loggers::{Entry, Loggers};
use crate::api::{EventStream, JobApi, JobEvent, WatchEvent};
use crate::error::{RehearseError, Result};
use crate::jobs::JobState;

pub const DEFAULT_WATCH_RETRY_DELAY: Duration = Duration::from_secs(10);

/// How an event relates to the tracked jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Not a job of this run, or one that is already resolved
    Untracked,
    /// Tracked job in a non-terminal state
    Pending,
    /// First terminal state of a tracked job
    Resolved(JobState),
}

/// Jobs that still need a terminal state, and the outcomes of those that have one.
///
/// A job's first terminal state is final: later events for it are ignored.
#[derive(Debug, Default)]
pub struct TrackedSet {
    pending: BTreeSet<String>,
    outcomes: BTreeMap<String, JobState>,
}

impl TrackedSet {
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            pending: names.into_iter().collect(),
            outcomes: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn observe(&mut self, name: &str, state: JobState) -> Observation {
        if !self.pending.contains(name) {
            return Observation::Untracked;
        }
        if !state.is_terminal() {
            return Observation::Pending;
        }

        self.pending.remove(name);
        self.outcomes.insert(name.to_string(), state);
        Observation::Resolved(state)
    }

    pub fn outcomes(&self) -> &BTreeMap<String, JobState> {
        &self.outcomes
    }

    /// True when every resolved job succeeded.
    pub fn verdict(&self) -> bool {
        self.outcomes().values().all(|state| state.is_success())
    }
}

/// Waits for submitted jobs to reach terminal states.
///
/// There is no internal deadline: a job that never finishes keeps the wait
/// pending until the caller drops the future.
pub struct Tracker {
    api: Arc<dyn JobApi>,
    loggers: Loggers,
    retry_delay: Duration,
}

impl Tracker {
    pub fn new(api: Arc<dyn JobApi>, loggers: Loggers) -> Self {
        Self {
            api,
            loggers,
            retry_delay: DEFAULT_WATCH_RETRY_DELAY,
        }
    }

    /// Delay before re-establishing a watch that failed or closed.
    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Watches `namespace` until every job in `pending` is resolved.
    ///
    /// Returns `Ok(true)` when all of them succeeded and `Ok(false)` when any
    /// failed, errored or was aborted. Closed watches are re-established and
    /// failures to establish one are retried, both after the retry delay;
    /// neither loses resolved outcomes.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedWatchObject` if the watch delivers something that is
    /// not a job.
    pub async fn wait_for_completion(
        &self,
        pending: BTreeSet<String>,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<bool> {
        let mut tracked = TrackedSet::new(pending);

        while !tracked.is_empty() {
            let mut events = self.subscribe(namespace, label_selector).await;

            while let Some(event) = events.next().await {
                let event = match event {
                    WatchEvent::Job(event) => event,
                    WatchEvent::Unexpected(description) => {
                        return Err(RehearseError::UnexpectedWatchObject(description))
                    }
                };

                let observation = tracked.observe(&event.name, event.state);
                self.log(&event, observation);

                if tracked.is_empty() {
                    break;
                }
            }

            if !tracked.is_empty() {
                debug!(
                    "Job watch closed with {} jobs still pending, re-establishing in {}s",
                    tracked.pending(),
                    self.retry_delay.as_secs()
                );
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Ok(tracked.verdict())
    }

    async fn subscribe(&self, namespace: &str, label_selector: Option<&str>) -> EventStream {
        let mut attempt: u64 = 0;
        loop {
            match self.api.watch(namespace, label_selector).await {
                Ok(events) => return events,
                Err(e) => {
                    attempt += 1;
                    warn!(
                        "Failed to watch jobs in namespace {namespace} ({e}), \
                         retrying in {}s (attempt {attempt})...",
                        self.retry_delay.as_secs()
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    fn log(&self, event: &JobEvent, observation: Observation) {
        let entry = |level, message: &str| {
            Entry::new(level, message)
                .field("name", &event.name)
                .field("state", event.state)
                .field("job", &event.job)
        };

        let message = match observation {
            Observation::Untracked => "Ignoring job outside of the tracked set",
            Observation::Pending => "Job has not finished yet",
            Observation::Resolved(_) => "Job finished",
        };
        self.loggers
            .debug
            .emit(entry(Level::Debug, message).field("prowjob", &event.raw));

        match observation {
            Observation::Resolved(state) if state.is_success() => {
                self.loggers.job.emit(entry(Level::Info, "Job succeeded"));
            }
            Observation::Resolved(_) => {
                self.loggers.job.emit(entry(Level::Error, "Job failed"));
            }
            Observation::Untracked | Observation::Pending => {}
        }
    }
}
