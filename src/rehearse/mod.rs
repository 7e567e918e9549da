pub mod inline;
pub mod loggers;
pub mod submit;
pub mod tracker;
pub mod transform;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use log::Level;
use serde::{Deserialize, Serialize};

use crate::api::JobApi;
use crate::error::Result;
use crate::jobs::{Presubmit, Refs};

use inline::ConfigLoader;
use loggers::{Entry, Loggers};
use submit::{rehearsal_selector, Submitter};
use tracker::{Tracker, DEFAULT_WATCH_RETRY_DELAY};
use transform::Transformer;

/// What to do with jobs that were created before a submission failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmissionPolicy {
    /// Report the failure right away and leave created jobs running untracked
    #[default]
    Abandon,
    /// Wait for the created jobs to finish, then report the failure
    TrackSurvivors,
}

/// Parameters of one rehearsal run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub pr_number: u64,
    pub namespace: String,
    pub checkout_path: String,
    pub refs: Refs,
    pub dry_run: bool,
    pub policy: SubmissionPolicy,
    pub watch_retry_delay: Duration,
}

impl RunOptions {
    pub fn new(pr_number: u64, namespace: &str, refs: Refs) -> Self {
        Self {
            pr_number,
            namespace: namespace.to_string(),
            checkout_path: String::new(),
            refs,
            dry_run: false,
            policy: SubmissionPolicy::default(),
            watch_retry_delay: DEFAULT_WATCH_RETRY_DELAY,
        }
    }
}

/// Rehearses changed job definitions of a pull request: transforms them,
/// submits them and waits for their outcome.
pub struct Rehearsal {
    api: Arc<dyn JobApi>,
    transformer: Transformer,
    loggers: Loggers,
    options: RunOptions,
}

impl Rehearsal {
    pub fn new(api: Arc<dyn JobApi>, loader: Arc<dyn ConfigLoader>, options: RunOptions) -> Self {
        Self {
            api,
            transformer: Transformer::new(loader),
            loggers: Loggers::default(),
            options,
        }
    }

    #[must_use]
    pub fn with_loggers(mut self, loggers: Loggers) -> Self {
        self.loggers = loggers;
        self
    }

    fn transform_all(
        &self,
        jobs: &IndexMap<String, Vec<Presubmit>>,
    ) -> IndexMap<String, Vec<Presubmit>> {
        let mut rehearsals: IndexMap<String, Vec<Presubmit>> = IndexMap::new();

        for (repo, presubmits) in jobs {
            for job in presubmits {
                match self.transformer.transform(job, repo, self.options.pr_number) {
                    Ok(rehearsal) => rehearsals.entry(repo.clone()).or_default().push(rehearsal),
                    Err(e) => self.loggers.job.emit(
                        Entry::new(Level::Warn, "Failed to make a rehearsal presubmit")
                            .field("target-repo", repo)
                            .field("source-job", &job.name)
                            .field("error", e),
                    ),
                }
            }
        }

        rehearsals
    }

    /// Rehearses `jobs` (keyed by "org/repo").
    ///
    /// Returns `Ok(true)` when every rehearsal succeeded or there was nothing
    /// to rehearse, `Ok(false)` when some rehearsal failed.
    ///
    /// # Errors
    ///
    /// Returns the submission error when a job could not be created, and any
    /// fatal tracking error.
    pub async fn execute_jobs(&self, jobs: &IndexMap<String, Vec<Presubmit>>) -> Result<bool> {
        let rehearsals = self.transform_all(jobs);
        if rehearsals.is_empty() {
            self.loggers
                .job
                .emit(Entry::new(Level::Info, "No job rehearsals"));
            return Ok(true);
        }

        let options = &self.options;
        let submission = Submitter::new(self.api.clone(), &options.namespace, self.loggers.clone())
            .submit(
                &rehearsals,
                options.pr_number,
                &options.checkout_path,
                &options.refs,
                options.dry_run,
            )
            .await;

        if options.dry_run {
            return submission.error.map_or(Ok(true), Err);
        }

        let names = submission.names();
        if let Some(error) = submission.error {
            if options.policy == SubmissionPolicy::TrackSurvivors {
                self.wait(&names).await?;
            }
            return Err(error);
        }

        self.wait(&names).await
    }

    async fn wait(&self, names: &BTreeSet<String>) -> Result<bool> {
        let selector = rehearsal_selector(self.options.pr_number);
        Tracker::new(self.api.clone(), self.loggers.clone())
            .with_retry_delay(self.options.watch_retry_delay)
            .wait_for_completion(names.clone(), &self.options.namespace, Some(&selector))
            .await
    }
}
