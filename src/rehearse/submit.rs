use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use log::Level;

use super::loggers::{Entry, Loggers};
use crate::api::JobApi;
use crate::error::RehearseError;
use crate::jobs::{
    JobState, JobType, ObjectMeta, Presubmit, ProwJob, ProwJobSpec, ProwJobStatus, Refs,
    API_VERSION, CREATED_BY_PROW_LABEL, JOB_ANNOTATION, JOB_LABEL, KIND, ORG_LABEL, PULL_LABEL,
    REHEARSE_LABEL, REPO_LABEL, TYPE_LABEL,
};

/// Kubernetes rejects label values longer than this.
const MAX_LABEL_VALUE_LEN: usize = 63;

/// Truncates `value` to a valid label value, which must end alphanumerically.
fn label_value(value: &str) -> String {
    let truncated: String = value.chars().take(MAX_LABEL_VALUE_LEN).collect();
    truncated.trim_end_matches(['-', '.', '_']).to_string()
}

/// Builds the execution request for a rehearsal.
///
/// The job is started against `refs` (the pull request proposing the
/// configuration change). A non-empty `checkout_path` is the in-job clone
/// location and becomes the refs' path alias; it is not a host path, and an
/// empty one leaves `refs` untouched. Labels and annotations depend only on
/// the inputs.
pub fn make_prowjob(
    rehearsal: &Presubmit,
    refs: &Refs,
    namespace: &str,
    pr_number: u64,
    checkout_path: &str,
) -> ProwJob {
    let pull_number = refs.pulls.first().map_or(pr_number, |pull| pull.number);

    let mut labels = rehearsal.labels.clone();
    labels.extend([
        (CREATED_BY_PROW_LABEL.to_string(), "true".to_string()),
        (JOB_LABEL.to_string(), label_value(&rehearsal.name)),
        (TYPE_LABEL.to_string(), JobType::Presubmit.to_string()),
        (ORG_LABEL.to_string(), label_value(&refs.org)),
        (REPO_LABEL.to_string(), label_value(&refs.repo)),
        (PULL_LABEL.to_string(), pull_number.to_string()),
        (REHEARSE_LABEL.to_string(), pr_number.to_string()),
    ]);

    let mut annotations = rehearsal.annotations.clone();
    annotations.insert(JOB_ANNOTATION.to_string(), rehearsal.name.clone());

    let mut refs = refs.clone();
    if !checkout_path.is_empty() {
        refs.path_alias = Some(checkout_path.to_string());
    }

    ProwJob {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        metadata: ObjectMeta {
            name: String::new(),
            generate_name: Some(format!("rehearse-{pr_number}-")),
            namespace: namespace.to_string(),
            labels,
            annotations,
        },
        spec: ProwJobSpec {
            job_type: JobType::Presubmit,
            agent: rehearsal.agent.clone(),
            job: rehearsal.name.clone(),
            refs: Some(refs),
            report: true,
            context: rehearsal.context.clone(),
            pod_spec: rehearsal.spec.clone(),
        },
        status: ProwJobStatus {
            start_time: Some(Utc::now()),
            state: JobState::Triggered,
        },
    }
}

/// Outcome of submitting a batch of rehearsals.
#[derive(Debug, Default)]
pub struct Submission {
    /// Names assigned to accepted jobs, per target repository
    pub submitted: IndexMap<String, BTreeSet<String>>,
    /// First failure; nothing after it was submitted
    pub error: Option<RehearseError>,
}

impl Submission {
    /// All accepted job names.
    pub fn names(&self) -> BTreeSet<String> {
        self.submitted.values().flatten().cloned().collect()
    }
}

/// Creates rehearsal jobs through the job-execution API.
pub struct Submitter {
    api: Arc<dyn JobApi>,
    namespace: String,
    loggers: Loggers,
}

impl Submitter {
    pub fn new(api: Arc<dyn JobApi>, namespace: &str, loggers: Loggers) -> Self {
        Self {
            api,
            namespace: namespace.to_string(),
            loggers,
        }
    }

    /// Submits one execution request per rehearsal, in order.
    ///
    /// Stops at the first failed create and records it in the returned
    /// [`Submission`]; creates are never retried. In dry-run mode the requests
    /// are rendered to the job log and nothing is created.
    pub async fn submit(
        &self,
        rehearsals: &IndexMap<String, Vec<Presubmit>>,
        pr_number: u64,
        checkout_path: &str,
        refs: &Refs,
        dry_run: bool,
    ) -> Submission {
        let mut submission = Submission::default();

        for (repo, jobs) in rehearsals {
            for job in jobs {
                let prowjob = make_prowjob(job, refs, &self.namespace, pr_number, checkout_path);

                if dry_run {
                    match serde_yaml::to_string(&prowjob) {
                        Ok(yaml) => self.loggers.job.emit(
                            Entry::new(Level::Info, "Dry run: not submitting rehearsal job")
                                .field("target-repo", repo)
                                .field("rehearsal-job", &job.name)
                                .field("prowjob", yaml),
                        ),
                        Err(e) => {
                            submission.error = Some(e.into());
                            return submission;
                        }
                    }
                    continue;
                }

                match self.api.create(&prowjob).await {
                    Ok(name) => {
                        self.loggers.job.emit(
                            Entry::new(Level::Info, "Submitted rehearsal job")
                                .field("target-repo", repo)
                                .field("rehearsal-job", &job.name)
                                .field("name", &name),
                        );
                        submission
                            .submitted
                            .entry(repo.clone())
                            .or_default()
                            .insert(name);
                    }
                    Err(e) => {
                        self.loggers.job.emit(
                            Entry::new(Level::Error, "Failed to submit rehearsal job")
                                .field("target-repo", repo)
                                .field("rehearsal-job", &job.name)
                                .field("error", &e),
                        );
                        submission.error = Some(e);
                        return submission;
                    }
                }
            }
        }

        submission
    }
}

/// Label selector matching every rehearsal of pull request `pr_number`.
pub fn rehearsal_selector(pr_number: u64) -> String {
    format!("{REHEARSE_LABEL}={pr_number}")
}
