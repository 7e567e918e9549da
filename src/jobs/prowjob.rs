use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pod::PodSpec;

pub const API_VERSION: &str = "prow.k8s.io/v1";
pub const KIND: &str = "ProwJob";

pub const CREATED_BY_PROW_LABEL: &str = "created-by-prow";
pub const JOB_LABEL: &str = "prow.k8s.io/job";
pub const TYPE_LABEL: &str = "prow.k8s.io/type";
pub const ORG_LABEL: &str = "prow.k8s.io/refs.org";
pub const REPO_LABEL: &str = "prow.k8s.io/refs.repo";
pub const PULL_LABEL: &str = "prow.k8s.io/refs.pull";
pub const JOB_ANNOTATION: &str = "prow.k8s.io/job";

/// Marks rehearsal jobs with the number of the pull request they rehearse.
pub const REHEARSE_LABEL: &str = "ci.openshift.org/rehearse";

/// Execution request accepted by the job-execution API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProwJob {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: ProwJobSpec,
    #[serde(default)]
    pub status: ProwJobStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Assigned by the API on creation
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_name: Option<String>,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    #[default]
    Presubmit,
    Postsubmit,
    Periodic,
    Batch,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Presubmit => "presubmit",
            Self::Postsubmit => "postsubmit",
            Self::Periodic => "periodic",
            Self::Batch => "batch",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProwJobSpec {
    #[serde(rename = "type", default)]
    pub job_type: JobType,
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub job: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refs: Option<Refs>,
    #[serde(default)]
    pub report: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_spec: Option<PodSpec>,
}

/// Source code references a job is started against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Refs {
    pub org: String,
    pub repo: String,
    #[serde(default)]
    pub base_ref: String,
    #[serde(default)]
    pub base_sha: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pulls: Vec<Pull>,
    /// Location the repository is checked out to inside the job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_alias: Option<String>,
}

impl Refs {
    /// "org/repo" identifier of the referenced repository.
    pub fn repo_identifier(&self) -> String {
        format!("{}/{}", self.org, self.repo)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pull {
    pub number: u64,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub sha: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProwJobStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub state: JobState,
}

/// Lifecycle state of a job as reported by the job-execution API.
///
/// Only an explicit allow-list of states is terminal; anything the API adds
/// later decodes as `Unknown` and keeps the job pending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Triggered,
    Pending,
    Success,
    Failure,
    Aborted,
    Error,
    #[default]
    #[serde(other)]
    Unknown,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failure | Self::Aborted | Self::Error
        )
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Triggered => "triggered",
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Aborted => "aborted",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
