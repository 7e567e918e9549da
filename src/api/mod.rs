mod client;
#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;
use serde_json::Value;

use crate::error::Result;
use crate::jobs::{JobState, ObjectMeta, ProwJob, ProwJobSpec, ProwJobStatus, KIND};

pub use client::HttpJobApi;

/// Events of one watch subscription. The stream ending means the server
/// closed the watch; callers re-subscribe if they still need events.
pub type EventStream = BoxStream<'static, WatchEvent>;

/// Capability to create and watch jobs on the job-execution API.
///
/// Implementations must be safe to share between independent watches.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Submits an execution request and returns the name the API assigned to it.
    async fn create(&self, job: &ProwJob) -> Result<String>;

    /// Opens a watch on jobs in `namespace`, optionally filtered by a label selector.
    async fn watch(&self, namespace: &str, label_selector: Option<&str>) -> Result<EventStream>;
}

/// A watch notification decoded at the API boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Job(JobEvent),
    /// The watch delivered something that is not a job; carries a description.
    Unexpected(String),
}

/// State change of a single job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    /// Resource name assigned by the API
    pub name: String,
    pub state: JobState,
    /// Job name from the job definition (e.g., "rehearse-123-pull-ci-org-repo-master-unit")
    pub job: String,
    pub raw: Value,
}

#[derive(Deserialize)]
struct EventObject {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: ProwJobSpec,
    #[serde(default)]
    status: ProwJobStatus,
}

impl WatchEvent {
    /// Decodes the `object` of a watch notification.
    pub fn decode(object: Value) -> Self {
        let decoded = match EventObject::deserialize(&object) {
            Ok(decoded) => decoded,
            Err(e) => return Self::Unexpected(format!("undecodable object ({e})")),
        };

        if let Some(kind) = decoded.kind.as_deref() {
            if kind != KIND {
                return Self::Unexpected(format!("a {kind}"));
            }
        }

        if decoded.metadata.name.is_empty() {
            return Self::Unexpected("a job without a name".to_string());
        }

        Self::Job(JobEvent {
            name: decoded.metadata.name,
            state: decoded.status.state,
            job: decoded.spec.job,
            raw: object,
        })
    }
}

#[cfg(test)]
impl JobEvent {
    pub fn new(name: &str, state: JobState) -> Self {
        Self {
            name: name.to_owned(),
            state,
            job: String::new(),
            raw: Value::Null,
        }
    }
}

#[cfg(test)]
impl From<&ProwJob> for JobEvent {
    fn from(job: &ProwJob) -> Self {
        Self {
            name: job.metadata.name.clone(),
            state: job.status.state,
            job: job.spec.job.clone(),
            raw: serde_json::to_value(job).unwrap_or(Value::Null),
        }
    }
}
