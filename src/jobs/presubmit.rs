use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::pod::PodSpec;

/// A presubmit job definition as declared in the job configuration repository.
///
/// Rehearsals never mutate a `Presubmit` in place; they clone it and derive a
/// new one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Presubmit {
    /// Job name (e.g., "pull-ci-openshift-ci-operator-master-build")
    pub name: String,
    /// Agent that runs the job, "kubernetes" for pod-based jobs
    #[serde(default = "default_agent")]
    pub agent: String,
    /// Status context reported on the pull request (e.g., "ci/prow/build")
    #[serde(default)]
    pub context: String,
    /// Branch selectors, usually anchored regexes such as `^master$`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<PodSpec>,
}

fn default_agent() -> String {
    "kubernetes".to_string()
}

impl Presubmit {
    /// Name of the only branch this job selects, with regex anchors removed.
    ///
    /// Returns `None` unless exactly one branch selector is configured.
    pub fn single_branch(&self) -> Option<&str> {
        match self.branches.as_slice() {
            [branch] => {
                let branch = branch.strip_prefix('^').unwrap_or(branch);
                Some(branch.strip_suffix('$').unwrap_or(branch))
            }
            _ => None,
        }
    }
}
