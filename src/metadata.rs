//! Result metadata written next to job artifacts, and normalisation of
//! failure messages so that equivalent failures group together.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::jobs::Refs;

pub const METADATA_FILE: &str = "metadata.json";
pub const CUSTOM_METADATA_FILE: &str = "custom-prow-metadata.json";

static SANITIZERS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"ci-op-[a-z0-9]{8}", "<PODNAME>"),
        (
            r"\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b",
            "<UUID>",
        ),
        (
            r"\b\d{4}-\d{2}-\d{2}(?:T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})?)?\b",
            "<ISO-DATETIME>",
        ),
        (r"\b(?:\d+h ?)?(?:\d+m ?)?\d+(?:\.\d+)?(?:ms|s)\b", "<DURATION>"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| {
        (Regex::new(pattern).expect("invalid sanitizer pattern"), replacement)
    })
    .collect()
});

/// Replaces pod names, UUIDs, timestamps and durations with placeholders.
pub fn sanitize_message(message: &str) -> String {
    SANITIZERS
        .iter()
        .fold(message.to_string(), |message, (regex, replacement)| {
            regex.replace_all(&message, *replacement).into_owned()
        })
}

/// The identity of the job whose artifacts are described.
#[derive(Debug, Clone, Default)]
pub struct MetadataJob {
    pub refs: Option<Refs>,
    pub extra_refs: Vec<Refs>,
    pub job_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResultMetadata {
    pub revision: u32,
    pub repo_commit: String,
    pub repo: String,
    pub repos: BTreeMap<String, String>,
    pub infra_commit: String,
    pub job_version: String,
    pub pod: String,
    pub work_namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl ResultMetadata {
    pub fn new(job: &MetadataJob, namespace: &str) -> Self {
        let repos = job
            .refs
            .iter()
            .chain(&job.extra_refs)
            .map(|refs| (refs.repo_identifier(), String::new()))
            .collect();

        Self {
            revision: 1,
            repo: job.refs.as_ref().map(Refs::repo_identifier).unwrap_or_default(),
            repos,
            pod: job.job_id.clone(),
            work_namespace: namespace.to_string(),
            ..Self::default()
        }
    }
}

fn find_custom_metadata(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            find_custom_metadata(&path, found)?;
        } else if entry.file_name() == CUSTOM_METADATA_FILE {
            found.push(path);
        }
    }
    Ok(())
}

/// Merges every custom metadata file under `artifact_dir`. Files that do not
/// hold a string map are skipped.
pub fn collect_custom_metadata(artifact_dir: &Path) -> Result<BTreeMap<String, String>> {
    let mut paths = Vec::new();
    find_custom_metadata(artifact_dir, &mut paths)?;
    paths.sort();

    let mut merged = BTreeMap::new();
    for path in paths {
        let contents = fs::read_to_string(&path)?;
        match serde_json::from_str::<BTreeMap<String, String>>(&contents) {
            Ok(values) => {
                debug!("Loaded custom metadata from {}", path.display());
                merged.extend(values);
            }
            Err(e) => warn!("Ignoring unparsable custom metadata {}: {e}", path.display()),
        }
    }
    Ok(merged)
}

/// Writes `metadata.json` into `artifact_dir`, including any custom metadata
/// found below it.
///
/// # Errors
///
/// Returns `Io` if the directory cannot be walked or the file cannot be written.
pub fn write_metadata_json(
    artifact_dir: &Path,
    job: &MetadataJob,
    namespace: &str,
) -> Result<ResultMetadata> {
    let mut metadata = ResultMetadata::new(job, namespace);

    let custom = collect_custom_metadata(artifact_dir)?;
    if !custom.is_empty() {
        metadata.revision = 2;
        metadata.metadata = Some(custom);
    }

    fs::write(artifact_dir.join(METADATA_FILE), serde_json::to_vec_pretty(&metadata)?)?;
    Ok(metadata)
}
