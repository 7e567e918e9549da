use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::api::HttpJobApi;
use crate::auth::Token;
use crate::config::Config;
use crate::jobs::{Presubmit, Pull, Refs};
use crate::metadata::{write_metadata_json, MetadataJob};
use crate::rehearse::inline::FsConfigLoader;
use crate::rehearse::{Rehearsal, RunOptions};

#[derive(Parser)]
#[command(name = "rehearse")]
#[command(author, version, about = "Rehearses CI job configuration changes", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./rehearse.{toml,json,yaml,yml})
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit rehearsals of changed presubmits and wait for their results
    Run {
        /// YAML map of "org/repo" to the presubmits to rehearse
        #[arg(short, long)]
        jobs: PathBuf,

        /// Pull request proposing the configuration change
        #[arg(long)]
        pr: u64,

        #[arg(long)]
        org: String,

        #[arg(long)]
        repo: String,

        #[arg(long)]
        base_ref: String,

        #[arg(long)]
        base_sha: String,

        #[arg(long)]
        pull_author: String,

        #[arg(long)]
        pull_sha: String,

        #[arg(short, long)]
        namespace: Option<String>,

        /// Checkout of the candidate ci-operator configuration
        #[arg(long)]
        candidate_path: Option<PathBuf>,

        /// Clone location inside the rehearsal pods (sets refs.path_alias);
        /// unset keeps the refs as given
        #[arg(long)]
        checkout_path: Option<String>,

        #[arg(long, default_value_t = false)]
        dry_run: bool,

        #[arg(long)]
        api_url: Option<String>,

        #[arg(short, long, env = "REHEARSE_TOKEN")]
        token: Option<String>,
    },

    /// Write metadata.json describing a job's artifacts
    WriteMetadata {
        #[arg(long)]
        artifact_dir: PathBuf,

        #[arg(long)]
        org: String,

        #[arg(long)]
        repo: String,

        /// Additional "org/repo" checked out by the job (repeatable)
        #[arg(long = "extra-ref")]
        extra_refs: Vec<String>,

        #[arg(long)]
        job_id: String,

        #[arg(short, long)]
        namespace: String,
    },
}

fn load_jobs(path: &Path) -> Result<IndexMap<String, Vec<Presubmit>>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read jobs file: {}", path.display()))?;
    serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse jobs file: {}", path.display()))
}

fn parse_repo(value: &str) -> Result<Refs> {
    match value.split_once('/') {
        Some((org, repo)) if !org.is_empty() && !repo.is_empty() => Ok(Refs {
            org: org.to_string(),
            repo: repo.to_string(),
            ..Refs::default()
        }),
        _ => bail!("Invalid repository '{value}', expected org/repo"),
    }
}

impl Cli {
    #[allow(clippy::too_many_arguments)]
    async fn execute_run(
        &self,
        jobs: &Path,
        refs: Refs,
        namespace: Option<&str>,
        candidate_path: Option<&Path>,
        checkout_path: Option<&str>,
        dry_run: bool,
        api_url: Option<&str>,
        token: Option<&str>,
    ) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;

        let jobs = load_jobs(jobs)?;
        let pr_number = refs.pulls.first().map(|pull| pull.number).unwrap_or_default();
        info!(
            "Rehearsing {} jobs for {}#{pr_number}",
            jobs.values().map(Vec::len).sum::<usize>(),
            refs.repo_identifier()
        );

        let candidate_path = candidate_path
            .map(Path::to_path_buf)
            .or(config.rehearsal.candidate_path)
            .context("No candidate configuration path given (--candidate-path or rehearsal.candidate-path)")?;

        let token = token
            .map(Token::from)
            .or_else(|| config.api.token.as_deref().map(Token::from));
        let api_url = api_url.unwrap_or(&config.api.base_url);
        let api = HttpJobApi::new(api_url, token)
            .with_context(|| format!("Failed to create job API client for {api_url}"))?;

        let options = RunOptions {
            checkout_path: checkout_path.unwrap_or_default().to_string(),
            dry_run: dry_run || config.rehearsal.dry_run,
            policy: config.rehearsal.submission_policy,
            watch_retry_delay: config.api.watch_retry_delay(),
            ..RunOptions::new(pr_number, namespace.unwrap_or(&config.api.namespace), refs)
        };

        let rehearsal = Rehearsal::new(
            Arc::new(api),
            Arc::new(FsConfigLoader::new(candidate_path)),
            options,
        );

        match rehearsal.execute_jobs(&jobs).await {
            Ok(true) => {
                info!("All rehearsals succeeded");
                Ok(())
            }
            Ok(false) => bail!("Some rehearsal jobs failed"),
            Err(e) => {
                error!("Rehearsal could not complete: {e}");
                Err(e).context("Failed to rehearse jobs because of an infrastructure error")
            }
        }
    }

    fn execute_write_metadata(
        &self,
        artifact_dir: &Path,
        refs: Refs,
        extra_refs: &[String],
        job_id: &str,
        namespace: &str,
    ) -> Result<()> {
        let job = MetadataJob {
            refs: Some(refs),
            extra_refs: extra_refs
                .iter()
                .map(|value| parse_repo(value))
                .collect::<Result<_>>()?,
            job_id: job_id.to_string(),
        };

        let metadata = write_metadata_json(artifact_dir, &job, namespace)
            .with_context(|| format!("Failed to write metadata to {}", artifact_dir.display()))?;
        info!(
            "Metadata revision {} written to: {}",
            metadata.revision,
            artifact_dir.display()
        );

        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Run {
                jobs,
                pr,
                org,
                repo,
                base_ref,
                base_sha,
                pull_author,
                pull_sha,
                namespace,
                candidate_path,
                checkout_path,
                dry_run,
                api_url,
                token,
            } => {
                let refs = Refs {
                    org: org.clone(),
                    repo: repo.clone(),
                    base_ref: base_ref.clone(),
                    base_sha: base_sha.clone(),
                    pulls: vec![Pull {
                        number: *pr,
                        author: pull_author.clone(),
                        sha: pull_sha.clone(),
                    }],
                    path_alias: None,
                };
                self.execute_run(
                    jobs,
                    refs,
                    namespace.as_deref(),
                    candidate_path.as_deref(),
                    checkout_path.as_deref(),
                    *dry_run,
                    api_url.as_deref(),
                    token.as_deref(),
                )
                .await
            }
            Commands::WriteMetadata {
                artifact_dir,
                org,
                repo,
                extra_refs,
                job_id,
                namespace,
            } => {
                let refs = parse_repo(&format!("{org}/{repo}"))?;
                self.execute_write_metadata(artifact_dir, refs, extra_refs, job_id, namespace)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_arguments() {
        let cli = Cli::try_parse_from([
            "rehearse", "run", "--jobs", "jobs.yaml", "--pr", "1234", "--org", "openshift",
            "--repo", "release", "--base-ref", "master", "--base-sha", "abc", "--pull-author",
            "someone", "--pull-sha", "def", "--dry-run",
        ])
        .unwrap();

        match cli.command {
            Commands::Run { pr, dry_run, namespace, .. } => {
                assert_eq!(pr, 1234);
                assert!(dry_run);
                assert!(namespace.is_none(), "namespace falls back to the config");
            }
            Commands::WriteMetadata { .. } => panic!("expected the run command"),
        }
    }

    #[test]
    fn test_parse_repeated_extra_refs() {
        let cli = Cli::try_parse_from([
            "rehearse", "write-metadata", "--artifact-dir", "/tmp/artifacts", "--org", "o",
            "--repo", "r", "--extra-ref", "a/b", "--extra-ref", "c/d", "--job-id", "id",
            "--namespace", "ns",
        ])
        .unwrap();

        match cli.command {
            Commands::WriteMetadata { extra_refs, .. } => {
                assert_eq!(extra_refs, vec!["a/b", "c/d"])
            }
            Commands::Run { .. } => panic!("expected the write-metadata command"),
        }
    }

    #[test]
    fn test_parse_repo() {
        let refs = parse_repo("openshift/release").unwrap();
        assert_eq!(refs.repo_identifier(), "openshift/release");
        assert!(parse_repo("no-slash").is_err());
        assert!(parse_repo("/repo").is_err());
    }

    #[test]
    fn test_load_jobs_keeps_repository_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.yaml");
        std::fs::write(
            &path,
            r#"
zeta/repo:
- name: pull-ci-zeta-repo-master-unit
  context: ci/prow/unit
  branches: [master]
alpha/repo:
- name: pull-ci-alpha-repo-master-e2e
  context: ci/prow/e2e
  branches: [master]
"#,
        )
        .unwrap();

        let jobs = load_jobs(&path).unwrap();

        let repos: Vec<&str> = jobs.keys().map(String::as_str).collect();
        assert_eq!(repos, vec!["zeta/repo", "alpha/repo"]);
        assert_eq!(jobs["zeta/repo"][0].agent, "kubernetes");
    }

    #[test]
    fn test_load_jobs_reports_path() {
        let err = load_jobs(Path::new("missing-jobs.yaml")).unwrap_err();
        assert!(err.to_string().contains("missing-jobs.yaml"));
    }
}
