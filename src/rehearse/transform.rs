use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{RehearseError, Result};
use crate::jobs::{Presubmit, REHEARSE_LABEL};

use super::inline::{inline_ci_op_config, ConfigLoader};

/// The only entrypoint rehearsals know how to pin to a configuration source.
pub const CI_OPERATOR_COMMAND: &str = "ci-operator";
pub const GIT_REF_ARG: &str = "--git-ref";

const PROW_CONTEXT_PREFIX: &str = "ci/prow/";
const REHEARSE_CONTEXT_PREFIX: &str = "ci/rehearse";

/// Name of the rehearsal of `job` for pull request `pr_number`.
pub fn rehearsal_name(job: &str, pr_number: u64) -> String {
    format!("rehearse-{pr_number}-{job}")
}

/// Status context of a rehearsal, re-rooted under the rehearsed repository.
pub fn rehearsal_context(context: &str, repo: &str) -> String {
    let suffix = context.strip_prefix(PROW_CONTEXT_PREFIX).unwrap_or(context);
    format!("{REHEARSE_CONTEXT_PREFIX}/{repo}/{suffix}")
}

/// Checks that `source` can be rehearsed safely.
fn validate(source: &Presubmit) -> Result<&str> {
    let container = match source.spec.as_ref().map(|spec| spec.containers.as_slice()) {
        Some([container]) if container.command == [CI_OPERATOR_COMMAND] => container,
        _ => {
            return Err(RehearseError::UnsupportedCommand {
                expected: CI_OPERATOR_COMMAND,
            })
        }
    };

    if let Some(arg) = container.args.iter().find(|arg| arg.starts_with(GIT_REF_ARG)) {
        return Err(RehearseError::AlreadyPinned(arg.clone()));
    }

    let branch = source
        .single_branch()
        .ok_or(RehearseError::MultiBranch(source.branches.len()))?;

    let volumes = source.spec.as_ref().map(|spec| spec.volumes.as_slice()).unwrap_or_default();
    if !volumes.is_empty() {
        let names: Vec<&str> = volumes.iter().map(|volume| volume.name.as_str()).collect();
        return Err(RehearseError::UnsupportedVolumes(names.join(", ")));
    }

    Ok(branch)
}

/// Derives the rehearsal of a production presubmit.
///
/// The rehearsal is renamed and re-contexted for pull request `pr_number`,
/// labeled with it, and pinned with `--git-ref=<repo>@<branch>` to the
/// configuration proposed in that pull request.
///
/// # Errors
///
/// Returns `UnsupportedCommand`, `AlreadyPinned`, `MultiBranch` or
/// `UnsupportedVolumes` when the job cannot be rehearsed safely.
pub fn make_rehearsal_presubmit(
    source: &Presubmit,
    repo: &str,
    pr_number: u64,
) -> Result<Presubmit> {
    let branch = validate(source)?;

    let mut rehearsal = source.clone();
    rehearsal.name = rehearsal_name(&source.name, pr_number);
    rehearsal.context = rehearsal_context(&source.context, repo);
    rehearsal.labels = BTreeMap::from([(REHEARSE_LABEL.to_string(), pr_number.to_string())]);
    if let Some(container) = rehearsal
        .spec
        .as_mut()
        .and_then(|spec| spec.containers.first_mut())
    {
        container.args.push(format!("{GIT_REF_ARG}={repo}@{branch}"));
    }

    Ok(rehearsal)
}

/// Turns production presubmits into submission-ready rehearsals.
#[derive(Clone)]
pub struct Transformer {
    loader: Arc<dyn ConfigLoader>,
}

impl Transformer {
    pub fn new(loader: Arc<dyn ConfigLoader>) -> Self {
        Self { loader }
    }

    /// Derives the rehearsal of `job` and inlines its ci-operator configuration
    /// from `repo`.
    ///
    /// # Errors
    ///
    /// Returns a validation error from [`make_rehearsal_presubmit`] or `ConfigLoad`.
    pub fn transform(&self, job: &Presubmit, repo: &str, pr_number: u64) -> Result<Presubmit> {
        let rehearsal = make_rehearsal_presubmit(job, repo, pr_number)?;
        inline_ci_op_config(&rehearsal, repo, self.loader.as_ref())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::jobs::{Container, EnvVar, EnvVarSource, PodSpec, Volume};
    use crate::rehearse::inline::CI_OPERATOR_CONFIGS;

    pub(crate) fn make_presubmit(name: &str, context: &str, args: &[&str]) -> Presubmit {
        Presubmit {
            name: name.to_string(),
            agent: "kubernetes".to_string(),
            context: context.to_string(),
            branches: vec!["^master$".to_string()],
            labels: BTreeMap::from([(REHEARSE_LABEL.to_string(), "123".to_string())]),
            annotations: BTreeMap::new(),
            spec: Some(PodSpec {
                containers: vec![Container {
                    command: vec![CI_OPERATOR_COMMAND.to_string()],
                    args: args.iter().map(ToString::to_string).collect(),
                    ..Container::default()
                }],
                ..PodSpec::default()
            }),
        }
    }

    #[cfg(test)]
    mod make_rehearsal_presubmit {
        use super::*;

        #[test]
        fn derives_name_context_and_pinned_args() {
            let source = make_presubmit(
                "pull-ci-openshift-ci-operator-master-build",
                "ci/prow/build",
                &["arg", "arg"],
            );

            let rehearsal =
                make_rehearsal_presubmit(&source, "openshift/ci-operator", 123).unwrap();

            let expected = make_presubmit(
                "rehearse-123-pull-ci-openshift-ci-operator-master-build",
                "ci/rehearse/openshift/ci-operator/build",
                &["arg", "arg", "--git-ref=openshift/ci-operator@master"],
            );
            assert_eq!(rehearsal, expected);
        }

        #[test]
        fn leaves_source_untouched() {
            let source = make_presubmit("job", "ci/prow/job", &["arg"]);
            let copy = source.clone();
            let _ = make_rehearsal_presubmit(&source, "org/repo", 1).unwrap();
            assert_eq!(source, copy);
        }

        #[test]
        fn replaces_labels_with_rehearsal_label() {
            let mut source = make_presubmit("job", "ci/prow/job", &[]);
            source.labels.insert(
                "ci-operator.openshift.io/prowgen-controlled".to_string(),
                "true".to_string(),
            );

            let rehearsal = make_rehearsal_presubmit(&source, "org/repo", 456).unwrap();

            assert_eq!(
                rehearsal.labels,
                BTreeMap::from([(REHEARSE_LABEL.to_string(), "456".to_string())])
            );
        }

        #[test]
        fn context_without_prow_prefix_is_kept_whole() {
            assert_eq!(
                rehearsal_context("custom/context", "org/repo"),
                "ci/rehearse/org/repo/custom/context"
            );
        }

        fn rejected(cripple: impl FnOnce(&mut Presubmit)) -> RehearseError {
            let mut job =
                make_presubmit("pull-ci-organization-repo-master-test", "ci/prow/test", &["arg"]);
            cripple(&mut job);
            make_rehearsal_presubmit(&job, "organization/repo", 321).unwrap_err()
        }

        fn container(job: &mut Presubmit) -> &mut Container {
            &mut job.spec.as_mut().unwrap().containers[0]
        }

        #[test]
        fn rejects_command_other_than_ci_operator() {
            let err = rejected(|job| container(job).command[0] = "not-ci-operator".to_string());
            assert!(matches!(err, RehearseError::UnsupportedCommand { .. }), "got {err}");
        }

        #[test]
        fn rejects_wrapped_ci_operator() {
            let err = rejected(|job| {
                container(job).command =
                    vec!["bash".to_string(), "-c".to_string(), "ci-operator".to_string()];
            });
            assert!(matches!(err, RehearseError::UnsupportedCommand { .. }), "got {err}");
        }

        #[test]
        fn rejects_multiple_containers() {
            let err = rejected(|job| {
                let extra = container(job).clone();
                job.spec.as_mut().unwrap().containers.push(extra);
            });
            assert!(matches!(err, RehearseError::UnsupportedCommand { .. }), "got {err}");
        }

        #[test]
        fn rejects_job_without_pod_spec() {
            let err = rejected(|job| job.spec = None);
            assert!(matches!(err, RehearseError::UnsupportedCommand { .. }), "got {err}");
        }

        #[test]
        fn rejects_job_already_using_git_ref() {
            let err = rejected(|job| {
                container(job).args.push("--git-ref=organization/repo@master".to_string());
            });
            assert!(
                matches!(
                    &err,
                    RehearseError::AlreadyPinned(arg) if arg == "--git-ref=organization/repo@master"
                ),
                "got {err}"
            );
        }

        #[test]
        fn rejects_bare_git_ref_flag() {
            let err = rejected(|job| container(job).args = vec!["--git-ref".to_string()]);
            assert!(matches!(err, RehearseError::AlreadyPinned(_)), "got {err}");
        }

        #[test]
        fn rejects_jobs_running_over_multiple_branches() {
            let err = rejected(|job| job.branches.push("^feature-branch$".to_string()));
            assert!(matches!(err, RehearseError::MultiBranch(2)), "got {err}");
        }

        #[test]
        fn rejects_jobs_without_branches() {
            let err = rejected(|job| job.branches.clear());
            assert!(matches!(err, RehearseError::MultiBranch(0)), "got {err}");
        }

        #[test]
        fn rejects_jobs_that_need_additional_volumes() {
            let err = rejected(|job| {
                job.spec.as_mut().unwrap().volumes = vec![Volume {
                    name: "volume".to_string(),
                    ..Volume::default()
                }];
            });
            assert!(
                matches!(&err, RehearseError::UnsupportedVolumes(names) if names == "volume"),
                "got {err}"
            );
        }
    }

    #[cfg(test)]
    mod transform {
        use super::*;

        struct OneFileLoader;

        impl ConfigLoader for OneFileLoader {
            fn load(&self, repo: &str, path: &str) -> Result<String> {
                if repo == "org/repo" && path == "org-repo-master.yaml" {
                    Ok("tests: []".to_string())
                } else {
                    Err(RehearseError::Config(format!("{repo}/{path} not found")))
                }
            }
        }

        fn with_config_env(mut job: Presubmit, key: &str) -> Presubmit {
            container(&mut job).env = vec![EnvVar::from_source(
                "CONFIG_SPEC",
                EnvVarSource::config_map(CI_OPERATOR_CONFIGS, key),
            )];
            job
        }

        fn container(job: &mut Presubmit) -> &mut Container {
            &mut job.spec.as_mut().unwrap().containers[0]
        }

        #[test]
        fn rehearses_and_inlines() {
            let transformer = Transformer::new(Arc::new(OneFileLoader));
            let job = with_config_env(
                make_presubmit("unit", "ci/prow/unit", &[]),
                "org-repo-master.yaml",
            );

            let mut rehearsal = transformer.transform(&job, "org/repo", 7).unwrap();

            assert_eq!(rehearsal.name, "rehearse-7-unit");
            let container = container(&mut rehearsal);
            assert_eq!(container.args, vec!["--git-ref=org/repo@master"]);
            assert_eq!(container.env, vec![EnvVar::literal("CONFIG_SPEC", "tests: []")]);
        }

        #[test]
        fn load_failure_produces_no_job() {
            let transformer = Transformer::new(Arc::new(OneFileLoader));
            let job = with_config_env(make_presubmit("unit", "ci/prow/unit", &[]), "missing.yaml");

            let err = transformer.transform(&job, "org/repo", 7).unwrap_err();

            assert!(matches!(err, RehearseError::ConfigLoad { .. }), "got {err}");
        }

        #[test]
        fn validation_runs_before_loading() {
            let transformer = Transformer::new(Arc::new(OneFileLoader));
            let mut job =
                with_config_env(make_presubmit("unit", "ci/prow/unit", &[]), "missing.yaml");
            job.branches.push("^release$".to_string());

            let err = transformer.transform(&job, "org/repo", 7).unwrap_err();

            assert!(matches!(err, RehearseError::MultiBranch(2)), "got {err}");
        }
    }
}
