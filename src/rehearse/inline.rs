use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{RehearseError, Result};
use crate::jobs::{EnvVar, Presubmit};

/// Config map holding ci-operator configuration files, keyed by file name.
pub const CI_OPERATOR_CONFIGS: &str = "ci-operator-configs";

/// Loads configuration file contents for a repository.
pub trait ConfigLoader: Send + Sync {
    /// Returns the contents of `path` in the configuration of `repo` ("org/repo").
    fn load(&self, repo: &str, path: &str) -> Result<String>;
}

/// Reads configuration from a checkout laid out as `<root>/<org>/<repo>/<file>`.
pub struct FsConfigLoader {
    root: PathBuf,
}

impl FsConfigLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// Only plain relative paths stay inside the checkout.
fn is_contained(path: &str) -> bool {
    Path::new(path)
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

impl ConfigLoader for FsConfigLoader {
    fn load(&self, repo: &str, path: &str) -> Result<String> {
        if !is_contained(repo) || !is_contained(path) {
            return Err(RehearseError::Config(format!(
                "{repo}/{path} points outside of the configuration checkout"
            )));
        }
        Ok(fs::read_to_string(self.root.join(repo).join(path))?)
    }
}

/// Replaces references to the ci-operator config map with the literal
/// configuration they point at. All other variables pass through unchanged.
///
/// # Errors
///
/// Returns `ConfigLoad` if any referenced file cannot be loaded.
pub fn inline_env(env: &[EnvVar], repo: &str, loader: &dyn ConfigLoader) -> Result<Vec<EnvVar>> {
    env.iter()
        .map(|var| {
            let Some(selector) = var
                .value_from
                .as_ref()
                .and_then(|source| source.config_map_key_ref.as_ref())
                .filter(|selector| selector.name == CI_OPERATOR_CONFIGS)
            else {
                return Ok(var.clone());
            };

            let content = loader
                .load(repo, &selector.key)
                .map_err(|e| RehearseError::ConfigLoad {
                    repo: repo.to_string(),
                    path: selector.key.clone(),
                    reason: e.to_string(),
                })?;

            Ok(EnvVar::literal(&var.name, &content))
        })
        .collect()
}

/// Returns a copy of `job` with every container environment inlined.
///
/// # Errors
///
/// Returns `ConfigLoad` if any referenced file cannot be loaded; no partial job
/// is produced in that case.
pub fn inline_ci_op_config(
    job: &Presubmit,
    repo: &str,
    loader: &dyn ConfigLoader,
) -> Result<Presubmit> {
    let mut inlined = job.clone();
    if let Some(spec) = inlined.spec.as_mut() {
        for container in &mut spec.containers {
            container.env = inline_env(&container.env, repo, loader)?;
        }
    }
    Ok(inlined)
}
