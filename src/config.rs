use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::rehearse::SubmissionPolicy;

const CANDIDATES: [&str; 4] = ["rehearse.toml", "rehearse.json", "rehearse.yaml", "rehearse.yml"];

/// Configuration file structure for rehearse.
///
/// Holds the job API connection and the defaults of a rehearsal run, so that
/// CI wrappers only need to pass the pull request specific flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Job API connection
    #[serde(default)]
    pub api: ApiConfig,

    /// Rehearsal run defaults
    #[serde(default)]
    pub rehearsal: RehearsalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApiConfig {
    /// Root URL of the cluster API serving jobs
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Namespace jobs are created and watched in
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Bearer token for the cluster API
    pub token: Option<String>,

    /// Seconds to wait before re-establishing a failed job watch
    #[serde(default = "default_watch_retry_delay_secs")]
    pub watch_retry_delay_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RehearsalConfig {
    /// Checkout of the candidate configuration (`<org>/<repo>/<file>` layout)
    pub candidate_path: Option<PathBuf>,

    /// Render jobs instead of submitting them
    #[serde(default)]
    pub dry_run: bool,

    /// What to do with created jobs when a later submission fails
    #[serde(default)]
    pub submission_policy: SubmissionPolicy,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            namespace: default_namespace(),
            token: None,
            watch_retry_delay_secs: default_watch_retry_delay_secs(),
        }
    }
}

impl ApiConfig {
    pub fn watch_retry_delay(&self) -> Duration {
        Duration::from_secs(self.watch_retry_delay_secs)
    }
}

fn default_base_url() -> String {
    "https://127.0.0.1:6443".to_string()
}

fn default_namespace() -> String {
    "ci".to_string()
}

fn default_watch_retry_delay_secs() -> u64 {
    10
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./rehearse.toml
    /// 3. ./rehearse.json
    /// 4. ./rehearse.yaml
    /// 5. ./rehearse.yml
    /// 6. `<user config dir>/rehearse/config.toml`
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let user_config = dirs::config_dir().map(|dir| dir.join("rehearse").join("config.toml"));
        match discover(Path::new("."), user_config) {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => {
                toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse TOML config: {}", path.display()))
            }
            "json" => {
                serde_json::from_str(&contents)
                    .with_context(|| format!("Failed to parse JSON config: {}", path.display()))
            }
            "yaml" | "yml" => {
                serde_yaml::from_str(&contents)
                    .with_context(|| format!("Failed to parse YAML config: {}", path.display()))
            }
            _ => {
                // Try TOML first, then JSON, then YAML
                toml::from_str(&contents)
                    .or_else(|_| serde_json::from_str(&contents))
                    .or_else(|_| serde_yaml::from_str(&contents))
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))
            }
        }
    }
}

/// First existing configuration file in `dir`, then `user_config`.
fn discover(dir: &Path, user_config: Option<PathBuf>) -> Option<PathBuf> {
    CANDIDATES
        .iter()
        .map(|candidate| dir.join(candidate))
        .chain(user_config)
        .find(|path| path.exists())
}
