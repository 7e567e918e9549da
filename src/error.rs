use thiserror::Error;

#[derive(Error, Debug)]
pub enum RehearseError {
    #[error("cannot rehearse jobs whose command is not a single `{expected}` container")]
    UnsupportedCommand { expected: &'static str },

    #[error("cannot rehearse jobs that already pin their configuration with `{0}`")]
    AlreadyPinned(String),

    #[error("cannot rehearse jobs that do not run over exactly one branch (configured: {0})")]
    MultiBranch(usize),

    #[error("cannot rehearse jobs that need additional volumes mounted: {0}")]
    UnsupportedVolumes(String),

    #[error("failed to load configuration {repo}/{path}: {reason}")]
    ConfigLoad {
        repo: String,
        path: String,
        reason: String,
    },

    #[error("Job API request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("received an unexpected object from the job watch: {0}")]
    UnexpectedWatchObject(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RehearseError>;
