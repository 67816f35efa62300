use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

/// Everything that can abort a scenario before its threshold is checked.
///
/// A metric that was read but scored too high is not an error here; see
/// [`crate::scenario::ConvergenceFailure`].
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("workspace setup failed at {path}: {source}")]
    Environment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("corpus at {dir} is not usable: {reason}")]
    Data { dir: PathBuf, reason: String },

    #[error("trainer failed: {0}")]
    Training(String),

    #[error(transparent)]
    Metric(#[from] MetricError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl HarnessError {
    pub(crate) fn environment(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarnessError::Environment {
            path: path.into(),
            source,
        }
    }

    /// Stable short name for reports and the CLI's JSON output.
    pub fn category(&self) -> &'static str {
        match self {
            HarnessError::Environment { .. } => "environment",
            HarnessError::Fetch(_) => "fetch",
            HarnessError::Data { .. } => "data",
            HarnessError::Training(_) => "training",
            HarnessError::Metric(_) => "metric",
            HarnessError::Config(_) => "config",
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },

    #[error("download of {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("could not start extraction tool `{tool}`: {source}")]
    ExtractSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("extraction tool `{tool}` exited with {status}: {diagnostics}")]
    ExtractTool {
        tool: String,
        status: String,
        diagnostics: String,
    },

    #[error("archive {path} is unreadable: {message}")]
    Archive { path: PathBuf, message: String },

    #[error("archive extracted but {0} was not produced")]
    MissingDestination(PathBuf),

    #[error("filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum MetricError {
    #[error("result file not found: {0}")]
    NotFound(PathBuf),

    #[error("could not read result file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("result file {0} has no first line to parse")]
    Empty(PathBuf),

    #[error("result file {path}: cannot parse metric from {token:?}")]
    Malformed { path: PathBuf, token: String },
}

impl MetricError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MetricError::NotFound(_))
    }
}
