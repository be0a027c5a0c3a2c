//! Error types shared by the worker, the sandbox and the job service client.

use std::time::Duration;

/// Errors returned by the job service client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid service host {host:?}: {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("request to {url} was rejected as unauthorized")]
    Unauthorized { url: String },

    #[error("request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    #[error("invalid response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Errors raised while converting a zip package into a tar stream.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("malformed package archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("failed to write archive entry: {0}")]
    Io(#[from] std::io::Error),

    #[error("package entry {0:?} escapes the package root")]
    UnsafePath(String),

    #[error("package entry {name:?} declares {declared} bytes but holds {actual}")]
    SizeMismatch {
        name: String,
        declared: u64,
        actual: u64,
    },
}

/// Errors raised by the container runtime.
#[derive(Debug, thiserror::Error)]
pub enum ContainerRuntimeError {
    #[error("{operation} failed: {message}")]
    Engine {
        operation: &'static str,
        message: String,
    },

    #[error("container did not exit within {}s", .0.as_secs_f64())]
    Timeout(Duration),
}

impl ContainerRuntimeError {
    pub fn engine(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Engine {
            operation,
            message: err.to_string(),
        }
    }
}

/// Everything that can stop one evaluation from producing a result.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("unsupported language {0:?}")]
    UnsupportedLanguage(String),

    #[error("failed to fetch package: {0}")]
    Package(#[source] ApiError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error(transparent)]
    Runtime(#[from] ContainerRuntimeError),
}

impl EvaluationError {
    /// Whether the failure is caused by the submission itself rather than by
    /// the worker's infrastructure. Such failures are reported back to the
    /// server instead of being left for re-allocation.
    pub fn is_job_fault(&self) -> bool {
        matches!(self, Self::UnsupportedLanguage(_) | Self::Transcode(_))
    }
}
