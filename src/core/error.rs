use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a content, speech or image provider.
#[derive(Debug, Clone, Error)]
#[error("{provider}: {message}")]
pub struct BackendError {
    pub provider: String,
    pub message: String,
}

impl BackendError {
    pub fn new(provider: impl Into<String>, message: impl Display) -> Self {
        Self {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    /// Wraps an `anyhow` chain from a low-level client, keeping every cause.
    pub fn from_anyhow(provider: impl Into<String>, err: anyhow::Error) -> Self {
        Self::new(provider, format!("{:#}", err))
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Story not found: {0}")]
    NotFound(String),

    #[error("{tool} exited with {status}: {stderr}")]
    MediaTool {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout { operation: String, after: Duration },

    #[error("Generation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Runs `fut` under a deadline, mapping expiry to [`Error::Timeout`].
pub async fn with_timeout<T, E, F>(operation: &str, after: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = std::result::Result<T, E>>,
    Error: From<E>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(res) => res.map_err(Error::from),
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
            after,
        }),
    }
}
